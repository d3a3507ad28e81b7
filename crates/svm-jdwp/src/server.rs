//! TCP front end: handshake, receive loop, and the outbound writer task.

use std::net::SocketAddr;
use std::sync::Arc;

use svm_config::DebugServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{Packet, PacketFactory};
use crate::error::{JdwpError, Result};
use crate::event::PacketSink;
use crate::handlers::DebugContext;
use crate::types::{HANDSHAKE, HEADER_LEN};
use crate::vm::VmControl;

/// [`PacketSink`] that hands finished packets to the connection's writer task.
///
/// Never blocks, so the VM execution thread can report events while the
/// receive loop is busy.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl PacketSink for ChannelSink {
    fn send(&self, packet: Packet) -> Result<()> {
        self.tx.send(packet.finish()).map_err(|_| JdwpError::Disconnected)
    }
}

pub struct JdwpServer {
    listener: TcpListener,
    config: DebugServerConfig,
}

impl JdwpServer {
    pub async fn bind(addr: impl ToSocketAddrs, config: DebugServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(target: "svm.jdwp", addr = %listener.local_addr()?, "listening for debugger");
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for a debugger, complete the handshake and announce VM start.
    pub async fn accept(&self, vm: Arc<dyn VmControl>) -> Result<Session> {
        let (mut socket, peer) = self.listener.accept().await?;
        tracing::info!(target: "svm.jdwp", peer = %peer, "debugger connected");

        // Debugger -> "JDWP-Handshake", server echoes it back.
        let mut hs = [0u8; HANDSHAKE.len()];
        match socket.read_exact(&mut hs).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(JdwpError::HandshakeFailed)
            }
            Err(err) => return Err(err.into()),
        }
        if hs != *HANDSHAKE {
            tracing::warn!(target: "svm.jdwp", peer = %peer, "bad handshake");
            return Err(JdwpError::HandshakeFailed);
        }
        socket.write_all(HANDSHAKE).await?;
        socket.set_nodelay(true)?;

        let (reader, writer) = socket.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(DebugContext::from_config(
            &self.config,
            vm,
            Arc::new(ChannelSink::new(tx)),
        )?);
        let writer = tokio::spawn(write_loop(writer, rx, ctx.shutdown.clone()));

        ctx.events.dispatch_vm_init()?;
        Ok(Session {
            ctx,
            reader,
            writer,
            peer,
            max_packet_len: self.config.server.max_packet_len,
        })
    }
}

/// One attached debugger.
pub struct Session {
    ctx: Arc<DebugContext>,
    reader: OwnedReadHalf,
    writer: JoinHandle<Result<()>>,
    peer: SocketAddr,
    max_packet_len: usize,
}

impl Session {
    /// Shared with the VM execution thread.
    pub fn context(&self) -> Arc<DebugContext> {
        Arc::clone(&self.ctx)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Answer commands until the debugger goes away, the session is cancelled,
    /// or a fatal error occurs. A clean disconnect surfaces as
    /// [`JdwpError::Disconnected`].
    pub async fn run(mut self) -> Result<()> {
        let shutdown = self.ctx.shutdown.clone();
        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                res = read_packet(&mut self.reader, &self.ctx.packets, self.max_packet_len) => {
                    let packet = match res {
                        Ok(packet) => packet,
                        Err(err) => break Err(err),
                    };
                    if let Err(err) = self.ctx.handle_packet(packet) {
                        break Err(err);
                    }
                }
            }
        };

        shutdown.cancel();
        match self.writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(target: "svm.jdwp", peer = %self.peer, error = %err, "writer task failed");
            }
            Err(err) => {
                tracing::warn!(target: "svm.jdwp", peer = %self.peer, error = %err, "writer task aborted");
            }
        }
        tracing::info!(target: "svm.jdwp", peer = %self.peer, "debug session ended");
        result
    }
}

async fn read_packet(
    reader: &mut OwnedReadHalf,
    packets: &PacketFactory,
    max_len: usize,
) -> Result<Packet> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(JdwpError::Disconnected)
        }
        Err(err) => return Err(err.into()),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if length < HEADER_LEN {
        return Err(JdwpError::Protocol(format!(
            "packet length {length} is shorter than the {HEADER_LEN}-byte header"
        )));
    }
    if length > max_len {
        return Err(JdwpError::Protocol(format!(
            "packet length {length} exceeds the {max_len}-byte limit"
        )));
    }

    let mut payload = vec![0u8; length - HEADER_LEN];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(JdwpError::Disconnected)
        }
        Err(err) => return Err(err.into()),
    }
    Ok(packets.from_header_payload(&header, &payload))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => {
                let Some(bytes) = msg else { break };
                writer.write_all(&bytes).await?;
            }
            _ = shutdown.cancelled() => {
                // Flush what was queued before the cancel, e.g. a Dispose reply.
                while let Ok(bytes) = rx.try_recv() {
                    writer.write_all(&bytes).await?;
                }
                break;
            }
        }
    }
    writer.shutdown().await?;
    Ok(())
}
