use std::sync::Arc;
use std::time::Duration;

use svm_config::DebugServerConfig;
use svm_jdwp::{DebugContext, JdwpError, JdwpServer, VmControl, VmState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const HANDSHAKE: &[u8; 14] = b"JDWP-Handshake";
const TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    stream: TcpStream,
    ctx: Arc<DebugContext>,
    vm: Arc<VmState>,
    session: JoinHandle<svm_jdwp::Result<()>>,
}

struct Reply {
    id: u32,
    flags: u8,
    error_code: u16,
    body: Vec<u8>,
}

async fn attach() -> Client {
    let server = JdwpServer::bind("127.0.0.1:0", DebugServerConfig::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let vm = Arc::new(VmState::default());

    let accept = {
        let vm = vm.clone();
        tokio::spawn(async move { server.accept(vm).await })
    };

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(HANDSHAKE).await.unwrap();
    let mut echo = [0u8; 14];
    stream.read_exact(&mut echo).await.unwrap();
    assert_eq!(&echo, HANDSHAKE);

    let session = accept.await.unwrap().unwrap();
    let ctx = session.context();
    let session = tokio::spawn(session.run());
    Client {
        stream,
        ctx,
        vm,
        session,
    }
}

fn command(id: u32, command_set: u8, command: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(11 + body.len());
    out.extend_from_slice(&((11 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.push(0);
    out.push(command_set);
    out.push(command);
    out.extend_from_slice(body);
    out
}

async fn read_packet(stream: &mut TcpStream) -> Vec<u8> {
    tokio::time::timeout(TIMEOUT, async {
        let mut header = [0u8; 11];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let mut body = vec![0u8; len - 11];
        stream.read_exact(&mut body).await.unwrap();
        let mut packet = header.to_vec();
        packet.extend_from_slice(&body);
        packet
    })
    .await
    .expect("timed out waiting for a packet")
}

impl Client {
    async fn vm_start(&mut self) -> Vec<u8> {
        read_packet(&mut self.stream).await
    }

    async fn call(&mut self, id: u32, command_set: u8, cmd: u8, body: &[u8]) -> Reply {
        self.stream
            .write_all(&command(id, command_set, cmd, body))
            .await
            .unwrap();
        let packet = read_packet(&mut self.stream).await;
        Reply {
            id: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            flags: packet[8],
            error_code: u16::from_be_bytes([packet[9], packet[10]]),
            body: packet[11..].to_vec(),
        }
    }
}

#[tokio::test]
async fn handshake_is_followed_by_vm_start() {
    let mut client = attach().await;
    let packet = client.vm_start().await;

    assert_eq!(packet[8], 0);
    assert_eq!((packet[9], packet[10]), (64, 100));
    let body = &packet[11..];
    assert_eq!(body[0], 0, "suspend policy NONE");
    assert_eq!(&body[1..5], &1u32.to_be_bytes());
    assert_eq!(body[5], 90, "VM_START");
    assert_eq!(&body[6..10], &0u32.to_be_bytes());
    assert_eq!(&body[10..14], &0x1001u32.to_be_bytes());
    assert_eq!(body.len(), 14);
}

#[tokio::test]
async fn suspend_is_answered_with_the_same_id() {
    let mut client = attach().await;
    client.vm_start().await;

    let reply = client.call(42, 1, 8, &[]).await;
    assert_eq!(reply.id, 42);
    assert_eq!(reply.flags, 0x80);
    assert_eq!(reply.error_code, 0);
    assert!(reply.body.is_empty());

    // Commands run in order, so the next reply proves the suspend took effect.
    client.call(43, 1, 7, &[]).await;
    assert!(client.vm.is_suspended());
}

#[tokio::test]
async fn id_sizes_and_unknown_commands() {
    let mut client = attach().await;
    client.vm_start().await;

    let reply = client.call(1, 1, 7, &[]).await;
    let sizes: Vec<u32> = reply
        .body
        .chunks(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(sizes, vec![2, 2, 4, 4, 4]);

    let reply = client.call(2, 9, 1, &[]).await;
    assert_eq!(reply.id, 2);
    assert_eq!(reply.error_code, 99);
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn breakpoint_request_is_delivered_in_a_composite() {
    let mut client = attach().await;
    client.vm_start().await;

    // EventRequest.Set: BREAKPOINT, SUSPEND_ALL, one LocationOnly modifier.
    let mut body = vec![2, 2];
    body.extend_from_slice(&1u32.to_be_bytes());
    body.push(7);
    body.push(1);
    body.extend_from_slice(&3u32.to_be_bytes());
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&2u64.to_be_bytes());
    let reply = client.call(10, 15, 1, &body).await;
    assert_eq!(reply.error_code, 0);
    let request_id = u32::from_be_bytes([reply.body[0], reply.body[1], reply.body[2], reply.body[3]]);

    assert_eq!(client.ctx.events.dispatch_all().unwrap(), 1);
    let packet = read_packet(&mut client.stream).await;
    let event = &packet[11..];
    assert_eq!(event[0], 2, "suspend policy ALL");
    assert_eq!(&event[1..5], &1u32.to_be_bytes());
    assert_eq!(event[5], 2, "BREAKPOINT");
    assert_eq!(&event[6..10], &request_id.to_be_bytes());
    assert_eq!(&event[10..14], &0x1003u32.to_be_bytes());
    assert_eq!(event[14], 1);
    assert_eq!(&event[15..19], &3u32.to_be_bytes());
    assert_eq!(&event[19..21], &2u16.to_be_bytes());
    assert_eq!(&event[21..29], &2u64.to_be_bytes());

    // Delivered requests stay as tombstones until cleared.
    assert!(client.ctx.events.get_by_request_id(request_id).unwrap().removed);
    let mut clear = vec![2];
    clear.extend_from_slice(&request_id.to_be_bytes());
    let reply = client.call(11, 15, 2, &clear).await;
    assert_eq!(reply.error_code, 0);
    assert!(client.ctx.events.get_by_request_id(request_id).is_none());
}

#[tokio::test]
async fn unresolved_class_prepare_still_answers() {
    let mut client = attach().await;
    client.vm_start().await;

    let pattern = b"no.such.Class";
    let mut body = vec![8, 2];
    body.extend_from_slice(&1u32.to_be_bytes());
    body.push(5);
    body.extend_from_slice(&(pattern.len() as u32).to_be_bytes());
    body.extend_from_slice(pattern);

    let reply = client.call(3, 15, 1, &body).await;
    assert_eq!(reply.error_code, 0);
    assert_eq!(reply.body.len(), 4);
    assert!(client.ctx.events.is_empty());
}

#[tokio::test]
async fn disconnect_ends_the_session() {
    let mut client = attach().await;
    client.vm_start().await;
    drop(client.stream);

    let result = tokio::time::timeout(TIMEOUT, client.session).await.unwrap().unwrap();
    assert!(matches!(result, Err(JdwpError::Disconnected)));
}

#[tokio::test]
async fn short_length_is_fatal() {
    let mut client = attach().await;
    client.vm_start().await;

    let mut bogus = command(1, 1, 1, &[]);
    bogus[..4].copy_from_slice(&5u32.to_be_bytes());
    client.stream.write_all(&bogus).await.unwrap();

    let result = tokio::time::timeout(TIMEOUT, client.session).await.unwrap().unwrap();
    assert!(matches!(result, Err(JdwpError::Protocol(_))));
}

#[tokio::test]
async fn oversized_length_is_fatal_before_reading_the_body() {
    let mut client = attach().await;
    client.vm_start().await;

    let mut huge = command(1, 1, 1, &[]);
    huge[..4].copy_from_slice(&u32::MAX.to_be_bytes());
    client.stream.write_all(&huge).await.unwrap();

    let result = tokio::time::timeout(TIMEOUT, client.session).await.unwrap().unwrap();
    assert!(matches!(result, Err(JdwpError::Protocol(msg)) if msg.contains("limit")));
}

#[tokio::test]
async fn dispose_replies_then_closes() {
    let mut client = attach().await;
    client.vm_start().await;

    let reply = client.call(5, 1, 6, &[]).await;
    assert_eq!(reply.id, 5);
    assert_eq!(reply.error_code, 0);

    let result = tokio::time::timeout(TIMEOUT, client.session).await.unwrap().unwrap();
    assert!(result.is_ok());
    let mut rest = Vec::new();
    client.stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn bad_handshake_is_rejected() {
    let server = JdwpServer::bind("127.0.0.1:0", DebugServerConfig::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let accept = tokio::spawn(async move { server.accept(Arc::new(VmState::default())).await });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"HELLO-Handshake").await.unwrap();
    let result = tokio::time::timeout(TIMEOUT, accept).await.unwrap().unwrap();
    assert!(matches!(result, Err(JdwpError::HandshakeFailed)));
}
