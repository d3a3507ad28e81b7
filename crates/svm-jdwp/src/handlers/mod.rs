//! Replies to inbound JDWP commands.
//!
//! Each command set has its own module with a `handle` entry point matching on
//! the command byte. Handlers read their arguments from the command packet and
//! return the reply; [`DebugContext::handle_packet`] turns a rejected command
//! into an error reply carrying the same packet id.

mod event_request;
mod method;
mod reference_type;
mod thread_reference;
mod virtual_machine;

use std::sync::Arc;

use svm_config::DebugServerConfig;
use tokio_util::sync::CancellationToken;

use crate::classes::ClassRegistry;
use crate::codec::{Packet, PacketFactory};
use crate::error::{CommandError, ErrorCode, Result};
use crate::event::{EventDispatcher, PacketSink};
use crate::types::{
    IdSizes, COMMAND_SET_CLASS_TYPE, COMMAND_SET_EVENT_REQUEST, COMMAND_SET_METHOD,
    COMMAND_SET_REFERENCE_TYPE, COMMAND_SET_THREAD_GROUP_REFERENCE, COMMAND_SET_THREAD_REFERENCE,
    COMMAND_SET_VIRTUAL_MACHINE,
};
use crate::vm::{VmControl, VmInfo, VmThreads};

/// `Ok(None)` means the handler already sent its reply, which is the case for
/// commands whose side effect must follow the reply on the wire.
pub(crate) type CommandResult = std::result::Result<Option<Packet>, CommandError>;

/// Everything a command handler may touch.
pub struct DebugContext {
    pub packets: Arc<PacketFactory>,
    pub classes: Arc<ClassRegistry>,
    pub vm: Arc<dyn VmControl>,
    pub threads: VmThreads,
    pub events: Arc<EventDispatcher>,
    pub sink: Arc<dyn PacketSink>,
    pub vm_info: VmInfo,
    /// Cancelled when the debugger disposes or exits the VM.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for DebugContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugContext")
            .field("threads", &self.threads)
            .field("vm_info", &self.vm_info)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl DebugContext {
    pub fn from_config(
        config: &DebugServerConfig,
        vm: Arc<dyn VmControl>,
        sink: Arc<dyn PacketSink>,
    ) -> Result<Self> {
        let packets = Arc::new(PacketFactory::new(IdSizes::from_config(&config.ids)?));
        let classes = Arc::new(ClassRegistry::from_config(config));
        let events = Arc::new(EventDispatcher::new(
            Arc::clone(&packets),
            Arc::clone(&classes),
            Arc::clone(&vm),
            Arc::clone(&sink),
        ));
        Ok(Self {
            packets,
            classes,
            vm,
            threads: VmThreads::from_config(&config.vm),
            events,
            sink,
            vm_info: VmInfo::from_config(&config.vm),
            shutdown: CancellationToken::new(),
        })
    }

    /// Answer one inbound packet. Only fatal failures are returned; rejected
    /// commands are answered on the wire.
    pub fn handle_packet(&self, mut packet: Packet) -> Result<()> {
        let id = packet.id();
        if packet.is_reply() {
            tracing::warn!(target: "svm.jdwp", packet_id = id, "unexpected reply packet from debugger");
            return self
                .sink
                .send(self.packets.error_reply(id, ErrorCode::SCHEMA_CHANGE_NOT_IMPLEMENTED));
        }

        let command_set = packet.command_set();
        let command = packet.command();
        tracing::debug!(
            target: "svm.jdwp",
            packet_id = id,
            command_set,
            command,
            len = packet.length(),
            "command received"
        );

        let outcome = match command_set {
            COMMAND_SET_VIRTUAL_MACHINE => virtual_machine::handle(self, command, id, &mut packet),
            COMMAND_SET_REFERENCE_TYPE => reference_type::handle(self, command, id, &mut packet),
            COMMAND_SET_CLASS_TYPE => reference_type::handle_class_type(self, command, id, &mut packet),
            COMMAND_SET_METHOD => method::handle(self, command, id, &mut packet),
            COMMAND_SET_THREAD_REFERENCE => thread_reference::handle(self, command, id, &mut packet),
            COMMAND_SET_THREAD_GROUP_REFERENCE => {
                thread_reference::handle_group(self, command, id, &mut packet)
            }
            COMMAND_SET_EVENT_REQUEST => event_request::handle(self, command, id, &mut packet),
            _ => Err(ErrorCode::NOT_IMPLEMENTED.into()),
        };

        match outcome {
            Ok(Some(reply)) => self.sink.send(reply),
            Ok(None) => Ok(()),
            Err(CommandError::Reply(code)) => {
                if code == ErrorCode::NOT_IMPLEMENTED {
                    tracing::debug!(target: "svm.jdwp", packet_id = id, command_set, command, "command not implemented");
                } else {
                    tracing::warn!(
                        target: "svm.jdwp",
                        packet_id = id,
                        command_set,
                        command,
                        error = %code,
                        "command rejected"
                    );
                }
                self.sink.send(self.packets.error_reply(id, code))
            }
            Err(CommandError::Fatal(err)) => {
                tracing::error!(
                    target: "svm.jdwp",
                    packet_id = id,
                    command_set,
                    command,
                    error = %err,
                    "fatal error while handling command"
                );
                Err(err)
            }
        }
    }

    pub(crate) fn reply(&self, id: u32, body: usize) -> Packet {
        self.packets.reply(id, body)
    }

    /// Send `reply` now, ahead of the handler's remaining side effects.
    pub(crate) fn send_now(&self, reply: Packet) -> std::result::Result<(), CommandError> {
        self.sink.send(reply).map_err(CommandError::Fatal)
    }
}
