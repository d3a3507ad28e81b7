//! Debugger-side JDWP server for the Sedona VM debug mode.
//!
//! An IDE attaches over TCP, completes the `JDWP-Handshake`, and then drives
//! the VM with JDWP commands. The crate is split into:
//!
//! - [`codec`]: the packet buffer, its big-endian readers and writers, and the
//!   modified-UTF string encoding.
//! - [`event`]: the registry of event requests and the dispatcher that turns VM
//!   occurrences into `Event.Composite` packets, grouped by suspend policy.
//! - [`handlers`]: replies for the supported command sets.
//! - [`server`]: the TCP listener, the receive loop, and the outbound writer.
//!
//! The VM itself is reached through [`vm::VmControl`]; [`vm::VmState`] is the
//! in-process implementation used by the `svm-jdwp` binary and by tests.

pub mod classes;
pub mod codec;
pub mod error;
pub mod event;
pub mod handlers;
mod poison;
pub mod server;
pub mod types;
pub mod vm;

pub use classes::ClassRegistry;
pub use codec::{Packet, PacketFactory, PacketList};
pub use error::{CommandError, ErrorCode, JdwpError, Result};
pub use event::{Checkpoint, EventDispatcher, EventKind, EventRequest, Modifier, PacketSink, SuspendPolicy};
pub use handlers::DebugContext;
pub use server::{ChannelSink, JdwpServer, Session};
pub use types::{IdSizes, Location};
pub use vm::{ExitRequest, VmControl, VmState, VmThreads};
