//! Event requests, their modifiers, and the dispatcher that delivers them.

mod dispatcher;
mod payload;

use std::fmt;

pub use dispatcher::{EventDispatcher, PacketSink};

use crate::codec::Packet;
use crate::error::{CommandError, ErrorCode};
use crate::types::{FieldId, Location, ObjectId, ReferenceTypeId, ThreadId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    SingleStep,
    Breakpoint,
    FramePop,
    Exception,
    UserDefined,
    ThreadStart,
    ThreadDeath,
    ClassPrepare,
    ClassUnload,
    ClassLoad,
    FieldAccess,
    FieldModification,
    ExceptionCatch,
    MethodEntry,
    MethodExit,
    MethodExitWithReturnValue,
    VmStart,
    VmDeath,
}

impl EventKind {
    pub fn from_u8(kind: u8) -> Option<Self> {
        Some(match kind {
            1 => Self::SingleStep,
            2 => Self::Breakpoint,
            3 => Self::FramePop,
            4 => Self::Exception,
            5 => Self::UserDefined,
            6 => Self::ThreadStart,
            7 => Self::ThreadDeath,
            8 => Self::ClassPrepare,
            9 => Self::ClassUnload,
            10 => Self::ClassLoad,
            20 => Self::FieldAccess,
            21 => Self::FieldModification,
            30 => Self::ExceptionCatch,
            40 => Self::MethodEntry,
            41 => Self::MethodExit,
            42 => Self::MethodExitWithReturnValue,
            90 => Self::VmStart,
            99 => Self::VmDeath,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::SingleStep => 1,
            Self::Breakpoint => 2,
            Self::FramePop => 3,
            Self::Exception => 4,
            Self::UserDefined => 5,
            Self::ThreadStart => 6,
            Self::ThreadDeath => 7,
            Self::ClassPrepare => 8,
            Self::ClassUnload => 9,
            Self::ClassLoad => 10,
            Self::FieldAccess => 20,
            Self::FieldModification => 21,
            Self::ExceptionCatch => 30,
            Self::MethodEntry => 40,
            Self::MethodExit => 41,
            Self::MethodExitWithReturnValue => 42,
            Self::VmStart => 90,
            Self::VmDeath => 99,
        }
    }

    /// Occurrences the runtime never produces. Requests for them are accepted
    /// but created untriggered.
    pub fn is_muted(self) -> bool {
        matches!(
            self,
            Self::VmDeath | Self::ThreadDeath | Self::Exception | Self::ClassUnload
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SingleStep => "SINGLE_STEP",
            Self::Breakpoint => "BREAKPOINT",
            Self::FramePop => "FRAME_POP",
            Self::Exception => "EXCEPTION",
            Self::UserDefined => "USER_DEFINED",
            Self::ThreadStart => "THREAD_START",
            Self::ThreadDeath => "THREAD_DEATH",
            Self::ClassPrepare => "CLASS_PREPARE",
            Self::ClassUnload => "CLASS_UNLOAD",
            Self::ClassLoad => "CLASS_LOAD",
            Self::FieldAccess => "FIELD_ACCESS",
            Self::FieldModification => "FIELD_MODIFICATION",
            Self::ExceptionCatch => "EXCEPTION_CATCH",
            Self::MethodEntry => "METHOD_ENTRY",
            Self::MethodExit => "METHOD_EXIT",
            Self::MethodExitWithReturnValue => "METHOD_EXIT_WITH_RETURN_VALUE",
            Self::VmStart => "VM_START",
            Self::VmDeath => "VM_DEATH",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SuspendPolicy {
    None,
    EventThread,
    All,
}

impl SuspendPolicy {
    /// The order in which a delivery pass sends its composite packets.
    pub const DELIVERY_ORDER: [Self; 3] = [Self::None, Self::EventThread, Self::All];

    pub fn from_u8(policy: u8) -> Option<Self> {
        match policy {
            0 => Some(Self::None),
            1 => Some(Self::EventThread),
            2 => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::EventThread => 1,
            Self::All => 2,
        }
    }
}

/// A filter attached to an event request, in EventRequest.Set wire order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Modifier {
    Count { count: u32 },
    Conditional { expr_id: u32 },
    ThreadOnly { thread: ThreadId },
    ClassOnly { class_id: ReferenceTypeId },
    ClassMatch { pattern: String },
    ClassExclude { pattern: String },
    LocationOnly { location: Location },
    ExceptionOnly {
        exception_or_null: ReferenceTypeId,
        caught: bool,
        uncaught: bool,
    },
    FieldOnly {
        class_id: ReferenceTypeId,
        field_id: FieldId,
    },
    Step {
        thread: ThreadId,
        size: u32,
        depth: u32,
    },
    InstanceOnly { object_id: ObjectId },
    SourceNameMatch { pattern: String },
}

impl Modifier {
    pub fn kind(&self) -> u8 {
        match self {
            Self::Count { .. } => 1,
            Self::Conditional { .. } => 2,
            Self::ThreadOnly { .. } => 3,
            Self::ClassOnly { .. } => 4,
            Self::ClassMatch { .. } => 5,
            Self::ClassExclude { .. } => 6,
            Self::LocationOnly { .. } => 7,
            Self::ExceptionOnly { .. } => 8,
            Self::FieldOnly { .. } => 9,
            Self::Step { .. } => 10,
            Self::InstanceOnly { .. } => 11,
            Self::SourceNameMatch { .. } => 12,
        }
    }

    pub fn read(p: &mut Packet) -> Result<Self, CommandError> {
        let kind = p.read_u8()?;
        Ok(match kind {
            1 => Self::Count {
                count: p.read_u32()?,
            },
            2 => Self::Conditional {
                expr_id: p.read_u32()?,
            },
            3 => Self::ThreadOnly {
                thread: p.read_thread_id()?,
            },
            4 => Self::ClassOnly {
                class_id: p.read_reference_type_id()?,
            },
            5 => Self::ClassMatch {
                pattern: p.read_str()?,
            },
            6 => Self::ClassExclude {
                pattern: p.read_str()?,
            },
            7 => Self::LocationOnly {
                location: p.read_location()?,
            },
            8 => Self::ExceptionOnly {
                exception_or_null: p.read_reference_type_id()?,
                caught: p.read_bool()?,
                uncaught: p.read_bool()?,
            },
            9 => Self::FieldOnly {
                class_id: p.read_reference_type_id()?,
                field_id: p.read_field_id()?,
            },
            10 => Self::Step {
                thread: p.read_thread_id()?,
                size: p.read_u32()?,
                depth: p.read_u32()?,
            },
            11 => Self::InstanceOnly {
                object_id: p.read_object_id()?,
            },
            12 => Self::SourceNameMatch {
                pattern: p.read_str()?,
            },
            other => {
                tracing::warn!(target: "svm.jdwp", modifier = other, "unknown event modifier kind");
                return Err(ErrorCode::ILLEGAL_ARGUMENT.into());
            }
        })
    }

    pub fn write(&self, p: &mut Packet) {
        p.write_u8(self.kind());
        match self {
            Self::Count { count } => p.write_u32(*count),
            Self::Conditional { expr_id } => p.write_u32(*expr_id),
            Self::ThreadOnly { thread } => p.write_thread_id(*thread),
            Self::ClassOnly { class_id } => p.write_reference_type_id(*class_id),
            Self::ClassMatch { pattern }
            | Self::ClassExclude { pattern }
            | Self::SourceNameMatch { pattern } => p.write_str(pattern),
            Self::LocationOnly { location } => p.write_location(location),
            Self::ExceptionOnly {
                exception_or_null,
                caught,
                uncaught,
            } => {
                p.write_reference_type_id(*exception_or_null);
                p.write_bool(*caught);
                p.write_bool(*uncaught);
            }
            Self::FieldOnly { class_id, field_id } => {
                p.write_reference_type_id(*class_id);
                p.write_field_id(*field_id);
            }
            Self::Step {
                thread,
                size,
                depth,
            } => {
                p.write_thread_id(*thread);
                p.write_u32(*size);
                p.write_u32(*depth);
            }
            Self::InstanceOnly { object_id } => p.write_object_id(*object_id),
        }
    }
}

/// Strip a trailing `$*` or `*` from a class-match pattern.
pub fn class_pattern_name(pattern: &str) -> &str {
    pattern
        .strip_suffix("$*")
        .or_else(|| pattern.strip_suffix('*'))
        .unwrap_or(pattern)
}

/// One armed trigger registered by the debugger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRequest {
    pub request_id: u32,
    pub kind: EventKind,
    pub suspend_policy: SuspendPolicy,
    /// An occurrence is pending delivery.
    pub triggered: bool,
    /// Tombstoned: cleared, delivered, or never eligible.
    pub removed: bool,
    pub modifiers: Vec<Modifier>,
}

impl EventRequest {
    /// A synthetic request that bypasses the registry.
    pub fn synthetic(kind: EventKind, suspend_policy: SuspendPolicy) -> Self {
        Self {
            request_id: 0,
            kind,
            suspend_policy,
            triggered: true,
            removed: false,
            modifiers: Vec::new(),
        }
    }

    /// Parse an EventRequest.Set body into a fresh request.
    ///
    /// A CLASS_PREPARE ClassMatch that names no registered class, or any
    /// ExceptionOnly filter, leaves the request tombstoned so the caller does not
    /// register it.
    pub fn parse_set(p: &mut Packet, events: &EventDispatcher) -> Result<Self, CommandError> {
        let kind_byte = p.read_u8()?;
        let kind = EventKind::from_u8(kind_byte).ok_or_else(|| {
            tracing::warn!(target: "svm.jdwp", event_kind = kind_byte, "unknown event kind");
            CommandError::from(ErrorCode::INVALID_EVENT_TYPE)
        })?;
        let policy_byte = p.read_u8()?;
        let policy = SuspendPolicy::from_u8(policy_byte).ok_or_else(|| {
            tracing::warn!(target: "svm.jdwp", policy = policy_byte, "unknown suspend policy");
            CommandError::from(ErrorCode::ILLEGAL_ARGUMENT)
        })?;
        let count = p.read_u32()? as usize;

        let mut modifiers = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            modifiers.push(Modifier::read(p)?);
        }

        let mut request = events.new_event(kind, policy);
        for modifier in &modifiers {
            match modifier {
                Modifier::ClassMatch { pattern } if kind == EventKind::ClassPrepare => {
                    let name = class_pattern_name(pattern);
                    if events.classes().find_by_name(name).is_none() {
                        tracing::debug!(
                            target: "svm.jdwp",
                            request_id = request.request_id,
                            pattern = %pattern,
                            "class match resolves to no class"
                        );
                        request.tombstone();
                    }
                }
                Modifier::ExceptionOnly { .. } => request.tombstone(),
                _ => {}
            }
        }
        request.modifiers = modifiers;
        Ok(request)
    }

    pub fn tombstone(&mut self) {
        self.triggered = false;
        self.removed = true;
    }

    pub fn location_filter(&self) -> Option<Location> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::LocationOnly { location } => Some(*location),
            _ => None,
        })
    }

    pub fn thread_filter(&self) -> Option<ThreadId> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::ThreadOnly { thread } => Some(*thread),
            _ => None,
        })
    }

    pub fn class_filter(&self) -> Option<ReferenceTypeId> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::ClassOnly { class_id } => Some(*class_id),
            _ => None,
        })
    }

    /// The class name a ClassMatch modifier refers to, wildcard suffix removed.
    pub fn class_match(&self) -> Option<&str> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::ClassMatch { pattern } => Some(class_pattern_name(pattern)),
            _ => None,
        })
    }

    pub fn exception_filter(&self) -> Option<(ReferenceTypeId, bool, bool)> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::ExceptionOnly {
                exception_or_null,
                caught,
                uncaught,
            } => Some((*exception_or_null, *caught, *uncaught)),
            _ => None,
        })
    }
}

/// What the VM reports at an instruction-level checkpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub opcode: u8,
    pub location: Location,
}
