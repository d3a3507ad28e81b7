use crate::classes::{ClassRegistry, RefType};
use crate::codec::{str_size, Packet, PacketFactory};
use crate::types::{Location, TAG_OBJECT};
use crate::vm::VmControl;

use super::{EventKind, EventRequest};

/// Encode the body of one event inside an `Event.Composite` packet.
///
/// An empty result (cursor at 0) means the event is not reportable and must be
/// left out of the composite.
pub(super) fn serialize_event(
    request: &EventRequest,
    packets: &PacketFactory,
    classes: &ClassRegistry,
    vm: &dyn VmControl,
) -> Packet {
    let sizes = packets.id_sizes();
    let thread = sizes.object_id;
    let location = sizes.location();

    match request.kind {
        EventKind::VmDeath => {
            if !vm.is_suspended() {
                return packets.raw(0);
            }
            header(packets, request, 0)
        }
        EventKind::VmStart => {
            let mut p = header(packets, request, thread);
            p.write_thread_id(vm.process_thread_id());
            p
        }
        EventKind::ThreadDeath => {
            if !vm.is_suspended() {
                return packets.raw(0);
            }
            let mut p = header(packets, request, thread);
            p.write_thread_id(request.thread_filter().unwrap_or_else(|| vm.app_thread_id()));
            p
        }
        EventKind::ThreadStart => {
            let mut p = header(packets, request, thread);
            p.write_thread_id(vm.app_thread_id());
            p
        }
        EventKind::SingleStep
        | EventKind::Breakpoint
        | EventKind::MethodEntry
        | EventKind::MethodExit => {
            let mut p = header(packets, request, thread + location);
            p.write_thread_id(vm.app_thread_id());
            p.write_location(&event_location(request, vm));
            p
        }
        EventKind::Exception => {
            let exception = request.exception_filter().map_or(0, |(class, _, _)| class);
            let mut p = header(
                packets,
                request,
                thread + location + 1 + sizes.object_id + location,
            );
            p.write_thread_id(vm.app_thread_id());
            p.write_location(&event_location(request, vm));
            p.write_tagged_object_id(TAG_OBJECT, exception);
            // Never caught: the catch location stays zeroed.
            p.write_location(&Location::default());
            p
        }
        EventKind::ClassPrepare => {
            let Some(class) = resolve_class(request, classes) else {
                return packets.raw(0);
            };
            let mut p = header(
                packets,
                request,
                thread + 1 + sizes.reference_type_id + str_size(&class.signature) + 4,
            );
            p.write_thread_id(vm.app_thread_id());
            p.write_tag(class.type_tag);
            p.write_reference_type_id(class.id);
            p.write_str(&class.signature);
            p.write_u32(class.status);
            p
        }
        EventKind::ClassUnload => {
            // Classes are never unloaded, so only explicitly filtered requests report.
            if request.modifiers.is_empty() {
                return packets.raw(0);
            }
            let Some(class) = resolve_class(request, classes) else {
                return packets.raw(0);
            };
            let mut p = header(packets, request, str_size(&class.signature));
            p.write_str(&class.signature);
            p
        }
        EventKind::FramePop
        | EventKind::UserDefined
        | EventKind::ClassLoad
        | EventKind::FieldAccess
        | EventKind::FieldModification
        | EventKind::ExceptionCatch
        | EventKind::MethodExitWithReturnValue => {
            tracing::trace!(
                target: "svm.jdwp",
                request_id = request.request_id,
                event_kind = %request.kind,
                "event kind has no payload"
            );
            packets.raw(0)
        }
    }
}

fn header(packets: &PacketFactory, request: &EventRequest, body: usize) -> Packet {
    let mut p = packets.raw(1 + 4 + body);
    p.write_u8(request.kind.as_u8());
    p.write_u32(request.request_id);
    p
}

fn event_location(request: &EventRequest, vm: &dyn VmControl) -> Location {
    request
        .location_filter()
        .or_else(|| vm.current_location())
        .unwrap_or_default()
}

fn resolve_class<'a>(request: &EventRequest, classes: &'a ClassRegistry) -> Option<&'a RefType> {
    let found = match (request.class_filter(), request.class_match()) {
        (Some(id), _) => classes.find_by_id(id),
        (None, Some(name)) => classes.find_by_name(name),
        (None, None) => None,
    };
    if found.is_none() {
        tracing::warn!(
            target: "svm.jdwp",
            request_id = request.request_id,
            event_kind = %request.kind,
            class_match = request.class_match().unwrap_or_default(),
            class_id = request.class_filter().unwrap_or_default(),
            "event class not found; event dropped"
        );
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Modifier, SuspendPolicy};
    use crate::types::{IdSizes, TYPE_TAG_CLASS};
    use crate::vm::VmState;

    struct Fixture {
        packets: PacketFactory,
        classes: ClassRegistry,
        vm: VmState,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                packets: PacketFactory::new(IdSizes::default()),
                classes: ClassRegistry::from_config(&svm_config::DebugServerConfig::default()),
                vm: VmState::default(),
            }
        }

        fn encode(&self, request: &EventRequest) -> Packet {
            let mut p = serialize_event(request, &self.packets, &self.classes, &self.vm);
            p.set_position(0);
            p
        }
    }

    fn request(kind: EventKind, modifiers: Vec<Modifier>) -> EventRequest {
        EventRequest {
            request_id: 7,
            kind,
            suspend_policy: SuspendPolicy::All,
            triggered: true,
            removed: false,
            modifiers,
        }
    }

    #[test]
    fn breakpoint_uses_the_location_filter() {
        let fx = Fixture::new();
        let loc = Location {
            type_tag: TYPE_TAG_CLASS,
            class_id: 3,
            method_id: 2,
            index: 2,
        };
        let mut p = fx.encode(&request(
            EventKind::Breakpoint,
            vec![Modifier::LocationOnly { location: loc }],
        ));
        assert_eq!(p.read_u8().unwrap(), 2);
        assert_eq!(p.read_u32().unwrap(), 7);
        assert_eq!(p.read_thread_id().unwrap(), 0x1003);
        assert_eq!(p.read_location().unwrap(), loc);
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn step_falls_back_to_the_current_location() {
        let fx = Fixture::new();
        let here = Location {
            type_tag: TYPE_TAG_CLASS,
            class_id: 3,
            method_id: 1,
            index: 9,
        };
        fx.vm.set_location(here);
        let mut p = fx.encode(&request(EventKind::SingleStep, Vec::new()));
        p.read_bytes(1 + 4 + 4).unwrap();
        assert_eq!(p.read_location().unwrap(), here);
    }

    #[test]
    fn vm_death_reports_only_while_suspended() {
        let fx = Fixture::new();
        let death = request(EventKind::VmDeath, Vec::new());
        assert_eq!(fx.encode(&death).remaining(), 0);

        fx.vm.suspend();
        let p = serialize_event(&death, &fx.packets, &fx.classes, &fx.vm);
        assert_eq!(p.written(), &[99, 0, 0, 0, 7]);
    }

    #[test]
    fn exception_carries_kind_tagged_object_and_catch_location() {
        let fx = Fixture::new();
        let error = fx.classes.find_by_name("java.lang.Error").unwrap().id;
        let mut p = fx.encode(&request(
            EventKind::Exception,
            vec![Modifier::ExceptionOnly {
                exception_or_null: error,
                caught: false,
                uncaught: true,
            }],
        ));
        assert_eq!(p.read_u8().unwrap(), 4);
        assert_eq!(p.read_u32().unwrap(), 7);
        assert_eq!(p.read_thread_id().unwrap(), 0x1003);
        assert_eq!(p.read_location().unwrap(), Location::default());
        assert_eq!(p.read_tag().unwrap(), TAG_OBJECT);
        assert_eq!(p.read_object_id().unwrap(), error);
        assert_eq!(p.read_location().unwrap(), Location::default());
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn class_prepare_resolves_the_match_pattern() {
        let fx = Fixture::new();
        let main = fx.classes.main_class().unwrap();
        let mut p = fx.encode(&request(
            EventKind::ClassPrepare,
            vec![Modifier::ClassMatch {
                pattern: "TestClass$*".into(),
            }],
        ));
        assert_eq!(p.read_u8().unwrap(), 8);
        assert_eq!(p.read_u32().unwrap(), 7);
        assert_eq!(p.read_thread_id().unwrap(), 0x1003);
        assert_eq!(p.read_tag().unwrap(), TYPE_TAG_CLASS);
        assert_eq!(p.read_reference_type_id().unwrap(), main.id);
        assert_eq!(p.read_str().unwrap(), "LTestClass;");
        assert_eq!(p.read_u32().unwrap(), 7);
    }

    #[test]
    fn unresolved_class_prepare_is_empty() {
        let fx = Fixture::new();
        let p = fx.encode(&request(
            EventKind::ClassPrepare,
            vec![Modifier::ClassMatch {
                pattern: "Missing".into(),
            }],
        ));
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn class_unload_needs_a_modifier() {
        let fx = Fixture::new();
        assert_eq!(fx.encode(&request(EventKind::ClassUnload, Vec::new())).remaining(), 0);

        let mut p = fx.encode(&request(
            EventKind::ClassUnload,
            vec![Modifier::ClassOnly { class_id: 1 }],
        ));
        p.read_bytes(5).unwrap();
        assert_eq!(p.read_str().unwrap(), "Ljava/lang/Object;");
    }

    #[test]
    fn kinds_without_payload_are_empty() {
        let fx = Fixture::new();
        for kind in [EventKind::FramePop, EventKind::FieldAccess, EventKind::ClassLoad] {
            assert_eq!(fx.encode(&request(kind, Vec::new())).remaining(), 0);
        }
    }
}
