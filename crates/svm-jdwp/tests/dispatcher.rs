use std::sync::{Arc, Mutex};

use svm_config::DebugServerConfig;
use svm_jdwp::{
    Checkpoint, ClassRegistry, EventDispatcher, EventKind, IdSizes, Modifier, Packet,
    PacketFactory, PacketSink, SuspendPolicy, VmControl, VmState,
};

#[derive(Default)]
struct Recorder {
    packets: Mutex<Vec<Vec<u8>>>,
}

impl Recorder {
    fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.packets.lock().unwrap())
    }
}

impl PacketSink for Recorder {
    fn send(&self, packet: Packet) -> svm_jdwp::Result<()> {
        self.packets.lock().unwrap().push(packet.finish());
        Ok(())
    }
}

struct Setup {
    events: EventDispatcher,
    classes: Arc<ClassRegistry>,
    vm: Arc<VmState>,
    sink: Arc<Recorder>,
}

fn setup() -> Setup {
    let config = DebugServerConfig::default();
    let classes = Arc::new(ClassRegistry::from_config(&config));
    let vm = Arc::new(VmState::default());
    let sink = Arc::new(Recorder::default());
    let events = EventDispatcher::new(
        Arc::new(PacketFactory::new(IdSizes::default())),
        Arc::clone(&classes),
        vm.clone(),
        sink.clone(),
    );
    Setup {
        events,
        classes,
        vm,
        sink,
    }
}

/// (policy, count, first event kind) of a composite packet.
fn composite(bytes: &[u8]) -> (u8, u32, u8) {
    assert_eq!((bytes[9], bytes[10]), (64, 100));
    let count = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    (bytes[11], count, bytes[16])
}

#[test]
fn one_composite_per_policy_in_delivery_order() {
    let s = setup();
    for policy in [SuspendPolicy::All, SuspendPolicy::None, SuspendPolicy::EventThread] {
        let request = s.events.new_event(EventKind::Breakpoint, policy);
        s.events.add(request);
    }

    assert!(s.events.check_for_events(&Checkpoint {
        opcode: 0,
        location: Default::default(),
    }));
    assert!(s.vm.is_suspended());

    assert_eq!(s.events.dispatch_all().unwrap(), 3);
    let sent: Vec<_> = s.sink.take().iter().map(|p| composite(p)).collect();
    assert_eq!(sent, vec![(0, 1, 2), (1, 1, 2), (2, 1, 2)]);

    // Everything is tombstoned now, so a second pass is silent.
    assert_eq!(s.events.dispatch_all().unwrap(), 0);
    assert_eq!(s.events.len(), 3);
}

#[test]
fn several_requests_share_one_composite() {
    let s = setup();
    for kind in [EventKind::SingleStep, EventKind::Breakpoint, EventKind::MethodEntry] {
        let request = s.events.new_event(kind, SuspendPolicy::All);
        s.events.add(request);
    }

    assert_eq!(s.events.dispatch_all().unwrap(), 1);
    let sent = s.sink.take();
    let (policy, count, first) = composite(&sent[0]);
    assert_eq!((policy, count), (2, 3));
    assert_eq!(first, EventKind::SingleStep.as_u8());
}

#[test]
fn muted_kinds_never_deliver() {
    let s = setup();
    for kind in [
        EventKind::VmDeath,
        EventKind::ThreadDeath,
        EventKind::Exception,
        EventKind::ClassUnload,
    ] {
        let request = s.events.new_event(kind, SuspendPolicy::All);
        assert!(!request.triggered);
        s.events.add(request);
    }

    assert!(!s.events.check_for_events(&Checkpoint {
        opcode: 0,
        location: Default::default(),
    }));
    assert_eq!(s.events.dispatch_all().unwrap(), 0);
    assert!(s.sink.take().is_empty());
    assert!(!s.vm.is_suspended());
}

#[test]
fn held_events_wait_for_release() {
    let s = setup();
    let request = s.events.new_event(EventKind::Breakpoint, SuspendPolicy::None);
    s.events.add(request);

    s.events.hold_events(true);
    assert_eq!(s.events.dispatch_all().unwrap(), 0);
    s.events.hold_events(false);
    assert_eq!(s.events.dispatch_all().unwrap(), 1);
}

#[test]
fn remove_unlinks_only_the_named_request() {
    let s = setup();
    let ids: Vec<u32> = (0..3)
        .map(|_| {
            let request = s.events.new_event(EventKind::Breakpoint, SuspendPolicy::All);
            let id = request.request_id;
            s.events.add(request);
            id
        })
        .collect();

    assert!(s.events.remove(EventKind::Breakpoint, ids[2]));
    assert_eq!(s.events.len(), 2);
    assert!(s.events.get_by_request_id(ids[0]).is_some());
    assert!(s.events.get_by_request_id(ids[1]).is_some());

    assert!(!s.events.remove(EventKind::SingleStep, ids[0]));
    assert_eq!(s.events.len(), 2);
}

#[test]
fn class_prepare_carries_the_class_signature() {
    let s = setup();
    let main = s.classes.main_class().unwrap();
    let mut request = s.events.new_event(EventKind::ClassPrepare, SuspendPolicy::EventThread);
    request.modifiers.push(Modifier::ClassOnly { class_id: main.id });
    s.events.add(request);

    assert_eq!(s.events.dispatch_all().unwrap(), 1);
    let sent = s.sink.take();
    let signature = main.signature.as_bytes();
    let tail = &sent[0][sent[0].len() - signature.len() - 4..sent[0].len() - 4];
    assert_eq!(tail, signature);
}

#[test]
fn thread_start_replays_the_latest_request() {
    let s = setup();
    assert!(!s.events.dispatch_thread_start().unwrap());

    let request = s.events.new_event(EventKind::ThreadStart, SuspendPolicy::None);
    let id = request.request_id;
    s.events.add(request);

    assert!(s.events.dispatch_thread_start().unwrap());
    let sent = s.sink.take();
    assert_eq!(composite(&sent[0]), (0, 1, EventKind::ThreadStart.as_u8()));
    assert!(!s.events.get_by_request_id(id).unwrap().triggered);
}

#[test]
fn unresolved_class_prepare_is_skipped_in_its_round() {
    let s = setup();
    let mut missing = s.events.new_event(EventKind::ClassPrepare, SuspendPolicy::All);
    missing.modifiers.push(Modifier::ClassMatch {
        pattern: "no.such.Class".into(),
    });
    s.events.add(missing);
    let mut found = s.events.new_event(EventKind::ClassPrepare, SuspendPolicy::All);
    found.modifiers.push(Modifier::ClassMatch {
        pattern: "TestClass$*".into(),
    });
    let found_id = found.request_id;
    s.events.add(found);

    assert_eq!(s.events.dispatch_all().unwrap(), 1);
    let sent = s.sink.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(composite(&sent[0]), (2, 1, EventKind::ClassPrepare.as_u8()));
    assert_eq!(&sent[0][17..21], &found_id.to_be_bytes());
}
