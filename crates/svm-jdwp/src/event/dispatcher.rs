use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::classes::{ClassRegistry, JAVA_LANG_ERROR};
use crate::codec::{Packet, PacketFactory, PacketList};
use crate::error::Result;
use crate::poison::lock;
use crate::types::{ReferenceTypeId, COMMAND_EVENT_COMPOSITE, COMMAND_SET_EVENT};
use crate::vm::VmControl;

use super::payload::serialize_event;
use super::{Checkpoint, EventKind, EventRequest, Modifier, SuspendPolicy};

/// Where finished outbound packets go.
///
/// Implementations must not block on the network: the VM execution thread
/// sends events through this while holding the VM halted.
pub trait PacketSink: Send + Sync {
    fn send(&self, packet: Packet) -> Result<()>;
}

#[derive(Debug, Default)]
struct Registry {
    /// Oldest first; scans walk from the back so the newest request is found first.
    requests: Vec<EventRequest>,
    thread_start: Option<EventRequest>,
}

impl Registry {
    fn position(&self, kind: EventKind, request_id: u32) -> Option<usize> {
        self.requests
            .iter()
            .rposition(|r| r.kind == kind && r.request_id == request_id)
    }

    fn remove(&mut self, kind: EventKind, request_id: u32) -> Option<EventRequest> {
        let idx = self.position(kind, request_id)?;
        let removed = self.requests.remove(idx);
        if self
            .thread_start
            .as_ref()
            .is_some_and(|cached| cached.request_id == removed.request_id)
        {
            self.thread_start = None;
        }
        Some(removed)
    }
}

/// Owns every armed event request and turns VM occurrences into composite
/// event packets.
///
/// A single non-reentrant lock guards the registry. It is held for scans and
/// mutations only; serialization and sending happen after it is released.
pub struct EventDispatcher {
    packets: Arc<PacketFactory>,
    classes: Arc<ClassRegistry>,
    vm: Arc<dyn VmControl>,
    sink: Arc<dyn PacketSink>,
    registry: Mutex<Registry>,
    next_request_id: AtomicU32,
    hold: AtomicBool,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registry", &self.registry)
            .field("next_request_id", &self.next_request_id)
            .field("hold", &self.hold)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new(
        packets: Arc<PacketFactory>,
        classes: Arc<ClassRegistry>,
        vm: Arc<dyn VmControl>,
        sink: Arc<dyn PacketSink>,
    ) -> Self {
        Self {
            packets,
            classes,
            vm,
            sink,
            registry: Mutex::new(Registry::default()),
            next_request_id: AtomicU32::new(1),
            hold: AtomicBool::new(false),
        }
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Allocate a request with the next id. Kinds that never occur in this
    /// runtime start untriggered.
    pub fn new_event(&self, kind: EventKind, suspend_policy: SuspendPolicy) -> EventRequest {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        EventRequest {
            request_id,
            kind,
            suspend_policy,
            triggered: !kind.is_muted(),
            removed: false,
            modifiers: Vec::new(),
        }
    }

    pub fn add(&self, request: EventRequest) {
        let mut registry = lock(&self.registry, "EventDispatcher::add");
        if request.kind == EventKind::ThreadStart {
            registry.thread_start = Some(request.clone());
        }
        tracing::debug!(
            target: "svm.jdwp",
            request_id = request.request_id,
            event_kind = %request.kind,
            policy = request.suspend_policy.as_u8(),
            "event request registered"
        );
        registry.requests.push(request);

        tracing::trace!(target: "svm.jdwp", size = registry.requests.len(), "event registry");
        for r in registry.requests.iter().rev() {
            tracing::trace!(
                target: "svm.jdwp",
                request_id = r.request_id,
                event_kind = %r.kind,
                triggered = r.triggered,
                removed = r.removed,
                "  registered request"
            );
        }
    }

    /// Unlink the newest request matching `kind` and `request_id`.
    pub fn remove(&self, kind: EventKind, request_id: u32) -> bool {
        let removed = lock(&self.registry, "EventDispatcher::remove").remove(kind, request_id);
        tracing::debug!(
            target: "svm.jdwp",
            request_id,
            event_kind = %kind,
            found = removed.is_some(),
            "event request cleared"
        );
        removed.is_some()
    }

    pub fn remove_all_event_kind(&self, kind: EventKind) -> usize {
        let mut registry = lock(&self.registry, "EventDispatcher::remove_all_event_kind");
        let mut removed = 0;
        while let Some(request_id) = registry
            .requests
            .iter()
            .rev()
            .find(|r| r.kind == kind)
            .map(|r| r.request_id)
        {
            registry.remove(kind, request_id);
            removed += 1;
        }
        tracing::debug!(target: "svm.jdwp", event_kind = %kind, removed, "event requests cleared by kind");
        removed
    }

    pub fn get_by_request_id(&self, request_id: u32) -> Option<EventRequest> {
        lock(&self.registry, "EventDispatcher::get_by_request_id")
            .requests
            .iter()
            .rev()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.registry, "EventDispatcher::len").requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hold_events(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
        tracing::debug!(target: "svm.jdwp", hold, "event delivery hold changed");
    }

    pub fn can_dispatch_all(&self) -> bool {
        !self.hold.load(Ordering::SeqCst)
    }

    /// Called at every VM checkpoint. Any pending event halts the VM, whatever
    /// its kind or modifiers; delivery is left to [`EventDispatcher::dispatch_all`].
    pub fn check_for_events(&self, checkpoint: &Checkpoint) -> bool {
        let pending = lock(&self.registry, "EventDispatcher::check_for_events")
            .requests
            .iter()
            .any(|r| !r.removed && r.triggered);
        if pending {
            tracing::trace!(
                target: "svm.jdwp",
                opcode = checkpoint.opcode,
                index = checkpoint.location.index,
                "pending event; suspending vm"
            );
            self.vm.suspend();
        }
        pending
    }

    /// Deliver one event immediately, outside the registry. Returns `false` when
    /// the event kind produced no payload.
    pub fn dispatch(&self, request: &EventRequest) -> Result<bool> {
        if request.suspend_policy != SuspendPolicy::None {
            self.vm.suspend();
        }

        let payload = serialize_event(request, &self.packets, &self.classes, self.vm.as_ref());
        if payload.position() == 0 {
            tracing::warn!(
                target: "svm.jdwp",
                request_id = request.request_id,
                event_kind = %request.kind,
                "event produced no payload; nothing sent"
            );
            return Ok(false);
        }

        tracing::debug!(
            target: "svm.jdwp",
            request_id = request.request_id,
            event_kind = %request.kind,
            policy = request.suspend_policy.as_u8(),
            "dispatching single event"
        );
        let mut cmd = self.composite(request.suspend_policy, 1, payload.position());
        cmd.write_packet(&payload);
        self.sink.send(cmd)?;
        Ok(true)
    }

    /// Deliver every pending request, one composite packet per suspend policy.
    ///
    /// Delivered requests are tombstoned. Returns the number of composite packets
    /// sent; nothing is sent while events are held.
    pub fn dispatch_all(&self) -> Result<usize> {
        if !self.can_dispatch_all() {
            tracing::trace!(target: "svm.jdwp", "events held; skipping delivery pass");
            return Ok(0);
        }

        let batches: Vec<(SuspendPolicy, Vec<EventRequest>)> = {
            let mut registry = lock(&self.registry, "EventDispatcher::dispatch_all");
            SuspendPolicy::DELIVERY_ORDER
                .iter()
                .map(|&policy| {
                    let mut selected = Vec::new();
                    for request in registry.requests.iter_mut().rev() {
                        if !request.removed && request.triggered && request.suspend_policy == policy {
                            selected.push(request.clone());
                            request.tombstone();
                        }
                    }
                    (policy, selected)
                })
                .collect()
        };

        let mut sent = 0;
        for (policy, requests) in batches {
            let mut list = PacketList::new();
            for request in &requests {
                let payload = serialize_event(request, &self.packets, &self.classes, self.vm.as_ref());
                if payload.position() == 0 {
                    tracing::debug!(
                        target: "svm.jdwp",
                        request_id = request.request_id,
                        event_kind = %request.kind,
                        "event skipped in composite"
                    );
                    continue;
                }
                list.push(payload);
            }
            if list.is_empty() {
                continue;
            }

            let mut cmd = self.composite(policy, list.len() as u32, list.byte_size());
            cmd.write_list(&list);
            tracing::debug!(
                target: "svm.jdwp",
                policy = policy.as_u8(),
                events = list.len(),
                bytes = cmd.position(),
                "dispatching composite"
            );
            self.sink.send(cmd)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Announce VM start. Sent once, right after the handshake.
    pub fn dispatch_vm_init(&self) -> Result<bool> {
        self.dispatch(&EventRequest::synthetic(EventKind::VmStart, SuspendPolicy::None))
    }

    /// Replay the most recently registered THREAD_START request.
    pub fn dispatch_thread_start(&self) -> Result<bool> {
        let request = {
            let mut registry = lock(&self.registry, "EventDispatcher::dispatch_thread_start");
            let Some(mut cached) = registry.thread_start.clone() else {
                return Ok(false);
            };
            cached.triggered = false;
            if let Some(live) = registry
                .requests
                .iter_mut()
                .rev()
                .find(|r| r.request_id == cached.request_id)
            {
                live.triggered = false;
            }
            registry.thread_start = Some(cached.clone());
            cached
        };
        self.dispatch(&request)
    }

    /// Report an uncaught exception of type `exception_class`, suspending all
    /// threads.
    pub fn dispatch_exception(&self, exception_class: ReferenceTypeId) -> Result<bool> {
        let mut request = EventRequest::synthetic(EventKind::Exception, SuspendPolicy::All);
        request.modifiers.push(Modifier::ExceptionOnly {
            exception_or_null: exception_class,
            caught: false,
            uncaught: true,
        });
        self.dispatch(&request)
    }

    /// Report a fatal runtime fault (stack overflow, null dereference) as an
    /// uncaught `java.lang.Error`.
    pub fn dispatch_runtime_error(&self, opcode: u8) -> Result<bool> {
        let class = self.classes.find_by_name(JAVA_LANG_ERROR).map_or(0, |c| c.id);
        tracing::warn!(target: "svm.jdwp", opcode, "runtime fault reported to debugger");
        self.dispatch_exception(class)
    }

    fn composite(&self, policy: SuspendPolicy, count: u32, body: usize) -> Packet {
        let mut cmd = self
            .packets
            .command(COMMAND_SET_EVENT, COMMAND_EVENT_COMPOSITE, 1 + 4 + body);
        cmd.write_u8(policy.as_u8());
        cmd.write_u32(count);
        cmd
    }
}
