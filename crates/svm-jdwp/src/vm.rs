//! The control surface the debug server needs from the running VM.

use std::sync::{Condvar, Mutex};

use crate::poison::lock;
use crate::types::{FrameId, Location, ThreadGroupId, ThreadId};

pub const PROCESS_THREAD_NAME: &str = "SVM_Process";
pub const JDWP_THREAD_NAME: &str = "JDWP_Thread";
pub const APP_THREAD_NAME: &str = "APP_Thread";
pub const MAIN_THREAD_GROUP_NAME: &str = "Main_ThreadGroup";
pub const SUB_THREAD_GROUP_NAME: &str = "Sub_ThreadGroup";

/// Operations the event engine and command handlers invoke on the VM.
///
/// Implementations are shared between the VM execution thread and the network
/// receive loop, so every method takes `&self`.
pub trait VmControl: Send + Sync {
    fn suspend(&self);
    fn resume(&self);
    fn is_suspended(&self) -> bool;
    fn suspend_count(&self) -> u32;

    fn process_thread_id(&self) -> ThreadId;
    fn jdwp_thread_id(&self) -> ThreadId;
    fn app_thread_id(&self) -> ThreadId;

    fn frame_count(&self) -> u32;
    fn frames(&self) -> Vec<Frame>;
    fn current_location(&self) -> Option<Location>;

    /// Terminate the application with `code` (VirtualMachine.Exit).
    fn exit(&self, code: i32);
    /// Drop the debugger connection and let the VM run free (VirtualMachine.Dispose).
    fn dispose(&self);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub frame_id: FrameId,
    pub location: Location,
}

/// Thread and thread-group identities reported to the debugger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmThreads {
    pub process: ThreadId,
    pub jdwp: ThreadId,
    pub app: ThreadId,
    pub main_group: ThreadGroupId,
    pub sub_group: ThreadGroupId,
}

impl Default for VmThreads {
    fn default() -> Self {
        Self {
            process: 0x1001,
            jdwp: 0x1002,
            app: 0x1003,
            main_group: 0x2001,
            sub_group: 0x2002,
        }
    }
}

impl VmThreads {
    pub fn from_config(config: &svm_config::VmConfig) -> Self {
        Self {
            process: config.process_thread_id,
            jdwp: config.jdwp_thread_id,
            app: config.app_thread_id,
            main_group: config.main_thread_group_id,
            sub_group: config.sub_thread_group_id,
        }
    }

    pub fn thread_name(&self, thread: ThreadId) -> Option<&'static str> {
        if thread == self.process {
            Some(PROCESS_THREAD_NAME)
        } else if thread == self.jdwp {
            Some(JDWP_THREAD_NAME)
        } else if thread == self.app {
            Some(APP_THREAD_NAME)
        } else {
            None
        }
    }

    pub fn group_name(&self, group: ThreadGroupId) -> Option<&'static str> {
        if group == self.main_group {
            Some(MAIN_THREAD_GROUP_NAME)
        } else if group == self.sub_group {
            Some(SUB_THREAD_GROUP_NAME)
        } else {
            None
        }
    }

    /// The app thread lives in the sub group; everything else in the main group.
    pub fn group_of(&self, thread: ThreadId) -> Option<ThreadGroupId> {
        if thread == self.app {
            Some(self.sub_group)
        } else if thread == self.process || thread == self.jdwp {
            Some(self.main_group)
        } else {
            None
        }
    }

    pub fn children(&self, group: ThreadGroupId) -> Option<Vec<ThreadId>> {
        if group == self.main_group {
            Some(vec![self.process, self.jdwp])
        } else if group == self.sub_group {
            Some(vec![self.app])
        } else {
            None
        }
    }

    pub fn all(&self) -> [ThreadId; 3] {
        [self.process, self.jdwp, self.app]
    }
}

/// Strings reported by VirtualMachine.Version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmInfo {
    pub description: String,
    pub jdwp_major: u32,
    pub jdwp_minor: u32,
    pub version: String,
    pub name: String,
}

impl Default for VmInfo {
    fn default() -> Self {
        Self::from_config(&svm_config::VmConfig::default())
    }
}

impl VmInfo {
    pub fn from_config(config: &svm_config::VmConfig) -> Self {
        Self {
            description: config.description.clone(),
            jdwp_major: config.jdwp_major,
            jdwp_minor: config.jdwp_minor,
            version: config.version.clone(),
            name: config.name.clone(),
        }
    }
}

/// Why the debugger asked the VM to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitRequest {
    Exit(i32),
    Dispose,
}

#[derive(Debug, Default)]
struct Inner {
    suspend_count: u32,
    frames: Vec<Frame>,
    location: Option<Location>,
    exit: Option<ExitRequest>,
}

/// In-process [`VmControl`] backed by a mutex and a condition variable.
///
/// Suspension is counted: every `suspend` needs a matching `resume` before the
/// execution thread parked in [`VmState::wait_while_suspended`] runs again.
#[derive(Debug)]
pub struct VmState {
    threads: VmThreads,
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Default for VmState {
    fn default() -> Self {
        Self::new(VmThreads::default())
    }
}

impl VmState {
    pub fn new(threads: VmThreads) -> Self {
        Self {
            threads,
            inner: Mutex::new(Inner::default()),
            changed: Condvar::new(),
        }
    }

    pub fn threads(&self) -> VmThreads {
        self.threads
    }

    /// Publish the call stack of the app thread. The top frame's location becomes
    /// the current location.
    pub fn set_frames(&self, frames: Vec<Frame>) {
        let mut inner = lock(&self.inner, "VmState::set_frames");
        inner.location = frames.first().map(|frame| frame.location);
        inner.frames = frames;
    }

    pub fn set_location(&self, location: Location) {
        lock(&self.inner, "VmState::set_location").location = Some(location);
    }

    /// Block the calling thread until the suspend count drops to zero or an exit
    /// is requested. There is no timeout.
    pub fn wait_while_suspended(&self) -> Option<ExitRequest> {
        let mut inner = lock(&self.inner, "VmState::wait_while_suspended");
        while inner.suspend_count > 0 && inner.exit.is_none() {
            inner = match self.changed.wait(inner) {
                Ok(guard) => guard,
                Err(err) => {
                    tracing::error!(target: "svm.jdwp", error = %err, "vm state poisoned while suspended");
                    panic!("VmState::wait_while_suspended: mutex poisoned");
                }
            };
        }
        inner.exit
    }

    pub fn exit_requested(&self) -> Option<ExitRequest> {
        lock(&self.inner, "VmState::exit_requested").exit
    }

    fn request_exit(&self, request: ExitRequest) {
        let mut inner = lock(&self.inner, "VmState::request_exit");
        if inner.exit.is_none() {
            inner.exit = Some(request);
        }
        self.changed.notify_all();
    }
}

impl VmControl for VmState {
    fn suspend(&self) {
        let mut inner = lock(&self.inner, "VmState::suspend");
        inner.suspend_count = inner.suspend_count.saturating_add(1);
        tracing::debug!(target: "svm.jdwp", suspend_count = inner.suspend_count, "vm suspended");
    }

    fn resume(&self) {
        let mut inner = lock(&self.inner, "VmState::resume");
        inner.suspend_count = inner.suspend_count.saturating_sub(1);
        tracing::debug!(target: "svm.jdwp", suspend_count = inner.suspend_count, "vm resumed");
        if inner.suspend_count == 0 {
            self.changed.notify_all();
        }
    }

    fn is_suspended(&self) -> bool {
        lock(&self.inner, "VmState::is_suspended").suspend_count > 0
    }

    fn suspend_count(&self) -> u32 {
        lock(&self.inner, "VmState::suspend_count").suspend_count
    }

    fn process_thread_id(&self) -> ThreadId {
        self.threads.process
    }

    fn jdwp_thread_id(&self) -> ThreadId {
        self.threads.jdwp
    }

    fn app_thread_id(&self) -> ThreadId {
        self.threads.app
    }

    fn frame_count(&self) -> u32 {
        lock(&self.inner, "VmState::frame_count").frames.len() as u32
    }

    fn frames(&self) -> Vec<Frame> {
        lock(&self.inner, "VmState::frames").frames.clone()
    }

    fn current_location(&self) -> Option<Location> {
        lock(&self.inner, "VmState::current_location").location
    }

    fn exit(&self, code: i32) {
        tracing::info!(target: "svm.jdwp", code, "debugger requested vm exit");
        self.request_exit(ExitRequest::Exit(code));
    }

    fn dispose(&self) {
        tracing::info!(target: "svm.jdwp", "debugger disposed the vm mirror");
        self.request_exit(ExitRequest::Dispose);
    }
}
