use crate::codec::{str_size, Packet};
use crate::error::{CommandError, ErrorCode};
use crate::types::{ThreadGroupId, ThreadId, SUSPEND_STATUS_SUSPENDED, THREAD_STATUS_RUNNING, THREAD_STATUS_SLEEPING};
use crate::vm::Frame;

use super::{CommandResult, DebugContext};

fn read_thread(ctx: &DebugContext, p: &mut Packet) -> Result<(ThreadId, &'static str), CommandError> {
    let thread = p.read_thread_id()?;
    match ctx.threads.thread_name(thread) {
        Some(name) => Ok((thread, name)),
        None => {
            tracing::debug!(target: "svm.jdwp", thread_id = thread, "unknown thread");
            Err(ErrorCode::INVALID_THREAD.into())
        }
    }
}

fn read_group(ctx: &DebugContext, p: &mut Packet) -> Result<(ThreadGroupId, &'static str), CommandError> {
    let group = p.read_thread_group_id()?;
    match ctx.threads.group_name(group) {
        Some(name) => Ok((group, name)),
        None => {
            tracing::debug!(target: "svm.jdwp", thread_group_id = group, "unknown thread group");
            Err(ErrorCode::INVALID_THREAD_GROUP.into())
        }
    }
}

/// Only the application thread has a Java-level call stack.
fn frames_of(ctx: &DebugContext, thread: ThreadId) -> Vec<Frame> {
    if thread == ctx.threads.app {
        ctx.vm.frames()
    } else {
        Vec::new()
    }
}

pub(super) fn handle(ctx: &DebugContext, command: u8, id: u32, p: &mut Packet) -> CommandResult {
    match command {
        // ThreadReference.Name
        1 => {
            let (_, name) = read_thread(ctx, p)?;
            let mut reply = ctx.reply(id, str_size(name));
            reply.write_str(name);
            Ok(Some(reply))
        }
        // ThreadReference.Suspend
        2 => {
            let (thread, _) = read_thread(ctx, p)?;
            if thread != ctx.threads.app {
                return Err(ErrorCode::INVALID_THREAD.into());
            }
            ctx.send_now(ctx.reply(id, 0))?;
            ctx.vm.suspend();
            Ok(None)
        }
        // ThreadReference.Resume
        3 => {
            let (thread, _) = read_thread(ctx, p)?;
            if thread != ctx.threads.app {
                return Err(ErrorCode::INVALID_THREAD.into());
            }
            if ctx.vm.suspend_count() <= 1 {
                ctx.events.dispatch_thread_start()?;
            }
            ctx.vm.resume();
            Ok(Some(ctx.reply(id, 0)))
        }
        // ThreadReference.Status
        4 => {
            read_thread(ctx, p)?;
            let mut reply = ctx.reply(id, 8);
            if ctx.vm.is_suspended() {
                reply.write_u32(THREAD_STATUS_SLEEPING);
                reply.write_u32(SUSPEND_STATUS_SUSPENDED);
            } else {
                reply.write_u32(THREAD_STATUS_RUNNING);
                reply.write_u32(0);
            }
            Ok(Some(reply))
        }
        // ThreadReference.ThreadGroup
        5 => {
            let (thread, _) = read_thread(ctx, p)?;
            let group = ctx
                .threads
                .group_of(thread)
                .ok_or(CommandError::Reply(ErrorCode::INVALID_THREAD))?;
            let mut reply = ctx.reply(id, ctx.packets.id_sizes().object_id);
            reply.write_thread_group_id(group);
            Ok(Some(reply))
        }
        // ThreadReference.Frames
        6 => {
            let (thread, _) = read_thread(ctx, p)?;
            let start = p.read_i32()?;
            let length = p.read_i32()?;
            let frames = frames_of(ctx, thread);
            let selected = select_frames(&frames, start, length).ok_or_else(|| {
                tracing::debug!(
                    target: "svm.jdwp",
                    start,
                    length,
                    frame_count = frames.len(),
                    "frame range out of bounds"
                );
                CommandError::Reply(ErrorCode::ILLEGAL_ARGUMENT)
            })?;

            let sizes = ctx.packets.id_sizes();
            let mut reply = ctx.reply(id, 4 + selected.len() * (sizes.frame_id + sizes.location()));
            reply.write_u32(selected.len() as u32);
            for frame in selected {
                reply.write_frame_id(frame.frame_id);
                reply.write_location(&frame.location);
            }
            Ok(Some(reply))
        }
        // ThreadReference.FrameCount
        7 => {
            let (thread, _) = read_thread(ctx, p)?;
            let count = if thread == ctx.threads.app {
                ctx.vm.frame_count()
            } else {
                0
            };
            let mut reply = ctx.reply(id, 4);
            reply.write_u32(count);
            Ok(Some(reply))
        }
        // ThreadReference.SuspendCount
        12 => {
            let (thread, _) = read_thread(ctx, p)?;
            let count = if thread == ctx.threads.app && ctx.vm.is_suspended() {
                ctx.vm.suspend_count()
            } else {
                0
            };
            let mut reply = ctx.reply(id, 4);
            reply.write_u32(count);
            Ok(Some(reply))
        }
        _ => Err(ErrorCode::NOT_IMPLEMENTED.into()),
    }
}

/// `length == -1` selects every frame from `start` on.
fn select_frames(frames: &[Frame], start: i32, length: i32) -> Option<&[Frame]> {
    let start = usize::try_from(start).ok()?;
    if start > frames.len() {
        return None;
    }
    let end = match length {
        -1 => frames.len(),
        n => start.checked_add(usize::try_from(n).ok()?)?,
    };
    frames.get(start..end)
}

pub(super) fn handle_group(ctx: &DebugContext, command: u8, id: u32, p: &mut Packet) -> CommandResult {
    match command {
        // ThreadGroupReference.Name
        1 => {
            let (_, name) = read_group(ctx, p)?;
            let mut reply = ctx.reply(id, str_size(name));
            reply.write_str(name);
            Ok(Some(reply))
        }
        // ThreadGroupReference.Parent: both groups are top-level.
        2 => {
            read_group(ctx, p)?;
            let mut reply = ctx.reply(id, ctx.packets.id_sizes().object_id);
            reply.write_thread_group_id(0);
            Ok(Some(reply))
        }
        // ThreadGroupReference.Children
        3 => {
            let (group, _) = read_group(ctx, p)?;
            let threads = ctx.threads.children(group).unwrap_or_default();
            let mut reply = ctx.reply(id, 4 + threads.len() * ctx.packets.id_sizes().object_id + 4);
            reply.write_u32(threads.len() as u32);
            for thread in threads {
                reply.write_thread_id(thread);
            }
            reply.write_u32(0);
            Ok(Some(reply))
        }
        _ => Err(ErrorCode::NOT_IMPLEMENTED.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, SuspendPolicy};
    use crate::handlers::test_support::Harness;
    use crate::types::{
        Location, COMMAND_SET_EVENT, COMMAND_SET_THREAD_GROUP_REFERENCE as TGR,
        COMMAND_SET_THREAD_REFERENCE as TR,
    };
    use crate::vm::VmControl;

    const APP: u64 = 0x1003;
    const JDWP: u64 = 0x1002;

    fn frame(id: u64, index: u64) -> Frame {
        Frame {
            frame_id: id,
            location: Location {
                type_tag: 1,
                class_id: 3,
                method_id: 2,
                index,
            },
        }
    }

    #[test]
    fn names_and_unknown_threads() {
        let h = Harness::new();
        assert_eq!(h.call(TR, 1, |p| p.write_thread_id(APP)).read_str().unwrap(), "APP_Thread");
        assert_eq!(h.call(TR, 1, |p| p.write_thread_id(JDWP)).read_str().unwrap(), "JDWP_Thread");
        assert_eq!(
            h.call(TR, 1, |p| p.write_thread_id(0x4444)).error_code(),
            ErrorCode::INVALID_THREAD
        );
    }

    #[test]
    fn suspend_only_accepts_the_app_thread() {
        let h = Harness::new();
        assert_eq!(
            h.call(TR, 2, |p| p.write_thread_id(JDWP)).error_code(),
            ErrorCode::INVALID_THREAD
        );
        assert!(!h.vm.is_suspended());

        let reply = h.call(TR, 2, |p| p.write_thread_id(APP));
        assert_eq!(reply.error_code(), ErrorCode::NONE);
        assert_eq!(h.vm.suspend_count(), 1);

        let mut reply = h.call(TR, 12, |p| p.write_thread_id(APP));
        assert_eq!(reply.read_u32().unwrap(), 1);
        let mut reply = h.call(TR, 12, |p| p.write_thread_id(JDWP));
        assert_eq!(reply.read_u32().unwrap(), 0);
    }

    #[test]
    fn status_follows_vm_suspension() {
        let h = Harness::new();
        let mut reply = h.call(TR, 4, |p| p.write_thread_id(APP));
        assert_eq!(reply.read_u32().unwrap(), THREAD_STATUS_RUNNING);
        assert_eq!(reply.read_u32().unwrap(), 0);

        h.vm.suspend();
        let mut reply = h.call(TR, 4, |p| p.write_thread_id(APP));
        assert_eq!(reply.read_u32().unwrap(), THREAD_STATUS_SLEEPING);
        assert_eq!(reply.read_u32().unwrap(), SUSPEND_STATUS_SUSPENDED);
    }

    #[test]
    fn resume_replays_thread_start_before_the_reply() {
        let h = Harness::new();
        let request = h.ctx.events.new_event(EventKind::ThreadStart, SuspendPolicy::None);
        h.ctx.events.add(request);
        h.vm.suspend();

        let reply = h.call(TR, 3, |p| p.write_thread_id(APP));
        assert!(reply.is_reply());
        assert!(!h.vm.is_suspended());

        let sent = h.sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!((sent[0][9], sent[0][10]), (COMMAND_SET_EVENT, 100));
    }

    #[test]
    fn resume_only_accepts_the_app_thread() {
        let h = Harness::new();
        let request = h.ctx.events.new_event(EventKind::ThreadStart, SuspendPolicy::None);
        h.ctx.events.add(request);
        h.vm.suspend();

        for thread in [JDWP, 0x1001] {
            let reply = h.call(TR, 3, |p| p.write_thread_id(thread));
            assert_eq!(reply.error_code(), ErrorCode::INVALID_THREAD);
        }
        assert_eq!(h.vm.suspend_count(), 1);
        assert_eq!(h.sent(), 2, "only the two error replies");
    }

    #[test]
    fn thread_groups() {
        let h = Harness::new();
        assert_eq!(
            h.call(TR, 5, |p| p.write_thread_id(APP)).read_thread_group_id().unwrap(),
            0x2002
        );
        assert_eq!(
            h.call(TR, 5, |p| p.write_thread_id(JDWP)).read_thread_group_id().unwrap(),
            0x2001
        );

        assert_eq!(
            h.call(TGR, 1, |p| p.write_thread_group_id(0x2001)).read_str().unwrap(),
            "Main_ThreadGroup"
        );
        assert_eq!(
            h.call(TGR, 2, |p| p.write_thread_group_id(0x2002)).read_thread_group_id().unwrap(),
            0
        );

        let mut reply = h.call(TGR, 3, |p| p.write_thread_group_id(0x2001));
        assert_eq!(reply.read_u32().unwrap(), 2);
        assert_eq!(reply.read_thread_id().unwrap(), 0x1001);
        assert_eq!(reply.read_thread_id().unwrap(), 0x1002);
        assert_eq!(reply.read_u32().unwrap(), 0);
        assert_eq!(reply.remaining(), 0);

        assert_eq!(
            h.call(TGR, 3, |p| p.write_thread_group_id(7)).error_code(),
            ErrorCode::INVALID_THREAD_GROUP
        );
    }

    #[test]
    fn frames_honour_start_and_length() {
        let h = Harness::new();
        h.vm.set_frames(vec![frame(1, 4), frame(2, 0), frame(3, 2)]);

        let mut reply = h.call(TR, 7, |p| p.write_thread_id(APP));
        assert_eq!(reply.read_u32().unwrap(), 3);

        let mut reply = h.call(TR, 6, |p| {
            p.write_thread_id(APP);
            p.write_i32(1);
            p.write_i32(-1);
        });
        assert_eq!(reply.read_u32().unwrap(), 2);
        assert_eq!(reply.read_frame_id().unwrap(), 2);
        assert_eq!(reply.read_location().unwrap(), frame(2, 0).location);
        assert_eq!(reply.read_frame_id().unwrap(), 3);

        let reply = h.call(TR, 6, |p| {
            p.write_thread_id(APP);
            p.write_i32(2);
            p.write_i32(5);
        });
        assert_eq!(reply.error_code(), ErrorCode::ILLEGAL_ARGUMENT);
    }

    #[test]
    fn frame_selection_bounds() {
        let frames = [frame(1, 0), frame(2, 0)];
        assert_eq!(select_frames(&frames, 0, -1).unwrap().len(), 2);
        assert_eq!(select_frames(&frames, 2, -1).unwrap().len(), 0);
        assert_eq!(select_frames(&frames, 1, 1).unwrap().len(), 1);
        assert!(select_frames(&frames, 3, -1).is_none());
        assert!(select_frames(&frames, -1, 1).is_none());
        assert!(select_frames(&frames, 0, -2).is_none());
    }
}
