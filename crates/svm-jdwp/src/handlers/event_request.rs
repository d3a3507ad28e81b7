use crate::codec::Packet;
use crate::error::ErrorCode;
use crate::event::{EventKind, EventRequest};

use super::{CommandResult, DebugContext};

pub(super) fn handle(ctx: &DebugContext, command: u8, id: u32, p: &mut Packet) -> CommandResult {
    match command {
        // EventRequest.Set
        1 => {
            let request = EventRequest::parse_set(p, &ctx.events)?;
            let request_id = request.request_id;
            if request.removed {
                tracing::debug!(
                    target: "svm.jdwp",
                    request_id,
                    event_kind = %request.kind,
                    "event request not registered"
                );
            } else {
                ctx.events.add(request);
            }

            let mut reply = ctx.reply(id, 4);
            reply.write_u32(request_id);
            Ok(Some(reply))
        }
        // EventRequest.Clear
        2 => {
            let kind = p.read_u8()?;
            let request_id = p.read_u32()?;
            match EventKind::from_u8(kind) {
                Some(kind) => {
                    ctx.events.remove(kind, request_id);
                }
                None => {
                    tracing::debug!(target: "svm.jdwp", event_kind = kind, request_id, "clear for unknown event kind");
                }
            }
            Ok(Some(ctx.reply(id, 0)))
        }
        // EventRequest.ClearAllBreakpoints
        3 => {
            ctx.events.remove_all_event_kind(EventKind::Breakpoint);
            Ok(Some(ctx.reply(id, 0)))
        }
        _ => Err(ErrorCode::NOT_IMPLEMENTED.into()),
    }
}
