use crate::classes::MethodInfo;
use crate::codec::Packet;
use crate::error::{CommandError, ErrorCode};

use super::{CommandResult, DebugContext};

fn read_method<'a>(ctx: &'a DebugContext, p: &mut Packet) -> Result<&'a MethodInfo, CommandError> {
    let class_id = p.read_reference_type_id()?;
    let method_id = p.read_method_id()?;
    let class = ctx
        .classes
        .find_by_id(class_id)
        .ok_or(CommandError::Reply(ErrorCode::INVALID_CLASS))?;
    class.method(method_id).ok_or_else(|| {
        tracing::debug!(
            target: "svm.jdwp",
            reference_type_id = class_id,
            method_id,
            "unknown method"
        );
        CommandError::Reply(ErrorCode::INVALID_METHODID)
    })
}

pub(super) fn handle(ctx: &DebugContext, command: u8, id: u32, p: &mut Packet) -> CommandResult {
    match command {
        // Method.LineTable
        1 => {
            let table = &read_method(ctx, p)?.line_table;
            let mut reply = ctx.reply(id, 8 + 8 + 4 + table.lines.len() * (8 + 4));
            reply.write_u64(table.start);
            reply.write_u64(table.end);
            reply.write_u32(table.lines.len() as u32);
            for &(index, line) in &table.lines {
                reply.write_u64(index);
                reply.write_u32(line);
            }
            Ok(Some(reply))
        }
        // Method.IsObsolete
        4 => {
            read_method(ctx, p)?;
            let mut reply = ctx.reply(id, 1);
            reply.write_bool(false);
            Ok(Some(reply))
        }
        _ => Err(ErrorCode::NOT_IMPLEMENTED.into()),
    }
}
