use crate::classes::RefType;
use crate::codec::{str_size, Packet, PacketList};
use crate::error::{CommandError, ErrorCode};

use super::{CommandResult, DebugContext};

fn read_class<'a>(ctx: &'a DebugContext, p: &mut Packet, missing: ErrorCode) -> Result<&'a RefType, CommandError> {
    let id = p.read_reference_type_id()?;
    ctx.classes.find_by_id(id).ok_or_else(|| {
        tracing::debug!(target: "svm.jdwp", reference_type_id = id, "unknown reference type");
        CommandError::from(missing)
    })
}

pub(super) fn handle(ctx: &DebugContext, command: u8, id: u32, p: &mut Packet) -> CommandResult {
    // ClassObject names the object rather than the type.
    let missing = if command == 11 {
        ErrorCode::INVALID_OBJECT
    } else {
        ErrorCode::INVALID_CLASS
    };

    match command {
        // ReferenceType.Signature
        1 => {
            let class = read_class(ctx, p, missing)?;
            let mut reply = ctx.reply(id, str_size(&class.signature));
            reply.write_str(&class.signature);
            Ok(Some(reply))
        }
        // ReferenceType.Modifiers
        3 => {
            let class = read_class(ctx, p, missing)?;
            let mut reply = ctx.reply(id, 4);
            reply.write_u32(class.modifiers);
            Ok(Some(reply))
        }
        // ReferenceType.Fields
        4 => {
            let class = read_class(ctx, p, missing)?;
            Ok(Some(counted(ctx, id, ctx.classes.fields_to_list(&ctx.packets, class, false))))
        }
        // ReferenceType.Methods
        5 => {
            let class = read_class(ctx, p, missing)?;
            Ok(Some(counted(ctx, id, ctx.classes.methods_to_list(&ctx.packets, class, false))))
        }
        // ReferenceType.SourceFile
        7 => {
            let class = read_class(ctx, p, missing)?;
            let source = class
                .source_file
                .as_deref()
                .ok_or(CommandError::Reply(ErrorCode::ABSENT_INFORMATION))?;
            let mut reply = ctx.reply(id, str_size(source));
            reply.write_str(source);
            Ok(Some(reply))
        }
        // ReferenceType.NestedTypes
        8 => {
            read_class(ctx, p, missing)?;
            let mut reply = ctx.reply(id, 4);
            reply.write_u32(0);
            Ok(Some(reply))
        }
        // ReferenceType.Status
        9 => {
            let class = read_class(ctx, p, missing)?;
            let mut reply = ctx.reply(id, 4);
            reply.write_u32(class.status);
            Ok(Some(reply))
        }
        // ReferenceType.Interfaces
        10 => {
            let class = read_class(ctx, p, missing)?;
            let mut reply = ctx.reply(
                id,
                4 + class.interfaces.len() * ctx.packets.id_sizes().reference_type_id,
            );
            reply.write_u32(class.interfaces.len() as u32);
            for interface in &class.interfaces {
                reply.write_reference_type_id(*interface);
            }
            Ok(Some(reply))
        }
        // ReferenceType.ClassObject
        11 => {
            let class = read_class(ctx, p, missing)?;
            let mut reply = ctx.reply(id, ctx.packets.id_sizes().object_id);
            reply.write_object_id(class.id);
            Ok(Some(reply))
        }
        // ReferenceType.SignatureWithGeneric
        13 => {
            let class = read_class(ctx, p, missing)?;
            let mut reply = ctx.reply(id, str_size(&class.signature) + str_size(""));
            reply.write_str(&class.signature);
            reply.write_str("");
            Ok(Some(reply))
        }
        // ReferenceType.FieldsWithGeneric
        14 => {
            let class = read_class(ctx, p, missing)?;
            Ok(Some(counted(ctx, id, ctx.classes.fields_to_list(&ctx.packets, class, true))))
        }
        // ReferenceType.MethodsWithGeneric
        15 => {
            let class = read_class(ctx, p, missing)?;
            Ok(Some(counted(ctx, id, ctx.classes.methods_to_list(&ctx.packets, class, true))))
        }
        // ReferenceType.ClassFileVersion
        17 => {
            read_class(ctx, p, missing)?;
            let mut reply = ctx.reply(id, 8);
            reply.write_u32(ctx.vm_info.jdwp_major);
            reply.write_u32(ctx.vm_info.jdwp_minor);
            Ok(Some(reply))
        }
        _ => Err(ErrorCode::NOT_IMPLEMENTED.into()),
    }
}

pub(super) fn handle_class_type(ctx: &DebugContext, command: u8, id: u32, p: &mut Packet) -> CommandResult {
    match command {
        // ClassType.Superclass
        1 => {
            let class = read_class(ctx, p, ErrorCode::INVALID_CLASS)?;
            let mut reply = ctx.reply(id, ctx.packets.id_sizes().reference_type_id);
            reply.write_reference_type_id(class.superclass.unwrap_or(0));
            Ok(Some(reply))
        }
        _ => Err(ErrorCode::NOT_IMPLEMENTED.into()),
    }
}

fn counted(ctx: &DebugContext, id: u32, list: PacketList) -> Packet {
    let mut reply = ctx.reply(id, 4 + list.byte_size());
    reply.write_u32(list.len() as u32);
    reply.write_list(&list);
    reply
}
