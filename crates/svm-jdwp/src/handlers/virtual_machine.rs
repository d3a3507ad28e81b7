use crate::codec::{str_size, Packet};
use crate::error::ErrorCode;

use super::{CommandResult, DebugContext};

const CAPABILITIES: usize = 7;
const CAPABILITIES_NEW: usize = 32;
const CAN_GET_SYNTHETIC_ATTRIBUTE: usize = 3;

pub(super) fn handle(ctx: &DebugContext, command: u8, id: u32, p: &mut Packet) -> CommandResult {
    match command {
        // VirtualMachine.Version
        1 => {
            let info = &ctx.vm_info;
            let mut reply = ctx.reply(
                id,
                str_size(&info.description) + 4 + 4 + str_size(&info.version) + str_size(&info.name),
            );
            reply.write_str(&info.description);
            reply.write_u32(info.jdwp_major);
            reply.write_u32(info.jdwp_minor);
            reply.write_str(&info.version);
            reply.write_str(&info.name);
            Ok(Some(reply))
        }
        // VirtualMachine.ClassesBySignature
        2 => {
            let signature = p.read_str()?;
            let sizes = ctx.packets.id_sizes();
            let mut reply = ctx.reply(id, 4 + 1 + sizes.reference_type_id + 4);
            match ctx.classes.find_by_signature(&signature) {
                Some(class) => {
                    reply.write_u32(1);
                    reply.write_tag(class.type_tag);
                    reply.write_reference_type_id(class.id);
                    reply.write_u32(class.status);
                }
                None => {
                    tracing::debug!(target: "svm.jdwp", signature = %signature, "no class with signature");
                    reply.write_u32(0);
                }
            }
            Ok(Some(reply))
        }
        // VirtualMachine.AllClasses
        3 => Ok(Some(all_classes(ctx, id, false))),
        // VirtualMachine.AllThreads
        4 => {
            let threads = ctx.threads.all();
            let mut reply = ctx.reply(id, 4 + threads.len() * ctx.packets.id_sizes().object_id);
            reply.write_u32(threads.len() as u32);
            for thread in threads {
                reply.write_thread_id(thread);
            }
            Ok(Some(reply))
        }
        // VirtualMachine.TopLevelThreadGroups
        5 => {
            let mut reply = ctx.reply(id, 4 + 2 * ctx.packets.id_sizes().object_id);
            reply.write_u32(2);
            reply.write_thread_group_id(ctx.threads.main_group);
            reply.write_thread_group_id(ctx.threads.sub_group);
            Ok(Some(reply))
        }
        // VirtualMachine.Dispose
        6 => {
            ctx.send_now(ctx.reply(id, 0))?;
            ctx.vm.dispose();
            ctx.shutdown.cancel();
            Ok(None)
        }
        // VirtualMachine.IDSizes
        7 => {
            let sizes = ctx.packets.id_sizes();
            let mut reply = ctx.reply(id, 5 * 4);
            for size in [
                sizes.field_id,
                sizes.method_id,
                sizes.object_id,
                sizes.reference_type_id,
                sizes.frame_id,
            ] {
                reply.write_u32(size as u32);
            }
            Ok(Some(reply))
        }
        // VirtualMachine.Suspend
        8 => {
            ctx.vm.suspend();
            Ok(Some(ctx.reply(id, 0)))
        }
        // VirtualMachine.Resume
        9 => {
            ctx.send_now(ctx.reply(id, 0))?;
            ctx.vm.resume();
            Ok(None)
        }
        // VirtualMachine.Exit
        10 => {
            let code = p.read_i32()?;
            ctx.send_now(ctx.reply(id, 0))?;
            ctx.vm.exit(code);
            ctx.shutdown.cancel();
            Ok(None)
        }
        // VirtualMachine.Capabilities
        12 => Ok(Some(capabilities(ctx, id, CAPABILITIES))),
        // VirtualMachine.DisposeObjects
        14 => Ok(Some(ctx.reply(id, 0))),
        // VirtualMachine.HoldEvents
        15 => {
            ctx.events.hold_events(true);
            Ok(Some(ctx.reply(id, 0)))
        }
        // VirtualMachine.ReleaseEvents
        16 => {
            ctx.events.hold_events(false);
            Ok(Some(ctx.reply(id, 0)))
        }
        // VirtualMachine.CapabilitiesNew
        17 => Ok(Some(capabilities(ctx, id, CAPABILITIES_NEW))),
        // VirtualMachine.AllClassesWithGeneric
        20 => Ok(Some(all_classes(ctx, id, true))),
        // CreateString (11), ClassPaths (13) and everything else.
        _ => Err(ErrorCode::NOT_IMPLEMENTED.into()),
    }
}

fn all_classes(ctx: &DebugContext, id: u32, with_generic: bool) -> Packet {
    let list = ctx.classes.all_classes_to_list(&ctx.packets, with_generic);
    let mut reply = ctx.reply(id, 4 + list.byte_size());
    reply.write_u32(list.len() as u32);
    reply.write_list(&list);
    reply
}

fn capabilities(ctx: &DebugContext, id: u32, count: usize) -> Packet {
    let mut reply = ctx.reply(id, count);
    for index in 0..count {
        reply.write_bool(index == CAN_GET_SYNTHETIC_ATTRIBUTE);
    }
    reply
}
