//! Typed, validated views over intrinsic call sites.
//!
//! Arguments that must be compile-time constants (names, function
//! pointers, small integers) are decoded here; anything non-constant is a
//! fatal error naming the argument and the call.

use super::{get_intrinsic, Intrinsic};
use crate::error::{CompileError, Result};
use crate::ir::{CastOp, Constant, DataLayout, Function, GlobalInit, Inst, Module, Type, ValueId};
use bitflags::bitflags;

bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct ChannelFlags: u32 {
        const READ = 1;
        const WRITE = 2;
    }
}

fn arg_error(f: &Function, call: ValueId, arg: usize, reason: &str) -> CompileError {
    CompileError::Argument {
        arg,
        call: f.call_target(call).unwrap_or("<not a call>").to_string(),
        reason: reason.to_string(),
    }
}

pub fn check_intrinsic_call(f: &Function, call: ValueId, arg_count: usize) -> Result<()> {
    let args = f
        .call_args(call)
        .ok_or_else(|| CompileError::setup(format!("{} is not a call", f.display_value(call))))?;
    if args.len() != arg_count {
        return Err(CompileError::ArgCount {
            name: f.call_target(call).unwrap_or("<unknown>").to_string(),
            actual: args.len(),
            expected: arg_count,
        });
    }
    Ok(())
}

pub fn get_arg(f: &Function, call: ValueId, arg: usize) -> ValueId {
    f.call_args(call).expect("not a call")[arg]
}

/// A constant unsigned integer argument, checked to fit in `num_bits`.
pub fn get_uint_arg(f: &Function, call: ValueId, arg: usize, num_bits: u32) -> Result<u64> {
    let value = f
        .const_int(get_arg(f, call, arg))
        .ok_or_else(|| arg_error(f, call, arg, "not a constant integer"))?;
    let v = value.as_unsigned();
    if num_bits < 64 && v >= (1u128 << num_bits) {
        return Err(arg_error(f, call, arg, "wider than the declared argument width"));
    }
    Ok(v as u64)
}

pub fn get_int_arg(f: &Function, call: ValueId, arg: usize, num_bits: u32) -> Result<i64> {
    let value = f
        .const_int(get_arg(f, call, arg))
        .ok_or_else(|| arg_error(f, call, arg, "not a constant integer"))?;
    Ok(value.sext(64.max(num_bits)).as_i64())
}

/// Resolve a string argument: walk bitcasts and constant GEPs to a constant
/// global holding NUL-terminated bytes.
pub fn get_string_arg(module: &Module, f: &Function, call: ValueId, arg: usize) -> Result<String> {
    let dl = DataLayout;
    let mut value = get_arg(f, call, arg);
    let mut offset: i64 = 0;
    loop {
        match f.value(value) {
            crate::ir::ValueDef::Inst(Inst::Cast { op: CastOp::Bitcast, arg: inner, .. }) => {
                value = *inner;
            }
            crate::ir::ValueDef::Inst(Inst::Gep { base, pointee, indices }) => {
                let mut index_values = Vec::with_capacity(indices.len());
                for idx in indices {
                    match f.const_int(*idx) {
                        Some(v) => index_values.push(v.as_i64()),
                        None => return Err(arg_error(f, call, arg, "not a constant")),
                    }
                }
                offset += gep_constant_offset(&dl, pointee, &index_values);
                value = *base;
            }
            _ => break,
        }
    }
    let global = match f.constant(value) {
        Some(Constant::Global(id)) => module.global(*id),
        _ => return Err(arg_error(f, call, arg, "not a global variable")),
    };
    if !global.constant {
        return Err(arg_error(f, call, arg, "not a constant"));
    }
    let bytes = match &global.init {
        Some(GlobalInit::Bytes(b)) => b,
        _ => return Err(arg_error(f, call, arg, "not an array")),
    };
    if offset < 0 || offset as usize >= bytes.len() {
        return Err(arg_error(f, call, arg, "out of bounds"));
    }
    let tail = &bytes[offset as usize..];
    let end = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| arg_error(f, call, arg, "not NUL terminated"))?;
    String::from_utf8(tail[..end].to_vec())
        .map_err(|_| arg_error(f, call, arg, "not a valid string"))
}

/// The byte offset of a GEP with all-constant indices.
pub fn gep_constant_offset(dl: &DataLayout, pointee: &Type, indices: &[i64]) -> i64 {
    let mut offset = 0i64;
    let mut ty = pointee.clone();
    for (i, idx) in indices.iter().enumerate() {
        if i == 0 {
            offset += dl.alloc_size(&ty) as i64 * idx;
            continue;
        }
        match ty {
            Type::Struct { fields } => {
                let layout = dl.struct_layout(&fields);
                offset += layout.offsets[*idx as usize] as i64;
                ty = fields[*idx as usize].clone();
            }
            Type::Array { elem, .. } => {
                offset += dl.alloc_size(&elem) as i64 * idx;
                ty = *elem;
            }
            _ => unreachable!("GEP index into scalar type"),
        }
    }
    offset
}

pub fn get_func_arg(f: &Function, call: ValueId, arg: usize) -> Result<String> {
    match f.constant(get_arg(f, call, arg)) {
        Some(Constant::FuncRef(name)) => Ok(name.clone()),
        _ => Err(arg_error(f, call, arg, "not a constant function pointer")),
    }
}

pub struct MallocArgs {
    pub size: ValueId,
}

impl MallocArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<MallocArgs> {
        check_intrinsic_call(f, call, 1)?;
        Ok(MallocArgs { size: get_arg(f, call, 0) })
    }
}

#[derive(Debug)]
pub struct ChannelCreateArgs {
    pub name: String,
    pub elem_size: ValueId,
    pub num_elem: ValueId,
}

impl ChannelCreateArgs {
    pub fn decode(module: &Module, f: &Function, call: ValueId) -> Result<ChannelCreateArgs> {
        check_intrinsic_call(f, call, 3)?;
        Ok(ChannelCreateArgs {
            name: get_string_arg(module, f, call, 0)?,
            elem_size: get_arg(f, call, 1),
            num_elem: get_arg(f, call, 2),
        })
    }
}

pub struct ChannelSetAttrArgs {
    pub channel: ValueId,
    pub attr_id: u32,
    pub attr_val: i32,
}

impl ChannelSetAttrArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<ChannelSetAttrArgs> {
        check_intrinsic_call(f, call, 3)?;
        Ok(ChannelSetAttrArgs {
            channel: get_arg(f, call, 0),
            attr_id: get_uint_arg(f, call, 1, 32)? as u32,
            attr_val: get_int_arg(f, call, 2, 32)? as i32,
        })
    }
}

pub struct ChannelExportArgs {
    pub channel: ValueId,
    pub export_type: u32,
    pub flags: ChannelFlags,
}

impl ChannelExportArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<ChannelExportArgs> {
        check_intrinsic_call(f, call, 3)?;
        let raw_flags = get_uint_arg(f, call, 2, 32)? as u32;
        let flags = ChannelFlags::from_bits(raw_flags).ok_or_else(|| {
            arg_error(f, call, 2, "not a valid combination of channel flags")
        })?;
        Ok(ChannelExportArgs {
            channel: get_arg(f, call, 0),
            export_type: get_uint_arg(f, call, 1, 32)? as u32,
            flags,
        })
    }
}

pub struct ChannelReadWriteArgs {
    pub context: ValueId,
    pub channel_id: u32,
    pub data: ValueId,
    pub data_size: u32,
}

impl ChannelReadWriteArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<ChannelReadWriteArgs> {
        check_intrinsic_call(f, call, 4)?;
        Ok(ChannelReadWriteArgs {
            context: get_arg(f, call, 0),
            channel_id: get_uint_arg(f, call, 1, 32)? as u32,
            data: get_arg(f, call, 2),
            data_size: get_uint_arg(f, call, 3, 32)? as u32,
        })
    }
}

pub struct ContextAddChannelArgs {
    pub context: ValueId,
    pub channel_id: ValueId,
    pub channel: ValueId,
    pub flags: ChannelFlags,
}

impl ContextAddChannelArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<ContextAddChannelArgs> {
        check_intrinsic_call(f, call, 4)?;
        let raw = get_uint_arg(f, call, 3, 32)? as u32;
        let flags = ChannelFlags::from_bits(raw).ok_or_else(|| {
            arg_error(f, call, 3, "not a supported flag combination")
        })?;
        Ok(ContextAddChannelArgs {
            context: get_arg(f, call, 0),
            channel_id: get_arg(f, call, 1),
            channel: get_arg(f, call, 2),
            flags,
        })
    }
}

pub struct ThreadCreateArgs {
    pub context: ValueId,
    pub name: String,
    pub func: String,
    pub info_area: ValueId,
    pub info_area_size: u32,
}

impl ThreadCreateArgs {
    pub fn decode(module: &Module, f: &Function, call: ValueId) -> Result<ThreadCreateArgs> {
        check_intrinsic_call(f, call, 5)?;
        let func = get_func_arg(f, call, 2)?;
        let target = module
            .function_by_name(&func)
            .ok_or_else(|| CompileError::MissingFunction(func.clone()))?;
        if target.params.len() != 2 {
            return Err(CompileError::BadFunctionSignature { kind: "thread", name: func });
        }
        Ok(ThreadCreateArgs {
            context: get_arg(f, call, 0),
            name: get_string_arg(module, f, call, 1)?,
            func,
            info_area: get_arg(f, call, 3),
            info_area_size: get_uint_arg(f, call, 4, 32)? as u32,
        })
    }
}

pub struct AddPlainPacketKernelArgs {
    pub name: String,
    pub func: String,
    pub bus_type: i32,
    pub is_capsule: bool,
}

impl AddPlainPacketKernelArgs {
    pub fn decode(module: &Module, f: &Function, call: ValueId) -> Result<AddPlainPacketKernelArgs> {
        check_intrinsic_call(f, call, 4)?;
        let func = get_func_arg(f, call, 1)?;
        let target = module
            .function_by_name(&func)
            .ok_or_else(|| CompileError::MissingFunction(func.clone()))?;
        if target.params.len() != 2 {
            return Err(CompileError::BadFunctionSignature { kind: "kernel", name: func });
        }
        if !target.ret_ty.is_integer() {
            return Err(CompileError::BadFunctionSignature { kind: "kernel", name: func });
        }
        Ok(AddPlainPacketKernelArgs {
            name: get_string_arg(module, f, call, 0)?,
            func,
            bus_type: get_int_arg(f, call, 2, 32)? as i32,
            is_capsule: get_int_arg(f, call, 3, 32)? != 0,
        })
    }
}

pub struct MapCreateArgs {
    pub id: u16,
    pub map_type: i32,
    pub key_sz: ValueId,
    pub value_sz: ValueId,
}

impl MapCreateArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<MapCreateArgs> {
        check_intrinsic_call(f, call, 4)?;
        Ok(MapCreateArgs {
            id: get_uint_arg(f, call, 0, 16)? as u16,
            map_type: get_int_arg(f, call, 1, 32)? as i32,
            key_sz: get_arg(f, call, 2),
            value_sz: get_arg(f, call, 3),
        })
    }
}

pub struct ContextAddMapArgs {
    pub context: ValueId,
    pub map: ValueId,
}

impl ContextAddMapArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<ContextAddMapArgs> {
        check_intrinsic_call(f, call, 2)?;
        Ok(ContextAddMapArgs { context: get_arg(f, call, 0), map: get_arg(f, call, 1) })
    }
}

pub struct MapOpArgs {
    pub context: ValueId,
    pub map_id: u16,
    pub op_type: ValueId,
    pub key: ValueId,
    pub key_length: ValueId,
    pub data_in: ValueId,
    pub data_out: ValueId,
    pub mask: ValueId,
    pub offset: ValueId,
    pub data_length: ValueId,
}

impl MapOpArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<MapOpArgs> {
        check_intrinsic_call(f, call, 10)?;
        Ok(MapOpArgs {
            context: get_arg(f, call, 0),
            map_id: get_uint_arg(f, call, 1, 16)? as u16,
            op_type: get_arg(f, call, 2),
            key: get_arg(f, call, 3),
            key_length: get_arg(f, call, 4),
            data_in: get_arg(f, call, 5),
            data_out: get_arg(f, call, 6),
            mask: get_arg(f, call, 7),
            offset: get_arg(f, call, 8),
            data_length: get_arg(f, call, 9),
        })
    }
}

pub struct PacketReadArgs {
    pub packet: ValueId,
    pub data_out: ValueId,
    pub offset: ValueId,
    pub length: ValueId,
}

impl PacketReadArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<PacketReadArgs> {
        check_intrinsic_call(f, call, 4)?;
        Ok(PacketReadArgs {
            packet: get_arg(f, call, 0),
            data_out: get_arg(f, call, 1),
            offset: get_arg(f, call, 2),
            length: get_arg(f, call, 3),
        })
    }
}

/// Covers both the plain and the masked write; `mask` is absent for the
/// plain form.
pub struct PacketWriteArgs {
    pub packet: ValueId,
    pub data_in: ValueId,
    pub mask: Option<ValueId>,
    pub offset: ValueId,
    pub length: ValueId,
}

impl PacketWriteArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<PacketWriteArgs> {
        match get_intrinsic(f, call) {
            Intrinsic::PacketWrite => {
                check_intrinsic_call(f, call, 4)?;
                Ok(PacketWriteArgs {
                    packet: get_arg(f, call, 0),
                    data_in: get_arg(f, call, 1),
                    mask: None,
                    offset: get_arg(f, call, 2),
                    length: get_arg(f, call, 3),
                })
            }
            Intrinsic::PacketWriteMasked => {
                check_intrinsic_call(f, call, 5)?;
                Ok(PacketWriteArgs {
                    packet: get_arg(f, call, 0),
                    data_in: get_arg(f, call, 1),
                    mask: Some(get_arg(f, call, 2)),
                    offset: get_arg(f, call, 3),
                    length: get_arg(f, call, 4),
                })
            }
            other => Err(CompileError::setup(format!(
                "expected a packet write, found {}",
                super::intrinsic_to_string(other)
            ))),
        }
    }
}

pub struct PacketBoundedLengthArgs {
    pub packet: ValueId,
    pub max_length: ValueId,
}

impl PacketBoundedLengthArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<PacketBoundedLengthArgs> {
        check_intrinsic_call(f, call, 2)?;
        Ok(PacketBoundedLengthArgs {
            packet: get_arg(f, call, 0),
            max_length: get_arg(f, call, 1),
        })
    }
}

pub struct PacketResizeArgs {
    pub packet: ValueId,
    pub offset: ValueId,
    pub adjust: ValueId,
}

impl PacketResizeArgs {
    pub fn decode(f: &Function, call: ValueId) -> Result<PacketResizeArgs> {
        check_intrinsic_call(f, call, 3)?;
        Ok(PacketResizeArgs {
            packet: get_arg(f, call, 0),
            offset: get_arg(f, call, 1),
            adjust: get_arg(f, call, 2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;

    #[test]
    fn string_arg_resolves_global_with_offset() {
        let mut module = Module::new();
        let g = module.add_string_global(".str", "rx_port");
        let mut b = FunctionBuilder::new("setup", &[], Type::Void);
        let bb = b.block("entry");
        b.switch_to(bb);
        let name = b.global_ref(g);
        let name_off = b.gep_bytes(name, 3);
        let es = b.iconst(64, 64);
        let ne = b.iconst(64, 16);
        let call = b.call("nanotube_channel_create", Type::Ptr, &[name_off, es, ne]);
        b.ret(None);
        let f = b.finish();
        let args = ChannelCreateArgs::decode(&module, &f, call).unwrap();
        assert_eq!(args.name, "port");
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let module = Module::new();
        let mut b = FunctionBuilder::new("setup", &[], Type::Void);
        let bb = b.block("entry");
        b.switch_to(bb);
        let es = b.iconst(64, 64);
        let call = b.call("nanotube_channel_create", Type::Ptr, &[es]);
        b.ret(None);
        let f = b.finish();
        let err = ChannelCreateArgs::decode(&module, &f, call).unwrap_err();
        assert!(matches!(err, CompileError::ArgCount { expected: 3, actual: 1, .. }));
    }

    #[test]
    fn flags_outside_read_write_are_rejected() {
        let mut b = FunctionBuilder::new("setup", &[], Type::Void);
        let bb = b.block("entry");
        b.switch_to(bb);
        let ctx = b.null_ptr();
        let id = b.iconst(32, 0);
        let ch = b.null_ptr();
        let flags = b.iconst(32, 5);
        let call =
            b.call("nanotube_context_add_channel", Type::Void, &[ctx, id, ch, flags]);
        b.ret(None);
        let f = b.finish();
        assert!(ContextAddChannelArgs::decode(&f, call).is_err());
    }
}
