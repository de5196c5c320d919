//! Memory-to-request lowering scenarios: packet loads and stores, the
//! payload length idiom, pointer selects, bulk intrinsics and map data.

use nanotube_lib::ir::{Function, FunctionBuilder, Inst, Type, ValueId};
use nanotube_lib::passes::mem2req;
use nanotube_lib::error::CompileError;

fn kernel_builder(name: &str) -> FunctionBuilder {
    FunctionBuilder::new(name, &[("ctx", Type::Ptr), ("packet", Type::Ptr)], Type::I32)
}

fn calls(f: &Function, name: &str) -> Vec<ValueId> {
    f.blocks
        .iter()
        .flat_map(|b| b.insts.iter().copied())
        .filter(|i| f.call_target(*i) == Some(name))
        .collect()
}

fn call_arg_const(f: &Function, call: ValueId, idx: usize) -> Option<u64> {
    let args = f.call_args(call)?;
    f.const_int(args[idx]).map(|c| c.as_u64())
}

#[test]
fn load_and_store_become_requests() {
    // Read two bytes at offset 16, write them back at offset 0.
    let mut b = kernel_builder("copy_head");
    let entry = b.block("entry");
    b.switch_to(entry);
    let packet = b.param(1);
    let src = b.gep_bytes(packet, 16);
    let v = b.load(Type::I16, src);
    b.store(packet, v);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    assert!(mem2req::run(&mut f, Some(param1)).unwrap());

    let reads = calls(&f, "nanotube_packet_read");
    assert_eq!(reads.len(), 1);
    assert_eq!(call_arg_const(&f, reads[0], 2), Some(16));
    assert_eq!(call_arg_const(&f, reads[0], 3), Some(2));

    let writes = calls(&f, "nanotube_packet_write_masked");
    assert_eq!(writes.len(), 1);
    assert_eq!(call_arg_const(&f, writes[0], 3), Some(0));
    assert_eq!(call_arg_const(&f, writes[0], 4), Some(2));

    // The two-byte write uses the minimal 0b11 mask byte.
    let mask_store = f
        .blocks
        .iter()
        .flat_map(|b| b.insts.iter())
        .filter_map(|i| match f.inst(*i) {
            Some(Inst::Store { value, .. }) => f.const_int(*value),
            _ => None,
        })
        .find(|c| c.bits() == 8);
    assert_eq!(mask_store.map(|c| c.as_u64()), Some(0b11));
}

#[test]
fn payload_pointer_difference_becomes_bounded_length() {
    let mut b = kernel_builder("length_check");
    let entry = b.block("entry");
    let drop_bb = b.block("drop");
    let ok_bb = b.block("ok");
    b.switch_to(entry);
    let packet = b.param(1);
    let data = b.call("nanotube_packet_data", Type::Ptr, &[packet]);
    let end = b.call("nanotube_packet_end", Type::Ptr, &[packet]);
    let di = b.cast(nanotube_lib::ir::CastOp::PtrToInt, Type::I64, data);
    let ei = b.cast(nanotube_lib::ir::CastOp::PtrToInt, Type::I64, end);
    let len = b.binary(nanotube_lib::ir::BinOp::Sub, Type::I64, ei, di);
    let min = b.iconst(64, 42);
    let short = b.icmp(nanotube_lib::ir::ICmpPred::Ult, len, min);
    b.cond_br(short, drop_bb, ok_bb);
    b.switch_to(drop_bb);
    let one = b.iconst(32, 1);
    b.ret(Some(one));
    b.switch_to(ok_bb);
    let zero = b.iconst(32, 0);
    b.ret(Some(zero));
    let mut f = b.finish();

    let param1 = f.params[1];
    mem2req::run(&mut f, Some(param1)).unwrap();

    let bounded = calls(&f, "nanotube_packet_bounded_length");
    assert_eq!(bounded.len(), 1);
    assert_eq!(call_arg_const(&f, bounded[0], 1), Some(65535));
    // The payload markers are gone.
    assert!(calls(&f, "nanotube_packet_data").is_empty());
    assert!(calls(&f, "nanotube_packet_end").is_empty());
}

#[test]
fn select_of_packet_pointers_selects_offsets() {
    let mut b = kernel_builder("select_dest");
    let entry = b.block("entry");
    b.switch_to(entry);
    let packet = b.param(1);
    let p0 = b.gep_bytes(packet, 0);
    let flag = b.load(Type::I8, p0);
    let limit = b.iconst(8, 128);
    let low = b.icmp(nanotube_lib::ir::ICmpPred::Ult, flag, limit);
    let p21 = b.gep_bytes(packet, 21);
    let p20 = b.gep_bytes(packet, 20);
    let sel = b.select(low, p21, p20);
    let value = b.iconst(8, 0xaa);
    b.store(sel, value);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    mem2req::run(&mut f, Some(param1)).unwrap();

    // One read (the flag), one masked write through a selected offset.
    assert_eq!(calls(&f, "nanotube_packet_read").len(), 1);
    let writes = calls(&f, "nanotube_packet_write_masked");
    assert_eq!(writes.len(), 1);
    let offset = f.call_args(writes[0]).unwrap()[3];
    let select_offsets = match f.inst(offset) {
        Some(Inst::Select { if_true, if_false, .. }) => {
            (f.const_int(*if_true).unwrap().as_i64(), f.const_int(*if_false).unwrap().as_i64())
        }
        other => panic!("expected a select over offsets, found {other:?}"),
    };
    assert_eq!(select_offsets, (21, 20));
}

#[test]
fn select_of_stack_pointers_is_left_alone() {
    // An ordinary ternary over two locals is plain stack memory; the
    // pointer select and the accesses through it must survive untouched.
    let mut b = kernel_builder("local_ternary");
    let entry = b.block("entry");
    b.switch_to(entry);
    let a = b.alloca_bytes(4);
    let c = b.alloca_bytes(4);
    let flag_slot = b.alloca_bytes(1);
    let flag = b.load(Type::I1, flag_slot);
    let sel = b.select(flag, a, c);
    let five = b.iconst(8, 5);
    let store = b.store(sel, five);
    let _ = b.load(Type::I8, sel);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    let changed = mem2req::run(&mut f, Some(param1)).unwrap();
    assert!(!changed);
    assert!(calls(&f, "nanotube_packet_read").is_empty());
    assert!(calls(&f, "nanotube_packet_write_masked").is_empty());
    match f.inst(store) {
        Some(Inst::Store { ptr, .. }) => assert_eq!(*ptr, sel),
        other => panic!("store was rewritten: {other:?}"),
    }
}

#[test]
fn phi_of_stack_pointers_is_left_alone() {
    // Double-buffer style: a PHI joining two local buffers is not a mix
    // of roots and stays as ordinary memory.
    let mut b = kernel_builder("double_buffer");
    let entry = b.block("entry");
    let left = b.block("left");
    let right = b.block("right");
    let join = b.block("join");
    b.switch_to(entry);
    let buf_a = b.alloca_bytes(8);
    let buf_b = b.alloca_bytes(8);
    let flag_slot = b.alloca_bytes(1);
    let flag = b.load(Type::I1, flag_slot);
    b.cond_br(flag, left, right);
    b.switch_to(left);
    b.br(join);
    b.switch_to(right);
    b.br(join);
    b.switch_to(join);
    let cur = b.phi(Type::Ptr, &[(left, buf_a), (right, buf_b)]);
    let v = b.iconst(8, 1);
    let store = b.store(cur, v);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    let changed = mem2req::run(&mut f, Some(param1)).unwrap();
    assert!(!changed);
    assert!(calls(&f, "nanotube_packet_write_masked").is_empty());
    match f.inst(store) {
        Some(Inst::Store { ptr, .. }) => assert_eq!(*ptr, cur),
        other => panic!("store was rewritten: {other:?}"),
    }
}

#[test]
fn select_mixing_packet_and_stack_is_fatal() {
    let mut b = kernel_builder("mixed_select");
    let entry = b.block("entry");
    b.switch_to(entry);
    let packet = b.param(1);
    let local = b.alloca_bytes(4);
    let flag_slot = b.alloca_bytes(1);
    let flag = b.load(Type::I1, flag_slot);
    let p = b.gep_bytes(packet, 8);
    let sel = b.select(flag, p, local);
    let five = b.iconst(8, 5);
    b.store(sel, five);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    let err = mem2req::run(&mut f, Some(param1)).unwrap_err();
    assert!(matches!(err, CompileError::Mem2Req { .. }));
    assert!(err.to_string().contains("unknown classification"));
}

#[test]
fn phi_mixing_roots_is_fatal() {
    let mut b = kernel_builder("mixed_phi");
    let entry = b.block("entry");
    let left = b.block("left");
    let right = b.block("right");
    let join = b.block("join");
    b.switch_to(entry);
    let packet = b.param(1);
    let local = b.alloca_bytes(4);
    let flag_slot = b.alloca_bytes(1);
    let flag = b.load(Type::I1, flag_slot);
    let p = b.gep_bytes(packet, 8);
    b.cond_br(flag, left, right);
    b.switch_to(left);
    b.br(join);
    b.switch_to(right);
    b.br(join);
    b.switch_to(join);
    let cur = b.phi(Type::Ptr, &[(left, p), (right, local)]);
    let v = b.iconst(8, 1);
    b.store(cur, v);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    let err = mem2req::run(&mut f, Some(param1)).unwrap_err();
    assert!(err.to_string().contains("mixes roots"));
}

#[test]
fn memset_and_memcpy_are_staged() {
    let mut b = kernel_builder("bulk");
    let entry = b.block("entry");
    b.switch_to(entry);
    let packet = b.param(1);
    let local = b.alloca_bytes(8);
    let zero = b.iconst(8, 0);
    let len21 = b.iconst(64, 21);
    b.memset(packet, zero, len21);
    let src = b.gep_bytes(packet, 4);
    let len8 = b.iconst(64, 8);
    b.memcpy(local, src, len8);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    mem2req::run(&mut f, Some(param1)).unwrap();

    // The packet memset becomes staging memset plus one masked write.
    let writes = calls(&f, "nanotube_packet_write_masked");
    assert_eq!(writes.len(), 1);
    assert_eq!(call_arg_const(&f, writes[0], 4), Some(21));
    // The packet-to-local memcpy becomes a read straight into a buffer.
    let reads = calls(&f, "nanotube_packet_read");
    assert_eq!(reads.len(), 1);
    assert_eq!(call_arg_const(&f, reads[0], 2), Some(4));
}

#[test]
fn map_data_accesses_use_the_lookup_key() {
    let mut b = kernel_builder("map_touch");
    let entry = b.block("entry");
    b.switch_to(entry);
    let ctx = b.param(0);
    let key = b.alloca_bytes(3);
    let id = b.iconst(32, 5);
    let klen = b.iconst(64, 3);
    let dlen = b.iconst(64, 8);
    let lookup = b.call("nanotube_map_lookup", Type::Ptr, &[ctx, id, key, klen, dlen]);
    let v = b.load(Type::I64, lookup);
    let slot = b.gep_bytes(lookup, 0);
    b.store(slot, v);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    mem2req::run(&mut f, Some(param1)).unwrap();

    let reads = calls(&f, "nanotube_map_read");
    assert_eq!(reads.len(), 1);
    let read_args = f.call_args(reads[0]).unwrap().to_vec();
    assert_eq!(read_args[0], ctx);
    assert_eq!(read_args[2], key);
    assert_eq!(f.const_int(read_args[3]).unwrap().as_u64(), 3);
    assert_eq!(f.const_int(read_args[6]).unwrap().as_u64(), 8);

    let writes = calls(&f, "nanotube_map_write");
    assert_eq!(writes.len(), 1);
}

#[test]
fn stack_memory_is_left_alone() {
    let mut b = kernel_builder("local_only");
    let entry = b.block("entry");
    b.switch_to(entry);
    let buf = b.alloca_bytes(16);
    let v = b.iconst(32, 7);
    b.store(buf, v);
    let _ = b.load(Type::I32, buf);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    let changed = mem2req::run(&mut f, Some(param1)).unwrap();
    assert!(!changed);
    assert!(calls(&f, "nanotube_packet_read").is_empty());
    assert!(calls(&f, "nanotube_packet_write_masked").is_empty());
}

#[test]
fn rerunning_is_the_identity() {
    let mut b = kernel_builder("twice");
    let entry = b.block("entry");
    b.switch_to(entry);
    let packet = b.param(1);
    let src = b.gep_bytes(packet, 8);
    let _ = b.load(Type::I32, src);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    assert!(mem2req::run(&mut f, Some(param1)).unwrap());
    let first = serde_json::to_string(&f).unwrap();
    let param1 = f.params[1];
    assert!(!mem2req::run(&mut f, Some(param1)).unwrap());
    let second = serde_json::to_string(&f).unwrap();
    assert_eq!(first, second);
}

#[test]
fn unknown_pointer_roots_are_fatal() {
    let mut b = kernel_builder("mystery");
    let entry = b.block("entry");
    b.switch_to(entry);
    let ptr = b.call("mystery_source", Type::Ptr, &[]);
    let _ = b.load(Type::I8, ptr);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    let err = mem2req::run(&mut f, Some(param1)).unwrap_err();
    assert!(matches!(err, CompileError::UnknownPointerSource { .. }));
}

#[test]
fn variable_indexing_is_fatal() {
    let mut b = kernel_builder("varidx");
    let entry = b.block("entry");
    b.switch_to(entry);
    let packet = b.param(1);
    let p0 = b.gep_bytes(packet, 0);
    let idx8 = b.load(Type::I8, p0);
    let idx = b.cast(nanotube_lib::ir::CastOp::ZExt, Type::I64, idx8);
    let gep = b.gep(Type::I8, packet, &[idx]);
    let _ = b.load(Type::I8, gep);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    let param1 = f.params[1];
    let err = mem2req::run(&mut f, Some(param1)).unwrap_err();
    assert!(matches!(err, CompileError::VariablePointerArithmetic { .. }));
}

