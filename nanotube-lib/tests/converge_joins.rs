//! Converge scenarios: joins where only some paths access a map gain a
//! no-effect dummy on the other edges plus an access-type selector PHI.

use nanotube_lib::ir::{Function, FunctionBuilder, Inst, Type, ValueId};
use nanotube_lib::passes::converge;
use nanotube_lib::setup::MapOpKind;

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

fn emit_map_read(b: &mut FunctionBuilder, ctx: ValueId, map_id: u64, offset: u64) {
    let id = b.iconst(16, map_id);
    let key = b.alloca_bytes(3);
    let klen = b.iconst(64, 3);
    let out = b.alloca_bytes(1);
    let off = b.iconst(64, offset);
    let dlen = b.iconst(64, 1);
    b.call("nanotube_map_read", Type::I64, &[ctx, id, key, klen, out, off, dlen]);
}

#[test]
fn missing_edges_gain_nop_accesses() {
    let mut b = kernel_builder("partial_access");
    let entry = b.block("entry");
    let with_access = b.block("with_access");
    let without = b.block("without");
    let join = b.block("join");
    b.switch_to(entry);
    let ctx = b.param(0);
    let packet = b.param(1);
    let buf = b.alloca_bytes(1);
    let zero = b.iconst(64, 0);
    let one = b.iconst(64, 1);
    b.call("nanotube_packet_read", Type::I64, &[packet, buf, zero, one]);
    let sel = b.load(Type::I8, buf);
    let limit = b.iconst(8, 4);
    let cond = b.icmp(nanotube_lib::ir::ICmpPred::Ult, sel, limit);
    b.cond_br(cond, with_access, without);
    b.switch_to(with_access);
    emit_map_read(&mut b, ctx, 0, 0);
    b.br(join);
    b.switch_to(without);
    b.br(join);
    b.switch_to(join);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    assert!(converge::run(&mut f).unwrap());

    // The bare edge now carries a NOP map op with matching shape.
    let dummies = calls(&f, "nanotube_map_op");
    assert_eq!(dummies.len(), 1);
    let args = f.call_args(dummies[0]).unwrap().to_vec();
    assert_eq!(f.const_int(args[1]).unwrap().as_u64(), 0);
    assert_eq!(f.const_int(args[2]).unwrap().as_u64(), MapOpKind::Nop.as_raw());
    assert_eq!(f.const_int(args[4]).unwrap().as_u64(), 3);
    assert_eq!(f.const_int(args[9]).unwrap().as_u64(), 1);

    // The join starts with the selector PHI over access types.
    let join_first = f.block(join).insts[0];
    match f.inst(join_first) {
        Some(Inst::Phi { incomings, ty }) => {
            assert_eq!(*ty, Type::I32);
            assert_eq!(incomings.len(), 2);
            let kinds: Vec<u64> = incomings
                .iter()
                .map(|(_, v)| f.const_int(*v).unwrap().as_u64())
                .collect();
            assert!(kinds.contains(&MapOpKind::Read.as_raw()));
            assert!(kinds.contains(&MapOpKind::Nop.as_raw()));
        }
        other => panic!("expected selector PHI at the join, found {other:?}"),
    }
}

#[test]
fn covered_joins_are_left_alone() {
    let mut b = kernel_builder("covered");
    let entry = b.block("entry");
    let left = b.block("left");
    let right = b.block("right");
    let join = b.block("join");
    b.switch_to(entry);
    let ctx = b.param(0);
    let packet = b.param(1);
    let buf = b.alloca_bytes(1);
    let zero = b.iconst(64, 0);
    let one = b.iconst(64, 1);
    b.call("nanotube_packet_read", Type::I64, &[packet, buf, zero, one]);
    let sel = b.load(Type::I8, buf);
    let limit = b.iconst(8, 4);
    let cond = b.icmp(nanotube_lib::ir::ICmpPred::Ult, sel, limit);
    b.cond_br(cond, left, right);
    b.switch_to(left);
    emit_map_read(&mut b, ctx, 0, 0);
    b.br(join);
    b.switch_to(right);
    emit_map_read(&mut b, ctx, 0, 2);
    b.br(join);
    b.switch_to(join);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    converge::run(&mut f).unwrap();
    assert!(calls(&f, "nanotube_map_op").is_empty());
}

#[test]
fn switch_join_equalises_two_maps() {
    // Four switch cases plus a bare default reach one join.  Map 0 is
    // touched by every case but not the default; map 1 is missing from
    // the single-access case and the default.  Access order also differs
    // between cases.
    let mut b = kernel_builder("switch_maps");
    let entry = b.block("entry");
    let c0 = b.block("case0");
    let c1 = b.block("case1");
    let c2 = b.block("case2");
    let c3 = b.block("case3");
    let bare = b.block("default");
    let join = b.block("join");
    b.switch_to(entry);
    let ctx = b.param(0);
    let packet = b.param(1);
    let buf = b.alloca_bytes(1);
    let off42 = b.iconst(64, 42);
    let one = b.iconst(64, 1);
    b.call("nanotube_packet_read", Type::I64, &[packet, buf, off42, one]);
    let sel = b.load(Type::I8, buf);
    b.switch(sel, bare, &[(0, c0), (1, c1), (2, c2), (3, c3)]);
    b.switch_to(c0);
    emit_map_read(&mut b, ctx, 0, 0);
    emit_map_read(&mut b, ctx, 1, 1);
    b.br(join);
    b.switch_to(c1);
    emit_map_read(&mut b, ctx, 0, 2);
    emit_map_read(&mut b, ctx, 1, 3);
    b.br(join);
    b.switch_to(c2);
    emit_map_read(&mut b, ctx, 1, 4);
    emit_map_read(&mut b, ctx, 0, 5);
    b.br(join);
    b.switch_to(c3);
    emit_map_read(&mut b, ctx, 0, 6);
    b.br(join);
    b.switch_to(bare);
    b.br(join);
    b.switch_to(join);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    assert!(converge::run(&mut f).unwrap());

    // Map 0 needs one dummy (the default); map 1 needs two (case 3 and
    // the default).
    let dummies = calls(&f, "nanotube_map_op");
    let mut dummy_ids: Vec<u64> = dummies
        .iter()
        .map(|d| f.const_int(f.call_args(*d).unwrap()[1]).unwrap().as_u64())
        .collect();
    dummy_ids.sort_unstable();
    assert_eq!(dummy_ids, vec![0, 1, 1]);
    for dummy in &dummies {
        let args = f.call_args(*dummy).unwrap();
        assert_eq!(f.const_int(args[2]).unwrap().as_u64(), MapOpKind::Nop.as_raw());
        assert_eq!(f.const_int(args[4]).unwrap().as_u64(), 3);
        assert_eq!(f.const_int(args[9]).unwrap().as_u64(), 1);
    }

    // One selector PHI per converged map, each covering all five edges.
    let mut nop_counts = Vec::new();
    for &inst in f.block(join).insts.iter().take(2) {
        match f.inst(inst) {
            Some(Inst::Phi { incomings, ty }) => {
                assert_eq!(*ty, Type::I32);
                assert_eq!(incomings.len(), 5);
                let nops = incomings
                    .iter()
                    .filter(|(_, v)| {
                        f.const_int(*v).map(|c| c.as_u64()) == Some(MapOpKind::Nop.as_raw())
                    })
                    .count();
                nop_counts.push(nops);
            }
            other => panic!("expected selector PHIs at the join, found {other:?}"),
        }
    }
    nop_counts.sort_unstable();
    assert_eq!(nop_counts, vec![1, 2]);
}

#[test]
fn masked_writes_gain_zero_mask_dummies() {
    let mut b = kernel_builder("write_join");
    let entry = b.block("entry");
    let writes = b.block("writes");
    let skips = b.block("skips");
    let join = b.block("join");
    b.switch_to(entry);
    let packet = b.param(1);
    let buf = b.alloca_bytes(1);
    let zero = b.iconst(64, 0);
    let one = b.iconst(64, 1);
    b.call("nanotube_packet_read", Type::I64, &[packet, buf, zero, one]);
    let sel = b.load(Type::I8, buf);
    let limit = b.iconst(8, 7);
    let cond = b.icmp(nanotube_lib::ir::ICmpPred::Ult, sel, limit);
    b.cond_br(cond, writes, skips);
    b.switch_to(writes);
    let data = b.alloca_bytes(2);
    let mask = b.alloca_bytes(1);
    let mask_val = b.iconst(8, 0b11);
    b.store(mask, mask_val);
    let off20 = b.iconst(64, 20);
    let two = b.iconst(64, 2);
    b.call(
        "nanotube_packet_write_masked",
        Type::I64,
        &[packet, data, mask, off20, two],
    );
    b.br(join);
    b.switch_to(skips);
    b.br(join);
    b.switch_to(join);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    assert!(converge::run(&mut f).unwrap());

    // The bare edge carries a same-length write whose mask is cleared, so
    // it never touches a packet byte.
    let arm_writes: Vec<ValueId> = f
        .block(skips)
        .insts
        .iter()
        .copied()
        .filter(|i| f.call_target(*i) == Some("nanotube_packet_write_masked"))
        .collect();
    assert_eq!(arm_writes.len(), 1);
    let write_args = f.call_args(arm_writes[0]).unwrap().to_vec();
    assert_eq!(f.const_int(write_args[4]).unwrap().as_u64(), 2);

    let memsets: Vec<ValueId> = f
        .block(skips)
        .insts
        .iter()
        .copied()
        .filter(|i| f.call_target(*i).is_some_and(|c| c.starts_with("llvm.memset")))
        .collect();
    assert_eq!(memsets.len(), 1);
    let memset_args = f.call_args(memsets[0]).unwrap().to_vec();
    // The zeroed buffer is the dummy's mask operand.
    assert_eq!(memset_args[0], write_args[2]);
    assert_eq!(f.const_int(memset_args[1]).unwrap().as_u64(), 0);
}

#[test]
fn packet_reads_are_equalised_across_edges() {
    let mut b = kernel_builder("packet_join");
    let entry = b.block("entry");
    let reads = b.block("reads");
    let skips = b.block("skips");
    let join = b.block("join");
    b.switch_to(entry);
    let packet = b.param(1);
    let buf = b.alloca_bytes(2);
    let zero = b.iconst(64, 0);
    let two = b.iconst(64, 2);
    b.call("nanotube_packet_read", Type::I64, &[packet, buf, zero, two]);
    let sel = b.load(Type::I8, buf);
    let limit = b.iconst(8, 9);
    let cond = b.icmp(nanotube_lib::ir::ICmpPred::Ult, sel, limit);
    b.cond_br(cond, reads, skips);
    b.switch_to(reads);
    let arm_buf = b.alloca_bytes(4);
    let off = b.iconst(64, 12);
    let four = b.iconst(64, 4);
    b.call("nanotube_packet_read", Type::I64, &[packet, arm_buf, off, four]);
    b.br(join);
    b.switch_to(skips);
    b.br(join);
    b.switch_to(join);
    let rc = b.iconst(32, 0);
    b.ret(Some(rc));
    let mut f = b.finish();

    assert!(converge::run(&mut f).unwrap());

    // The bare edge gained a same-length dummy read.
    let arm_reads: Vec<ValueId> = f
        .block(skips)
        .insts
        .iter()
        .copied()
        .filter(|i| f.call_target(*i) == Some("nanotube_packet_read"))
        .collect();
    assert_eq!(arm_reads.len(), 1);
    let args = f.call_args(arm_reads[0]).unwrap();
    assert_eq!(f.const_int(args[3]).unwrap().as_u64(), 4);
}
