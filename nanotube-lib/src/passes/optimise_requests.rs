//! Adjacency-aware merging of packet accesses.
//!
//! Same-kind accesses whose offsets share a symbolic base are grouped,
//! checked for blockers on every path to a common insertion point, split
//! on large holes, and finally lowered to one wide access plus per-site
//! shims: a memcpy out of a shared buffer for reads, a data+mask merge
//! into shared buffers for writes.

use crate::analysis::scaled::{strip_all_constants, ScaledValue};
use crate::error::Result;
use crate::intrinsics::{get_intrinsic, intrinsic_to_string, Intrinsic};
use crate::ir::{BinOp, BlockId, CastOp, Cfg, DomTree, Function, Inst, Reachability, Type, ValueId};
use ahash::{AHashMap, AHashSet};
use tracing::{debug, info, warn};

/// Split a group when the unaccessed span exceeds
/// `max(span / EMPTY_FACTOR, MAX_EMPTY_BYTES)`.
const EMPTY_FACTOR: u64 = 8;
const TOTAL_FACTOR: u64 = 1;
const MAX_EMPTY_BYTES: u64 = 4;

/// One member of a merge group: the call, its constant byte offset
/// relative to the group key, and its length.
type AccessRange = (ValueId, i64, u16);

#[derive(Clone)]
struct MergeGroup {
    key: ScaledValue,
    insert_point: Option<ValueId>,
    accesses: Vec<AccessRange>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum BypassResult {
    Bypass,
    MergeSame,
    Block,
}

pub fn run(f: &mut Function) -> Result<bool> {
    let cfg = Cfg::new(f);
    let dt = DomTree::dominators(f, &cfg);
    let pdt = DomTree::post_dominators(f, &cfg);
    let mut reach = Reachability::new();

    let mut changed = false;
    // Reads are hoisted to a dominator; writes sink to a post-dominator.
    for (kind, to_front) in [(Intrinsic::PacketRead, true), (Intrinsic::PacketWriteMasked, false)] {
        let calls = collect_calls(f, kind);
        let groups = build_groups(f, &cfg, &dt, &pdt, &mut reach, calls, kind, to_front)?;
        for group in &groups {
            changed |= merge_packet_group(f, group, kind)?;
        }
    }
    Ok(changed)
}

fn collect_calls(f: &Function, kind: Intrinsic) -> Vec<ValueId> {
    let mut out = Vec::new();
    for block in &f.blocks {
        for &inst in &block.insts {
            if get_intrinsic(f, inst) == kind {
                out.push(inst);
            }
        }
    }
    out
}

/// The (offset operand, length operand) of a packet access call.
fn offset_and_length(f: &Function, call: ValueId, kind: Intrinsic) -> (ValueId, ValueId) {
    let args = f.call_args(call).expect("not a call");
    match kind {
        Intrinsic::PacketRead | Intrinsic::PacketWrite => (args[2], args[3]),
        Intrinsic::PacketWriteMasked => (args[3], args[4]),
        other => unreachable!("not a packet data access: {}", intrinsic_to_string(other)),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_groups(
    f: &mut Function,
    cfg: &Cfg,
    dt: &DomTree,
    pdt: &DomTree,
    reach: &mut Reachability,
    calls: Vec<ValueId>,
    kind: Intrinsic,
    to_front: bool,
) -> Result<Vec<MergeGroup>> {
    // Group by the symbolic part of the offset expression.
    let mut order: Vec<ScaledValue> = Vec::new();
    let mut by_key: AHashMap<ScaledValue, Vec<AccessRange>> = AHashMap::new();
    for call in calls {
        let (offset, length) = offset_and_length(f, call, kind);
        let Some(len) = f.const_int(length) else {
            warn!(call = %call, "unexpected non-constant access length, not merging");
            continue;
        };
        let scv = strip_all_constants(f, offset);
        let key = scv.key();
        debug!(call = %call, offs = scv.offs, "grouping access");
        let entry = by_key.entry(key);
        if let std::collections::hash_map::Entry::Vacant(_) = &entry {
            order.push(key);
        }
        entry.or_default().push((call, scv.offs, len.as_u64() as u16));
    }

    let mut todo: Vec<MergeGroup> = order
        .into_iter()
        .filter_map(|key| {
            let accesses = by_key.remove(&key)?;
            (accesses.len() > 1).then_some(MergeGroup { key, insert_point: None, accesses })
        })
        .collect();

    let mut ready = Vec::new();
    while let Some(mut group) = todo.pop() {
        if group.accesses.len() <= 1 {
            continue;
        }
        group.insert_point = group_insertion_point(f, &group, dt, pdt, to_front);
        let Some(ip) = group.insert_point else {
            // No common (post-)dominator: report and keep the originals.
            info!("no legal insertion point for access group, leaving accesses in place");
            continue;
        };
        if split_on_blockers(f, cfg, dt, pdt, reach, &mut group, ip, to_front, &mut todo)? {
            continue;
        }
        if split_group_with_holes(&mut group, &mut todo) {
            continue;
        }
        ready.push(group);
    }
    Ok(ready)
}

/// The instruction to place the merged access at: inside the nearest
/// common (post-)dominator block, tightened to the outermost access that
/// already lives there.
fn group_insertion_point(
    f: &Function,
    group: &MergeGroup,
    dt: &DomTree,
    pdt: &DomTree,
    to_front: bool,
) -> Option<ValueId> {
    let tree = if to_front { dt } else { pdt };
    let mut insert_bb: Option<BlockId> = None;
    for (call, _, _) in &group.accesses {
        let bb = f.block_of(*call)?;
        insert_bb = Some(match insert_bb {
            None => bb,
            Some(prev) => tree.nearest_common_dominator(prev, bb)?,
        });
    }
    let insert_bb = insert_bb?;
    let insts = &f.block(insert_bb).insts;
    let mut pos = if to_front {
        insts.len().saturating_sub(1)
    } else {
        first_non_phi(f, insert_bb)
    };
    for (call, _, _) in &group.accesses {
        if f.block_of(*call) != Some(insert_bb) {
            continue;
        }
        let call_pos = insts.iter().position(|i| i == call).expect("access left its block");
        if to_front {
            pos = pos.min(call_pos);
        } else {
            pos = pos.max(call_pos + 1);
        }
    }
    f.block(insert_bb).insts.get(pos).copied()
}

fn first_non_phi(f: &Function, block: BlockId) -> usize {
    f.block(block)
        .insts
        .iter()
        .position(|i| !matches!(f.inst(*i), Some(Inst::Phi { .. })))
        .unwrap_or(0)
}

/// Walk each access towards the insertion point, collecting the blocker
/// it gets stuck at.  Returns true when the group had to be split; the
/// pieces are pushed back onto `todo`.
#[allow(clippy::too_many_arguments)]
fn split_on_blockers(
    f: &Function,
    cfg: &Cfg,
    dt: &DomTree,
    pdt: &DomTree,
    reach: &mut Reachability,
    group: &mut MergeGroup,
    ip: ValueId,
    to_front: bool,
    todo: &mut Vec<MergeGroup>,
) -> Result<bool> {
    let mut block_order: Vec<ValueId> = Vec::new();
    let mut block_map: AHashMap<ValueId, Vec<AccessRange>> = AHashMap::new();
    for access in &group.accesses {
        let stop = trace_to(f, cfg, access, &group.key, ip, to_front);
        debug!(access = %access.0, stop = %stop, at_ip = stop == ip, "blocker walk");
        if !block_map.contains_key(&stop) {
            block_order.push(stop);
        }
        block_map.entry(stop).or_default().push(*access);
    }

    if block_order.len() == 1 && block_order[0] == ip {
        return Ok(false);
    }

    let tree = if to_front { dt } else { pdt };
    let mut result: Vec<MergeGroup> = Vec::new();
    for stop in block_order {
        let accesses = block_map.remove(&stop).expect("bucket vanished");
        if stop == ip {
            result.push(MergeGroup { key: group.key, insert_point: Some(ip), accesses });
            continue;
        }
        // The walk stopped early.  The blocker boundary is only usable as
        // an insertion point if it (post-)dominates every access it
        // blocked; otherwise fall back to the accesses' own common
        // (post-)dominator, provided it sits between them and the blocker.
        let stop_bb = f.block_of(stop).expect("stop point left the function");
        let mut lowest: Option<BlockId> = None;
        let mut stop_dominates = true;
        for (call, _, _) in &accesses {
            let bb = f.block_of(*call).expect("access left the function");
            lowest = Some(match lowest {
                None => bb,
                Some(prev) => match tree.nearest_common_dominator(prev, bb) {
                    Some(d) => d,
                    None => {
                        stop_dominates = false;
                        bb
                    }
                },
            });
            if !tree.dominates(stop_bb, bb) {
                stop_dominates = false;
            }
        }
        if stop_dominates {
            result.push(MergeGroup { key: group.key, insert_point: Some(stop), accesses });
            continue;
        }
        let lowest = match lowest {
            Some(l) => l,
            None => continue,
        };
        let between = if to_front {
            reach.is_reachable(cfg, stop_bb, lowest)
        } else {
            reach.is_reachable(cfg, lowest, stop_bb)
        };
        if between {
            let ip_inst = if to_front {
                f.terminator(lowest)
            } else {
                f.block(lowest).insts.get(first_non_phi(f, lowest)).copied()
            };
            if let Some(ip_inst) = ip_inst {
                result.push(MergeGroup {
                    key: group.key,
                    insert_point: Some(ip_inst),
                    accesses,
                });
                continue;
            }
        }
        // The common dominator is on the wrong side of the blocker; give
        // up on merging these accesses rather than moving one past it.
        debug!("dominance repair failed, splitting accesses into singletons");
        for access in accesses {
            result.push(MergeGroup {
                key: group.key,
                insert_point: None,
                accesses: vec![access],
            });
        }
    }

    match result.len() {
        0 => Ok(false),
        1 => {
            *group = result.pop().expect("just checked");
            Ok(false)
        }
        _ => {
            todo.extend(result);
            Ok(true)
        }
    }
}

/// Trace one access through every path towards `to`, checking that each
/// bypassed instruction commutes with it.  Returns `to` on success or the
/// boundary instruction the walk got blocked at.
fn trace_to(
    f: &Function,
    cfg: &Cfg,
    access: &AccessRange,
    key: &ScaledValue,
    to: ValueId,
    to_front: bool,
) -> ValueId {
    let mut todo: Vec<ValueId> = vec![access.0];
    let mut visited: AHashSet<ValueId> = AHashSet::new();
    let mut block = to;

    while let Some(start) = todo.pop() {
        let mut cur = Some(start);
        while let Some(c) = cur {
            if c == to {
                block = to;
                break;
            }
            if !visited.insert(c) {
                break;
            }
            match can_bypass(f, access, key, c) {
                BypassResult::Bypass => {
                    cur = step(f, cfg, c, to_front, &mut todo);
                }
                BypassResult::MergeSame => {
                    // Overlapping same-kind writes could merge in place,
                    // but stay ordered; treated as a blocker for now.
                    warn!(access = %access.0, blocker = %c, "overlapping writes treated as a blocker");
                    return boundary(f, c, to_front);
                }
                BypassResult::Block => {
                    return boundary(f, c, to_front);
                }
            }
        }
    }
    block
}

/// The instruction the merged access may not move past, seen from the
/// direction of travel.
fn boundary(f: &Function, blocker: ValueId, to_front: bool) -> ValueId {
    if to_front {
        let (bb, pos) = f.position_of(blocker).expect("blocker left the function");
        f.block(bb).insts.get(pos + 1).copied().unwrap_or(blocker)
    } else {
        blocker
    }
}

/// One step through the instruction graph; fan-in/fan-out continuations
/// are queued on `todo`.
fn step(
    f: &Function,
    cfg: &Cfg,
    cur: ValueId,
    to_front: bool,
    todo: &mut Vec<ValueId>,
) -> Option<ValueId> {
    let (bb, pos) = f.position_of(cur)?;
    if to_front {
        if pos > 0 {
            return Some(f.block(bb).insts[pos - 1]);
        }
        let mut first = None;
        for &pred in cfg.predecessors(bb) {
            let term = f.terminator(pred)?;
            if first.is_none() {
                first = Some(term);
            } else {
                todo.push(term);
            }
        }
        first
    } else {
        let insts = &f.block(bb).insts;
        if pos + 1 < insts.len() {
            return Some(insts[pos + 1]);
        }
        let mut first = None;
        for &succ in cfg.successors(bb) {
            let head = f.block(succ).insts.get(first_non_phi(f, succ)).copied()?;
            if first.is_none() {
                first = Some(head);
            } else {
                todo.push(head);
            }
        }
        first
    }
}

/// Does the traced access commute with `target`?
fn can_bypass(f: &Function, access: &AccessRange, key: &ScaledValue, target: ValueId) -> BypassResult {
    if access.0 == target {
        return BypassResult::Bypass;
    }
    let Some(Inst::Call { .. }) = f.inst(target) else {
        // Only calls can touch packet or map state at this point.
        return BypassResult::Bypass;
    };

    let id_ins = get_intrinsic(f, access.0);
    let id_tgt = get_intrinsic(f, target);
    let ins_packet = crate::intrinsics::is_packet_access(id_ins);
    let tgt_packet = crate::intrinsics::is_packet_access(id_tgt);
    let tgt_map = crate::intrinsics::is_map_access(id_tgt);

    if ins_packet && tgt_map {
        return BypassResult::Bypass;
    }
    if ins_packet && tgt_packet {
        return can_bypass_packet_packet(f, access, key, id_ins, id_tgt, target);
    }

    match id_tgt {
        // Local-memory intrinsics and compiler markers commute.
        Intrinsic::LlvmMemcpy
        | Intrinsic::LlvmMemset
        | Intrinsic::LlvmBswap
        | Intrinsic::LlvmDbgDeclare
        | Intrinsic::LlvmDbgValue
        | Intrinsic::LlvmLifetimeStart
        | Intrinsic::LlvmLifetimeEnd
        | Intrinsic::LlvmStacksave
        | Intrinsic::LlvmStackrestore
        | Intrinsic::MergeDataMask
        | Intrinsic::None => BypassResult::Bypass,
        other => {
            debug!(intrinsic = intrinsic_to_string(other), "treating unmodelled call as a blocker");
            BypassResult::Block
        }
    }
}

fn can_bypass_packet_packet(
    f: &Function,
    access: &AccessRange,
    key: &ScaledValue,
    id_ins: Intrinsic,
    id_tgt: Intrinsic,
    target: ValueId,
) -> BypassResult {
    // Resizes move bytes; nothing crosses them.  Length queries observe
    // the packet as a whole.
    if id_ins == Intrinsic::PacketResize || id_tgt == Intrinsic::PacketResize {
        return BypassResult::Block;
    }
    if id_ins == Intrinsic::PacketBoundedLength || id_tgt == Intrinsic::PacketBoundedLength {
        return BypassResult::Block;
    }
    if id_ins == Intrinsic::PacketRead && id_tgt == Intrinsic::PacketRead {
        return BypassResult::Bypass;
    }

    let (t_off, t_len) = offset_and_length(f, target, id_tgt);
    let Some(t_len) = f.const_int(t_len) else {
        return BypassResult::Block;
    };
    let t_scv = strip_all_constants(f, t_off);
    let same_base = t_scv.comparable(key);
    let overlap = ranges_overlap(t_scv.offs, t_len.as_u64() as u16, access.1, access.2);

    if same_base && !overlap {
        return BypassResult::Bypass;
    }
    if same_base && id_ins == id_tgt {
        return BypassResult::MergeSame;
    }
    BypassResult::Block
}

fn ranges_overlap(b1: i64, l1: u16, b2: i64, l2: u16) -> bool {
    let left_of = b1 + l1 as i64 <= b2;
    let right_of = b2 + l2 as i64 <= b1;
    !(left_of || right_of)
}

/// The accessed-byte map of a group: span start, end and per-byte flags.
fn accessed_mask(group: &MergeGroup) -> (i64, i64, Vec<bool>) {
    let start = group.accesses.iter().map(|(_, o, _)| *o).min().expect("empty group");
    let end = group
        .accesses
        .iter()
        .map(|(_, o, l)| *o + *l as i64)
        .max()
        .expect("empty group");
    let mut mask = vec![false; (end - start) as usize];
    for (_, off, len) in &group.accesses {
        for i in 0..*len as i64 {
            mask[(off - start + i) as usize] = true;
        }
    }
    (start, end, mask)
}

fn split_group_with_holes(group: &mut MergeGroup, todo: &mut Vec<MergeGroup>) -> bool {
    group.accesses.sort_by_key(|(_, off, _)| *off);
    let (start, end, mask) = accessed_mask(group);
    let len = (end - start) as u64;
    let count = mask.iter().filter(|b| **b).count() as u64;
    let empty = len - count;

    let needs_split = empty > MAX_EMPTY_BYTES || EMPTY_FACTOR * empty >= TOTAL_FACTOR * len;
    if !needs_split {
        return false;
    }

    // Split along the largest gap.
    let (mut gap_start, mut gap_len) = (0usize, 0usize);
    let (mut cur_start, mut cur_len) = (0usize, 0usize);
    for (i, used) in mask.iter().enumerate() {
        if *used {
            if cur_len >= gap_len {
                gap_len = cur_len;
                gap_start = cur_start;
            }
            cur_len = 0;
            cur_start = i + 1;
        } else {
            cur_len += 1;
        }
    }
    let split_at = start + gap_start as i64;
    debug!(split_at, gap_len, "splitting group on hole");
    let (low, high): (Vec<AccessRange>, Vec<AccessRange>) =
        group.accesses.iter().copied().partition(|&(_, off, _)| off < split_at);
    debug_assert!(!low.is_empty() && !high.is_empty());
    todo.push(MergeGroup { key: group.key, insert_point: None, accesses: low });
    todo.push(MergeGroup { key: group.key, insert_point: None, accesses: high });
    true
}

/// Materialise the group key as an i64 offset expression at `anchor`.
fn scaled_to_ir(f: &mut Function, key: &ScaledValue, anchor: ValueId) -> ValueId {
    let Some(base) = key.base else {
        return f.iconst(64, 0);
    };
    let ty = f.result_type(base);
    let bits = ty.int_bits().unwrap_or(64);
    let mut out = base;
    if key.factor != 1 {
        let c = f.iconst(bits, key.factor as u64);
        out = f.insert_before(anchor, Inst::Binary { op: BinOp::Mul, ty: ty.clone(), lhs: out, rhs: c });
    }
    if key.divider != 1 {
        let c = f.iconst(bits, key.divider as u64);
        out = f.insert_before(anchor, Inst::Binary { op: BinOp::UDiv, ty: ty.clone(), lhs: out, rhs: c });
    }
    if key.shr_amount > 0 {
        let c = f.iconst(bits, key.shr_amount as u64);
        out = f.insert_before(anchor, Inst::Binary { op: BinOp::LShr, ty: ty.clone(), lhs: out, rhs: c });
    }
    if key.shr_amount < 0 {
        let c = f.iconst(bits, (-key.shr_amount) as u64);
        out = f.insert_before(anchor, Inst::Binary { op: BinOp::Shl, ty: ty.clone(), lhs: out, rhs: c });
    }
    if bits < 64 {
        out = f.insert_before(anchor, Inst::Cast { op: CastOp::ZExt, ty: Type::I64, arg: out });
    }
    out
}

fn entry_alloca(f: &mut Function, len: u64) -> ValueId {
    let count = f.iconst(32, len);
    let pos = f.entry_insertion_point();
    let entry = f.entry();
    f.insert_inst(entry, pos, Inst::Alloca { elem: Type::I8, count })
}

fn merge_packet_group(f: &mut Function, group: &MergeGroup, kind: Intrinsic) -> Result<bool> {
    let Some(ip) = group.insert_point else { return Ok(false) };
    if group.accesses.len() <= 1 {
        return Ok(false);
    }
    // Results of the original calls must be dead or the rewrite would
    // change observable values.
    for (call, _, _) in &group.accesses {
        if f.has_uses(*call) {
            info!(call = %call, "merged access result is used, leaving group in place");
            return Ok(false);
        }
    }

    let (start, end, _) = accessed_mask(group);
    let len = (end - start) as u64;
    let packet = f.call_args(group.accesses[0].0).expect("not a call")[0];
    let buffer = entry_alloca(f, len);
    debug!(start, len, accesses = group.accesses.len(), "merging packet group");

    match kind {
        Intrinsic::PacketRead => merge_read_group(f, group, ip, packet, buffer, start, len),
        Intrinsic::PacketWriteMasked => merge_write_group(f, group, ip, packet, buffer, start, len),
        other => unreachable!("cannot merge {}", intrinsic_to_string(other)),
    }
    Ok(true)
}

fn merge_read_group(
    f: &mut Function,
    group: &MergeGroup,
    ip: ValueId,
    packet: ValueId,
    buffer: ValueId,
    start: i64,
    len: u64,
) {
    let scaled = scaled_to_ir(f, &group.key, ip);
    let start_c = f.iconst_signed(64, start);
    let off = f.insert_before(ip, Inst::Binary { op: BinOp::Add, ty: Type::I64, lhs: scaled, rhs: start_c });
    let len_c = f.iconst(64, len);
    f.insert_before(
        ip,
        Inst::Call {
            callee: "nanotube_packet_read".to_string(),
            ty: Type::I64,
            args: vec![packet, buffer, off, len_c],
        },
    );

    for (call, off, _) in &group.accesses {
        let args = f.call_args(*call).expect("not a call").to_vec();
        let (data_out, length) = (args[1], args[3]);
        let idx = f.iconst_signed(64, off - start);
        let src = f.insert_before(*call, Inst::Gep { base: buffer, pointee: Type::I8, indices: vec![idx] });
        f.insert_before(
            *call,
            Inst::Call {
                callee: "llvm.memcpy.p0.p0.i64".to_string(),
                ty: Type::Void,
                args: vec![data_out, src, length],
            },
        );
        f.remove_inst(*call);
    }
}

fn merge_write_group(
    f: &mut Function,
    group: &MergeGroup,
    ip: ValueId,
    packet: ValueId,
    buffer: ValueId,
    start: i64,
    len: u64,
) {
    let mask_len = (len + 7) / 8;
    let mask = entry_alloca(f, mask_len);
    // Clear the mask right after the entry allocas so every merge starts
    // from "no byte written".
    let entry = f.entry();
    let pos = f.entry_insertion_point();
    let zero8 = f.iconst(8, 0);
    let mask_len_c = f.iconst(64, mask_len);
    f.insert_inst(
        entry,
        pos,
        Inst::Call {
            callee: "llvm.memset.p0.i64".to_string(),
            ty: Type::Void,
            args: vec![mask, zero8, mask_len_c],
        },
    );

    for (call, off, _) in &group.accesses {
        let args = f.call_args(*call).expect("not a call").to_vec();
        let (data_in, site_mask, length) = (args[1], args[2], args[4]);
        let rel = f.iconst_signed(64, off - start);
        f.insert_before(
            *call,
            Inst::Call {
                callee: "nanotube_merge_data_mask".to_string(),
                ty: Type::Void,
                args: vec![buffer, mask, data_in, site_mask, rel, length],
            },
        );
        f.remove_inst(*call);
    }

    let scaled = scaled_to_ir(f, &group.key, ip);
    let start_c = f.iconst_signed(64, start);
    let off = f.insert_before(ip, Inst::Binary { op: BinOp::Add, ty: Type::I64, lhs: scaled, rhs: start_c });
    let len_c = f.iconst(64, len);
    f.insert_before(
        ip,
        Inst::Call {
            callee: "nanotube_packet_write_masked".to_string(),
            ty: Type::I64,
            args: vec![packet, buffer, mask, off, len_c],
        },
    );
}
