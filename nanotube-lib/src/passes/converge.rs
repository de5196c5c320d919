//! Shape equalisation at control-flow joins.
//!
//! When some paths into a join perform a map or packet access and others
//! do not, the downstream pipeline stages would see a request on some
//! invocations only.  This pass gives every incoming edge a matching
//! access: paths without one get a no-effect dummy (a NOP map op, or a
//! zero-mask packet write), and a selector PHI at the join carries the
//! access type that actually executed on each edge.

use crate::error::{CompileError, Result};
use crate::intrinsics::{get_intrinsic, Intrinsic};
use crate::ir::{BlockId, Cfg, Function, Inst, Type, ValueDef, ValueId};
use crate::setup::MapOpKind;
use tracing::{debug, info};

pub fn run(f: &mut Function) -> Result<bool> {
    let cfg = Cfg::new(f);
    let joins: Vec<BlockId> = (0..f.blocks.len() as u32)
        .map(BlockId)
        .filter(|b| cfg.predecessors(*b).len() >= 2)
        .collect();
    let mut changed = false;
    for join in joins {
        let preds = cfg.predecessors(join).to_vec();
        changed |= converge_map_ops(f, join, &preds)?;
        changed |= converge_packet_accesses(f, join, &preds)?;
    }
    Ok(changed)
}

/// The raw access-type selector of a map access call.
fn map_access_kind(f: &Function, call: ValueId) -> Option<ValueId> {
    match get_intrinsic(f, call) {
        Intrinsic::MapOp => Some(f.call_args(call).expect("not a call")[2]),
        _ => None,
    }
}

struct MapAccess {
    call: ValueId,
    map_id: u64,
    key_length: ValueId,
    data_length: Option<ValueId>,
}

/// Map accesses of one block, in program order.
fn block_map_accesses(f: &Function, block: BlockId) -> Result<Vec<MapAccess>> {
    let mut out = Vec::new();
    for &inst in &f.block(block).insts {
        let intr = get_intrinsic(f, inst);
        let (key_idx, data_idx) = match intr {
            Intrinsic::MapOp => (4usize, Some(9usize)),
            Intrinsic::MapRead | Intrinsic::MapWrite => (3, Some(6)),
            Intrinsic::MapInsert | Intrinsic::MapUpdate => (3, Some(7)),
            Intrinsic::MapRemove => (3, None),
            _ => continue,
        };
        let args = f.call_args(inst).expect("not a call");
        let map_id = f
            .const_int(args[1])
            .ok_or_else(|| CompileError::Converge {
                func: f.name.clone(),
                reason: format!("map id of {} is not constant", f.display_value(inst)),
            })?
            .as_u64();
        out.push(MapAccess {
            call: inst,
            map_id,
            key_length: args[key_idx],
            data_length: data_idx.map(|i| args[i]),
        });
    }
    Ok(out)
}

fn converge_map_ops(f: &mut Function, join: BlockId, preds: &[BlockId]) -> Result<bool> {
    // Gather the last access per (predecessor, map).
    let mut per_pred: Vec<Vec<MapAccess>> = Vec::with_capacity(preds.len());
    for &p in preds {
        per_pred.push(block_map_accesses(f, p)?);
    }
    let mut map_ids: Vec<u64> = per_pred.iter().flatten().map(|a| a.map_id).collect();
    map_ids.sort_unstable();
    map_ids.dedup();

    let mut changed = false;
    for map_id in map_ids {
        let last_access = |accs: &[MapAccess]| -> Option<usize> {
            accs.iter().rposition(|a| a.map_id == map_id)
        };
        // Shapes must agree before dummies can be shaped.
        let mut shape: Option<(ValueId, ValueId, Option<ValueId>)> = None;
        let mut consistent = true;
        for accs in &per_pred {
            if let Some(i) = last_access(accs) {
                let a = &accs[i];
                let ctx = f.call_args(a.call).expect("not a call")[0];
                let sizes_match = |x: ValueId, y: ValueId| {
                    match (f.const_int(x), f.const_int(y)) {
                        (Some(a), Some(b)) => a == b,
                        _ => x == y,
                    }
                };
                match &shape {
                    None => shape = Some((ctx, a.key_length, a.data_length)),
                    Some((_, klen, dlen)) => {
                        if !sizes_match(*klen, a.key_length)
                            || match (dlen, a.data_length) {
                                (Some(x), Some(y)) => !sizes_match(*x, y),
                                (None, None) => false,
                                _ => true,
                            }
                        {
                            consistent = false;
                        }
                    }
                }
            }
        }
        let Some((ctx, key_length, data_length)) = shape else { continue };
        if !consistent {
            info!(map_id, "skipping join with mismatched map access shapes");
            continue;
        }
        // The dummy needs the context value on edges that never computed
        // it; only a function argument is safe everywhere.
        if !matches!(f.value(ctx), ValueDef::Param { .. }) {
            debug!(map_id, "context operand is not an argument, leaving join alone");
            continue;
        }
        // Size operands must be constants so the dummy can restate them on
        // any edge without breaking dominance.
        let Some(key_len_const) = f.const_int(key_length) else { continue };
        let data_len_const = match data_length {
            Some(v) => match f.const_int(v) {
                Some(c) => Some(c),
                None => continue,
            },
            None => None,
        };

        let mut selector_in: Vec<(BlockId, ValueId)> = Vec::with_capacity(preds.len());
        let mut inserted_any = false;
        for (pi, &pred) in preds.iter().enumerate() {
            if let Some(i) = last_access(&per_pred[pi]) {
                let access = &per_pred[pi][i];
                let kind = match map_access_kind(f, access.call) {
                    Some(v) => v,
                    None => {
                        let raw = match get_intrinsic(f, access.call) {
                            Intrinsic::MapRead => MapOpKind::Read,
                            Intrinsic::MapWrite => MapOpKind::Write,
                            Intrinsic::MapInsert => MapOpKind::Insert,
                            Intrinsic::MapUpdate => MapOpKind::Update,
                            Intrinsic::MapRemove => MapOpKind::Remove,
                            _ => MapOpKind::Nop,
                        };
                        f.iconst(32, raw.as_raw())
                    }
                };
                selector_in.push((pred, kind));
                continue;
            }
            // This edge has no access: insert the no-effect dummy before
            // the predecessor's terminator.
            let term = f.terminator(pred).ok_or_else(|| CompileError::Converge {
                func: f.name.clone(),
                reason: "predecessor block has no terminator".to_string(),
            })?;
            let map_const = f.iconst(16, map_id);
            let nop = f.iconst(32, MapOpKind::Nop.as_raw());
            let null = f.null_ptr();
            let zero = f.iconst(64, 0);
            let klen = f.iconst(64, key_len_const.as_u64());
            let dlen = match data_len_const {
                Some(c) => f.iconst(64, c.as_u64()),
                None => zero,
            };
            let dummy = Inst::Call {
                callee: "nanotube_map_op".to_string(),
                ty: Type::I64,
                args: vec![ctx, map_const, nop, null, klen, null, null, null, zero, dlen],
            };
            f.insert_before(term, dummy);
            let sel = f.iconst(32, MapOpKind::Nop.as_raw());
            selector_in.push((pred, sel));
            inserted_any = true;
            debug!(map_id, pred = pred.index(), "inserted NOP map access");
        }

        if inserted_any {
            f.insert_inst(join, 0, Inst::Phi { ty: Type::I32, incomings: selector_in });
            changed = true;
        }
    }
    Ok(changed)
}

/// Equalise packet accesses.  Reads have no side effects, so the dummy is
/// a same-length read at offset zero; masked writes get a zero-mask twin.
fn converge_packet_accesses(f: &mut Function, join: BlockId, preds: &[BlockId]) -> Result<bool> {
    let mut changed = false;
    for want in [Intrinsic::PacketRead, Intrinsic::PacketWriteMasked] {
        let mut found: Vec<Option<ValueId>> = Vec::with_capacity(preds.len());
        for &p in preds {
            let call = f
                .block(p)
                .insts
                .iter()
                .rev()
                .copied()
                .find(|i| get_intrinsic(f, *i) == want);
            found.push(call);
        }
        let Some(example) = found.iter().flatten().next().copied() else { continue };
        if found.iter().all(|c| c.is_some()) {
            continue;
        }
        let args = f.call_args(example).expect("not a call").to_vec();
        let packet = args[0];
        if !matches!(f.value(packet), ValueDef::Param { .. }) {
            continue;
        }
        let len_operand = *args.last().expect("packet access without a length");
        let Some(len) = f.const_int(len_operand) else { continue };
        let lengths_agree = found.iter().flatten().all(|c| {
            let a = f.call_args(*c).expect("not a call");
            f.const_int(*a.last().unwrap()) == Some(len)
        });
        if !lengths_agree {
            info!(?want, "skipping join with mismatched packet access lengths");
            continue;
        }

        for (pi, &pred) in preds.iter().enumerate() {
            if found[pi].is_some() {
                continue;
            }
            let term = f.terminator(pred).ok_or_else(|| CompileError::Converge {
                func: f.name.clone(),
                reason: "predecessor block has no terminator".to_string(),
            })?;
            let bytes = len.as_u64();
            let count = f.iconst(32, bytes);
            let buf = f.insert_before(term, Inst::Alloca { elem: Type::I8, count });
            let zero = f.iconst(64, 0);
            let len_c = f.iconst(64, bytes);
            let dummy = match want {
                Intrinsic::PacketRead => Inst::Call {
                    callee: "nanotube_packet_read".to_string(),
                    ty: Type::I64,
                    args: vec![packet, buf, zero, len_c],
                },
                _ => {
                    // A masked write with an all-zero mask leaves every
                    // packet byte untouched.
                    let mask_bytes = (bytes + 7) / 8;
                    let mask_count = f.iconst(32, mask_bytes);
                    let mask =
                        f.insert_before(term, Inst::Alloca { elem: Type::I8, count: mask_count });
                    let zero8 = f.iconst(8, 0);
                    let len_mask = f.iconst(64, mask_bytes);
                    f.insert_before(
                        term,
                        Inst::Call {
                            callee: "llvm.memset.p0.i64".to_string(),
                            ty: Type::Void,
                            args: vec![mask, zero8, len_mask],
                        },
                    );
                    Inst::Call {
                        callee: "nanotube_packet_write_masked".to_string(),
                        ty: Type::I64,
                        args: vec![packet, buf, mask, zero, len_c],
                    }
                }
            };
            f.insert_before(term, dummy);
            changed = true;
            debug!(?want, pred = pred.index(), "inserted dummy packet access");
        }
    }
    Ok(changed)
}
