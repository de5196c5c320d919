//! Memory-to-request lowering: loads, stores, memcpy and memset through
//! pointers rooted in packet or map memory become explicit Nanotube
//! request calls with integer offset and length arguments.
//!
//! Stack and plain-argument memory is left alone.  Pointer differences of
//! the payload (`packet_end - packet_data`) turn into bounded-length
//! queries, and selects or PHIs over same-rooted pointers turn into
//! selects or PHIs over integer offsets.

use crate::analysis::alias;
use crate::analysis::pointer::PointerAnalysis;
use crate::error::{CompileError, Result};
use crate::intrinsics::args::gep_constant_offset;
use crate::intrinsics::{get_intrinsic, Intrinsic};
use crate::ir::{BinOp, CastOp, DataLayout, Function, ICmpPred, Inst, Type, ValueDef, ValueId};
use ahash::AHashMap;
use tracing::{debug, trace};

/// Upper bound accepted for a dynamically sized memory intrinsic after
/// rounding to a power of two.
const MAX_DYNAMIC_ACCESS: u64 = 64;

/// The maximum packet length assumed when rewriting `end - data`.
const MAX_PACKET_LENGTH: u64 = 65535;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Root {
    /// The packet handle argument of the kernel.
    Packet,
    /// Map value memory returned by a lookup; the id is the lookup call.
    MapData(ValueId),
    Stack,
    OtherArgument,
    ChannelHandle,
    Unknown,
}

#[derive(Clone, Copy, Debug)]
enum Offset {
    Const(i64),
    /// An i64-typed value computed in the function.
    Dyn(ValueId),
}

#[derive(Clone, Copy, Debug)]
struct Resolved {
    root: Root,
    offset: Offset,
}

pub struct Mem2Req<'m> {
    f: &'m mut Function,
    packet: Option<ValueId>,
    memo: AHashMap<ValueId, Resolved>,
    dl: DataLayout,
}

/// Run the lowering on one kernel or thread function.  `packet` is the
/// packet handle parameter for kernels, absent for thread functions.
pub fn run(f: &mut Function, packet: Option<ValueId>) -> Result<bool> {
    // Surfaces variable pointer arithmetic and unknown pointer-returning
    // calls before any rewriting happens.
    PointerAnalysis::run(f)?;
    let mut pass = Mem2Req { f, packet, memo: AHashMap::new(), dl: DataLayout };
    pass.rewrite_length_idiom()?;
    let changed = pass.rewrite_accesses()?;
    pass.remove_dead_pointer_code();
    Ok(changed)
}

impl<'m> Mem2Req<'m> {
    /// `ptrtoint(end) - ptrtoint(data)` becomes
    /// `packet_bounded_length(packet, 65535)` plus the offset difference.
    fn rewrite_length_idiom(&mut self) -> Result<()> {
        let mut subs = Vec::new();
        for block in &self.f.blocks {
            for &inst in &block.insts {
                if let Some(Inst::Binary { op: BinOp::Sub, lhs, rhs, ty }) = self.f.inst(inst) {
                    subs.push((inst, *lhs, *rhs, ty.clone()));
                }
            }
        }
        for (sub, lhs, rhs, ty) in subs {
            let (Some(lhs_ptr), Some(rhs_ptr)) =
                (self.strip_ptrtoint(lhs), self.strip_ptrtoint(rhs))
            else {
                continue;
            };
            let Some((lhs_root, lhs_off)) = self.payload_marker(lhs_ptr) else { continue };
            let Some((rhs_root, rhs_off)) = self.payload_marker(rhs_ptr) else { continue };
            if lhs_root != Intrinsic::PacketEnd || rhs_root != Intrinsic::PacketData {
                continue;
            }
            let packet = match self.packet {
                Some(p) => p,
                None => continue,
            };
            debug!(sub = %sub, "rewriting payload length idiom");
            let bits = ty.int_bits().unwrap_or(64);
            let max = self.f.iconst(64, MAX_PACKET_LENGTH);
            let len = self.f.insert_before(
                sub,
                Inst::Call {
                    callee: "nanotube_packet_bounded_length".to_string(),
                    ty: Type::I64,
                    args: vec![packet, max],
                },
            );
            let mut result = len;
            let delta = lhs_off - rhs_off;
            if delta != 0 {
                let c = self.f.iconst_signed(64, delta);
                result = self.f.insert_before(
                    sub,
                    Inst::Binary { op: BinOp::Add, ty: Type::I64, lhs: len, rhs: c },
                );
            }
            if bits != 64 {
                result = self.f.insert_before(
                    sub,
                    Inst::Cast { op: CastOp::Trunc, ty: Type::Int(bits), arg: result },
                );
            }
            self.f.replace_all_uses(sub, result);
            self.f.remove_inst(sub);
        }
        Ok(())
    }

    fn strip_ptrtoint(&self, v: ValueId) -> Option<ValueId> {
        match self.f.inst(v)? {
            Inst::Cast { op: CastOp::PtrToInt, arg, .. } => Some(*arg),
            _ => None,
        }
    }

    /// If `ptr` is a bitcast/GEP chain over a payload marker call
    /// (`packet_data` / `packet_end` / `packet_meta`), return the marker
    /// and the accumulated byte offset.
    fn payload_marker(&self, ptr: ValueId) -> Option<(Intrinsic, i64)> {
        let mut value = ptr;
        let mut offset = 0i64;
        loop {
            match self.f.inst(value) {
                Some(Inst::Cast { op: CastOp::Bitcast, arg, .. }) => value = *arg,
                Some(Inst::Gep { base, pointee, indices }) => {
                    let mut consts = Vec::new();
                    for idx in indices {
                        consts.push(self.f.const_int(*idx)?.as_i64());
                    }
                    offset += gep_constant_offset(&self.dl, pointee, &consts);
                    value = *base;
                }
                Some(Inst::Call { .. }) => {
                    let intr = get_intrinsic(self.f, value);
                    return matches!(
                        intr,
                        Intrinsic::PacketData | Intrinsic::PacketEnd | Intrinsic::PacketMeta
                    )
                    .then_some((intr, offset));
                }
                _ => return None,
            }
        }
    }

    fn rewrite_accesses(&mut self) -> Result<bool> {
        // Snapshot the memory operations first; rewriting inserts code.
        let mut work = Vec::new();
        for block in &self.f.blocks {
            for &inst in &block.insts {
                match self.f.inst(inst) {
                    Some(Inst::Load { .. }) | Some(Inst::Store { .. }) => work.push(inst),
                    Some(Inst::Call { .. }) => {
                        let intr = get_intrinsic(self.f, inst);
                        if matches!(intr, Intrinsic::LlvmMemcpy | Intrinsic::LlvmMemset) {
                            work.push(inst);
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut changed = false;
        for inst in work {
            changed |= match self.f.inst(inst).cloned() {
                Some(Inst::Load { ty, ptr }) => self.rewrite_load(inst, &ty, ptr)?,
                Some(Inst::Store { ptr, value }) => self.rewrite_store(inst, ptr, value)?,
                Some(Inst::Call { .. }) => match get_intrinsic(self.f, inst) {
                    Intrinsic::LlvmMemset => self.rewrite_memset(inst)?,
                    Intrinsic::LlvmMemcpy => self.rewrite_memcpy(inst)?,
                    _ => false,
                },
                _ => false,
            };
        }
        Ok(changed)
    }

    /// Classify a pointer, materialising offset selects and PHIs on the
    /// way.  Results are memoised per pointer value.
    fn resolve(&mut self, ptr: ValueId) -> Result<Resolved> {
        if let Some(r) = self.memo.get(&ptr) {
            return Ok(*r);
        }
        let resolved = self.resolve_uncached(ptr)?;
        self.memo.insert(ptr, resolved);
        Ok(resolved)
    }

    fn resolve_uncached(&mut self, ptr: ValueId) -> Result<Resolved> {
        let mut value = ptr;
        let mut offset = 0i64;
        loop {
            match self.f.value(value) {
                ValueDef::Param { .. } => {
                    let root = if Some(value) == self.packet {
                        Root::Packet
                    } else {
                        Root::OtherArgument
                    };
                    return Ok(Resolved { root, offset: Offset::Const(offset) });
                }
                ValueDef::Const(_) => {
                    return Ok(Resolved { root: Root::Unknown, offset: Offset::Const(offset) })
                }
                ValueDef::Inst(inst) => match inst {
                    Inst::Cast { op: CastOp::Bitcast, arg, .. } => value = *arg,
                    Inst::Gep { base, pointee, indices } => {
                        let base = *base;
                        let pointee = pointee.clone();
                        let indices = indices.clone();
                        let mut consts = Vec::with_capacity(indices.len());
                        for idx in &indices {
                            match self.f.const_int(*idx) {
                                Some(c) => consts.push(c.as_i64()),
                                None => {
                                    return Err(CompileError::VariablePointerArithmetic {
                                        func: self.f.name.clone(),
                                    })
                                }
                            }
                        }
                        offset += gep_constant_offset(&self.dl, &pointee, &consts);
                        value = base;
                    }
                    Inst::Alloca { .. } => {
                        return Ok(Resolved { root: Root::Stack, offset: Offset::Const(offset) })
                    }
                    Inst::Select { cond, if_true, if_false } => {
                        let (cond, if_true, if_false) = (*cond, *if_true, *if_false);
                        let a = self.resolve(if_true)?;
                        let b = self.resolve(if_false)?;
                        if !request_roots_match(&a.root, &b.root) {
                            // A select over two pointers into the same
                            // ordinary memory (stack, plain argument,
                            // channel handle) stays as it is; the access
                            // through it is local memory.
                            if a.root == b.root {
                                return Ok(Resolved { root: a.root, offset: Offset::Const(offset) });
                            }
                            return Ok(Resolved { root: Root::Unknown, offset: Offset::Const(0) });
                        }
                        let ta = self.offset_operand(a.offset);
                        let tb = self.offset_operand(b.offset);
                        let sel = self.f.insert_before(
                            value,
                            Inst::Select { cond, if_true: ta, if_false: tb },
                        );
                        let combined = self.add_const_before(value, sel, offset)?;
                        return Ok(Resolved { root: a.root, offset: Offset::Dyn(combined) });
                    }
                    Inst::Phi { incomings, .. } => {
                        let incomings = incomings.clone();
                        let mut resolved = Vec::with_capacity(incomings.len());
                        for (blk, v) in &incomings {
                            resolved.push((*blk, self.resolve(*v)?));
                        }
                        let first = match resolved.first() {
                            Some((_, r)) => r.root,
                            None => {
                                return Ok(Resolved {
                                    root: Root::Unknown,
                                    offset: Offset::Const(0),
                                })
                            }
                        };
                        if resolved.iter().all(|(_, r)| request_roots_match(&first, &r.root)) {
                            // Every edge carries the same packet or map
                            // root: replace the pointer PHI with a PHI
                            // over integer offsets.
                            let mut phi_in = Vec::with_capacity(resolved.len());
                            for (blk, r) in resolved {
                                let v = self.offset_operand(r.offset);
                                phi_in.push((blk, v));
                            }
                            let phi = self.f.insert_before(
                                value,
                                Inst::Phi { ty: Type::I64, incomings: phi_in },
                            );
                            let combined = self.add_const_before(value, phi, offset)?;
                            return Ok(Resolved { root: first, offset: Offset::Dyn(combined) });
                        }
                        if resolved.iter().all(|(_, r)| r.root == first) {
                            // Loop-carried or joined pointers into one
                            // piece of ordinary memory; leave the PHI and
                            // its accesses alone.
                            return Ok(Resolved { root: first, offset: Offset::Const(offset) });
                        }
                        return Err(CompileError::Mem2Req {
                            func: self.f.name.clone(),
                            reason: format!(
                                "pointer PHI {} mixes roots",
                                self.f.display_value(value)
                            ),
                        });
                    }
                    Inst::Call { .. } => {
                        let intr = get_intrinsic(self.f, value);
                        let root = match intr {
                            Intrinsic::PacketData | Intrinsic::PacketMeta => Root::Packet,
                            Intrinsic::PacketEnd => Root::Unknown,
                            Intrinsic::MapLookup => Root::MapData(value),
                            Intrinsic::ChannelCreate => Root::ChannelHandle,
                            _ if self.f.call_target(value) == Some("bpf_map_lookup_elem") => {
                                Root::MapData(value)
                            }
                            _ => Root::Unknown,
                        };
                        return Ok(Resolved { root, offset: Offset::Const(offset) });
                    }
                    _ => {
                        return Ok(Resolved { root: Root::Unknown, offset: Offset::Const(offset) })
                    }
                },
            }
        }
    }

    /// Turn an offset into an operand; constants need no insertion point.
    fn offset_operand(&mut self, off: Offset) -> ValueId {
        match off {
            Offset::Const(c) => self.f.iconst_signed(64, c),
            Offset::Dyn(v) => v,
        }
    }

    fn add_const_before(&mut self, anchor: ValueId, base: ValueId, c: i64) -> Result<ValueId> {
        if c == 0 {
            return Ok(base);
        }
        let k = self.f.iconst_signed(64, c);
        Ok(self.f.insert_before(
            anchor,
            Inst::Binary { op: BinOp::Add, ty: Type::I64, lhs: base, rhs: k },
        ))
    }

    /// An `alloca i8 x len` placed with the other entry-block allocas.
    fn entry_alloca(&mut self, len: u64) -> ValueId {
        let count = self.f.iconst(32, len);
        let pos = self.f.entry_insertion_point();
        let entry = self.f.entry();
        self.f.insert_inst(entry, pos, Inst::Alloca { elem: Type::I8, count })
    }

    fn rewrite_load(&mut self, load: ValueId, ty: &Type, ptr: ValueId) -> Result<bool> {
        let resolved = self.resolve(ptr)?;
        let size = self.dl.store_size(ty);
        match resolved.root {
            Root::Packet => {
                let packet = self.packet.expect("packet access without packet parameter");
                trace!(load = %load, size, "packet load");
                let buf = self.entry_alloca(size);
                let off = self.offset_operand(resolved.offset);
                let len = self.f.iconst(64, size);
                self.f.insert_before(
                    load,
                    Inst::Call {
                        callee: "nanotube_packet_read".to_string(),
                        ty: Type::I64,
                        args: vec![packet, buf, off, len],
                    },
                );
                self.retarget_memory_inst(load, buf);
                Ok(true)
            }
            Root::MapData(lookup) => {
                let buf = self.entry_alloca(size);
                let off = self.offset_operand(resolved.offset);
                let len = self.f.iconst(64, size);
                let mut args = self.map_request_prefix(lookup);
                args.extend([buf, off, len]);
                self.f.insert_before(
                    load,
                    Inst::Call {
                        callee: "nanotube_map_read".to_string(),
                        ty: Type::I64,
                        args,
                    },
                );
                self.retarget_memory_inst(load, buf);
                Ok(true)
            }
            Root::Unknown => Err(CompileError::Mem2Req {
                func: self.f.name.clone(),
                reason: format!(
                    "pointer {} has unknown classification at a load",
                    self.f.display_value(ptr)
                ),
            }),
            _ => Ok(false),
        }
    }

    fn rewrite_store(&mut self, store: ValueId, ptr: ValueId, value: ValueId) -> Result<bool> {
        let resolved = self.resolve(ptr)?;
        let size = self.dl.store_size(&self.f.result_type(value));
        match resolved.root {
            Root::Packet => {
                trace!(store = %store, size, "packet store");
                let packet = self.packet.expect("packet access without packet parameter");
                let buf = self.entry_alloca(size);
                let mask = self.entry_alloca((size + 7) / 8);
                self.retarget_memory_inst(store, buf);
                self.fill_mask_const(store, mask, size);
                let off = self.offset_operand(resolved.offset);
                let len = self.f.iconst(64, size);
                self.f.insert_after(
                    store,
                    Inst::Call {
                        callee: "nanotube_packet_write_masked".to_string(),
                        ty: Type::I64,
                        args: vec![packet, buf, mask, off, len],
                    },
                );
                Ok(true)
            }
            Root::MapData(lookup) => {
                let buf = self.entry_alloca(size);
                self.retarget_memory_inst(store, buf);
                let off = self.offset_operand(resolved.offset);
                let len = self.f.iconst(64, size);
                let mut args = self.map_request_prefix(lookup);
                args.extend([buf, off, len]);
                self.f.insert_after(
                    store,
                    Inst::Call {
                        callee: "nanotube_map_write".to_string(),
                        ty: Type::I64,
                        args,
                    },
                );
                Ok(true)
            }
            Root::Unknown => Err(CompileError::Mem2Req {
                func: self.f.name.clone(),
                reason: format!(
                    "pointer {} has unknown classification at a store",
                    self.f.display_value(ptr)
                ),
            }),
            _ => Ok(false),
        }
    }

    /// Store the exact all-ones byte mask for a `len`-byte write in front
    /// of `anchor`.  The final byte keeps only the live low bits set.
    fn fill_mask_const(&mut self, anchor: ValueId, mask: ValueId, len: u64) {
        let mask_len = (len + 7) / 8;
        for byte in 0..mask_len {
            let remaining = len - byte * 8;
            let bits = if remaining >= 8 { 0xffu64 } else { (1u64 << remaining) - 1 };
            let c = self.f.iconst(8, bits);
            let slot = if byte == 0 {
                mask
            } else {
                let idx = self.f.iconst(64, byte);
                self.f.insert_before(
                    anchor,
                    Inst::Gep { base: mask, pointee: Type::I8, indices: vec![idx] },
                )
            };
            self.f.insert_before(anchor, Inst::Store { ptr: slot, value: c });
        }
    }

    /// Compute mask bytes for a dynamic byte count without control flow:
    /// each bit is a compare-and-select against the size operand.
    fn fill_mask_dynamic(&mut self, anchor: ValueId, mask: ValueId, size: ValueId, bound: u64) {
        let zero8 = self.f.iconst(8, 0);
        let mask_len = (bound + 7) / 8;
        for byte in 0..mask_len {
            let mut acc = zero8;
            for bit in 0..8 {
                let i = byte * 8 + bit;
                if i >= bound {
                    break;
                }
                let iv = self.f.iconst(64, i);
                let cond = self
                    .f
                    .insert_before(anchor, Inst::ICmp { pred: ICmpPred::Ult, lhs: iv, rhs: size });
                let set = self.f.iconst(8, 1 << bit);
                let sel = self
                    .f
                    .insert_before(anchor, Inst::Select { cond, if_true: set, if_false: zero8 });
                acc = self.f.insert_before(
                    anchor,
                    Inst::Binary { op: BinOp::Or, ty: Type::I8, lhs: acc, rhs: sel },
                );
            }
            let slot = if byte == 0 {
                mask
            } else {
                let idx = self.f.iconst(64, byte);
                self.f.insert_before(
                    anchor,
                    Inst::Gep { base: mask, pointee: Type::I8, indices: vec![idx] },
                )
            };
            self.f.insert_before(anchor, Inst::Store { ptr: slot, value: acc });
        }
    }

    /// The `(ctx, map_id, key, key_length)` prefix shared by map requests,
    /// pulled from the originating lookup call.
    fn map_request_prefix(&mut self, lookup: ValueId) -> Vec<ValueId> {
        let args = self.f.call_args(lookup).expect("lookup is not a call");
        vec![args[0], args[1], args[2], args[3]]
    }

    fn rewrite_memset(&mut self, call: ValueId) -> Result<bool> {
        let args = self.f.call_args(call).expect("not a call").to_vec();
        let (dest, value, size) = (args[0], args[1], args[2]);
        let resolved = self.resolve(dest)?;
        match resolved.root {
            Root::Packet | Root::MapData(_) => {}
            Root::Unknown => {
                return Err(CompileError::Mem2Req {
                    func: self.f.name.clone(),
                    reason: "memset destination has unknown classification".to_string(),
                })
            }
            _ => return Ok(false),
        }
        let (bound, exact) = self.access_bound(size)?;
        let buf = self.entry_alloca(bound);
        // Fill a local staging buffer, then issue one request.
        let fill_len = if exact { size } else { self.f.iconst(64, bound) };
        self.f.insert_before(
            call,
            Inst::Call {
                callee: "llvm.memset.p0.i64".to_string(),
                ty: Type::Void,
                args: vec![buf, value, fill_len],
            },
        );
        self.emit_bulk_write(call, resolved, buf, size, bound, exact)?;
        self.f.remove_inst(call);
        Ok(true)
    }

    fn rewrite_memcpy(&mut self, call: ValueId) -> Result<bool> {
        let args = self.f.call_args(call).expect("not a call").to_vec();
        let (dest, src, size) = (args[0], args[1], args[2]);
        let dest_res = self.resolve(dest)?;
        let src_res = self.resolve(src)?;
        let dest_ext = matches!(dest_res.root, Root::Packet | Root::MapData(_));
        let src_ext = matches!(src_res.root, Root::Packet | Root::MapData(_));
        if !dest_ext && !src_ext {
            return Ok(false);
        }
        let (bound, exact) = self.access_bound(size)?;

        let staged = if src_ext {
            let buf = self.entry_alloca(bound);
            let off = self.offset_operand(src_res.offset);
            let len = self.f.iconst(64, bound);
            let (callee, read_args) = match src_res.root {
                Root::Packet => {
                    let packet = self.packet.expect("packet access without packet parameter");
                    ("nanotube_packet_read", vec![packet, buf, off, len])
                }
                Root::MapData(lookup) => {
                    let mut prefix = self.map_request_prefix(lookup);
                    prefix.extend([buf, off, len]);
                    ("nanotube_map_read", prefix)
                }
                _ => unreachable!(),
            };
            self.f.insert_before(
                call,
                Inst::Call { callee: callee.to_string(), ty: Type::I64, args: read_args },
            );
            if !dest_ext {
                // External to local: copy the exact byte count over.
                self.f.insert_before(
                    call,
                    Inst::Call {
                        callee: "llvm.memcpy.p0.p0.i64".to_string(),
                        ty: Type::Void,
                        args: vec![dest, buf, size],
                    },
                );
                self.f.remove_inst(call);
                return Ok(true);
            }
            buf
        } else {
            // Local to external: stage through a bounded buffer so the
            // request never reads past the source allocation.
            let buf = self.entry_alloca(bound);
            self.f.insert_before(
                call,
                Inst::Call {
                    callee: "llvm.memcpy.p0.p0.i64".to_string(),
                    ty: Type::Void,
                    args: vec![buf, src, size],
                },
            );
            buf
        };

        self.emit_bulk_write(call, dest_res, staged, size, bound, exact)?;
        self.f.remove_inst(call);
        Ok(true)
    }

    /// The write half of a bulk transfer into packet or map memory; all
    /// code is inserted in front of `anchor`.
    fn emit_bulk_write(
        &mut self,
        anchor: ValueId,
        dest: Resolved,
        buf: ValueId,
        size: ValueId,
        bound: u64,
        exact: bool,
    ) -> Result<()> {
        let off = self.offset_operand(dest.offset);
        match dest.root {
            Root::Packet => {
                let packet = self.packet.expect("packet access without packet parameter");
                let mask = self.entry_alloca((bound + 7) / 8);
                let len = if exact {
                    let bytes = self.f.const_int(size).expect("exact size is constant").as_u64();
                    self.fill_mask_const(anchor, mask, bytes);
                    self.f.iconst(64, bytes)
                } else {
                    self.fill_mask_dynamic(anchor, mask, size, bound);
                    self.f.iconst(64, bound)
                };
                self.f.insert_before(
                    anchor,
                    Inst::Call {
                        callee: "nanotube_packet_write_masked".to_string(),
                        ty: Type::I64,
                        args: vec![packet, buf, mask, off, len],
                    },
                );
            }
            Root::MapData(lookup) => {
                let len = if exact { size } else { self.f.iconst(64, bound) };
                let mut args = self.map_request_prefix(lookup);
                args.extend([buf, off, len]);
                self.f.insert_before(
                    anchor,
                    Inst::Call {
                        callee: "nanotube_map_write".to_string(),
                        ty: Type::I64,
                        args,
                    },
                );
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// The static bound for a memory intrinsic size operand: the constant
    /// itself, or the PHI-join maximum rounded up to a power of two.
    fn access_bound(&mut self, size: ValueId) -> Result<(u64, bool)> {
        if let Some(c) = self.f.const_int(size) {
            return Ok((c.as_u64(), true));
        }
        match alias::max_value(self.f, size) {
            Some((max, _)) => {
                let bound = max.next_power_of_two();
                if bound > MAX_DYNAMIC_ACCESS {
                    return Err(CompileError::Mem2Req {
                        func: self.f.name.clone(),
                        reason: format!("dynamic access bound {bound} is too large"),
                    });
                }
                Ok((bound, false))
            }
            None => Err(CompileError::Mem2Req {
                func: self.f.name.clone(),
                reason: format!("size operand {} cannot be bounded", self.f.display_value(size)),
            }),
        }
    }

    /// Point a load or store at a local staging buffer.
    fn retarget_memory_inst(&mut self, inst: ValueId, buf: ValueId) {
        match self.f.inst_mut(inst) {
            Some(Inst::Load { ptr, .. }) => *ptr = buf,
            Some(Inst::Store { ptr, .. }) => *ptr = buf,
            _ => unreachable!("retarget target is not a memory instruction"),
        }
    }

    /// Drop now-dead pointer plumbing: address computations, payload
    /// markers and pointer selects the rewrite replaced.  Without this the
    /// stale `packet_data` calls would later read as merge blockers.
    fn remove_dead_pointer_code(&mut self) {
        loop {
            let mut candidates = Vec::new();
            for block in &self.f.blocks {
                for &inst in &block.insts {
                    let removable = match self.f.inst(inst) {
                        Some(Inst::Gep { .. }) | Some(Inst::Cast { .. }) => true,
                        Some(Inst::Select { .. }) | Some(Inst::Phi { .. }) => {
                            self.f.result_type(inst).is_pointer()
                        }
                        Some(Inst::Call { .. }) => {
                            // Payload markers and map lookups are pure
                            // queries; once their pointer result is dead
                            // the call itself is.
                            matches!(
                                get_intrinsic(self.f, inst),
                                Intrinsic::PacketData
                                    | Intrinsic::PacketEnd
                                    | Intrinsic::PacketMeta
                                    | Intrinsic::MapLookup
                            ) || self.f.call_target(inst) == Some("bpf_map_lookup_elem")
                        }
                        _ => false,
                    };
                    if removable && !self.f.has_uses(inst) {
                        candidates.push(inst);
                    }
                }
            }
            if candidates.is_empty() {
                return;
            }
            for inst in candidates {
                self.f.remove_inst(inst);
            }
        }
    }
}

/// True when both roots name the same packet or map-value memory, i.e.
/// accesses through them become requests and their offsets can be joined.
/// Same-kind pairs over ordinary memory (stack, plain arguments, channel
/// handles) deliberately do not match; those pointers are left untouched.
fn request_roots_match(a: &Root, b: &Root) -> bool {
    match (a, b) {
        (Root::Packet, Root::Packet) => true,
        (Root::MapData(x), Root::MapData(y)) => x == y,
        _ => false,
    }
}
