//! Accessed-range computation for intrinsic arguments.
//!
//! The registry declares, per pointer argument, which sibling argument
//! carries its length and in which unit.  The length operand is evaluated
//! by bounded constant propagation: plain constants are precise, PHIs of
//! constants give an upper bound.

use crate::intrinsics::{get_intrinsic, size_arg_link, SizeUnit};
use crate::ir::{Function, Inst, ValueId};

/// The byte range reachable through one pointer argument of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLocation {
    pub ptr: ValueId,
    /// `None` when no bound could be derived.
    pub size: Option<u64>,
    /// Whether `size` is exact rather than an upper bound.
    pub precise: bool,
}

/// Evaluate the maximum value an operand can take.  Returns the bound and
/// whether it is precise.  Every PHI incoming must be a constant or undef;
/// the maximum wins and precision is lost when distinct constants appear.
pub fn max_value(f: &Function, v: ValueId) -> Option<(u64, bool)> {
    if let Some(c) = f.const_int(v) {
        return Some((c.as_u64(), true));
    }
    if let Some(Inst::Phi { incomings, .. }) = f.inst(v) {
        let mut max: Option<u64> = None;
        let mut distinct = false;
        for (_, incoming) in incomings {
            if f.is_undef(*incoming) {
                continue;
            }
            let c = f.const_int(*incoming)?.as_u64();
            match max {
                None => max = Some(c),
                Some(cur) => {
                    if c != cur {
                        distinct = true;
                    }
                    if c > cur {
                        max = Some(c);
                    }
                }
            }
        }
        return max.map(|m| (m, !distinct));
    }
    None
}

/// The memory location accessed through argument `arg_idx` of `call`.
/// Never under-approximates: when no size can be derived the size is
/// unknown, not zero.
pub fn get_memory_location(f: &Function, call: ValueId, arg_idx: usize) -> MemoryLocation {
    let ptr = f.call_args(call).expect("not a call")[arg_idx];
    let intrinsic = get_intrinsic(f, call);
    let link = match size_arg_link(intrinsic, arg_idx) {
        Some(l) => l,
        None => return MemoryLocation { ptr, size: None, precise: false },
    };
    let size_operand = f.call_args(call).expect("not a call")[link.0];
    match max_value(f, size_operand) {
        Some((max, precise)) => {
            let bytes = match link.1 {
                SizeUnit::Bytes => max,
                SizeUnit::Bits => (max + 7) / 8,
            };
            MemoryLocation { ptr, size: Some(bytes), precise }
        }
        None => MemoryLocation { ptr, size: None, precise: false },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Type};

    #[test]
    fn phi_join_takes_maximum_and_drops_precision() {
        let mut b = FunctionBuilder::new("k", &[("c", Type::I1)], Type::Void);
        let entry = b.block("entry");
        let a = b.block("a");
        let bb = b.block("b");
        let join = b.block("join");
        let cond = b.param(0);
        b.switch_to(entry);
        b.cond_br(cond, a, bb);
        b.switch_to(a);
        b.br(join);
        b.switch_to(bb);
        b.br(join);
        b.switch_to(join);
        let four = b.iconst(64, 4);
        let sixteen = b.iconst(64, 16);
        let phi = b.phi(Type::I64, &[(a, four), (bb, sixteen)]);
        b.ret(None);
        let f = b.finish();
        assert_eq!(max_value(&f, phi), Some((16, false)));
        assert_eq!(max_value(&f, four), Some((4, true)));
    }

    #[test]
    fn mask_sizes_round_up_to_bytes() {
        let mut b = FunctionBuilder::new("k", &[("packet", Type::Ptr)], Type::Void);
        let entry = b.block("entry");
        b.switch_to(entry);
        let packet = b.param(0);
        let data = b.alloca_bytes(4);
        let mask = b.alloca_bytes(1);
        let off = b.iconst(64, 10);
        let len = b.iconst(64, 3);
        let call = b.call(
            "nanotube_packet_write_masked",
            Type::I64,
            &[packet, data, mask, off, len],
        );
        b.ret(None);
        let f = b.finish();
        let data_loc = get_memory_location(&f, call, 1);
        assert_eq!(data_loc.size, Some(3));
        assert!(data_loc.precise);
        // Mask length is in bits: three bits round up to one byte.
        let mask_loc = get_memory_location(&f, call, 2);
        assert_eq!(mask_loc.size, Some(1));
    }

    #[test]
    fn unknown_sizes_stay_unknown() {
        let mut b = FunctionBuilder::new("k", &[("p", Type::Ptr), ("n", Type::I64)], Type::Void);
        let entry = b.block("entry");
        b.switch_to(entry);
        let p = b.param(0);
        let n = b.param(1);
        let buf = b.alloca_bytes(64);
        let off = b.iconst(64, 0);
        let call = b.call("nanotube_packet_read", Type::I64, &[p, buf, off, n]);
        b.ret(None);
        let f = b.finish();
        let loc = get_memory_location(&f, call, 1);
        assert_eq!(loc.size, None);
    }
}
