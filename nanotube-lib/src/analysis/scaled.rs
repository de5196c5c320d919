//! Symbolic "base × factor ÷ divider ≫ shift + offset" view of an offset
//! expression.  Two packet accesses merge only when their offsets differ by
//! a constant, which is exactly what this strips out.

use crate::ir::{BinOp, CastOp, Function, Inst, Type, ValueId};
use tracing::debug;

/// A thin wrapper over a value capturing the constant arithmetic applied
/// to it.  `base == None` means the whole expression was constant and has
/// been folded into `offs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScaledValue {
    pub base: Option<ValueId>,
    pub factor: u32,
    pub divider: u32,
    pub shr_amount: i32,
    pub offs: i64,
}

impl ScaledValue {
    pub fn new(base: ValueId) -> ScaledValue {
        ScaledValue { base: Some(base), factor: 1, divider: 1, shr_amount: 0, offs: 0 }
    }

    /// Same symbolic part; offsets may differ.
    pub fn comparable(&self, other: &ScaledValue) -> bool {
        self.base == other.base
            && self.factor == other.factor
            && self.divider == other.divider
            && self.shr_amount == other.shr_amount
    }

    pub fn equals(&self, other: &ScaledValue) -> bool {
        self.comparable(other) && self.offs == other.offs
    }

    /// The group key: the symbolic part with the constant folded out.
    pub fn key(&self) -> ScaledValue {
        ScaledValue { offs: 0, ..*self }
    }

    fn transform(&self, raw: i64) -> i64 {
        let scaled = raw * self.factor as i64 / self.divider as i64;
        if self.shr_amount > 0 {
            scaled >> self.shr_amount
        } else if self.shr_amount < 0 {
            scaled << -self.shr_amount
        } else {
            scaled
        }
    }

    /// Fold a constant increment of the base into the offset, if the
    /// scaling permits it without rounding error.
    fn offset(&mut self, f: &Function, new_base: Option<ValueId>, inc: i64) -> bool {
        if self.shr_amount <= 0 && (self.factor as i64 * inc) % self.divider as i64 == 0 {
            self.offs += self.transform(inc);
            self.base = new_base;
            return true;
        }
        if self.divider != 1 {
            debug!("cannot fold increment through a division without rounding knowledge");
            return false;
        }
        // A right shift rounds; folding is only safe when the increment
        // does not disturb the shifted-out bits, or the shifted-out bits of
        // the new base are known.
        let mask = (1i64 << self.shr_amount) - 1;
        if (self.factor as i64 * inc) & mask == 0 {
            self.offs += self.transform(inc);
            self.base = new_base;
            return true;
        }
        if self.factor != 1 {
            debug!("cannot fold increment through a multiply with rounding");
            return false;
        }
        let low = match new_base {
            Some(b) => known_low_bits(f, b, self.shr_amount as u32, 0),
            None => Some(0),
        };
        match low {
            Some(low_bits) => {
                self.offs += self.transform(inc + low_bits as i64);
                self.base = new_base;
                true
            }
            None => {
                debug!("low bits unknown, increment not traceable");
                false
            }
        }
    }
}

/// Strip constant additions, subtractions, disjoint ORs, extensions and
/// constant scalings off a value; the integer equivalent of accumulating a
/// constant GEP offset.
pub fn strip_all_constants(f: &Function, v: ValueId) -> ScaledValue {
    let mut scv = ScaledValue::new(v);
    loop {
        let current = match scv.base {
            Some(b) => b,
            None => return scv,
        };

        if let Some(c) = f.const_int(current) {
            scv.offset(f, None, c.as_i64());
            return scv;
        }

        let inst = match f.inst(current) {
            Some(i) => i,
            None => return scv,
        };

        let cont = match inst {
            Inst::Binary { op: BinOp::Add, lhs, rhs, .. } => {
                if let Some(c) = f.const_int(*rhs) {
                    scv.offset(f, Some(*lhs), c.as_i64())
                } else if let Some(c) = f.const_int(*lhs) {
                    scv.offset(f, Some(*rhs), c.as_i64())
                } else {
                    debug!("cannot trace an add of two non-constants");
                    false
                }
            }
            Inst::Binary { op: BinOp::Sub, lhs, rhs, .. } => {
                if let Some(c) = f.const_int(*rhs) {
                    scv.offset(f, Some(*lhs), -c.as_i64())
                } else {
                    debug!("cannot trace an unhandled sub");
                    false
                }
            }
            Inst::Binary { op: BinOp::Or, lhs, rhs, .. } => {
                // An OR whose operands share no set bits is an add.
                let (value, c) = if let Some(c) = f.const_int(*rhs) {
                    (*lhs, c)
                } else if let Some(c) = f.const_int(*lhs) {
                    (*rhs, c)
                } else {
                    debug!("cannot trace an or of two non-constants");
                    return scv;
                };
                let width = f.result_type(value).int_bits().unwrap_or(64);
                let zeros = known_zero_mask(f, value, 0);
                if c.as_unsigned() & !zeros & mask_of(width) == 0 {
                    scv.offset(f, Some(value), c.as_i64())
                } else {
                    debug!("cannot prove or-with-constant is disjoint");
                    false
                }
            }
            Inst::Cast { op: CastOp::ZExt | CastOp::SExt, arg, .. } => {
                scv.base = Some(*arg);
                true
            }
            Inst::Binary { op, lhs, rhs, .. }
                if matches!(
                    op,
                    BinOp::Mul | BinOp::Shl | BinOp::UDiv | BinOp::SDiv | BinOp::LShr | BinOp::AShr
                ) =>
            {
                let c = match f.const_int(*rhs) {
                    Some(c) => c,
                    None => {
                        debug!("cannot trace a non-constant scale");
                        return scv;
                    }
                };
                match op {
                    BinOp::Mul => scv.factor *= c.as_u64() as u32,
                    BinOp::Shl => scv.shr_amount -= c.as_u64() as i32,
                    BinOp::UDiv | BinOp::SDiv => scv.divider *= c.as_u64() as u32,
                    BinOp::LShr | BinOp::AShr => scv.shr_amount += c.as_u64() as i32,
                    _ => unreachable!(),
                }
                scv.base = Some(*lhs);
                true
            }
            _ => {
                debug!("stopping trace at untraceable instruction");
                false
            }
        };
        if !cont {
            return scv;
        }
    }
}

fn mask_of(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

const MAX_KNOWN_BITS_DEPTH: u32 = 10;

/// Bits known to be zero in `v` (a subset; conservative elsewhere).
fn known_zero_mask(f: &Function, v: ValueId, depth: u32) -> u128 {
    if depth > MAX_KNOWN_BITS_DEPTH {
        return 0;
    }
    if let Some(c) = f.const_int(v) {
        return !c.as_unsigned();
    }
    match f.inst(v) {
        Some(Inst::Cast { op: CastOp::ZExt, arg, .. }) => {
            let from_bits = f.result_type(*arg).int_bits().unwrap_or(64);
            known_zero_mask(f, *arg, depth + 1) | !mask_of(from_bits)
        }
        Some(Inst::Binary { op: BinOp::And, lhs, rhs, .. }) => {
            let mut zeros = 0u128;
            if let Some(c) = f.const_int(*rhs) {
                zeros |= !c.as_unsigned();
            }
            if let Some(c) = f.const_int(*lhs) {
                zeros |= !c.as_unsigned();
            }
            zeros | known_zero_mask(f, *lhs, depth + 1) & known_zero_mask(f, *rhs, depth + 1)
        }
        Some(Inst::Binary { op: BinOp::Shl, lhs, rhs, .. }) => {
            if let Some(c) = f.const_int(*rhs) {
                let shifted = known_zero_mask(f, *lhs, depth + 1) << c.as_u64();
                shifted | mask_of(c.as_u64() as u32)
            } else {
                0
            }
        }
        Some(Inst::Binary { op: BinOp::Mul, lhs, rhs, .. }) => {
            if let Some(c) = f.const_int(*rhs) {
                let tz = c.as_unsigned().trailing_zeros();
                let _ = lhs;
                mask_of(tz.min(127))
            } else {
                0
            }
        }
        _ => 0,
    }
}

/// The constant value of the low `bits` bits, when known.
fn known_low_bits(f: &Function, v: ValueId, bits: u32, depth: u32) -> Option<u64> {
    if depth > MAX_KNOWN_BITS_DEPTH {
        return None;
    }
    if let Some(c) = f.const_int(v) {
        return Some(c.as_u64() & mask_of(bits) as u64);
    }
    let zeros = known_zero_mask(f, v, depth);
    if zeros & mask_of(bits) == mask_of(bits) {
        return Some(0);
    }
    match f.inst(v) {
        Some(Inst::Cast { op: CastOp::ZExt | CastOp::SExt, arg, .. }) => {
            known_low_bits(f, *arg, bits, depth + 1)
        }
        _ => None,
    }
}
