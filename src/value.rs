use std::fmt;

use smallvec::SmallVec;

use crate::expr::SymExpr;

/// A segmented value: a `(segment, offset)` pair of equal-width
/// expressions. A constant-zero segment denotes a plain scalar; any other
/// segment marks the value as a pointer derived from the allocation
/// carrying that segment tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegValue {
    seg: SymExpr,
    off: SymExpr,
}

impl fmt::Display for SegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seg.is_zero() {
            write!(f, "{}", self.off)
        } else {
            write!(f, "{}:{}", self.seg, self.off)
        }
    }
}

macro_rules! op_seg_zero {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
        pub fn $name(&self, other: &SegValue) -> SegValue {
            SegValue::from_expr(SymExpr::$op(self.off.clone(), other.off.clone()))
        }
        )*
    };
}

macro_rules! op_seg_cmp_lexicographic {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
        pub fn $name(&self, other: &SegValue) -> SegValue {
            SegValue::from_expr(SymExpr::select(
                self.seg.clone().eq(other.seg.clone()),
                self.off.clone().$op(other.off.clone()),
                self.seg.clone().$op(other.seg.clone()),
            ))
        }
        )*
    };
}

impl SegValue {
    pub fn new(seg: SymExpr, off: SymExpr) -> Self {
        assert_eq!(seg.bits(), off.bits());
        Self { seg, off }
    }

    /// A plain scalar: the segment defaults to a same-width zero.
    pub fn from_expr(off: SymExpr) -> Self {
        let seg = SymExpr::zero(off.bits());
        Self { seg, off }
    }

    pub fn constant(value: u64, bits: u32) -> Self {
        Self::from_expr(SymExpr::constant(value, bits))
    }

    pub fn segment(&self) -> &SymExpr {
        &self.seg
    }

    pub fn offset(&self) -> &SymExpr {
        &self.off
    }

    pub fn width(&self) -> u32 {
        self.off.bits()
    }

    /// The predicate `seg = 0 ∧ off = 0`.
    pub fn is_zero(&self) -> SymExpr {
        SymExpr::and(
            self.seg.clone().eq(SymExpr::zero(self.seg.bits())),
            self.off.clone().eq(SymExpr::zero(self.off.bits())),
        )
    }

    pub fn is_constant(&self) -> bool {
        self.seg.is_const() && self.off.is_const()
    }

    pub fn zext(&self, bits: u32) -> SegValue {
        SegValue::new(self.seg.clone().zext(bits), self.off.clone().zext(bits))
    }

    pub fn sext(&self, bits: u32) -> SegValue {
        SegValue::new(self.seg.clone().sext(bits), self.off.clone().sext(bits))
    }

    pub fn concat(&self, other: &SegValue) -> SegValue {
        SegValue::new(
            self.seg.clone().concat(other.seg.clone()),
            self.off.clone().concat(other.off.clone()),
        )
    }

    pub fn add(&self, other: &SegValue) -> SegValue {
        SegValue::new(
            SymExpr::add(self.seg.clone(), other.seg.clone()),
            SymExpr::add(self.off.clone(), other.off.clone()),
        )
    }

    pub fn sub(&self, other: &SegValue) -> SegValue {
        SegValue::new(
            SymExpr::sub(self.seg.clone(), other.seg.clone()),
            SymExpr::sub(self.off.clone(), other.off.clone()),
        )
    }

    pub fn mul(&self, other: &SegValue) -> SegValue {
        // multiplying pointers doesn't make sense, but we must ensure that
        // the identity 1*x==x works
        SegValue::new(
            SymExpr::add(self.seg.clone(), other.seg.clone()),
            SymExpr::mul(self.off.clone(), other.off.clone()),
        )
    }

    op_seg_zero! {
        udiv => udiv,
        sdiv => sdiv,
        urem => urem,
        srem => srem,
        and => and,
        or => or,
        xor => xor,
        shl => shl,
        lshr => lshr,
        ashr => ashr,
    }

    op_seg_cmp_lexicographic! {
        ugt => ugt,
        uge => uge,
        ult => ult,
        ule => ule,
        sgt => sgt,
        sge => sge,
        slt => slt,
        sle => sle,
    }

    pub fn eq(&self, other: &SegValue) -> SegValue {
        SegValue::from_expr(SymExpr::and(
            self.seg.clone().eq(other.seg.clone()),
            self.off.clone().eq(other.off.clone()),
        ))
    }

    pub fn ne(&self, other: &SegValue) -> SegValue {
        SegValue::from_expr(SymExpr::or(
            self.seg.clone().ne(other.seg.clone()),
            self.off.clone().ne(other.off.clone()),
        ))
    }

    /// If-then-else on the offset component of `self` (an `i1` scalar in
    /// the IR); both components of the result select componentwise.
    pub fn select(&self, texpr: &SegValue, fexpr: &SegValue) -> SegValue {
        SegValue::new(
            SymExpr::select(self.off.clone(), texpr.seg.clone(), fexpr.seg.clone()),
            SymExpr::select(self.off.clone(), texpr.off.clone(), fexpr.off.clone()),
        )
    }

    pub fn extract(&self, bit_off: u32, bits: u32) -> SegValue {
        SegValue::new(
            self.seg.clone().extract(bit_off, bits),
            self.off.clone().extract(bit_off, bits),
        )
    }

    /// Assemble a wider value componentwise; the first item supplies the
    /// most significant bits. Nests the same way byte-sequence reads do,
    /// so assembled values compare equal to read-back values.
    pub fn concat_values<I>(input: I) -> SegValue
    where
        I: IntoIterator<Item = SegValue>,
    {
        let mut items: SmallVec<[SegValue; 8]> = input.into_iter().collect();
        assert!(!items.is_empty());

        let mut acc = items.pop().unwrap();
        while let Some(item) = items.pop() {
            acc = item.concat(&acc);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::IVar;

    #[test]
    fn scalar_offset_arithmetic_keeps_segment() {
        // q = p + 16 stays within p's allocation
        let p = SegValue::new(SymExpr::constant(7, 64), SymExpr::constant(0x1000, 64));
        let q = p.add(&SegValue::constant(16, 64));
        assert_eq!(q.segment().as_val().unwrap().to_u64(), 7);
        assert_eq!(q.offset().as_val().unwrap().to_u64(), 0x1010);
    }

    #[test]
    fn cross_segment_comparison_orders_by_segment() {
        let a = SegValue::new(SymExpr::constant(3, 64), SymExpr::zero(64));
        let b = SegValue::new(SymExpr::constant(5, 64), SymExpr::zero(64));
        assert!(a.ult(&b).offset().is_true());
        assert!(b.ult(&a).offset().is_false());
    }

    #[test]
    fn same_segment_comparison_orders_by_offset() {
        let a = SegValue::new(SymExpr::constant(3, 64), SymExpr::constant(8, 64));
        let b = SegValue::new(SymExpr::constant(3, 64), SymExpr::constant(9, 64));
        assert!(a.ult(&b).offset().is_true());
        assert!(a.uge(&b).offset().is_false());
    }

    #[test]
    fn mul_by_scalar_one_is_identity() {
        let x = SegValue::new(
            SymExpr::ivar(IVar::new(32)),
            SymExpr::ivar(IVar::new(32)),
        );
        let one = SegValue::constant(1, 32);
        assert_eq!(x.mul(&one), x);
        assert_eq!(one.mul(&x), x);
    }

    #[test]
    fn bitwise_ops_erase_the_segment() {
        let a = SegValue::new(SymExpr::constant(7, 32), SymExpr::ivar(IVar::new(32)));
        let b = SegValue::new(SymExpr::constant(9, 32), SymExpr::ivar(IVar::new(32)));
        assert!(a.and(&b).segment().is_zero());
        assert!(a.xor(&b).segment().is_zero());
        assert!(a.udiv(&b).segment().is_zero());
    }

    #[test]
    fn add_propagates_segments_componentwise() {
        let a = SegValue::new(SymExpr::constant(7, 32), SymExpr::constant(1, 32));
        let b = SegValue::new(SymExpr::constant(2, 32), SymExpr::constant(3, 32));
        let sum = a.add(&b);
        assert_eq!(sum.segment().as_val().unwrap().to_u64(), 9);
        assert_eq!(sum.offset().as_val().unwrap().to_u64(), 4);
    }

    #[test]
    fn equality_requires_both_components() {
        let p = SegValue::new(SymExpr::constant(7, 64), SymExpr::constant(8, 64));
        let q = SegValue::new(SymExpr::constant(7, 64), SymExpr::constant(8, 64));
        let r = SegValue::new(SymExpr::constant(6, 64), SymExpr::constant(8, 64));
        assert!(p.eq(&q).offset().is_true());
        assert!(p.eq(&r).offset().is_false());
        assert!(p.ne(&r).offset().is_true());
    }

    #[test]
    fn extensions_preserve_scalar_segments() {
        let v = SegValue::constant(0x80, 8);
        assert!(v.zext(32).segment().is_zero());
        assert!(v.sext(32).segment().is_zero());
        assert_eq!(v.sext(32).offset().as_val().unwrap().to_u64(), 0xffff_ff80);
    }

    #[test]
    fn select_takes_condition_from_first_offset() {
        let cond = SegValue::from_expr(SymExpr::from_bool(true));
        let t = SegValue::new(SymExpr::constant(1, 8), SymExpr::constant(2, 8));
        let f = SegValue::new(SymExpr::constant(3, 8), SymExpr::constant(4, 8));
        assert_eq!(cond.select(&t, &f), t);
    }

    #[test]
    fn is_zero_predicate_covers_both_components() {
        let zero = SegValue::constant(0, 32);
        assert!(zero.is_zero().is_true());

        let ptr = SegValue::new(SymExpr::constant(1, 32), SymExpr::zero(32));
        assert!(ptr.is_zero().is_false());
    }

    #[test]
    fn concat_values_assembles_most_significant_first() {
        let hi = SegValue::constant(0xde, 8);
        let lo = SegValue::constant(0xad, 8);
        let v = SegValue::concat_values([hi, lo]);
        assert_eq!(v.width(), 16);
        assert_eq!(v.offset().as_val().unwrap().to_u64(), 0xdead);
        assert!(v.segment().is_zero());
    }

    #[test]
    fn display_hides_zero_segments() {
        let scalar = SegValue::constant(0x10, 32);
        assert_eq!(format!("{}", scalar), "0x10");

        let ptr = SegValue::new(SymExpr::constant(3, 32), SymExpr::constant(0x10, 32));
        assert_eq!(format!("{}", ptr), "0x3:0x10");
    }
}
