use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::SeqCst;

use crate::context::Context;
use crate::expr::SymExpr;
use crate::value::SegValue;

static MEMORY_OBJECT_FACTORY: AtomicU64 = AtomicU64::new(0);

/// An allocation descriptor: identity, segment tag, concrete display
/// address, size (possibly symbolic), provenance flags, and the bounds
/// predicates derived from them.
///
/// Immutable after construction except for `name` and `is_global`. The
/// `(segment, id)` pair identifies the allocation for its whole lifetime.
#[derive(Debug)]
pub struct MemoryObject {
    id: u64,
    segment: u64,
    address: u64,

    /// size in bytes, zero-extended to the pointer width
    size: SymExpr,
    name: RefCell<String>,

    is_local: bool,
    is_global: Cell<bool>,
    is_fixed: bool,
    is_user_specified: Cell<bool>,

    /// opaque token naming the allocating instruction or global; zero when
    /// unknown
    alloc_site: u64,
}

impl MemoryObject {
    pub fn new(
        segment: u64,
        address: u64,
        size: SymExpr,
        is_local: bool,
        is_global: bool,
        is_fixed: bool,
        alloc_site: u64,
    ) -> Self {
        let width = Context::get().pointer_width();
        Self {
            id: MEMORY_OBJECT_FACTORY.fetch_add(1, SeqCst),
            segment,
            address,
            size: size.zext(width),
            name: RefCell::new("unnamed".to_string()),
            is_local,
            is_global: Cell::new(is_global),
            is_fixed,
            is_user_specified: Cell::new(false),
            alloc_site,
        }
    }

    /// Descriptor for a fixed external address: segment zero, zero size.
    pub fn new_fixed(address: u64) -> Self {
        let width = Context::get().pointer_width();
        Self::new(0, address, SymExpr::zero(width), false, false, true, 0)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn segment(&self) -> u64 {
        self.segment
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn set_name<S: Into<String>>(&self, name: S) {
        *self.name.borrow_mut() = name.into();
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn is_global(&self) -> bool {
        self.is_global.get()
    }

    pub fn set_global(&self, global: bool) {
        self.is_global.set(global);
    }

    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    pub fn is_user_specified(&self) -> bool {
        self.is_user_specified.get()
    }

    pub fn set_user_specified(&self, user: bool) {
        self.is_user_specified.set(user);
    }

    pub fn alloc_site(&self) -> u64 {
        self.alloc_site
    }

    pub fn segment_expr(&self) -> SymExpr {
        SymExpr::constant(self.segment, Context::get().pointer_width())
    }

    pub fn base_expr(&self) -> SymExpr {
        SymExpr::constant(self.address, Context::get().pointer_width())
    }

    pub fn size_expr(&self) -> SymExpr {
        self.size.clone()
    }

    /// The object's base pointer.
    pub fn pointer(&self) -> SegValue {
        SegValue::new(self.segment_expr(), self.base_expr())
    }

    pub fn pointer_at(&self, offset: u64) -> SegValue {
        let width = Context::get().pointer_width();
        SegValue::new(
            self.segment_expr(),
            SymExpr::add(self.base_expr(), SymExpr::constant(offset, width)),
        )
    }

    pub fn address_string(&self) -> String {
        self.address.to_string()
    }

    pub fn size_string(&self) -> String {
        match self.size.as_val() {
            Some(v) => v.to_u64().to_string(),
            None => "symbolic".to_string(),
        }
    }

    /// An identifying string for diagnostics.
    pub fn get_alloc_info(&self) -> String {
        let site = if self.alloc_site == 0 {
            "unknown".to_string()
        } else {
            format!("site {:#x}", self.alloc_site)
        };
        format!(
            "MO{}[{}] '{}' allocated at {}",
            self.id,
            self.size_string(),
            self.name.borrow(),
            site
        )
    }

    /// `pointer − address`, the in-object byte offset.
    pub fn offset_expr(&self, pointer: SymExpr) -> SymExpr {
        SymExpr::sub(pointer, self.base_expr())
    }

    pub fn bounds_check_pointer(&self, pointer: &SegValue) -> SymExpr {
        SymExpr::and(
            self.bounds_check_segment(pointer.segment().clone()),
            self.bounds_check_offset(self.offset_expr(pointer.offset().clone())),
        )
    }

    pub fn bounds_check_pointer_sized(&self, pointer: &SegValue, bytes: u64) -> SymExpr {
        SymExpr::and(
            self.bounds_check_segment(pointer.segment().clone()),
            self.bounds_check_offset_sized(self.offset_expr(pointer.offset().clone()), bytes),
        )
    }

    /// `off = 0` for zero-sized objects, `off < size` otherwise.
    pub fn bounds_check_offset(&self, offset: SymExpr) -> SymExpr {
        if self.size.is_zero() {
            let width = Context::get().pointer_width();
            offset.eq(SymExpr::zero(width))
        } else {
            offset.ult(self.size_expr())
        }
    }

    /// The last admissible starting offset for a `bytes`-wide access. For
    /// `bytes > size` the predicate is unconditionally false; the guard
    /// conjunct keeps `size − (bytes − 1)` from wrapping.
    pub fn bounds_check_offset_sized(&self, offset: SymExpr, bytes: u64) -> SymExpr {
        assert!(bytes >= 1);
        let width = Context::get().pointer_width();
        SymExpr::and(
            SymExpr::constant(bytes, width).ule(self.size_expr()),
            offset.ult(SymExpr::sub(
                self.size_expr(),
                SymExpr::constant(bytes - 1, width),
            )),
        )
    }

    /// `seg = 0 ∨ seg = segment`: the zero alternative admits
    /// pointer-to-fixed-address idioms used to address external memory.
    pub fn bounds_check_segment(&self, segment: SymExpr) -> SymExpr {
        let zero = SymExpr::zero(segment.bits());
        SymExpr::or(
            segment.clone().eq(zero),
            self.segment_expr().eq(segment),
        )
    }

    /// Total order keyed on `id`, then `address`, `size`, `alloc_site`.
    pub fn compare(&self, b: &MemoryObject) -> Ordering {
        if self.id == b.id {
            return Ordering::Equal;
        }
        self.address
            .cmp(&b.address)
            .then_with(|| self.size.cmp(&b.size))
            .then_with(|| self.alloc_site.cmp(&b.alloc_site))
    }
}

impl PartialEq for MemoryObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MemoryObject {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::IVar;

    fn object(size: u64) -> MemoryObject {
        MemoryObject::new(
            1,
            0x1000,
            SymExpr::constant(size, 64),
            true,
            false,
            false,
            0,
        )
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = object(8);
        let b = object(8);
        assert!(a.id() < b.id());
    }

    #[test]
    fn base_pointer_carries_the_segment() {
        let mo = object(16);
        let p = mo.pointer();
        assert_eq!(p.segment().as_val().unwrap().to_u64(), 1);
        assert_eq!(p.offset().as_val().unwrap().to_u64(), 0x1000);

        let q = mo.pointer_at(4);
        assert_eq!(q.offset().as_val().unwrap().to_u64(), 0x1004);
    }

    #[test]
    fn offset_check_is_strict_unsigned_bound() {
        let mo = object(16);
        assert!(mo.bounds_check_offset(SymExpr::constant(15, 64)).is_true());
        assert!(mo.bounds_check_offset(SymExpr::constant(16, 64)).is_false());
    }

    #[test]
    fn zero_sized_object_admits_only_offset_zero() {
        let mo = object(0);
        assert!(mo.bounds_check_offset(SymExpr::zero(64)).is_true());
        assert!(mo.bounds_check_offset(SymExpr::one(64)).is_false());
    }

    #[test]
    fn sized_check_admits_exactly_the_last_start() {
        let mo = object(16);
        assert!(mo
            .bounds_check_offset_sized(SymExpr::constant(12, 64), 4)
            .is_true());
        assert!(mo
            .bounds_check_offset_sized(SymExpr::constant(13, 64), 4)
            .is_false());
    }

    #[test]
    fn access_wider_than_object_is_always_out_of_bounds() {
        let mo = object(2);
        assert!(mo
            .bounds_check_offset_sized(SymExpr::zero(64), 4)
            .is_false());

        let empty = object(0);
        assert!(empty
            .bounds_check_offset_sized(SymExpr::zero(64), 1)
            .is_false());
    }

    #[test]
    fn segment_check_admits_zero_and_own_segment() {
        let mo = object(8);
        assert!(mo.bounds_check_segment(SymExpr::zero(64)).is_true());
        assert!(mo.bounds_check_segment(SymExpr::one(64)).is_true());
        assert!(mo.bounds_check_segment(SymExpr::constant(2, 64)).is_false());
    }

    #[test]
    fn pointer_check_combines_segment_and_offset() {
        let mo = object(16);
        let inside = SegValue::new(SymExpr::one(64), SymExpr::constant(0x100f, 64));
        let outside = SegValue::new(SymExpr::one(64), SymExpr::constant(0x1010, 64));
        let foreign = SegValue::new(SymExpr::constant(9, 64), SymExpr::constant(0x1000, 64));

        assert!(mo.bounds_check_pointer(&inside).is_true());
        assert!(mo.bounds_check_pointer(&outside).is_false());
        assert!(mo.bounds_check_pointer(&foreign).is_false());
        assert!(mo.bounds_check_pointer_sized(&inside, 2).is_false());
    }

    #[test]
    fn symbolic_sizes_keep_the_predicate_symbolic() {
        let mo = MemoryObject::new(
            2,
            0x2000,
            SymExpr::ivar(IVar::new(64)),
            false,
            false,
            false,
            0,
        );
        assert_eq!(mo.size_string(), "symbolic");
        assert!(!mo.bounds_check_offset(SymExpr::zero(64)).is_const());
    }

    #[test]
    fn compare_short_circuits_on_id() {
        let a = object(8);
        let b = object(8);
        assert_eq!(a.compare(&a), Ordering::Equal);
        assert_ne!(a.compare(&b), Ordering::Equal);
    }

    #[test]
    fn fixed_objects_live_in_segment_zero() {
        let mo = MemoryObject::new_fixed(0xdead_0000);
        assert_eq!(mo.segment(), 0);
        assert!(mo.is_fixed());
        assert!(mo.size_expr().is_zero());
    }
}
