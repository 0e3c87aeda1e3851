/// Per-allocation symbolic byte stores.
///
/// Every allocation is backed by up to two `BytePlane`s: one for byte
/// offsets (always present) and one for byte segment tags (allocated the
/// first time a pointer-valued byte is stored). Each plane keeps a
/// concrete/symbolic per-byte shadow for O(1) concrete-index access and
/// lazily materialises an array-theory update list the first time a
/// symbolic index forces it.
use std::cell::RefCell;
use std::sync::Arc;

use either::Either;

use thiserror::Error;

use tracing::{debug, trace};

use crate::expr::{Array, SymExpr, UpdateList, INDEX_WIDTH};
use crate::object::MemoryObject;
use crate::solver::ValueSolver;
use crate::util::{random_byte, BitArray};
use crate::value::SegValue;

#[derive(Debug, Error)]
pub enum Error {
    #[error("write to read-only object `{0}`")]
    ReadOnlyViolation(String),
}

/// One byte-indexed store with concrete/symbolic duality.
///
/// Per byte, exactly one of three states holds: concrete (the shadow byte
/// is authoritative), known-symbolic (an 8-bit expression is
/// authoritative), or flushed (the update list is authoritative). The
/// unflushed mask records shadow writes not yet mirrored into the update
/// list.
#[derive(Debug, Clone)]
pub struct BytePlane {
    size_bound: usize,
    initial_value: u8,
    symbolic: bool,

    concrete: Vec<u8>,
    concrete_mask: BitArray,
    known_symbolics: Vec<Option<SymExpr>>,

    // interior mutability: symbolic-index reads flush through `&self`
    unflushed: RefCell<BitArray>,
    updates: RefCell<UpdateList>,
}

impl BytePlane {
    /// A plane with all-concrete contents equal to `initial_value`.
    pub fn new<S: Into<String>>(name: S, size: usize, initial_value: u8) -> Self {
        Self {
            size_bound: size,
            initial_value,
            symbolic: false,
            concrete: vec![initial_value; size],
            concrete_mask: BitArray::new(size, true),
            known_symbolics: vec![None; size],
            unflushed: RefCell::new(BitArray::new(size, false)),
            updates: RefCell::new(UpdateList::new(Array::constant(
                name,
                vec![initial_value; size],
            ))),
        }
    }

    /// A plane whose contents are the given symbolic root array.
    pub fn new_symbolic(array: Arc<Array>) -> Self {
        assert!(array.is_symbolic());
        let size = array.size();
        Self {
            size_bound: size,
            initial_value: 0,
            symbolic: true,
            concrete: vec![0; size],
            concrete_mask: BitArray::new(size, false),
            known_symbolics: vec![None; size],
            unflushed: RefCell::new(BitArray::new(size, false)),
            updates: RefCell::new(UpdateList::new(array)),
        }
    }

    pub fn size_bound(&self) -> usize {
        self.size_bound
    }

    pub fn is_symbolic(&self) -> bool {
        self.symbolic
    }

    pub fn initial_value(&self) -> u8 {
        self.initial_value
    }

    /// The raw concrete shadow, as materialised by
    /// `flush_to_concrete_store`; used for test-case extraction.
    pub fn concrete_store(&self) -> &[u8] {
        &self.concrete
    }

    /// Make contents all concrete and zero.
    pub fn initialize_to_zero(&mut self) {
        self.reinitialize(vec![0; self.size_bound]);
    }

    /// Make contents all concrete and pseudo-random.
    pub fn initialize_to_random(&mut self) {
        let bytes = (0..self.size_bound).map(|_| random_byte()).collect();
        self.reinitialize(bytes);
    }

    fn reinitialize(&mut self, bytes: Vec<u8>) {
        let name = self.updates.get_mut().root().name().to_string();
        self.concrete = bytes.clone();
        self.concrete_mask.fill(true);
        for slot in &mut self.known_symbolics {
            *slot = None;
        }
        self.unflushed.get_mut().fill(false);
        *self.updates.get_mut() = UpdateList::new(Array::constant(name, bytes));
        self.symbolic = false;
    }

    pub fn is_byte_concrete(&self, offset: usize) -> bool {
        self.concrete_mask.get(offset)
    }

    pub fn is_byte_known_symbolic(&self, offset: usize) -> bool {
        self.known_symbolics[offset].is_some()
    }

    pub fn is_byte_unflushed(&self, offset: usize) -> bool {
        self.unflushed.borrow().get(offset)
    }

    pub fn updates_len(&self) -> usize {
        self.updates.borrow().len()
    }

    fn index_expr(offset: usize) -> SymExpr {
        SymExpr::constant(offset as u64, INDEX_WIDTH)
    }

    fn byte_shadow(&self, offset: usize) -> Option<Either<u8, SymExpr>> {
        if self.concrete_mask.get(offset) {
            Some(Either::Left(self.concrete[offset]))
        } else {
            self.known_symbolics[offset].clone().map(Either::Right)
        }
    }

    pub fn read8(&self, offset: usize) -> SymExpr {
        assert!(offset < self.size_bound, "byte index {} out of range", offset);

        match self.byte_shadow(offset) {
            Some(Either::Left(b)) => SymExpr::constant(b as u64, 8),
            Some(Either::Right(e)) => e,
            None => {
                self.flush_for_read();
                SymExpr::read(self.updates.borrow().clone(), Self::index_expr(offset))
            }
        }
    }

    /// Read one byte at a symbolic index.
    pub fn read8_at(&self, offset: &SymExpr) -> SymExpr {
        self.flush_for_read();
        SymExpr::read(self.updates.borrow().clone(), offset.clone().zext(INDEX_WIDTH))
    }

    /// Read `width` bits starting at `offset`; the least significant byte
    /// sits at the lowest address.
    pub fn read(&self, offset: usize, width: u32) -> SymExpr {
        assert!(width >= 8 && width % 8 == 0, "unsupported read width {}", width);
        let bytes = (width / 8) as usize;
        assert!(offset + bytes <= self.size_bound, "read past size bound");

        (1..bytes).fold(self.read8(offset), |acc, k| {
            self.read8(offset + k).concat(acc)
        })
    }

    pub fn read_at(&self, offset: &SymExpr, width: u32) -> SymExpr {
        assert!(width >= 8 && width % 8 == 0, "unsupported read width {}", width);
        let bytes = (width / 8) as u64;
        let base = offset.clone().zext(INDEX_WIDTH);

        let byte_at = |k: u64| {
            self.read8_at(&SymExpr::add(
                base.clone(),
                SymExpr::constant(k, INDEX_WIDTH),
            ))
        };
        (1..bytes).fold(byte_at(0), |acc, k| byte_at(k).concat(acc))
    }

    pub fn write8(&mut self, offset: usize, value: u8) {
        assert!(offset < self.size_bound, "byte index {} out of range", offset);

        self.concrete[offset] = value;
        self.concrete_mask.set(offset);
        self.known_symbolics[offset] = None;
        self.unflushed.get_mut().set(offset);
    }

    pub fn write8_expr(&mut self, offset: usize, value: SymExpr) {
        assert_eq!(value.bits(), 8);

        // constants collapse onto the concrete path
        if let Some(v) = value.as_val() {
            self.write8(offset, v.to_u64() as u8);
            return;
        }

        assert!(offset < self.size_bound, "byte index {} out of range", offset);
        self.concrete_mask.clear(offset);
        self.known_symbolics[offset] = Some(value);
        self.unflushed.get_mut().set(offset);
    }

    /// Write one byte at a symbolic index; the whole shadow is flushed
    /// first because the write may target any byte.
    pub fn write8_at(&mut self, offset: &SymExpr, value: SymExpr) {
        assert_eq!(value.bits(), 8);

        self.flush_for_write();
        self.updates
            .get_mut()
            .push(offset.clone().zext(INDEX_WIDTH), value);
    }

    pub fn write(&mut self, offset: usize, value: &SymExpr) {
        let bits = value.bits();
        assert!(bits >= 8 && bits % 8 == 0, "unsupported write width {}", bits);
        let bytes = (bits / 8) as usize;
        assert!(offset + bytes <= self.size_bound, "write past size bound");

        for k in 0..bytes {
            self.write8_expr(offset + k, value.clone().extract(8 * k as u32, 8));
        }
    }

    pub fn write_at(&mut self, offset: &SymExpr, value: &SymExpr) {
        let bits = value.bits();
        assert!(bits >= 8 && bits % 8 == 0, "unsupported write width {}", bits);
        let bytes = (bits / 8) as u64;
        let base = offset.clone().zext(INDEX_WIDTH);

        for k in 0..bytes {
            let index = SymExpr::add(base.clone(), SymExpr::constant(k, INDEX_WIDTH));
            self.write8_at(&index, value.clone().extract(8 * k as u32, 8));
        }
    }

    pub fn write16(&mut self, offset: usize, value: u16) {
        self.write_uint(offset, value as u64, 2);
    }

    pub fn write32(&mut self, offset: usize, value: u32) {
        self.write_uint(offset, value as u64, 4);
    }

    pub fn write64(&mut self, offset: usize, value: u64) {
        self.write_uint(offset, value, 8);
    }

    fn write_uint(&mut self, offset: usize, value: u64, bytes: usize) {
        for k in 0..bytes {
            self.write8(offset + k, (value >> (8 * k)) as u8);
        }
    }

    /// Mirror every unflushed shadow byte into the update list. The shadow
    /// stays authoritative for concrete-index reads.
    pub fn flush_for_read(&self) {
        let mut unflushed = self.unflushed.borrow_mut();
        if !unflushed.any() {
            return;
        }

        let mut updates = self.updates.borrow_mut();
        let mut flushed = 0usize;
        for i in 0..self.size_bound {
            if !unflushed.get(i) {
                continue;
            }
            let value = match self.byte_shadow(i).expect("unflushed byte without shadow") {
                Either::Left(b) => SymExpr::constant(b as u64, 8),
                Either::Right(e) => e,
            };
            updates.push(Self::index_expr(i), value);
            unflushed.clear(i);
            flushed += 1;
        }
        trace!(flushed, updates = updates.len(), "flushed shadow into update list");
    }

    /// `flush_for_read` plus discarding the shadow: after a symbolic-index
    /// write any byte may have changed, so reads must go through the
    /// update list.
    pub fn flush_for_write(&mut self) {
        self.flush_for_read();
        self.concrete_mask.fill(false);
        for slot in &mut self.known_symbolics {
            *slot = None;
        }
    }

    /// Ask the solver for a satisfying value of every non-concrete byte
    /// and store it in the concrete shadow. Unknown answers leave the
    /// prior concrete value in place; the walk never aborts.
    pub fn flush_to_concrete_store<S: ValueSolver>(
        &mut self,
        solver: &mut S,
        constraints: &[SymExpr],
    ) {
        for i in 0..self.size_bound {
            if self.is_byte_concrete(i) {
                continue;
            }
            let expr = self.read8(i);
            match solver.value(&expr, constraints) {
                Some(v) => self.concrete[i] = v.to_u64() as u8,
                None => trace!(byte = i, "solver returned unknown; keeping prior byte"),
            }
        }
    }
}

/// The mutable state of one allocation: an offset plane, a lazily
/// allocated segment plane, and the copy-on-write owner tag used by the
/// enclosing address space.
#[derive(Debug, Clone)]
pub struct ObjectState {
    object: Arc<MemoryObject>,
    read_only: bool,

    // exclusively for the owning address space
    cow_owner: u32,

    offset_plane: BytePlane,
    segment_plane: Option<BytePlane>,
}

impl ObjectState {
    /// Concrete contents, initialised to zero bytes.
    pub fn new(object: Arc<MemoryObject>) -> Self {
        let bound = Self::bound_of(&object);
        let offset_plane = BytePlane::new(Self::plane_name(&object, "off"), bound, 0);
        Self {
            object,
            read_only: false,
            cow_owner: 0,
            offset_plane,
            segment_plane: None,
        }
    }

    /// Symbolic contents over the given root array.
    pub fn new_symbolic(object: Arc<MemoryObject>, array: Arc<Array>) -> Self {
        let bound = Self::bound_of(&object);
        assert_eq!(array.size(), bound, "root array size mismatch");
        Self {
            object,
            read_only: false,
            cow_owner: 0,
            offset_plane: BytePlane::new_symbolic(array),
            segment_plane: None,
        }
    }

    fn bound_of(object: &MemoryObject) -> usize {
        object
            .size_expr()
            .as_val()
            .map(|v| v.to_u64() as usize)
            .expect("object state requires a concrete size bound")
    }

    fn plane_name(object: &MemoryObject, suffix: &str) -> String {
        format!("mo{}_{}", object.id(), suffix)
    }

    pub fn object(&self) -> &Arc<MemoryObject> {
        &self.object
    }

    pub fn size_bound(&self) -> usize {
        self.offset_plane.size_bound()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn has_segment_plane(&self) -> bool {
        self.segment_plane.is_some()
    }

    pub fn offset_plane(&self) -> &BytePlane {
        &self.offset_plane
    }

    /// The copy-on-write owner tag; maintained by the address space, a
    /// mismatch with the mutating execution state forces a clone first.
    pub fn cow_owner(&self) -> u32 {
        self.cow_owner
    }

    pub fn set_cow_owner(&mut self, owner: u32) {
        self.cow_owner = owner;
    }

    /// Deep copy for a forked execution state; both planes are duplicated
    /// so mutation never leaks across states.
    pub fn fork_for(&self, owner: u32) -> ObjectState {
        let mut forked = self.clone();
        forked.cow_owner = owner;
        forked
    }

    pub fn initialize_to_zero(&mut self) {
        self.offset_plane.initialize_to_zero();
        if let Some(plane) = self.segment_plane.as_mut() {
            plane.initialize_to_zero();
        }
    }

    pub fn initialize_to_random(&mut self) {
        self.offset_plane.initialize_to_random();
        // stored segment tags stay zero: random scalars, not random pointers
        if let Some(plane) = self.segment_plane.as_mut() {
            plane.initialize_to_zero();
        }
    }

    pub fn read8(&self, offset: usize) -> SegValue {
        self.read(offset, 8)
    }

    pub fn read(&self, offset: usize, width: u32) -> SegValue {
        let off = self.offset_plane.read(offset, width);
        let seg = match &self.segment_plane {
            Some(plane) => plane.read(offset, width),
            None => Self::zero_segment(width),
        };
        SegValue::new(seg, off)
    }

    pub fn read_at(&self, offset: &SymExpr, width: u32) -> SegValue {
        let off = self.offset_plane.read_at(offset, width);
        let seg = match &self.segment_plane {
            Some(plane) => plane.read_at(offset, width),
            None => Self::zero_segment(width),
        };
        SegValue::new(seg, off)
    }

    // constants cap at 64 bits; wider all-zero segments are concatenations
    fn zero_segment(width: u32) -> SymExpr {
        let mut done = width.min(64);
        let mut seg = SymExpr::zero(done);
        while done < width {
            let step = (width - done).min(64);
            seg = SymExpr::zero(step).concat(seg);
            done += step;
        }
        seg
    }

    pub fn write(&mut self, offset: usize, value: &SegValue) -> Result<(), Error> {
        self.check_writable()?;

        self.prepare_segment_plane_expr(value.segment());
        if let Some(plane) = self.segment_plane.as_mut() {
            plane.write(offset, value.segment());
        }
        self.offset_plane.write(offset, value.offset());
        Ok(())
    }

    pub fn write_at(&mut self, offset: &SymExpr, value: &SegValue) -> Result<(), Error> {
        self.check_writable()?;

        self.prepare_segment_plane_expr(value.segment());
        if let Some(plane) = self.segment_plane.as_mut() {
            plane.write_at(offset, value.segment());
        }
        self.offset_plane.write_at(offset, value.offset());
        Ok(())
    }

    pub fn write8(&mut self, offset: usize, segment: u8, value: u8) -> Result<(), Error> {
        self.check_writable()?;

        self.prepare_segment_plane(segment != 0);
        if let Some(plane) = self.segment_plane.as_mut() {
            plane.write8(offset, segment);
        }
        self.offset_plane.write8(offset, value);
        Ok(())
    }

    pub fn write16(&mut self, offset: usize, segment: u16, value: u16) -> Result<(), Error> {
        self.check_writable()?;

        self.prepare_segment_plane(segment != 0);
        if let Some(plane) = self.segment_plane.as_mut() {
            plane.write16(offset, segment);
        }
        self.offset_plane.write16(offset, value);
        Ok(())
    }

    pub fn write32(&mut self, offset: usize, segment: u32, value: u32) -> Result<(), Error> {
        self.check_writable()?;

        self.prepare_segment_plane(segment != 0);
        if let Some(plane) = self.segment_plane.as_mut() {
            plane.write32(offset, segment);
        }
        self.offset_plane.write32(offset, value);
        Ok(())
    }

    pub fn write64(&mut self, offset: usize, segment: u64, value: u64) -> Result<(), Error> {
        self.check_writable()?;

        self.prepare_segment_plane(segment != 0);
        if let Some(plane) = self.segment_plane.as_mut() {
            plane.write64(offset, segment);
        }
        self.offset_plane.write64(offset, value);
        Ok(())
    }

    /// Materialise a satisfying concrete value for every byte of the
    /// offset plane; the segment plane stays internal.
    pub fn flush_to_concrete_store<S: ValueSolver>(
        &mut self,
        solver: &mut S,
        constraints: &[SymExpr],
    ) {
        self.offset_plane
            .flush_to_concrete_store(solver, constraints);
    }

    // The segment plane exists only once a pointer-valued byte is stored;
    // returns whether the plane now exists.
    fn prepare_segment_plane(&mut self, nonzero: bool) -> bool {
        if nonzero && self.segment_plane.is_none() {
            debug!(object = %self.object.name(), "allocating segment plane");
            self.segment_plane = Some(BytePlane::new(
                Self::plane_name(&self.object, "seg"),
                self.offset_plane.size_bound(),
                0,
            ));
        }
        self.segment_plane.is_some()
    }

    fn prepare_segment_plane_expr(&mut self, segment: &SymExpr) -> bool {
        self.prepare_segment_plane(!segment.is_zero())
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.read_only {
            Err(Error::ReadOnlyViolation(self.object.name()))
        } else {
            Ok(())
        }
    }
}
