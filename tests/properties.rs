//! Property suites for the plane/state invariants and the segmented value
//! algebra.

use std::sync::Arc;

use proptest::prelude::*;

use segmem::expr::{BitVec, IVar, SymExpr, INDEX_WIDTH};
use segmem::object::MemoryObject;
use segmem::solver::Assignment;
use segmem::state::{BytePlane, ObjectState};
use segmem::value::SegValue;

fn fresh_object(size: u64) -> Arc<MemoryObject> {
    Arc::new(MemoryObject::new(
        1,
        0x1000,
        SymExpr::constant(size, 64),
        true,
        false,
        false,
        0,
    ))
}

#[derive(Debug, Clone)]
enum PlaneOp {
    WriteConcrete { offset: usize, value: u8 },
    WriteSymbolic { offset: usize },
    WriteSymbolicIndex { index: u8, value: u8 },
    ReadConcrete { offset: usize },
    ReadSymbolicIndex { index: u8 },
}

const PLANE_SIZE: usize = 16;

fn plane_op() -> impl Strategy<Value = PlaneOp> {
    prop_oneof![
        (0..PLANE_SIZE, any::<u8>())
            .prop_map(|(offset, value)| PlaneOp::WriteConcrete { offset, value }),
        (0..PLANE_SIZE).prop_map(|offset| PlaneOp::WriteSymbolic { offset }),
        (0..PLANE_SIZE as u8, any::<u8>())
            .prop_map(|(index, value)| PlaneOp::WriteSymbolicIndex { index, value }),
        (0..PLANE_SIZE).prop_map(|offset| PlaneOp::ReadConcrete { offset }),
        (0..PLANE_SIZE as u8).prop_map(|index| PlaneOp::ReadSymbolicIndex { index }),
    ]
}

proptest! {
    /// Per byte, at most one of concrete/known-symbolic holds, and
    /// unflushed implies one of them.
    #[test]
    fn shadow_state_stays_exclusive(ops in proptest::collection::vec(plane_op(), 0..40)) {
        let mut plane = BytePlane::new("p", PLANE_SIZE, 0);

        for op in ops {
            match op {
                PlaneOp::WriteConcrete { offset, value } => plane.write8(offset, value),
                PlaneOp::WriteSymbolic { offset } => {
                    plane.write8_expr(offset, SymExpr::ivar(IVar::new(8)))
                }
                PlaneOp::WriteSymbolicIndex { index, value } => plane.write8_at(
                    &SymExpr::constant(index as u64, INDEX_WIDTH),
                    SymExpr::constant(value as u64, 8),
                ),
                PlaneOp::ReadConcrete { offset } => {
                    plane.read8(offset);
                }
                PlaneOp::ReadSymbolicIndex { index } => {
                    plane.read8_at(&SymExpr::constant(index as u64, INDEX_WIDTH));
                }
            }

            for i in 0..PLANE_SIZE {
                prop_assert!(
                    !(plane.is_byte_concrete(i) && plane.is_byte_known_symbolic(i))
                );
                if plane.is_byte_unflushed(i) {
                    prop_assert!(
                        plane.is_byte_concrete(i) || plane.is_byte_known_symbolic(i)
                    );
                }
            }
        }
    }

    /// Concrete-index reads agree with a reference byte model under any
    /// interleaving of concrete and (bound) symbolic-index writes, both
    /// before and after flushes forced by symbolic-index reads.
    #[test]
    fn reads_agree_with_reference_model(ops in proptest::collection::vec(plane_op(), 0..40)) {
        let mut plane = BytePlane::new("p", PLANE_SIZE, 0);
        let mut model = vec![0u8; PLANE_SIZE];
        let mut env = Assignment::new();

        for op in ops {
            match op {
                PlaneOp::WriteConcrete { offset, value } => {
                    plane.write8(offset, value);
                    model[offset] = value;
                }
                // keep the reference model total: symbolic shadow bytes are
                // immediately bound to a concrete witness
                PlaneOp::WriteSymbolic { offset } => {
                    let var = IVar::new(8);
                    env.bind(var.clone(), BitVec::new(model[offset] as u64, 8));
                    plane.write8_expr(offset, SymExpr::ivar(var));
                }
                PlaneOp::WriteSymbolicIndex { index, value } => {
                    plane.write8_at(
                        &SymExpr::constant(index as u64, INDEX_WIDTH),
                        SymExpr::constant(value as u64, 8),
                    );
                    model[index as usize] = value;
                }
                PlaneOp::ReadConcrete { offset } => {
                    plane.read8(offset);
                }
                PlaneOp::ReadSymbolicIndex { index } => {
                    plane.read8_at(&SymExpr::constant(index as u64, INDEX_WIDTH));
                }
            }

            for (i, expected) in model.iter().enumerate() {
                let direct = plane.read8(i);
                prop_assert_eq!(env.eval(&direct).unwrap().to_u64(), *expected as u64);

                let through_array =
                    plane.read8_at(&SymExpr::constant(i as u64, INDEX_WIDTH));
                prop_assert_eq!(
                    env.eval(&through_array).unwrap().to_u64(),
                    *expected as u64
                );
            }
        }
    }

    /// Writing a scalar of any width and reading it back returns the same
    /// constant, byte-reversed across addresses (little endian).
    #[test]
    fn scalar_round_trip_any_width(offset in 0usize..8, bytes in 1u32..=8, value in any::<u64>()) {
        let mut os = ObjectState::new(fresh_object(16));
        let width = bytes * 8;
        let value = BitVec::new(value, width).to_u64();

        os.write(offset, &SegValue::constant(value, width)).unwrap();

        let v = os.read(offset, width);
        prop_assert!(v.segment().is_zero());
        prop_assert_eq!(v.offset().as_val().unwrap().to_u64(), value);

        for k in 0..bytes as usize {
            let byte = os.read8(offset + k);
            prop_assert_eq!(
                byte.offset().as_val().unwrap().to_u64(),
                (value >> (8 * k)) & 0xff
            );
        }
    }

    /// Symbolic byte sequences survive a write/read round trip as the
    /// same expressions.
    #[test]
    fn symbolic_round_trip(len in 1usize..=4) {
        let mut os = ObjectState::new(fresh_object(8));
        let vars: Vec<SymExpr> = (0..len).map(|_| SymExpr::ivar(IVar::new(8))).collect();

        // first item supplies the most significant bits
        let value = SegValue::concat_values(
            vars.iter().rev().cloned().map(SegValue::from_expr),
        );
        os.write(0, &value).unwrap();

        let back = os.read(0, 8 * len as u32);
        prop_assert_eq!(back, value);

        for (k, var) in vars.iter().enumerate() {
            let byte = os.read8(k);
            prop_assert_eq!(byte.offset(), var);
        }
    }

    /// Multiplying by a scalar one is the identity on both components.
    #[test]
    fn mul_identity(bits in prop_oneof![Just(8u32), Just(16), Just(32), Just(64)]) {
        let x = SegValue::new(
            SymExpr::ivar(IVar::new(bits)),
            SymExpr::ivar(IVar::new(bits)),
        );
        let one = SegValue::constant(1, bits);
        prop_assert_eq!(x.mul(&one), x);
    }

    /// Segment policy: bitwise ops erase the segment, add combines it
    /// componentwise.
    #[test]
    fn segment_policy(seg_a in any::<u32>(), seg_b in any::<u32>(), off_a in any::<u32>(), off_b in any::<u32>()) {
        let a = SegValue::new(
            SymExpr::constant(seg_a as u64, 32),
            SymExpr::constant(off_a as u64, 32),
        );
        let b = SegValue::new(
            SymExpr::constant(seg_b as u64, 32),
            SymExpr::constant(off_b as u64, 32),
        );

        prop_assert!(a.and(&b).segment().is_zero());

        let sum = a.add(&b);
        prop_assert_eq!(
            sum.segment().as_val().unwrap().to_u64(),
            seg_a.wrapping_add(seg_b) as u64
        );
    }

    /// The sized bounds check is satisfied exactly when `off + k <= N`.
    #[test]
    fn sized_bounds_check_matches_arithmetic(n in 0u64..32, off in 0u64..40, k in 1u64..10) {
        let mo = fresh_object(n);
        let pred = mo.bounds_check_offset_sized(SymExpr::constant(off, 64), k);
        let expected = off + k <= n;
        prop_assert_eq!(pred.is_true(), expected);
        prop_assert_eq!(pred.is_false(), !expected);
    }

    /// Mutating a forked object state never changes its parent.
    #[test]
    fn fork_isolation(writes in proptest::collection::vec((0usize..8, any::<u8>()), 1..16)) {
        let mut parent = ObjectState::new(fresh_object(8));
        for i in 0..8 {
            parent.write8(i, 0, i as u8).unwrap();
        }

        let mut child = parent.fork_for(1);
        for (offset, value) in writes {
            child.write8(offset, 0, value).unwrap();
        }

        for i in 0..8 {
            prop_assert_eq!(
                parent.read8(i).offset().as_val().unwrap().to_u64(),
                i as u64
            );
        }
    }
}
