use fxhash::FxHashMap as HashMap;

use crate::expr::{BinOp, BitVec, CmpOp, Expr, IVar, SymExpr};

/// Facade over the underlying constraint solver: produce one satisfying
/// concrete value for an expression under the given path constraints, or
/// `None` when the query is unknown or timed out.
pub trait ValueSolver {
    fn value(&mut self, expr: &SymExpr, constraints: &[SymExpr]) -> Option<BitVec>;
}

/// Resolves only expressions the constructors already folded to constants;
/// everything else is reported unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct FoldingSolver;

impl ValueSolver for FoldingSolver {
    fn value(&mut self, expr: &SymExpr, _constraints: &[SymExpr]) -> Option<BitVec> {
        expr.as_val()
    }
}

/// A fixed binding of free variables to constants, evaluated structurally.
/// Reads over symbolic root arrays resolve only when an update covers the
/// index.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    bindings: HashMap<IVar, BitVec>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, var: IVar, value: BitVec) {
        assert_eq!(var.bits(), value.bits());
        self.bindings.insert(var, value);
    }

    pub fn eval(&self, expr: &SymExpr) -> Option<BitVec> {
        match &**expr {
            Expr::Val(v) => Some(*v),
            Expr::IVar(v) => self.bindings.get(v).copied(),
            Expr::Read(updates, index) => {
                let ix = self.eval(index)?;
                for (uix, uval) in updates.iter() {
                    let u = self.eval(uix)?;
                    if u.to_u64() == ix.to_u64() {
                        return self.eval(uval);
                    }
                }
                updates
                    .root()
                    .init()
                    .and_then(|init| init.get(ix.to_u64() as usize).copied())
                    .map(|b| BitVec::new(b as u64, 8))
            }
            Expr::BinOp(op, l, r) => {
                let (l, r) = (self.eval(l)?, self.eval(r)?);
                Some(match op {
                    BinOp::Add => l.add(&r),
                    BinOp::Sub => l.sub(&r),
                    BinOp::Mul => l.mul(&r),
                    BinOp::UDiv => {
                        if r.is_zero() {
                            return None;
                        }
                        l.udiv(&r)
                    }
                    BinOp::SDiv => {
                        if r.is_zero() {
                            return None;
                        }
                        l.sdiv(&r)
                    }
                    BinOp::URem => {
                        if r.is_zero() {
                            return None;
                        }
                        l.urem(&r)
                    }
                    BinOp::SRem => {
                        if r.is_zero() {
                            return None;
                        }
                        l.srem(&r)
                    }
                    BinOp::And => l.and(&r),
                    BinOp::Or => l.or(&r),
                    BinOp::Xor => l.xor(&r),
                    BinOp::Shl => l.shl(&r),
                    BinOp::LShr => l.lshr(&r),
                    BinOp::AShr => l.ashr(&r),
                })
            }
            Expr::Cmp(op, l, r) => {
                let (l, r) = (self.eval(l)?, self.eval(r)?);
                let truth = match op {
                    CmpOp::Eq => l == r,
                    CmpOp::Ne => l != r,
                    CmpOp::Ult => l.ult(&r),
                    CmpOp::Ule => l.ule(&r),
                    CmpOp::Ugt => r.ult(&l),
                    CmpOp::Uge => r.ule(&l),
                    CmpOp::Slt => l.slt(&r),
                    CmpOp::Sle => l.sle(&r),
                    CmpOp::Sgt => r.slt(&l),
                    CmpOp::Sge => r.sle(&l),
                };
                Some(BitVec::new(truth as u64, 1))
            }
            Expr::ZExt(e, w) => Some(self.eval(e)?.zext(*w)),
            Expr::SExt(e, w) => Some(self.eval(e)?.sext(*w)),
            Expr::Extract(e, off, w) => Some(self.eval(e)?.extract(*off, *w)),
            Expr::Concat(hi, lo) => {
                if expr.bits() > 64 {
                    return None;
                }
                let (hi, lo) = (self.eval(hi)?, self.eval(lo)?);
                Some(hi.concat(&lo))
            }
            Expr::Select(c, t, f) => {
                if self.eval(c)?.is_zero() {
                    self.eval(f)
                } else {
                    self.eval(t)
                }
            }
        }
    }
}

impl ValueSolver for Assignment {
    fn value(&mut self, expr: &SymExpr, _constraints: &[SymExpr]) -> Option<BitVec> {
        self.eval(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Array, UpdateList, INDEX_WIDTH};

    #[test]
    fn assignment_evaluates_bound_variables() {
        let x = IVar::new(32);
        let mut env = Assignment::new();
        env.bind(x.clone(), BitVec::new(5, 32));

        let e = SymExpr::add(SymExpr::ivar(x), SymExpr::constant(2, 32));
        assert_eq!(env.eval(&e).unwrap().to_u64(), 7);
    }

    #[test]
    fn unbound_variables_are_unknown() {
        let env = Assignment::new();
        assert!(env.eval(&SymExpr::ivar(IVar::new(8))).is_none());
    }

    #[test]
    fn reads_evaluate_through_updates_under_a_binding() {
        let x = IVar::new(INDEX_WIDTH);
        let mut env = Assignment::new();
        env.bind(x.clone(), BitVec::new(2, INDEX_WIDTH));

        let mut ul = UpdateList::new(Array::constant("a", vec![9u8; 4]));
        ul.push(SymExpr::ivar(x.clone()), SymExpr::constant(0x41, 8));

        // the symbolic update index resolves to 2 under the binding
        let hit = SymExpr::read(ul.clone(), SymExpr::constant(2, INDEX_WIDTH));
        assert_eq!(env.eval(&hit).unwrap().to_u64(), 0x41);

        let miss = SymExpr::read(ul, SymExpr::constant(3, INDEX_WIDTH));
        assert_eq!(env.eval(&miss).unwrap().to_u64(), 9);
    }

    #[test]
    fn folding_solver_only_knows_constants() {
        let mut solver = FoldingSolver;
        assert_eq!(
            solver
                .value(&SymExpr::constant(3, 8), &[])
                .unwrap()
                .to_u64(),
            3
        );
        assert!(solver.value(&SymExpr::ivar(IVar::new(8)), &[]).is_none());
    }
}
