use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::ops::{Add, BitAnd, BitOr, BitXor, Mul, Sub};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::SeqCst;

use hashconsing::{consign, HConsed, HashConsign};

consign! {
    let EXPR = consign(100 * 1024 /* = capacity */) for Expr;
}

static IVAR_FACTORY: AtomicU64 = AtomicU64::new(0);
static ARRAY_FACTORY: AtomicU64 = AtomicU64::new(0);
static UPDATE_FACTORY: AtomicU64 = AtomicU64::new(0);

/// Bit-width of array indices in the update-list theory.
pub const INDEX_WIDTH: u32 = 32;

/// A constant bit-vector of width 1..=64; the value is kept masked to the
/// width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitVec {
    bits: u32,
    value: u64,
}

impl fmt::Display for BitVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.value)
    }
}

impl BitVec {
    pub fn new(value: u64, bits: u32) -> Self {
        assert!(bits >= 1 && bits <= 64, "unsupported constant width: {}", bits);
        Self { bits, value: value & Self::mask(bits) }
    }

    pub fn zero(bits: u32) -> Self {
        Self::new(0, bits)
    }

    pub fn one(bits: u32) -> Self {
        Self::new(1, bits)
    }

    pub fn ones(bits: u32) -> Self {
        Self::new(u64::MAX, bits)
    }

    fn mask(bits: u32) -> u64 {
        if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn to_u64(&self) -> u64 {
        self.value
    }

    // value reinterpreted as a signed integer of the same width
    pub fn to_i64(&self) -> i64 {
        let shift = 64 - self.bits;
        ((self.value << shift) as i64) >> shift
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    pub fn is_one(&self) -> bool {
        self.value == 1
    }

    pub fn is_ones(&self) -> bool {
        self.value == Self::mask(self.bits)
    }

    pub fn add(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.value.wrapping_add(r.value), self.bits)
    }

    pub fn sub(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.value.wrapping_sub(r.value), self.bits)
    }

    pub fn mul(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.value.wrapping_mul(r.value), self.bits)
    }

    // division and remainder require a non-zero divisor
    pub fn udiv(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.value / r.value, self.bits)
    }

    pub fn sdiv(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.to_i64().wrapping_div(r.to_i64()) as u64, self.bits)
    }

    pub fn urem(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.value % r.value, self.bits)
    }

    pub fn srem(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.to_i64().wrapping_rem(r.to_i64()) as u64, self.bits)
    }

    pub fn and(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.value & r.value, self.bits)
    }

    pub fn or(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.value | r.value, self.bits)
    }

    pub fn xor(&self, r: &BitVec) -> BitVec {
        BitVec::new(self.value ^ r.value, self.bits)
    }

    pub fn shl(&self, r: &BitVec) -> BitVec {
        if r.value >= self.bits as u64 {
            BitVec::zero(self.bits)
        } else {
            BitVec::new(self.value << r.value, self.bits)
        }
    }

    pub fn lshr(&self, r: &BitVec) -> BitVec {
        if r.value >= self.bits as u64 {
            BitVec::zero(self.bits)
        } else {
            BitVec::new(self.value >> r.value, self.bits)
        }
    }

    pub fn ashr(&self, r: &BitVec) -> BitVec {
        let shift = (r.value).min(self.bits as u64 - 1) as u32;
        BitVec::new((self.to_i64() >> shift) as u64, self.bits)
    }

    pub fn zext(&self, bits: u32) -> BitVec {
        assert!(bits >= self.bits);
        BitVec::new(self.value, bits)
    }

    pub fn sext(&self, bits: u32) -> BitVec {
        assert!(bits >= self.bits);
        BitVec::new(self.to_i64() as u64, bits)
    }

    pub fn extract(&self, bit_off: u32, bits: u32) -> BitVec {
        assert!(bit_off + bits <= self.bits);
        BitVec::new(self.value >> bit_off, bits)
    }

    // self supplies the high bits
    pub fn concat(&self, lo: &BitVec) -> BitVec {
        let bits = self.bits + lo.bits;
        assert!(bits <= 64, "constant concat wider than 64 bits");
        BitVec::new((self.value << lo.bits) | lo.value, bits)
    }

    pub fn ult(&self, r: &BitVec) -> bool {
        self.value < r.value
    }

    pub fn ule(&self, r: &BitVec) -> bool {
        self.value <= r.value
    }

    pub fn slt(&self, r: &BitVec) -> bool {
        self.to_i64() < r.to_i64()
    }

    pub fn sle(&self, r: &BitVec) -> bool {
        self.to_i64() <= r.to_i64()
    }
}

/// A process-unique free symbolic variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IVar(u64, u32);

impl fmt::Display for IVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ivar{:x}:{}", self.id(), self.bits())
    }
}

impl IVar {
    pub fn new(bits: u32) -> Self {
        Self(IVAR_FACTORY.fetch_add(1, SeqCst), bits)
    }

    pub fn bits(&self) -> u32 {
        self.1
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// The root of an update list: either a constant byte array (every index
/// maps to a known byte) or a fresh symbolic array.
#[derive(Debug)]
pub struct Array {
    id: u64,
    name: String,
    size: usize,
    init: Option<Arc<Vec<u8>>>,
}

impl Array {
    pub fn symbolic<S: Into<String>>(name: S, size: usize) -> Arc<Self> {
        Arc::new(Self {
            id: ARRAY_FACTORY.fetch_add(1, SeqCst),
            name: name.into(),
            size,
            init: None,
        })
    }

    pub fn constant<S: Into<String>>(name: S, bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            id: ARRAY_FACTORY.fetch_add(1, SeqCst),
            name: name.into(),
            size: bytes.len(),
            init: Some(Arc::new(bytes)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn init(&self) -> Option<&[u8]> {
        self.init.as_deref().map(|v| v.as_slice())
    }

    pub fn is_symbolic(&self) -> bool {
        self.init.is_none()
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Array {}

impl PartialOrd for Array {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Array {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for Array {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug)]
struct UpdateNode {
    id: u64,
    index: SymExpr,
    value: SymExpr,
    next: Option<Arc<UpdateNode>>,
}

/// A persistent sequence of `(index, value)` writes layered over a root
/// array. Cloning shares the spine; pushing never disturbs other clones.
#[derive(Debug, Clone)]
pub struct UpdateList {
    root: Arc<Array>,
    head: Option<Arc<UpdateNode>>,
    length: usize,
}

impl UpdateList {
    pub fn new(root: Arc<Array>) -> Self {
        Self { root, head: None, length: 0 }
    }

    pub fn root(&self) -> &Arc<Array> {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn push(&mut self, index: SymExpr, value: SymExpr) {
        assert_eq!(index.bits(), INDEX_WIDTH);
        assert_eq!(value.bits(), 8);
        self.head = Some(Arc::new(UpdateNode {
            id: UPDATE_FACTORY.fetch_add(1, SeqCst),
            index,
            value,
            next: self.head.take(),
        }));
        self.length += 1;
    }

    /// Updates from most recent to oldest.
    pub fn iter(&self) -> Updates<'_> {
        Updates(self.head.as_deref())
    }

    // Update lists are identity-keyed: nodes and arrays carry
    // process-unique ids, so equal keys imply identical content.
    fn key(&self) -> (u64, u64) {
        (self.root.id, self.head.as_ref().map(|n| n.id + 1).unwrap_or(0))
    }
}

pub struct Updates<'a>(Option<&'a UpdateNode>);

impl<'a> Iterator for Updates<'a> {
    type Item = (&'a SymExpr, &'a SymExpr);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.0?;
        self.0 = node.next.as_deref();
        Some((&node.index, &node.value))
    }
}

impl PartialEq for UpdateList {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for UpdateList {}

impl PartialOrd for UpdateList {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UpdateList {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for UpdateList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::UDiv => "/",
            BinOp::SDiv => "s/",
            BinOp::URem => "%",
            BinOp::SRem => "s%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::LShr => ">>",
            BinOp::AShr => "s>>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpOp {
    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Ult => "<",
            CmpOp::Ule => "<=",
            CmpOp::Ugt => ">",
            CmpOp::Uge => ">=",
            CmpOp::Slt => "s<",
            CmpOp::Sle => "s<=",
            CmpOp::Sgt => "s>",
            CmpOp::Sge => "s>=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SymExpr(HConsed<Expr>);

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

impl Deref for SymExpr {
    type Target = Expr;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<BitVec> for SymExpr {
    fn from(v: BitVec) -> Self {
        SymExpr::val(v)
    }
}

impl From<IVar> for SymExpr {
    fn from(v: IVar) -> Self {
        SymExpr::ivar(v)
    }
}

impl From<Expr> for SymExpr {
    fn from(e: Expr) -> Self {
        Self(EXPR.mk(e))
    }
}

impl From<HConsed<Expr>> for SymExpr {
    fn from(e: HConsed<Expr>) -> Self {
        Self(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    Val(BitVec),
    IVar(IVar),

    Read(UpdateList, SymExpr), // ARRAY[ix] -> byte

    BinOp(BinOp, SymExpr, SymExpr), // T * T -> T
    Cmp(CmpOp, SymExpr, SymExpr),   // T * T -> i1

    ZExt(SymExpr, u32),
    SExt(SymExpr, u32),
    Extract(SymExpr, u32, u32), // T[off..off+width) -> width

    Concat(SymExpr, SymExpr), // hi * lo

    Select(SymExpr, SymExpr, SymExpr), // i1 * T * T -> T
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Val(v) => write!(f, "{}", v),
            Expr::IVar(v) => write!(f, "{}", v),
            Expr::Read(ul, ix) => write!(f, "{}[{}]", ul.root().name(), ix),
            Expr::BinOp(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::Cmp(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::ZExt(e, w) => write!(f, "({} as u{})", e, w),
            Expr::SExt(e, w) => write!(f, "({} as i{})", e, w),
            Expr::Extract(e, off, w) => write!(f, "extract({}, off={}, width={})", e, off, w),
            Expr::Concat(hi, lo) => write!(f, "({} ++ {})", hi, lo),
            Expr::Select(c, t, e) => write!(f, "(if {} then {} else {})", c, t, e),
        }
    }
}

impl SymExpr {
    pub fn val(v: BitVec) -> SymExpr {
        EXPR.mk(Expr::Val(v)).into()
    }

    pub fn constant(value: u64, bits: u32) -> SymExpr {
        Self::val(BitVec::new(value, bits))
    }

    pub fn zero(bits: u32) -> SymExpr {
        Self::val(BitVec::zero(bits))
    }

    pub fn one(bits: u32) -> SymExpr {
        Self::val(BitVec::one(bits))
    }

    pub fn from_bool(b: bool) -> SymExpr {
        Self::constant(b as u64, 1)
    }

    pub fn ivar(v: IVar) -> SymExpr {
        EXPR.mk(Expr::IVar(v)).into()
    }

    /// Array-theory read. A constant index is resolved through the update
    /// list: a matching constant update yields its value, a mismatching
    /// one is skipped, a symbolic update index stops the walk; past the
    /// last update a constant-rooted array resolves the byte at the root.
    pub fn read(updates: UpdateList, index: SymExpr) -> SymExpr {
        assert_eq!(index.bits(), INDEX_WIDTH);

        if let Some(ix) = index.as_val() {
            let mut resolvable = true;
            for (uix, uval) in updates.iter() {
                match uix.as_val() {
                    Some(u) if u.to_u64() == ix.to_u64() => return uval.clone(),
                    Some(_) => continue,
                    None => {
                        resolvable = false;
                        break;
                    }
                }
            }
            if resolvable {
                if let Some(init) = updates.root().init() {
                    if let Some(b) = init.get(ix.to_u64() as usize) {
                        return Self::constant(*b as u64, 8);
                    }
                }
            }
        }

        EXPR.mk(Expr::Read(updates, index)).into()
    }

    pub fn lift_binop(op: BinOp, l: SymExpr, r: SymExpr) -> SymExpr {
        assert_eq!(l.bits(), r.bits());

        EXPR.mk(Expr::BinOp(op, l, r)).into()
    }

    pub fn lift_cmp(op: CmpOp, l: SymExpr, r: SymExpr) -> SymExpr {
        assert_eq!(l.bits(), r.bits());

        EXPR.mk(Expr::Cmp(op, l, r)).into()
    }

    pub fn add(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() {
            r
        } else if r.is_zero() {
            l
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.add(&rv))
        } else {
            Self::lift_binop(BinOp::Add, l, r)
        }
    }

    pub fn sub(l: SymExpr, r: SymExpr) -> SymExpr {
        if r.is_zero() {
            l
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.sub(&rv))
        } else {
            Self::lift_binop(BinOp::Sub, l, r)
        }
    }

    pub fn mul(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() || r.is_zero() {
            Self::zero(l.bits())
        } else if r.is_one() {
            l
        } else if l.is_one() {
            r
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.mul(&rv))
        } else {
            Self::lift_binop(BinOp::Mul, l, r)
        }
    }

    pub fn udiv(l: SymExpr, r: SymExpr) -> SymExpr {
        if r.is_one() {
            l
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            if rv.is_zero() {
                Self::lift_binop(BinOp::UDiv, l, r)
            } else {
                Self::val(lv.udiv(&rv))
            }
        } else {
            Self::lift_binop(BinOp::UDiv, l, r)
        }
    }

    pub fn sdiv(l: SymExpr, r: SymExpr) -> SymExpr {
        if r.is_one() {
            l
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            if rv.is_zero() {
                Self::lift_binop(BinOp::SDiv, l, r)
            } else {
                Self::val(lv.sdiv(&rv))
            }
        } else {
            Self::lift_binop(BinOp::SDiv, l, r)
        }
    }

    pub fn urem(l: SymExpr, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            if rv.is_zero() {
                Self::lift_binop(BinOp::URem, l, r)
            } else {
                Self::val(lv.urem(&rv))
            }
        } else {
            Self::lift_binop(BinOp::URem, l, r)
        }
    }

    pub fn srem(l: SymExpr, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            if rv.is_zero() {
                Self::lift_binop(BinOp::SRem, l, r)
            } else {
                Self::val(lv.srem(&rv))
            }
        } else {
            Self::lift_binop(BinOp::SRem, l, r)
        }
    }

    pub fn and(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() || r.is_ones() {
            l
        } else if r.is_zero() || l.is_ones() {
            r
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.and(&rv))
        } else {
            Self::lift_binop(BinOp::And, l, r)
        }
    }

    pub fn or(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() || r.is_ones() {
            r
        } else if r.is_zero() || l.is_ones() {
            l
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.or(&rv))
        } else {
            Self::lift_binop(BinOp::Or, l, r)
        }
    }

    pub fn xor(l: SymExpr, r: SymExpr) -> SymExpr {
        if l == r {
            Self::zero(l.bits())
        } else if r.is_zero() {
            l
        } else if l.is_zero() {
            r
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.xor(&rv))
        } else {
            Self::lift_binop(BinOp::Xor, l, r)
        }
    }

    pub fn shl(l: SymExpr, r: SymExpr) -> SymExpr {
        if r.is_zero() || l.is_zero() {
            l
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.shl(&rv))
        } else {
            Self::lift_binop(BinOp::Shl, l, r)
        }
    }

    pub fn lshr(l: SymExpr, r: SymExpr) -> SymExpr {
        if r.is_zero() || l.is_zero() {
            l
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.lshr(&rv))
        } else {
            Self::lift_binop(BinOp::LShr, l, r)
        }
    }

    pub fn ashr(l: SymExpr, r: SymExpr) -> SymExpr {
        if r.is_zero() || l.is_zero() {
            l
        } else if let (Some(lv), Some(rv)) = (l.as_val(), r.as_val()) {
            Self::val(lv.ashr(&rv))
        } else {
            Self::lift_binop(BinOp::AShr, l, r)
        }
    }

    pub fn eq(self, r: SymExpr) -> SymExpr {
        if self == r {
            // trivial
            Self::from_bool(true)
        } else if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(lv == rv)
        } else {
            Self::lift_cmp(CmpOp::Eq, self, r)
        }
    }

    pub fn ne(self, r: SymExpr) -> SymExpr {
        if self == r {
            // trivial
            Self::from_bool(false)
        } else if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(lv != rv)
        } else {
            Self::lift_cmp(CmpOp::Ne, self, r)
        }
    }

    pub fn ult(self, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(lv.ult(&rv))
        } else {
            Self::lift_cmp(CmpOp::Ult, self, r)
        }
    }

    pub fn ule(self, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(lv.ule(&rv))
        } else {
            Self::lift_cmp(CmpOp::Ule, self, r)
        }
    }

    pub fn ugt(self, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(rv.ult(&lv))
        } else {
            Self::lift_cmp(CmpOp::Ugt, self, r)
        }
    }

    pub fn uge(self, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(rv.ule(&lv))
        } else {
            Self::lift_cmp(CmpOp::Uge, self, r)
        }
    }

    pub fn slt(self, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(lv.slt(&rv))
        } else {
            Self::lift_cmp(CmpOp::Slt, self, r)
        }
    }

    pub fn sle(self, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(lv.sle(&rv))
        } else {
            Self::lift_cmp(CmpOp::Sle, self, r)
        }
    }

    pub fn sgt(self, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(rv.slt(&lv))
        } else {
            Self::lift_cmp(CmpOp::Sgt, self, r)
        }
    }

    pub fn sge(self, r: SymExpr) -> SymExpr {
        if let (Some(lv), Some(rv)) = (self.as_val(), r.as_val()) {
            Self::from_bool(rv.sle(&lv))
        } else {
            Self::lift_cmp(CmpOp::Sge, self, r)
        }
    }

    /// Zero extend *to* `bits`; narrower targets truncate.
    pub fn zext(self, bits: u32) -> SymExpr {
        if bits == self.bits() {
            self
        } else if bits < self.bits() {
            self.extract(0, bits)
        } else if let Some(v) = self.as_val() {
            Self::val(v.zext(bits))
        } else {
            EXPR.mk(Expr::ZExt(self, bits)).into()
        }
    }

    /// Sign extend *to* `bits`; narrower targets truncate.
    pub fn sext(self, bits: u32) -> SymExpr {
        if bits == self.bits() {
            self
        } else if bits < self.bits() {
            self.extract(0, bits)
        } else if let Some(v) = self.as_val() {
            Self::val(v.sext(bits))
        } else {
            EXPR.mk(Expr::SExt(self, bits)).into()
        }
    }

    pub fn extract(self, bit_off: u32, bits: u32) -> SymExpr {
        assert!(bits >= 1 && bit_off + bits <= self.bits());

        if bits == self.bits() {
            return self;
        }
        if let Some(v) = self.as_val() {
            return Self::val(v.extract(bit_off, bits));
        }
        if let Expr::Extract(inner, off, _) = &*self {
            let (inner, off) = (inner.clone(), *off);
            return inner.extract(off + bit_off, bits);
        }
        // slices confined to one side of a concat collapse to that side
        if let Expr::Concat(hi, lo) = &*self {
            if bit_off + bits <= lo.bits() {
                let lo = lo.clone();
                return lo.extract(bit_off, bits);
            } else if bit_off >= lo.bits() {
                let (hi, lo_bits) = (hi.clone(), lo.bits());
                return hi.extract(bit_off - lo_bits, bits);
            }
        }
        if let Expr::ZExt(inner, _) = &*self {
            if bit_off + bits <= inner.bits() {
                let inner = inner.clone();
                return inner.extract(bit_off, bits);
            }
            if bit_off >= inner.bits() {
                return Self::zero(bits);
            }
        }
        if let Expr::SExt(inner, _) = &*self {
            if bit_off + bits <= inner.bits() {
                let inner = inner.clone();
                return inner.extract(bit_off, bits);
            }
        }
        EXPR.mk(Expr::Extract(self, bit_off, bits)).into()
    }

    // self supplies the high bits
    pub fn concat(self, lo: SymExpr) -> SymExpr {
        if self.bits() + lo.bits() <= 64 {
            if let (Some(hv), Some(lv)) = (self.as_val(), lo.as_val()) {
                return Self::val(hv.concat(&lv));
            }
        }
        EXPR.mk(Expr::Concat(self, lo)).into()
    }

    pub fn select(cond: SymExpr, texpr: SymExpr, fexpr: SymExpr) -> SymExpr {
        assert_eq!(cond.bits(), 1);
        assert_eq!(texpr.bits(), fexpr.bits());

        if let Some(c) = cond.as_val() {
            if c.is_zero() { fexpr } else { texpr }
        } else if texpr == fexpr {
            texpr
        } else {
            EXPR.mk(Expr::Select(cond, texpr, fexpr)).into()
        }
    }

    pub fn bits(&self) -> u32 {
        match &**self {
            Expr::Val(v) => v.bits(),
            Expr::IVar(v) => v.bits(),
            Expr::Read(_, _) => 8,
            Expr::BinOp(_, l, _) => l.bits(),
            Expr::Cmp(_, _, _) => 1,
            Expr::ZExt(_, w) | Expr::SExt(_, w) => *w,
            Expr::Extract(_, _, w) => *w,
            Expr::Concat(hi, lo) => hi.bits() + lo.bits(),
            Expr::Select(_, t, _) => t.bits(),
        }
    }

    pub fn as_val(&self) -> Option<BitVec> {
        match &**self {
            Expr::Val(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(&**self, Expr::Val(_))
    }

    pub fn is_zero(&self) -> bool {
        matches!(&**self, Expr::Val(v) if v.is_zero())
    }

    pub fn is_one(&self) -> bool {
        matches!(&**self, Expr::Val(v) if v.is_one())
    }

    pub fn is_ones(&self) -> bool {
        matches!(&**self, Expr::Val(v) if v.is_ones())
    }

    pub fn is_true(&self) -> bool {
        self.bits() == 1 && self.is_one()
    }

    pub fn is_false(&self) -> bool {
        self.bits() == 1 && self.is_zero()
    }
}

impl Add for SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: Self) -> Self::Output {
        SymExpr::add(self, rhs)
    }
}

impl Sub for SymExpr {
    type Output = SymExpr;

    fn sub(self, rhs: Self) -> Self::Output {
        SymExpr::sub(self, rhs)
    }
}

impl Mul for SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: Self) -> Self::Output {
        SymExpr::mul(self, rhs)
    }
}

impl BitAnd for SymExpr {
    type Output = SymExpr;

    fn bitand(self, rhs: Self) -> Self::Output {
        SymExpr::and(self, rhs)
    }
}

impl BitOr for SymExpr {
    type Output = SymExpr;

    fn bitor(self, rhs: Self) -> Self::Output {
        SymExpr::or(self, rhs)
    }
}

impl BitXor for SymExpr {
    type Output = SymExpr;

    fn bitxor(self, rhs: Self) -> Self::Output {
        SymExpr::xor(self, rhs)
    }
}
