// This module defines the expression IR: a closed tagged union of node kinds (constant,
// register, memory, label, unary, binary, tuple, call) forming a tree in which every node
// owns its children. All construction goes through checked constructors that validate
// operand Kinds against the op table, fold constant operands into a single Const with
// width-correct wrapping, and canonicalize swappable binary nodes so that operands of a
// weaker Class (registers first, constants last) always sit on the left. Logical-not of a
// comparison is rewritten into the negated comparison. Lowered code reuses the same tree
// through crate-private raw constructors that skip validation, since amd64 pseudo-ops and
// resolved operand forms do not follow the generic table. Register ids come in two disjoint
// ranges: soft (virtual) ids numbered from SOFT_REG_FIRST, and hard ids that pair an
// architecture with a small register index.

//! Expression IR with construction-time checking.

use std::fmt;

use super::arch::ArchId;
use super::constant::Const;
use super::error::{CompileError, CompileResult};
use super::func::Signature;
use super::kind::Kind;
use super::label::Label;
use super::op::Op;

/// First soft register id. Hard register indices are always below it.
pub const SOFT_REG_FIRST: u32 = 0x100;

/// Physical register of one architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardReg {
    arch: ArchId,
    index: u8,
}

impl HardReg {
    pub const fn new(arch: ArchId, index: u8) -> Self {
        Self { arch, index }
    }

    pub const fn arch(self) -> ArchId {
        self.arch
    }

    pub const fn index(self) -> u8 {
        self.index
    }
}

impl fmt::Display for HardReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.arch, self.index)
    }
}

/// Register identifier: virtual until allocation, physical afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegId {
    Soft(u32),
    Hard(HardReg),
}

impl RegId {
    pub fn is_soft(self) -> bool {
        matches!(self, RegId::Soft(_))
    }

    /// Flat numeric id; soft and hard ranges never overlap.
    pub fn raw(self) -> u32 {
        match self {
            RegId::Soft(id) => id,
            RegId::Hard(reg) => reg.index as u32,
        }
    }

    pub fn hard(self) -> Option<HardReg> {
        match self {
            RegId::Hard(reg) => Some(reg),
            RegId::Soft(_) => None,
        }
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegId::Soft(id) => write!(f, "s{id}"),
            RegId::Hard(reg) => write!(f, "{reg}"),
        }
    }
}

/// Register reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    kind: Kind,
    id: RegId,
    read_only: bool,
}

impl Reg {
    pub fn new(kind: Kind, id: RegId) -> Self {
        Self {
            kind,
            id,
            read_only: false,
        }
    }

    pub fn hard(kind: Kind, reg: HardReg) -> Self {
        Self::new(kind, RegId::Hard(reg))
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Same register viewed with another kind.
    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn id(&self) -> RegId {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Resolved addressing record: `base + index*scale + disp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AddrMode {
    base: Option<HardReg>,
    index: Option<HardReg>,
    scale: u8,
    disp: i32,
}

impl AddrMode {
    pub fn new(
        base: Option<HardReg>,
        index: Option<HardReg>,
        scale: u8,
        disp: i32,
    ) -> CompileResult<Self> {
        if !matches!(scale, 1 | 2 | 4 | 8) {
            return Err(CompileError::FieldOverflow {
                what: "address scale",
                value: scale as i64,
                bits: 2,
            });
        }
        Ok(Self {
            base,
            index,
            scale,
            disp,
        })
    }

    pub fn base_disp(base: HardReg, disp: i32) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            disp,
        }
    }

    pub fn base(&self) -> Option<HardReg> {
        self.base
    }

    pub fn index(&self) -> Option<HardReg> {
        self.index
    }

    pub fn scale(&self) -> u8 {
        self.scale.max(1)
    }

    pub fn disp(&self) -> i32 {
        self.disp
    }

    pub fn uses(&self, reg: HardReg) -> bool {
        self.base == Some(reg) || self.index == Some(reg)
    }
}

impl fmt::Display for AddrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(base) = self.base {
            parts.push(base.to_string());
        }
        if let Some(index) = self.index {
            parts.push(format!("{}*{}", index, self.scale()));
        }
        if self.disp != 0 || parts.is_empty() {
            parts.push(self.disp.to_string());
        }
        write!(f, "[{}]", parts.join(" + "))
    }
}

/// Address of a memory operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Address {
    /// Pointer-kind sub-expression, as built by a front end.
    Expr(Box<Expr>),
    /// Resolved addressing record, as produced by lowering.
    Mode(AddrMode),
}

/// Addressable memory location.
#[derive(Debug, Clone, PartialEq)]
pub struct Mem {
    kind: Kind,
    read_only: bool,
    addr: Address,
}

impl Mem {
    /// Memory at the address computed by `addr`, which must be pointer-kind.
    pub fn new(kind: Kind, addr: Expr) -> CompileResult<Self> {
        if !addr.kind().is_pointer() || kind.is_void() {
            return Err(CompileError::InvalidAddress {
                kind,
                addr: addr.kind(),
            });
        }
        Ok(Self {
            kind,
            read_only: false,
            addr: Address::Expr(Box::new(addr)),
        })
    }

    pub fn at(kind: Kind, mode: AddrMode) -> Self {
        Self {
            kind,
            read_only: false,
            addr: Address::Mode(mode),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn addr(&self) -> &Address {
        &self.addr
    }

    pub fn mode(&self) -> Option<&AddrMode> {
        match &self.addr {
            Address::Mode(mode) => Some(mode),
            Address::Expr(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    op: Op,
    kind: Kind,
    x: Expr,
}

impl UnaryExpr {
    pub fn op(&self) -> Op {
        self.op
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn x(&self) -> &Expr {
        &self.x
    }

    pub fn into_parts(self) -> (Op, Kind, Expr) {
        (self.op, self.kind, self.x)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    op: Op,
    kind: Kind,
    x: Expr,
    y: Expr,
}

impl BinaryExpr {
    pub fn op(&self) -> Op {
        self.op
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn x(&self) -> &Expr {
        &self.x
    }

    pub fn y(&self) -> &Expr {
        &self.y
    }

    pub fn into_parts(self) -> (Op, Kind, Expr, Expr) {
        (self.op, self.kind, self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleExpr {
    op: Op,
    list: Vec<Expr>,
}

impl TupleExpr {
    pub fn op(&self) -> Op {
        self.op
    }

    pub fn list(&self) -> &[Expr] {
        &self.list
    }

    pub fn into_list(self) -> Vec<Expr> {
        self.list
    }
}

/// Call of a function known by its entry label.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    callee: Label,
    name: Option<String>,
    sig: Signature,
    args: Vec<Expr>,
    kind: Kind,
}

impl CallExpr {
    pub fn callee(&self) -> Label {
        self.callee
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    pub fn args(&self) -> &[Expr] {
        &self.args
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }
}

/// Structural category used to order operands canonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Class {
    Reg,
    Mem,
    Unary,
    Binary,
    Tuple,
    Call,
    Label,
    Const,
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Const),
    Reg(Reg),
    Mem(Mem),
    Label(Label),
    Unary(Box<UnaryExpr>),
    Binary(Box<BinaryExpr>),
    Tuple(TupleExpr),
    Call(Box<CallExpr>),
}

impl From<Const> for Expr {
    fn from(c: Const) -> Self {
        Expr::Const(c)
    }
}

impl From<Reg> for Expr {
    fn from(r: Reg) -> Self {
        Expr::Reg(r)
    }
}

impl From<Mem> for Expr {
    fn from(m: Mem) -> Self {
        Expr::Mem(m)
    }
}

impl From<Label> for Expr {
    fn from(l: Label) -> Self {
        Expr::Label(l)
    }
}

fn kind_of(e: &Expr) -> Kind {
    e.kind()
}

impl Expr {
    pub fn kind(&self) -> Kind {
        match self {
            Expr::Const(c) => c.kind(),
            Expr::Reg(r) => r.kind(),
            Expr::Mem(m) => m.kind(),
            Expr::Label(_) => Kind::Ptr,
            Expr::Unary(u) => u.kind,
            Expr::Binary(b) => b.kind,
            Expr::Tuple(_) => Kind::Void,
            Expr::Call(c) => c.kind,
        }
    }

    pub fn class(&self) -> Class {
        match self {
            Expr::Const(_) => Class::Const,
            Expr::Reg(_) => Class::Reg,
            Expr::Mem(_) => Class::Mem,
            Expr::Label(_) => Class::Label,
            Expr::Unary(_) => Class::Unary,
            Expr::Binary(_) => Class::Binary,
            Expr::Tuple(_) => Class::Tuple,
            Expr::Call(_) => Class::Call,
        }
    }

    /// Op of a unary, binary, tuple or call node.
    pub fn op(&self) -> Option<Op> {
        match self {
            Expr::Unary(u) => Some(u.op),
            Expr::Binary(b) => Some(b.op),
            Expr::Tuple(t) => Some(t.op),
            Expr::Call(_) => Some(Op::Call),
            _ => None,
        }
    }

    pub fn child_count(&self) -> usize {
        match self {
            Expr::Mem(m) if matches!(m.addr, Address::Expr(_)) => 1,
            Expr::Unary(_) => 1,
            Expr::Binary(_) => 2,
            Expr::Tuple(t) => t.list.len(),
            Expr::Call(c) => c.args.len(),
            _ => 0,
        }
    }

    pub fn child(&self, index: usize) -> CompileResult<&Expr> {
        let found = match (self, index) {
            (Expr::Mem(m), 0) => match &m.addr {
                Address::Expr(addr) => Some(&**addr),
                Address::Mode(_) => None,
            },
            (Expr::Unary(u), 0) => Some(&u.x),
            (Expr::Binary(b), 0) => Some(&b.x),
            (Expr::Binary(b), 1) => Some(&b.y),
            (Expr::Tuple(t), i) => t.list.get(i),
            (Expr::Call(c), i) => c.args.get(i),
            _ => None,
        };
        found.ok_or(CompileError::IndexOutOfRange {
            what: "expression",
            index,
            len: self.child_count(),
        })
    }

    pub fn as_const(&self) -> Option<&Const> {
        match self {
            Expr::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_reg(&self) -> Option<&Reg> {
        match self {
            Expr::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_mem(&self) -> Option<&Mem> {
        match self {
            Expr::Mem(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<Label> {
        match self {
            Expr::Label(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_unary(&self) -> Option<&UnaryExpr> {
        match self {
            Expr::Unary(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryExpr> {
        match self {
            Expr::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// Writable Reg or Mem.
    pub fn is_assignable(&self) -> bool {
        match self {
            Expr::Reg(r) => !r.read_only,
            Expr::Mem(m) => !m.read_only,
            _ => false,
        }
    }

    /// True when evaluating the node only produces a value.
    ///
    /// Labels count as effects: at top level they mark a jump target.
    pub fn is_effect_free(&self) -> bool {
        match self {
            Expr::Const(_) | Expr::Reg(_) => true,
            Expr::Label(_) | Expr::Call(_) => false,
            Expr::Mem(m) => match &m.addr {
                Address::Expr(addr) => addr.is_effect_free(),
                Address::Mode(_) => true,
            },
            Expr::Unary(u) => !u.op.has_side_effects() && u.x.is_effect_free(),
            Expr::Binary(b) => {
                !b.op.has_side_effects() && b.x.is_effect_free() && b.y.is_effect_free()
            }
            Expr::Tuple(t) => {
                !t.op.has_side_effects() && t.list.iter().all(Expr::is_effect_free)
            }
        }
    }

    /// Visit every register reference in the tree, memory addresses included.
    pub fn for_each_reg(&self, f: &mut dyn FnMut(&Reg)) {
        match self {
            Expr::Reg(r) => f(r),
            Expr::Mem(m) => {
                if let Address::Expr(addr) = &m.addr {
                    addr.for_each_reg(f);
                }
            }
            Expr::Unary(u) => u.x.for_each_reg(f),
            Expr::Binary(b) => {
                b.x.for_each_reg(f);
                b.y.for_each_reg(f);
            }
            Expr::Tuple(t) => t.list.iter().for_each(|e| e.for_each_reg(f)),
            Expr::Call(c) => c.args.iter().for_each(|e| e.for_each_reg(f)),
            Expr::Const(_) | Expr::Label(_) => {}
        }
    }

    /// True if any node in the tree has the given op.
    pub fn contains_op(&self, op: Op) -> bool {
        if self.op() == Some(op) {
            return true;
        }
        match self {
            Expr::Mem(m) => match &m.addr {
                Address::Expr(addr) => addr.contains_op(op),
                Address::Mode(_) => false,
            },
            Expr::Unary(u) => u.x.contains_op(op),
            Expr::Binary(b) => b.x.contains_op(op) || b.y.contains_op(op),
            Expr::Tuple(t) => t.list.iter().any(|e| e.contains_op(op)),
            Expr::Call(c) => c.args.iter().any(|e| e.contains_op(op)),
            _ => false,
        }
    }

    // ==== CHECKED CONSTRUCTORS ====

    /// Unary node: validates, folds constants, and simplifies logical not.
    pub fn unary(op: Op, x: Expr) -> CompileResult<Expr> {
        let kind = check_unary(op, &x)?;
        if let Expr::Const(c) = &x {
            if matches!(op, Op::Neg | Op::Inv | Op::LNot) {
                return Ok(Expr::Const(Const::fold_unary(op, kind, *c)?));
            }
        }
        if op == Op::LNot {
            match x {
                Expr::Unary(u) if u.op == Op::LNot => return Ok(u.x),
                Expr::Binary(b) if b.op.is_comparison() => {
                    let float = b.x.kind().is_float();
                    if !float || matches!(b.op, Op::Eql | Op::Neq) {
                        if let Some(neg) = b.op.negated() {
                            return Ok(Expr::raw_binary(neg, Kind::Bool, b.x, b.y));
                        }
                    }
                    return Ok(Expr::raw_unary(op, kind, Expr::Binary(b)));
                }
                x => return Ok(Expr::raw_unary(op, kind, x)),
            }
        }
        Ok(Expr::raw_unary(op, kind, x))
    }

    /// Conversion of `x` to `kind`.
    pub fn cast(kind: Kind, x: Expr) -> CompileResult<Expr> {
        let from = x.kind();
        let ok = (from.is_number() && kind.is_number() && (!from.is_complex() || kind.is_complex()))
            || (from.is_integer() && kind.is_pointer())
            || (from.is_pointer() && (kind.is_integer() || kind.is_pointer()))
            || (from.is_bool() && (kind.is_integer() || kind.is_bool()));
        if !ok {
            return Err(CompileError::invalid_op(Op::Cast, &[from, kind]));
        }
        if from == kind {
            return Ok(x);
        }
        if let Expr::Const(c) = &x {
            return Ok(Expr::Const(Const::fold_unary(Op::Cast, kind, *c)?));
        }
        Ok(Expr::raw_unary(Op::Cast, kind, x))
    }

    /// Binary node: validates, folds constants, and canonicalizes operand order.
    pub fn binary(op: Op, x: Expr, y: Expr) -> CompileResult<Expr> {
        let kind = check_binary(op, &x, &y)?;
        if let (Expr::Const(a), Expr::Const(b)) = (&x, &y) {
            if !op.has_side_effects() {
                return Ok(Expr::Const(Const::fold_binary(op, *a, *b)?));
            }
        }
        if let (Op::LAnd | Op::LOr, Expr::Const(c)) = (op, &x) {
            let short = (op == Op::LAnd) != c.as_bool();
            return Ok(if short { x } else { y });
        }
        if let Some(swapped) = op.swapped() {
            if x.class() > y.class() {
                return Ok(Expr::raw_binary(swapped, kind, y, x));
            }
        }
        Ok(Expr::raw_binary(op, kind, x, y))
    }

    /// Tuple node. Only `Ret` is a tuple op; its values are checked by the
    /// enclosing function's signature.
    pub fn tuple(op: Op, list: Vec<Expr>) -> CompileResult<Expr> {
        if op != Op::Ret {
            return Err(CompileError::invalid_op(op, &list.iter().map(kind_of).collect::<Vec<_>>()));
        }
        if let Some(v) = list.iter().find(|e| e.kind().is_void()) {
            return Err(CompileError::invalid_op(op, &[v.kind()]));
        }
        Ok(Expr::Tuple(TupleExpr { op, list }))
    }

    /// Call of the function whose entry is `callee`.
    pub fn call(
        callee: Label,
        name: Option<&str>,
        sig: Signature,
        args: Vec<Expr>,
    ) -> CompileResult<Expr> {
        if args.len() != sig.num_params() {
            return Err(CompileError::SignatureMismatch {
                reason: format!(
                    "call passes {} arguments, signature takes {}",
                    args.len(),
                    sig.num_params()
                ),
            });
        }
        for (i, (arg, want)) in args.iter().zip(sig.params()).enumerate() {
            if arg.kind() != *want {
                return Err(CompileError::SignatureMismatch {
                    reason: format!("argument {i} is {}, signature wants {want}", arg.kind()),
                });
            }
        }
        let kind = match sig.results() {
            [] => Kind::Void,
            [k] => *k,
            many => {
                return Err(CompileError::SignatureMismatch {
                    reason: format!("call expression cannot yield {} results", many.len()),
                })
            }
        };
        Ok(Expr::Call(Box::new(CallExpr {
            callee,
            name: name.map(str::to_string),
            sig,
            args,
            kind,
        })))
    }

    pub fn assign(dst: Expr, src: Expr) -> CompileResult<Expr> {
        Expr::binary(Op::Assign, dst, src)
    }

    pub fn jump(label: Label) -> Expr {
        Expr::raw_unary(Op::Jump, Kind::Void, Expr::Label(label))
    }

    pub fn jump_if(label: Label, cond: Expr) -> CompileResult<Expr> {
        Expr::binary(Op::JumpIf, Expr::Label(label), cond)
    }

    pub fn ret(values: Vec<Expr>) -> CompileResult<Expr> {
        Expr::tuple(Op::Ret, values)
    }

    /// `kind` value at byte `offset` from the pointer `base`, e.g. a struct field.
    pub fn field(kind: Kind, base: Expr, offset: i32) -> CompileResult<Expr> {
        let addr = match offset {
            0 => base,
            off => Expr::binary(Op::Add, base, Const::ptr(off as i64 as u64).into())?,
        };
        Ok(Expr::Mem(Mem::new(kind, addr)?))
    }

    /// Element `index` of an array of `kind` values starting at the pointer `base`.
    pub fn index(kind: Kind, base: Expr, index: Expr) -> CompileResult<Expr> {
        if !index.kind().is_integer() || kind.is_void() {
            return Err(CompileError::invalid_op(Op::Mul, &[index.kind(), kind]));
        }
        let i = Expr::cast(Kind::Int64, index)?;
        let stride = Const::int64(i64::from(kind.size()));
        let offset = Expr::binary(Op::Mul, i, stride.into())?;
        let addr = Expr::binary(Op::Add, base, Expr::cast(Kind::Ptr, offset)?)?;
        Ok(Expr::Mem(Mem::new(kind, addr)?))
    }

    // ==== RAW CONSTRUCTORS FOR LOWERED CODE ====

    pub(crate) fn raw_unary(op: Op, kind: Kind, x: Expr) -> Expr {
        Expr::Unary(Box::new(UnaryExpr { op, kind, x }))
    }

    pub(crate) fn raw_binary(op: Op, kind: Kind, x: Expr, y: Expr) -> Expr {
        Expr::Binary(Box::new(BinaryExpr { op, kind, x, y }))
    }

    pub(crate) fn raw_tuple(op: Op, list: Vec<Expr>) -> Expr {
        Expr::Tuple(TupleExpr { op, list })
    }
}

fn check_unary(op: Op, x: &Expr) -> CompileResult<Kind> {
    let k = x.kind();
    let ok = match op {
        Op::Neg => k.is_number() || k.is_pointer(),
        Op::Inv => k.is_integer() || k.is_pointer(),
        Op::LNot => k.is_bool(),
        Op::Inc | Op::Dec => k.is_number() || k.is_pointer(),
        Op::Zero => !k.is_void(),
        Op::Jump => k.is_pointer(),
        _ => false,
    };
    if !ok {
        return Err(CompileError::invalid_op(op, &[k]));
    }
    if op.is_assign() && !x.is_assignable() {
        return Err(CompileError::NotAssignable {
            operand: x.to_string(),
        });
    }
    Ok(match op {
        Op::LNot => Kind::Bool,
        Op::Jump => Kind::Void,
        _ => k,
    })
}

fn check_binary(op: Op, x: &Expr, y: &Expr) -> CompileResult<Kind> {
    let (kx, ky) = (x.kind(), y.kind());
    let bad = || CompileError::invalid_op(op, &[kx, ky]);
    if op == Op::JumpIf {
        return if kx.is_pointer() && ky.is_bool() {
            Ok(Kind::Void)
        } else {
            Err(bad())
        };
    }
    let base = op.assign_to_binary().unwrap_or(op);
    let ok = match base {
        Op::Shl | Op::Shr => kx.is_integer() && ky.is_integer(),
        _ if kx != ky => false,
        Op::Assign => !kx.is_void(),
        Op::Add | Op::Sub => kx.is_number() || kx.is_pointer(),
        Op::Mul | Op::Quo => kx.is_number(),
        Op::Rem | Op::And | Op::Or | Op::Xor | Op::AndNot => kx.is_integer(),
        Op::Eql | Op::Neq => !kx.is_void(),
        Op::Lss | Op::Leq | Op::Gtr | Op::Geq => kx.is_ordered(),
        Op::LAnd | Op::LOr => kx.is_bool(),
        _ => false,
    };
    if !ok {
        return Err(bad());
    }
    if op.is_assign() && !x.is_assignable() {
        return Err(CompileError::NotAssignable {
            operand: x.to_string(),
        });
    }
    Ok(if base.is_comparison() || matches!(base, Op::LAnd | Op::LOr) {
        Kind::Bool
    } else {
        kx
    })
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Reg(r) => write!(f, "{}", r.id),
            Expr::Mem(m) => match &m.addr {
                Address::Expr(addr) => write!(f, "[{addr}]"),
                Address::Mode(mode) => write!(f, "{mode}"),
            },
            Expr::Label(l) => write!(f, "{l}"),
            Expr::Unary(u) if u.op == Op::Cast => write!(f, "(CAST {} {})", u.kind, u.x),
            Expr::Unary(u) => write!(f, "({} {})", u.op, u.x),
            Expr::Binary(b) => write!(f, "({} {} {})", b.op, b.x, b.y),
            Expr::Tuple(t) => {
                write!(f, "({}", t.op)?;
                for e in &t.list {
                    write!(f, " {e}")?;
                }
                write!(f, ")")
            }
            Expr::Call(c) => {
                write!(f, "(CALL {}", c.callee)?;
                for e in &c.args {
                    write!(f, " {e}")?;
                }
                write!(f, ")")
            }
        }
    }
}
