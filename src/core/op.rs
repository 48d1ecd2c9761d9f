//! Operation codes.
//!
//! [`Op`] covers the generic operations understood by every back end plus the
//! amd64 pseudo-ops (`Cmp`, `Test`, `Lea`, `Jcc`, `Setcc`) that only appear in
//! lowered code. The predicates here drive canonicalization and lowering.

use std::fmt;

use super::kind::Kind;

/// Flag condition tested by a conditional jump or set instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl Cond {
    /// Condition for a comparison op applied to operands of `kind`.
    pub fn from_comparison(op: Op, kind: Kind) -> Option<Cond> {
        let unsigned = kind.is_unsigned_word();
        Some(match op {
            Op::Eql => Cond::Eq,
            Op::Neq => Cond::Ne,
            Op::Lss if unsigned => Cond::Ult,
            Op::Leq if unsigned => Cond::Ule,
            Op::Gtr if unsigned => Cond::Ugt,
            Op::Geq if unsigned => Cond::Uge,
            Op::Lss => Cond::Lt,
            Op::Leq => Cond::Le,
            Op::Gtr => Cond::Gt,
            Op::Geq => Cond::Ge,
            _ => return None,
        })
    }

    /// Condition that holds after the compared operands trade places.
    pub fn swapped(self) -> Cond {
        match self {
            Cond::Eq | Cond::Ne => self,
            Cond::Lt => Cond::Gt,
            Cond::Gt => Cond::Lt,
            Cond::Le => Cond::Ge,
            Cond::Ge => Cond::Le,
            Cond::Ult => Cond::Ugt,
            Cond::Ugt => Cond::Ult,
            Cond::Ule => Cond::Uge,
            Cond::Uge => Cond::Ule,
        }
    }

    pub fn negated(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ult => Cond::Uge,
            Cond::Uge => Cond::Ult,
            Cond::Ule => Cond::Ugt,
            Cond::Ugt => Cond::Ule,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Cond::Eq => "e",
            Cond::Ne => "ne",
            Cond::Lt => "l",
            Cond::Le => "le",
            Cond::Gt => "g",
            Cond::Ge => "ge",
            Cond::Ult => "b",
            Cond::Ule => "be",
            Cond::Ugt => "a",
            Cond::Uge => "ae",
        }
    }
}

/// Operation code identifying what a node computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // unary
    Neg,
    Inv,
    LNot,
    Inc,
    Dec,
    Zero,
    Cast,
    Jump,

    // binary
    Add,
    Sub,
    Mul,
    Quo,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    Eql,
    Neq,
    Lss,
    Leq,
    Gtr,
    Geq,
    LAnd,
    LOr,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    QuoAssign,
    RemAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    AndNotAssign,
    ShlAssign,
    ShrAssign,
    JumpIf,

    // tuple and call
    Ret,
    Call,

    // amd64 pseudo-ops
    Cmp,
    Test,
    Lea,
    Jcc(Cond),
    Setcc(Cond),
    Push,
    Pop,
}

impl Op {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Op::Add | Op::Mul | Op::And | Op::Or | Op::Xor | Op::Eql | Op::Neq
        )
    }

    /// Op to use after swapping the operands, if the operands may be swapped.
    pub fn swapped(self) -> Option<Op> {
        match self {
            _ if self.is_commutative() => Some(self),
            Op::Lss => Some(Op::Gtr),
            Op::Gtr => Some(Op::Lss),
            Op::Leq => Some(Op::Geq),
            Op::Geq => Some(Op::Leq),
            _ => None,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Op::Eql | Op::Neq | Op::Lss | Op::Leq | Op::Gtr | Op::Geq
        )
    }

    /// Logical negation of a comparison: `!(a < b)` is `a >= b`.
    pub fn negated(self) -> Option<Op> {
        Some(match self {
            Op::Eql => Op::Neq,
            Op::Neq => Op::Eql,
            Op::Lss => Op::Geq,
            Op::Geq => Op::Lss,
            Op::Leq => Op::Gtr,
            Op::Gtr => Op::Leq,
            _ => return None,
        })
    }

    /// Ops whose first operand must be an assignable Reg or Mem.
    pub fn is_assign(self) -> bool {
        matches!(
            self,
            Op::Assign | Op::Inc | Op::Dec | Op::Zero | Op::Setcc(_)
        ) || self.assign_to_binary().is_some()
    }

    /// `AddAssign` to `Add` and so on.
    pub fn assign_to_binary(self) -> Option<Op> {
        Some(match self {
            Op::AddAssign => Op::Add,
            Op::SubAssign => Op::Sub,
            Op::MulAssign => Op::Mul,
            Op::QuoAssign => Op::Quo,
            Op::RemAssign => Op::Rem,
            Op::AndAssign => Op::And,
            Op::OrAssign => Op::Or,
            Op::XorAssign => Op::Xor,
            Op::AndNotAssign => Op::AndNot,
            Op::ShlAssign => Op::Shl,
            Op::ShrAssign => Op::Shr,
            _ => return None,
        })
    }

    pub fn binary_to_assign(self) -> Option<Op> {
        Some(match self {
            Op::Add => Op::AddAssign,
            Op::Sub => Op::SubAssign,
            Op::Mul => Op::MulAssign,
            Op::Quo => Op::QuoAssign,
            Op::Rem => Op::RemAssign,
            Op::And => Op::AndAssign,
            Op::Or => Op::OrAssign,
            Op::Xor => Op::XorAssign,
            Op::AndNot => Op::AndNotAssign,
            Op::Shl => Op::ShlAssign,
            Op::Shr => Op::ShrAssign,
            _ => return None,
        })
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Op::Jump | Op::JumpIf | Op::Jcc(_))
    }

    /// Ops that change state beyond producing a value.
    pub fn has_side_effects(self) -> bool {
        self.is_assign()
            || self.is_jump()
            || matches!(self, Op::Ret | Op::Call | Op::Cmp | Op::Test | Op::Push | Op::Pop)
    }

    pub fn is_arch_specific(self) -> bool {
        matches!(
            self,
            Op::Cmp | Op::Test | Op::Lea | Op::Jcc(_) | Op::Setcc(_) | Op::Push | Op::Pop
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Neg => "-",
            Op::Inv => "^",
            Op::LNot => "!",
            Op::Inc => "++",
            Op::Dec => "--",
            Op::Zero => "ZERO",
            Op::Cast => "CAST",
            Op::Jump => "JUMP",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Quo => "/",
            Op::Rem => "%",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "^",
            Op::AndNot => "&^",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::Eql => "==",
            Op::Neq => "!=",
            Op::Lss => "<",
            Op::Leq => "<=",
            Op::Gtr => ">",
            Op::Geq => ">=",
            Op::LAnd => "&&",
            Op::LOr => "||",
            Op::Assign => "=",
            Op::AddAssign => "+=",
            Op::SubAssign => "-=",
            Op::MulAssign => "*=",
            Op::QuoAssign => "/=",
            Op::RemAssign => "%=",
            Op::AndAssign => "&=",
            Op::OrAssign => "|=",
            Op::XorAssign => "^=",
            Op::AndNotAssign => "&^=",
            Op::ShlAssign => "<<=",
            Op::ShrAssign => ">>=",
            Op::JumpIf => "JUMP_IF",
            Op::Ret => "RET",
            Op::Call => "CALL",
            Op::Cmp => "CMP",
            Op::Test => "TEST",
            Op::Lea => "LEA",
            Op::Jcc(_) => "J",
            Op::Setcc(_) => "SET",
            Op::Push => "PUSH",
            Op::Pop => "POP",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Jcc(c) | Op::Setcc(c) => write!(f, "{}{}", self.name(), c.suffix().to_uppercase()),
            _ => f.write_str(self.name()),
        }
    }
}
