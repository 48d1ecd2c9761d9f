//! Compile-time constants and constant folding.
//!
//! A [`Const`] stores the raw bit pattern of its value in two 64-bit slots
//! (real and imaginary). The bits are kept canonical for the Kind: integers
//! are sign- or zero-extended to 64 bits, `float32` occupies the low half of
//! the slot, and only complex kinds use the imaginary slot. Two constants
//! with equal `(kind, bits)` are therefore equal values.

use std::fmt;

use super::error::{CompileError, CompileResult};
use super::kind::Kind;
use super::op::Op;

/// Immutable constant value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Const {
    kind: Kind,
    re: u64,
    im: u64,
}

fn normalize(kind: Kind, bits: u64) -> u64 {
    match kind {
        Kind::Void => 0,
        Kind::Bool => (bits != 0) as u64,
        k if k.is_signed() => {
            let shift = 64 - k.bits();
            (((bits << shift) as i64) >> shift) as u64
        }
        k if k.is_unsigned() && k.bits() < 64 => bits & ((1u64 << k.bits()) - 1),
        Kind::Float32 | Kind::Complex64 => bits & 0xffff_ffff,
        _ => bits,
    }
}

impl Const {
    /// Build a constant from raw bits, truncating them to the Kind.
    pub fn from_bits(kind: Kind, re: u64, im: u64) -> Self {
        let im = if kind.is_complex() { normalize(kind, im) } else { 0 };
        Self {
            kind,
            re: normalize(kind, re),
            im,
        }
    }

    /// Integer-valued constant of any non-complex kind.
    ///
    /// Integer kinds wrap the value to their width; float kinds convert it.
    pub fn of(kind: Kind, value: i64) -> Self {
        match kind {
            Kind::Float32 => Self::float32(value as f32),
            Kind::Float64 => Self::float64(value as f64),
            Kind::Complex64 => Self::complex64(value as f32, 0.0),
            Kind::Complex128 => Self::complex128(value as f64, 0.0),
            _ => Self::from_bits(kind, value as u64, 0),
        }
    }

    pub fn zero(kind: Kind) -> Self {
        Self::from_bits(kind, 0, 0)
    }

    pub fn bool(value: bool) -> Self {
        Self::from_bits(Kind::Bool, value as u64, 0)
    }

    pub fn int8(value: i8) -> Self {
        Self::of(Kind::Int8, value as i64)
    }

    pub fn int16(value: i16) -> Self {
        Self::of(Kind::Int16, value as i64)
    }

    pub fn int32(value: i32) -> Self {
        Self::of(Kind::Int32, value as i64)
    }

    pub fn int64(value: i64) -> Self {
        Self::of(Kind::Int64, value)
    }

    pub fn uint8(value: u8) -> Self {
        Self::from_bits(Kind::Uint8, value as u64, 0)
    }

    pub fn uint16(value: u16) -> Self {
        Self::from_bits(Kind::Uint16, value as u64, 0)
    }

    pub fn uint32(value: u32) -> Self {
        Self::from_bits(Kind::Uint32, value as u64, 0)
    }

    pub fn uint64(value: u64) -> Self {
        Self::from_bits(Kind::Uint64, value, 0)
    }

    pub fn ptr(value: u64) -> Self {
        Self::from_bits(Kind::Ptr, value, 0)
    }

    pub fn float32(value: f32) -> Self {
        Self::from_bits(Kind::Float32, value.to_bits() as u64, 0)
    }

    pub fn float64(value: f64) -> Self {
        Self::from_bits(Kind::Float64, value.to_bits(), 0)
    }

    pub fn complex64(re: f32, im: f32) -> Self {
        Self::from_bits(Kind::Complex64, re.to_bits() as u64, im.to_bits() as u64)
    }

    pub fn complex128(re: f64, im: f64) -> Self {
        Self::from_bits(Kind::Complex128, re.to_bits(), im.to_bits())
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Raw `(real, imaginary)` bit pattern.
    pub fn bits(&self) -> (u64, u64) {
        (self.re, self.im)
    }

    /// Value as a sign-extended integer (bit reinterpretation for unsigned kinds).
    pub fn as_i64(&self) -> i64 {
        match self.kind {
            Kind::Float32 | Kind::Float64 => self.as_f64() as i64,
            _ => self.re as i64,
        }
    }

    /// Value as a zero-extended machine word of the Kind's width.
    pub fn as_u64(&self) -> u64 {
        if self.kind.is_signed() && self.kind.bits() < 64 {
            self.re & ((1u64 << self.kind.bits()) - 1)
        } else {
            self.re
        }
    }

    pub fn as_bool(&self) -> bool {
        self.re != 0
    }

    /// Real part decoded as a float; integers are converted.
    pub fn as_f64(&self) -> f64 {
        match self.kind {
            Kind::Float32 | Kind::Complex64 => f32::from_bits(self.re as u32) as f64,
            Kind::Float64 | Kind::Complex128 => f64::from_bits(self.re),
            k if k.is_signed() => self.re as i64 as f64,
            _ => self.re as f64,
        }
    }

    pub fn as_complex(&self) -> (f64, f64) {
        match self.kind {
            Kind::Complex64 => (
                f32::from_bits(self.re as u32) as f64,
                f32::from_bits(self.im as u32) as f64,
            ),
            Kind::Complex128 => (f64::from_bits(self.re), f64::from_bits(self.im)),
            _ => (self.as_f64(), 0.0),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self.kind {
            Kind::Float32 | Kind::Float64 => self.as_f64() == 0.0,
            Kind::Complex64 | Kind::Complex128 => self.as_complex() == (0.0, 0.0),
            _ => self.re == 0,
        }
    }

    /// Whether the value survives sign extension from 32 bits.
    pub fn fits_i32(&self) -> bool {
        if self.kind.size() <= 4 {
            return true;
        }
        i32::try_from(self.as_i64()).is_ok()
    }

    fn float(kind: Kind, value: f64) -> Self {
        match kind {
            Kind::Float32 => Self::float32(value as f32),
            _ => Self::float64(value),
        }
    }

    fn complex(kind: Kind, re: f64, im: f64) -> Self {
        match kind {
            Kind::Complex64 => Self::complex64(re as f32, im as f32),
            _ => Self::complex128(re, im),
        }
    }

    /// Convert to another kind with the usual numeric conversion rules.
    pub fn convert(&self, to: Kind) -> CompileResult<Const> {
        let from = self.kind;
        let bad = || CompileError::invalid_op(Op::Cast, &[from, to]);
        if from.is_complex() && !to.is_complex() {
            return Err(bad());
        }
        Ok(match to {
            k if k.is_integer() || k.is_pointer() => {
                if from.is_float() {
                    let f = self.as_f64();
                    if k.is_signed() {
                        Const::of(k, f as i64)
                    } else {
                        Const::from_bits(k, f as u64, 0)
                    }
                } else {
                    Const::from_bits(k, self.re, 0)
                }
            }
            k if k.is_float() => {
                let f = if from.is_unsigned_word() {
                    self.as_u64() as f64
                } else {
                    self.as_f64()
                };
                Const::float(k, f)
            }
            k if k.is_complex() => {
                let (re, im) = if from.is_unsigned_word() {
                    (self.as_u64() as f64, 0.0)
                } else {
                    self.as_complex()
                };
                Const::complex(k, re, im)
            }
            Kind::Bool if from.is_bool() => *self,
            _ => return Err(bad()),
        })
    }

    /// Evaluate a unary op whose operand is constant.
    pub(crate) fn fold_unary(op: Op, kind: Kind, x: Const) -> CompileResult<Const> {
        let xk = x.kind;
        Ok(match op {
            Op::Cast => x.convert(kind)?,
            Op::LNot if xk.is_bool() => Const::bool(!x.as_bool()),
            Op::Neg if xk.is_float() => Const::float(xk, -x.as_f64()),
            Op::Neg if xk.is_complex() => {
                let (re, im) = x.as_complex();
                Const::complex(xk, -re, -im)
            }
            Op::Neg => Const::from_bits(xk, x.re.wrapping_neg(), 0),
            Op::Inv if xk.is_integer() || xk.is_pointer() => Const::from_bits(xk, !x.re, 0),
            _ => return Err(CompileError::invalid_op(op, &[xk])),
        })
    }

    /// Evaluate a binary op whose operands are both constant.
    pub(crate) fn fold_binary(op: Op, x: Const, y: Const) -> CompileResult<Const> {
        let kind = x.kind;
        if op.is_comparison() {
            return Ok(Const::bool(compare(op, x, y)?));
        }
        match op {
            Op::LAnd => return Ok(Const::bool(x.as_bool() && y.as_bool())),
            Op::LOr => return Ok(Const::bool(x.as_bool() || y.as_bool())),
            Op::Shl | Op::Shr => return shift(op, x, y),
            _ => {}
        }
        let bad = || CompileError::invalid_op(op, &[x.kind, y.kind]);
        if kind.is_float() {
            let (a, b) = (x.as_f64(), y.as_f64());
            if kind == Kind::Float32 {
                let (a, b) = (a as f32, b as f32);
                let r = match op {
                    Op::Add => a + b,
                    Op::Sub => a - b,
                    Op::Mul => a * b,
                    Op::Quo => a / b,
                    _ => return Err(bad()),
                };
                return Ok(Const::float32(r));
            }
            let r = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Quo => a / b,
                _ => return Err(bad()),
            };
            return Ok(Const::float64(r));
        }
        if kind.is_complex() {
            let ((a, b), (c, d)) = (x.as_complex(), y.as_complex());
            let (re, im) = match op {
                Op::Add => (a + c, b + d),
                Op::Sub => (a - c, b - d),
                Op::Mul => (a * c - b * d, a * d + b * c),
                Op::Quo => {
                    let den = c * c + d * d;
                    ((a * c + b * d) / den, (b * c - a * d) / den)
                }
                _ => return Err(bad()),
            };
            return Ok(Const::complex(kind, re, im));
        }
        if !(kind.is_integer() || kind.is_pointer()) {
            return Err(bad());
        }
        let (a, b) = (x.re, y.re);
        let signed = kind.is_signed();
        let bits = match op {
            Op::Add => a.wrapping_add(b),
            Op::Sub => a.wrapping_sub(b),
            Op::Mul => a.wrapping_mul(b),
            Op::Quo | Op::Rem => {
                if b == 0 {
                    return Err(CompileError::DivisionByZero { kind });
                }
                match (op, signed) {
                    (Op::Quo, true) => (a as i64).wrapping_div(b as i64) as u64,
                    (Op::Rem, true) => (a as i64).wrapping_rem(b as i64) as u64,
                    (Op::Quo, false) => x.as_u64() / y.as_u64(),
                    _ => x.as_u64() % y.as_u64(),
                }
            }
            Op::And => a & b,
            Op::Or => a | b,
            Op::Xor => a ^ b,
            Op::AndNot => a & !b,
            _ => return Err(bad()),
        };
        Ok(Const::from_bits(kind, bits, 0))
    }
}

fn compare(op: Op, x: Const, y: Const) -> CompileResult<bool> {
    let kind = x.kind;
    if kind.is_float() {
        let (a, b) = (x.as_f64(), y.as_f64());
        return Ok(match op {
            Op::Eql => a == b,
            Op::Neq => a != b,
            Op::Lss => a < b,
            Op::Leq => a <= b,
            Op::Gtr => a > b,
            _ => a >= b,
        });
    }
    if kind.is_complex() {
        let eq = x.as_complex() == y.as_complex();
        return match op {
            Op::Eql => Ok(eq),
            Op::Neq => Ok(!eq),
            _ => Err(CompileError::invalid_op(op, &[x.kind, y.kind])),
        };
    }
    let ord = if kind.is_signed() {
        x.as_i64().cmp(&y.as_i64())
    } else {
        x.as_u64().cmp(&y.as_u64())
    };
    Ok(match op {
        Op::Eql => ord.is_eq(),
        Op::Neq => ord.is_ne(),
        Op::Lss => ord.is_lt(),
        Op::Leq => ord.is_le(),
        Op::Gtr => ord.is_gt(),
        _ => ord.is_ge(),
    })
}

fn shift(op: Op, x: Const, y: Const) -> CompileResult<Const> {
    let kind = x.kind;
    if y.kind.is_signed() && y.as_i64() < 0 {
        return Err(CompileError::NegativeShift { count: y.as_i64() });
    }
    let count = y.as_u64();
    let bits = match op {
        Op::Shl if count >= 64 => 0,
        Op::Shl => x.re << count,
        _ if kind.is_signed() => (x.as_i64() >> count.min(63)) as u64,
        _ if count >= 64 => 0,
        _ => x.as_u64() >> count,
    };
    Ok(Const::from_bits(kind, bits, 0))
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Void => f.write_str("void"),
            Kind::Bool => write!(f, "{}", self.as_bool()),
            Kind::Ptr => write!(f, "{:#x}", self.re),
            k if k.is_signed() => write!(f, "{}", self.as_i64()),
            k if k.is_unsigned() => write!(f, "{}", self.as_u64()),
            k if k.is_float() => write!(f, "{}", self.as_f64()),
            _ => {
                let (re, im) = self.as_complex();
                write!(f, "({re}{im:+}i)")
            }
        }
    }
}
