// This module turns lowered amd64 expressions into machine code bytes. Each instruction is
// built from the same pieces: an optional 0x66 operand-size prefix, a REX prefix carrying
// the W bit and the high bits of the reg, index and base registers, the opcode, a ModRM byte
// and, for memory operands, the SIB byte and displacement. The ModRM/SIB rules follow the
// hardware quirks: RSP and R12 as a base need a SIB byte, RBP and R13 as a base have no
// zero-displacement form and take a disp8 of 0, an address without a base uses the
// `[index*scale + disp32]` SIB form, and RSP can never be an index. Byte-sized access to
// SPL, BPL, SIL and DIL needs an otherwise empty REX prefix to not mean AH, CH, DH and BH.
// Jumps, calls and rip-relative LEA use 32-bit displacements through the assembler so
// forward references are back-patched when the label is bound.

//! amd64 machine-code encoder.

use crate::core::arch::{Arch, ArchId};
use crate::core::asm::Asm;
use crate::core::assembler::Assembler;
use crate::core::compiled::ArchCompiled;
use crate::core::constant::Const;
use crate::core::error::{CompileError, CompileResult};
use crate::core::expr::{AddrMode, Expr, HardReg};
use crate::core::kind::Kind;
use crate::core::label::Label;
use crate::core::op::{Cond, Op};

use super::regs::{self, RAX, RCX, RDX};

/// Assemble a lowered function.
pub fn assemble(arch: &Arch, compiled: &ArchCompiled) -> CompileResult<Asm> {
    let mut enc = Encoder::new(compiled.labels().len());
    for e in compiled.code() {
        enc.encode(e)?;
    }
    let (code, labels) = enc.finish()?;
    Ok(Asm::new(arch, compiled.name(), code, labels))
}

// ==== OPERANDS ====

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operand {
    Reg(HardReg),
    Mem(AddrMode),
    Imm(i64),
    Label(Label),
}

/// The ModRM reg field: a register or an opcode extension.
#[derive(Debug, Clone, Copy)]
enum Field {
    Reg(HardReg, u32),
    Digit(u8),
}

/// The ModRM r/m operand.
#[derive(Debug, Clone, Copy)]
enum Rm {
    Reg(HardReg, u32),
    Mem(AddrMode),
    Rip(Label),
}

fn rex(w: bool, r: u8, x: u8, b: u8) -> u8 {
    let mut rex = 0x40;
    if w {
        rex |= 0x08;
    }
    if r > 0 {
        rex |= 0x04;
    }
    if x > 0 {
        rex |= 0x02;
    }
    if b > 0 {
        rex |= 0x01;
    }
    rex
}

fn cc(cond: Cond) -> u8 {
    match cond {
        Cond::Ult => 0x2,
        Cond::Uge => 0x3,
        Cond::Eq => 0x4,
        Cond::Ne => 0x5,
        Cond::Ule => 0x6,
        Cond::Ugt => 0x7,
        Cond::Lt => 0xC,
        Cond::Ge => 0xD,
        Cond::Le => 0xE,
        Cond::Gt => 0xF,
    }
}

fn scale_bits(scale: u8) -> u8 {
    match scale {
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 0,
    }
}

fn width(kind: Kind) -> CompileResult<u32> {
    match kind.size() {
        s @ (1 | 2 | 4 | 8) => Ok(s),
        _ => Err(CompileError::unsupported(format!(
            "{}-byte operand ({kind})",
            kind.size()
        ))),
    }
}

/// Immediate value sign-extended from the width of its kind.
fn imm_value(c: &Const) -> CompileResult<i64> {
    if c.kind().is_complex() {
        return Err(CompileError::unsupported(format!("immediate {c}")));
    }
    let bits = c.bits().0;
    Ok(match c.kind().size() {
        1 => bits as u8 as i8 as i64,
        2 => bits as u16 as i16 as i64,
        4 => bits as u32 as i32 as i64,
        _ => bits as i64,
    })
}

fn fits_i8(v: i64) -> bool {
    v == v as i8 as i64
}

fn fits_i32(v: i64) -> bool {
    v == v as i32 as i64
}

fn hard(reg: HardReg) -> CompileResult<HardReg> {
    if reg.arch() != ArchId::AMD64 || reg.index() > 15 {
        return Err(CompileError::unsupported(format!("register {reg}")));
    }
    Ok(reg)
}

fn operand(e: &Expr) -> CompileResult<Operand> {
    match e {
        Expr::Reg(r) => match r.id().hard() {
            Some(h) => Ok(Operand::Reg(hard(h)?)),
            None => Err(CompileError::UnallocatedRegister { id: r.id().raw() }),
        },
        Expr::Mem(m) => match m.mode() {
            Some(mode) => Ok(Operand::Mem(*mode)),
            None => Err(CompileError::unsupported(format!("unresolved address in {e}"))),
        },
        Expr::Const(c) => Ok(Operand::Imm(imm_value(c)?)),
        Expr::Label(l) => Ok(Operand::Label(*l)),
        _ => Err(CompileError::unsupported(format!("operand {e}"))),
    }
}

fn rm_of(op: Operand, size: u32) -> Option<Rm> {
    match op {
        Operand::Reg(r) => Some(Rm::Reg(r, size)),
        Operand::Mem(m) => Some(Rm::Mem(m)),
        _ => None,
    }
}

fn label_of(e: &Expr) -> CompileResult<Label> {
    e.as_label()
        .ok_or_else(|| CompileError::unsupported(format!("jump target {e}")))
}

fn alu_digit(op: Op) -> Option<u8> {
    Some(match op {
        Op::AddAssign => 0,
        Op::OrAssign => 1,
        Op::AndAssign => 4,
        Op::SubAssign => 5,
        Op::XorAssign => 6,
        Op::Cmp => 7,
        _ => return None,
    })
}

// ==== ENCODER ====

/// Byte encoder for lowered amd64 expressions.
pub struct Encoder {
    asm: Assembler,
}

impl Encoder {
    pub fn new(num_labels: usize) -> Self {
        Self {
            asm: Assembler::with_labels(num_labels),
        }
    }

    pub fn offset(&self) -> usize {
        self.asm.offset()
    }

    pub fn code(&self) -> &[u8] {
        self.asm.code()
    }

    pub fn finish(self) -> CompileResult<(Vec<u8>, Vec<Option<usize>>)> {
        self.asm.finish()
    }

    /// Encode one lowered expression.
    pub fn encode(&mut self, e: &Expr) -> CompileResult<()> {
        let start = self.asm.offset();
        match e {
            Expr::Label(l) => self.asm.bind(*l)?,
            Expr::Unary(u) => self.unary(u.op(), u.kind(), u.x())?,
            Expr::Binary(b) => self.binary(b.op(), b.kind(), b.x(), b.y())?,
            Expr::Tuple(t) if t.op() == Op::Ret && t.list().is_empty() => self.asm.emit_u8(0xC3),
            Expr::Call(c) if c.args().is_empty() => {
                self.asm.emit_u8(0xE8);
                self.asm.emit_rel32(c.callee())?;
            }
            _ => return Err(CompileError::unsupported(format!("amd64 encoding of {e}"))),
        }
        log::trace!("{:#06x} {e} -> {:02X?}", start, &self.asm.code()[start..]);
        Ok(())
    }

    fn unary(&mut self, op: Op, kind: Kind, x: &Expr) -> CompileResult<()> {
        match op {
            Op::Jump => {
                self.asm.emit_u8(0xE9);
                self.asm.emit_rel32(label_of(x)?)
            }
            Op::Jcc(c) => {
                self.asm.emit_bytes(&[0x0F, 0x80 + cc(c)]);
                self.asm.emit_rel32(label_of(x)?)
            }
            Op::Setcc(c) => {
                let rm = self.dest(x, 1)?;
                self.inst(1, &[0x0F, 0x90 + cc(c)], Field::Digit(0), rm)
            }
            Op::Inc | Op::Dec => {
                let size = width(kind)?;
                let rm = self.dest(x, size)?;
                let digit = if op == Op::Inc { 0 } else { 1 };
                self.inst(size, &[if size == 1 { 0xFE } else { 0xFF }], Field::Digit(digit), rm)
            }
            Op::Push | Op::Pop => match operand(x)? {
                Operand::Reg(r) => {
                    // 64-bit by default, no REX.W needed
                    self.inst_plus_reg(4, if op == Op::Push { 0x50 } else { 0x58 }, r);
                    Ok(())
                }
                _ => Err(CompileError::unsupported(format!("amd64 encoding of {op} {x}"))),
            },
            Op::Zero => {
                let size = width(kind)?;
                match operand(x)? {
                    Operand::Reg(r) => self.inst(4, &[0x31], Field::Reg(r, 4), Rm::Reg(r, 4)),
                    Operand::Mem(m) => self.mov(size, Operand::Mem(m), Operand::Imm(0)),
                    _ => Err(CompileError::NotAssignable {
                        operand: x.to_string(),
                    }),
                }
            }
            _ => Err(CompileError::unsupported(format!("amd64 encoding of {op}"))),
        }
    }

    fn binary(&mut self, op: Op, kind: Kind, x: &Expr, y: &Expr) -> CompileResult<()> {
        if let Some(digit) = alu_digit(op) {
            let size = width(x.kind())?;
            return self.alu(digit, size, operand(x)?, operand(y)?);
        }
        match op {
            Op::Assign => self.assign(kind, x, y),
            Op::Test => {
                let size = width(x.kind())?;
                self.test(size, operand(x)?, operand(y)?)
            }
            Op::MulAssign => self.imul(width(kind)?, operand(x)?, operand(y)?),
            Op::ShlAssign | Op::ShrAssign => {
                let digit = match (op, kind.is_signed()) {
                    (Op::ShlAssign, _) => 4,
                    (_, false) => 5,
                    (_, true) => 7,
                };
                self.shift(width(kind)?, digit, operand(x)?, operand(y)?)
            }
            Op::QuoAssign | Op::RemAssign => self.divide(op, kind, operand(x)?, operand(y)?),
            _ => Err(CompileError::unsupported(format!("amd64 encoding of {op}"))),
        }
    }

    fn dest(&self, x: &Expr, size: u32) -> CompileResult<Rm> {
        rm_of(operand(x)?, size).ok_or_else(|| CompileError::NotAssignable {
            operand: x.to_string(),
        })
    }

    // ==== INSTRUCTION FORMS ====

    /// Prefixes, opcode and ModRM for a reg, r/m instruction.
    fn inst(&mut self, size: u32, opcode: &[u8], field: Field, rm: Rm) -> CompileResult<()> {
        if size == 2 {
            self.asm.emit_u8(0x66);
        }
        let (reg, mut force) = match field {
            Field::Reg(r, s) => (r.index(), s == 1 && regs::needs_rex_as_byte(r.index())),
            Field::Digit(d) => (d, false),
        };
        let (x, b) = match rm {
            Rm::Reg(r, s) => {
                force |= s == 1 && regs::needs_rex_as_byte(r.index());
                (0, r.index() >> 3)
            }
            Rm::Mem(m) => (
                m.index().map_or(0, |r| r.index() >> 3),
                m.base().map_or(0, |r| r.index() >> 3),
            ),
            Rm::Rip(_) => (0, 0),
        };
        let prefix = rex(size == 8, reg >> 3, x, b);
        if prefix != 0x40 || force {
            self.asm.emit_u8(prefix);
        }
        self.asm.emit_bytes(opcode);
        self.modrm(reg & 7, rm)
    }

    /// Opcode with the register in its low three bits (B0+r, B8+r).
    fn inst_plus_reg(&mut self, size: u32, opcode: u8, r: HardReg) {
        if size == 2 {
            self.asm.emit_u8(0x66);
        }
        let force = size == 1 && regs::needs_rex_as_byte(r.index());
        let prefix = rex(size == 8, 0, 0, r.index() >> 3);
        if prefix != 0x40 || force {
            self.asm.emit_u8(prefix);
        }
        self.asm.emit_u8(opcode + (r.index() & 7));
    }

    fn modrm(&mut self, reg: u8, rm: Rm) -> CompileResult<()> {
        match rm {
            Rm::Reg(r, _) => {
                self.asm.emit_u8(0xC0 | reg << 3 | (r.index() & 7));
                Ok(())
            }
            Rm::Rip(label) => {
                self.asm.emit_u8(reg << 3 | 0b101);
                self.asm.emit_rel32(label)
            }
            Rm::Mem(m) => self.address(reg, &m),
        }
    }

    fn address(&mut self, reg: u8, m: &AddrMode) -> CompileResult<()> {
        let disp = m.disp();
        if m.index().is_some_and(|r| r.index() == 4) {
            return Err(CompileError::unsupported(format!("rsp as index in {m}")));
        }
        let Some(base) = m.base() else {
            // [index*scale + disp32], or [disp32] with the "no index" encoding
            let (ss, index) = match m.index() {
                Some(r) => (scale_bits(m.scale()), r.index() & 7),
                None => (0, 0b100),
            };
            self.asm.emit_u8(reg << 3 | 0b100);
            self.asm.emit_u8(ss << 6 | index << 3 | 0b101);
            self.asm.emit_i32(disp);
            return Ok(());
        };

        let low = base.index() & 7;
        let md = if disp == 0 && low != 0b101 {
            0b00
        } else if fits_i8(disp as i64) {
            0b01
        } else {
            0b10
        };
        match m.index() {
            Some(index) => {
                self.asm.emit_u8(md << 6 | reg << 3 | 0b100);
                let ss = scale_bits(m.scale());
                self.asm.emit_u8(ss << 6 | (index.index() & 7) << 3 | low);
            }
            None if low == 0b100 => {
                self.asm.emit_u8(md << 6 | reg << 3 | 0b100);
                self.asm.emit_u8(0x24);
            }
            None => self.asm.emit_u8(md << 6 | reg << 3 | low),
        }
        match md {
            0b01 => self.asm.emit_i8(disp as i8),
            0b10 => self.asm.emit_i32(disp),
            _ => {}
        }
        Ok(())
    }

    fn imm(&mut self, size: u32, v: i64) -> CompileResult<()> {
        match size {
            1 => self.asm.emit_u8(v as u8),
            2 => self.asm.emit_u16(v as u16),
            _ => {
                if !fits_i32(v) {
                    return Err(CompileError::FieldOverflow {
                        what: "immediate",
                        value: v,
                        bits: 32,
                    });
                }
                self.asm.emit_i32(v as i32);
            }
        }
        Ok(())
    }

    // ==== INSTRUCTIONS ====

    fn alu(&mut self, digit: u8, size: u32, dst: Operand, src: Operand) -> CompileResult<()> {
        let byte = size == 1;
        let Some(rm) = rm_of(dst, size) else {
            return Err(CompileError::unsupported(format!("alu destination {dst:?}")));
        };
        match (dst, src) {
            (_, Operand::Reg(r)) => {
                let opcode = digit * 8 + if byte { 0 } else { 1 };
                self.inst(size, &[opcode], Field::Reg(r, size), rm)
            }
            (Operand::Reg(d), Operand::Mem(m)) => {
                let opcode = digit * 8 + if byte { 2 } else { 3 };
                self.inst(size, &[opcode], Field::Reg(d, size), Rm::Mem(m))
            }
            (_, Operand::Imm(v)) if byte => {
                self.inst(size, &[0x80], Field::Digit(digit), rm)?;
                self.imm(1, v)
            }
            (_, Operand::Imm(v)) if fits_i8(v) => {
                self.inst(size, &[0x83], Field::Digit(digit), rm)?;
                self.imm(1, v)
            }
            (_, Operand::Imm(v)) => {
                self.inst(size, &[0x81], Field::Digit(digit), rm)?;
                self.imm(size, v)
            }
            _ => Err(CompileError::unsupported(format!(
                "alu operands {dst:?}, {src:?}"
            ))),
        }
    }

    fn test(&mut self, size: u32, a: Operand, b: Operand) -> CompileResult<()> {
        let byte = size == 1;
        let (a, b) = match (a, b) {
            (Operand::Reg(_), Operand::Mem(_)) => (b, a),
            pair => pair,
        };
        let Some(rm) = rm_of(a, size) else {
            return Err(CompileError::unsupported(format!("test operand {a:?}")));
        };
        match b {
            Operand::Reg(r) => {
                self.inst(size, &[if byte { 0x84 } else { 0x85 }], Field::Reg(r, size), rm)
            }
            Operand::Imm(v) => {
                self.inst(size, &[if byte { 0xF6 } else { 0xF7 }], Field::Digit(0), rm)?;
                self.imm(size, v)
            }
            _ => Err(CompileError::unsupported(format!("test operands {a:?}, {b:?}"))),
        }
    }

    fn mov(&mut self, size: u32, dst: Operand, src: Operand) -> CompileResult<()> {
        let byte = size == 1;
        match (dst, src) {
            (Operand::Reg(d), Operand::Reg(s)) if d == s => Ok(()),
            (Operand::Reg(_) | Operand::Mem(_), Operand::Reg(s)) => {
                let rm = rm_of(dst, size).ok_or_else(|| CompileError::unsupported("mov"))?;
                self.inst(size, &[if byte { 0x88 } else { 0x89 }], Field::Reg(s, size), rm)
            }
            (Operand::Reg(d), Operand::Mem(m)) => {
                self.inst(size, &[if byte { 0x8A } else { 0x8B }], Field::Reg(d, size), Rm::Mem(m))
            }
            (Operand::Reg(d), Operand::Imm(v)) => match size {
                1 => {
                    self.inst_plus_reg(1, 0xB0, d);
                    self.imm(1, v)
                }
                2 | 4 => {
                    self.inst_plus_reg(size, 0xB8, d);
                    self.imm(size, v)
                }
                _ if fits_i32(v) => {
                    self.inst(8, &[0xC7], Field::Digit(0), Rm::Reg(d, 8))?;
                    self.imm(8, v)
                }
                _ if v as u64 <= u32::MAX as u64 => {
                    // writing the 32-bit register clears the upper half
                    self.inst_plus_reg(4, 0xB8, d);
                    self.asm.emit_u32(v as u32);
                    Ok(())
                }
                _ => {
                    self.inst_plus_reg(8, 0xB8, d);
                    self.asm.emit_i64(v);
                    Ok(())
                }
            },
            (Operand::Mem(m), Operand::Imm(v)) => {
                self.inst(size, &[if byte { 0xC6 } else { 0xC7 }], Field::Digit(0), Rm::Mem(m))?;
                self.imm(size, v)
            }
            (Operand::Reg(d), Operand::Label(l)) => {
                self.inst(8, &[0x8D], Field::Reg(d, 8), Rm::Rip(l))
            }
            _ => Err(CompileError::unsupported(format!("mov {dst:?}, {src:?}"))),
        }
    }

    fn assign(&mut self, kind: Kind, x: &Expr, y: &Expr) -> CompileResult<()> {
        let size = width(kind)?;
        let dst = operand(x)?;
        let Expr::Unary(u) = y else {
            return self.mov(size, dst, operand(y)?);
        };
        match u.op() {
            Op::Lea => {
                let (Operand::Reg(d), Operand::Mem(m)) = (dst, operand(u.x())?) else {
                    return Err(CompileError::unsupported(format!("lea {x}, {y}")));
                };
                self.inst(size, &[0x8D], Field::Reg(d, size), Rm::Mem(m))
            }
            Op::Neg | Op::Inv => {
                if operand(u.x())? != dst {
                    return Err(CompileError::unsupported(format!("{x} = {y}")));
                }
                let rm = self.dest(x, size)?;
                let digit = if u.op() == Op::Neg { 3 } else { 2 };
                self.inst(size, &[if size == 1 { 0xF6 } else { 0xF7 }], Field::Digit(digit), rm)
            }
            Op::Cast => self.cast(dst, u.kind(), u.x()),
            _ => Err(CompileError::unsupported(format!("amd64 encoding of {x} = {y}"))),
        }
    }

    fn cast(&mut self, dst: Operand, to: Kind, src: &Expr) -> CompileResult<()> {
        let from = src.kind();
        let (to_size, from_size) = (width(to)?, width(from)?);
        let Operand::Reg(d) = dst else {
            return Err(CompileError::unsupported(format!("cast into {dst:?}")));
        };
        let s = operand(src)?;
        if to_size <= from_size {
            return self.mov(to_size, dst, s);
        }
        let rm = rm_of(s, from_size)
            .ok_or_else(|| CompileError::unsupported(format!("cast from {src}")))?;
        let signed = from.is_signed();
        match (from_size, signed) {
            (1, false) => self.inst(to_size, &[0x0F, 0xB6], Field::Reg(d, to_size), rm),
            (1, true) => self.inst(to_size, &[0x0F, 0xBE], Field::Reg(d, to_size), rm),
            (2, false) => self.inst(to_size, &[0x0F, 0xB7], Field::Reg(d, to_size), rm),
            (2, true) => self.inst(to_size, &[0x0F, 0xBF], Field::Reg(d, to_size), rm),
            (4, true) => self.inst(8, &[0x63], Field::Reg(d, 8), rm),
            // a 32-bit move zero-extends into the full register
            (4, false) => self.inst(4, &[0x8B], Field::Reg(d, 4), rm),
            _ => Err(CompileError::unsupported(format!("cast {from} to {to}"))),
        }
    }

    fn imul(&mut self, size: u32, dst: Operand, src: Operand) -> CompileResult<()> {
        let Operand::Reg(d) = dst else {
            return Err(CompileError::unsupported(format!("imul into {dst:?}")));
        };
        if size == 1 {
            return Err(CompileError::unsupported("8-bit multiply"));
        }
        match src {
            Operand::Imm(v) if fits_i8(v) => {
                self.inst(size, &[0x6B], Field::Reg(d, size), Rm::Reg(d, size))?;
                self.imm(1, v)
            }
            Operand::Imm(v) => {
                self.inst(size, &[0x69], Field::Reg(d, size), Rm::Reg(d, size))?;
                self.imm(size, v)
            }
            src => {
                let rm = rm_of(src, size)
                    .ok_or_else(|| CompileError::unsupported(format!("imul by {src:?}")))?;
                self.inst(size, &[0x0F, 0xAF], Field::Reg(d, size), rm)
            }
        }
    }

    fn shift(&mut self, size: u32, digit: u8, dst: Operand, count: Operand) -> CompileResult<()> {
        let byte = size == 1;
        let Some(rm) = rm_of(dst, size) else {
            return Err(CompileError::unsupported(format!("shift of {dst:?}")));
        };
        match count {
            Operand::Imm(n) => {
                self.inst(size, &[if byte { 0xC0 } else { 0xC1 }], Field::Digit(digit), rm)?;
                self.imm(1, n)
            }
            Operand::Reg(r) if r == RCX => {
                self.inst(size, &[if byte { 0xD2 } else { 0xD3 }], Field::Digit(digit), rm)
            }
            _ => Err(CompileError::unsupported(format!("shift count {count:?}"))),
        }
    }

    fn divide(&mut self, op: Op, kind: Kind, dst: Operand, src: Operand) -> CompileResult<()> {
        let size = width(kind)?;
        if dst != Operand::Reg(RAX) {
            return Err(CompileError::unsupported(format!("division into {dst:?}")));
        }
        if size == 1 {
            return Err(CompileError::unsupported("8-bit division"));
        }
        if matches!(src, Operand::Reg(r) if r == RAX || r == RDX) {
            return Err(CompileError::unsupported(format!("divisor {src:?}")));
        }
        let rm = rm_of(src, size)
            .ok_or_else(|| CompileError::unsupported(format!("divisor {src:?}")))?;
        let signed = kind.is_signed();
        if signed {
            // cwd / cdq / cqo
            match size {
                2 => self.asm.emit_bytes(&[0x66, 0x99]),
                4 => self.asm.emit_u8(0x99),
                _ => self.asm.emit_bytes(&[0x48, 0x99]),
            }
        } else {
            self.asm.emit_bytes(&[0x31, 0xD2]);
        }
        let digit = if signed { 7 } else { 6 };
        self.inst(size, &[0xF7], Field::Digit(digit), rm)?;
        if op == Op::RemAssign {
            self.inst(size, &[0x89], Field::Reg(RDX, size), Rm::Reg(RAX, size))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::{Mem, Reg};
    use crate::core::label::LabelPool;
    use crate::x64::regs::{R12, R13, RBP, RBX, RDI, RSI, RSP};

    fn reg(kind: Kind, r: HardReg) -> Expr {
        Expr::Reg(Reg::hard(kind, r))
    }

    fn bytes(code: &[Expr]) -> Vec<u8> {
        let mut enc = Encoder::new(4);
        for e in code {
            enc.encode(e).unwrap();
        }
        enc.finish().unwrap().0
    }

    fn assign(kind: Kind, x: Expr, y: Expr) -> Expr {
        Expr::raw_binary(Op::Assign, kind, x, y)
    }

    #[test]
    fn test_alu_imm8_short_form() {
        let e = Expr::raw_binary(
            Op::AddAssign,
            Kind::Int64,
            reg(Kind::Int64, RBX),
            Const::int64(1).into(),
        );
        assert_eq!(bytes(&[e]), [0x48, 0x83, 0xC3, 0x01]);
    }

    #[test]
    fn test_stack_pointer_base_needs_sib() {
        let slot = Expr::Mem(Mem::at(Kind::Int64, AddrMode::base_disp(RSP, 8)));
        let e = assign(Kind::Int64, slot, reg(Kind::Int64, RAX));
        assert_eq!(bytes(&[e]), [0x48, 0x89, 0x44, 0x24, 0x08]);

        let slot = Expr::Mem(Mem::at(Kind::Int64, AddrMode::base_disp(R12, 0)));
        let e = assign(Kind::Int64, reg(Kind::Int64, RAX), slot);
        assert_eq!(bytes(&[e]), [0x49, 0x8B, 0x04, 0x24]);
    }

    #[test]
    fn test_push_and_pop_saved_registers() {
        let push = |r| Expr::raw_unary(Op::Push, Kind::Int64, reg(Kind::Int64, r));
        let pop = |r| Expr::raw_unary(Op::Pop, Kind::Int64, reg(Kind::Int64, r));
        let code = [push(RBX), push(R12), pop(R12), pop(RBX)];
        assert_eq!(bytes(&code), [0x53, 0x41, 0x54, 0x41, 0x5C, 0x5B]);

        let slot = Expr::Mem(Mem::at(Kind::Int64, AddrMode::base_disp(RSP, 0)));
        let mut enc = Encoder::new(4);
        assert!(enc.encode(&Expr::raw_unary(Op::Push, Kind::Int64, slot)).is_err());
    }

    #[test]
    fn test_frame_pointer_base_forces_disp8() {
        for (base, prefix) in [(RBP, 0x48), (R13, 0x49)] {
            let m = Expr::Mem(Mem::at(Kind::Int64, AddrMode::base_disp(base, 0)));
            let e = assign(Kind::Int64, reg(Kind::Int64, RAX), m);
            assert_eq!(bytes(&[e]), [prefix, 0x8B, 0x45, 0x00]);
        }
    }

    #[test]
    fn test_no_base_uses_disp32() {
        let mode = AddrMode::new(None, Some(RSI), 4, 16).unwrap();
        let e = assign(
            Kind::Int32,
            reg(Kind::Int32, RAX),
            Expr::Mem(Mem::at(Kind::Int32, mode)),
        );
        assert_eq!(bytes(&[e]), [0x8B, 0x04, 0xB5, 0x10, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_byte_register_needs_empty_rex() {
        let e = assign(Kind::Uint8, reg(Kind::Uint8, RSI), Const::uint8(1).into());
        assert_eq!(bytes(&[e]), [0x40, 0xB6, 0x01]);

        let e = Expr::raw_unary(Op::Setcc(Cond::Lt), Kind::Bool, reg(Kind::Bool, RBX));
        assert_eq!(bytes(&[e]), [0x0F, 0x9C, 0xC3]);
        let e = Expr::raw_unary(Op::Setcc(Cond::Lt), Kind::Bool, reg(Kind::Bool, RSI));
        assert_eq!(bytes(&[e]), [0x40, 0x0F, 0x9C, 0xC6]);
    }

    #[test]
    fn test_lea_with_scaled_index() {
        let mode = AddrMode::new(Some(RSI), Some(RDI), 2, 8).unwrap();
        let e = assign(
            Kind::Int64,
            reg(Kind::Int64, RBX),
            Expr::raw_unary(Op::Lea, Kind::Int64, Expr::Mem(Mem::at(Kind::Int64, mode))),
        );
        assert_eq!(bytes(&[e]), [0x48, 0x8D, 0x5C, 0x7E, 0x08]);
    }

    #[test]
    fn test_rsp_index_rejected() {
        let mode = AddrMode::new(Some(RBX), Some(RSP), 1, 0).unwrap();
        let e = assign(
            Kind::Int64,
            reg(Kind::Int64, RAX),
            Expr::Mem(Mem::at(Kind::Int64, mode)),
        );
        let mut enc = Encoder::new(0);
        assert!(matches!(enc.encode(&e), Err(CompileError::Unsupported { .. })));
    }

    #[test]
    fn test_jumps_are_patched() {
        let mut pool = LabelPool::new();
        let top = pool.new_label();
        let end = pool.new_label();
        let code = [
            Expr::Label(top),
            Expr::jump(end),
            Expr::raw_unary(Op::Jcc(Cond::Ne), Kind::Void, Expr::Label(top)),
            Expr::Label(end),
            Expr::raw_tuple(Op::Ret, Vec::new()),
        ];
        assert_eq!(
            bytes(&code),
            [0xE9, 0x06, 0, 0, 0, 0x0F, 0x85, 0xF5, 0xFF, 0xFF, 0xFF, 0xC3]
        );
    }

    #[test]
    fn test_signed_division_and_remainder() {
        let q = Expr::raw_binary(
            Op::QuoAssign,
            Kind::Int64,
            reg(Kind::Int64, RAX),
            reg(Kind::Int64, RBX),
        );
        assert_eq!(bytes(&[q]), [0x48, 0x99, 0x48, 0xF7, 0xFB]);

        let r = Expr::raw_binary(
            Op::RemAssign,
            Kind::Uint32,
            reg(Kind::Uint32, RAX),
            reg(Kind::Uint32, RBX),
        );
        assert_eq!(bytes(&[r]), [0x31, 0xD2, 0xF7, 0xF3, 0x89, 0xD0]);
    }

    #[test]
    fn test_widening_casts() {
        let sx = assign(
            Kind::Int64,
            reg(Kind::Int64, RBX),
            Expr::raw_unary(Op::Cast, Kind::Int64, reg(Kind::Int32, RSI)),
        );
        assert_eq!(bytes(&[sx]), [0x48, 0x63, 0xDE]);

        let zx = assign(
            Kind::Uint32,
            reg(Kind::Uint32, RBX),
            Expr::raw_unary(Op::Cast, Kind::Uint32, reg(Kind::Uint8, RSI)),
        );
        assert_eq!(bytes(&[zx]), [0x40, 0x0F, 0xB6, 0xDE]);
    }

    #[test]
    fn test_wide_constant_uses_movabs() {
        let e = assign(
            Kind::Int64,
            reg(Kind::Int64, RAX),
            Const::int64(0x1122_3344_5566_7788).into(),
        );
        assert_eq!(
            bytes(&[e]),
            [0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn test_sixteen_byte_operand_rejected() {
        let e = assign(
            Kind::Complex128,
            reg(Kind::Complex128, RBX),
            reg(Kind::Complex128, RSI),
        );
        let mut enc = Encoder::new(0);
        assert!(matches!(enc.encode(&e), Err(CompileError::Unsupported { .. })));
    }
}
