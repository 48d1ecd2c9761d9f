// This module synthesizes amd64 addressing records from address arithmetic. An expression
// built from additions, subtractions of constants, multiplications by 1, 2, 4 or 8 and
// left shifts by 0 to 3 is decomposed into base + index*scale + disp. Multiplications by
// 3, 5 and 9 use the same register as base and index with scale one less than the
// factor. Terms that do not fit a free slot are materialized: any other sub-expression is
// computed into a scratch register first (so index*7 becomes one register used with
// scale 1), and when both slots are occupied the current base and index are folded into a
// scratch register with one LEA before the new term is computed, so the new term can take
// the freed index slot. A displacement that does not fit a sign-extended 32-bit field is
// loaded into a register and added as one more term. The same machinery serves memory
// operands, where the record becomes the address, and value assignments, where it becomes
// the source of an LEA instruction.

//! Address-mode synthesis.

use crate::core::constant::Const;
use crate::core::error::{CompileError, CompileResult};
use crate::core::expr::{AddrMode, Expr, HardReg, Mem, Reg};
use crate::core::kind::Kind;
use crate::core::lowering::Lowering;
use crate::core::op::Op;

use super::lower;

#[derive(Debug, Default)]
struct Terms {
    base: Option<HardReg>,
    index: Option<(HardReg, u8)>,
    disp: i64,
    /// 32-bit results only need the displacement modulo 2^32.
    wrap32: bool,
}

impl Terms {
    fn into_mode(self) -> CompileResult<AddrMode> {
        let disp = if self.wrap32 {
            Ok(self.disp as i32)
        } else {
            i32::try_from(self.disp)
        };
        let disp = disp.map_err(|_| CompileError::FieldOverflow {
            what: "address displacement",
            value: self.disp,
            bits: 32,
        })?;
        let (index, scale) = match self.index {
            Some((r, s)) => (Some(r), s),
            None => (None, 1),
        };
        AddrMode::new(self.base, index, scale, disp)
    }
}

/// Scale usable directly as an index factor.
fn direct_scale(c: &Const) -> Option<u8> {
    match c.as_i64() {
        v @ (1 | 2 | 4 | 8) => Some(v as u8),
        _ => None,
    }
}

/// Factor expressible as `r + r*(f-1)`.
fn doubled_scale(c: &Const) -> Option<u8> {
    match c.as_i64() {
        v @ (3 | 5 | 9) => Some((v - 1) as u8),
        _ => None,
    }
}

fn shift_scale(c: &Const) -> Option<u8> {
    match c.as_i64() {
        k @ 0..=3 => Some(1u8 << k),
        _ => None,
    }
}

fn displacement(c: &Const) -> i64 {
    if c.kind().size() <= 4 {
        c.as_u64() as u32 as i32 as i64
    } else {
        c.as_i64()
    }
}

/// True when every constant summed into the address fits a displacement.
fn displacement_fits(e: &Expr) -> bool {
    match e {
        Expr::Const(c) => c.fits_i32(),
        Expr::Binary(b) if matches!(b.op(), Op::Add | Op::Sub) => {
            displacement_fits(b.x()) && displacement_fits(b.y())
        }
        _ => true,
    }
}

/// Decompose `addr` into an addressing record, emitting spills as needed.
pub fn synthesize(lw: &mut Lowering<'_>, addr: Expr) -> CompileResult<AddrMode> {
    let mut terms = Terms {
        wrap32: addr.kind().size() == 4,
        ..Terms::default()
    };
    add_term(lw, &mut terms, addr)?;
    if !terms.wrap32 && i32::try_from(terms.disp).is_err() {
        let wide = Const::int64(std::mem::take(&mut terms.disp));
        make_room(lw, &mut terms)?;
        let r = materialize(lw, wide.into())?;
        place(lw, &mut terms, r, 1)?;
    }
    terms.into_mode()
}

/// Addressing record for the value of `e`, if an LEA can compute it.
pub(crate) fn try_value(lw: &mut Lowering<'_>, e: &Expr) -> CompileResult<Option<AddrMode>> {
    let kind = e.kind();
    if !(kind.is_integer() || kind.is_pointer()) || !matches!(kind.size(), 4 | 8) {
        return Ok(None);
    }
    let Expr::Binary(b) = e else {
        return Ok(None);
    };
    let eligible = match (b.op(), b.y()) {
        (Op::Add, y) => !matches!(b.x(), Expr::Mem(_)) && !matches!(y, Expr::Mem(_)),
        (Op::Sub, Expr::Const(_)) => true,
        (Op::Mul, Expr::Const(c)) => direct_scale(c).or(doubled_scale(c)).is_some(),
        (Op::Shl, Expr::Const(c)) => shift_scale(c).is_some(),
        _ => false,
    };
    if !eligible || !displacement_fits(e) {
        return Ok(None);
    }
    synthesize(lw, e.clone()).map(Some)
}

fn add_term(lw: &mut Lowering<'_>, t: &mut Terms, e: Expr) -> CompileResult<()> {
    let e = match e {
        Expr::Const(c) => {
            t.disp = t.disp.wrapping_add(displacement(&c));
            return Ok(());
        }
        Expr::Unary(u) if u.op() == Op::Cast && same_word(u.kind(), u.x().kind()) => {
            return add_term(lw, t, u.into_parts().2);
        }
        e => e,
    };
    let Expr::Binary(b) = e else {
        make_room(lw, t)?;
        let r = materialize(lw, e)?;
        return place(lw, t, r, 1);
    };
    let shape = match (b.op(), b.y()) {
        (Op::Add, _) => Shape::Sum,
        (Op::Sub, Expr::Const(_)) => Shape::Difference,
        (Op::Mul, Expr::Const(c)) if t.index.is_none() => match direct_scale(c) {
            Some(scale) => Shape::Scaled(scale),
            None => match doubled_scale(c) {
                Some(scale) if t.base.is_none() => Shape::Doubled(scale),
                _ => Shape::Opaque,
            },
        },
        (Op::Shl, Expr::Const(c)) if t.index.is_none() => {
            shift_scale(c).map_or(Shape::Opaque, Shape::Scaled)
        }
        _ => Shape::Opaque,
    };
    match shape {
        Shape::Sum => {
            let (_, _, x, y) = b.into_parts();
            add_term(lw, t, x)?;
            add_term(lw, t, y)
        }
        Shape::Difference => {
            let (_, _, x, y) = b.into_parts();
            add_term(lw, t, x)?;
            if let Expr::Const(c) = y {
                t.disp = t.disp.wrapping_sub(displacement(&c));
            }
            Ok(())
        }
        Shape::Scaled(scale) => {
            make_room(lw, t)?;
            let r = materialize(lw, b.into_parts().2)?;
            place(lw, t, r, scale)
        }
        Shape::Doubled(scale) => {
            let r = materialize(lw, b.into_parts().2)?;
            t.base = Some(r);
            t.index = Some((r, scale));
            Ok(())
        }
        Shape::Opaque => {
            make_room(lw, t)?;
            let r = materialize(lw, Expr::Binary(b))?;
            place(lw, t, r, 1)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Sum,
    Difference,
    Scaled(u8),
    Doubled(u8),
    Opaque,
}

/// Casts between 8-byte integers and pointers keep the bits.
fn same_word(to: Kind, from: Kind) -> bool {
    let word = |k: Kind| (k.is_integer() || k.is_pointer()) && k.size() == 8;
    word(to) && word(from)
}

/// Put `r` (scaled by `scale`) into a free slot, folding the occupied slots
/// into a scratch register when none is left.
fn place(lw: &mut Lowering<'_>, t: &mut Terms, r: HardReg, scale: u8) -> CompileResult<()> {
    if scale == 1 && t.base.is_none() {
        t.base = Some(r);
        return Ok(());
    }
    if t.index.is_none() {
        t.index = Some((r, scale));
        return Ok(());
    }
    fold(lw, t)?;
    t.index = Some((r, scale));
    Ok(())
}

/// Fold base and index into one register when both slots are taken.
fn make_room(lw: &mut Lowering<'_>, t: &mut Terms) -> CompileResult<()> {
    if t.base.is_some() && t.index.is_some() {
        fold(lw, t)?;
    }
    Ok(())
}

/// `base = lea [base + index*scale]`, leaving the index slot free.
fn fold(lw: &mut Lowering<'_>, t: &mut Terms) -> CompileResult<()> {
    // a scratch slot only holds this address, so it can absorb the fold
    let scratch = lw.arch().scratch;
    let index = t.index.map(|(r, _)| r);
    let reuse = t
        .base
        .filter(|b| scratch.contains(b))
        .or(index.filter(|i| scratch.contains(i)));
    let occupied = Terms {
        base: t.base.take(),
        index: t.index.take(),
        ..Terms::default()
    }
    .into_mode()?;
    let tmp = match reuse {
        Some(r) => Reg::hard(Kind::Ptr, r),
        None => lw.scratch(Kind::Ptr, &"address")?,
    };
    lw.emit(Expr::raw_binary(
        Op::Assign,
        Kind::Ptr,
        Expr::Reg(tmp),
        Expr::raw_unary(Op::Lea, Kind::Ptr, Expr::Mem(Mem::at(Kind::Ptr, occupied))),
    ));
    let folded = tmp.id().hard().ok_or(CompileError::UnallocatedRegister {
        id: tmp.id().raw(),
    })?;
    if let Some(i) = index.filter(|i| *i != folded) {
        lw.scratch_free(i);
    }
    t.base = Some(folded);
    Ok(())
}

/// Hard register holding the 64-bit value of `e`.
fn materialize(lw: &mut Lowering<'_>, e: Expr) -> CompileResult<HardReg> {
    let reg = lower::register_of(lw, e)?;
    reg.id().hard().ok_or(CompileError::UnallocatedRegister {
        id: reg.id().raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::{ArchId, ArchRegistry};
    use crate::core::expr::RegId;
    use crate::core::label::LabelPool;
    use crate::core::regalloc::{Allocation, Location};
    use crate::x64::regs::{R10, R11, RBX, RDI, RSI};

    fn soft(id: u32) -> Expr {
        Expr::Reg(Reg::new(Kind::Int64, RegId::Soft(id)))
    }

    fn with_lowering(f: impl FnOnce(&mut Lowering<'_>)) {
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let mut alloc = Allocation::new();
        alloc.assign(0x100, Location::Reg(RBX));
        alloc.assign(0x101, Location::Reg(RSI));
        alloc.assign(0x102, Location::Reg(RDI));
        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels);
        f(&mut lw);
    }

    #[test]
    fn test_base_plus_scaled_index() {
        with_lowering(|lw| {
            let scaled = Expr::binary(Op::Mul, soft(0x101), Const::int64(4).into()).unwrap();
            let addr = Expr::binary(Op::Add, soft(0x100), scaled).unwrap();
            let mode = synthesize(lw, addr).unwrap();
            assert_eq!(mode, AddrMode::new(Some(RBX), Some(RSI), 4, 0).unwrap());
        });
    }

    #[test]
    fn test_base_minus_constant() {
        with_lowering(|lw| {
            let addr = Expr::binary(Op::Sub, soft(0x100), Const::int64(8).into()).unwrap();
            let mode = synthesize(lw, addr).unwrap();
            assert_eq!(mode, AddrMode::base_disp(RBX, -8));
        });
    }

    #[test]
    fn test_times_nine_uses_base_and_index() {
        with_lowering(|lw| {
            let addr = Expr::binary(Op::Mul, soft(0x102), Const::int64(9).into()).unwrap();
            let mode = synthesize(lw, addr).unwrap();
            assert_eq!(mode, AddrMode::new(Some(RDI), Some(RDI), 8, 0).unwrap());
        });
    }

    #[test]
    fn test_times_seven_is_materialized() {
        with_lowering(|lw| {
            let scaled = Expr::binary(Op::Mul, soft(0x101), Const::int64(7).into()).unwrap();
            let addr = Expr::binary(Op::Add, soft(0x100), scaled).unwrap();
            let mode = synthesize(lw, addr).unwrap();
            assert_eq!(mode, AddrMode::new(Some(RBX), Some(R10), 1, 0).unwrap());
        });
    }

    #[test]
    fn test_third_register_spills_slots() {
        with_lowering(|lw| {
            let ab = Expr::binary(Op::Add, soft(0x100), soft(0x101)).unwrap();
            let addr = Expr::binary(Op::Add, ab, soft(0x102)).unwrap();
            let mode = synthesize(lw, addr).unwrap();
            // canonical order puts s258 first: rdi + rbx fill both slots, rsi spills them
            assert_eq!(mode, AddrMode::new(Some(R10), Some(RSI), 1, 0).unwrap());
        });
    }

    #[test]
    fn test_three_computed_terms_fit_two_scratch_registers() {
        with_lowering(|lw| {
            let product = |x: u32, y: u32| Expr::binary(Op::Mul, soft(x), soft(y)).unwrap();
            let two = Expr::binary(Op::Add, product(0x100, 0x101), product(0x101, 0x102)).unwrap();
            let addr = Expr::binary(Op::Add, two, product(0x102, 0x100)).unwrap();
            let addr = Expr::cast(Kind::Ptr, addr).unwrap();
            let mode = synthesize(lw, addr).unwrap();
            assert_eq!(mode, AddrMode::new(Some(R10), Some(R11), 1, 0).unwrap());
        });
    }

    #[test]
    fn test_wide_displacement_goes_through_register() {
        with_lowering(|lw| {
            let addr = Expr::binary(Op::Add, soft(0x100), Const::int64(1 << 32).into()).unwrap();
            let addr = Expr::cast(Kind::Ptr, addr).unwrap();
            let mode = synthesize(lw, addr).unwrap();
            assert_eq!(mode, AddrMode::new(Some(RBX), Some(R10), 1, 0).unwrap());
        });
        with_lowering(|lw| {
            // base + index already taken: fold first, then add the constant
            let ab = Expr::binary(Op::Add, soft(0x100), soft(0x101)).unwrap();
            let addr = Expr::binary(Op::Add, ab, Const::int64(-(1 << 40)).into()).unwrap();
            let mode = synthesize(lw, Expr::cast(Kind::Ptr, addr).unwrap()).unwrap();
            assert_eq!(mode, AddrMode::new(Some(R10), Some(R11), 1, 0).unwrap());
        });
    }
}

