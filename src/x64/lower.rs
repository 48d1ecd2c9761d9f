// This module rewrites generic expressions into the forms the amd64 encoder accepts. Every
// top-level expression becomes a short run of two-operand instructions whose operands are
// hard registers, memory operands with resolved addressing records, immediates that fit a
// sign-extended 32-bit field, or labels. Soft registers are resolved through the
// allocation; memory addresses go through LEA synthesis. Values are computed straight into
// their destination where possible: `x = x op y` and its commutative mirror become a single
// op-assign, pure address arithmetic assigned to a register becomes one LEA, and anything
// else is evaluated into the destination or into a scratch register when the right-hand
// side still reads the destination or would clobber one of the fixed registers (RAX and
// RDX for division and results, RCX for shift counts). Temporaries are released as soon as
// the instruction that reads them is out; when both scratch registers are busy a value
// goes to a stack slot above the spills instead. A call result is copied out of RAX at
// once, and scratch registers holding values are stored around the call and reloaded
// after it. Comparisons set flags through TEST for `(a & b) ==/!= 0` and `x ==/!= 0`,
// through CMP otherwise, and are consumed by a conditional jump or a SETcc. The prologue
// pushes the callee-saved registers the allocation uses and reserves the frame; every
// return undoes both. Shapes with no amd64 form here (floating-point and complex
// arithmetic, calls with arguments, byte-sized multiply and divide) are logged and passed
// through unchanged for the encoder to reject.

//! amd64 instruction selection.

use crate::core::constant::Const;
use crate::core::error::{CompileError, CompileResult};
use crate::core::expr::{Address, Expr, HardReg, Mem, Reg};
use crate::core::kind::Kind;
use crate::core::label::Label;
use crate::core::lowering::Lowering;
use crate::core::op::{Cond, Op};

use super::lea;
use super::regs::{RAX, RCX, RDX};

fn fixed(kind: Kind, reg: HardReg) -> Expr {
    Expr::Reg(Reg::hard(kind, reg))
}

fn void() -> Expr {
    Expr::Const(Const::zero(Kind::Void))
}

fn degrade(what: &Expr) {
    log::warn!("amd64: no lowering for {what}, passing it through");
}

/// Whether `c` can be an instruction immediate for its own size.
pub(crate) fn imm_fits(c: &Const) -> bool {
    let bits = c.bits().0 as i64;
    c.kind().size() <= 4 || bits == bits as i32 as i64
}

/// Run `f` and release the temporaries it took. Only for code whose
/// temporaries are all read by instructions `f` itself emits.
fn scoped<'a, T>(
    lw: &mut Lowering<'a>,
    f: impl FnOnce(&mut Lowering<'a>) -> CompileResult<T>,
) -> CompileResult<T> {
    let mark = lw.scratch_mark();
    let r = f(lw);
    lw.scratch_release(mark);
    r
}

/// Save the callee-saved registers in use and reserve the frame.
pub fn enter(lw: &mut Lowering<'_>) -> CompileResult<()> {
    for r in lw.saved_regs().to_vec() {
        lw.emit(Expr::raw_unary(Op::Push, Kind::Int64, fixed(Kind::Int64, r)));
    }
    lw.emit_frame(Op::SubAssign)
}

/// Lowering hook. At top level the instructions are emitted and the value
/// (the destination for assignments) is returned; otherwise the result is a
/// legal operand holding the value of `expr`.
pub fn compile(lw: &mut Lowering<'_>, expr: Expr, toplevel: bool) -> CompileResult<Expr> {
    if !toplevel {
        return value(lw, expr);
    }
    if expr.is_effect_free() {
        return Ok(expr);
    }
    match expr {
        Expr::Label(_) => Ok(expr),
        Expr::Unary(u) => match u.op() {
            Op::Jump if u.x().as_label().is_some() => Ok(Expr::Unary(u)),
            Op::Inc | Op::Dec | Op::Zero => {
                let (op, kind, x) = u.into_parts();
                let d = dest(lw, x)?;
                lw.emit(Expr::raw_unary(op, kind, d.clone()));
                Ok(d)
            }
            _ => {
                let e = Expr::Unary(u);
                degrade(&e);
                Ok(e)
            }
        },
        Expr::Binary(b) => {
            let (op, kind, x, y) = b.into_parts();
            match op {
                Op::JumpIf => match x.as_label() {
                    Some(label) => {
                        jump_if(lw, label, y, true)?;
                        Ok(void())
                    }
                    None => {
                        let e = Expr::raw_binary(op, kind, x, y);
                        degrade(&e);
                        Ok(e)
                    }
                },
                Op::Assign => {
                    let d = dest(lw, x.clone())?;
                    into(lw, &d, y, Some(&x))?;
                    Ok(d)
                }
                _ => match op.assign_to_binary() {
                    Some(base) => {
                        let d = dest(lw, x)?;
                        op_assign(lw, &d, base, y)?;
                        Ok(d)
                    }
                    None => value(lw, Expr::raw_binary(op, kind, x, y)),
                },
            }
        }
        Expr::Tuple(t) if t.op() == Op::Ret => ret(lw, t.into_list()),
        e @ Expr::Call(_) => {
            call(lw, e)?;
            Ok(void())
        }
        e => {
            degrade(&e);
            Ok(e)
        }
    }
}

/// Lowered form of an assignment target.
fn dest(lw: &mut Lowering<'_>, e: Expr) -> CompileResult<Expr> {
    match e {
        Expr::Reg(r) => lw.resolve_reg(&r),
        Expr::Mem(m) => Ok(Expr::Mem(mem(lw, m)?)),
        other => Err(CompileError::NotAssignable {
            operand: other.to_string(),
        }),
    }
}

fn mem(lw: &mut Lowering<'_>, m: Mem) -> CompileResult<Mem> {
    let Address::Expr(addr) = m.addr() else {
        return Ok(m);
    };
    let mode = lea::synthesize(lw, addr.as_ref().clone())?;
    let lowered = Mem::at(m.kind(), mode);
    Ok(if m.is_read_only() {
        lowered.read_only()
    } else {
        lowered
    })
}

/// Legal operand (register, memory, immediate or label) holding `e`.
fn value(lw: &mut Lowering<'_>, e: Expr) -> CompileResult<Expr> {
    match e {
        Expr::Const(_) | Expr::Label(_) => Ok(e),
        Expr::Reg(r) => lw.resolve_reg(&r),
        Expr::Mem(m) => Ok(Expr::Mem(mem(lw, m)?)),
        e @ Expr::Call(_) => {
            // the next call or division overwrites RAX
            let v = call(lw, e)?;
            if v.kind().is_void() {
                return Ok(v);
            }
            let t = lw.temp(v.kind(), &"call result")?;
            mov(lw, &t, v)?;
            Ok(t)
        }
        e => {
            let t = lw.temp(e.kind(), &e)?;
            into(lw, &t, e, None)?;
            Ok(t)
        }
    }
}

/// Hard register holding the value of `e`.
pub(crate) fn register_of(lw: &mut Lowering<'_>, e: Expr) -> CompileResult<Reg> {
    match value(lw, e)? {
        Expr::Reg(r) => Ok(r),
        v => {
            let kind = match v.kind() {
                Kind::Void => Kind::Ptr,
                k => k,
            };
            let t = lw.scratch(kind, &v)?;
            mov(lw, &Expr::Reg(t), v)?;
            Ok(t)
        }
    }
}

fn materialize(lw: &mut Lowering<'_>, v: Expr) -> CompileResult<Expr> {
    Ok(Expr::Reg(register_of(lw, v)?))
}

fn same_place(a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Reg(x), Expr::Reg(y)) => x.id() == y.id() && x.kind().size() == y.kind().size(),
        (Expr::Mem(x), Expr::Mem(y)) => {
            x.mode().is_some() && x.mode() == y.mode() && x.kind().size() == y.kind().size()
        }
        _ => false,
    }
}

/// Whether `e` denotes the location `dst` (lowered) or `origin` (as written).
fn is_dst(
    lw: &Lowering<'_>,
    e: &Expr,
    dst: &Expr,
    origin: Option<&Expr>,
) -> CompileResult<bool> {
    if origin == Some(e) {
        return Ok(true);
    }
    Ok(match e {
        Expr::Reg(r) => same_place(&lw.resolve_reg(r)?, dst),
        Expr::Mem(m) if m.mode().is_some() => same_place(e, dst),
        _ => false,
    })
}

/// Whether evaluating `e` reads the location `dst`.
fn mentions(lw: &Lowering<'_>, e: &Expr, dst: &Expr) -> CompileResult<bool> {
    let dst_reg = dst.as_reg().and_then(|r| r.id().hard());
    let uses = |m: &Mem| match (m.mode(), dst_reg) {
        (Some(mode), Some(h)) => mode.uses(h),
        _ => false,
    };
    Ok(match e {
        Expr::Reg(r) => {
            let p = lw.resolve_reg(r)?;
            same_place(&p, dst) || p.as_mem().is_some_and(uses)
        }
        Expr::Mem(m) => match m.addr() {
            Address::Mode(_) => uses(m) || same_place(e, dst),
            Address::Expr(a) => mentions(lw, a, dst)?,
        },
        Expr::Unary(u) => mentions(lw, u.x(), dst)?,
        Expr::Binary(b) => mentions(lw, b.x(), dst)? || mentions(lw, b.y(), dst)?,
        Expr::Tuple(t) => {
            let mut any = false;
            for x in t.list() {
                any |= mentions(lw, x, dst)?;
            }
            any
        }
        Expr::Call(c) => {
            let mut any = false;
            for x in c.args() {
                any |= mentions(lw, x, dst)?;
            }
            any
        }
        Expr::Const(_) | Expr::Label(_) => false,
    })
}

fn is_fixed(dst: &Expr) -> bool {
    dst.as_reg()
        .and_then(|r| r.id().hard())
        .is_some_and(|h| [RAX, RCX, RDX].contains(&h))
}

/// Whether evaluating `e` overwrites RAX, RCX or RDX.
fn clobbers_fixed(e: &Expr) -> bool {
    [Op::Quo, Op::Rem, Op::Shl, Op::Shr, Op::Call]
        .into_iter()
        .any(|op| e.contains_op(op))
}

fn mov(lw: &mut Lowering<'_>, dst: &Expr, src: Expr) -> CompileResult<()> {
    if same_place(dst, &src) {
        return Ok(());
    }
    scoped(lw, |lw| move_into(lw, dst, src))
}

fn move_into(lw: &mut Lowering<'_>, dst: &Expr, src: Expr) -> CompileResult<()> {
    match src {
        Expr::Const(c) => store_const(lw, dst, c),
        Expr::Mem(_) if dst.as_mem().is_some() => {
            let t = Expr::Reg(lw.scratch(dst.kind(), &"memory move")?);
            lw.emit(Expr::raw_binary(Op::Assign, dst.kind(), t.clone(), src));
            lw.emit(Expr::raw_binary(Op::Assign, dst.kind(), dst.clone(), t));
            Ok(())
        }
        Expr::Label(_) if dst.as_mem().is_some() => {
            let t = Expr::Reg(lw.scratch(Kind::Ptr, &"label address")?);
            lw.emit(Expr::raw_binary(Op::Assign, Kind::Ptr, t.clone(), src));
            lw.emit(Expr::raw_binary(Op::Assign, dst.kind(), dst.clone(), t));
            Ok(())
        }
        src => {
            lw.emit(Expr::raw_binary(Op::Assign, dst.kind(), dst.clone(), src));
            Ok(())
        }
    }
}

fn store_const(lw: &mut Lowering<'_>, dst: &Expr, c: Const) -> CompileResult<()> {
    scoped(lw, |lw| {
        let src = if dst.as_mem().is_some() && !imm_fits(&c) {
            let t = Expr::Reg(lw.scratch(dst.kind(), &c)?);
            lw.emit(Expr::raw_binary(Op::Assign, dst.kind(), t.clone(), c.into()));
            t
        } else {
            c.into()
        };
        lw.emit(Expr::raw_binary(Op::Assign, dst.kind(), dst.clone(), src));
        Ok(())
    })
}

fn passthrough(lw: &mut Lowering<'_>, dst: &Expr, e: Expr) -> CompileResult<()> {
    degrade(&e);
    lw.emit(Expr::raw_binary(Op::Assign, dst.kind(), dst.clone(), e));
    Ok(())
}

/// Compute `e` into the lowered location `dst`.
fn into(lw: &mut Lowering<'_>, dst: &Expr, e: Expr, origin: Option<&Expr>) -> CompileResult<()> {
    match e {
        Expr::Const(c) => store_const(lw, dst, c),
        e @ (Expr::Reg(_) | Expr::Mem(_) | Expr::Label(_)) => scoped(lw, |lw| {
            let src = value(lw, e)?;
            mov(lw, dst, src)
        }),
        Expr::Unary(u) => {
            let (op, kind, x) = u.into_parts();
            unary_into(lw, dst, op, kind, x)
        }
        Expr::Binary(b) => {
            let (op, kind, x, y) = b.into_parts();
            binary_into(lw, dst, op, kind, x, y, origin)
        }
        e @ Expr::Call(_) => {
            let v = call(lw, e)?;
            if v.kind().is_void() {
                return Ok(());
            }
            mov(lw, dst, v)
        }
        e @ Expr::Tuple(_) => passthrough(lw, dst, e),
    }
}

fn unary_into(lw: &mut Lowering<'_>, dst: &Expr, op: Op, kind: Kind, x: Expr) -> CompileResult<()> {
    let word = kind.is_integer() || kind.is_pointer();
    match op {
        Op::Neg | Op::Inv if word => {
            into(lw, dst, x, None)?;
            lw.emit(Expr::raw_binary(
                Op::Assign,
                kind,
                dst.clone(),
                Expr::raw_unary(op, kind, dst.clone()),
            ));
            Ok(())
        }
        Op::LNot => {
            into(lw, dst, x, None)?;
            lw.emit(Expr::raw_binary(
                Op::XorAssign,
                Kind::Bool,
                dst.clone(),
                Const::bool(true).into(),
            ));
            Ok(())
        }
        Op::Cast => scoped(lw, |lw| cast_into(lw, dst, kind, x)),
        _ => passthrough(lw, dst, Expr::raw_unary(op, kind, x)),
    }
}

fn cast_into(lw: &mut Lowering<'_>, dst: &Expr, to: Kind, x: Expr) -> CompileResult<()> {
    let from = x.kind();
    let int_like = |k: Kind| k.is_integer() || k.is_pointer() || k.is_bool();
    if !(int_like(from) && int_like(to)) {
        return passthrough(lw, dst, Expr::raw_unary(Op::Cast, to, x));
    }
    let src = value(lw, x)?;
    if let Expr::Const(c) = &src {
        return store_const(lw, dst, c.convert(to)?);
    }
    if to.size() <= from.size() {
        let narrowed = match src {
            Expr::Reg(r) => Expr::Reg(r.with_kind(to)),
            Expr::Mem(m) => Expr::Mem(m.with_kind(to)),
            other => other,
        };
        return mov(lw, dst, narrowed);
    }
    let src = match src {
        label @ Expr::Label(_) => materialize(lw, label)?,
        src => src,
    };
    let widened = Expr::raw_unary(Op::Cast, to, src);
    if dst.as_reg().is_some() {
        lw.emit(Expr::raw_binary(Op::Assign, to, dst.clone(), widened));
        return Ok(());
    }
    let t = Expr::Reg(lw.scratch(to, &"widening cast")?);
    lw.emit(Expr::raw_binary(Op::Assign, to, t.clone(), widened));
    mov(lw, dst, t)
}

#[allow(clippy::too_many_arguments)]
fn binary_into(
    lw: &mut Lowering<'_>,
    dst: &Expr,
    op: Op,
    kind: Kind,
    x: Expr,
    y: Expr,
    origin: Option<&Expr>,
) -> CompileResult<()> {
    if op.is_comparison() {
        return compare_into(lw, dst, op, x, y);
    }
    if matches!(op, Op::LAnd | Op::LOr) {
        return logical_into(lw, dst, op, x, y);
    }
    if op.is_assign() {
        let v = compile(lw, Expr::raw_binary(op, kind, x, y), true)?;
        return mov(lw, dst, v);
    }
    if !(kind.is_integer() || kind.is_pointer()) {
        return passthrough(lw, dst, Expr::raw_binary(op, kind, x, y));
    }

    // x = x op y, and y op x for commutative ops
    if is_dst(lw, &x, dst, origin)? {
        return op_assign(lw, dst, op, y);
    }
    if op.is_commutative() && is_dst(lw, &y, dst, origin)? {
        return op_assign(lw, dst, op, x);
    }

    if dst.as_reg().is_some() {
        let whole = Expr::raw_binary(op, kind, x.clone(), y.clone());
        let done = scoped(lw, |lw| {
            let Some(mode) = lea::try_value(lw, &whole)? else {
                return Ok(false);
            };
            match (mode.base(), mode.index(), mode.disp()) {
                (Some(base), None, 0) => mov(lw, dst, fixed(kind, base))?,
                _ => {
                    let addr = Expr::Mem(Mem::at(kind, mode));
                    lw.emit(Expr::raw_binary(
                        Op::Assign,
                        kind,
                        dst.clone(),
                        Expr::raw_unary(Op::Lea, kind, addr),
                    ));
                }
            }
            Ok(true)
        })?;
        if done {
            return Ok(());
        }
    }

    let hazard = mentions(lw, &y, dst)? || (is_fixed(dst) && clobbers_fixed(&y));
    if hazard {
        return scoped(lw, |lw| {
            let t = lw.temp(kind, &"operand")?;
            into(lw, &t, x, None)?;
            op_assign(lw, &t, op, y)?;
            mov(lw, dst, t)
        });
    }
    into(lw, dst, x, None)?;
    op_assign(lw, dst, op, y)
}

/// Right-hand operand legal against `dst` in a two-operand instruction.
fn rhs(lw: &mut Lowering<'_>, y: Expr, dst: &Expr) -> CompileResult<Expr> {
    let src = value(lw, y)?;
    let legal = match &src {
        Expr::Const(c) => imm_fits(c),
        Expr::Mem(_) => dst.as_mem().is_none(),
        Expr::Label(_) => false,
        _ => true,
    };
    if legal {
        Ok(src)
    } else {
        materialize(lw, src)
    }
}

/// `dst op= y` for a binary arithmetic op.
fn op_assign(lw: &mut Lowering<'_>, dst: &Expr, op: Op, y: Expr) -> CompileResult<()> {
    let kind = dst.kind();
    let Some(assign) = op.binary_to_assign() else {
        return passthrough(lw, dst, Expr::raw_binary(op, kind, dst.clone(), y));
    };
    scoped(lw, |lw| op_assign_with(lw, dst, op, assign, y))
}

fn op_assign_with(
    lw: &mut Lowering<'_>,
    dst: &Expr,
    op: Op,
    assign: Op,
    y: Expr,
) -> CompileResult<()> {
    let kind = dst.kind();
    match op {
        Op::Add | Op::Sub | Op::And | Op::Or | Op::Xor => {
            let src = rhs(lw, y, dst)?;
            lw.emit(Expr::raw_binary(assign, kind, dst.clone(), src));
            Ok(())
        }
        Op::AndNot => {
            let mask = match value(lw, y)? {
                Expr::Const(c) => {
                    let inverted = Const::from_bits(kind, !c.bits().0, 0);
                    rhs(lw, inverted.into(), dst)?
                }
                v => {
                    let t = Expr::Reg(lw.scratch(kind, &"and-not mask")?);
                    mov(lw, &t, v)?;
                    lw.emit(Expr::raw_binary(
                        Op::Assign,
                        kind,
                        t.clone(),
                        Expr::raw_unary(Op::Inv, kind, t.clone()),
                    ));
                    t
                }
            };
            lw.emit(Expr::raw_binary(Op::AndAssign, kind, dst.clone(), mask));
            Ok(())
        }
        Op::Mul if kind.size() == 1 => {
            let src = value(lw, y)?;
            let e = Expr::raw_binary(assign, kind, dst.clone(), src);
            degrade(&e);
            lw.emit(e);
            Ok(())
        }
        Op::Mul if dst.as_mem().is_some() => {
            let t = Expr::Reg(lw.scratch(kind, &"multiply")?);
            mov(lw, &t, dst.clone())?;
            op_assign(lw, &t, op, y)?;
            mov(lw, dst, t)
        }
        Op::Mul => {
            let src = rhs(lw, y, dst)?;
            lw.emit(Expr::raw_binary(assign, kind, dst.clone(), src));
            Ok(())
        }
        Op::Shl | Op::Shr => shift(lw, dst, op, y),
        Op::Quo | Op::Rem => divide(lw, dst, op, y),
        _ => passthrough(lw, dst, Expr::raw_binary(op, kind, dst.clone(), y)),
    }
}

fn shift(lw: &mut Lowering<'_>, dst: &Expr, op: Op, y: Expr) -> CompileResult<()> {
    let kind = dst.kind();
    let bits = kind.bits();
    let assign = if op == Op::Shl {
        Op::ShlAssign
    } else {
        Op::ShrAssign
    };
    match value(lw, y)? {
        Expr::Const(c) => {
            if c.kind().is_signed() && c.as_i64() < 0 {
                return Err(CompileError::NegativeShift { count: c.as_i64() });
            }
            let count = c.as_u64();
            if count >= bits as u64 {
                if op == Op::Shr && kind.is_signed() {
                    let max = Const::uint8((bits - 1) as u8);
                    lw.emit(Expr::raw_binary(assign, kind, dst.clone(), max.into()));
                    return Ok(());
                }
                return store_const(lw, dst, Const::zero(kind));
            }
            let count = Const::uint8(count as u8);
            lw.emit(Expr::raw_binary(assign, kind, dst.clone(), count.into()));
            Ok(())
        }
        count => {
            let cl = fixed(count.kind(), RCX);
            mov(lw, &cl, count)?;
            lw.emit(Expr::raw_binary(assign, kind, dst.clone(), fixed(Kind::Uint8, RCX)));
            Ok(())
        }
    }
}

fn divide(lw: &mut Lowering<'_>, dst: &Expr, op: Op, y: Expr) -> CompileResult<()> {
    let kind = dst.kind();
    let assign = if op == Op::Quo {
        Op::QuoAssign
    } else {
        Op::RemAssign
    };
    if kind.size() == 1 {
        let src = value(lw, y)?;
        let e = Expr::raw_binary(assign, kind, dst.clone(), src);
        degrade(&e);
        lw.emit(e);
        return Ok(());
    }
    let divisor = match value(lw, y)? {
        v @ (Expr::Reg(_) | Expr::Mem(_)) => v,
        v => materialize(lw, v)?,
    };
    let rax = fixed(kind, RAX);
    mov(lw, &rax, dst.clone())?;
    lw.emit(Expr::raw_binary(assign, kind, rax.clone(), divisor));
    mov(lw, dst, rax)
}

/// Emit CMP or TEST for `x op y` and return the condition that holds when
/// the comparison is true.
fn flags(lw: &mut Lowering<'_>, op: Op, x: Expr, y: Expr) -> CompileResult<Cond> {
    let kind = x.kind();
    let cond = Cond::from_comparison(op, kind).ok_or_else(|| CompileError::invalid_op(op, &[kind]))?;
    scoped(lw, |lw| set_flags(lw, op, kind, cond, x, y))
}

fn set_flags(
    lw: &mut Lowering<'_>,
    op: Op,
    kind: Kind,
    cond: Cond,
    x: Expr,
    y: Expr,
) -> CompileResult<Cond> {
    if matches!(op, Op::Eql | Op::Neq) && y.as_const().is_some_and(Const::is_zero) {
        match x {
            Expr::Binary(b) if b.op() == Op::And => {
                let (_, kind, a, m) = b.into_parts();
                test(lw, kind, a, m)?;
            }
            x => match value(lw, x)? {
                v @ Expr::Reg(_) => lw.emit(Expr::raw_binary(Op::Test, kind, v.clone(), v)),
                v => {
                    let v = match v {
                        Expr::Mem(_) => v,
                        other => materialize(lw, other)?,
                    };
                    let zero = Const::zero(kind).into();
                    lw.emit(Expr::raw_binary(Op::Cmp, kind, v, zero));
                }
            },
        }
        return Ok(cond);
    }

    let mut cond = cond;
    let mut a = value(lw, x)?;
    let mut b = value(lw, y)?;
    if a.is_const() && !b.is_const() {
        std::mem::swap(&mut a, &mut b);
        cond = cond.swapped();
    }
    if matches!(a, Expr::Const(_) | Expr::Label(_)) {
        a = materialize(lw, a)?;
    }
    let b_legal = match &b {
        Expr::Const(c) => imm_fits(c),
        Expr::Mem(_) => a.as_mem().is_none(),
        Expr::Label(_) => false,
        _ => true,
    };
    if !b_legal {
        b = materialize(lw, b)?;
    }
    lw.emit(Expr::raw_binary(Op::Cmp, kind, a, b));
    Ok(cond)
}

fn test(lw: &mut Lowering<'_>, kind: Kind, a: Expr, m: Expr) -> CompileResult<()> {
    let mut p = value(lw, a)?;
    let mut q = value(lw, m)?;
    if p.is_const() {
        std::mem::swap(&mut p, &mut q);
    }
    if matches!(p, Expr::Const(_) | Expr::Label(_)) {
        p = materialize(lw, p)?;
    }
    if q.as_mem().is_some() && p.as_reg().is_some() {
        std::mem::swap(&mut p, &mut q);
    }
    let q_legal = match &q {
        Expr::Const(c) => imm_fits(c),
        Expr::Mem(_) => false,
        Expr::Label(_) => false,
        _ => true,
    };
    if !q_legal {
        q = materialize(lw, q)?;
    }
    lw.emit(Expr::raw_binary(Op::Test, kind, p, q));
    Ok(())
}

fn integer_comparison(x: &Expr) -> bool {
    let k = x.kind();
    k.is_integer() || k.is_pointer() || k.is_bool()
}

fn compare_into(lw: &mut Lowering<'_>, dst: &Expr, op: Op, x: Expr, y: Expr) -> CompileResult<()> {
    if !integer_comparison(&x) {
        return passthrough(lw, dst, Expr::raw_binary(op, Kind::Bool, x, y));
    }
    let cond = flags(lw, op, x, y)?;
    lw.emit(Expr::raw_unary(Op::Setcc(cond), Kind::Bool, dst.clone()));
    Ok(())
}

fn logical_into(lw: &mut Lowering<'_>, dst: &Expr, op: Op, x: Expr, y: Expr) -> CompileResult<()> {
    // dst holds x while y is evaluated
    if mentions(lw, &y, dst)? || (is_fixed(dst) && clobbers_fixed(&y)) {
        return scoped(lw, |lw| {
            let t = lw.temp(Kind::Bool, &"logical operand")?;
            logical_into(lw, &t, op, x, y)?;
            mov(lw, dst, t)
        });
    }
    let end = lw.new_label();
    into(lw, dst, x, None)?;
    lw.emit(Expr::raw_binary(
        Op::Cmp,
        Kind::Bool,
        dst.clone(),
        Const::bool(false).into(),
    ));
    let skip = if op == Op::LAnd { Cond::Eq } else { Cond::Ne };
    lw.emit(Expr::raw_unary(Op::Jcc(skip), Kind::Void, Expr::Label(end)));
    into(lw, dst, y, None)?;
    lw.emit(Expr::Label(end));
    Ok(())
}

fn jcc(lw: &mut Lowering<'_>, cond: Cond, label: Label) {
    lw.emit(Expr::raw_unary(Op::Jcc(cond), Kind::Void, Expr::Label(label)));
}

/// Jump to `label` when `cond` evaluates to `when`.
fn jump_if(lw: &mut Lowering<'_>, label: Label, cond: Expr, when: bool) -> CompileResult<()> {
    match cond {
        Expr::Const(c) => {
            if c.as_bool() == when {
                lw.emit(Expr::jump(label));
            }
            Ok(())
        }
        Expr::Unary(u) if u.op() == Op::LNot => jump_if(lw, label, u.into_parts().2, !when),
        Expr::Binary(b) if b.op().is_comparison() && integer_comparison(b.x()) => {
            let (op, _, x, y) = b.into_parts();
            let c = flags(lw, op, x, y)?;
            jcc(lw, if when { c } else { c.negated() }, label);
            Ok(())
        }
        Expr::Binary(b) if matches!(b.op(), Op::LAnd | Op::LOr) => {
            let (op, _, x, y) = b.into_parts();
            // a && b jumps only if both hold; a || b if either does
            if (op == Op::LAnd) == when {
                let skip = lw.new_label();
                jump_if(lw, skip, x, !when)?;
                jump_if(lw, label, y, when)?;
                lw.emit(Expr::Label(skip));
            } else {
                jump_if(lw, label, x, when)?;
                jump_if(lw, label, y, when)?;
            }
            Ok(())
        }
        Expr::Binary(b) if b.op().is_comparison() => {
            let cond = Expr::Binary(b);
            let cond = if when {
                cond
            } else {
                Expr::raw_unary(Op::LNot, Kind::Bool, cond)
            };
            let e = Expr::raw_binary(Op::JumpIf, Kind::Void, Expr::Label(label), cond);
            degrade(&e);
            lw.emit(e);
            Ok(())
        }
        cond => {
            scoped(lw, |lw| {
                match value(lw, cond)? {
                    v @ Expr::Reg(_) => lw.emit(Expr::raw_binary(Op::Test, Kind::Bool, v.clone(), v)),
                    v => {
                        let v = match v {
                            Expr::Mem(_) => v,
                            other => materialize(lw, other)?,
                        };
                        lw.emit(Expr::raw_binary(
                            Op::Cmp,
                            Kind::Bool,
                            v,
                            Const::bool(false).into(),
                        ));
                    }
                }
                Ok(())
            })?;
            jcc(lw, if when { Cond::Ne } else { Cond::Eq }, label);
            Ok(())
        }
    }
}

/// Emit a call. Only calls without arguments are lowered; the result is in RAX.
/// Scratch registers in use are caller-saved and kept on the stack meanwhile.
fn call(lw: &mut Lowering<'_>, e: Expr) -> CompileResult<Expr> {
    let (kind, has_args) = match &e {
        Expr::Call(c) => (c.kind(), !c.args().is_empty()),
        _ => (e.kind(), false),
    };
    if has_args {
        degrade(&e);
    }
    scoped(lw, |lw| {
        let live = lw.live_scratch();
        let mut saved = Vec::with_capacity(live.len());
        for &r in live {
            let slot = lw.stack_temp(Kind::Int64, &"scratch across call")?;
            lw.emit(Expr::raw_binary(
                Op::Assign,
                Kind::Int64,
                slot.clone(),
                fixed(Kind::Int64, r),
            ));
            saved.push((r, slot));
        }
        lw.emit(e);
        for (r, slot) in saved.into_iter().rev() {
            lw.emit(Expr::raw_binary(Op::Assign, Kind::Int64, fixed(Kind::Int64, r), slot));
        }
        Ok(())
    })?;
    Ok(if kind.is_void() { void() } else { fixed(kind, RAX) })
}

fn ret(lw: &mut Lowering<'_>, values: Vec<Expr>) -> CompileResult<Expr> {
    match values.len() {
        0 => {}
        1 => {
            for v in values {
                let rax = fixed(v.kind(), RAX);
                into(lw, &rax, v, None)?;
            }
        }
        2 => {
            let mut temps = Vec::with_capacity(2);
            for v in values {
                let t = lw.temp(v.kind(), &"return value")?;
                into(lw, &t, v, None)?;
                temps.push(t);
            }
            for (t, reg) in temps.into_iter().zip([RAX, RDX]) {
                let target = fixed(t.kind(), reg);
                mov(lw, &target, t)?;
            }
        }
        _ => {
            let e = Expr::raw_tuple(Op::Ret, values);
            degrade(&e);
            return Ok(e);
        }
    }
    lw.emit_frame(Op::AddAssign)?;
    for r in lw.saved_regs().iter().rev().copied().collect::<Vec<_>>() {
        lw.emit(Expr::raw_unary(Op::Pop, Kind::Int64, fixed(Kind::Int64, r)));
    }
    lw.emit(Expr::raw_tuple(Op::Ret, Vec::new()));
    Ok(void())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::{ArchId, ArchRegistry};
    use crate::core::expr::{AddrMode, RegId};
    use crate::core::label::LabelPool;
    use crate::core::regalloc::{Allocation, Location};
    use crate::x64::regs::{R10, R8, RBX, RDI, RSI, RSP};

    fn soft(id: u32) -> Expr {
        Expr::Reg(Reg::new(Kind::Int64, RegId::Soft(id)))
    }

    fn hard(e: &Expr) -> Option<HardReg> {
        e.as_reg().and_then(|r| r.id().hard())
    }

    fn lowered(alloc: Allocation, exprs: Vec<Expr>) -> Vec<Expr> {
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels);
        enter(&mut lw).unwrap();
        for e in exprs {
            let mark = lw.scratch_mark();
            let v = compile(&mut lw, e, true).unwrap();
            if !v.is_effect_free() {
                lw.emit(v);
            }
            lw.scratch_release(mark);
        }
        lw.finish().0
    }

    fn in_registers() -> Allocation {
        let mut alloc = Allocation::new();
        alloc.assign(0x100, Location::Reg(RSI));
        alloc.assign(0x101, Location::Reg(RDI));
        alloc.assign(0x102, Location::Reg(R8));
        alloc
    }

    fn on_stack() -> Allocation {
        let mut alloc = Allocation::new();
        alloc.assign(0x100, Location::Stack { base: RSP, offset: 0 });
        alloc.assign(0x101, Location::Stack { base: RSP, offset: 8 });
        alloc.set_frame_size(16);
        alloc
    }

    #[test]
    fn test_imm_fits() {
        assert!(imm_fits(&Const::int64(-1)));
        assert!(imm_fits(&Const::uint32(u32::MAX)));
        assert!(!imm_fits(&Const::int64(1 << 31)));
        assert!(!imm_fits(&Const::uint64(u64::MAX >> 1)));
    }

    #[test]
    fn test_variable_shift_count_in_cl() {
        let shifted = Expr::binary(Op::Shl, soft(0x100), soft(0x101)).unwrap();
        let code = lowered(in_registers(), vec![Expr::assign(soft(0x102), shifted).unwrap()]);
        assert_eq!(code.len(), 3);
        let count = code[1].as_binary().unwrap();
        assert_eq!((hard(count.x()), hard(count.y())), (Some(RCX), Some(RDI)));
        let shl = code[2].as_binary().unwrap();
        assert_eq!(shl.op(), Op::ShlAssign);
        assert_eq!(hard(shl.x()), Some(R8));
        assert_eq!(shl.y().as_reg().map(|r| r.kind()), Some(Kind::Uint8));
    }

    #[test]
    fn test_stack_to_stack_goes_through_scratch() {
        let code = lowered(on_stack(), vec![Expr::assign(soft(0x100), soft(0x101)).unwrap()]);
        // sub rsp; load; store
        assert_eq!(code.len(), 3);
        assert_eq!(code[0].op(), Some(Op::SubAssign));
        let load = code[1].as_binary().unwrap();
        assert_eq!(hard(load.x()), Some(R10));
        assert_eq!(
            load.y().as_mem().and_then(Mem::mode),
            Some(&AddrMode::base_disp(RSP, 8))
        );
        let store = code[2].as_binary().unwrap();
        assert!(store.x().as_mem().is_some());
        assert_eq!(hard(store.y()), Some(R10));
    }

    #[test]
    fn test_wide_constant_store_is_materialized() {
        let wide = Const::int64(1 << 40).into();
        let code = lowered(on_stack(), vec![Expr::assign(soft(0x100), wide).unwrap()]);
        assert_eq!(code.len(), 3);
        assert_eq!(hard(code[1].as_binary().unwrap().x()), Some(R10));
        assert_eq!(hard(code[2].as_binary().unwrap().y()), Some(R10));
    }

    #[test]
    fn test_frame_released_before_return() {
        let code = lowered(on_stack(), vec![Expr::ret(vec![]).unwrap()]);
        assert_eq!(code.len(), 3);
        assert_eq!(code[0].op(), Some(Op::SubAssign));
        assert_eq!(code[0].as_binary().unwrap().y(), &Expr::Const(Const::ptr(16)));
        let release = code[1].as_binary().unwrap();
        assert_eq!(release.op(), Op::AddAssign);
        assert_eq!(release.y(), &Expr::Const(Const::ptr(16)));
        assert_eq!(code[2].op(), Some(Op::Ret));
    }

    #[test]
    fn test_callee_saved_register_is_pushed_and_popped() {
        let mut alloc = Allocation::new();
        alloc.assign(0x100, Location::Reg(RBX));
        alloc.assign(0x101, Location::Reg(RSI));
        let code = lowered(alloc, vec![Expr::ret(vec![soft(0x100)]).unwrap()]);
        // push rbx; mov rax,rbx; pop rbx; ret
        assert_eq!(code.len(), 4);
        assert_eq!(code[0].op(), Some(Op::Push));
        assert_eq!(hard(code[0].as_unary().unwrap().x()), Some(RBX));
        assert_eq!(hard(code[1].as_binary().unwrap().x()), Some(RAX));
        assert_eq!(code[2].op(), Some(Op::Pop));
        assert_eq!(hard(code[2].as_unary().unwrap().x()), Some(RBX));
        assert_eq!(code[3].op(), Some(Op::Ret));
    }

    #[test]
    fn test_busy_scratch_spills_operand_to_stack() {
        // (a + b) * (a + c) with both scratch registers already taken
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let alloc = in_registers();
        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels);
        lw.scratch(Kind::Int64, &"held").unwrap();
        let lhs = Expr::binary(Op::Add, soft(0x100), soft(0x101)).unwrap();
        let rhs = Expr::binary(Op::Add, soft(0x100), soft(0x102)).unwrap();
        let product = Expr::binary(Op::Mul, lhs, rhs).unwrap();
        let v = compile(&mut lw, product, false).unwrap();
        assert_eq!(hard(&v), Some(crate::x64::regs::R11));

        let (code, frame) = lw.finish();
        let imul = code.last().unwrap().as_binary().unwrap();
        assert_eq!(imul.op(), Op::MulAssign);
        assert_eq!(imul.y().as_mem().and_then(Mem::mode), Some(&AddrMode::base_disp(RSP, 0)));
        assert_eq!(frame, 16);
    }

    #[test]
    fn test_negative_constant_shift_fails() {
        let shifted = Expr::raw_binary(
            Op::Shl,
            Kind::Int64,
            soft(0x100),
            Const::int64(-1).into(),
        );
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let alloc = in_registers();
        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels);
        let err = compile(&mut lw, Expr::assign(soft(0x102), shifted).unwrap(), true);
        assert!(matches!(err, Err(CompileError::NegativeShift { count: -1 })));
    }
}
