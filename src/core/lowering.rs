//! State shared by a target's lowering hooks while one function is lowered.
//!
//! Soft registers are resolved through the [`Allocation`]; temporaries come
//! from the target's scratch pool and, once that runs dry, from stack slots
//! above the spill area. Both are handed out last-in first-out and released
//! back to a [`ScratchMark`]. The frame size is only known once the body is
//! lowered, so frame adjustments are emitted as placeholders and patched in
//! [`Lowering::finish`].

use std::fmt;

use super::arch::Arch;
use super::constant::Const;
use super::error::{CompileError, CompileResult};
use super::expr::{AddrMode, Expr, HardReg, Mem, Reg, RegId};
use super::kind::Kind;
use super::label::{Label, LabelPool};
use super::op::Op;
use super::regalloc::{Allocation, Location};

/// Temporaries in use at some point; see [`Lowering::scratch_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchMark {
    scratch: usize,
    temps: u32,
}

pub struct Lowering<'a> {
    arch: &'a Arch,
    alloc: &'a Allocation,
    labels: &'a mut LabelPool,
    out: Vec<Expr>,
    scratch_used: usize,
    /// 8-byte stack temporaries in use, and the most ever in use at once.
    temps: u32,
    temp_peak: u32,
    frame_fixups: Vec<usize>,
    saved: Vec<HardReg>,
    makes_calls: bool,
}

impl<'a> Lowering<'a> {
    pub fn new(arch: &'a Arch, alloc: &'a Allocation, labels: &'a mut LabelPool) -> Self {
        let mut saved: Vec<HardReg> = alloc
            .iter()
            .filter_map(|(_, loc)| match loc {
                Location::Reg(r) if arch.callee_saved.contains(&r) => Some(r),
                _ => None,
            })
            .collect();
        saved.sort_by_key(|r| r.index());
        saved.dedup();
        Self {
            arch,
            alloc,
            labels,
            out: Vec::new(),
            scratch_used: 0,
            temps: 0,
            temp_peak: 0,
            frame_fixups: Vec::new(),
            saved,
            makes_calls: false,
        }
    }

    /// Note that the body calls other functions, so the stack pointer must
    /// stay 16-byte aligned at each call.
    pub fn with_calls(mut self, makes_calls: bool) -> Self {
        self.makes_calls = makes_calls;
        self
    }

    pub fn arch(&self) -> &'a Arch {
        self.arch
    }

    /// Callee-saved registers the allocation uses, in register order.
    pub fn saved_regs(&self) -> &[HardReg] {
        &self.saved
    }

    /// Bytes below the saved registers: spill slots, stack temporaries and
    /// the padding that keeps calls aligned. Final once lowering is done.
    pub fn frame_size(&self) -> u32 {
        let mut frame = (self.alloc.frame_size() + 8 * self.temp_peak).next_multiple_of(16);
        // the return address and the pushes leave rsp 8 off when their count is even
        if self.makes_calls && self.saved.len() % 2 == 0 {
            frame += 8;
        }
        frame
    }

    pub fn emit(&mut self, expr: Expr) {
        log::trace!("  {expr}");
        self.out.push(expr);
    }

    /// Emit `sp op= frame` with the frame size filled in by [`finish`].
    ///
    /// [`finish`]: Lowering::finish
    pub fn emit_frame(&mut self, op: Op) -> CompileResult<()> {
        let sp = self.stack_pointer(&op)?;
        self.frame_fixups.push(self.out.len());
        self.emit(Expr::raw_binary(
            op,
            Kind::Ptr,
            Expr::Reg(Reg::hard(Kind::Ptr, sp)),
            Const::ptr(0).into(),
        ));
        Ok(())
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.new_label()
    }

    /// Physical form of a register reference: a hard register or a stack slot.
    pub fn resolve_reg(&self, reg: &Reg) -> CompileResult<Expr> {
        let RegId::Soft(id) = reg.id() else {
            return Ok(Expr::Reg(*reg));
        };
        Ok(match self.alloc.get(id)? {
            Location::Reg(hard) => {
                let r = Reg::hard(reg.kind(), hard);
                Expr::Reg(if reg.is_read_only() { r.read_only() } else { r })
            }
            Location::Stack { base, offset } => {
                let m = Mem::at(reg.kind(), AddrMode::base_disp(base, offset));
                Expr::Mem(if reg.is_read_only() { m.read_only() } else { m })
            }
        })
    }

    /// Take the next free scratch register.
    pub fn scratch(&mut self, kind: Kind, context: &dyn fmt::Display) -> CompileResult<Reg> {
        let hard = self
            .arch
            .scratch
            .get(self.scratch_used)
            .copied()
            .ok_or_else(|| CompileError::ScratchExhausted {
                context: context.to_string(),
            })?;
        self.scratch_used += 1;
        Ok(Reg::hard(kind, hard))
    }

    /// Give back `reg` if it is the most recently taken scratch register.
    pub fn scratch_free(&mut self, reg: HardReg) {
        if self.scratch_used > 0 && self.arch.scratch[self.scratch_used - 1] == reg {
            self.scratch_used -= 1;
        }
    }

    /// Scratch registers currently holding values.
    pub fn live_scratch(&self) -> &'static [HardReg] {
        let scratch = self.arch.scratch;
        &scratch[..self.scratch_used]
    }

    /// A scratch register if one is free, a stack temporary otherwise.
    pub fn temp(&mut self, kind: Kind, context: &dyn fmt::Display) -> CompileResult<Expr> {
        if self.scratch_used < self.arch.scratch.len() {
            return self.scratch(kind, context).map(Expr::Reg);
        }
        self.stack_temp(kind, context)
    }

    /// A fresh stack slot above the spill area.
    pub fn stack_temp(&mut self, kind: Kind, context: &dyn fmt::Display) -> CompileResult<Expr> {
        let sp = self.stack_pointer(context)?;
        let offset = self.alloc.frame_size() + 8 * self.temps;
        self.temps += kind.size().max(1).div_ceil(8);
        self.temp_peak = self.temp_peak.max(self.temps);
        let disp = i32::try_from(offset).map_err(|_| CompileError::FieldOverflow {
            what: "stack temporary offset",
            value: offset as i64,
            bits: 32,
        })?;
        Ok(Expr::Mem(Mem::at(kind, AddrMode::base_disp(sp, disp))))
    }

    fn stack_pointer(&self, context: &dyn fmt::Display) -> CompileResult<HardReg> {
        self.arch.stack_pointer.ok_or_else(|| CompileError::ScratchExhausted {
            context: context.to_string(),
        })
    }

    pub fn scratch_mark(&self) -> ScratchMark {
        ScratchMark {
            scratch: self.scratch_used,
            temps: self.temps,
        }
    }

    /// Release every temporary taken since `mark`.
    pub fn scratch_release(&mut self, mark: ScratchMark) {
        self.scratch_used = mark.scratch.min(self.scratch_used);
        self.temps = mark.temps.min(self.temps);
    }

    /// Lowered code and its final frame size. Frame placeholders are patched,
    /// or dropped when the function needs no frame.
    pub(crate) fn finish(self) -> (Vec<Expr>, u32) {
        let frame = self.frame_size();
        let mut fixups = self.frame_fixups.iter().copied().peekable();
        let mut code = Vec::with_capacity(self.out.len());
        for (i, e) in self.out.into_iter().enumerate() {
            if fixups.next_if_eq(&i).is_none() {
                code.push(e);
                continue;
            }
            if frame == 0 {
                continue;
            }
            match e {
                Expr::Binary(b) => {
                    let (op, kind, x, _) = b.into_parts();
                    code.push(Expr::raw_binary(op, kind, x, Const::ptr(frame as u64).into()));
                }
                e => code.push(e),
            }
        }
        (code, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::{ArchId, ArchRegistry};
    use crate::core::expr::HardReg;

    #[test]
    fn test_resolve_and_scratch() {
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let mut alloc = Allocation::new();
        let rbx = HardReg::new(ArchId::AMD64, 3);
        let rsp = HardReg::new(ArchId::AMD64, 4);
        alloc.assign(0x100, Location::Reg(rbx));
        alloc.assign(0x101, Location::Stack { base: rsp, offset: 8 });
        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels);

        let r = lw
            .resolve_reg(&Reg::new(Kind::Int32, RegId::Soft(0x100)))
            .unwrap();
        assert_eq!(r, Expr::Reg(Reg::hard(Kind::Int32, rbx)));
        let m = lw
            .resolve_reg(&Reg::new(Kind::Int64, RegId::Soft(0x101)))
            .unwrap();
        assert_eq!(m.as_mem().and_then(|m| m.mode()).map(|a| a.disp()), Some(8));
        assert!(lw.resolve_reg(&Reg::new(Kind::Int64, RegId::Soft(0x102))).is_err());

        let mark = lw.scratch_mark();
        lw.scratch(Kind::Int64, &"a").unwrap();
        lw.scratch(Kind::Int64, &"b").unwrap();
        assert!(matches!(
            lw.scratch(Kind::Int64, &"c"),
            Err(CompileError::ScratchExhausted { .. })
        ));
        lw.scratch_release(mark);
        assert!(lw.scratch(Kind::Int64, &"d").is_ok());
    }

    #[test]
    fn test_temps_fall_back_to_stack() {
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let rsp = HardReg::new(ArchId::AMD64, 4);
        let mut alloc = Allocation::new();
        alloc.set_frame_size(16);
        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels);

        let mark = lw.scratch_mark();
        assert!(lw.temp(Kind::Int64, &"a").unwrap().as_reg().is_some());
        assert!(lw.temp(Kind::Int64, &"b").unwrap().as_reg().is_some());
        let c = lw.temp(Kind::Int64, &"c").unwrap();
        let d = lw.temp(Kind::Int64, &"d").unwrap();
        assert_eq!(c.as_mem().and_then(Mem::mode), Some(&AddrMode::base_disp(rsp, 16)));
        assert_eq!(d.as_mem().and_then(Mem::mode), Some(&AddrMode::base_disp(rsp, 24)));
        lw.scratch_release(mark);
        assert!(lw.temp(Kind::Int64, &"e").unwrap().as_reg().is_some());

        // two temporaries at peak on top of 16 bytes of spills
        assert_eq!(lw.frame_size(), 32);
    }

    #[test]
    fn test_scratch_free_only_pops_the_top() {
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let alloc = Allocation::new();
        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels);

        let a = lw.scratch(Kind::Int64, &"a").unwrap();
        let b = lw.scratch(Kind::Int64, &"b").unwrap();
        lw.scratch_free(a.id().hard().unwrap());
        assert_eq!(lw.live_scratch().len(), 2);
        lw.scratch_free(b.id().hard().unwrap());
        assert_eq!(lw.live_scratch(), &arch.scratch[..1]);
    }

    #[test]
    fn test_frame_placeholders_patched_or_dropped() {
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let alloc = Allocation::new();

        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels);
        lw.emit_frame(Op::SubAssign).unwrap();
        let (code, frame) = lw.finish();
        assert!(code.is_empty());
        assert_eq!(frame, 0);

        // a call with no saved registers needs 8 bytes to realign rsp
        let mut labels = LabelPool::new();
        let mut lw = Lowering::new(arch, &alloc, &mut labels).with_calls(true);
        lw.emit_frame(Op::SubAssign).unwrap();
        let (code, frame) = lw.finish();
        assert_eq!(frame, 8);
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].as_binary().unwrap().y(), &Expr::Const(Const::ptr(8)));
    }

    #[test]
    fn test_saved_regs_follow_allocation() {
        let registry = ArchRegistry::with_builtin();
        let arch = registry.get(ArchId::AMD64).unwrap();
        let rbx = HardReg::new(ArchId::AMD64, 3);
        let rsi = HardReg::new(ArchId::AMD64, 6);
        let r12 = HardReg::new(ArchId::AMD64, 12);
        let mut alloc = Allocation::new();
        alloc.assign(0x100, Location::Reg(r12));
        alloc.assign(0x101, Location::Reg(rsi));
        alloc.assign(0x102, Location::Reg(rbx));
        alloc.assign(0x103, Location::Reg(rbx));
        let mut labels = LabelPool::new();
        let lw = Lowering::new(arch, &alloc, &mut labels);
        assert_eq!(lw.saved_regs(), &[rbx, r12]);
    }
}
