// This module holds the two flattened forms of a function. Compiled is the generic labelled
// sequence produced by statement flattening; adding an expression whose evaluation has no
// observable effect drops it on the spot, which is the whole of dead-code elimination here.
// to_arch looks the target up in an explicit ArchRegistry, rejects it when its pointer
// width differs from the CompileContext, and runs the target's prologue hook and lowering
// function over every expression with the top-level flag set, discarding effect-free
// results and releasing the scratch pool after each one. A target without a lowering
// function gets the generic sequence back unchanged with a warning. ArchCompiled is the
// lowered sequence plus the label pool and the final frame size, which covers spill
// slots, stack temporaries and call alignment.

//! Flattened functions before and after target lowering.

use std::fmt;

use super::arch::{ArchId, ArchRegistry, CompileContext};
use super::asm::Asm;
use super::error::{CompileError, CompileResult};
use super::expr::Expr;
use super::func::Func;
use super::label::{Label, LabelPool};
use super::lowering::Lowering;
use super::op::Op;
use super::regalloc::Allocation;

/// Generic flattened function.
#[derive(Debug, Clone)]
pub struct Compiled {
    func: Func,
    code: Vec<Expr>,
}

impl Compiled {
    pub(crate) fn new(func: Func) -> Self {
        Self {
            func,
            code: Vec::new(),
        }
    }

    pub fn func(&self) -> &Func {
        &self.func
    }

    pub fn name(&self) -> &str {
        self.func.name()
    }

    pub fn code(&self) -> &[Expr] {
        &self.code
    }

    /// Append `expr` for its effect; pure expressions are dropped.
    pub fn add(&mut self, expr: Expr) {
        if expr.is_effect_free() {
            log::trace!("dropping effect-free {expr}");
            return;
        }
        self.code.push(expr);
    }

    pub fn new_label(&mut self) -> Label {
        self.func.labels_mut().new_label()
    }

    /// Lower for the target `arch` using a completed register allocation.
    pub fn to_arch(
        &self,
        registry: &ArchRegistry,
        ctx: &CompileContext,
        arch: ArchId,
        alloc: &Allocation,
    ) -> CompileResult<ArchCompiled> {
        let target = registry.get(arch)?;
        if target.width != ctx.width() {
            return Err(CompileError::WidthMismatch {
                arch: target.name,
                expected: target.width.bits(),
                actual: ctx.width().bits(),
            });
        }
        let mut labels = self.func.labels().clone();

        let Some(lower) = target.lower else {
            log::warn!(
                "no lowering registered for {}, passing {} through unmodified",
                target.name,
                self.name()
            );
            return Ok(ArchCompiled {
                arch,
                name: self.name().to_string(),
                labels,
                frame_size: alloc.frame_size(),
                code: self.code.clone(),
            });
        };

        let makes_calls = self.code.iter().any(|e| e.contains_op(Op::Call));
        let mut lowering = Lowering::new(target, alloc, &mut labels).with_calls(makes_calls);
        if let Some(enter) = target.enter {
            enter(&mut lowering)?;
        }
        for expr in &self.code {
            let mark = lowering.scratch_mark();
            let lowered = lower(&mut lowering, expr.clone(), true)?;
            if !lowered.is_effect_free() {
                lowering.emit(lowered);
            }
            lowering.scratch_release(mark);
        }
        let (code, frame_size) = lowering.finish();
        log::debug!(
            "lowered {} for {}: {} -> {} expressions, frame {} bytes",
            self.name(),
            target.name,
            self.code.len(),
            code.len(),
            frame_size
        );
        Ok(ArchCompiled {
            arch,
            name: self.name().to_string(),
            labels,
            frame_size,
            code,
        })
    }
}

fn write_code(f: &mut fmt::Formatter<'_>, code: &[Expr]) -> fmt::Result {
    for e in code {
        match e {
            Expr::Label(l) => writeln!(f, "{l}:")?,
            e => writeln!(f, "\t{e}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {}{}", self.name(), self.func.signature())?;
        write_code(f, &self.code)
    }
}

/// Target-lowered function, ready for encoding.
#[derive(Debug, Clone)]
pub struct ArchCompiled {
    arch: ArchId,
    name: String,
    labels: LabelPool,
    frame_size: u32,
    code: Vec<Expr>,
}

impl ArchCompiled {
    pub fn arch(&self) -> ArchId {
        self.arch
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &LabelPool {
        &self.labels
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn code(&self) -> &[Expr] {
        &self.code
    }

    /// Encode with the target's assembler.
    pub fn assemble(&self, registry: &ArchRegistry) -> CompileResult<Asm> {
        let target = registry.get(self.arch)?;
        let assemble = target
            .assemble
            .ok_or_else(|| CompileError::unsupported(format!("assembly for {}", target.name)))?;
        let asm = assemble(target, self)?;
        log::debug!("assembled {}: {} bytes", self.name, asm.len());
        Ok(asm)
    }
}

impl fmt::Display for ArchCompiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {} [{}] frame {}", self.name, self.arch, self.frame_size)?;
        write_code(f, &self.code)
    }
}
