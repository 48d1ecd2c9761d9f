// This module strings the compilation stages together for callers that want bytes for a
// function without driving each stage themselves: the statement list is flattened (with
// dead-code elimination), registers are allocated by linear scan using a per-function
// bumpalo arena, the sequence is lowered for the chosen target under the compile context,
// and the target's encoder produces the final Asm.

//! One-call compilation of a function.

use bumpalo::Bump;

use crate::core::{
    ArchCompiled, ArchId, ArchRegistry, Asm, CompileContext, CompileResult, Func, LinearScan,
};

/// Flatten, allocate and lower `func` for `arch`.
pub fn lower_function(
    registry: &ArchRegistry,
    ctx: &CompileContext,
    arch: ArchId,
    func: Func,
) -> CompileResult<ArchCompiled> {
    let target = registry.get(arch)?;
    let compiled = func.compile()?;
    let arena = Bump::new();
    let alloc = LinearScan::for_arch(target)?.allocate(&compiled, &arena)?;
    log::debug!(
        "allocated {}: {} registers, frame {} bytes, arena {} bytes",
        compiled.name(),
        alloc.len(),
        alloc.frame_size(),
        arena.allocated_bytes()
    );
    compiled.to_arch(registry, ctx, arch, &alloc)
}

/// Compile `func` all the way to machine code for `arch`.
pub fn compile_function(
    registry: &ArchRegistry,
    ctx: &CompileContext,
    arch: ArchId,
    func: Func,
) -> CompileResult<Asm> {
    lower_function(registry, ctx, arch, func)?.assemble(registry)
}
