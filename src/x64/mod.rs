//! amd64 back end.
//!
//! - `regs`: register numbering and the allocator/scratch tables
//! - `lower`: instruction selection into amd64-legal expression forms
//! - `lea`: address-mode synthesis
//! - `encoder`: byte encoding of lowered forms
//! - `disasm`: listing of encoded bytes via iced-x86

pub mod disasm;
pub mod encoder;
pub mod lea;
pub mod lower;
pub mod regs;

use crate::core::arch::{Arch, ArchId, ArchRegistry, CpuWidth};

pub use encoder::Encoder;
pub use regs::*;

/// Record describing the amd64 target.
pub fn arch() -> Arch {
    Arch {
        lower: Some(lower::compile),
        enter: Some(lower::enter),
        assemble: Some(encoder::assemble),
        disassemble: Some(disasm::disassemble),
        allocatable: regs::ALLOCATABLE,
        scratch: regs::SCRATCH,
        callee_saved: regs::CALLEE_SAVED,
        stack_pointer: Some(regs::RSP),
        object_arch: Some(object::Architecture::X86_64),
        ..Arch::bare(ArchId::AMD64, "amd64", CpuWidth::W64)
    }
}

/// Add amd64 to `registry`. Registering twice is a no-op.
pub fn register(registry: &mut ArchRegistry) {
    if registry.get(ArchId::AMD64).is_err() {
        // Cannot collide: the id was just checked.
        let _ = registry.register(arch());
    }
}
