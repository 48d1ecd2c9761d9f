// This module holds the explicit architecture registry and the compilation context that
// replace process-wide backend tables and a global CPU-width setting. An Arch record bundles
// everything the pipeline needs to know about one target: its id and name, its native
// pointer width, the optional lowering, prologue, assembly and disassembly hooks, and the
// register tables the allocator and the lowering scratch pool draw from. ArchRegistry is
// built once before compilation (with_builtin registers amd64) and then only read through
// shared references. CompileContext carries the pointer width chosen for the current
// compilation and is checked against the target before any lowering starts.

//! Architecture registry and compile context.

use std::fmt;

use super::asm::Asm;
use super::compiled::ArchCompiled;
use super::error::{CompileError, CompileResult};
use super::expr::{Expr, HardReg};
use super::lowering::Lowering;

/// Numeric architecture identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchId(u8);

impl ArchId {
    pub const AMD64: ArchId = ArchId(1);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ArchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ArchId::AMD64 => f.write_str("amd64"),
            ArchId(id) => write!(f, "arch{id}"),
        }
    }
}

/// Native pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuWidth {
    W32,
    W64,
}

impl CpuWidth {
    pub const fn bits(self) -> u32 {
        match self {
            CpuWidth::W32 => 32,
            CpuWidth::W64 => 64,
        }
    }

    /// Pointer width of the machine running the compiler.
    pub const fn host() -> Self {
        if cfg!(target_pointer_width = "32") {
            CpuWidth::W32
        } else {
            CpuWidth::W64
        }
    }
}

/// Per-compilation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileContext {
    width: CpuWidth,
}

impl CompileContext {
    pub fn new(width: CpuWidth) -> Self {
        Self { width }
    }

    pub fn width(&self) -> CpuWidth {
        self.width
    }

    /// Must not change while a compilation is in flight.
    pub fn set_width(&mut self, width: CpuWidth) {
        self.width = width;
    }
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new(CpuWidth::host())
    }
}

/// Rewrites one expression into target-legal form. The flag is true for
/// top-level expressions whose value is discarded.
pub type LowerFn = fn(&mut Lowering<'_>, Expr, bool) -> CompileResult<Expr>;

/// Emits target code that runs before the lowered body.
pub type EnterFn = fn(&mut Lowering<'_>) -> CompileResult<()>;

/// Encodes lowered code into bytes.
pub type AssembleFn = fn(&Arch, &ArchCompiled) -> CompileResult<Asm>;

/// Renders encoded bytes as one line per instruction.
pub type DisassembleFn = fn(&[u8]) -> Vec<String>;

/// Everything the pipeline knows about one target.
#[derive(Debug, Clone, Copy)]
pub struct Arch {
    pub id: ArchId,
    pub name: &'static str,
    pub width: CpuWidth,
    pub lower: Option<LowerFn>,
    pub enter: Option<EnterFn>,
    pub assemble: Option<AssembleFn>,
    pub disassemble: Option<DisassembleFn>,
    /// Registers the allocator may hand out, in preference order.
    pub allocatable: &'static [HardReg],
    /// Registers reserved for temporaries created during lowering.
    pub scratch: &'static [HardReg],
    /// Registers a called function must hand back unchanged. Lowering saves
    /// the ones the allocation uses; the allocator keeps values live across
    /// calls in them.
    pub callee_saved: &'static [HardReg],
    pub stack_pointer: Option<HardReg>,
    pub object_arch: Option<object::Architecture>,
}

impl Arch {
    /// Record with no hooks and no registers; fill in what the target supports.
    pub const fn bare(id: ArchId, name: &'static str, width: CpuWidth) -> Self {
        Self {
            id,
            name,
            width,
            lower: None,
            enter: None,
            assemble: None,
            disassemble: None,
            allocatable: &[],
            scratch: &[],
            callee_saved: &[],
            stack_pointer: None,
            object_arch: None,
        }
    }
}

/// Table of known targets.
#[derive(Debug, Clone, Default)]
pub struct ArchRegistry {
    archs: Vec<Arch>,
}

impl ArchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every back end linked into the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::x64::register(&mut registry);
        registry
    }

    pub fn register(&mut self, arch: Arch) -> CompileResult<()> {
        if self.archs.iter().any(|a| a.id == arch.id) {
            return Err(CompileError::DuplicateArch { name: arch.name });
        }
        log::debug!("registered architecture {} ({}-bit)", arch.name, arch.width.bits());
        self.archs.push(arch);
        Ok(())
    }

    pub fn get(&self, id: ArchId) -> CompileResult<&Arch> {
        self.archs
            .iter()
            .find(|a| a.id == id)
            .ok_or(CompileError::UnknownArch { id: id.raw() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arch> {
        self.archs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = ArchRegistry::with_builtin();
        let amd64 = registry.get(ArchId::AMD64).unwrap();
        assert_eq!(amd64.name, "amd64");
        assert_eq!(amd64.width, CpuWidth::W64);
        assert!(matches!(
            registry.get(ArchId::new(9)),
            Err(CompileError::UnknownArch { id: 9 })
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ArchRegistry::with_builtin();
        let again = Arch::bare(ArchId::AMD64, "amd64", CpuWidth::W64);
        assert!(matches!(
            registry.register(again),
            Err(CompileError::DuplicateArch { name: "amd64" })
        ));
        assert!(registry
            .register(Arch::bare(ArchId::new(7), "toy", CpuWidth::W32))
            .is_ok());
        assert_eq!(registry.iter().count(), 2);
    }

    #[test]
    fn test_context_width() {
        let mut ctx = CompileContext::default();
        assert_eq!(ctx.width(), CpuWidth::host());
        ctx.set_width(CpuWidth::W32);
        assert_eq!(ctx.width().bits(), 32);
    }
}
