//! Primitive value kinds.
//!
//! Every IR node carries exactly one [`Kind`]. Pointers are carried at
//! 64 bits inside the IR; the pointer width of a lowering target is checked
//! against the [`CompileContext`](super::arch::CompileContext) instead.

use std::fmt;

/// Primitive type descriptor: byte size plus category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Complex64,
    Complex128,
    Ptr,
}

impl Kind {
    /// Size in bytes.
    pub const fn size(self) -> u32 {
        match self {
            Kind::Void => 0,
            Kind::Bool | Kind::Int8 | Kind::Uint8 => 1,
            Kind::Int16 | Kind::Uint16 => 2,
            Kind::Int32 | Kind::Uint32 | Kind::Float32 => 4,
            Kind::Int64 | Kind::Uint64 | Kind::Float64 | Kind::Complex64 | Kind::Ptr => 8,
            Kind::Complex128 => 16,
        }
    }

    pub const fn bits(self) -> u32 {
        self.size() * 8
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Kind::Int8 | Kind::Int16 | Kind::Int32 | Kind::Int64)
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            Kind::Uint8 | Kind::Uint16 | Kind::Uint32 | Kind::Uint64
        )
    }

    pub const fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Kind::Float32 | Kind::Float64)
    }

    pub const fn is_complex(self) -> bool {
        matches!(self, Kind::Complex64 | Kind::Complex128)
    }

    /// Integer, float or complex.
    pub const fn is_number(self) -> bool {
        self.is_integer() || self.is_float() || self.is_complex()
    }

    /// Kinds that support `<`, `<=`, `>`, `>=`.
    pub const fn is_ordered(self) -> bool {
        self.is_integer() || self.is_float() || self.is_pointer()
    }

    pub const fn is_pointer(self) -> bool {
        matches!(self, Kind::Ptr)
    }

    pub const fn is_bool(self) -> bool {
        matches!(self, Kind::Bool)
    }

    pub const fn is_void(self) -> bool {
        matches!(self, Kind::Void)
    }

    /// Kinds compared and shifted as unsigned machine words.
    pub const fn is_unsigned_word(self) -> bool {
        self.is_unsigned() || self.is_pointer() || self.is_bool()
    }

    /// Integer kind with the given size and signedness.
    pub const fn integer(size: u32, signed: bool) -> Option<Kind> {
        Some(match (size, signed) {
            (1, true) => Kind::Int8,
            (2, true) => Kind::Int16,
            (4, true) => Kind::Int32,
            (8, true) => Kind::Int64,
            (1, false) => Kind::Uint8,
            (2, false) => Kind::Uint16,
            (4, false) => Kind::Uint32,
            (8, false) => Kind::Uint64,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Kind::Void => "void",
            Kind::Bool => "bool",
            Kind::Int8 => "int8",
            Kind::Int16 => "int16",
            Kind::Int32 => "int32",
            Kind::Int64 => "int64",
            Kind::Uint8 => "uint8",
            Kind::Uint16 => "uint16",
            Kind::Uint32 => "uint32",
            Kind::Uint64 => "uint64",
            Kind::Float32 => "float32",
            Kind::Float64 => "float64",
            Kind::Complex64 => "complex64",
            Kind::Complex128 => "complex128",
            Kind::Ptr => "ptr",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
