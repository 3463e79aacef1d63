//! Element kinds and memory scopes shared by every subtile crate.
//!
//! Shaped values (vectors, tiles, memrefs) live in `subtile-ir`; this crate only
//! knows about the scalar element a shaped value is made of and where its storage lives.


/// Memory scope of a tile, buffer or distributed value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum AddrSpace {
    /// Global/device memory.
    #[default]
    Global,
    /// Workgroup-shared local memory (visible to every subgroup of a workgroup).
    #[strum(serialize = "slm")]
    Local,
    /// Register file.
    Reg,
}

impl AddrSpace {
    /// Numeric memory-space id used when printing memref types.
    pub const fn id(&self) -> u32 {
        match self {
            Self::Global => 0,
            Self::Reg => 1,
            Self::Local => 3,
        }
    }
}

/// Scalar element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::Display, strum::EnumString)]
pub enum ScalarDType {
    #[strum(serialize = "i1")]
    Bool,

    #[strum(serialize = "i8")]
    Int8,
    #[strum(serialize = "ui8")]
    UInt8,
    #[strum(serialize = "i16")]
    Int16,
    #[strum(serialize = "ui16")]
    UInt16,
    #[strum(serialize = "i32")]
    Int32,
    #[strum(serialize = "ui32")]
    UInt32,
    #[strum(serialize = "i64")]
    Int64,
    #[strum(serialize = "ui64")]
    UInt64,

    #[strum(serialize = "f16")]
    Float16,
    #[strum(serialize = "bf16")]
    BFloat16,
    #[strum(serialize = "f32")]
    Float32,
    #[strum(serialize = "f64")]
    Float64,

    /// Target-width integer used for offsets, sizes and loop bounds.
    #[strum(serialize = "index")]
    Index,
}

impl ScalarDType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 => 4,
            Self::Int64 | Self::UInt64 => 8,
            Self::Float16 | Self::BFloat16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
            Self::Index => 8, // Treat as 64-bit index
        }
    }

    /// Bit width; `Bool` is a single bit.
    pub const fn bits(&self) -> usize {
        match self {
            Self::Bool => 1,
            _ => self.bytes() * 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned() || matches!(self, Self::Index)
    }

    pub const fn is_index(&self) -> bool {
        matches!(self, Self::Index)
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// Integer or boolean kinds that index arithmetic and comparisons accept.
    pub const fn is_integer_like(&self) -> bool {
        self.is_int() || self.is_bool()
    }
}
