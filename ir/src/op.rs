//! Operation kinds.
//!
//! Every operation in a [`Graph`](crate::Graph) is tagged with an [`OpKind`]. Operand and
//! result conventions for each kind are documented on the variant and enforced by
//! [`verify`](crate::verify).

/// Operation kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OpKind {
    // =========================================================================
    // Tile operations
    // =========================================================================
    /// `(memref, offsets...) -> tile`, or `(memref, indices) -> tile` for scatter tiles.
    InitTile,
    /// `(tile) -> vector`
    LoadTile,
    /// `(value, tile)`
    StoreTile,
    /// `(tile, mask) -> vector`
    LoadGather,
    /// `(value, tile, mask)`
    StoreScatter,
    /// `(a, b, [c]) -> vector`
    TileMma,
    /// `(tile)`
    PrefetchTile,
    /// `(tile, offset_x, offset_y) -> tile`
    UpdateTileOffset,
    /// `(vector) -> vector` with a different distribution.
    ConvertLayout,

    // =========================================================================
    // Vector operations
    // =========================================================================
    /// `(vector) -> vector`, attr `permutation`.
    Transpose,
    /// `(scalar | vector) -> vector`
    Broadcast,
    /// `(source, acc) -> acc`, attrs `kind`, `reduction_dims`.
    MultiReduction,
    ShapeCast,
    /// `(bound...) -> vector<i1>`
    CreateMask,
    /// `(scalar) -> vector`
    Splat,
    /// `(vector) -> vector` reinterpreting the trailing dimension.
    #[strum(serialize = "vector_bitcast")]
    BitCast,
    /// `(vector, dynamic_pos...) -> sub-vector | scalar`, attr `position`.
    Extract,
    /// `(value, dest, dynamic_pos...) -> dest`, attr `position`.
    Insert,
    /// `(vector<1-D>, position) -> scalar`
    ExtractElement,
    /// attrs `offsets`, `sizes`, `strides`.
    ExtractStridedSlice,
    /// `(value, dest) -> dest`, attrs `offsets`, `strides`.
    InsertStridedSlice,
    /// `(v1, v2) -> vector`, attr `mask`.
    Shuffle,
    /// `(memref, indices...) -> vector`
    Load,
    /// `(value, memref, indices...)`
    Store,

    // =========================================================================
    // Arithmetic and math (elementwise)
    // =========================================================================
    Constant,
    #[strum(serialize = "addf")]
    AddF,
    #[strum(serialize = "subf")]
    SubF,
    #[strum(serialize = "mulf")]
    MulF,
    #[strum(serialize = "divf")]
    DivF,
    #[strum(serialize = "maximumf")]
    MaximumF,
    #[strum(serialize = "minimumf")]
    MinimumF,
    #[strum(serialize = "addi")]
    AddI,
    #[strum(serialize = "subi")]
    SubI,
    #[strum(serialize = "muli")]
    MulI,
    #[strum(serialize = "andi")]
    AndI,
    #[strum(serialize = "ori")]
    OrI,
    #[strum(serialize = "xori")]
    XOrI,
    Exp,
    Sqrt,
    Log,
    Tanh,
    #[strum(serialize = "negf")]
    NegF,
    /// `(float base, int exponent) -> base type`
    #[strum(serialize = "fpowi")]
    FPowI,
    #[strum(serialize = "truncf")]
    TruncF,
    #[strum(serialize = "trunci")]
    TruncI,
    #[strum(serialize = "extf")]
    ExtF,
    #[strum(serialize = "extsi")]
    ExtSI,
    #[strum(serialize = "extui")]
    ExtUI,
    #[strum(serialize = "sitofp")]
    SIToFP,
    #[strum(serialize = "uitofp")]
    UIToFP,
    #[strum(serialize = "fptosi")]
    FPToSI,
    #[strum(serialize = "fptoui")]
    FPToUI,
    IndexCast,
    #[strum(serialize = "index_castui")]
    IndexCastUI,
    /// Same-width reinterpretation of each element.
    #[strum(serialize = "arith_bitcast")]
    ArithBitcast,
    #[strum(serialize = "cmpi")]
    CmpI,
    #[strum(serialize = "cmpf")]
    CmpF,
    /// `(cond, true_value, false_value)`
    Select,

    // =========================================================================
    // Index arithmetic and subgroup queries
    // =========================================================================
    IndexAdd,
    IndexMul,
    #[strum(serialize = "index_divu")]
    IndexDivU,
    #[strum(serialize = "index_remu")]
    IndexRemU,
    /// `() -> index`, linear subgroup id within the workgroup.
    SubgroupId,

    // =========================================================================
    // Memory and synchronization
    // =========================================================================
    /// `() -> memref`
    Alloc,
    /// `(buffer, byte_shift) -> memref`, reinterprets a byte buffer.
    View,
    /// `(memref) -> memref`, attr `permutation`.
    MemRefTranspose,
    /// Workgroup barrier.
    Barrier,

    // =========================================================================
    // Structure
    // =========================================================================
    /// One region whose arguments are the function parameters.
    Func,
    Return,
    /// `(lb, ub, step, inits...) -> results`; body args are `(iv, iter_args...)`.
    For,
    Yield,
}

impl OpKind {
    /// Same-type elementwise math (result type equals every operand type).
    pub const fn is_elementwise_same_type(&self) -> bool {
        use OpKind::*;
        matches!(
            self,
            AddF | SubF
                | MulF
                | DivF
                | MaximumF
                | MinimumF
                | AddI
                | SubI
                | MulI
                | AndI
                | OrI
                | XOrI
                | Exp
                | Sqrt
                | Log
                | Tanh
                | NegF
        )
    }

    /// Elementwise conversions (result shape equals operand shape, element kind changes).
    pub const fn is_cast(&self) -> bool {
        use OpKind::*;
        matches!(
            self,
            TruncF
                | TruncI
                | ExtF
                | ExtSI
                | ExtUI
                | SIToFP
                | UIToFP
                | FPToSI
                | FPToUI
                | IndexCast
                | IndexCastUI
                | ArithBitcast
        )
    }

    pub const fn is_compare(&self) -> bool {
        matches!(self, Self::CmpI | Self::CmpF)
    }

    /// Any operation that applies independently to every element of its operands.
    pub const fn is_elementwise(&self) -> bool {
        self.is_elementwise_same_type() || self.is_cast() || self.is_compare() || matches!(self, Self::Select | Self::FPowI)
    }

    pub const fn is_index_arith(&self) -> bool {
        matches!(self, Self::IndexAdd | Self::IndexMul | Self::IndexDivU | Self::IndexRemU)
    }

    pub const fn is_terminator(&self) -> bool {
        matches!(self, Self::Yield | Self::Return)
    }

    pub const fn has_region(&self) -> bool {
        matches!(self, Self::Func | Self::For)
    }
}
