//! Static operation metadata.

use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;
use subtile_dtype::ScalarDType;

use crate::types::Order;

/// Attribute keys shared by builders, passes and the printer.
pub mod names {
    pub const VALUE: &str = "value";
    pub const PERMUTATION: &str = "permutation";
    pub const REDUCTION_DIMS: &str = "reduction_dims";
    pub const KIND: &str = "kind";
    pub const POSITION: &str = "position";
    pub const OFFSETS: &str = "offsets";
    pub const SIZES: &str = "sizes";
    pub const STRIDES: &str = "strides";
    pub const MASK: &str = "mask";
    pub const PREDICATE: &str = "predicate";
    pub const SYM_NAME: &str = "sym_name";
    pub const L1_HINT: &str = "l1_hint";
    pub const L2_HINT: &str = "l2_hint";
    pub const L3_HINT: &str = "l3_hint";
    pub const TRANSPOSE: &str = "transpose";
    pub const ORDER: &str = "order";
}

/// Sentinel stored in a static position list for an entry supplied as an operand.
pub const DYNAMIC_POSITION: i64 = i64::MIN;

/// Scalar constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

/// Cast to the target width and back to the storage type (for truncation/extension).
macro_rules! cast_via {
    ($v:expr, $target:ty, $storage:ty) => {
        ($v as $target) as $storage
    };
}

fn from_int(v: i64, to: ScalarDType) -> ConstValue {
    use ScalarDType::*;
    match to {
        Bool => ConstValue::Bool(v != 0),
        Int8 => ConstValue::Int(cast_via!(v, i8, i64)),
        Int16 => ConstValue::Int(cast_via!(v, i16, i64)),
        Int32 => ConstValue::Int(cast_via!(v, i32, i64)),
        Int64 | Index => ConstValue::Int(v),
        UInt8 => ConstValue::UInt(cast_via!(v, u8, u64)),
        UInt16 => ConstValue::UInt(cast_via!(v, u16, u64)),
        UInt32 => ConstValue::UInt(cast_via!(v, u32, u64)),
        UInt64 => ConstValue::UInt(v as u64),
        Float16 | BFloat16 | Float32 | Float64 => ConstValue::Float(v as f64),
    }
}

fn from_float(v: f64, to: ScalarDType) -> ConstValue {
    use ScalarDType::*;
    match to {
        Bool => ConstValue::Bool(v != 0.0),
        Float16 | BFloat16 | Float32 | Float64 => ConstValue::Float(v),
        // Float-to-unsigned goes through i64 first.
        _ => from_int(v as i64, to),
    }
}

impl ConstValue {
    pub const fn zero(dtype: ScalarDType) -> Self {
        use ScalarDType::*;
        match dtype {
            Bool => Self::Bool(false),
            Int8 | Int16 | Int32 | Int64 | Index => Self::Int(0),
            UInt8 | UInt16 | UInt32 | UInt64 => Self::UInt(0),
            Float16 | BFloat16 | Float32 | Float64 => Self::Float(0.0),
        }
    }

    pub const fn one(dtype: ScalarDType) -> Self {
        use ScalarDType::*;
        match dtype {
            Bool => Self::Bool(true),
            Int8 | Int16 | Int32 | Int64 | Index => Self::Int(1),
            UInt8 | UInt16 | UInt32 | UInt64 => Self::UInt(1),
            Float16 | BFloat16 | Float32 | Float64 => Self::Float(1.0),
        }
    }

    /// Cast with C semantics (truncating narrowing, wrap-around for unsigned, toward-zero
    /// for float to int). Float narrowing keeps `f64` precision.
    pub fn cast(&self, to: ScalarDType) -> Self {
        match *self {
            Self::Bool(b) => from_int(b as i64, to),
            Self::Int(v) => from_int(v, to),
            Self::UInt(v) => from_int(v as i64, to),
            Self::Float(v) => from_float(v, to),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            Self::UInt(v) => i64::try_from(v).ok(),
            Self::Bool(b) => Some(b as i64),
            Self::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::Float(v) => v,
            Self::Bool(b) => b as u8 as f64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            Self::Bool(b) => b,
            Self::Int(v) => v != 0,
            Self::UInt(v) => v != 0,
            Self::Float(v) => v != 0.0,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ConstValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ConstValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f32> for ConstValue {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for ConstValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ConstValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Payload of a vector constant, stored row-major.
///
/// The shape comes from the constant's result type, so reshaping a constant is a type
/// change only.
#[derive(Debug, Clone, PartialEq)]
pub enum DenseElements {
    Splat(ConstValue),
    Values(Vec<ConstValue>),
}

impl DenseElements {
    pub fn from_slice<T: Copy + Into<ConstValue>>(values: &[T]) -> Self {
        Self::Values(values.iter().map(|v| (*v).into()).collect())
    }

    pub fn is_splat(&self) -> bool {
        matches!(self, Self::Splat(_))
    }

    /// Element at row-major position `i`.
    pub fn get(&self, i: usize) -> Option<ConstValue> {
        match self {
            Self::Splat(v) => Some(*v),
            Self::Values(vs) => vs.get(i).copied(),
        }
    }

    /// First `n` elements in row-major order.
    pub fn prefix(&self, n: usize) -> Self {
        match self {
            Self::Splat(v) => Self::Splat(*v),
            Self::Values(vs) => Self::Values(vs.iter().take(n).copied().collect()),
        }
    }

    /// Materialize `n` elements.
    pub fn to_vec(&self, n: usize) -> Vec<ConstValue> {
        match self {
            Self::Splat(v) => vec![*v; n],
            Self::Values(vs) => vs.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CmpPredicate {
    // Integer
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
    // Float (ordered)
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CombiningKind {
    Add,
    Mul,
    MaximumF,
    MinimumF,
    MaxSI,
    MinSI,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CacheHint {
    Cached,
    Uncached,
    Streaming,
    WriteBack,
    WriteThrough,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Ints(SmallVec<[i64; 4]>),
    Bool(bool),
    Str(String),
    Dense(DenseElements),
    Predicate(CmpPredicate),
    Combining(CombiningKind),
    Hint(CacheHint),
    Order(Order),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Ints(vs) => {
                let parts: Vec<String> =
                    vs.iter().map(|v| if *v == DYNAMIC_POSITION { "?".to_string() } else { v.to_string() }).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Dense(DenseElements::Splat(v)) => write!(f, "dense<{v}>"),
            Self::Dense(DenseElements::Values(vs)) => {
                let parts: Vec<String> = vs.iter().map(|v| v.to_string()).collect();
                write!(f, "dense<[{}]>", parts.join(", "))
            }
            Self::Predicate(p) => write!(f, "{p}"),
            Self::Combining(k) => write!(f, "#{k}"),
            Self::Hint(h) => write!(f, "#{h}"),
            Self::Order(o) => write!(f, "{o}"),
        }
    }
}

/// Ordered attribute dictionary of one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<&'static str, Attribute>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, attr: Attribute) -> Self {
        self.0.insert(name, attr);
        self
    }

    pub fn set(&mut self, name: &'static str, attr: Attribute) {
        self.0.insert(name, attr);
    }

    pub fn remove(&mut self, name: &str) -> Option<Attribute> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Attribute)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn ints(&self, name: &str) -> Option<&[i64]> {
        match self.get(name)? {
            Attribute::Ints(vs) => Some(vs),
            _ => None,
        }
    }

    pub fn dense(&self, name: &str) -> Option<&DenseElements> {
        match self.get(name)? {
            Attribute::Dense(d) => Some(d),
            _ => None,
        }
    }

    pub fn predicate(&self) -> Option<CmpPredicate> {
        match self.get(names::PREDICATE)? {
            Attribute::Predicate(p) => Some(*p),
            _ => None,
        }
    }

    pub fn combining_kind(&self) -> Option<CombiningKind> {
        match self.get(names::KIND)? {
            Attribute::Combining(k) => Some(*k),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Cache-hint attributes, copied verbatim onto rewritten memory operations.
    pub fn hints(&self) -> Attributes {
        Self(self.0.iter().filter(|(_, v)| matches!(v, Attribute::Hint(_))).map(|(k, v)| (*k, v.clone())).collect())
    }
}

impl FromIterator<(&'static str, Attribute)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (&'static str, Attribute)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// `Ints` attribute from any integer slice.
pub fn ints<T: Copy + TryInto<i64>>(values: &[T]) -> Attribute {
    Attribute::Ints(values.iter().map(|v| (*v).try_into().unwrap_or(DYNAMIC_POSITION)).collect())
}
