//! Flattening of multi-dimensional vector code to 1-D vectors.
//!
//! Every vector of rank > 1 is converted to the 1-D vector with the same element
//! count. Operations whose semantics depend on the shape (slices, shuffles, extracts,
//! inserts, transposes, row-wise loads and stores) are rewritten to address the flat
//! vector directly; elementwise math is simply rebuilt with flat types. Values crossing
//! between a flattened producer and an untouched consumer are bridged with
//! `shape_cast`, which [`fold_shape_casts`](crate::cleanup::fold_shape_casts) tidies
//! afterwards.
//!
//! # Rules
//!
//! - [`arith`] - constants and elementwise math
//! - [`memory`] - 2-D `load` / `store` unrolled into row accesses
//! - [`slice`] - strided slices, shuffles, extract/insert and transpose as flat shuffles
//! - [`cast`] - `splat`, `vector_bitcast` and `create_mask`
//! - [`scf`] - loop-carried vectors
//! - [`broadcast`] - `broadcast` pre-lowering, run before the conversion itself

pub mod arith;
pub mod broadcast;
pub mod cast;
pub mod memory;
pub mod scf;
pub mod slice;

use snafu::ResultExt;
use subtile_ir::conversion::{
    Conversion, ConversionStats, ConversionTarget, PatternSet, TypeConverter, apply_conversion,
};
use subtile_ir::attr::names;
use subtile_ir::{Graph, OpId, OpKind, Type, ValueId, VectorType};

use crate::cleanup::fold_shape_casts;
use crate::config::LinearizeConfig;
use crate::error::{LinearizationFailedSnafu, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinearizeStats {
    /// Broadcast pre-lowering run; zero when it was disabled.
    pub broadcasts: ConversionStats,
    pub conversion: ConversionStats,
    /// Casts removed by the cleanup.
    pub folded_casts: usize,
}

/// Linearize every multi-dimensional vector operation of `graph`.
///
/// On error `graph` is left as it was.
#[tracing::instrument(skip_all)]
pub fn linearize(graph: &mut Graph, config: &LinearizeConfig) -> Result<LinearizeStats> {
    let mut stats = LinearizeStats::default();
    let mut work = graph.clone();

    if config.lower_broadcasts {
        stats.broadcasts = broadcast::lower_broadcasts(&mut work, &config.conversion)?;
    }

    let converter = type_converter();
    stats.conversion = apply_conversion(&mut work, &target(), &patterns(), &mut (), Some(&converter), &config.conversion)
        .context(LinearizationFailedSnafu)?;

    if config.fold_shape_casts {
        stats.folded_casts = fold_shape_casts(&mut work);
    }

    tracing::debug!(
        rewrites = stats.conversion.rewrites,
        folded_casts = stats.folded_casts,
        graph = %work.display(),
        "after linearization"
    );
    *graph = work;
    Ok(stats)
}

// ============================================================================
// Type conversion
// ============================================================================

/// Flat counterpart of a vector type.
///
/// Rank > 1 vectors become 1-D with the same element count; the result is scalable if
/// any dimension was. Vectors with more than one scalable dimension have no flat form.
pub fn linearized(ty: &Type) -> Conversion {
    let Some(vector) = ty.as_vector() else { return Conversion::Unchanged };
    if vector.rank() <= 1 {
        return Conversion::Unchanged;
    }
    if vector.num_scalable_dims() > 1 {
        return Conversion::Unconvertible;
    }
    let flat = VectorType::scalable(vec![vector.num_elements()], vector.elem, vec![vector.is_scalable()]);
    Conversion::Converted(Type::Vector(flat))
}

/// True for types the linearized program may contain.
pub fn is_linear(ty: &Type) -> bool {
    matches!(linearized(ty), Conversion::Unchanged)
}

pub fn type_converter() -> TypeConverter {
    let mut converter = TypeConverter::new();
    converter.add_conversion(linearized);
    converter
}

fn vector_rank(graph: &Graph, value: ValueId) -> usize {
    graph.value_type(value).rank()
}

fn all_types_linear(graph: &Graph, op: OpId) -> bool {
    let operands = graph.operands(op).iter();
    let results = graph.results(op).iter();
    operands.chain(results).all(|v| is_linear(graph.value_type(*v)))
}

pub fn target() -> ConversionTarget {
    use strum::IntoEnumIterator;

    let mut target = ConversionTarget::new();
    let elementwise: Vec<OpKind> = OpKind::iter().filter(|k| k.is_elementwise()).collect();
    target.add_dynamic(&elementwise, all_types_linear);
    target.add_dynamic(&[OpKind::Constant], all_types_linear);

    target.add_dynamic(&[OpKind::Shuffle], |g, op| vector_rank(g, g.result(op, 0)) <= 1);
    target.add_dynamic(&[OpKind::ExtractStridedSlice], |g, op| vector_rank(g, g.operand(op, 0)) <= 1);
    target.add_dynamic(&[OpKind::InsertStridedSlice], |g, op| {
        let unit_strides = g.attrs(op).ints(names::STRIDES).is_none_or(|s| s.iter().all(|&s| s == 1));
        let source = g.value_type(g.operand(op, 0)).shape();
        let leading_units = source.split_last().is_some_and(|(_, lead)| lead.iter().all(|&d| d == 1));
        !(unit_strides && source.len() != 1 && leading_units)
    });
    target.add_dynamic(&[OpKind::Extract], |g, op| vector_rank(g, g.operand(op, 0)) <= 1);
    target.add_dynamic(&[OpKind::Insert], |g, op| vector_rank(g, g.operand(op, 1)) <= 1);
    target.add_dynamic(&[OpKind::Load], |g, op| vector_rank(g, g.result(op, 0)) <= 1);
    target.add_dynamic(&[OpKind::Store], |g, op| vector_rank(g, g.operand(op, 0)) <= 1);
    target.add_dynamic(&[OpKind::CreateMask, OpKind::BitCast, OpKind::Splat], |g, op| {
        vector_rank(g, g.result(op, 0)) <= 1
    });
    target.add_dynamic(&[OpKind::For], |g, op| g.operands(op)[3..].iter().all(|v| is_linear(g.value_type(*v))));

    target.add_illegal(&[OpKind::Transpose]);
    target.add_legal(&[OpKind::ShapeCast, OpKind::ExtractElement]);
    target
}

pub fn patterns() -> PatternSet {
    arith::patterns() + memory::patterns() + slice::patterns() + cast::patterns() + scf::patterns()
}
