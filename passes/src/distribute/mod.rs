//! Workgroup-to-subgroup tile distribution.
//!
//! Input programs describe the work of a whole workgroup: tiles and vectors carry a
//! [`DistributionAttr`] on their type saying how they split across the subgroup grid.
//! This pass rewrites every such operation into the operations one subgroup executes.
//! An operation whose value is larger than one round of the grid expands into several
//! subgroup-level instances (one-to-many replacement), and the adaptor hands those
//! lists to the consumers.
//!
//! # Rules
//!
//! - [`tile`] - `init_tile` offset computation and the ops that iterate its replacements
//! - [`vector`] - constants, elementwise math and vector shape ops
//! - [`scf`] - loop-carried value flattening
//! - [`relayout`] - `convert_layout` through local scratch memory
//!
//! Offsets and replication counts live in [`offsets`].

pub mod offsets;
pub mod relayout;
pub mod scf;
pub mod tile;
pub mod vector;

use snafu::{OptionExt, ResultExt};
use subtile_ir::conversion::{Adaptor, ConversionStats, ConversionTarget, PatternSet, Rewriter, apply_conversion};
use subtile_ir::error::{MatchResult, MissingDistributionSnafu, ShapeMismatchSnafu, UnsupportedSnafu};
use subtile_ir::{Builder, DistributionAttr, Graph, OpKind, ValueId};

use crate::config::DistributeConfig;
use crate::error::{DistributionFailedSnafu, Result};
use crate::layout::{LayoutMap, analyze_layouts};

/// Operation kinds rewritten when they touch a distributed type.
pub const DISTRIBUTABLE: &[OpKind] = &[
    OpKind::InitTile,
    OpKind::LoadTile,
    OpKind::StoreTile,
    OpKind::LoadGather,
    OpKind::StoreScatter,
    OpKind::TileMma,
    OpKind::PrefetchTile,
    OpKind::UpdateTileOffset,
    OpKind::Transpose,
    OpKind::Broadcast,
    OpKind::MultiReduction,
    OpKind::ShapeCast,
    OpKind::CreateMask,
    OpKind::Constant,
];

/// State shared by the distribution rules during one run.
#[derive(Debug, Clone, Copy)]
pub struct DistributeCtx<'a> {
    pub layouts: &'a LayoutMap,
    pub fold_transpose: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributeStats {
    /// Values the layout analysis placed column-major.
    pub swapped: usize,
    pub conversion: ConversionStats,
}

/// Rewrite every distributed operation of `graph` into its subgroup form.
///
/// On error `graph` is left as it was.
#[tracing::instrument(skip_all)]
pub fn distribute(graph: &mut Graph, config: &DistributeConfig) -> Result<DistributeStats> {
    let layouts = analyze_layouts(graph);
    let mut ctx = DistributeCtx { layouts: &layouts, fold_transpose: config.fold_transpose_into_relayout };

    let conversion = apply_conversion(graph, &target(), &patterns(), &mut ctx, None, &config.conversion)
        .context(DistributionFailedSnafu)?;

    tracing::debug!(graph = %graph.display(), "after distribution");
    Ok(DistributeStats { swapped: layouts.len(), conversion })
}

/// Legality for distribution: nothing may produce or consume a distributed type.
pub fn target() -> ConversionTarget {
    let mut target = ConversionTarget::new();

    let mut kinds: Vec<OpKind> = DISTRIBUTABLE.to_vec();
    kinds.extend(elementwise_kinds());
    target.add_dynamic(&kinds, |graph, op| {
        let operands = graph.operands(op).iter();
        let results = graph.results(op).iter();
        !operands.chain(results).any(|v| graph.value_type(*v).is_distributed())
    });
    target.add_dynamic(&[OpKind::For], |graph, op| {
        !graph.operands(op)[3..].iter().any(|v| graph.value_type(*v).is_distributed())
    });
    target.add_dynamic(&[OpKind::Yield], |graph, op| {
        !graph.operands(op).iter().any(|v| graph.value_type(*v).is_distributed())
    });
    target.add_illegal(&[OpKind::ConvertLayout]);
    target
}

/// Every distribution rule.
pub fn patterns<'a>() -> PatternSet<DistributeCtx<'a>> {
    tile::patterns() + vector::patterns() + scf::patterns() + relayout::patterns()
}

pub(crate) fn elementwise_kinds() -> impl Iterator<Item = OpKind> {
    use strum::IntoEnumIterator;
    OpKind::iter().filter(|k| k.is_elementwise())
}

// ============================================================================
// Rule helpers
// ============================================================================

/// Distribution of `value`'s type, or a match failure naming `what`.
pub(crate) fn dist_of(graph: &Graph, value: ValueId, what: &str) -> MatchResult<DistributionAttr> {
    graph.value_type(value).dist().copied().context(MissingDistributionSnafu { what })
}

/// Decline while some operand still has a workgroup-level type, so the producer is
/// rewritten first.
pub(crate) fn ensure_resolved(graph: &Graph, adaptor: &Adaptor) -> MatchResult {
    match adaptor.iter().flatten().find(|v| graph.value_type(**v).is_distributed()) {
        Some(v) => UnsupportedSnafu { reason: format!("{v} is not distributed yet") }.fail(),
        None => Ok(()),
    }
}

/// Value standing for instance `i` of an operand list. A single value serves every
/// instance.
pub(crate) fn pick(list: &[ValueId], i: usize) -> MatchResult<ValueId> {
    match list {
        [single] => Ok(*single),
        _ => list
            .get(i)
            .copied()
            .context(ShapeMismatchSnafu { reason: format!("instance {i} of an operand split {} ways", list.len()) }),
    }
}

/// Shape of `value` when it is a rank-2 vector or tile.
pub(crate) fn shape_2d(rw: &Rewriter<'_>, value: ValueId, what: &str) -> MatchResult<[usize; 2]> {
    match rw.value_type(value).shape() {
        &[r, c] => Ok([r, c]),
        other => ShapeMismatchSnafu { reason: format!("{what} must be 2-D, got rank {}", other.len()) }.fail(),
    }
}
