//! `broadcast` pre-lowering.
//!
//! Broadcasts are expanded one leading dimension at a time before linearization, so
//! that only `splat`, `extract` and `insert` remain for the flattening rules:
//!
//! - a scalar source becomes a `splat`
//! - a lower-rank source is broadcast to the trailing shape and inserted once per
//!   leading index
//! - an equal-rank source stretches its unit dimensions row by row
//!
//! Each step produces broadcasts of lower rank, which the next round lowers again.

use snafu::{OptionExt, ResultExt, ensure};
use subtile_ir::conversion::{Adaptor, ConversionConfig, ConversionStats, ConversionTarget, PatternSet, Rewriter, apply_conversion};
use subtile_ir::error::{MatchResult, ShapeMismatchSnafu, UnsupportedSnafu};
use subtile_ir::{Builder, Graph, OpId, OpKind, Type, ValueId, VectorType};

use crate::error::{BroadcastLoweringFailedSnafu, Result};

/// Expand every `broadcast` in `graph`. On error `graph` is left as it was.
#[tracing::instrument(skip_all)]
pub fn lower_broadcasts(graph: &mut Graph, config: &ConversionConfig) -> Result<ConversionStats> {
    let mut target = ConversionTarget::new();
    target.add_illegal(&[OpKind::Broadcast]);

    let mut patterns = PatternSet::new();
    patterns.add(&[OpKind::Broadcast], "lower_broadcast", lower_broadcast);

    apply_conversion(graph, &target, &patterns, &mut (), None, config).context(BroadcastLoweringFailedSnafu)
}

fn lower_broadcast(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let source = adaptor.single(0)?;
    let result = rw.graph().result(op, 0);
    let dst = rw
        .value_type(result)
        .as_vector()
        .cloned()
        .context(UnsupportedSnafu { reason: "broadcast to a non-vector" })?;

    let lowered = match rw.value_type(source).clone() {
        Type::Vector(src) if src == dst => source,
        Type::Vector(src) if src.rank() < dst.rank() => {
            let inner = trailing(&dst);
            let row = if src.shape == inner.shape { source } else { rw.broadcast(source, Type::Vector(inner)) };
            fill_rows(rw, &dst, |_, _| Ok(row))?
        }
        Type::Vector(src) => {
            ensure!(
                src.rank() == dst.rank() && src.shape.iter().zip(&dst.shape).all(|(s, d)| s == d || *s == 1),
                ShapeMismatchSnafu { reason: format!("cannot broadcast {:?} to {:?}", src.shape, dst.shape) }
            );
            if dst.rank() == 1 {
                let scalar = rw.extract(source, &[0])?;
                rw.splat(scalar, Type::Vector(dst))
            } else {
                let inner = trailing(&dst);
                let stretch_rows = src.shape[0] == 1;
                fill_rows(rw, &dst, |rw, i| {
                    let row = rw.extract(source, &[if stretch_rows { 0 } else { i }])?;
                    if rw.value_type(row).shape() == inner.shape.as_slice() {
                        Ok(row)
                    } else {
                        Ok(rw.broadcast(row, Type::Vector(inner.clone())))
                    }
                })?
            }
        }
        Type::Scalar(_) => rw.splat(source, Type::Vector(dst)),
        other => return UnsupportedSnafu { reason: format!("broadcast of {other}") }.fail(),
    };

    rw.replace_op_with(op, &[lowered]);
    Ok(())
}

/// `ty` without its leading dimension.
fn trailing(ty: &VectorType) -> VectorType {
    ty.reshaped(ty.shape[1..].to_vec())
}

/// Build a `ty` vector by inserting `row(i)` at every leading index `i`.
fn fill_rows(
    rw: &mut Rewriter<'_>,
    ty: &VectorType,
    mut row: impl FnMut(&mut Rewriter<'_>, i64) -> MatchResult<ValueId>,
) -> MatchResult<ValueId> {
    let mut acc = rw.zero_vector(ty.reshaped(ty.shape.clone()));
    for i in 0..ty.shape[0] as i64 {
        let value = row(rw, i)?;
        acc = rw.insert(value, acc, &[i]);
    }
    Ok(acc)
}
