//! Vector and elementwise rules.
//!
//! Results take the subgroup tile shape of their distribution. Constants and
//! elementwise ops may expand to several instances when the value is replicated; see
//! [`replication_count`].

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use subtile_ir::attr::names;
use subtile_ir::conversion::{Adaptor, PatternSet, Replacements, Rewriter};
use subtile_ir::error::{MatchResult, MissingDistributionSnafu, MissingLayoutSnafu, ShapeMismatchSnafu, UnsupportedSnafu};
use subtile_ir::{Builder, DistributionAttr, OpId, OpKind, Type, ValueId, VectorType};

use super::offsets::{replication_count, subgroup_shape};
use super::{DistributeCtx, elementwise_kinds, ensure_resolved, pick, shape_2d};

pub fn patterns<'a>() -> PatternSet<DistributeCtx<'a>> {
    let mut set = PatternSet::new();
    let elementwise_ops: Vec<OpKind> = elementwise_kinds().collect();
    set.add(&[OpKind::Constant], "distribute_constant", constant)
        .add(&elementwise_ops, "distribute_elementwise", elementwise)
        .add(&[OpKind::Transpose], "distribute_transpose", transpose)
        .add(&[OpKind::Broadcast], "distribute_broadcast", broadcast)
        .add(&[OpKind::MultiReduction], "distribute_multi_reduction", multi_reduction)
        .add(&[OpKind::ShapeCast], "distribute_shape_cast", shape_cast)
        .add(&[OpKind::CreateMask], "distribute_create_mask", create_mask);
    set
}

/// Workgroup vector type of `op`'s result together with its distribution.
fn distributed_result(rw: &Rewriter<'_>, op: OpId) -> MatchResult<(VectorType, DistributionAttr)> {
    let result = rw.graph().result(op, 0);
    let ty = rw
        .value_type(result)
        .as_vector()
        .cloned()
        .context(UnsupportedSnafu { reason: format!("{} of a non-vector type", rw.graph().kind(op)) })?;
    let dist = ty.dist.context(MissingDistributionSnafu { what: format!("{} result", rw.graph().kind(op)) })?;
    Ok((ty, dist))
}

fn subgroup_type(wg: &VectorType, dist: &DistributionAttr) -> Type {
    Type::Vector(VectorType::new(subgroup_shape(&wg.shape, dist), wg.elem))
}

// ============================================================================
// Constants and elementwise math
// ============================================================================

fn constant(rw: &mut Rewriter<'_>, op: OpId, _: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    let (wg, dist) = distributed_result(rw, op)?;
    let count = replication_count(&wg.shape, &dist)
        .context(ShapeMismatchSnafu { reason: format!("constant of shape {:?} is not one-to-one", wg.shape) })?;
    let value = rw
        .graph()
        .attrs(op)
        .dense(names::VALUE)
        .cloned()
        .context(UnsupportedSnafu { reason: "constant without a dense value" })?;

    let ty = subgroup_type(&wg, &dist);
    let value = value.prefix(ty.shape().iter().product());
    let copies: Replacements = (0..count).map(|_| rw.constant(ty.clone(), value.clone())).collect();
    rw.replace_op(op, vec![copies]);
    Ok(())
}

/// Elementwise math, casts, comparisons and selects.
///
/// Same-type math expands to [`replication_count`] instances. The other kinds follow
/// their operands: one instance per replacement, all operand groups the same size.
fn elementwise(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let kind = rw.graph().kind(op);
    let result = rw.graph().result(op, 0);
    let wg = rw
        .value_type(result)
        .as_vector()
        .cloned()
        .context(UnsupportedSnafu { reason: format!("scalar {kind}") })?;
    let dist = wg
        .dist
        .or_else(|| rw.graph().operands(op).iter().find_map(|v| rw.value_type(*v).dist().copied()))
        .context(MissingDistributionSnafu { what: format!("{kind} operands") })?;

    let count = if kind.is_elementwise_same_type() {
        replication_count(&wg.shape, &dist)
            .context(ShapeMismatchSnafu { reason: format!("{kind} of shape {:?} is not one-to-one", wg.shape) })?
    } else {
        let count = adaptor.iter().map(<[ValueId]>::len).max().unwrap_or(1);
        ensure!(
            adaptor.iter().all(|list| list.len() == 1 || list.len() == count),
            ShapeMismatchSnafu { reason: format!("{kind} operands split into different counts") }
        );
        count
    };

    let ty = subgroup_type(&wg, &dist);
    let attrs = rw.graph().attrs(op).clone();
    let mut instances = Replacements::new();
    for i in 0..count {
        let operands = (0..adaptor.len()).map(|j| pick(adaptor.get(j), i)).collect::<MatchResult<SmallVec<[ValueId; 4]>>>()?;
        instances.push(rw.create_value(kind, &operands, ty.clone(), attrs.clone()));
    }

    tracing::trace!(%op, %kind, instances = count, "distributed elementwise");
    rw.replace_op(op, vec![instances]);
    Ok(())
}

// ============================================================================
// Shape ops
// ============================================================================

/// Subgroup-local transpose, valid only once the producing tiles were placed
/// column-major. Otherwise the transpose is left for a relayout to absorb.
fn transpose(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, ctx: &mut DistributeCtx<'_>) -> MatchResult {
    let result = rw.graph().result(op, 0);
    if !ctx.layouts.is_swapped(result) {
        return MissingLayoutSnafu { what: format!("transpose result {result}") }.fail();
    }
    ensure_resolved(rw.graph(), adaptor)?;
    let (wg, dist) = distributed_result(rw, op)?;
    ensure!(wg.rank() == 2, ShapeMismatchSnafu { reason: "transpose must be 2-D" });

    let source = adaptor.single(0)?;
    let permutation: SmallVec<[usize; 2]> = match rw.graph().attrs(op).ints(names::PERMUTATION) {
        Some(perm) => perm.iter().map(|&p| p as usize).collect(),
        None => SmallVec::from_slice(&[1, 0]),
    };
    let transposed = rw.transpose(source, &permutation, subgroup_type(&wg, &dist));
    rw.replace_op_with(op, &[transposed]);
    Ok(())
}

fn broadcast(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let (wg, dist) = distributed_result(rw, op)?;
    ensure!(wg.rank() == 2, ShapeMismatchSnafu { reason: "broadcast result must be 2-D" });

    let source = adaptor.single(0)?;
    let [rows, cols] = shape_2d(rw, source, "broadcast source")?;
    let [tx, ty] = dist.tile;
    ensure!(
        (rows == 1 && cols == ty) || (cols == 1 && rows == tx),
        ShapeMismatchSnafu { reason: format!("cannot broadcast [{rows}, {cols}] to subgroup tile [{tx}, {ty}]") }
    );

    let broadcast = rw.broadcast(source, subgroup_type(&wg, &dist));
    rw.replace_op_with(op, &[broadcast]);
    Ok(())
}

/// Reduce the subgroup piece of the source.
///
/// A 2-D accumulator is the result of a partial reduction whose 3-D source was
/// forwarded by the `shape_cast` rule; the reduction then runs over the non-unit tile
/// dimension with the accumulator flattened around it.
fn multi_reduction(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let (wg, dist) = distributed_result(rw, op)?;
    let attrs = rw.graph().attrs(op);
    let kind = attrs.combining_kind().context(UnsupportedSnafu { reason: "reduction without a combining kind" })?;
    let dims: SmallVec<[i64; 2]> = attrs.ints(names::REDUCTION_DIMS).unwrap_or_default().iter().copied().collect();

    let source = adaptor.single(0)?;
    let acc = adaptor.single(1)?;
    let src_shape = shape_2d(rw, source, "reduction source")?;
    let acc_ty = rw.value_type(acc).clone();

    let reduced = match wg.rank() {
        2 => {
            let dim = if dist.tile[0] == 1 { 0 } else { 1 };
            let len = src_shape[1 - dim];
            ensure!(
                acc_ty.shape().iter().product::<usize>() == len,
                ShapeMismatchSnafu { reason: format!("accumulator {acc_ty} does not hold {len} elements") }
            );
            let flat = rw.shape_cast(acc, Type::vector(vec![len], acc_ty.elem()));
            let partial = rw.multi_reduction(kind, source, flat, &[dim]);
            rw.shape_cast(partial, acc_ty)
        }
        1 => {
            ensure!(dims.len() == 1, UnsupportedSnafu { reason: "1-D reduction over several dimensions" });
            let dim = usize::from(dims[0] != 0);
            let len = src_shape[1 - dim];
            ensure!(
                acc_ty.shape() == [len],
                ShapeMismatchSnafu { reason: format!("accumulator {acc_ty} does not match reduced length {len}") }
            );
            rw.multi_reduction(kind, source, acc, &[dim])
        }
        rank => return ShapeMismatchSnafu { reason: format!("rank-{rank} reduction result") }.fail(),
    };
    rw.replace_op_with(op, &[reduced]);
    Ok(())
}

/// A rank-3 cast feeding only reductions is dropped (the reduction works on the
/// subgroup piece directly); otherwise the cast adds or removes a unit dimension.
fn shape_cast(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let result = rw.graph().result(op, 0);
    let source = adaptor.single(0)?;

    if rw.value_type(result).rank() == 3 {
        let graph = rw.graph();
        ensure!(
            graph.users(result).iter().all(|u| graph.kind(*u) == OpKind::MultiReduction),
            UnsupportedSnafu { reason: "rank-3 shape_cast outside a reduction" }
        );
        rw.replace_op_with(op, &[source]);
        return Ok(());
    }

    let (wg, dist) = distributed_result(rw, op)?;
    ensure!(
        wg.rank() == 2 && wg.shape.contains(&1),
        ShapeMismatchSnafu { reason: format!("shape_cast to {:?} needs a unit dimension", wg.shape) }
    );
    let ty = subgroup_type(&wg, &dist);
    let src_elems: usize = rw.value_type(source).shape().iter().product();
    ensure!(
        src_elems == ty.shape().iter().product::<usize>(),
        ShapeMismatchSnafu { reason: format!("cannot cast {src_elems} elements to {ty}") }
    );

    let cast = rw.shape_cast(source, ty);
    rw.replace_op_with(op, &[cast]);
    Ok(())
}

fn create_mask(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let (wg, dist) = distributed_result(rw, op)?;
    let bounds = adaptor.singles()?;
    let mask = rw.create_mask(&bounds, subgroup_type(&wg, &dist));
    rw.replace_op_with(op, &[mask]);
    Ok(())
}
