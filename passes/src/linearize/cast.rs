//! Ops that only need their result type flattened.

use snafu::ensure;
use subtile_ir::conversion::{Adaptor, PatternSet, Rewriter};
use subtile_ir::error::{MatchResult, ShapeMismatchSnafu};
use subtile_ir::{Builder, OpId, OpKind};

pub fn patterns() -> PatternSet {
    let mut set = PatternSet::new();
    set.add(&[OpKind::Splat], "linearize_splat", splat)
        .add(&[OpKind::BitCast], "linearize_bitcast", bitcast)
        .add(&[OpKind::CreateMask], "linearize_create_mask", create_mask);
    set
}

fn splat(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let ty = rw.convert_type(rw.value_type(rw.graph().result(op, 0)))?;
    let flat = rw.splat(adaptor.single(0)?, ty);
    rw.replace_op_with(op, &[flat]);
    Ok(())
}

fn bitcast(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let ty = rw.convert_type(rw.value_type(rw.graph().result(op, 0)))?;
    let flat = rw.vector_bitcast(adaptor.single(0)?, ty);
    rw.replace_op_with(op, &[flat]);
    Ok(())
}

/// Only `[1, n]` masks flatten; the flat mask takes the inner bound.
fn create_mask(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let result = rw.graph().result(op, 0);
    let shape = rw.value_type(result).shape().to_vec();
    ensure!(shape.len() == 2, ShapeMismatchSnafu { reason: format!("only 2-D masks flatten, got {shape:?}") });
    ensure!(shape[0] == 1, ShapeMismatchSnafu { reason: format!("mask {shape:?} has a non-unit outer dimension") });

    let ty = rw.convert_type(rw.value_type(result))?;
    let bound = adaptor.single(adaptor.len() - 1)?;
    let flat = rw.create_mask(&[bound], ty);
    rw.replace_op_with(op, &[flat]);
    Ok(())
}
