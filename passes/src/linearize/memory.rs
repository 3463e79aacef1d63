//! Row-wise unrolling of 2-D vector loads and stores.
//!
//! A 2-D access becomes one 1-D access per row, with the row index advanced from the
//! second-to-last memref index. The 2-D `insert` / `extract` ops used to assemble or
//! split the rows are linearized in turn.

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use subtile_ir::conversion::{Adaptor, PatternSet, Rewriter};
use subtile_ir::error::{MatchResult, ShapeMismatchSnafu};
use subtile_ir::{Builder, OpId, OpKind, Type, ValueId, VectorType};

pub fn patterns() -> PatternSet {
    let mut set = PatternSet::new();
    set.add(&[OpKind::Load], "linearize_load", load).add(&[OpKind::Store], "linearize_store", store);
    set
}

fn rows_and_cols(ty: &Type) -> MatchResult<(VectorType, usize, usize)> {
    let vector = ty.as_vector().context(ShapeMismatchSnafu { reason: "access of a non-vector" })?;
    match vector.shape.as_slice() {
        &[rows, cols] => Ok((vector.clone(), rows, cols)),
        other => ShapeMismatchSnafu { reason: format!("only 2-D accesses unroll, got rank {}", other.len()) }.fail(),
    }
}

/// Index of the row dimension among the memref indices.
fn row_index(indices: &[ValueId]) -> MatchResult<usize> {
    ensure!(indices.len() >= 2, ShapeMismatchSnafu { reason: "2-D access needs at least 2 indices" });
    Ok(indices.len() - 2)
}

fn load(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let result = rw.graph().result(op, 0);
    let (ty, rows, cols) = rows_and_cols(rw.value_type(result))?;
    let operands = adaptor.singles()?;
    let (memref, indices) = (operands[0], &operands[1..]);
    let row = row_index(indices)?;
    let row_ty = Type::vector(vec![cols], ty.elem);

    let mut assembled = rw.zero_vector(VectorType::new(vec![rows, cols], ty.elem));
    let mut row_indices: SmallVec<[ValueId; 4]> = SmallVec::from_slice(indices);
    for i in 0..rows {
        let step = rw.index_const(i as i64);
        row_indices[row] = rw.index_add(indices[row], step);
        let slice = rw.load(memref, &row_indices, row_ty.clone());
        assembled = rw.insert(slice, assembled, &[i as i64]);
    }

    rw.replace_op_with(op, &[assembled]);
    Ok(())
}

fn store(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let original = rw.graph().operand(op, 0);
    let (ty, rows, _) = rows_and_cols(rw.value_type(original))?;
    let operands = adaptor.singles()?;
    let (value, memref, indices) = (operands[0], operands[1], &operands[2..]);
    let row = row_index(indices)?;

    let value = rw.materialize(value, &Type::Vector(ty));
    let mut row_indices: SmallVec<[ValueId; 4]> = SmallVec::from_slice(indices);
    for i in 0..rows {
        let slice = rw.extract(value, &[i as i64])?;
        let step = rw.index_const(i as i64);
        row_indices[row] = rw.index_add(indices[row], step);
        rw.store(slice, memref, &row_indices);
    }

    rw.erase_op(op);
    Ok(())
}
