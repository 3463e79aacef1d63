//! Shape-dependent vector ops rewritten as flat shuffles.
//!
//! Each rule computes, from the static shapes and positions, which flat source
//! elements make up the result, and emits a 1-D `shuffle` (or a narrow
//! `extract_strided_slice` / `extract_element` where a shuffle would be degenerate).
//! The index computations are plain functions so they can be checked in isolation.

use itertools::Itertools;
use snafu::{OptionExt, ensure};
use subtile_ir::attr::{DYNAMIC_POSITION, names};
use subtile_ir::conversion::{Adaptor, PatternSet, Rewriter};
use subtile_ir::error::{MatchResult, ShapeMismatchSnafu, UnsupportedSnafu};
use subtile_ir::types::row_major_strides;
use subtile_ir::{Builder, OpId, OpKind, ValueId, VectorType};

pub fn patterns() -> PatternSet {
    let mut set = PatternSet::new();
    set.add(&[OpKind::ExtractStridedSlice], "linearize_extract_strided_slice", extract_strided_slice)
        .add(&[OpKind::InsertStridedSlice], "linearize_insert_strided_slice", insert_strided_slice)
        .add(&[OpKind::Shuffle], "linearize_shuffle", shuffle)
        .add(&[OpKind::Extract], "linearize_extract", extract)
        .add(&[OpKind::Insert], "linearize_insert", insert)
        .add(&[OpKind::Transpose], "linearize_transpose", transpose);
    set
}

// ============================================================================
// Flat index computation
// ============================================================================

/// Row-major flat offset of `position` (a prefix of the full index) in `shape`.
pub fn linear_offset(shape: &[usize], position: &[i64]) -> i64 {
    let strides = row_major_strides(shape);
    position.iter().zip(strides.iter()).map(|(&p, &s)| p * s as i64).sum()
}

/// Flat source indices of a unit-stride slice.
///
/// With fewer offsets than source dimensions, the untouched trailing dimensions are
/// copied whole: each selected leading position contributes a contiguous run.
pub fn strided_slice_indices(shape: &[usize], offsets: &[i64], sizes: &[i64]) -> Vec<i64> {
    let k = offsets.len();
    let run = shape[k..].iter().product::<usize>() as i64;
    let slices: i64 = sizes.iter().product();

    let mut source_strides = vec![run; k];
    let mut slice_strides = vec![1i64; k];
    for i in (0..k.saturating_sub(1)).rev() {
        source_strides[i] = source_strides[i + 1] * shape[i + 1] as i64;
        slice_strides[i] = slice_strides[i + 1] * sizes[i + 1];
    }

    let mut indices = Vec::with_capacity((slices * run) as usize);
    for slice in 0..slices {
        let mut rest = slice;
        let mut start = 0;
        for j in 0..k {
            let index = rest / slice_strides[j];
            rest -= index * slice_strides[j];
            start += (offsets[j] + index) * source_strides[j];
        }
        indices.extend(start..start + run);
    }
    indices
}

/// Expand a leading-dimension shuffle mask to element indices.
pub fn shuffle_indices(mask: &[i64], run: i64) -> Vec<i64> {
    mask.iter().flat_map(|&m| m * run..(m + 1) * run).collect()
}

/// Indices placing `src_size` elements of the second shuffle operand at `offset` of a
/// `dst_size` vector taken from the first.
pub fn insert_indices(dst_size: i64, src_size: i64, offset: i64) -> Vec<i64> {
    (0..offset).chain(dst_size..dst_size + src_size).chain(offset + src_size..dst_size).collect()
}

/// Indices widening a `src_size` vector to `dst_size` elements.
pub fn pad_indices(src_size: i64, dst_size: i64) -> Vec<i64> {
    (0..src_size).chain(std::iter::repeat_n(0, (dst_size - src_size).max(0) as usize)).collect()
}

/// Flat source index of every element of `transpose(shape, permutation)`, in result
/// order.
pub fn transpose_indices(shape: &[usize], permutation: &[usize]) -> Vec<i64> {
    let strides = row_major_strides(shape);
    permutation
        .iter()
        .map(|&p| 0..shape[p])
        .multi_cartesian_product()
        .map(|index| index.iter().zip(permutation).map(|(&i, &p)| (i * strides[p]) as i64).sum())
        .collect()
}

// ============================================================================
// Rules
// ============================================================================

fn vector_type(rw: &Rewriter<'_>, value: ValueId) -> MatchResult<VectorType> {
    rw.value_type(value)
        .as_vector()
        .cloned()
        .context(ShapeMismatchSnafu { reason: format!("{value} is not a vector") })
}

fn static_ints(rw: &Rewriter<'_>, op: OpId, name: &str) -> MatchResult<Vec<i64>> {
    let values = rw.graph().attrs(op).ints(name).context(UnsupportedSnafu { reason: format!("missing `{name}`") })?;
    Ok(values.to_vec())
}

fn extract_strided_slice(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let source_ty = vector_type(rw, rw.graph().operand(op, 0))?;
    let result_ty = vector_type(rw, rw.graph().result(op, 0))?;
    ensure!(
        !source_ty.is_scalable() && !result_ty.is_scalable(),
        UnsupportedSnafu { reason: "scalable strided slice" }
    );
    let offsets = static_ints(rw, op, names::OFFSETS)?;
    let sizes = static_ints(rw, op, names::SIZES)?;
    let strides = static_ints(rw, op, names::STRIDES)?;
    ensure!(strides.iter().all(|&s| s == 1), UnsupportedSnafu { reason: "non-unit slice stride" });

    let indices = strided_slice_indices(&source_ty.shape, &offsets, &sizes);
    let source = adaptor.single(0)?;
    let flat = match indices.as_slice() {
        &[index] => rw.extract_strided_slice(source, &[index], &[1], &[1])?,
        _ => rw.shuffle(source, source, &indices)?,
    };
    rw.replace_op_with(op, &[flat]);
    Ok(())
}

/// Insert a slice whose leading dimensions are all unit: the slice is contiguous in
/// the flat destination.
fn insert_strided_slice(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let source_ty = vector_type(rw, rw.graph().operand(op, 0))?;
    let dest_ty = vector_type(rw, rw.graph().operand(op, 1))?;
    let offsets = static_ints(rw, op, names::OFFSETS)?;
    let strides = static_ints(rw, op, names::STRIDES)?;
    ensure!(strides.iter().all(|&s| s == 1), UnsupportedSnafu { reason: "non-unit slice stride" });
    ensure!(
        source_ty.shape.split_last().is_some_and(|(_, lead)| lead.iter().all(|&d| d == 1)),
        ShapeMismatchSnafu { reason: format!("slice {:?} has non-unit leading dimensions", source_ty.shape) }
    );
    ensure!(
        offsets.len() == dest_ty.rank(),
        ShapeMismatchSnafu { reason: "one offset per destination dimension" }
    );

    let offset = linear_offset(&dest_ty.shape, &offsets);
    let (value, dest) = (adaptor.single(0)?, adaptor.single(1)?);
    let flat = rw.insert_strided_slice(value, dest, &[offset], &[1]);
    rw.replace_op_with(op, &[flat]);
    Ok(())
}

fn shuffle(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let v1_ty = vector_type(rw, rw.graph().operand(op, 0))?;
    let mask = static_ints(rw, op, names::MASK)?;
    let run = v1_ty.shape.iter().skip(1).product::<usize>() as i64;

    let (v1, v2) = (adaptor.single(0)?, adaptor.single(1)?);
    let flat = rw.shuffle(v1, v2, &shuffle_indices(&mask, run))?;
    rw.replace_op_with(op, &[flat]);
    Ok(())
}

fn extract(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let position = static_ints(rw, op, names::POSITION)?;
    ensure!(
        adaptor.len() == 1 && !position.contains(&DYNAMIC_POSITION),
        UnsupportedSnafu { reason: "dynamic extract position" }
    );
    let source_ty = vector_type(rw, rw.graph().operand(op, 0))?;
    let offset = linear_offset(&source_ty.shape, &position);
    let source = adaptor.single(0)?;

    let result = rw.graph().result(op, 0);
    let flat = match rw.value_type(result).as_vector() {
        None => {
            let position = rw.i32_const(offset);
            rw.extract_element(source, position)
        }
        Some(sub) => {
            let size = sub.num_elements() as i64;
            let indices: Vec<i64> = (offset..offset + size).collect();
            rw.shuffle(source, source, &indices)?
        }
    };
    rw.replace_op_with(op, &[flat]);
    Ok(())
}

/// Insert a sub-vector by widening it to the destination size, then selecting
/// destination and inserted elements in one shuffle.
fn insert(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let position = static_ints(rw, op, names::POSITION)?;
    ensure!(
        adaptor.len() == 2 && !position.contains(&DYNAMIC_POSITION),
        UnsupportedSnafu { reason: "dynamic insert position" }
    );
    let value_ty = rw
        .value_type(rw.graph().operand(op, 0))
        .as_vector()
        .cloned()
        .context(UnsupportedSnafu { reason: "scalar insert into a multi-dimensional vector" })?;
    let dest_ty = vector_type(rw, rw.graph().operand(op, 1))?;

    let src_size = value_ty.num_elements() as i64;
    let dst_size = dest_ty.num_elements() as i64;
    let offset = linear_offset(&dest_ty.shape, &position);

    let (value, dest) = (adaptor.single(0)?, adaptor.single(1)?);
    let padded = rw.shuffle(value, value, &pad_indices(src_size, dst_size))?;
    let flat = rw.shuffle(dest, padded, &insert_indices(dst_size, src_size, offset))?;
    rw.replace_op_with(op, &[flat]);
    Ok(())
}

fn transpose(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let source_ty = vector_type(rw, rw.graph().operand(op, 0))?;
    let permutation: Vec<usize> = match rw.graph().attrs(op).ints(names::PERMUTATION) {
        Some(perm) => perm.iter().map(|&p| p as usize).collect(),
        None => (0..source_ty.rank()).rev().collect(),
    };
    ensure!(
        permutation.len() == source_ty.rank(),
        ShapeMismatchSnafu { reason: "permutation does not match the source rank" }
    );

    let source = adaptor.single(0)?;
    let flat = rw.shuffle(source, source, &transpose_indices(&source_ty.shape, &permutation))?;
    rw.replace_op_with(op, &[flat]);
    Ok(())
}
