//! Structural verifier.
//!
//! Checks the invariants every pass relies on: operands are visible at their use,
//! fixed-arity kinds have the right operand and result counts, loop and function
//! terminators agree with their parents, and same-type elementwise operations are
//! homogeneous. It does not re-check rule-specific shape arithmetic.

use snafu::ensure;

use crate::attr::names;
use crate::error::{InvalidOperationSnafu, Result, UndefinedValueSnafu};
use crate::graph::ValueDef;
use crate::{Graph, OpId, OpKind, ValueId};

pub fn verify(graph: &Graph) -> Result<()> {
    for op in graph.walk() {
        let kind = graph.kind(op);
        for &value in graph.operands(op) {
            ensure!(is_visible(graph, value, op), UndefinedValueSnafu { op, kind, value });
        }
        verify_op(graph, op, kind)?;
    }
    Ok(())
}

fn invalid(op: OpId, kind: OpKind, reason: impl Into<String>) -> Result<()> {
    InvalidOperationSnafu { op, kind, reason: reason.into() }.fail()
}

fn expect_counts(graph: &Graph, op: OpId, kind: OpKind, operands: usize, results: usize) -> Result<()> {
    let (n_ops, n_res) = (graph.operands(op).len(), graph.results(op).len());
    if n_ops != operands || n_res != results {
        return invalid(op, kind, format!("expected {operands} operands and {results} results, got {n_ops} and {n_res}"));
    }
    Ok(())
}

fn verify_op(graph: &Graph, op: OpId, kind: OpKind) -> Result<()> {
    use OpKind::*;

    match kind {
        _ if kind.is_elementwise_same_type() => {
            let arity = if matches!(kind, Exp | Sqrt | Log | Tanh | NegF) { 1 } else { 2 };
            expect_counts(graph, op, kind, arity, 1)?;
            let result = graph.value_type(graph.result(op, 0));
            if graph.operands(op).iter().any(|v| graph.value_type(*v) != result) {
                return invalid(op, kind, "operand and result types differ");
            }
        }
        _ if kind.is_cast() => expect_counts(graph, op, kind, 1, 1)?,
        _ if kind.is_compare() => {
            expect_counts(graph, op, kind, 2, 1)?;
            ensure!(
                graph.attrs(op).predicate().is_some(),
                InvalidOperationSnafu { op, kind, reason: "missing predicate" }
            );
        }
        _ if kind.is_index_arith() => expect_counts(graph, op, kind, 2, 1)?,
        Select => expect_counts(graph, op, kind, 3, 1)?,
        FPowI => expect_counts(graph, op, kind, 2, 1)?,
        Constant => {
            expect_counts(graph, op, kind, 0, 1)?;
            ensure!(
                graph.attrs(op).dense(names::VALUE).is_some(),
                InvalidOperationSnafu { op, kind, reason: "missing value" }
            );
        }
        SubgroupId | Alloc => expect_counts(graph, op, kind, 0, 1)?,
        Barrier => expect_counts(graph, op, kind, 0, 0)?,
        LoadTile | ConvertLayout | ShapeCast | Splat | BitCast | Broadcast | Transpose | MemRefTranspose => {
            expect_counts(graph, op, kind, 1, 1)?
        }
        StoreTile => expect_counts(graph, op, kind, 2, 0)?,
        LoadGather => expect_counts(graph, op, kind, 2, 1)?,
        StoreScatter => expect_counts(graph, op, kind, 3, 0)?,
        PrefetchTile => expect_counts(graph, op, kind, 1, 0)?,
        UpdateTileOffset => expect_counts(graph, op, kind, 3, 1)?,
        MultiReduction | View | InsertStridedSlice | Shuffle | ExtractElement => expect_counts(graph, op, kind, 2, 1)?,
        Extract | Insert => {
            ensure!(
                graph.attrs(op).ints(names::POSITION).is_some(),
                InvalidOperationSnafu { op, kind, reason: "missing position" }
            );
        }
        ExtractStridedSlice => {
            expect_counts(graph, op, kind, 1, 1)?;
            let attrs = graph.attrs(op);
            ensure!(
                attrs.ints(names::OFFSETS).is_some() && attrs.ints(names::SIZES).is_some(),
                InvalidOperationSnafu { op, kind, reason: "missing offsets or sizes" }
            );
        }
        TileMma => {
            let n = graph.operands(op).len();
            if !(n == 2 || n == 3) || graph.results(op).len() != 1 {
                return invalid(op, kind, "expected (a, b, [c]) -> d");
            }
        }
        For => verify_for(graph, op)?,
        Func => verify_terminated(graph, op, kind, Return)?,
        Yield => {
            let parent = graph.parent_region(op).and_then(|r| graph.parent_op(r));
            if parent.map(|p| graph.kind(p)) != Some(For) {
                return invalid(op, kind, "must be nested directly in a loop");
            }
        }
        _ => {}
    }
    Ok(())
}

fn verify_terminated(graph: &Graph, op: OpId, kind: OpKind, terminator: OpKind) -> Result<()> {
    let [region] = graph.regions(op) else {
        return invalid(op, kind, "expected exactly one region");
    };
    match graph.region(*region).ops().last() {
        Some(last) if graph.kind(*last) == terminator => Ok(()),
        _ => invalid(op, kind, format!("region must end with {terminator}")),
    }
}

fn verify_for(graph: &Graph, op: OpId) -> Result<()> {
    let kind = OpKind::For;
    let operands = graph.operands(op);
    let results = graph.results(op);
    if operands.len() < 3 || results.len() != operands.len() - 3 {
        return invalid(op, kind, "expected (lb, ub, step, inits...) with one result per init");
    }
    verify_terminated(graph, op, kind, OpKind::Yield)?;

    let region = graph.regions(op)[0];
    let args = graph.region(region).args();
    if args.len() != results.len() + 1 {
        return invalid(op, kind, format!("body takes {} arguments for {} results", args.len(), results.len()));
    }
    for (i, (&init, &result)) in operands[3..].iter().zip(results).enumerate() {
        let (arg_ty, init_ty, res_ty) = (graph.value_type(args[i + 1]), graph.value_type(init), graph.value_type(result));
        if arg_ty != init_ty || arg_ty != res_ty {
            return invalid(op, kind, format!("iteration argument {i} has mismatched types"));
        }
    }

    let Some(&yield_op) = graph.region(region).ops().last() else {
        return invalid(op, kind, "empty body");
    };
    let yielded = graph.operands(yield_op);
    if yielded.len() != results.len() {
        return invalid(op, kind, format!("yields {} values for {} results", yielded.len(), results.len()));
    }
    for (i, (&y, &r)) in yielded.iter().zip(results).enumerate() {
        if graph.value_type(y) != graph.value_type(r) {
            return invalid(op, kind, format!("yielded value {i} does not match the result type"));
        }
    }
    Ok(())
}

/// True if `value` dominates its use in `user`: it is an argument of an enclosing
/// region, or the result of a live operation that precedes `user` (or an ancestor of
/// `user`) in the same region.
pub fn is_visible(graph: &Graph, value: ValueId, user: OpId) -> bool {
    match graph.value(value).def {
        ValueDef::Argument { region, index } => {
            if graph.region(region).args().get(index) != Some(&value) {
                return false;
            }
            let mut current = Some(user);
            while let Some(op) = current {
                let Some(r) = graph.parent_region(op) else { return false };
                if r == region {
                    return true;
                }
                current = graph.parent_op(r);
            }
            false
        }
        ValueDef::Result { op: def, .. } => {
            if !graph.is_alive(def) {
                return false;
            }
            let Some(def_region) = graph.parent_region(def) else { return false };
            let mut current = Some(user);
            while let Some(op) = current {
                let Some(r) = graph.parent_region(op) else { return false };
                if r == def_region {
                    let ops = graph.region(r).ops();
                    let pos = |o: OpId| ops.iter().position(|x| *x == o);
                    return matches!((pos(def), pos(op)), (Some(d), Some(u)) if d < u);
                }
                current = graph.parent_op(r);
            }
            false
        }
    }
}
