//! Constant folding of index arithmetic.
//!
//! Offsets produced by the distribution rules are mostly compile-time constants once the
//! subgroup grid is known; folding them at creation time keeps rewritten programs small
//! and makes offsets inspectable without running the evaluator.

use crate::graph::{Graph, ValueId};
use crate::op::OpKind;

/// Outcome of folding one index operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folded {
    Const(i64),
    /// The operation is an identity on one of its operands.
    Value(ValueId),
}

/// Evaluate an index operation on constants. `None` on division by zero.
pub fn eval_index(kind: OpKind, lhs: i64, rhs: i64) -> Option<i64> {
    match kind {
        OpKind::IndexAdd => Some(lhs.wrapping_add(rhs)),
        OpKind::IndexMul => Some(lhs.wrapping_mul(rhs)),
        OpKind::IndexDivU => (rhs != 0).then(|| ((lhs as u64) / (rhs as u64)) as i64),
        OpKind::IndexRemU => (rhs != 0).then(|| ((lhs as u64) % (rhs as u64)) as i64),
        _ => None,
    }
}

/// Try to fold `kind(lhs, rhs)` using constant operands and algebraic identities.
pub fn fold_index_binary(graph: &Graph, kind: OpKind, lhs: ValueId, rhs: ValueId) -> Option<Folded> {
    let l = graph.const_int(lhs);
    let r = graph.const_int(rhs);

    if let (Some(a), Some(b)) = (l, r) {
        return eval_index(kind, a, b).map(Folded::Const);
    }

    match (kind, l, r) {
        (OpKind::IndexAdd, Some(0), _) => Some(Folded::Value(rhs)),
        (OpKind::IndexAdd, _, Some(0)) => Some(Folded::Value(lhs)),
        (OpKind::IndexMul, Some(0), _) | (OpKind::IndexMul, _, Some(0)) => Some(Folded::Const(0)),
        (OpKind::IndexMul, Some(1), _) => Some(Folded::Value(rhs)),
        (OpKind::IndexMul, _, Some(1)) => Some(Folded::Value(lhs)),
        (OpKind::IndexDivU, _, Some(1)) => Some(Folded::Value(lhs)),
        (OpKind::IndexRemU, _, Some(1)) => Some(Folded::Const(0)),
        (OpKind::IndexDivU | OpKind::IndexRemU, Some(0), _) => Some(Folded::Const(0)),
        _ => None,
    }
}
