//! Shape-cast folding.
//!
//! Linearization bridges flat and multi-dimensional values with `shape_cast`, which
//! leaves round trips (`shape_cast(shape_cast(x))` back to the type of `x`) and casts
//! nobody reads. This cleanup forwards round trips to their source, drops identity
//! casts and erases dead ones, repeating until nothing changes.

use subtile_ir::{Graph, OpId, OpKind, ValueId};

/// Fold redundant `shape_cast` ops in `graph`. Returns the number of casts removed.
#[tracing::instrument(skip_all)]
pub fn fold_shape_casts(graph: &mut Graph) -> usize {
    let mut removed = 0;
    loop {
        let before = removed;
        for op in graph.walk() {
            if !graph.is_alive(op) || graph.kind(op) != OpKind::ShapeCast {
                continue;
            }
            let result = graph.result(op, 0);
            if let Some(forward) = forwarded_source(graph, op) {
                graph.replace_all_uses(result, forward);
            }
            if graph.uses(result).is_empty() {
                graph.erase_op(op);
                removed += 1;
            }
        }
        if removed == before {
            break;
        }
    }

    tracing::debug!(removed, "folded shape casts");
    removed
}

/// The value a cast can be replaced by, if any: its source when the cast is an
/// identity, or the source of a producing cast when the pair round-trips.
fn forwarded_source(graph: &Graph, cast: OpId) -> Option<ValueId> {
    let source = graph.operand(cast, 0);
    let ty = graph.value_type(graph.result(cast, 0));
    if graph.value_type(source) == ty {
        return Some(source);
    }
    let producer = graph.defining_op(source).filter(|p| graph.kind(*p) == OpKind::ShapeCast)?;
    let original = graph.operand(producer, 0);
    (graph.value_type(original) == ty).then_some(original)
}
