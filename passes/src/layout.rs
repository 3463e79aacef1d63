//! Subgroup layout analysis.
//!
//! A tile that is loaded and then transposed before use is better distributed with
//! column-major subgroup placement: each subgroup then loads the block it will own
//! after the transpose. The analysis finds every `transpose`, walks backwards to the
//! `load_tile` ops feeding it and from there to the `init_tile` sites, and tags those
//! sites (and the transpose result) [`Order::Swapped`]. A site reached through two
//! transposes is untagged again, since the transposes cancel.
//!
//! The traversal follows loop-carried values back to their pre-loop initializers and
//! uses a visited set, so cycles through loop bodies terminate.

use std::collections::{HashMap, HashSet};

use subtile_ir::graph::ValueDef;
use subtile_ir::{Graph, OpId, OpKind, Order, ValueId};

/// Non-default subgroup placement per value. Absent values use [`Order::Default`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutMap {
    orders: HashMap<ValueId, Order>,
}

impl LayoutMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(&self, value: ValueId) -> Order {
        self.orders.get(&value).copied().unwrap_or_default()
    }

    pub fn is_swapped(&self, value: ValueId) -> bool {
        self.order(value) == Order::Swapped
    }

    pub fn set(&mut self, value: ValueId, order: Order) {
        match order {
            Order::Default => self.orders.remove(&value),
            Order::Swapped => self.orders.insert(value, order),
        };
    }

    /// Flip the placement of `value`; a second toggle restores the default.
    pub fn toggle(&mut self, value: ValueId) {
        self.set(value, self.order(value).flip());
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, Order)> + '_ {
        self.orders.iter().map(|(v, o)| (*v, *o))
    }
}

/// Build the layout map for every transpose in `graph`.
#[tracing::instrument(skip_all)]
pub fn analyze_layouts(graph: &Graph) -> LayoutMap {
    let mut layouts = LayoutMap::new();

    for op in graph.walk() {
        if graph.kind(op) != OpKind::Transpose {
            continue;
        }
        let loads = find_producers(graph, graph.operand(op, 0), OpKind::LoadTile);
        for load in loads {
            let inits = find_producers(graph, graph.operand(load, 0), OpKind::InitTile);
            if inits.is_empty() {
                continue;
            }
            layouts.set(graph.result(op, 0), Order::Swapped);
            for init in inits {
                layouts.toggle(graph.result(init, 0));
            }
        }
    }

    tracing::debug!(tagged = layouts.len(), "layout analysis complete");
    layouts
}

/// Every operation of `kind` contributing to `value`, found by a backward walk over
/// operands. Loop iteration arguments resolve to the loop's initial values.
pub fn find_producers(graph: &Graph, value: ValueId, kind: OpKind) -> Vec<OpId> {
    let mut found = Vec::new();
    let mut worklist = vec![value];
    let mut visited = HashSet::new();

    while let Some(current) = worklist.pop() {
        if !visited.insert(current) {
            continue;
        }
        let current = pre_loop_value(graph, current);
        let Some(def) = graph.defining_op(current) else { continue };
        if graph.kind(def) == kind && !found.contains(&def) {
            found.push(def);
        }
        worklist.extend(graph.operands(def).iter().copied());
    }
    found
}

/// Follow loop-carried block arguments (through nested loops) to the value entering
/// the outermost loop.
pub fn pre_loop_value(graph: &Graph, mut value: ValueId) -> ValueId {
    while let ValueDef::Argument { region, index } = graph.value(value).def {
        let Some(owner) = graph.parent_op(region) else { break };
        if graph.kind(owner) != OpKind::For || index == 0 {
            break;
        }
        value = graph.operand(owner, 3 + index - 1);
    }
    value
}
