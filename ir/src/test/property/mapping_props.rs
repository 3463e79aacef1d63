use proptest::prelude::*;

use crate::builder::{Builder, GraphBuilder};
use crate::conversion::ValueMapping;
use crate::{Graph, ValueId};

fn fresh_values(n: usize) -> Vec<ValueId> {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    (0..n).map(|i| builder.index_const(i as i64 + 1000)).collect()
}

proptest! {
    /// Expanding a value through a second level of replacements splices the nested lists
    /// in place, preserving order.
    #[test]
    fn lookup_splices_in_order(widths in prop::collection::vec(0usize..4, 1..5)) {
        let total = 1 + widths.len() + widths.iter().sum::<usize>();
        let values = fresh_values(total);
        let root = values[0];
        let mids: Vec<ValueId> = values[1..=widths.len()].to_vec();

        let mut mapping = ValueMapping::default();
        mapping.map(root, mids.iter().copied());

        let mut next = widths.len() + 1;
        let mut expected = Vec::new();
        for (&mid, &width) in mids.iter().zip(&widths) {
            let leaves = values[next..next + width].to_vec();
            next += width;
            expected.extend(leaves.iter().copied());
            mapping.map(mid, leaves);
        }

        prop_assert_eq!(mapping.lookup(root).to_vec(), expected);
    }

    /// Unmapped values resolve to themselves.
    #[test]
    fn lookup_of_unmapped_is_identity(n in 1usize..8) {
        let values = fresh_values(n);
        let mapping = ValueMapping::default();
        for v in values {
            prop_assert_eq!(mapping.lookup(v).to_vec(), vec![v]);
        }
    }
}
