use std::collections::BTreeMap;

use proptest::prelude::*;

use subtile_ir::Order;
use subtile_ir::test::property::generators::arb_distributed_shape;

use crate::distribute::offsets::{axis_offsets, subgroup_coords, tiles_per_axis};

fn arb_order() -> impl Strategy<Value = Order> {
    prop_oneof![Just(Order::Default), Just(Order::Swapped)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every tile origin of the workgroup shape is owned by exactly one subgroup.
    #[test]
    fn tile_origins_partition_the_shape((dist, shape) in arb_distributed_shape(), order in arb_order()) {
        let subgroups = dist.grid[0] * dist.grid[1];
        let mut owners: BTreeMap<(i64, i64), usize> = BTreeMap::new();

        for id in 0..subgroups {
            let [row, col] = subgroup_coords(id, dist.grid, order);
            let rows = axis_offsets(shape[0], dist.tile[0], dist.grid[0], row, 0);
            let cols = axis_offsets(shape[1], dist.tile[1], dist.grid[1], col, 0);
            prop_assert_eq!(rows.len(), tiles_per_axis(shape[0], &dist, 0));
            prop_assert_eq!(cols.len(), tiles_per_axis(shape[1], &dist, 1));

            for &r in &rows {
                for &c in &cols {
                    let previous = owners.insert((r, c), id);
                    prop_assert!(previous.is_none(), "({}, {}) owned by {:?} and {}", r, c, previous, id);
                }
            }
        }

        let tiles = (shape[0] / dist.tile[0]) * (shape[1] / dist.tile[1]);
        prop_assert_eq!(owners.len(), tiles);
        for &(r, c) in owners.keys() {
            prop_assert!(r % dist.tile[0] as i64 == 0 && (r as usize) < shape[0]);
            prop_assert!(c % dist.tile[1] as i64 == 0 && (c as usize) < shape[1]);
        }
    }

    /// Coordinates are a bijection from subgroup ids onto the grid.
    #[test]
    fn coords_cover_the_grid((dist, _) in arb_distributed_shape(), order in arb_order()) {
        let subgroups = dist.grid[0] * dist.grid[1];
        let mut seen = vec![false; subgroups];
        for id in 0..subgroups {
            let [row, col] = subgroup_coords(id, dist.grid, order);
            prop_assert!(row < dist.grid[0] && col < dist.grid[1]);
            let slot = row * dist.grid[1] + col;
            prop_assert!(!seen[slot]);
            seen[slot] = true;
        }
    }
}
