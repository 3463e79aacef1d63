//! Subgroup coordinates and per-subgroup tile offsets.
//!
//! Each function comes in two forms: a pure one over plain integers, used for counting
//! and in tests, and an emitter that builds the same arithmetic as index ops so the
//! offsets depend on the runtime subgroup id.

use smallvec::SmallVec;
use subtile_ir::{Builder, DistributionAttr, Order, ValueId};

/// Grid coordinates `(row, col)` of subgroup `id`.
///
/// `Default` placement is row-major over the grid (`id / Gy`, `id % Gy`); `Swapped`
/// placement is column-major (`id % Gx`, `id / Gx`).
pub fn subgroup_coords(id: usize, grid: [usize; 2], order: Order) -> [usize; 2] {
    match order {
        Order::Default => [id / grid[1], id % grid[1]],
        Order::Swapped => [id % grid[0], id / grid[0]],
    }
}

/// Offsets along one axis of the tiles owned by the subgroup at `coord`.
///
/// The axis holds `extent / tile` tiles; the subgroup takes every `grid`-th one
/// starting from its own coordinate, wrapping around the axis.
pub fn axis_offsets(extent: usize, tile: usize, grid: usize, coord: usize, base: i64) -> Vec<i64> {
    let tiles = extent / tile;
    (0..tiles).step_by(grid.max(1)).map(|i| (((i + coord) % tiles) * tile) as i64 + base).collect()
}

/// Number of tiles one subgroup owns along `axis` of a `extent`-long dimension.
pub fn tiles_per_axis(extent: usize, dist: &DistributionAttr, axis: usize) -> usize {
    let tiles = extent / dist.tile[axis];
    tiles.div_ceil(dist.grid[axis].max(1))
}

/// Number of subgroup-level instances an elementwise op or constant of `shape` expands to.
///
/// One when the value is exactly one grid round on some axis (either orientation);
/// otherwise the sum of the per-axis replication factors. `None` for a 1-D value that
/// is not one-to-one, which has no subgroup form.
pub fn replication_count(shape: &[usize], dist: &DistributionAttr) -> Option<usize> {
    let [g0, g1] = dist.grid;
    let [t0, t1] = dist.tile;
    match *shape {
        [w] => (g0 * t0 == w || g1 * t1 == w).then_some(1),
        [w0, w1] => {
            if g0 * t0 == w0 || g1 * t1 == w1 || g1 * t0 == w0 || g0 * t1 == w1 {
                Some(1)
            } else {
                Some(w0 / (g0 * t0) + w1 / (g1 * t1))
            }
        }
        _ => None,
    }
}

/// Shape of the per-subgroup piece of a value of `shape`.
///
/// A 1-D workgroup vector maps onto whichever tile dimension is not unit.
pub fn subgroup_shape(shape: &[usize], dist: &DistributionAttr) -> SmallVec<[usize; 4]> {
    let [t0, t1] = dist.tile;
    match shape.len() {
        1 => SmallVec::from_elem(if t0 == 1 { t1 } else { t0 }, 1),
        _ => SmallVec::from_slice(&[t0, t1]),
    }
}

// ============================================================================
// Emitters
// ============================================================================

/// Emit the grid coordinates of the running subgroup.
pub fn emit_subgroup_coords(b: &mut impl Builder, sg_id: ValueId, grid: [usize; 2], order: Order) -> [ValueId; 2] {
    match order {
        Order::Default => {
            let cols = b.index_const(grid[1] as i64);
            [b.index_divu(sg_id, cols), b.index_remu(sg_id, cols)]
        }
        Order::Swapped => {
            let rows = b.index_const(grid[0] as i64);
            [b.index_remu(sg_id, rows), b.index_divu(sg_id, rows)]
        }
    }
}

/// Emit the axis offsets of [`axis_offsets`] with a runtime coordinate and base offset.
pub fn emit_axis_offsets(
    b: &mut impl Builder,
    extent: usize,
    tile: usize,
    grid: usize,
    coord: ValueId,
    base: ValueId,
) -> SmallVec<[ValueId; 4]> {
    let tiles = extent / tile;
    let tiles_v = b.index_const(tiles as i64);
    let tile_v = b.index_const(tile as i64);

    (0..tiles)
        .step_by(grid.max(1))
        .map(|i| {
            let start = b.index_const(i as i64);
            let shifted = b.index_add(start, coord);
            let wrapped = b.index_remu(shifted, tiles_v);
            let local = b.index_mul(wrapped, tile_v);
            b.index_add(base, local)
        })
        .collect()
}

/// Emit the top-left element of the single tile subgroup `sg_id` owns under `dist`
/// with `order` placement, wrapped into `bounds`.
pub fn emit_owned_tile_origin(
    b: &mut impl Builder,
    sg_id: ValueId,
    dist: &DistributionAttr,
    order: Order,
    bounds: Option<[usize; 2]>,
) -> [ValueId; 2] {
    let coords = emit_subgroup_coords(b, sg_id, dist.grid, order);
    std::array::from_fn(|axis| {
        let tile = b.index_const(dist.tile[axis] as i64);
        let origin = b.index_mul(coords[axis], tile);
        match bounds {
            Some(bounds) => {
                let bound = b.index_const(bounds[axis] as i64);
                b.index_remu(origin, bound)
            }
            None => origin,
        }
    })
}
