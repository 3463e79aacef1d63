//! Tile operation rules.
//!
//! `init_tile` is where a workgroup tile turns into its subgroup tiles: the rule emits
//! one subgroup tile per owned block, offsets computed from the subgroup id. Every other
//! tile operation iterates the replacement lists it receives and emits one instance
//! per element.

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use subtile_ir::conversion::{Adaptor, PatternSet, Replacements, Rewriter};
use subtile_ir::error::{MatchResult, MissingDistributionSnafu, ShapeMismatchSnafu, UnsupportedSnafu};
use subtile_ir::{Builder, OpId, OpKind, Order, TileType, Type, ValueId};

use super::offsets::emit_axis_offsets;
use super::offsets::emit_subgroup_coords;
use super::{DistributeCtx, ensure_resolved, pick};

pub fn patterns<'a>() -> PatternSet<DistributeCtx<'a>> {
    let mut set = PatternSet::new();
    set.add(&[OpKind::InitTile], "distribute_init_tile", init_tile)
        .add(&[OpKind::LoadTile], "distribute_load_tile", load_tile)
        .add(&[OpKind::LoadGather], "distribute_load_gather", load_gather)
        .add(&[OpKind::StoreTile], "distribute_store_tile", store_tile)
        .add(&[OpKind::StoreScatter], "distribute_store_scatter", store_scatter)
        .add(&[OpKind::PrefetchTile], "distribute_prefetch_tile", prefetch_tile)
        .add(&[OpKind::UpdateTileOffset], "distribute_update_tile_offset", update_tile_offset)
        .add(&[OpKind::TileMma], "distribute_tile_mma", tile_mma);
    set
}

fn tile_type(rw: &Rewriter<'_>, value: ValueId) -> MatchResult<TileType> {
    rw.value_type(value)
        .as_tile()
        .cloned()
        .context(ShapeMismatchSnafu { reason: format!("{value} is not a tile") })
}

/// Split a workgroup tile into the subgroup tiles the running subgroup owns.
fn init_tile(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, ctx: &mut DistributeCtx<'_>) -> MatchResult {
    let result = rw.graph().result(op, 0);
    let wg = tile_type(rw, result)?;
    let dist = wg.dist.context(MissingDistributionSnafu { what: "init_tile result" })?;
    ensure!(wg.order == Order::Default, UnsupportedSnafu { reason: "column-major workgroup tiles" });
    ensure_resolved(rw.graph(), adaptor)?;

    let source = adaptor.single(0)?;
    let sg_tile = TileType::new(dist.tile, wg.elem).with_scope(wg.scope);

    if wg.scatter {
        let indices = adaptor.single(1)?;
        let tile = rw.init_tile(source, &[indices], Type::Tile(sg_tile.with_scatter(true)));
        rw.replace_op_with(op, &[tile]);
        return Ok(());
    }

    let offsets = adaptor.singles()?;
    let offsets = &offsets[1..];
    ensure!(
        offsets.len() >= 2,
        ShapeMismatchSnafu { reason: format!("init_tile needs at least 2 offsets, got {}", offsets.len()) }
    );
    for axis in 0..2 {
        ensure!(
            wg.shape[axis] % dist.tile[axis] == 0,
            ShapeMismatchSnafu {
                reason: format!("extent {} is not a multiple of tile {} on axis {axis}", wg.shape[axis], dist.tile[axis])
            }
        );
    }
    let (leading, trailing) = offsets.split_at(offsets.len() - 2);

    let order = ctx.layouts.order(result);
    let sg_id = rw.subgroup_id();
    let coords = emit_subgroup_coords(rw, sg_id, dist.grid, order);
    let rows = emit_axis_offsets(rw, wg.shape[0], dist.tile[0], dist.grid[0], coords[0], trailing[0]);
    let cols = emit_axis_offsets(rw, wg.shape[1], dist.tile[1], dist.grid[1], coords[1], trailing[1]);

    let mut tiles = Replacements::new();
    for &row in &rows {
        for &col in &cols {
            let mut tile_offsets: SmallVec<[ValueId; 4]> = leading.iter().copied().collect();
            tile_offsets.extend([row, col]);
            tiles.push(rw.init_tile(source, &tile_offsets, Type::Tile(sg_tile.clone())));
        }
    }

    tracing::debug!(%op, ?order, replacements = tiles.len(), "distributed init_tile");
    rw.replace_op(op, vec![tiles]);
    Ok(())
}

fn load_tile(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let result = rw.graph().result(op, 0);
    ensure!(rw.value_type(result).rank() == 2, ShapeMismatchSnafu { reason: "load_tile result must be 2-D" });
    let hints = rw.graph().attrs(op).hints();

    let mut loads = Replacements::new();
    for &tile in adaptor.get(0) {
        let ty = tile_type(rw, tile)?.value_type();
        loads.push(rw.load_tile(tile, Type::Vector(ty), hints.clone()));
    }
    rw.replace_op(op, vec![loads]);
    Ok(())
}

fn load_gather(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let result = rw.graph().result(op, 0);
    ensure!(rw.value_type(result).rank() == 2, ShapeMismatchSnafu { reason: "load_gather result must be 2-D" });
    let hints = rw.graph().attrs(op).hints();

    let mut loads = Replacements::new();
    for (i, &tile) in adaptor.get(0).iter().enumerate() {
        let mask = pick(adaptor.get(1), i)?;
        let ty = tile_type(rw, tile)?.value_type();
        loads.push(rw.load_gather(tile, mask, Type::Vector(ty), hints.clone()));
    }
    rw.replace_op(op, vec![loads]);
    Ok(())
}

fn store_tile(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let hints = rw.graph().attrs(op).hints();
    let (values, tiles) = (adaptor.get(0), adaptor.get(1));
    ensure!(
        values.len() == tiles.len(),
        ShapeMismatchSnafu { reason: format!("{} values stored into {} tiles", values.len(), tiles.len()) }
    );

    for (&value, &tile) in values.iter().zip(tiles) {
        rw.store_tile(value, tile, hints.clone());
    }
    rw.erase_op(op);
    Ok(())
}

fn store_scatter(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let hints = rw.graph().attrs(op).hints();
    let (values, tiles) = (adaptor.get(0), adaptor.get(1));
    ensure!(
        values.len() == tiles.len(),
        ShapeMismatchSnafu { reason: format!("{} values scattered into {} tiles", values.len(), tiles.len()) }
    );

    for (i, (&value, &tile)) in values.iter().zip(tiles).enumerate() {
        let mask = pick(adaptor.get(2), i)?;
        rw.store_scatter(value, tile, mask, hints.clone());
    }
    rw.erase_op(op);
    Ok(())
}

fn prefetch_tile(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let hints = rw.graph().attrs(op).hints();
    for &tile in adaptor.get(0) {
        rw.prefetch_tile(tile, hints.clone());
    }
    rw.erase_op(op);
    Ok(())
}

fn update_tile_offset(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let (x, y) = (adaptor.single(1)?, adaptor.single(2)?);
    let tiles: Replacements = adaptor.get(0).iter().map(|&tile| rw.update_tile_offset(tile, x, y)).collect();
    rw.replace_op(op, vec![tiles]);
    Ok(())
}

/// Every pairing of an A block with a B block, consuming accumulator blocks in order.
fn tile_mma(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let result = rw.graph().result(op, 0);
    ensure!(rw.value_type(result).rank() == 2, ShapeMismatchSnafu { reason: "tile_mma result must be 2-D" });
    let elem = rw.value_type(result).elem();
    let acc = (adaptor.len() > 2).then(|| adaptor.get(2));

    let mut products = Replacements::new();
    for &a in adaptor.get(0) {
        for &b in adaptor.get(1) {
            let c = match acc {
                Some(list) => Some(
                    *list
                        .get(products.len())
                        .context(ShapeMismatchSnafu { reason: "fewer accumulator blocks than A x B pairs" })?,
                ),
                None => None,
            };
            let rows = rw.value_type(a).shape()[0];
            let cols = rw.value_type(b).shape()[1];
            products.push(rw.tile_mma(a, b, c, Type::vector(vec![rows, cols], elem)));
        }
    }
    rw.replace_op(op, vec![products]);
    Ok(())
}
