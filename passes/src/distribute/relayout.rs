//! `convert_layout` lowering.
//!
//! Every subgroup stores its block of the source layout into workgroup-local scratch
//! memory, the workgroup synchronizes on a barrier, and every subgroup loads its block
//! of the destination layout back.
//!
//! A transpose that feeds the relayout and has no other use is folded into the store:
//! the untransposed data is written through a transposed view of the scratch buffer,
//! which leaves the buffer holding the transposed value.

use snafu::ensure;
use subtile_ir::conversion::{Adaptor, PatternSet, Rewriter};
use subtile_ir::error::{MatchResult, ShapeMismatchSnafu};
use subtile_ir::{AddrSpace, Builder, MemRefType, OpId, OpKind, Order, ScalarDType, TileType, Type, ValueId};

use super::offsets::emit_owned_tile_origin;
use super::{DistributeCtx, dist_of, ensure_resolved, shape_2d};

pub fn patterns<'a>() -> PatternSet<DistributeCtx<'a>> {
    let mut set = PatternSet::new();
    set.add(&[OpKind::ConvertLayout], "distribute_convert_layout", convert_layout);
    set
}

/// The transpose producing `value` when it can be folded into a relayout store.
fn foldable_transpose(rw: &Rewriter<'_>, value: ValueId) -> Option<OpId> {
    let graph = rw.graph();
    let def = graph.defining_op(value)?;
    (graph.kind(def) == OpKind::Transpose && rw.is_live(def) && graph.has_one_use(value)).then_some(def)
}

fn convert_layout(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, ctx: &mut DistributeCtx<'_>) -> MatchResult {
    let source = rw.graph().operand(op, 0);
    let result = rw.graph().result(op, 0);
    let [rows, cols] = shape_2d(rw, result, "convert_layout result")?;
    let elem = rw.value_type(result).elem();
    let dst = dist_of(rw.graph(), result, "convert_layout result")?;

    let folded = if ctx.fold_transpose { foldable_transpose(rw, source) } else { None };
    let (src, data) = match folded {
        Some(transpose) => {
            let input = rw.graph().operand(transpose, 0);
            let data = rw.lookup(input);
            ensure!(data.len() == 1, ShapeMismatchSnafu { reason: "transposed relayout source was split" });
            (dist_of(rw.graph(), input, "transpose source")?, data[0])
        }
        None => {
            ensure_resolved(rw.graph(), adaptor)?;
            (dist_of(rw.graph(), source, "convert_layout source")?, adaptor.single(0)?)
        }
    };
    ensure!(
        !rw.value_type(data).is_distributed(),
        ShapeMismatchSnafu { reason: format!("relayout data {data} is not distributed yet") }
    );

    // Scratch buffer holding the whole workgroup value.
    let bytes = rows * cols * elem.bytes();
    let buffer = rw.alloc(MemRefType::new(vec![bytes], ScalarDType::UInt8).with_scope(AddrSpace::Local));
    let zero = rw.index_const(0);
    let scratch = rw.view(buffer, zero, MemRefType::new(vec![rows, cols], elem).with_scope(AddrSpace::Local));
    let sg_id = rw.subgroup_id();

    // Store phase in the source layout. A folded transpose whose input was loaded with
    // swapped placement leaves each subgroup holding the block at its column-major
    // coordinates.
    let placement = match folded {
        Some(transpose) => ctx.layouts.order(rw.graph().result(transpose, 0)),
        None => Order::Default,
    };
    let origin = emit_owned_tile_origin(rw, sg_id, &src, placement, None);
    let (store_view, order) = match folded {
        Some(_) => (rw.memref_transpose(scratch, &[1, 0])?, Order::Swapped),
        None => (scratch, Order::Default),
    };
    let store_ty = TileType::new(src.tile, elem).with_order(order).with_scope(AddrSpace::Local);
    let store_tile = rw.init_tile(store_view, &origin, Type::Tile(store_ty));
    rw.store_tile(data, store_tile, Default::default());

    rw.barrier();

    // Load phase in the destination layout.
    let origin = emit_owned_tile_origin(rw, sg_id, &dst, Order::Default, Some([rows, cols]));
    let load_ty = TileType::new(dst.tile, elem).with_scope(AddrSpace::Local);
    let load_tile = rw.init_tile(scratch, &origin, Type::Tile(load_ty.clone()));
    let loaded = rw.load_tile(load_tile, Type::Vector(load_ty.value_type()), Default::default());

    tracing::debug!(%op, folded = folded.is_some(), %src, %dst, "relayout through local memory");
    rw.replace_op_with(op, &[loaded]);
    if let Some(transpose) = folded {
        rw.erase_op(transpose);
    }
    Ok(())
}
