//! `convert_layout` lowering through local scratch memory.

use subtile_ir::attr::{ConstValue, DenseElements};
use subtile_ir::conversion::ConversionConfig;
use subtile_ir::{
    AddrSpace, Attributes, Builder, DistributionAttr, Error as IrError, Graph, GraphBuilder, OpId, OpKind, Order,
};

use crate::config::DistributeConfig;
use crate::distribute::distribute;
use crate::error::Error;
use crate::test::fixtures::{
    KernelMemory, count_ops, fully_distributed, memref_type, ops_of, origin_tile, run_phased, run_subgroups,
    subgroup_tile_offsets, transposed, wg_vector,
};

const SHAPE: [usize; 2] = [64, 64];

fn src_dist() -> DistributionAttr {
    DistributionAttr::new([2, 2], [32, 32])
}

fn dst_dist() -> DistributionAttr {
    DistributionAttr::new([4, 1], [16, 64])
}

fn config(fold: bool) -> DistributeConfig {
    DistributeConfig::builder()
        .fold_transpose_into_relayout(fold)
        .conversion(ConversionConfig::builder().verify(true).build())
        .build()
}

/// Load under the source layout, relayout, store under the destination layout.
fn relayout_kernel() -> (Graph, OpId) {
    relayout_kernel_to(dst_dist(), false)
}

/// [`relayout_kernel`] into `dst`, transposing the loaded value first if `transpose`.
fn relayout_kernel_to(dst: DistributionAttr, transpose: bool) -> (Graph, OpId) {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let func = builder.func("relayout", vec![memref_type(SHAPE), memref_type(SHAPE)], |b, args| {
        let src = origin_tile(b, args[0], SHAPE, src_dist());
        let mut value = b.load_tile(src, wg_vector(SHAPE, src_dist()), Attributes::new());
        if transpose {
            value = b.transpose(value, &[1, 0], wg_vector(SHAPE, src_dist()));
        }
        let converted = b.convert_layout(value, wg_vector(SHAPE, dst));
        let dst_tile = origin_tile(b, args[1], SHAPE, dst);
        b.store_tile(converted, dst_tile, Attributes::new());
        vec![]
    });
    (graph, func)
}

/// A transposed splat constant relayouted; nothing upstream is a tile load, so the
/// transpose keeps its default placement.
fn transposed_relayout_kernel() -> (Graph, OpId) {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let func = builder.func("relayout", vec![memref_type(SHAPE), memref_type(SHAPE)], |b, args| {
        let value = b.constant(wg_vector(SHAPE, src_dist()), DenseElements::Splat(ConstValue::Float(1.0)));
        let transposed = b.transpose(value, &[1, 0], wg_vector(SHAPE, src_dist()));
        let converted = b.convert_layout(transposed, wg_vector(SHAPE, dst_dist()));
        let dst = origin_tile(b, args[1], SHAPE, dst_dist());
        b.store_tile(converted, dst, Attributes::new());
        vec![]
    });
    (graph, func)
}

fn local_tiles(graph: &Graph) -> Vec<OpId> {
    ops_of(graph, OpKind::InitTile)
        .into_iter()
        .filter(|op| graph.value_type(graph.result(*op, 0)).as_tile().is_some_and(|t| t.scope == AddrSpace::Local))
        .collect()
}

#[test]
fn test_relayout_goes_through_scratch_memory() {
    let (mut graph, _) = relayout_kernel();
    distribute(&mut graph, &config(true)).unwrap();

    assert!(fully_distributed(&graph));
    assert_eq!(count_ops(&graph, OpKind::ConvertLayout), 0);
    assert_eq!(count_ops(&graph, OpKind::Alloc), 1);
    assert_eq!(count_ops(&graph, OpKind::View), 1);
    assert_eq!(count_ops(&graph, OpKind::Barrier), 1);
    assert_eq!(count_ops(&graph, OpKind::MemRefTranspose), 0);

    let alloc = ops_of(&graph, OpKind::Alloc)[0];
    let buffer = graph.value_type(graph.result(alloc, 0)).as_memref().unwrap().clone();
    assert_eq!(buffer.shape.as_slice(), &[64 * 64 * 4]);
    assert_eq!(buffer.scope, AddrSpace::Local);

    // Store phase, barrier, load phase.
    let local = local_tiles(&graph);
    assert_eq!(local.len(), 2);
    let store = graph.users(graph.result(local[0], 0));
    let load = graph.users(graph.result(local[1], 0));
    assert_eq!(graph.kind(store[0]), OpKind::StoreTile);
    assert_eq!(graph.kind(load[0]), OpKind::LoadTile);
}

#[test]
fn test_relayout_tiles_follow_both_layouts() {
    let (mut graph, func) = relayout_kernel();
    distribute(&mut graph, &config(true)).unwrap();

    // Events: global source, scratch store, scratch load, global destination.
    for id in 0..4 {
        let offsets = subgroup_tile_offsets(&graph, func, id, SHAPE);
        let (row, col) = ((id / 2) as i64 * 32, (id % 2) as i64 * 32);
        assert_eq!(offsets[1], vec![row, col], "store origin of subgroup {id}");
        assert_eq!(offsets[2], vec![id as i64 * 16, 0], "load origin of subgroup {id}");
        assert_eq!(offsets[3], vec![id as i64 * 16, 0]);
    }
}

#[test]
fn test_single_use_transpose_folds_into_the_scratch_store() {
    let (mut graph, func) = transposed_relayout_kernel();
    let stats = distribute(&mut graph, &config(true)).unwrap();
    assert_eq!(stats.swapped, 0);

    assert_eq!(count_ops(&graph, OpKind::Transpose), 0);
    assert_eq!(count_ops(&graph, OpKind::MemRefTranspose), 1);
    let transposed_view = ops_of(&graph, OpKind::MemRefTranspose)[0];
    let store_tile = graph.users(graph.result(transposed_view, 0))[0];
    assert_eq!(graph.kind(store_tile), OpKind::InitTile);
    let tile = graph.value_type(graph.result(store_tile, 0)).as_tile().unwrap().clone();
    assert_eq!(tile.order, Order::Swapped);

    // The transposed view covers the whole scratch buffer.
    let mut mem = KernelMemory::new(SHAPE);
    run_phased(&graph, func, 4, &mut mem);
    assert!(mem.buffer(1).iter().all(|&x| x == 1.0));
}

#[test]
fn test_transpose_without_folding_cannot_be_distributed() {
    let (mut graph, _) = transposed_relayout_kernel();
    let printed = graph.display().to_string();
    let err = distribute(&mut graph, &config(false)).unwrap_err();
    assert!(
        matches!(err, Error::DistributionFailed { source: IrError::LegalizationFailed { kind: OpKind::Transpose, .. } }),
        "{err}"
    );
    assert_eq!(graph.display().to_string(), printed);
}

// ============================================================================
// Values
// ============================================================================

#[test]
fn test_relayout_moves_every_element() {
    let (mut graph, func) = relayout_kernel();
    distribute(&mut graph, &config(true)).unwrap();

    let mut mem = KernelMemory::new(SHAPE);
    run_phased(&graph, func, 4, &mut mem);
    assert_eq!(mem.buffer(1), mem.buffer(0));

    // Without the barrier phases subgroup 0 reads scratch rows other subgroups have not
    // written yet.
    let mut mem = KernelMemory::new(SHAPE);
    run_subgroups(&graph, func, 4, &mut mem);
    assert_ne!(mem.buffer(1), mem.buffer(0));
}

#[test]
fn test_relayout_load_wraps_around_the_scratch_buffer() {
    // Four 32-row blocks over 64 rows: subgroups 2 and 3 read the rows of 0 and 1 again.
    let dst = DistributionAttr::new([4, 1], [32, 64]);
    let (mut graph, func) = relayout_kernel_to(dst, false);
    distribute(&mut graph, &config(true)).unwrap();

    for (id, row) in [(0, 0), (1, 32), (2, 0), (3, 32)] {
        let offsets = subgroup_tile_offsets(&graph, func, id, SHAPE);
        assert_eq!(offsets[2], vec![row, 0], "scratch load origin of subgroup {id}");
    }

    let mut mem = KernelMemory::new(SHAPE);
    run_phased(&graph, func, 4, &mut mem);
    assert_eq!(mem.buffer(1), mem.buffer(0));
}

#[test]
fn test_relayout_of_a_transposed_load_stores_the_transpose() {
    let (mut graph, func) = relayout_kernel_to(dst_dist(), true);
    distribute(&mut graph, &config(true)).unwrap();
    assert!(fully_distributed(&graph));

    let mut mem = KernelMemory::new(SHAPE);
    run_phased(&graph, func, 4, &mut mem);
    assert_eq!(mem.buffer(1), transposed(&mem.buffer(0), 64, 64));
}
