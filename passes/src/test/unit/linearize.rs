//! Linearization tests.
//!
//! Each program is evaluated before and after the pass; the flattened program must
//! produce the same elements in the same row-major order.

use subtile_ir::attr::{ConstValue, DenseElements};
use subtile_ir::conversion::{Conversion, ConversionConfig};
use subtile_ir::eval::{Evaluator, Memory, RtValue};
use subtile_ir::{
    Builder, Error as IrError, Graph, GraphBuilder, MemRefType, OpId, OpKind, ScalarDType, Type, ValueId, VectorType,
};

use crate::config::LinearizeConfig;
use crate::error::Error;
use crate::linearize::{is_linear, linearize, linearized};
use crate::test::fixtures::{F32, count_ops, floats, iota, ops_of};

fn config() -> LinearizeConfig {
    LinearizeConfig::builder().conversion(ConversionConfig::builder().verify(true).build()).build()
}

fn vector(shape: &[usize]) -> Type {
    Type::vector(shape.to_vec(), F32)
}

fn iota_vector(b: &mut GraphBuilder<'_>, shape: &[usize]) -> ValueId {
    b.constant(vector(shape), DenseElements::Values(iota(shape.iter().product())))
}

fn program(build: impl FnOnce(&mut GraphBuilder<'_>) -> Vec<ValueId>) -> (Graph, OpId) {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let func = builder.func("f", vec![], |b, _| build(b));
    (graph, func)
}

fn elements(rt: &RtValue) -> Vec<f64> {
    match rt {
        RtValue::Scalar(c) => vec![c.as_f64()],
        RtValue::Vector(v) => floats(&v.data),
        other => panic!("not a value: {other:?}"),
    }
}

fn run(graph: &Graph, func: OpId) -> Vec<Vec<f64>> {
    let mut memory = Memory::new();
    let results = Evaluator::new(graph, &mut memory).run_func(func, vec![]).unwrap();
    results.iter().map(elements).collect()
}

/// Every live vector produced inside `func` is at most 1-D, except the casts feeding
/// the return.
fn only_flat_vectors(graph: &Graph) -> bool {
    graph.walk().into_iter().filter(|op| graph.kind(*op) != OpKind::ShapeCast).all(|op| {
        graph.results(op).iter().all(|v| is_linear(graph.value_type(*v)))
    })
}

/// Linearize the program built by `build`, check it still computes the same values,
/// and return the linearized graph.
fn assert_equivalent(build: impl FnOnce(&mut GraphBuilder<'_>) -> Vec<ValueId>) -> Graph {
    let (mut graph, func) = program(build);
    let expected = run(&graph, func);
    linearize(&mut graph, &config()).unwrap();
    assert!(only_flat_vectors(&graph), "{}", graph.display());
    assert_eq!(run(&graph, func), expected);
    graph
}

// ============================================================================
// Type conversion
// ============================================================================

#[test]
fn test_type_conversion() {
    assert_eq!(linearized(&vector(&[2, 3])), Conversion::Converted(vector(&[6])));
    assert_eq!(linearized(&vector(&[6])), Conversion::Unchanged);
    assert_eq!(linearized(&Type::Scalar(F32)), Conversion::Unchanged);

    let scalable = Type::Vector(VectorType::scalable(vec![2, 4], F32, vec![false, true]));
    let flat = Type::Vector(VectorType::scalable(vec![8], F32, vec![true]));
    assert_eq!(linearized(&scalable), Conversion::Converted(flat));

    let doubly = Type::Vector(VectorType::scalable(vec![2, 4], F32, vec![true, true]));
    assert_eq!(linearized(&doubly), Conversion::Unconvertible);
}

// ============================================================================
// Arithmetic
// ============================================================================

#[test]
fn test_elementwise_chain() {
    let graph = assert_equivalent(|b| {
        let x = iota_vector(b, &[2, 3]);
        let y = b.constant(vector(&[2, 3]), DenseElements::Splat(ConstValue::Float(0.5)));
        let sum = b.binary(OpKind::AddF, x, y);
        vec![b.binary(OpKind::MulF, sum, x)]
    });
    assert_eq!(count_ops(&graph, OpKind::AddF), 1);
    assert_eq!(count_ops(&graph, OpKind::MulF), 1);
}

#[test]
fn test_non_splat_scalable_constant_is_rejected() {
    let (mut graph, _) = program(|b| {
        let ty = Type::Vector(VectorType::scalable(vec![2, 2], F32, vec![false, true]));
        vec![b.constant(ty, DenseElements::Values(iota(4)))]
    });
    let printed = graph.display().to_string();
    let err = linearize(&mut graph, &config()).unwrap_err();
    assert!(
        matches!(err, Error::LinearizationFailed { source: IrError::LegalizationFailed { kind: OpKind::Constant, .. } }),
        "{err}"
    );
    assert_eq!(graph.display().to_string(), printed);
}

// ============================================================================
// Slices and shuffles
// ============================================================================

#[test]
fn test_extract_strided_slice_becomes_a_shuffle() {
    let graph = assert_equivalent(|b| {
        let x = iota_vector(b, &[4, 4]);
        vec![b.extract_strided_slice(x, &[1, 2], &[2, 2], &[1, 1]).unwrap()]
    });
    assert_eq!(count_ops(&graph, OpKind::Shuffle), 1);
    assert_eq!(count_ops(&graph, OpKind::ExtractStridedSlice), 0);
}

#[test]
fn test_single_element_slice_stays_a_narrow_slice() {
    let graph = assert_equivalent(|b| {
        let x = iota_vector(b, &[2, 2]);
        vec![b.extract_strided_slice(x, &[1, 1], &[1, 1], &[1, 1]).unwrap()]
    });
    let slice = ops_of(&graph, OpKind::ExtractStridedSlice)[0];
    assert_eq!(graph.value_type(graph.result(slice, 0)).shape(), &[1]);
}

#[test]
fn test_non_unit_stride_is_rejected() {
    let (mut graph, _) = program(|b| {
        let x = iota_vector(b, &[4, 4]);
        vec![b.extract_strided_slice(x, &[0, 0], &[2, 2], &[2, 1]).unwrap()]
    });
    let err = linearize(&mut graph, &config()).unwrap_err();
    assert!(matches!(err, Error::LinearizationFailed { .. }), "{err}");
}

#[test]
fn test_insert_strided_slice_of_a_row() {
    assert_equivalent(|b| {
        let row = b.constant(vector(&[1, 2]), DenseElements::from_slice(&[-1.0f64, -2.0]));
        let dest = iota_vector(b, &[3, 4]);
        vec![b.insert_strided_slice(row, dest, &[1, 1], &[1, 1])]
    });
}

#[test]
fn test_shuffle_of_rows() {
    assert_equivalent(|b| {
        let x = iota_vector(b, &[3, 2]);
        let y = b.constant(vector(&[3, 2]), DenseElements::Splat(ConstValue::Float(-1.0)));
        vec![b.shuffle(x, y, &[2, 4, 0]).unwrap()]
    });
}

#[test]
fn test_extract_row_and_element() {
    let graph = assert_equivalent(|b| {
        let x = iota_vector(b, &[2, 3]);
        vec![b.extract(x, &[1]).unwrap(), b.extract(x, &[1, 2]).unwrap()]
    });
    assert_eq!(count_ops(&graph, OpKind::ExtractElement), 1);
    assert_eq!(count_ops(&graph, OpKind::Extract), 0);
}

#[test]
fn test_insert_row() {
    assert_equivalent(|b| {
        let row = b.constant(vector(&[3]), DenseElements::Splat(ConstValue::Float(9.0)));
        let dest = iota_vector(b, &[2, 3]);
        vec![b.insert(row, dest, &[1])]
    });
}

#[test]
fn test_transpose_becomes_a_flat_shuffle() {
    let graph = assert_equivalent(|b| {
        let x = iota_vector(b, &[2, 3]);
        vec![b.transpose(x, &[1, 0], vector(&[3, 2]))]
    });
    assert_eq!(count_ops(&graph, OpKind::Transpose), 0);
    assert_eq!(count_ops(&graph, OpKind::Shuffle), 1);
}

// ============================================================================
// Broadcasts, splats and masks
// ============================================================================

#[test]
fn test_broadcast_of_lower_rank() {
    let graph = assert_equivalent(|b| {
        let x = iota_vector(b, &[3]);
        vec![b.broadcast(x, vector(&[2, 3]))]
    });
    assert_eq!(count_ops(&graph, OpKind::Broadcast), 0);
}

#[test]
fn test_broadcast_stretching_a_unit_dimension() {
    assert_equivalent(|b| {
        let x = iota_vector(b, &[2, 1]);
        vec![b.broadcast(x, vector(&[2, 3]))]
    });
}

#[test]
fn test_broadcast_stretching_the_leading_dimension() {
    assert_equivalent(|b| {
        let x = iota_vector(b, &[1, 3]);
        vec![b.broadcast(x, vector(&[2, 2, 3]))]
    });
}

#[test]
fn test_broadcast_of_a_scalar() {
    let graph = assert_equivalent(|b| {
        let x = b.scalar_const(F32, ConstValue::Float(4.0));
        vec![b.broadcast(x, vector(&[2, 2]))]
    });
    assert_eq!(count_ops(&graph, OpKind::Splat), 1);
}

#[test]
fn test_broadcast_is_kept_without_pre_lowering() {
    let (mut graph, _) = program(|b| {
        let x = iota_vector(b, &[3]);
        vec![b.broadcast(x, vector(&[2, 3]))]
    });
    let config = LinearizeConfig::builder().lower_broadcasts(false).build();
    let stats = linearize(&mut graph, &config).unwrap();
    assert_eq!(stats.broadcasts.rewrites, 0);
    assert_eq!(count_ops(&graph, OpKind::Broadcast), 1);
}

#[test]
fn test_splat() {
    let graph = assert_equivalent(|b| {
        let x = b.scalar_const(F32, ConstValue::Float(2.0));
        vec![b.splat(x, vector(&[3, 2]))]
    });
    let splat = ops_of(&graph, OpKind::Splat)[0];
    assert_eq!(graph.value_type(graph.result(splat, 0)).shape(), &[6]);
}

#[test]
fn test_bitcast_is_flattened() {
    let (mut graph, _) = program(|b| {
        let x = iota_vector(b, &[2, 2]);
        vec![b.vector_bitcast(x, Type::vector(vec![2, 2], ScalarDType::Int32))]
    });
    linearize(&mut graph, &config()).unwrap();
    let bitcast = ops_of(&graph, OpKind::BitCast)[0];
    assert_eq!(graph.value_type(graph.result(bitcast, 0)), &Type::vector(vec![4], ScalarDType::Int32));
}

#[test]
fn test_row_mask() {
    assert_equivalent(|b| {
        let (one, three) = (b.index_const(1), b.index_const(3));
        vec![b.create_mask(&[one, three], Type::vector(vec![1, 4], ScalarDType::Bool))]
    });
}

#[test]
fn test_mask_with_several_rows_is_rejected() {
    let (mut graph, _) = program(|b| {
        let (two, three) = (b.index_const(2), b.index_const(3));
        vec![b.create_mask(&[two, three], Type::vector(vec![2, 4], ScalarDType::Bool))]
    });
    assert!(linearize(&mut graph, &config()).is_err());
}

// ============================================================================
// Memory
// ============================================================================

#[test]
fn test_2d_load_and_store_unroll_by_row() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let memref = Type::MemRef(MemRefType::new(vec![4, 8], F32));
    let func = builder.func("copy", vec![memref.clone(), memref], |b, args| {
        let (one, two, zero) = (b.index_const(1), b.index_const(2), b.index_const(0));
        let rows = b.load(args[0], &[one, two], vector(&[2, 4]));
        let doubled = b.binary(OpKind::AddF, rows, rows);
        b.store(doubled, args[1], &[two, zero]);
        vec![]
    });

    let run_copy = |graph: &Graph| {
        let mut memory = Memory::new();
        let src = memory.memref(&[4, 8], iota(32));
        let dst = memory.memref(&[4, 8], vec![ConstValue::Float(0.0); 32]);
        Evaluator::new(graph, &mut memory).run_func(func, vec![src, dst]).unwrap();
        floats(memory.buffer(1))
    };
    let expected = run_copy(&graph);
    linearize(&mut graph, &config()).unwrap();

    assert_eq!(count_ops(&graph, OpKind::Load), 2);
    assert_eq!(count_ops(&graph, OpKind::Store), 2);
    assert!(only_flat_vectors(&graph), "{}", graph.display());
    assert_eq!(run_copy(&graph), expected);
    assert_eq!(expected[16..20], [20.0, 22.0, 24.0, 26.0]);
}

// ============================================================================
// Loops and cleanup
// ============================================================================

#[test]
fn test_loop_carried_vector_is_flattened() {
    let graph = assert_equivalent(|b| {
        let x = iota_vector(b, &[2, 2]);
        let (lb, ub, step) = (b.index_const(0), b.index_const(3), b.index_const(1));
        let for_op = b.for_loop(lb, ub, step, &[x], |b, _, iter| vec![b.binary(OpKind::AddF, iter[0], x)]);
        vec![b.graph().result(for_op, 0)]
    });
    let for_op = ops_of(&graph, OpKind::For)[0];
    assert_eq!(graph.value_type(graph.result(for_op, 0)).shape(), &[4]);
}

#[test]
fn test_round_trip_casts_are_folded() {
    let build = |b: &mut GraphBuilder<'_>| {
        let x = iota_vector(b, &[2, 3]);
        vec![b.shape_cast(x, vector(&[6]))]
    };

    let (mut folded, func) = program(build);
    let stats = linearize(&mut folded, &config()).unwrap();
    assert_eq!(stats.folded_casts, 2);
    assert_eq!(count_ops(&folded, OpKind::ShapeCast), 0);
    assert_eq!(run(&folded, func), vec![(0..6).map(f64::from).collect::<Vec<_>>()]);

    let (mut kept, _) = program(build);
    let config = LinearizeConfig::builder().fold_shape_casts(false).build();
    let stats = linearize(&mut kept, &config).unwrap();
    assert_eq!(stats.folded_casts, 0);
    assert_eq!(count_ops(&kept, OpKind::ShapeCast), 2);
}

#[test]
fn test_flat_program_is_unchanged() {
    let (mut graph, _) = program(|b| {
        let x = iota_vector(b, &[4]);
        vec![b.binary(OpKind::AddF, x, x)]
    });
    let printed = graph.display().to_string();
    let stats = linearize(&mut graph, &config()).unwrap();
    assert_eq!(stats.conversion.rewrites, 0);
    assert_eq!(graph.display().to_string(), printed);
}
