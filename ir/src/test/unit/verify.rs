use subtile_dtype::ScalarDType;

use crate::attr::{Attributes, ConstValue};
use crate::builder::{Builder, GraphBuilder};
use crate::error::Error;
use crate::verify::is_visible;
use crate::{Graph, InsertPoint, OpKind, Type};

#[test]
fn test_use_before_def_is_rejected() {
    let mut graph = Graph::new();
    let mut b = GraphBuilder::new(&mut graph);
    let x = b.i32_const(1);
    let late = b.i32_const(2);
    let first = graph.defining_op(x).unwrap();

    // An add placed before the constant it consumes.
    let add = graph.insert_op(
        InsertPoint::Before(first),
        OpKind::AddI,
        &[x, late],
        vec![Type::Scalar(ScalarDType::Int32)],
        Attributes::new(),
    );
    assert!(!is_visible(&graph, x, add));
    assert!(!is_visible(&graph, late, add));

    match crate::verify(&graph).unwrap_err() {
        Error::UndefinedValue { op, kind, .. } => {
            assert_eq!(op, add);
            assert_eq!(kind, OpKind::AddI);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_loop_body_sees_outer_values() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    builder.func("outer", vec![], |b, _| {
        let lb = b.index_const(0);
        let ub = b.index_const(2);
        let step = b.index_const(1);
        let outer = b.scalar_const(ScalarDType::Float32, ConstValue::Float(2.0));
        let init = b.scalar_const(ScalarDType::Float32, ConstValue::Float(0.0));
        let for_op = b.for_loop(lb, ub, step, &[init], |b, _, args| vec![b.binary(OpKind::AddF, args[0], outer)]);
        vec![b.graph().result(for_op, 0)]
    });
    assert!(crate::verify(&graph).is_ok());
}

#[test]
fn test_yield_type_mismatch() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    builder.func("bad", vec![], |b, _| {
        let lb = b.index_const(0);
        let step = b.index_const(1);
        let init = b.scalar_const(ScalarDType::Float32, ConstValue::Float(0.0));
        b.for_loop(lb, lb, step, &[init], |b, _, _| vec![b.i32_const(0)]);
        vec![]
    });
    let err = crate::verify(&graph).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation { kind: OpKind::For, .. }), "{err}");
}

#[test]
fn test_elementwise_type_mismatch() {
    let mut graph = Graph::new();
    let mut b = GraphBuilder::new(&mut graph);
    let x = b.i32_const(1);
    let y = b.index_const(1);
    b.create_value(OpKind::AddI, &[x, y], Type::Scalar(ScalarDType::Int32), Attributes::new());
    let err = crate::verify(&graph).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation { kind: OpKind::AddI, .. }), "{err}");
}

#[test]
fn test_missing_compare_predicate() {
    let mut graph = Graph::new();
    let mut b = GraphBuilder::new(&mut graph);
    let x = b.i32_const(1);
    b.create_value(OpKind::CmpI, &[x, x], Type::Scalar(ScalarDType::Bool), Attributes::new());
    assert!(crate::verify(&graph).is_err());
}

#[test]
fn test_erased_producer_is_not_visible() {
    let mut graph = Graph::new();
    let mut b = GraphBuilder::new(&mut graph);
    let x = b.i32_const(1);
    let y = b.cast(OpKind::ExtSI, x, Type::Scalar(ScalarDType::Int64));
    let user = graph.defining_op(y).unwrap();
    graph.erase_op(graph.defining_op(x).unwrap());
    assert!(!is_visible(&graph, x, user));
}
