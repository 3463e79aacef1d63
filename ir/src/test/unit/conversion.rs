//! Conversion driver tests.
//!
//! The toy conversions here split `vector<4xf32>` values into two `vector<2xf32>` halves,
//! which exercises one-to-many replacement the same way the distribution pass does.

use smallvec::smallvec;
use subtile_dtype::ScalarDType;

use crate::attr::{ConstValue, DenseElements, names};
use crate::builder::{Builder, GraphBuilder};
use crate::conversion::{
    Adaptor, Conversion, ConversionConfig, ConversionTarget, PatternSet, Rewriter, TypeConverter, ValueMapping,
    apply_conversion,
};
use crate::error::{Error, MatchResult, UnsupportedSnafu};
use crate::eval::{Evaluator, Memory, RtValue};
use crate::{Graph, OpId, OpKind, Type};

fn config() -> ConversionConfig {
    ConversionConfig::builder().max_rounds(8).verify(true).build()
}

fn is_wide(ty: &Type) -> bool {
    ty.shape() == [4]
}

fn has_wide_value(graph: &Graph, op: OpId) -> bool {
    graph.operands(op).iter().chain(graph.results(op)).any(|v| is_wide(graph.value_type(*v)))
}

/// `return (constant [1, 2, 3, 4] + constant 10)`.
fn wide_program() -> (Graph, OpId) {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let func = builder.func("wide", vec![], |b, _| {
        let x = b.constant(Type::vector(vec![4], ScalarDType::Float32), DenseElements::from_slice(&[1.0f64, 2.0, 3.0, 4.0]));
        let y = b.constant(Type::vector(vec![4], ScalarDType::Float32), DenseElements::Splat(ConstValue::Float(10.0)));
        vec![b.binary(OpKind::AddF, x, y)]
    });
    (graph, func)
}

fn split_target(split_return: bool) -> ConversionTarget {
    let mut target = ConversionTarget::new();
    target.add_dynamic(&[OpKind::Constant, OpKind::AddF], |g, op| !has_wide_value(g, op));
    if split_return {
        target.add_dynamic(&[OpKind::Return], |g, op| !has_wide_value(g, op));
    }
    target
}

fn split_constant(rw: &mut Rewriter<'_>, op: OpId, _: &Adaptor, _: &mut ()) -> MatchResult {
    let result = rw.graph().result(op, 0);
    if !is_wide(rw.graph().value_type(result)) {
        return UnsupportedSnafu { reason: "not a vector<4>" }.fail();
    }
    let dense = rw.graph().attrs(op).dense(names::VALUE).cloned().unwrap();
    let half = Type::vector(vec![2], ScalarDType::Float32);
    let lo = rw.constant(half.clone(), DenseElements::Values(vec![dense.get(0).unwrap(), dense.get(1).unwrap()]));
    let hi = rw.constant(half, DenseElements::Values(vec![dense.get(2).unwrap(), dense.get(3).unwrap()]));
    rw.replace_op(op, vec![smallvec![lo, hi]]);
    Ok(())
}

fn split_add(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let (lhs, rhs) = (adaptor.get(0).to_vec(), adaptor.get(1).to_vec());
    if lhs.len() != 2 || rhs.len() != 2 {
        return UnsupportedSnafu { reason: "operands not split" }.fail();
    }
    let parts = (0..2).map(|i| rw.binary(OpKind::AddF, lhs[i], rhs[i])).collect();
    rw.replace_op(op, vec![parts]);
    Ok(())
}

fn flatten_return(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    rw.return_values(&adaptor.flattened());
    rw.erase_op(op);
    Ok(())
}

fn split_patterns() -> PatternSet {
    let mut patterns = PatternSet::new();
    patterns.add(&[OpKind::Constant], "split-constant", split_constant);
    patterns.add(&[OpKind::AddF], "split-add", split_add);
    patterns.add(&[OpKind::Return], "flatten-return", flatten_return);
    patterns
}

fn run(graph: &Graph, func: OpId) -> Vec<RtValue> {
    let mut memory = Memory::new();
    Evaluator::new(graph, &mut memory).run_func(func, vec![]).unwrap()
}

fn floats(values: &[RtValue]) -> Vec<f64> {
    values.iter().flat_map(|v| v.as_vector().unwrap().data.iter().map(|c| c.as_f64())).collect()
}

// =========================================================================
// One-to-many replacement
// =========================================================================

#[test]
fn test_one_to_many_split_preserves_semantics() {
    let (mut graph, func) = wide_program();
    let before = floats(&run(&graph, func));

    let stats = apply_conversion(&mut graph, &split_target(true), &split_patterns(), &mut (), None, &config()).unwrap();

    let after = run(&graph, func);
    assert_eq!(after.len(), 2);
    assert_eq!(floats(&after), before);
    assert_eq!(before, vec![11.0, 12.0, 13.0, 14.0]);
    // 2 constants + 1 add + 1 return.
    assert_eq!(stats.rewrites, 4);
    assert!(graph.walk().iter().all(|op| !has_wide_value(&graph, *op)));
}

#[test]
fn test_unresolved_replacement_leaves_graph_untouched() {
    let (mut graph, func) = wide_program();
    let printed = graph.display().to_string();

    // The return stays legal, so it still consumes the split sum.
    let err = apply_conversion(&mut graph, &split_target(false), &split_patterns(), &mut (), None, &config())
        .unwrap_err();

    assert!(matches!(err, Error::UnresolvedReplacement { count: 2, .. }), "{err}");
    assert_eq!(graph.display().to_string(), printed);
    assert_eq!(floats(&run(&graph, func)), vec![11.0, 12.0, 13.0, 14.0]);
}

// =========================================================================
// Rule selection and rollback
// =========================================================================

#[test]
fn test_declining_rule_is_rolled_back() {
    let (mut graph, func) = wide_program();

    let mut patterns = PatternSet::new();
    // Creates garbage, then declines: nothing of it may survive.
    patterns.add(&[OpKind::Constant, OpKind::AddF, OpKind::Return], "noisy", |rw, _, _, _: &mut ()| {
        rw.index_const(99);
        rw.barrier();
        UnsupportedSnafu { reason: "always declines" }.fail()
    });
    let patterns = patterns + split_patterns();

    apply_conversion(&mut graph, &split_target(true), &patterns, &mut (), None, &config()).unwrap();

    assert!(graph.walk().iter().all(|op| graph.kind(*op) != OpKind::Barrier));
    assert!(graph.walk().iter().all(|op| graph.results(*op).iter().all(|v| graph.const_int(*v) != Some(99))));
    assert_eq!(floats(&run(&graph, func)), vec![11.0, 12.0, 13.0, 14.0]);
}

#[test]
fn test_rule_must_replace_root() {
    let (mut graph, _) = wide_program();

    let mut patterns = PatternSet::new();
    patterns.add(&[OpKind::Constant], "lazy", |_, _, _, _: &mut ()| Ok(()));

    let err = apply_conversion(&mut graph, &split_target(true), &patterns, &mut (), None, &config()).unwrap_err();
    match err {
        Error::LegalizationFailed { kind, reasons, .. } => {
            assert_eq!(kind, OpKind::Constant);
            assert!(reasons.contains("neither replaced nor erased"), "{reasons}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_rule_reports_first_illegal_op() {
    let (mut graph, _) = wide_program();
    let patterns: PatternSet = PatternSet::new();

    let err = apply_conversion(&mut graph, &split_target(true), &patterns, &mut (), None, &config()).unwrap_err();
    match err {
        Error::LegalizationFailed { kind, reasons, .. } => {
            assert_eq!(kind, OpKind::Constant);
            assert_eq!(reasons, "no rule registered");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_later_round_retries_blocked_op() {
    // Constants decline until the add has been attempted once, so the add is blocked in
    // the first round and only converts after its operands are split in the second.
    let (mut graph, func) = wide_program();

    let mut patterns: PatternSet<bool> = PatternSet::new();
    patterns.add(&[OpKind::Constant], "split-constant", |rw, op, adaptor, ready| {
        if !*ready {
            return UnsupportedSnafu { reason: "not ready" }.fail();
        }
        split_constant(rw, op, adaptor, &mut ())
    });
    patterns.add(&[OpKind::AddF], "split-add", |rw, op, adaptor, ready| {
        *ready = true;
        split_add(rw, op, adaptor, &mut ())
    });
    patterns.add(&[OpKind::Return], "flatten-return", |rw, op, adaptor, _| flatten_return(rw, op, adaptor, &mut ()));

    let mut ready = false;
    let exact = ConversionConfig::builder().max_rounds(2).verify(true).build();
    let stats = apply_conversion(&mut graph, &split_target(true), &patterns, &mut ready, None, &exact).unwrap();
    assert_eq!(stats.rounds, 2);
    assert_eq!(floats(&run(&graph, func)), vec![11.0, 12.0, 13.0, 14.0]);
}

#[test]
fn test_round_limit() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    builder.func("spin", vec![], |b, _| {
        let x = b.i32_const(3);
        vec![b.binary(OpKind::MulI, x, x)]
    });

    let mut target = ConversionTarget::new();
    target.add_illegal(&[OpKind::MulI]);
    let mut patterns = PatternSet::new();
    // Replaces the multiplication by an identical one, which is illegal again.
    patterns.add(&[OpKind::MulI], "respawn", |rw, op, adaptor, _: &mut ()| {
        let operands = adaptor.singles()?;
        let v = rw.binary(OpKind::MulI, operands[0], operands[1]);
        rw.replace_op_with(op, &[v]);
        Ok(())
    });

    let config = ConversionConfig::builder().max_rounds(3).build();
    let err = apply_conversion(&mut graph, &target, &patterns, &mut (), None, &config).unwrap_err();
    assert_eq!(err, Error::RoundLimitExceeded { rounds: 3 });
}

#[test]
fn test_limit_equal_to_rounds_needed_converges() {
    let (mut graph, func) = wide_program();
    let config = ConversionConfig::builder().max_rounds(1).verify(true).build();

    let stats = apply_conversion(&mut graph, &split_target(true), &split_patterns(), &mut (), None, &config).unwrap();

    assert_eq!(stats.rounds, 1);
    assert_eq!(floats(&run(&graph, func)), vec![11.0, 12.0, 13.0, 14.0]);
}

#[test]
fn test_zero_round_limit() {
    let (mut legal, _) = wide_program();
    let config = ConversionConfig::builder().max_rounds(0).build();
    let stats = apply_conversion(&mut legal, &ConversionTarget::new(), &split_patterns(), &mut (), None, &config).unwrap();
    assert_eq!(stats.rounds, 0);

    let (mut graph, _) = wide_program();
    let printed = graph.display().to_string();
    let err = apply_conversion(&mut graph, &split_target(true), &split_patterns(), &mut (), None, &config).unwrap_err();
    assert_eq!(err, Error::RoundLimitExceeded { rounds: 0 });
    assert_eq!(graph.display().to_string(), printed);
}

#[test]
fn test_erased_producer_without_replacement_dangles() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    builder.func("dangle", vec![], |b, _| {
        let x = b.scalar_const(ScalarDType::Float32, ConstValue::Float(1.0));
        vec![b.unary(OpKind::Exp, x)]
    });

    let mut target = ConversionTarget::new();
    target.add_illegal(&[OpKind::Exp]);
    let mut patterns = PatternSet::new();
    patterns.add(&[OpKind::Exp], "drop", |rw, op, _, _: &mut ()| {
        rw.erase_op(op);
        Ok(())
    });

    let err = apply_conversion(&mut graph, &target, &patterns, &mut (), None, &config()).unwrap_err();
    assert!(matches!(err, Error::DanglingValue { .. }), "{err}");
}

#[test]
fn test_erase_to_empty_replacement_is_fine_without_users() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let func = builder.func("unused", vec![], |b, _| {
        let x = b.scalar_const(ScalarDType::Float32, ConstValue::Float(1.0));
        b.unary(OpKind::Exp, x);
        vec![]
    });

    let mut target = ConversionTarget::new();
    target.add_illegal(&[OpKind::Exp]);
    let mut patterns = PatternSet::new();
    patterns.add(&[OpKind::Exp], "drop", |rw, op, _, _: &mut ()| {
        rw.replace_op(op, vec![smallvec![]]);
        Ok(())
    });

    let stats = apply_conversion(&mut graph, &target, &patterns, &mut (), None, &config()).unwrap();
    assert_eq!(stats.erased, 1);
    let body = graph.regions(func)[0];
    assert!(graph.region_ops_of(body, OpKind::Exp).is_empty());
}

// =========================================================================
// Type conversion and materialization
// =========================================================================

#[test]
fn test_type_converter_materializes_at_boundaries() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let func = builder.func("flatten", vec![], |b, _| {
        let x =
            b.constant(Type::vector(vec![2, 2], ScalarDType::Float32), DenseElements::from_slice(&[1.0f64, 2.0, 3.0, 4.0]));
        vec![b.binary(OpKind::AddF, x, x)]
    });

    let mut converter = TypeConverter::new();
    converter.add_conversion(|ty| match ty {
        Type::Vector(v) if v.rank() > 1 => Conversion::Converted(Type::Vector(v.reshaped(vec![v.num_elements()]))),
        _ => Conversion::Unchanged,
    });

    let mut target = ConversionTarget::new();
    target.add_dynamic(&[OpKind::AddF], |g, op| g.value_type(g.result(op, 0)).rank() <= 1);

    let mut patterns = PatternSet::new();
    patterns.add(&[OpKind::AddF], "flatten-add", |rw, op, adaptor, _: &mut ()| {
        let ty = rw.convert_type(rw.graph().value_type(rw.graph().result(op, 0)))?;
        let operands = adaptor.singles()?;
        assert_eq!(rw.graph().value_type(operands[0]), &ty, "adaptor bridges operands to converted types");
        let v = rw.create_value(OpKind::AddF, &operands, ty, Default::default());
        rw.replace_op_with(op, &[v]);
        Ok(())
    });

    let stats = apply_conversion(&mut graph, &target, &patterns, &mut (), Some(&converter), &config()).unwrap();
    assert_eq!(stats.materializations, 1);

    let out = run(&graph, func);
    let vector = out[0].as_vector().unwrap();
    assert_eq!(vector.shape.as_slice(), &[2, 2]);
    assert_eq!(floats(&out), vec![2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn test_materialize_folds_cast_pairs() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let x = builder.zero_vector(crate::VectorType::new(vec![2, 2], ScalarDType::Int32));
    let flat = builder.shape_cast(x, Type::vector(vec![4], ScalarDType::Int32));
    let back = crate::conversion::materialize(&mut builder, flat, &Type::vector(vec![2, 2], ScalarDType::Int32));
    assert_eq!(back, x);
    let same = crate::conversion::materialize(&mut builder, x, &Type::vector(vec![2, 2], ScalarDType::Int32));
    assert_eq!(same, x);
}

// =========================================================================
// Mapping and targets
// =========================================================================

#[test]
fn test_mapping_direct_and_lookup() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    let [a, b, c] = [builder.index_const(1), builder.index_const(2), builder.index_const(3)];

    let mut mapping = ValueMapping::default();
    mapping.map(a, [b]);
    mapping.map(b, [c, c]);
    assert_eq!(mapping.direct(a), Some(&[b][..]));
    assert_eq!(mapping.lookup(a).to_vec(), vec![c, c]);
    assert_eq!(mapping.len(), 2);
}

#[test]
fn test_target_unknown_default() {
    let (graph, func) = wide_program();
    let mut target = ConversionTarget::new();
    assert!(target.is_legal(&graph, func));
    target.set_unknown(crate::conversion::Legality::Illegal);
    assert!(!target.is_legal(&graph, func));
    target.add_legal(&[OpKind::Func]);
    assert!(target.is_legal(&graph, func));
}
