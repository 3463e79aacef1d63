use proptest::prelude::*;

use crate::attr::{CombiningKind, ConstValue, DenseElements};
use crate::builder::{Builder, GraphBuilder};
use crate::eval::{Evaluator, Memory, RtValue};
use crate::test::property::generators::arb_vector_with_data;
use crate::{Graph, Type};

proptest! {
    /// Transposing by a permutation and then by its inverse is the identity.
    #[test]
    fn transpose_round_trip((ty, data) in arb_vector_with_data()) {
        let rank = ty.rank();
        let perm: Vec<usize> = (0..rank).rev().collect();
        let mut inverse = vec![0; rank];
        for (i, &p) in perm.iter().enumerate() {
            inverse[p] = i;
        }

        let mut graph = Graph::new();
        let mut builder = GraphBuilder::new(&mut graph);
        let values = data.clone();
        let func = builder.func("f", vec![], |b, _| {
            let v = b.constant(Type::Vector(ty.clone()), DenseElements::Values(values));
            let shape: Vec<usize> = perm.iter().map(|&p| ty.shape[p]).collect();
            let t = b.transpose(v, &perm, Type::Vector(ty.reshaped(shape)));
            let back = b.transpose(t, &inverse, Type::Vector(ty.clone()));
            vec![back]
        });

        let mut memory = Memory::new();
        let out = Evaluator::new(&graph, &mut memory).run_func(func, vec![]).unwrap();
        prop_assert_eq!(out[0].as_vector().unwrap().data.clone(), data);
    }

    /// Reducing every dimension with `add` sums all elements into the accumulator.
    #[test]
    fn full_reduction_sums((ty, data) in arb_vector_with_data()) {
        let expected: f64 = data.iter().map(|c| c.as_f64()).sum::<f64>() + 1.0;
        let dims: Vec<usize> = (0..ty.rank()).collect();

        let mut graph = Graph::new();
        let mut builder = GraphBuilder::new(&mut graph);
        let func = builder.func("f", vec![], |b, _| {
            let v = b.constant(Type::Vector(ty.clone()), DenseElements::Values(data));
            let acc = b.scalar_const(ty.elem, ConstValue::Float(1.0));
            vec![b.multi_reduction(CombiningKind::Add, v, acc, &dims)]
        });

        let mut memory = Memory::new();
        let out = Evaluator::new(&graph, &mut memory).run_func(func, vec![]).unwrap();
        prop_assert_eq!(out[0].clone(), RtValue::Scalar(ConstValue::Float(expected)));
    }
}
