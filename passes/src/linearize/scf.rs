//! Loop-carried vectors.
//!
//! The loop is rebuilt with flat iteration types. Yielded values are cast to the flat
//! type at the end of the body; uses of the old arguments and results are bridged by
//! the driver where their consumers stay multi-dimensional.

use smallvec::SmallVec;
use subtile_ir::conversion::{Adaptor, PatternSet, Rewriter};
use subtile_ir::error::MatchResult;
use subtile_ir::{Builder, InsertPoint, OpId, OpKind, Type};

pub fn patterns() -> PatternSet {
    let mut set = PatternSet::new();
    set.add(&[OpKind::For], "linearize_for", for_loop);
    set
}

fn for_loop(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let operands = adaptor.singles()?;
    let types = rw
        .graph()
        .results(op)
        .iter()
        .map(|r| rw.convert_type(rw.value_type(*r)))
        .collect::<MatchResult<Vec<Type>>>()?;

    let mut new_operands = operands[..3].to_vec();
    for (&init, ty) in operands[3..].iter().zip(&types) {
        new_operands.push(rw.materialize(init, ty));
    }
    let attrs = rw.graph().attrs(op).clone();
    let new_loop = rw.create(OpKind::For, &new_operands, types.clone(), attrs);

    let body = rw.graph().regions(op)[0];
    rw.move_region(body, new_loop);
    let mut arg_types: Vec<SmallVec<[Type; 4]>> = vec![SmallVec::from_elem(Type::index(), 1)];
    arg_types.extend(types.iter().map(|t| SmallVec::from_elem(t.clone(), 1)));
    rw.convert_region_arguments(body, &arg_types);

    let terminator = rw.graph().region(body).ops().last().copied();
    if let Some(yield_op) = terminator.filter(|t| rw.graph().kind(*t) == OpKind::Yield) {
        rw.set_insertion_point(InsertPoint::Before(yield_op));
        for (index, ty) in types.iter().enumerate() {
            let value = rw.graph().operand(yield_op, index);
            let value = match rw.lookup(value).as_slice() {
                &[current] => current,
                _ => value,
            };
            let flat = rw.materialize(value, ty);
            if flat != rw.graph().operand(yield_op, index) {
                rw.set_operand(yield_op, index, flat);
            }
        }
    }

    let results: Vec<_> = rw.graph().results(new_loop).to_vec();
    rw.replace_op_with(op, &results);
    Ok(())
}
