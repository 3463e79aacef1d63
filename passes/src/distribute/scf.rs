//! Loop rules.
//!
//! A loop-carried workgroup value that expanded into K subgroup values becomes K
//! iteration arguments. The rules flatten the init, argument and yield lists and then
//! regroup the loop results positionally, so consumers after the loop see the same
//! replacement lists as consumers inside it.

use itertools::Itertools;
use smallvec::SmallVec;
use snafu::ensure;
use subtile_ir::conversion::{Adaptor, PatternSet, Replacements, Rewriter};
use subtile_ir::error::{MatchResult, UnsupportedSnafu};
use subtile_ir::{Builder, OpId, OpKind, Type, ValueId};

use super::{DistributeCtx, ensure_resolved};

pub fn patterns<'a>() -> PatternSet<DistributeCtx<'a>> {
    let mut set = PatternSet::new();
    set.add(&[OpKind::For], "distribute_for", for_loop).add(&[OpKind::Yield], "distribute_yield", yield_op);
    set
}

fn for_loop(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    let bounds = [adaptor.single(0)?, adaptor.single(1)?, adaptor.single(2)?];
    let groups: Vec<&[ValueId]> = (3..adaptor.len()).map(|i| adaptor.get(i)).collect();
    ensure!(groups.iter().all(|g| !g.is_empty()), UnsupportedSnafu { reason: "loop-carried value with no replacement" });

    let inits: Vec<ValueId> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let types: Vec<Type> = inits.iter().map(|v| rw.value_type(*v).clone()).collect();
    let operands: Vec<ValueId> = bounds.into_iter().chain(inits.iter().copied()).collect();
    let attrs = rw.graph().attrs(op).clone();
    let new_loop = rw.create(OpKind::For, &operands, types, attrs);

    let body = rw.graph().regions(op)[0];
    rw.move_region(body, new_loop);

    let mut arg_types: Vec<SmallVec<[Type; 4]>> = vec![SmallVec::from_elem(Type::index(), 1)];
    arg_types.extend(groups.iter().map(|g| g.iter().map(|v| rw.value_type(*v).clone()).collect()));
    rw.convert_region_arguments(body, &arg_types);

    let mut results = rw.graph().results(new_loop).iter().copied();
    let regrouped: Vec<Replacements> = groups.iter().map(|g| results.by_ref().take(g.len()).collect()).collect();

    tracing::debug!(
        %op,
        iter_args = inits.len(),
        groups = %groups.iter().map(|g| g.len()).join(","),
        "flattened loop-carried values"
    );
    rw.replace_op(op, regrouped);
    Ok(())
}

fn yield_op(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut DistributeCtx<'_>) -> MatchResult {
    ensure_resolved(rw.graph(), adaptor)?;
    rw.yield_values(&adaptor.flattened());
    rw.erase_op(op);
    Ok(())
}
