//! Constants and elementwise math.

use snafu::{OptionExt, ensure};
use strum::IntoEnumIterator;
use subtile_ir::attr::names;
use subtile_ir::conversion::{Adaptor, PatternSet, Rewriter};
use subtile_ir::error::{MatchResult, UnsupportedSnafu};
use subtile_ir::{Builder, OpId, OpKind};

pub fn patterns() -> PatternSet {
    let elementwise: Vec<OpKind> = OpKind::iter().filter(|k| k.is_elementwise()).collect();
    let mut set = PatternSet::new();
    set.add(&[OpKind::Constant], "linearize_constant", constant)
        .add(&elementwise, "linearize_elementwise", elementwise_op);
    set
}

/// Dense values are stored flat, so only the type changes.
fn constant(rw: &mut Rewriter<'_>, op: OpId, _: &Adaptor, _: &mut ()) -> MatchResult {
    let result = rw.graph().result(op, 0);
    let ty = rw.convert_type(rw.value_type(result))?;
    let value = rw
        .graph()
        .attrs(op)
        .dense(names::VALUE)
        .cloned()
        .context(UnsupportedSnafu { reason: "constant without a dense value" })?;
    let scalable = ty.as_vector().is_some_and(|v| v.is_scalable());
    ensure!(!scalable || value.is_splat(), UnsupportedSnafu { reason: "non-splat scalable constant" });

    let flat = rw.constant(ty, value);
    rw.replace_op_with(op, &[flat]);
    Ok(())
}

fn elementwise_op(rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, _: &mut ()) -> MatchResult {
    let kind = rw.graph().kind(op);
    let operands = adaptor.singles()?;
    let result = rw.graph().result(op, 0);
    let ty = rw.convert_type(rw.value_type(result))?;
    let attrs = rw.graph().attrs(op).clone();

    let flat = rw.create_value(kind, &operands, ty, attrs);
    rw.replace_op_with(op, &[flat]);
    Ok(())
}
