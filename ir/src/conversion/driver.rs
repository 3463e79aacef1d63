//! Partial-conversion driver.
//!
//! # Algorithm
//!
//! 1. Clone the input graph; all work happens on the clone.
//! 2. Each round walks the graph pre-order (nested regions included) and collects the
//!    operations the [`ConversionTarget`] rejects.
//! 3. For each, the rules indexed under its kind are tried in order. The first rule that
//!    succeeds *and* replaces or erases the operation commits; every other attempt is
//!    rolled back.
//! 4. Operations no rule could rewrite stay in place and are retried next round: a later
//!    rewrite may erase them or make one of their rules applicable. Newly created
//!    illegal operations are picked up the same way.
//! 5. A round without progress is fatal. Otherwise, once nothing is illegal, remaining
//!    uses of replaced values are rewired (inserting materializations where the type
//!    changed) and the clone is swapped into the caller's graph.

use snafu::ensure;

use crate::builder::GraphBuilder;
use crate::error::{
    DanglingValueSnafu, LegalizationFailedSnafu, Result, RoundLimitExceededSnafu, UnresolvedReplacementSnafu,
};
use crate::graph::ValueDef;
use crate::{Graph, InsertPoint, OpId, ValueId, verify};

use super::mapping::ValueMapping;
use super::pattern::PatternSet;
use super::rewriter::{Applied, Rewriter};
use super::target::ConversionTarget;
use super::type_converter::{TypeConverter, materialize};
use super::{ConversionConfig, ConversionStats};

/// Legalize every operation of `graph` or leave it untouched.
#[tracing::instrument(skip_all, fields(max_rounds = config.max_rounds))]
pub fn apply_conversion<C>(
    graph: &mut Graph,
    target: &ConversionTarget,
    patterns: &PatternSet<C>,
    ctx: &mut C,
    converter: Option<&TypeConverter>,
    config: &ConversionConfig,
) -> Result<ConversionStats> {
    let mut work = graph.clone();
    let mut mapping = ValueMapping::default();
    let mut stats = ConversionStats::default();

    // Pass `max_rounds` only checks legality; it never rewrites.
    for pass in 0..=config.max_rounds {
        let illegal: Vec<OpId> = work.walk().into_iter().filter(|op| !target.is_legal(&work, *op)).collect();
        if illegal.is_empty() {
            stats.materializations = finalize(&mut work, &mapping, converter)?;
            if config.verify {
                verify::verify(&work)?;
            }
            tracing::debug!(
                rounds = stats.rounds,
                rewrites = stats.rewrites,
                created = stats.created,
                materializations = stats.materializations,
                "conversion complete"
            );
            *graph = work;
            return Ok(stats);
        }
        if pass == config.max_rounds {
            break;
        }

        stats.rounds += 1;
        tracing::trace!(round = stats.rounds, illegal = illegal.len(), "conversion round");

        let mut progress = false;
        let mut failures: Vec<(OpId, String)> = Vec::new();
        for op in illegal {
            if !work.is_alive(op) || target.is_legal(&work, op) {
                continue;
            }
            match try_rules(&mut work, &mut mapping, converter, patterns, ctx, op) {
                Ok(applied) => {
                    progress = true;
                    stats.rewrites += 1;
                    stats.created += applied.created;
                    stats.erased += applied.erased;
                }
                Err(reasons) => failures.push((op, reasons)),
            }
        }

        // Walk order puts the earliest (outermost) stuck operation first.
        if !progress && let Some((op, reasons)) = failures.into_iter().next() {
            tracing::debug!(%op, kind = %work.kind(op), %reasons, "legalization failed");
            return LegalizationFailedSnafu { op, kind: work.kind(op), reasons }.fail();
        }
    }

    RoundLimitExceededSnafu { rounds: config.max_rounds }.fail()
}

fn try_rules<C>(
    graph: &mut Graph,
    mapping: &mut ValueMapping,
    converter: Option<&TypeConverter>,
    patterns: &PatternSet<C>,
    ctx: &mut C,
    op: OpId,
) -> std::result::Result<Applied, String> {
    let kind = graph.kind(op);
    let mut reasons = Vec::new();

    for rule in patterns.candidates(kind) {
        let mut rw = Rewriter::new(graph, mapping, converter, op);
        let adaptor = rw.adaptor(op);
        match rule.apply(&mut rw, op, &adaptor, ctx) {
            Ok(()) if rw.replaced_root() => {
                tracing::debug!(%op, %kind, rule = rule.name, "rule applied");
                return Ok(rw.commit());
            }
            Ok(()) => {
                tracing::trace!(%op, %kind, rule = rule.name, "rule left the operation in place");
                reasons.push(format!("{}: operation was neither replaced nor erased", rule.name));
                rw.rollback();
            }
            Err(failure) => {
                tracing::trace!(%op, %kind, rule = rule.name, %failure, "rule declined");
                reasons.push(format!("{}: {failure}", rule.name));
                rw.rollback();
            }
        }
    }

    if reasons.is_empty() {
        reasons.push("no rule registered".to_string());
    }
    Err(reasons.join("; "))
}

/// Rewire uses of replaced values. Returns the number of materializations inserted.
fn finalize(graph: &mut Graph, mapping: &ValueMapping, converter: Option<&TypeConverter>) -> Result<usize> {
    let mut materializations = 0;

    for user in graph.walk() {
        for index in 0..graph.operands(user).len() {
            let value = graph.operand(user, index);

            if !mapping.contains(value) {
                ensure!(is_defined(graph, value), DanglingValueSnafu { value, user });
                continue;
            }

            let replacements = mapping.lookup(value);
            ensure!(
                replacements.len() == 1,
                UnresolvedReplacementSnafu { value, user, count: replacements.len() }
            );

            let mut replacement = replacements[0];
            let expected = graph.value_type(value).clone();
            if converter.is_some() && graph.value_type(replacement) != &expected {
                let mut builder = GraphBuilder::at(graph, InsertPoint::Before(user));
                let bridged = materialize(&mut builder, replacement, &expected);
                if bridged != replacement {
                    materializations += 1;
                }
                replacement = bridged;
            }
            graph.set_operand(user, index, replacement);
        }
    }

    Ok(materializations)
}

/// True if `value` is produced by a live operation or is a current argument of a live region.
fn is_defined(graph: &Graph, value: ValueId) -> bool {
    match graph.value(value).def {
        ValueDef::Result { op, .. } => graph.is_alive(op),
        ValueDef::Argument { region, index } => {
            graph.region(region).args().get(index) == Some(&value)
                && graph.parent_op(region).is_none_or(|owner| graph.is_alive(owner))
        }
    }
}
