use snafu::Snafu;

use crate::{OpId, OpKind, ValueId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    // =========================================================================
    // Conversion driver
    // =========================================================================
    /// An illegal operation survived every candidate rule.
    #[snafu(display("failed to legalize {kind} ({op}): {reasons}"))]
    LegalizationFailed { op: OpId, kind: OpKind, reasons: String },

    /// A value replaced by N != 1 values is still used by a legal operation.
    #[snafu(display("{value} was replaced by {count} values but is still used by {user}"))]
    UnresolvedReplacement { value: ValueId, user: OpId, count: usize },

    /// An operand refers to a value whose producer was erased without replacement.
    #[snafu(display("{user} uses {value}, whose producer was erased"))]
    DanglingValue { value: ValueId, user: OpId },

    /// A type change across a rewired use with no converter to bridge it.
    #[snafu(display("cannot materialize {value} as {expected} for {user}"))]
    MaterializationFailed { value: ValueId, user: OpId, expected: String },

    #[snafu(display("conversion did not converge after {rounds} rounds"))]
    RoundLimitExceeded { rounds: usize },

    // =========================================================================
    // Verification
    // =========================================================================
    #[snafu(display("{op} ({kind}) uses {value}, which is not visible at this point"))]
    UndefinedValue { op: OpId, kind: OpKind, value: ValueId },

    #[snafu(display("{op} ({kind}): {reason}"))]
    InvalidOperation { op: OpId, kind: OpKind, reason: String },

    // =========================================================================
    // Evaluation
    // =========================================================================
    #[snafu(display("evaluator does not support {kind}"))]
    EvalUnsupported { kind: OpKind },

    #[snafu(display("evaluator has no value for {value}"))]
    EvalUnbound { value: ValueId },

    #[snafu(display("evaluation of {kind} failed: {reason}"))]
    EvalFailed { kind: OpKind, reason: String },
}

/// Why a rule declined to rewrite an operation.
///
/// A match failure is local: the driver moves on to the next candidate rule and only
/// reports the collected reasons if no rule succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum MatchFailure {
    /// Shape or rank does not fit the rule.
    #[snafu(display("shape mismatch: {reason}"))]
    ShapeMismatch { reason: String },

    /// The distribution attribute required by the rule is absent.
    #[snafu(display("missing distribution attribute on {what}"))]
    MissingDistribution { what: String },

    /// The layout map has no entry the rule depends on.
    #[snafu(display("missing layout for {what}"))]
    MissingLayout { what: String },

    /// The operation uses a feature the rule does not handle.
    #[snafu(display("unsupported: {reason}"))]
    Unsupported { reason: String },

    /// A type could not be converted.
    #[snafu(display("type conversion failed: {reason}"))]
    TypeConversion { reason: String },
}

pub type MatchResult<T = ()> = std::result::Result<T, MatchFailure>;
