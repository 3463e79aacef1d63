//! Rule registry indexed by operation kind.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{MatchResult, ShapeMismatchSnafu};
use crate::{OpId, OpKind, ValueId};

use super::Rewriter;
use super::mapping::Replacements;

/// Rewrite rule: match `op` and rewrite it through the [`Rewriter`], or decline with a
/// [`MatchFailure`](crate::MatchFailure). Any change a declining rule made is rolled back.
pub type RuleFn<C> = dyn Fn(&mut Rewriter<'_>, OpId, &Adaptor, &mut C) -> MatchResult + Send + Sync;

pub struct Rule<C> {
    pub name: &'static str,
    apply: Arc<RuleFn<C>>,
}

impl<C> Rule<C> {
    pub fn apply(&self, rw: &mut Rewriter<'_>, op: OpId, adaptor: &Adaptor, ctx: &mut C) -> MatchResult {
        (self.apply)(rw, op, adaptor, ctx)
    }
}

impl<C> Clone for Rule<C> {
    fn clone(&self) -> Self {
        Self { name: self.name, apply: Arc::clone(&self.apply) }
    }
}

/// Conversion rules for one pass.
///
/// Rules registered for an operation kind are tried in registration order, followed by
/// wildcard rules. Sets compose with `+`.
pub struct PatternSet<C = ()> {
    indexed: HashMap<OpKind, Vec<Rule<C>>>,
    wildcards: Vec<Rule<C>>,
}

impl<C> Default for PatternSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PatternSet<C> {
    pub fn new() -> Self {
        Self { indexed: HashMap::new(), wildcards: Vec::new() }
    }

    /// Register `rule` for every kind in `kinds`; an empty list registers a wildcard.
    pub fn add<F>(&mut self, kinds: &[OpKind], name: &'static str, rule: F) -> &mut Self
    where
        F: Fn(&mut Rewriter<'_>, OpId, &Adaptor, &mut C) -> MatchResult + Send + Sync + 'static,
    {
        let rule = Rule { name, apply: Arc::new(rule) as Arc<RuleFn<C>> };
        if kinds.is_empty() {
            self.wildcards.push(rule);
        } else {
            for &kind in kinds {
                self.indexed.entry(kind).or_default().push(rule.clone());
            }
        }
        self
    }

    /// Rules to try for `kind`, in order.
    pub fn candidates(&self, kind: OpKind) -> impl Iterator<Item = &Rule<C>> {
        self.indexed.get(&kind).into_iter().flatten().chain(self.wildcards.iter())
    }

    /// Number of registered (kind, rule) entries.
    pub fn len(&self) -> usize {
        self.indexed.values().map(|v| v.len()).sum::<usize>() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.wildcards.is_empty()
    }
}

impl<C> std::ops::Add for PatternSet<C> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        for (kind, rules) in rhs.indexed {
            self.indexed.entry(kind).or_default().extend(rules);
        }
        self.wildcards.extend(rhs.wildcards);
        self
    }
}

/// Operands of the operation being rewritten, resolved through the replacement map.
///
/// Entry `i` lists the values standing for operand `i`: a single value for operands
/// that were not split, or the replacement list of a one-to-many rewrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Adaptor {
    operands: SmallVec<[Replacements; 4]>,
}

impl Adaptor {
    pub fn new(operands: impl IntoIterator<Item = Replacements>) -> Self {
        Self { operands: operands.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn get(&self, index: usize) -> &[ValueId] {
        &self.operands[index]
    }

    /// The only value standing for operand `index`.
    pub fn single(&self, index: usize) -> MatchResult<ValueId> {
        match self.operands[index].as_slice() {
            [v] => Ok(*v),
            other => ShapeMismatchSnafu { reason: format!("operand {index} expanded to {} values", other.len()) }.fail(),
        }
    }

    /// One value per operand, for rules that require one-to-one operands.
    pub fn singles(&self) -> MatchResult<SmallVec<[ValueId; 4]>> {
        (0..self.len()).map(|i| self.single(i)).collect()
    }

    /// All values, operand lists concatenated in order.
    pub fn flattened(&self) -> Vec<ValueId> {
        self.operands.iter().flatten().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[ValueId]> {
        self.operands.iter().map(|l| l.as_slice())
    }
}
