use std::collections::HashMap;
use std::sync::Arc;

use crate::{Graph, OpId, OpKind};

/// Predicate deciding whether a specific operation is legal.
pub type LegalityFn = Arc<dyn Fn(&Graph, OpId) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Legality {
    Legal,
    Illegal,
    Dynamic(LegalityFn),
}

impl std::fmt::Debug for Legality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legal => write!(f, "Legal"),
            Self::Illegal => write!(f, "Illegal"),
            Self::Dynamic(_) => write!(f, "Dynamic"),
        }
    }
}

/// Legality of every operation kind for one conversion.
///
/// Kinds without an explicit entry use the unknown-kind default, which is `Legal`
/// unless overridden with [`set_unknown`](Self::set_unknown).
#[derive(Debug, Clone)]
pub struct ConversionTarget {
    per_kind: HashMap<OpKind, Legality>,
    unknown: Legality,
}

impl Default for ConversionTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionTarget {
    pub fn new() -> Self {
        Self { per_kind: HashMap::new(), unknown: Legality::Legal }
    }

    pub fn add_legal(&mut self, kinds: &[OpKind]) -> &mut Self {
        for &kind in kinds {
            self.per_kind.insert(kind, Legality::Legal);
        }
        self
    }

    pub fn add_illegal(&mut self, kinds: &[OpKind]) -> &mut Self {
        for &kind in kinds {
            self.per_kind.insert(kind, Legality::Illegal);
        }
        self
    }

    pub fn add_dynamic<F>(&mut self, kinds: &[OpKind], predicate: F) -> &mut Self
    where
        F: Fn(&Graph, OpId) -> bool + Send + Sync + 'static,
    {
        let shared: LegalityFn = Arc::new(predicate);
        for &kind in kinds {
            self.per_kind.insert(kind, Legality::Dynamic(Arc::clone(&shared)));
        }
        self
    }

    pub fn set_unknown(&mut self, legality: Legality) -> &mut Self {
        self.unknown = legality;
        self
    }

    pub fn legality(&self, kind: OpKind) -> &Legality {
        self.per_kind.get(&kind).unwrap_or(&self.unknown)
    }

    pub fn is_legal(&self, graph: &Graph, op: OpId) -> bool {
        match self.legality(graph.kind(op)) {
            Legality::Legal => true,
            Legality::Illegal => false,
            Legality::Dynamic(predicate) => predicate(graph, op),
        }
    }
}
