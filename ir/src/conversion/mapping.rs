use std::collections::HashMap;

use smallvec::{SmallVec, smallvec};

use crate::ValueId;

/// Replacement list of one original value.
pub type Replacements = SmallVec<[ValueId; 4]>;

/// Bound on replacement chains followed by [`ValueMapping::lookup`].
const MAX_CHAIN: usize = 64;

/// One-to-many replacement map maintained by the conversion driver.
///
/// A value replaced during conversion maps to the ordered list of values that stand for
/// it. Replacements may themselves be replaced later (a materialized cast that is
/// converted again, for instance), so lookups follow chains and splice the expansions in
/// place, preserving order.
#[derive(Debug, Clone, Default)]
pub struct ValueMapping {
    map: HashMap<ValueId, Replacements>,
}

impl ValueMapping {
    /// Record `from → to`, returning the previous entry.
    pub fn map(&mut self, from: ValueId, to: impl IntoIterator<Item = ValueId>) -> Option<Replacements> {
        self.map.insert(from, to.into_iter().collect())
    }

    /// Reinstate an entry returned by [`map`](Self::map).
    pub(crate) fn restore(&mut self, from: ValueId, previous: Option<Replacements>) {
        match previous {
            Some(list) => self.map.insert(from, list),
            None => self.map.remove(&from),
        };
    }

    pub fn contains(&self, value: ValueId) -> bool {
        self.map.contains_key(&value)
    }

    /// Direct (one-step) replacements of `value`.
    pub fn direct(&self, value: ValueId) -> Option<&[ValueId]> {
        self.map.get(&value).map(|l| l.as_slice())
    }

    /// Fully resolved replacements of `value`; an unmapped value resolves to itself.
    pub fn lookup(&self, value: ValueId) -> Replacements {
        let mut out = smallvec![];
        self.expand(value, &mut out, 0);
        out
    }

    fn expand(&self, value: ValueId, out: &mut Replacements, depth: usize) {
        match self.map.get(&value) {
            Some(list) if depth < MAX_CHAIN => {
                for &r in list {
                    if r == value {
                        out.push(r);
                    } else {
                        self.expand(r, out, depth + 1);
                    }
                }
            }
            _ => out.push(value),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
