use smallvec::SmallVec;

use crate::attr::{Attribute, Attributes};
use crate::builder::Builder;
use crate::error::{MatchResult, TypeConversionSnafu};
use crate::{Graph, InsertPoint, OpId, OpKind, RegionId, Type, ValueId};

use super::mapping::{Replacements, ValueMapping};
use super::pattern::Adaptor;
use super::type_converter::{TypeConverter, materialize};

/// Undo record for one graph mutation made while a rule runs.
#[derive(Debug)]
enum Change {
    Created(OpId),
    Operand { op: OpId, index: usize, previous: ValueId },
    Mapping { value: ValueId, previous: Option<Replacements> },
    RegionMoved { region: RegionId, from: Option<OpId> },
    RegionArgs { region: RegionId, previous: SmallVec<[ValueId; 4]> },
    ValueType { value: ValueId, previous: Type },
    Attr { op: OpId, name: &'static str, previous: Option<Attribute> },
}

/// What a committed rule did to the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub created: usize,
    pub erased: usize,
}

/// Mutation interface handed to conversion rules.
///
/// Every change is journaled so that a rule which declines after partially rewriting
/// leaves no trace. Erasures are deferred until the rule commits; replacements are
/// recorded in the driver's [`ValueMapping`] rather than applied to uses.
pub struct Rewriter<'a> {
    graph: &'a mut Graph,
    mapping: &'a mut ValueMapping,
    converter: Option<&'a TypeConverter>,
    root: OpId,
    ip: InsertPoint,
    journal: Vec<Change>,
    erased: Vec<OpId>,
}

impl<'a> Rewriter<'a> {
    pub(crate) fn new(
        graph: &'a mut Graph,
        mapping: &'a mut ValueMapping,
        converter: Option<&'a TypeConverter>,
        root: OpId,
    ) -> Self {
        Self { graph, mapping, converter, root, ip: InsertPoint::Before(root), journal: Vec::new(), erased: Vec::new() }
    }

    /// Operation the rule was invoked on.
    pub fn root(&self) -> OpId {
        self.root
    }

    pub fn set_insertion_point(&mut self, ip: InsertPoint) {
        self.ip = ip;
    }

    pub fn insertion_point(&self) -> InsertPoint {
        self.ip
    }

    pub fn type_converter(&self) -> Option<&'a TypeConverter> {
        self.converter
    }

    /// Convert `ty` with the pass's type converter (identity when there is none).
    pub fn convert_type(&self, ty: &Type) -> MatchResult<Type> {
        match self.converter {
            None => Ok(ty.clone()),
            Some(c) => c.convert(ty).ok_or_else(|| TypeConversionSnafu { reason: format!("{ty} is not convertible") }.build()),
        }
    }

    /// Resolved replacements of `value` (itself when it was not replaced).
    pub fn lookup(&self, value: ValueId) -> Replacements {
        self.mapping.lookup(value)
    }

    pub fn mapping(&self) -> &ValueMapping {
        self.mapping
    }

    /// True if `op` is live and not scheduled for erasure by this rule.
    pub fn is_live(&self, op: OpId) -> bool {
        self.graph.is_alive(op) && !self.erased.contains(&op)
    }

    // =========================================================================
    // Replacement
    // =========================================================================

    /// Replace each result of `op` by a (possibly empty) list of values and erase `op`.
    pub fn replace_op(&mut self, op: OpId, replacements: Vec<Replacements>) {
        debug_assert_eq!(replacements.len(), self.graph.results(op).len(), "one replacement list per result");
        let results: SmallVec<[ValueId; 2]> = self.graph.results(op).iter().copied().collect();
        for (result, list) in results.into_iter().zip(replacements) {
            self.map_value(result, list);
        }
        self.erase_op(op);
    }

    /// One-to-one replacement.
    pub fn replace_op_with(&mut self, op: OpId, values: &[ValueId]) {
        let lists = values.iter().map(|v| SmallVec::from_elem(*v, 1)).collect();
        self.replace_op(op, lists);
    }

    /// Schedule `op` for erasure when the rule commits.
    pub fn erase_op(&mut self, op: OpId) {
        if !self.erased.contains(&op) {
            self.erased.push(op);
        }
    }

    pub fn map_value(&mut self, from: ValueId, to: impl IntoIterator<Item = ValueId>) {
        let previous = self.mapping.map(from, to);
        self.journal.push(Change::Mapping { value: from, previous });
    }

    // =========================================================================
    // In-place updates
    // =========================================================================

    pub fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) {
        let previous = self.graph.operand(op, index);
        self.graph.set_operand(op, index, value);
        self.journal.push(Change::Operand { op, index, previous });
    }

    pub fn set_attr(&mut self, op: OpId, name: &'static str, attr: Attribute) {
        let previous = self.graph.attrs(op).get(name).cloned();
        self.graph.set_attr(op, name, attr);
        self.journal.push(Change::Attr { op, name, previous });
    }

    pub fn set_value_type(&mut self, value: ValueId, ty: Type) {
        let previous = self.graph.value_type(value).clone();
        self.graph.set_value_type(value, ty);
        self.journal.push(Change::ValueType { value, previous });
    }

    /// Move `region` from its owner into `to`.
    pub fn move_region(&mut self, region: RegionId, to: OpId) {
        let from = self.graph.parent_op(region);
        self.graph.move_region(region, to);
        self.journal.push(Change::RegionMoved { region, from });
    }

    /// Rewrite the argument list of `region`: argument `i` becomes `new_types[i].len()`
    /// fresh arguments. An argument whose list is exactly its current type is kept.
    /// Returns the arguments standing for each original argument.
    pub fn convert_region_arguments(&mut self, region: RegionId, new_types: &[SmallVec<[Type; 4]>]) -> Vec<Replacements> {
        let old: SmallVec<[ValueId; 4]> = self.graph.region(region).args().iter().copied().collect();
        debug_assert_eq!(old.len(), new_types.len(), "one type list per region argument");

        let mut args = SmallVec::<[ValueId; 4]>::new();
        let mut groups = Vec::with_capacity(old.len());
        for (&arg, types) in old.iter().zip(new_types) {
            if types.len() == 1 && &types[0] == self.graph.value_type(arg) {
                args.push(arg);
                groups.push(SmallVec::from_elem(arg, 1));
                continue;
            }
            let mut group = Replacements::new();
            for ty in types {
                let fresh = self.graph.new_region_arg(region, args.len(), ty.clone());
                args.push(fresh);
                group.push(fresh);
            }
            self.map_value(arg, group.iter().copied());
            groups.push(group);
        }

        self.graph.set_region_args(region, args);
        self.journal.push(Change::RegionArgs { region, previous: old });
        groups
    }

    /// Bridge `value` to `ty` through a `shape_cast` (folding cast-of-cast pairs).
    pub fn materialize(&mut self, value: ValueId, ty: &Type) -> ValueId {
        materialize(self, value, ty)
    }

    /// Operand lists of `op` resolved through the replacement map. With a type converter,
    /// a single value of an illegal type is bridged to its converted type.
    pub fn adaptor(&mut self, op: OpId) -> Adaptor {
        let operands: SmallVec<[ValueId; 4]> = self.graph.operands(op).iter().copied().collect();
        let mut lists = Vec::with_capacity(operands.len());
        for v in operands {
            let mut list = self.mapping.lookup(v);
            if let (Some(converter), [single]) = (self.converter, list.as_mut_slice()) {
                let ty = self.graph.value_type(*single).clone();
                if let Some(target) = converter.convert(&ty)
                    && target != ty
                {
                    *single = materialize(self, *single, &target);
                }
            }
            lists.push(list);
        }
        Adaptor::new(lists)
    }

    // =========================================================================
    // Commit / rollback
    // =========================================================================

    pub(crate) fn replaced_root(&self) -> bool {
        self.erased.contains(&self.root)
    }

    pub(crate) fn commit(self) -> Applied {
        let created = self.journal.iter().filter(|c| matches!(c, Change::Created(_))).count();
        let erased = self.erased.len();
        for op in self.erased {
            if self.graph.is_alive(op) {
                self.graph.erase_op(op);
            }
        }
        Applied { created, erased }
    }

    pub(crate) fn rollback(self) {
        for change in self.journal.into_iter().rev() {
            match change {
                Change::Created(op) => self.graph.erase_op(op),
                Change::Operand { op, index, previous } => self.graph.set_operand(op, index, previous),
                Change::Mapping { value, previous } => self.mapping.restore(value, previous),
                Change::RegionMoved { region, from } => {
                    if let Some(from) = from {
                        self.graph.move_region(region, from);
                    }
                }
                Change::RegionArgs { region, previous } => self.graph.set_region_args(region, previous),
                Change::ValueType { value, previous } => self.graph.set_value_type(value, previous),
                Change::Attr { op, name, previous } => match previous {
                    Some(attr) => self.graph.set_attr(op, name, attr),
                    None => {
                        let _ = self.graph.remove_attr(op, name);
                    }
                },
            }
        }
    }
}

impl Builder for Rewriter<'_> {
    fn graph(&self) -> &Graph {
        self.graph
    }

    fn create(&mut self, kind: OpKind, operands: &[ValueId], result_types: Vec<Type>, attrs: Attributes) -> OpId {
        let op = self.graph.insert_op(self.ip, kind, operands, result_types, attrs);
        if let InsertPoint::After(_) = self.ip {
            self.ip = InsertPoint::After(op);
        }
        self.journal.push(Change::Created(op));
        op
    }
}
