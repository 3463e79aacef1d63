//! Arena-backed IR graph.
//!
//! Operations, values and regions live in three arenas indexed by dense ids. Erasing an
//! operation unlinks it from its region and marks it dead; arena slots are never reused,
//! so ids held by side tables (replacement maps, layout maps) stay unambiguous for the
//! lifetime of the graph.

use smallvec::SmallVec;

use crate::attr::{Attribute, Attributes, ConstValue, DenseElements, names};
use crate::op::OpKind;
use crate::types::Type;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Debug, derive_more::Display)]
#[debug("op{_0}")]
#[display("op{_0}")]
pub struct OpId(u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Debug, derive_more::Display)]
#[debug("%{_0}")]
#[display("%{_0}")]
pub struct ValueId(u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Debug, derive_more::Display)]
#[debug("^bb{_0}")]
#[display("^bb{_0}")]
pub struct RegionId(u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl RegionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    Result { op: OpId, index: usize },
    /// Block argument; for loop bodies, argument 0 is the induction variable.
    Argument { region: RegionId, index: usize },
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
}

#[derive(Debug, Clone)]
pub struct OpData {
    pub kind: OpKind,
    pub operands: SmallVec<[ValueId; 4]>,
    pub results: SmallVec<[ValueId; 2]>,
    pub regions: SmallVec<[RegionId; 1]>,
    pub attrs: Attributes,
    parent: Option<RegionId>,
    alive: bool,
}

/// Single-block region.
#[derive(Debug, Clone, Default)]
pub struct RegionData {
    args: SmallVec<[ValueId; 4]>,
    ops: Vec<OpId>,
    parent: Option<OpId>,
}

impl RegionData {
    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    pub fn ops(&self) -> &[OpId] {
        &self.ops
    }

    /// Owning operation; `None` for the top-level region.
    pub fn parent(&self) -> Option<OpId> {
        self.parent
    }
}

/// Position at which new operations are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    Before(OpId),
    After(OpId),
    Start(RegionId),
    End(RegionId),
}

#[derive(Debug, Clone)]
pub struct Graph {
    ops: Vec<OpData>,
    values: Vec<ValueData>,
    regions: Vec<RegionData>,
    root: RegionId,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self { ops: Vec::new(), values: Vec::new(), regions: vec![RegionData::default()], root: RegionId(0) }
    }

    /// Top-level region.
    pub fn root(&self) -> RegionId {
        self.root
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn op(&self, op: OpId) -> &OpData {
        &self.ops[op.index()]
    }

    pub fn value(&self, value: ValueId) -> &ValueData {
        &self.values[value.index()]
    }

    pub fn region(&self, region: RegionId) -> &RegionData {
        &self.regions[region.index()]
    }

    pub fn kind(&self, op: OpId) -> OpKind {
        self.op(op).kind
    }

    pub fn operands(&self, op: OpId) -> &[ValueId] {
        &self.op(op).operands
    }

    pub fn operand(&self, op: OpId, index: usize) -> ValueId {
        self.op(op).operands[index]
    }

    pub fn results(&self, op: OpId) -> &[ValueId] {
        &self.op(op).results
    }

    pub fn result(&self, op: OpId, index: usize) -> ValueId {
        self.op(op).results[index]
    }

    pub fn attrs(&self, op: OpId) -> &Attributes {
        &self.op(op).attrs
    }

    pub fn regions(&self, op: OpId) -> &[RegionId] {
        &self.op(op).regions
    }

    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.value(value).ty
    }

    pub fn is_alive(&self, op: OpId) -> bool {
        self.op(op).alive
    }

    /// Region that directly contains `op`.
    pub fn parent_region(&self, op: OpId) -> Option<RegionId> {
        self.op(op).parent
    }

    /// Operation that owns `region`.
    pub fn parent_op(&self, region: RegionId) -> Option<OpId> {
        self.region(region).parent
    }

    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.value(value).def {
            ValueDef::Result { op, .. } => Some(op),
            ValueDef::Argument { .. } => None,
        }
    }

    /// Number of operations ever created (dead ones included).
    pub fn op_capacity(&self) -> usize {
        self.ops.len()
    }

    /// Scalar constant carried by `value`, if it is produced by a splat `constant`.
    pub fn const_value(&self, value: ValueId) -> Option<ConstValue> {
        let op = self.defining_op(value)?;
        if self.kind(op) != OpKind::Constant || !self.value_type(value).is_scalar() {
            return None;
        }
        self.attrs(op).dense(names::VALUE)?.get(0)
    }

    pub fn const_int(&self, value: ValueId) -> Option<i64> {
        self.const_value(value)?.as_i64()
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Live operations of the whole graph in pre-order (an op before the ops nested in it).
    pub fn walk(&self) -> Vec<OpId> {
        self.walk_region(self.root)
    }

    /// Live operations nested in `region`, pre-order.
    pub fn walk_region(&self, region: RegionId) -> Vec<OpId> {
        let mut order = Vec::new();
        let mut stack: Vec<OpId> = self.region(region).ops.iter().rev().copied().collect();
        while let Some(op) = stack.pop() {
            if !self.is_alive(op) {
                continue;
            }
            order.push(op);
            for &r in self.regions(op).iter().rev() {
                stack.extend(self.region(r).ops.iter().rev().copied());
            }
        }
        order
    }

    /// `(user, operand_index)` for every live use of `value`.
    pub fn uses(&self, value: ValueId) -> Vec<(OpId, usize)> {
        self.walk()
            .into_iter()
            .flat_map(|op| {
                self.operands(op).iter().enumerate().filter(|(_, v)| **v == value).map(move |(i, _)| (op, i))
            })
            .collect()
    }

    /// Distinct live users of `value`, in walk order.
    pub fn users(&self, value: ValueId) -> Vec<OpId> {
        let mut users: Vec<OpId> = self.uses(value).into_iter().map(|(op, _)| op).collect();
        users.dedup();
        users
    }

    pub fn has_one_use(&self, value: ValueId) -> bool {
        self.uses(value).len() == 1
    }

    /// True if `op` is `ancestor` or nested (at any depth) inside it.
    pub fn is_nested_in(&self, op: OpId, ancestor: OpId) -> bool {
        let mut current = Some(op);
        while let Some(o) = current {
            if o == ancestor {
                return true;
            }
            current = self.parent_region(o).and_then(|r| self.parent_op(r));
        }
        false
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Create an operation with fresh result values at `ip`.
    pub fn insert_op(
        &mut self,
        ip: InsertPoint,
        kind: OpKind,
        operands: &[ValueId],
        result_types: Vec<Type>,
        attrs: Attributes,
    ) -> OpId {
        let id = OpId(self.ops.len() as u32);
        let results = result_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| self.new_value(ty, ValueDef::Result { op: id, index }))
            .collect();
        self.ops.push(OpData {
            kind,
            operands: operands.iter().copied().collect(),
            results,
            regions: SmallVec::new(),
            attrs,
            parent: None,
            alive: true,
        });
        self.link(id, ip);
        id
    }

    fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { ty, def });
        id
    }

    fn link(&mut self, op: OpId, ip: InsertPoint) {
        let (region, pos) = match ip {
            InsertPoint::Before(anchor) => {
                let region = self.parent_region(anchor).expect("insertion anchor must be linked");
                (region, self.position(region, anchor))
            }
            InsertPoint::After(anchor) => {
                let region = self.parent_region(anchor).expect("insertion anchor must be linked");
                (region, self.position(region, anchor) + 1)
            }
            InsertPoint::Start(region) => (region, 0),
            InsertPoint::End(region) => (region, self.region(region).ops.len()),
        };
        self.regions[region.index()].ops.insert(pos, op);
        self.ops[op.index()].parent = Some(region);
    }

    fn position(&self, region: RegionId, op: OpId) -> usize {
        self.region(region).ops.iter().position(|o| *o == op).expect("op must be linked into its parent region")
    }

    /// Attach a new empty region to `op`.
    pub fn add_region(&mut self, op: OpId) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(RegionData { parent: Some(op), ..Default::default() });
        self.ops[op.index()].regions.push(id);
        id
    }

    pub fn add_region_arg(&mut self, region: RegionId, ty: Type) -> ValueId {
        let index = self.region(region).args.len();
        let value = self.new_value(ty, ValueDef::Argument { region, index });
        self.regions[region.index()].args.push(value);
        value
    }

    /// Replace the argument list of `region`, re-indexing argument definitions.
    pub(crate) fn set_region_args(&mut self, region: RegionId, args: SmallVec<[ValueId; 4]>) {
        for (index, &arg) in args.iter().enumerate() {
            self.values[arg.index()].def = ValueDef::Argument { region, index };
        }
        self.regions[region.index()].args = args;
    }

    /// Fresh value typed `ty` defined as argument `index` of `region`, not yet linked.
    pub(crate) fn new_region_arg(&mut self, region: RegionId, index: usize, ty: Type) -> ValueId {
        self.new_value(ty, ValueDef::Argument { region, index })
    }

    /// Move `region` (with its contents) from its current owner to the end of `to`'s region list.
    pub fn move_region(&mut self, region: RegionId, to: OpId) {
        if let Some(from) = self.parent_op(region) {
            self.ops[from.index()].regions.retain(|r| *r != region);
        }
        self.ops[to.index()].regions.push(region);
        self.regions[region.index()].parent = Some(to);
    }

    pub fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) {
        self.ops[op.index()].operands[index] = value;
    }

    pub fn set_attr(&mut self, op: OpId, name: &'static str, attr: Attribute) {
        self.ops[op.index()].attrs.set(name, attr);
    }

    pub fn remove_attr(&mut self, op: OpId, name: &str) -> Option<Attribute> {
        self.ops[op.index()].attrs.remove(name)
    }

    pub(crate) fn set_value_type(&mut self, value: ValueId, ty: Type) {
        self.values[value.index()].ty = ty;
    }

    /// Point every live use of `from` at `to`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        for (op, index) in self.uses(from) {
            self.set_operand(op, index, to);
        }
    }

    /// Unlink `op` from its region and mark it (and everything nested in it) dead.
    pub fn erase_op(&mut self, op: OpId) {
        if let Some(region) = self.parent_region(op) {
            self.regions[region.index()].ops.retain(|o| *o != op);
        }
        self.ops[op.index()].parent = None;
        let mut stack = vec![op];
        while let Some(o) = stack.pop() {
            self.ops[o.index()].alive = false;
            for &r in &self.ops[o.index()].regions {
                stack.extend(self.regions[r.index()].ops.iter().copied());
            }
        }
    }

    /// Operations of `region` with the given kind (non-recursive).
    pub fn region_ops_of(&self, region: RegionId, kind: OpKind) -> Vec<OpId> {
        self.region(region).ops.iter().copied().filter(|op| self.kind(*op) == kind).collect()
    }

    /// Attribute dictionary of a splat `constant`.
    pub fn splat_attr(value: ConstValue) -> Attributes {
        Attributes::new().with(names::VALUE, Attribute::Dense(DenseElements::Splat(value)))
    }
}
