//! Operation construction.
//!
//! [`Builder`] is implemented by [`GraphBuilder`] (direct graph construction) and by the
//! conversion [`Rewriter`](crate::conversion::Rewriter), so rewrite rules and test programs
//! share the same typed constructors. Index arithmetic folds at creation time.

use smallvec::SmallVec;
use snafu::OptionExt;
use subtile_dtype::ScalarDType;

use crate::attr::{Attribute, Attributes, CmpPredicate, CombiningKind, ConstValue, DenseElements, ints, names};
use crate::error::{MatchResult, ShapeMismatchSnafu};
use crate::fold::{Folded, fold_index_binary};
use crate::graph::{Graph, InsertPoint, OpId, RegionId, ValueId};
use crate::op::OpKind;
use crate::types::{MemRefType, Shape, Type, VectorType};

pub trait Builder {
    fn graph(&self) -> &Graph;

    /// Create an operation at the builder's insertion point.
    fn create(&mut self, kind: OpKind, operands: &[ValueId], result_types: Vec<Type>, attrs: Attributes) -> OpId;

    fn value_type(&self, value: ValueId) -> &Type {
        self.graph().value_type(value)
    }

    /// The vector type of `value`, or a shape mismatch naming it as `what`.
    fn vector_operand(&self, value: ValueId, what: &str) -> MatchResult<VectorType> {
        self.value_type(value)
            .as_vector()
            .cloned()
            .context(ShapeMismatchSnafu { reason: format!("{what} {value} is not a vector") })
    }

    /// Create a single-result operation and return its result.
    fn create_value(&mut self, kind: OpKind, operands: &[ValueId], ty: Type, attrs: Attributes) -> ValueId {
        let op = self.create(kind, operands, vec![ty], attrs);
        self.graph().result(op, 0)
    }

    // =========================================================================
    // Constants and index arithmetic
    // =========================================================================

    fn constant(&mut self, ty: Type, value: DenseElements) -> ValueId {
        self.create_value(OpKind::Constant, &[], ty, Attributes::new().with(names::VALUE, Attribute::Dense(value)))
    }

    fn scalar_const(&mut self, elem: ScalarDType, value: ConstValue) -> ValueId {
        self.constant(Type::Scalar(elem), DenseElements::Splat(value.cast(elem)))
    }

    fn index_const(&mut self, value: i64) -> ValueId {
        self.scalar_const(ScalarDType::Index, ConstValue::Int(value))
    }

    fn i32_const(&mut self, value: i64) -> ValueId {
        self.scalar_const(ScalarDType::Int32, ConstValue::Int(value))
    }

    fn zero_vector(&mut self, ty: VectorType) -> ValueId {
        let zero = ConstValue::zero(ty.elem);
        self.constant(Type::Vector(ty), DenseElements::Splat(zero))
    }

    /// Create `kind(lhs, rhs)` on index values, folding when possible.
    fn index_binary(&mut self, kind: OpKind, lhs: ValueId, rhs: ValueId) -> ValueId {
        match fold_index_binary(self.graph(), kind, lhs, rhs) {
            Some(Folded::Const(c)) => self.index_const(c),
            Some(Folded::Value(v)) => v,
            None => self.create_value(kind, &[lhs, rhs], Type::index(), Attributes::new()),
        }
    }

    fn index_add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.index_binary(OpKind::IndexAdd, lhs, rhs)
    }

    fn index_mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.index_binary(OpKind::IndexMul, lhs, rhs)
    }

    fn index_divu(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.index_binary(OpKind::IndexDivU, lhs, rhs)
    }

    fn index_remu(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.index_binary(OpKind::IndexRemU, lhs, rhs)
    }

    fn subgroup_id(&mut self) -> ValueId {
        self.create_value(OpKind::SubgroupId, &[], Type::index(), Attributes::new())
    }

    // =========================================================================
    // Elementwise
    // =========================================================================

    /// Same-type binary op; the result type is the type of `lhs`.
    fn binary(&mut self, kind: OpKind, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.value_type(lhs).clone();
        self.create_value(kind, &[lhs, rhs], ty, Attributes::new())
    }

    fn unary(&mut self, kind: OpKind, operand: ValueId) -> ValueId {
        let ty = self.value_type(operand).clone();
        self.create_value(kind, &[operand], ty, Attributes::new())
    }

    fn cast(&mut self, kind: OpKind, operand: ValueId, ty: Type) -> ValueId {
        self.create_value(kind, &[operand], ty, Attributes::new())
    }

    /// Comparison; result has the operand's shape with `i1` elements.
    fn cmp(&mut self, kind: OpKind, predicate: CmpPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.value_type(lhs).with_elem(ScalarDType::Bool);
        let attrs = Attributes::new().with(names::PREDICATE, Attribute::Predicate(predicate));
        self.create_value(kind, &[lhs, rhs], ty, attrs)
    }

    fn select(&mut self, cond: ValueId, on_true: ValueId, on_false: ValueId) -> ValueId {
        let ty = self.value_type(on_true).clone();
        self.create_value(OpKind::Select, &[cond, on_true, on_false], ty, Attributes::new())
    }

    fn fpowi(&mut self, base: ValueId, exponent: ValueId) -> ValueId {
        let ty = self.value_type(base).clone();
        self.create_value(OpKind::FPowI, &[base, exponent], ty, Attributes::new())
    }

    // =========================================================================
    // Vector
    // =========================================================================

    fn shape_cast(&mut self, source: ValueId, ty: Type) -> ValueId {
        self.create_value(OpKind::ShapeCast, &[source], ty, Attributes::new())
    }

    fn transpose(&mut self, source: ValueId, permutation: &[usize], ty: Type) -> ValueId {
        self.create_value(OpKind::Transpose, &[source], ty, Attributes::new().with(names::PERMUTATION, ints(permutation)))
    }

    fn broadcast(&mut self, source: ValueId, ty: Type) -> ValueId {
        self.create_value(OpKind::Broadcast, &[source], ty, Attributes::new())
    }

    fn splat(&mut self, source: ValueId, ty: Type) -> ValueId {
        self.create_value(OpKind::Splat, &[source], ty, Attributes::new())
    }

    fn vector_bitcast(&mut self, source: ValueId, ty: Type) -> ValueId {
        self.create_value(OpKind::BitCast, &[source], ty, Attributes::new())
    }

    fn create_mask(&mut self, bounds: &[ValueId], ty: Type) -> ValueId {
        self.create_value(OpKind::CreateMask, bounds, ty, Attributes::new())
    }

    fn multi_reduction(&mut self, kind: CombiningKind, source: ValueId, acc: ValueId, dims: &[usize]) -> ValueId {
        let ty = self.value_type(acc).clone();
        let attrs = Attributes::new()
            .with(names::KIND, Attribute::Combining(kind))
            .with(names::REDUCTION_DIMS, ints(dims));
        self.create_value(OpKind::MultiReduction, &[source, acc], ty, attrs)
    }

    /// Static-position extract; a full-rank position yields a scalar. Fails unless
    /// `source` is a vector.
    fn extract(&mut self, source: ValueId, position: &[i64]) -> MatchResult<ValueId> {
        let src = self.vector_operand(source, "extract source")?;
        let ty = if position.len() == src.rank() {
            Type::Scalar(src.elem)
        } else {
            Type::Vector(src.reshaped(src.shape[position.len()..].to_vec()))
        };
        Ok(self.create_value(OpKind::Extract, &[source], ty, Attributes::new().with(names::POSITION, ints(position))))
    }

    fn insert(&mut self, value: ValueId, dest: ValueId, position: &[i64]) -> ValueId {
        let ty = self.value_type(dest).clone();
        self.create_value(OpKind::Insert, &[value, dest], ty, Attributes::new().with(names::POSITION, ints(position)))
    }

    fn extract_element(&mut self, source: ValueId, position: ValueId) -> ValueId {
        let elem = self.value_type(source).elem();
        self.create_value(OpKind::ExtractElement, &[source, position], Type::Scalar(elem), Attributes::new())
    }

    fn extract_strided_slice(
        &mut self,
        source: ValueId,
        offsets: &[i64],
        sizes: &[i64],
        strides: &[i64],
    ) -> MatchResult<ValueId> {
        let src = self.vector_operand(source, "strided slice source")?;
        let mut shape: Shape = sizes.iter().map(|s| *s as usize).collect();
        shape.extend(src.shape[sizes.len()..].iter().copied());
        let ty = Type::Vector(src.reshaped(shape));
        let attrs = Attributes::new()
            .with(names::OFFSETS, ints(offsets))
            .with(names::SIZES, ints(sizes))
            .with(names::STRIDES, ints(strides));
        Ok(self.create_value(OpKind::ExtractStridedSlice, &[source], ty, attrs))
    }

    fn insert_strided_slice(&mut self, value: ValueId, dest: ValueId, offsets: &[i64], strides: &[i64]) -> ValueId {
        let ty = self.value_type(dest).clone();
        let attrs = Attributes::new().with(names::OFFSETS, ints(offsets)).with(names::STRIDES, ints(strides));
        self.create_value(OpKind::InsertStridedSlice, &[value, dest], ty, attrs)
    }

    /// Shuffle; each mask entry selects a leading-dimension slice of `v1 ++ v2`.
    fn shuffle(&mut self, v1: ValueId, v2: ValueId, mask: &[i64]) -> MatchResult<ValueId> {
        let src = self.vector_operand(v1, "shuffle operand")?;
        let mut shape: Shape = SmallVec::from_elem(mask.len(), 1);
        shape.extend(src.shape.iter().skip(1).copied());
        let ty = Type::Vector(src.reshaped(shape));
        Ok(self.create_value(OpKind::Shuffle, &[v1, v2], ty, Attributes::new().with(names::MASK, ints(mask))))
    }

    fn load(&mut self, memref: ValueId, indices: &[ValueId], ty: Type) -> ValueId {
        let operands: SmallVec<[ValueId; 4]> = std::iter::once(memref).chain(indices.iter().copied()).collect();
        self.create_value(OpKind::Load, &operands, ty, Attributes::new())
    }

    fn store(&mut self, value: ValueId, memref: ValueId, indices: &[ValueId]) -> OpId {
        let operands: SmallVec<[ValueId; 4]> = [value, memref].into_iter().chain(indices.iter().copied()).collect();
        self.create(OpKind::Store, &operands, vec![], Attributes::new())
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    /// Tile over `source` at `offsets` (one index value per memref dimension).
    fn init_tile(&mut self, source: ValueId, offsets: &[ValueId], ty: Type) -> ValueId {
        let operands: SmallVec<[ValueId; 4]> = std::iter::once(source).chain(offsets.iter().copied()).collect();
        self.create_value(OpKind::InitTile, &operands, ty, Attributes::new())
    }

    fn load_tile(&mut self, tile: ValueId, ty: Type, attrs: Attributes) -> ValueId {
        self.create_value(OpKind::LoadTile, &[tile], ty, attrs)
    }

    fn store_tile(&mut self, value: ValueId, tile: ValueId, attrs: Attributes) -> OpId {
        self.create(OpKind::StoreTile, &[value, tile], vec![], attrs)
    }

    fn load_gather(&mut self, tile: ValueId, mask: ValueId, ty: Type, attrs: Attributes) -> ValueId {
        self.create_value(OpKind::LoadGather, &[tile, mask], ty, attrs)
    }

    fn store_scatter(&mut self, value: ValueId, tile: ValueId, mask: ValueId, attrs: Attributes) -> OpId {
        self.create(OpKind::StoreScatter, &[value, tile, mask], vec![], attrs)
    }

    fn tile_mma(&mut self, a: ValueId, b: ValueId, c: Option<ValueId>, ty: Type) -> ValueId {
        let operands: SmallVec<[ValueId; 4]> = [a, b].into_iter().chain(c).collect();
        self.create_value(OpKind::TileMma, &operands, ty, Attributes::new())
    }

    fn prefetch_tile(&mut self, tile: ValueId, attrs: Attributes) -> OpId {
        self.create(OpKind::PrefetchTile, &[tile], vec![], attrs)
    }

    fn update_tile_offset(&mut self, tile: ValueId, x: ValueId, y: ValueId) -> ValueId {
        let ty = self.value_type(tile).clone();
        self.create_value(OpKind::UpdateTileOffset, &[tile, x, y], ty, Attributes::new())
    }

    fn convert_layout(&mut self, source: ValueId, ty: Type) -> ValueId {
        self.create_value(OpKind::ConvertLayout, &[source], ty, Attributes::new())
    }

    // =========================================================================
    // Memory and synchronization
    // =========================================================================

    fn alloc(&mut self, ty: MemRefType) -> ValueId {
        self.create_value(OpKind::Alloc, &[], Type::MemRef(ty), Attributes::new())
    }

    /// Reinterpret `buffer` at byte offset `shift` as `ty`.
    fn view(&mut self, buffer: ValueId, shift: ValueId, ty: MemRefType) -> ValueId {
        self.create_value(OpKind::View, &[buffer, shift], Type::MemRef(ty), Attributes::new())
    }

    fn memref_transpose(&mut self, source: ValueId, permutation: &[usize]) -> MatchResult<ValueId> {
        let src = self
            .value_type(source)
            .as_memref()
            .cloned()
            .context(ShapeMismatchSnafu { reason: format!("memref_transpose source {source} is not a memref") })?;
        let ty = Type::MemRef(src.permuted(permutation));
        let attrs = Attributes::new().with(names::PERMUTATION, ints(permutation));
        Ok(self.create_value(OpKind::MemRefTranspose, &[source], ty, attrs))
    }

    fn barrier(&mut self) -> OpId {
        self.create(OpKind::Barrier, &[], vec![], Attributes::new())
    }

    fn yield_values(&mut self, values: &[ValueId]) -> OpId {
        self.create(OpKind::Yield, values, vec![], Attributes::new())
    }

    fn return_values(&mut self, values: &[ValueId]) -> OpId {
        self.create(OpKind::Return, values, vec![], Attributes::new())
    }
}

/// Builder that inserts directly into a [`Graph`].
pub struct GraphBuilder<'g> {
    graph: &'g mut Graph,
    ip: InsertPoint,
}

impl<'g> GraphBuilder<'g> {
    /// Builder appending to the top-level region.
    pub fn new(graph: &'g mut Graph) -> Self {
        let ip = InsertPoint::End(graph.root());
        Self { graph, ip }
    }

    pub fn at(graph: &'g mut Graph, ip: InsertPoint) -> Self {
        Self { graph, ip }
    }

    pub fn set_insertion_point(&mut self, ip: InsertPoint) {
        self.ip = ip;
    }

    pub fn insertion_point(&self) -> InsertPoint {
        self.ip
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        self.graph
    }

    /// Function with parameters typed `arg_types`; `body` returns the returned values.
    pub fn func(
        &mut self,
        name: &str,
        arg_types: Vec<Type>,
        body: impl FnOnce(&mut Self, &[ValueId]) -> Vec<ValueId>,
    ) -> OpId {
        let attrs = Attributes::new().with(names::SYM_NAME, Attribute::Str(name.to_string()));
        let func = self.create(OpKind::Func, &[], vec![], attrs);
        let region = self.graph.add_region(func);
        let args: Vec<ValueId> = arg_types.into_iter().map(|ty| self.graph.add_region_arg(region, ty)).collect();
        self.nested(region, func, |b| {
            let returned = body(b, &args);
            b.return_values(&returned);
        });
        func
    }

    /// Counted loop carrying `inits`; `body` receives the induction variable and the
    /// iteration arguments and returns the yielded values.
    pub fn for_loop(
        &mut self,
        lb: ValueId,
        ub: ValueId,
        step: ValueId,
        inits: &[ValueId],
        body: impl FnOnce(&mut Self, ValueId, &[ValueId]) -> Vec<ValueId>,
    ) -> OpId {
        let operands: Vec<ValueId> = [lb, ub, step].into_iter().chain(inits.iter().copied()).collect();
        let result_types: Vec<Type> = inits.iter().map(|v| self.graph.value_type(*v).clone()).collect();
        let for_op = self.create(OpKind::For, &operands, result_types.clone(), Attributes::new());
        let region = self.graph.add_region(for_op);
        let iv = self.graph.add_region_arg(region, Type::index());
        let iter_args: Vec<ValueId> =
            result_types.into_iter().map(|ty| self.graph.add_region_arg(region, ty)).collect();
        self.nested(region, for_op, |b| {
            let yielded = body(b, iv, &iter_args);
            b.yield_values(&yielded);
        });
        for_op
    }

    fn nested(&mut self, region: RegionId, owner: OpId, build: impl FnOnce(&mut Self)) {
        let saved = self.ip;
        self.ip = InsertPoint::End(region);
        build(self);
        self.ip = match saved {
            InsertPoint::After(_) => InsertPoint::After(owner),
            other => other,
        };
    }
}

impl Builder for GraphBuilder<'_> {
    fn graph(&self) -> &Graph {
        self.graph
    }

    fn create(&mut self, kind: OpKind, operands: &[ValueId], result_types: Vec<Type>, attrs: Attributes) -> OpId {
        let op = self.graph.insert_op(self.ip, kind, operands, result_types, attrs);
        if let InsertPoint::After(_) = self.ip {
            self.ip = InsertPoint::After(op);
        }
        op
    }
}
