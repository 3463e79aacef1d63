//! Reference interpreter.
//!
//! Executes a function for one subgroup id against a shared [`Memory`]. It exists to
//! check rewrites semantically: distribution tests run every subgroup of a rewritten
//! kernel and compare memory with the workgroup-level program, and linearization tests
//! compare flattened vector code against the original.
//!
//! [`run_workgroup`] runs every subgroup in phases split at the barriers of the
//! function body, so each phase of every subgroup finishes before any subgroup starts
//! the next one. Local-scope allocations are shared by all subgroups. Floating-point
//! narrowing keeps `f64` precision.

use std::collections::HashMap;

use smallvec::SmallVec;
use snafu::OptionExt;
use subtile_dtype::{AddrSpace, ScalarDType};

use crate::attr::{CmpPredicate, CombiningKind, ConstValue, DYNAMIC_POSITION, names};
use crate::error::{EvalFailedSnafu, EvalUnboundSnafu, EvalUnsupportedSnafu, Result};
use crate::fold::eval_index;
use crate::graph::ValueDef;
use crate::types::{Shape, row_major_strides};
use crate::{Graph, OpId, OpKind, RegionId, Type, ValueId};

/// Dense row-major vector value.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorData {
    pub shape: Shape,
    pub data: Vec<ConstValue>,
}

/// Strided window into a [`Memory`] buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct MemRefData {
    pub buffer: usize,
    pub offset: usize,
    pub shape: Shape,
    pub strides: Shape,
}

impl MemRefData {
    fn address(&self, index: &[i64]) -> Option<usize> {
        let mut addr = self.offset as i64;
        for ((&i, &dim), &stride) in index.iter().zip(&self.shape).zip(&self.strides) {
            if i < 0 || i as usize >= dim {
                return None;
            }
            addr += i * stride as i64;
        }
        Some(addr as usize)
    }
}

/// Runtime tile descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    pub memref: MemRefData,
    pub offsets: SmallVec<[i64; 4]>,
    pub shape: [usize; 2],
    /// Row start offsets of a scatter tile (flat element offsets into the memref).
    pub indices: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    Scalar(ConstValue),
    Vector(VectorData),
    Tile(TileData),
    MemRef(MemRefData),
}

impl RtValue {
    pub fn vector(shape: impl Into<Shape>, data: Vec<ConstValue>) -> Self {
        Self::Vector(VectorData { shape: shape.into(), data })
    }

    pub fn as_scalar(&self) -> Option<ConstValue> {
        match self {
            Self::Scalar(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorData> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }
}

/// Buffers shared by every evaluated subgroup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Memory {
    buffers: Vec<Vec<ConstValue>>,
    /// Buffer of each local-scope `alloc`, created by the first subgroup reaching it.
    local: HashMap<OpId, usize>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, data: Vec<ConstValue>) -> usize {
        self.buffers.push(data);
        self.buffers.len() - 1
    }

    /// Row-major memref over a fresh buffer holding `data`.
    pub fn memref(&mut self, shape: &[usize], data: Vec<ConstValue>) -> RtValue {
        let buffer = self.alloc(data);
        RtValue::MemRef(MemRefData { buffer, offset: 0, shape: shape.into(), strides: row_major_strides(shape) })
    }

    pub fn buffer(&self, id: usize) -> &[ConstValue] {
        &self.buffers[id]
    }
}

/// Tile creation observed during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct TileEvent {
    pub op: OpId,
    pub offsets: SmallVec<[i64; 4]>,
}

pub struct Evaluator<'g, 'm> {
    graph: &'g Graph,
    memory: &'m mut Memory,
    env: HashMap<ValueId, RtValue>,
    subgroup_id: i64,
    tile_events: Vec<TileEvent>,
}

fn fail<T>(kind: OpKind, reason: impl Into<String>) -> Result<T> {
    EvalFailedSnafu { kind, reason: reason.into() }.fail()
}

impl<'g, 'm> Evaluator<'g, 'm> {
    pub fn new(graph: &'g Graph, memory: &'m mut Memory) -> Self {
        Self { graph, memory, env: HashMap::new(), subgroup_id: 0, tile_events: Vec::new() }
    }

    pub fn with_subgroup_id(mut self, id: i64) -> Self {
        self.subgroup_id = id;
        self
    }

    pub fn tile_events(&self) -> &[TileEvent] {
        &self.tile_events
    }

    pub fn bind(&mut self, value: ValueId, rt: RtValue) {
        self.env.insert(value, rt);
    }

    /// Run a `func` with `args` bound to its parameters; returns the returned values.
    pub fn run_func(&mut self, func: OpId, args: Vec<RtValue>) -> Result<Vec<RtValue>> {
        let region = self.graph.regions(func)[0];
        self.run_region(region, args)
    }

    /// Evaluate `region` with its arguments bound to `args`; returns the terminator operands.
    pub fn run_region(&mut self, region: RegionId, args: Vec<RtValue>) -> Result<Vec<RtValue>> {
        let graph = self.graph;
        self.bind_args(region, args);
        Ok(self.run_ops(graph.region(region).ops())?.unwrap_or_default())
    }

    fn bind_args(&mut self, region: RegionId, args: Vec<RtValue>) {
        for (&arg, rt) in self.graph.region(region).args().iter().zip(args) {
            self.env.insert(arg, rt);
        }
    }

    /// Execute `ops` in order; `Some` with the terminator operands once one is reached.
    fn run_ops(&mut self, ops: &[OpId]) -> Result<Option<Vec<RtValue>>> {
        for &op in ops {
            if self.graph.kind(op).is_terminator() {
                let values = self.graph.operands(op).iter().map(|v| self.get(*v).cloned()).collect::<Result<_>>()?;
                return Ok(Some(values));
            }
            self.exec(op)?;
        }
        Ok(None)
    }

    /// Evaluate a side-effect-free value on demand, evaluating its producers first.
    pub fn eval_value(&mut self, value: ValueId) -> Result<RtValue> {
        if let Some(rt) = self.env.get(&value) {
            return Ok(rt.clone());
        }
        let ValueDef::Result { op, .. } = self.graph.value(value).def else {
            return EvalUnboundSnafu { value }.fail();
        };
        let operands: Vec<ValueId> = self.graph.operands(op).to_vec();
        for v in operands {
            self.eval_value(v)?;
        }
        self.exec(op)?;
        self.get(value).cloned()
    }

    /// Evaluate an index-typed value to an integer.
    pub fn eval_index(&mut self, value: ValueId) -> Result<i64> {
        let rt = self.eval_value(value)?;
        rt.as_scalar().and_then(|c| c.as_i64()).context(EvalFailedSnafu { kind: OpKind::Constant, reason: "not an integer" })
    }

    pub fn get(&self, value: ValueId) -> Result<&RtValue> {
        self.env.get(&value).context(EvalUnboundSnafu { value })
    }

    fn scalar(&self, value: ValueId, kind: OpKind) -> Result<ConstValue> {
        match self.get(value)? {
            RtValue::Scalar(c) => Ok(*c),
            _ => fail(kind, format!("{value} is not a scalar")),
        }
    }

    fn int(&self, value: ValueId, kind: OpKind) -> Result<i64> {
        self.scalar(value, kind)?.as_i64().context(EvalFailedSnafu { kind, reason: "expected an integer" })
    }

    fn vector(&self, value: ValueId, kind: OpKind) -> Result<VectorData> {
        match self.get(value)? {
            RtValue::Vector(v) => Ok(v.clone()),
            // Scalars behave as 0-D vectors for elementwise ops.
            RtValue::Scalar(c) => Ok(VectorData { shape: Shape::new(), data: vec![*c] }),
            _ => fail(kind, format!("{value} is not a vector")),
        }
    }

    fn memref(&self, value: ValueId, kind: OpKind) -> Result<MemRefData> {
        match self.get(value)? {
            RtValue::MemRef(m) => Ok(m.clone()),
            _ => fail(kind, format!("{value} is not a memref")),
        }
    }

    fn tile(&self, value: ValueId, kind: OpKind) -> Result<TileData> {
        match self.get(value)? {
            RtValue::Tile(t) => Ok(t.clone()),
            _ => fail(kind, format!("{value} is not a tile")),
        }
    }

    fn set(&mut self, op: OpId, rt: RtValue) {
        let result = self.graph.result(op, 0);
        self.env.insert(result, rt);
    }

    fn result_type(&self, op: OpId) -> &'g Type {
        self.graph.value_type(self.graph.result(op, 0))
    }

    /// Wrap elementwise output in the result's shape (a scalar for scalar results).
    fn shaped(&self, op: OpId, data: Vec<ConstValue>) -> RtValue {
        match self.result_type(op) {
            Type::Scalar(_) => RtValue::Scalar(data[0]),
            ty => RtValue::vector(ty.shape().to_vec(), data),
        }
    }

    fn exec(&mut self, op: OpId) -> Result<()> {
        use OpKind::*;

        let graph = self.graph;
        let kind = graph.kind(op);
        let operands = graph.operands(op);
        let attrs = graph.attrs(op);

        match kind {
            Constant => {
                let dense = attrs.dense(names::VALUE).context(EvalFailedSnafu { kind, reason: "missing value" })?;
                let ty = self.result_type(op);
                let n = ty.shape().iter().product::<usize>().max(1);
                let data = dense.to_vec(n).into_iter().map(|c| c.cast(ty.elem())).collect();
                let rt = self.shaped(op, data);
                self.set(op, rt);
            }
            SubgroupId => self.set(op, RtValue::Scalar(ConstValue::Int(self.subgroup_id))),
            _ if kind.is_index_arith() => {
                let (a, b) = (self.int(operands[0], kind)?, self.int(operands[1], kind)?);
                let v = eval_index(kind, a, b).context(EvalFailedSnafu { kind, reason: "division by zero" })?;
                self.set(op, RtValue::Scalar(ConstValue::Int(v)));
            }
            _ if kind.is_elementwise() => {
                let elem = self.result_type(op).elem();
                let inputs: Vec<VectorData> = operands.iter().map(|v| self.vector(*v, kind)).collect::<Result<_>>()?;
                let n = inputs.iter().map(|v| v.data.len()).max().unwrap_or(1);
                let pick = |v: &VectorData, i: usize| if v.data.len() == 1 { v.data[0] } else { v.data[i] };
                let mut out = Vec::with_capacity(n);
                for i in 0..n {
                    let args: SmallVec<[ConstValue; 3]> = inputs.iter().map(|v| pick(v, i)).collect();
                    out.push(elementwise(kind, elem, &args, attrs.predicate())?);
                }
                let rt = self.shaped(op, out);
                self.set(op, rt);
            }
            ShapeCast | ConvertLayout => {
                let src = self.vector(operands[0], kind)?;
                let rt = RtValue::vector(self.result_type(op).shape().to_vec(), src.data);
                self.set(op, rt);
            }
            Splat => {
                let c = self.scalar(operands[0], kind)?;
                let ty = self.result_type(op);
                let rt = RtValue::vector(ty.shape().to_vec(), vec![c; ty.shape().iter().product()]);
                self.set(op, rt);
            }
            Broadcast => {
                let src = self.vector(operands[0], kind)?;
                let shape: Shape = self.result_type(op).shape().into();
                let rt = RtValue::Vector(broadcast(&src, &shape));
                self.set(op, rt);
            }
            Transpose => {
                let src = self.vector(operands[0], kind)?;
                let perm: Vec<usize> = attrs.ints(names::PERMUTATION).unwrap_or_default().iter().map(|p| *p as usize).collect();
                let rt = RtValue::Vector(transpose(&src, &perm));
                self.set(op, rt);
            }
            CreateMask => {
                let bounds: Vec<i64> = operands.iter().map(|v| self.int(*v, kind)).collect::<Result<_>>()?;
                let shape: Shape = self.result_type(op).shape().into();
                let data = for_each_index(&shape)
                    .map(|idx| ConstValue::Bool(idx.iter().zip(&bounds).all(|(i, b)| (*i as i64) < *b)))
                    .collect();
                self.set(op, RtValue::vector(shape, data));
            }
            Extract => {
                let src = self.vector(operands[0], kind)?;
                let position = self.positions(op, 1)?;
                let (start, len) = sub_range(&src.shape, &position);
                let data = src.data[start..start + len].to_vec();
                let rt = self.shaped(op, data);
                self.set(op, rt);
            }
            Insert => {
                let mut dest = self.vector(operands[1], kind)?;
                let value = self.vector(operands[0], kind)?;
                let position = self.positions(op, 2)?;
                let (start, len) = sub_range(&dest.shape, &position);
                if value.data.len() != len {
                    return fail(kind, "inserted value does not fit the position");
                }
                dest.data[start..start + len].copy_from_slice(&value.data);
                self.set(op, RtValue::Vector(dest));
            }
            ExtractElement => {
                let src = self.vector(operands[0], kind)?;
                let pos = self.int(operands[1], kind)? as usize;
                let c = *src.data.get(pos).context(EvalFailedSnafu { kind, reason: "position out of range" })?;
                self.set(op, RtValue::Scalar(c));
            }
            ExtractStridedSlice => {
                let src = self.vector(operands[0], kind)?;
                let offsets = attrs.ints(names::OFFSETS).unwrap_or_default();
                let strides = attrs.ints(names::STRIDES).unwrap_or_default();
                let shape: Shape = self.result_type(op).shape().into();
                let src_strides = row_major_strides(&src.shape);
                let data = for_each_index(&shape)
                    .map(|idx| {
                        let flat: usize = idx
                            .iter()
                            .enumerate()
                            .map(|(d, &i)| {
                                let off = offsets.get(d).copied().unwrap_or(0) as usize;
                                let stride = strides.get(d).copied().unwrap_or(1) as usize;
                                (off + i * stride) * src_strides[d]
                            })
                            .sum();
                        src.data[flat]
                    })
                    .collect();
                self.set(op, RtValue::vector(shape, data));
            }
            InsertStridedSlice => {
                let value = self.vector(operands[0], kind)?;
                let mut dest = self.vector(operands[1], kind)?;
                let offsets = attrs.ints(names::OFFSETS).unwrap_or_default();
                let strides = attrs.ints(names::STRIDES).unwrap_or_default();
                let lead = dest.shape.len() - value.shape.len();
                let dest_strides = row_major_strides(&dest.shape);
                for (n, idx) in for_each_index(&value.shape).enumerate() {
                    let mut flat = 0;
                    for d in 0..dest.shape.len() {
                        let off = offsets.get(d).copied().unwrap_or(0) as usize;
                        let i = if d < lead { 0 } else { idx[d - lead] * strides.get(d - lead).copied().unwrap_or(1) as usize };
                        flat += (off + i) * dest_strides[d];
                    }
                    dest.data[flat] = value.data[n];
                }
                self.set(op, RtValue::Vector(dest));
            }
            Shuffle => {
                let v1 = self.vector(operands[0], kind)?;
                let v2 = self.vector(operands[1], kind)?;
                let mask = attrs.ints(names::MASK).unwrap_or_default();
                let slice: usize = v1.shape.iter().skip(1).product();
                let rows1 = v1.data.len() / slice.max(1);
                let mut data = Vec::with_capacity(mask.len() * slice);
                for &m in mask {
                    let m = m as usize;
                    let (src, row) = if m < rows1 { (&v1, m) } else { (&v2, m - rows1) };
                    data.extend_from_slice(&src.data[row * slice..(row + 1) * slice]);
                }
                let rt = RtValue::vector(self.result_type(op).shape().to_vec(), data);
                self.set(op, rt);
            }
            MultiReduction => {
                let src = self.vector(operands[0], kind)?;
                let acc = self.vector(operands[1], kind)?;
                let dims: Vec<usize> =
                    attrs.ints(names::REDUCTION_DIMS).unwrap_or_default().iter().map(|d| *d as usize).collect();
                let combining = attrs.combining_kind().context(EvalFailedSnafu { kind, reason: "missing kind" })?;
                let kept: Vec<usize> = (0..src.shape.len()).filter(|d| !dims.contains(d)).collect();
                let acc_strides = row_major_strides(&acc.shape);
                let mut out = acc.data.clone();
                for (n, idx) in for_each_index(&src.shape).enumerate() {
                    let flat: usize = kept.iter().enumerate().map(|(k, &d)| idx[d] * acc_strides.get(k).copied().unwrap_or(1)).sum();
                    out[flat] = combine(combining, out[flat], src.data[n]);
                }
                let rt = self.shaped(op, out);
                self.set(op, rt);
            }
            Load => {
                let memref = self.memref(operands[0], kind)?;
                let base: Vec<i64> = operands[1..].iter().map(|v| self.int(*v, kind)).collect::<Result<_>>()?;
                let shape: Shape = self.result_type(op).shape().into();
                let mut data = Vec::with_capacity(shape.iter().product());
                for idx in for_each_index(&shape) {
                    let addr = self.vector_address(&memref, &base, &idx, kind)?;
                    data.push(self.memory.buffers[memref.buffer][addr]);
                }
                self.set(op, RtValue::vector(shape, data));
            }
            Store => {
                let value = self.vector(operands[0], kind)?;
                let memref = self.memref(operands[1], kind)?;
                let base: Vec<i64> = operands[2..].iter().map(|v| self.int(*v, kind)).collect::<Result<_>>()?;
                for (n, idx) in for_each_index(&value.shape).enumerate() {
                    let addr = self.vector_address(&memref, &base, &idx, kind)?;
                    self.memory.buffers[memref.buffer][addr] = value.data[n];
                }
            }
            Alloc => {
                let ty = self.result_type(op);
                let local = ty.as_memref().is_some_and(|m| m.scope == AddrSpace::Local);
                let buffer = match self.memory.local.get(&op) {
                    Some(&buffer) if local => buffer,
                    _ => {
                        let n = ty.shape().iter().product();
                        let buffer = self.memory.alloc(vec![ConstValue::zero(ty.elem()); n]);
                        if local {
                            self.memory.local.insert(op, buffer);
                        }
                        buffer
                    }
                };
                let shape: Shape = ty.shape().into();
                let strides = row_major_strides(&shape);
                self.set(op, RtValue::MemRef(MemRefData { buffer, offset: 0, shape, strides }));
            }
            View => {
                let src = self.memref(operands[0], kind)?;
                let shift = self.int(operands[1], kind)? as usize;
                let ty = self.result_type(op);
                let bytes = ty.elem().bytes().max(1);
                let shape: Shape = ty.shape().into();
                let strides = row_major_strides(&shape);
                self.set(op, RtValue::MemRef(MemRefData { buffer: src.buffer, offset: src.offset + shift / bytes, shape, strides }));
            }
            MemRefTranspose => {
                let src = self.memref(operands[0], kind)?;
                let perm: Vec<usize> = attrs.ints(names::PERMUTATION).unwrap_or_default().iter().map(|p| *p as usize).collect();
                let shape = perm.iter().map(|&p| src.shape[p]).collect();
                let strides = perm.iter().map(|&p| src.strides[p]).collect();
                self.set(op, RtValue::MemRef(MemRefData { buffer: src.buffer, offset: src.offset, shape, strides }));
            }
            InitTile => {
                let memref = self.memref(operands[0], kind)?;
                let ty = self.result_type(op).as_tile().context(EvalFailedSnafu { kind, reason: "result is not a tile" })?;
                let tile = if ty.scatter {
                    let indices = self.vector(operands[1], kind)?.data.iter().filter_map(|c| c.as_i64()).collect();
                    TileData { memref, offsets: SmallVec::new(), shape: ty.shape, indices: Some(indices) }
                } else {
                    let offsets: SmallVec<[i64; 4]> =
                        operands[1..].iter().map(|v| self.int(*v, kind)).collect::<Result<_>>()?;
                    TileData { memref, offsets, shape: ty.shape, indices: None }
                };
                self.tile_events.push(TileEvent { op, offsets: tile.offsets.clone() });
                self.set(op, RtValue::Tile(tile));
            }
            LoadTile => {
                let tile = self.tile(operands[0], kind)?;
                let data = self.tile_elements(&tile, kind)?.into_iter().map(|a| self.memory.buffers[tile.memref.buffer][a]).collect();
                let rt = RtValue::vector(tile.shape.to_vec(), data);
                self.set(op, rt);
            }
            StoreTile => {
                let value = self.vector(operands[0], kind)?;
                let tile = self.tile(operands[1], kind)?;
                for (n, addr) in self.tile_elements(&tile, kind)?.into_iter().enumerate() {
                    self.memory.buffers[tile.memref.buffer][addr] = value.data[n];
                }
            }
            LoadGather => {
                let tile = self.tile(operands[0], kind)?;
                let mask = self.vector(operands[1], kind)?;
                let elem = self.result_type(op).elem();
                let row_len = tile.shape[1];
                let data = self
                    .tile_elements(&tile, kind)?
                    .into_iter()
                    .enumerate()
                    .map(|(n, a)| {
                        let on = mask.data.get(n / row_len).is_none_or(|m| m.as_bool());
                        if on { self.memory.buffers[tile.memref.buffer][a] } else { ConstValue::zero(elem) }
                    })
                    .collect();
                let rt = RtValue::vector(self.result_type(op).shape().to_vec(), data);
                self.set(op, rt);
            }
            StoreScatter => {
                let value = self.vector(operands[0], kind)?;
                let tile = self.tile(operands[1], kind)?;
                let mask = self.vector(operands[2], kind)?;
                let row_len = tile.shape[1];
                for (n, addr) in self.tile_elements(&tile, kind)?.into_iter().enumerate() {
                    if mask.data.get(n / row_len).is_none_or(|m| m.as_bool()) {
                        self.memory.buffers[tile.memref.buffer][addr] = value.data[n];
                    }
                }
            }
            UpdateTileOffset => {
                let mut tile = self.tile(operands[0], kind)?;
                let (x, y) = (self.int(operands[1], kind)?, self.int(operands[2], kind)?);
                let n = tile.offsets.len();
                if n < 2 {
                    return fail(kind, "tile has fewer than two offsets");
                }
                tile.offsets[n - 2] += x;
                tile.offsets[n - 1] += y;
                self.set(op, RtValue::Tile(tile));
            }
            TileMma => {
                let a = self.vector(operands[0], kind)?;
                let b = self.vector(operands[1], kind)?;
                let shape: Shape = self.result_type(op).shape().into();
                let elem = self.result_type(op).elem();
                let (m, k, n) = (a.shape[0], a.shape[1], b.shape[1]);
                let mut out = match operands.get(2) {
                    Some(c) => self.vector(*c, kind)?.data,
                    None => vec![ConstValue::zero(elem); m * n],
                };
                for i in 0..m {
                    for j in 0..n {
                        let mut sum = out[i * n + j].as_f64();
                        for p in 0..k {
                            sum += a.data[i * k + p].as_f64() * b.data[p * n + j].as_f64();
                        }
                        out[i * n + j] = ConstValue::Float(sum).cast(elem);
                    }
                }
                self.set(op, RtValue::vector(shape, out));
            }
            PrefetchTile | Barrier => {}
            For => {
                let lb = self.int(operands[0], kind)?;
                let ub = self.int(operands[1], kind)?;
                let step = self.int(operands[2], kind)?;
                if step <= 0 {
                    return fail(kind, "non-positive step");
                }
                let mut carried: Vec<RtValue> = operands[3..].iter().map(|v| self.get(*v).cloned()).collect::<Result<_>>()?;
                let body = graph.regions(op)[0];
                let mut iv = lb;
                while iv < ub {
                    let mut args = vec![RtValue::Scalar(ConstValue::Int(iv))];
                    args.extend(carried);
                    carried = self.run_region(body, args)?;
                    iv += step;
                }
                for (&result, rt) in graph.results(op).iter().zip(carried) {
                    self.env.insert(result, rt);
                }
            }
            _ => return EvalUnsupportedSnafu { kind }.fail(),
        }
        Ok(())
    }

    /// Static position list of an extract/insert, with dynamic entries read from the
    /// operands starting at `first_dynamic`.
    fn positions(&self, op: OpId, first_dynamic: usize) -> Result<Vec<usize>> {
        let kind = self.graph.kind(op);
        let statics = self.graph.attrs(op).ints(names::POSITION).unwrap_or_default();
        let mut dynamic = self.graph.operands(op)[first_dynamic..].iter();
        statics
            .iter()
            .map(|&p| {
                if p == DYNAMIC_POSITION {
                    let v = dynamic.next().context(EvalFailedSnafu { kind, reason: "missing dynamic position" })?;
                    Ok(self.int(*v, kind)? as usize)
                } else {
                    Ok(p as usize)
                }
            })
            .collect()
    }

    /// Address of vector element `idx` for a load/store rooted at `base`; the vector's
    /// dimensions map onto the trailing memref dimensions.
    fn vector_address(&self, memref: &MemRefData, base: &[i64], idx: &[usize], kind: OpKind) -> Result<usize> {
        let lead = base.len() - idx.len();
        let full: Vec<i64> = base.iter().enumerate().map(|(d, &b)| if d < lead { b } else { b + idx[d - lead] as i64 }).collect();
        memref.address(&full).context(EvalFailedSnafu { kind, reason: format!("index {full:?} out of bounds") })
    }

    /// Buffer addresses of every tile element in row-major order.
    fn tile_elements(&self, tile: &TileData, kind: OpKind) -> Result<Vec<usize>> {
        let [rows, cols] = tile.shape;
        let mut out = Vec::with_capacity(rows * cols);
        if let Some(indices) = &tile.indices {
            for &start in indices.iter().take(rows) {
                for c in 0..cols {
                    out.push(tile.memref.offset + start as usize + c);
                }
            }
            return Ok(out);
        }
        let lead = tile.offsets.len().saturating_sub(2);
        for r in 0..rows {
            for c in 0..cols {
                let mut index: Vec<i64> = tile.offsets.to_vec();
                index[lead] += r as i64;
                index[lead + 1] += c as i64;
                let addr = tile
                    .memref
                    .address(&index)
                    .context(EvalFailedSnafu { kind, reason: format!("tile element {index:?} out of bounds") })?;
                out.push(addr);
            }
        }
        Ok(out)
    }
}

/// Run `func` for every subgroup of a workgroup over shared `memory`; returns each
/// subgroup's results.
///
/// The function body is cut after every top-level `barrier`, and all subgroups finish
/// one phase before any starts the next. Barriers inside loops do not split phases.
pub fn run_workgroup(
    graph: &Graph,
    func: OpId,
    subgroups: usize,
    memory: &mut Memory,
    args: Vec<RtValue>,
) -> Result<Vec<Vec<RtValue>>> {
    let body = graph.regions(func)[0];
    let bound: HashMap<ValueId, RtValue> = graph.region(body).args().iter().copied().zip(args).collect();
    let mut envs = vec![bound; subgroups];
    let mut results = vec![Vec::new(); subgroups];

    for phase in graph.region(body).ops().split_inclusive(|op| graph.kind(*op) == OpKind::Barrier) {
        for (id, env) in envs.iter_mut().enumerate() {
            let mut eval = Evaluator::new(graph, memory).with_subgroup_id(id as i64);
            eval.env = std::mem::take(env);
            let returned = eval.run_ops(phase)?;
            *env = eval.env;
            if let Some(values) = returned {
                results[id] = values;
            }
        }
        tracing::trace!(ops = phase.len(), subgroups, "workgroup phase complete");
    }
    Ok(results)
}

/// Row-major iteration over every index of `shape`.
pub fn for_each_index(shape: &[usize]) -> impl Iterator<Item = SmallVec<[usize; 4]>> + '_ {
    let total: usize = shape.iter().product();
    (0..total).map(move |mut flat| {
        let mut idx: SmallVec<[usize; 4]> = SmallVec::from_elem(0, shape.len());
        for d in (0..shape.len()).rev() {
            idx[d] = flat % shape[d];
            flat /= shape[d];
        }
        idx
    })
}

/// Flat start and length of the sub-vector at `position` (leading indices).
fn sub_range(shape: &[usize], position: &[usize]) -> (usize, usize) {
    let strides = row_major_strides(shape);
    let start = position.iter().zip(&strides).map(|(p, s)| p * s).sum();
    let len = shape[position.len()..].iter().product();
    (start, len)
}

fn broadcast(src: &VectorData, shape: &[usize]) -> VectorData {
    let lead = shape.len() - src.shape.len();
    let src_strides = row_major_strides(&src.shape);
    let data = for_each_index(shape)
        .map(|idx| {
            let flat: usize = (0..src.shape.len())
                .map(|d| if src.shape[d] == 1 { 0 } else { idx[d + lead] * src_strides[d] })
                .sum();
            src.data[flat]
        })
        .collect();
    VectorData { shape: shape.into(), data }
}

fn transpose(src: &VectorData, perm: &[usize]) -> VectorData {
    let shape: Shape = perm.iter().map(|&p| src.shape[p]).collect();
    let src_strides = row_major_strides(&src.shape);
    let data = for_each_index(&shape)
        .map(|idx| {
            let flat: usize = idx.iter().enumerate().map(|(d, &i)| i * src_strides[perm[d]]).sum();
            src.data[flat]
        })
        .collect();
    VectorData { shape, data }
}

fn combine(kind: CombiningKind, acc: ConstValue, x: ConstValue) -> ConstValue {
    use CombiningKind::*;
    match (kind, acc, x) {
        (Add, ConstValue::Float(a), _) => ConstValue::Float(a + x.as_f64()),
        (Mul, ConstValue::Float(a), _) => ConstValue::Float(a * x.as_f64()),
        (Add, _, _) => ConstValue::Int(acc.as_i64().unwrap_or(0).wrapping_add(x.as_i64().unwrap_or(0))),
        (Mul, _, _) => ConstValue::Int(acc.as_i64().unwrap_or(0).wrapping_mul(x.as_i64().unwrap_or(0))),
        (MaximumF, _, _) => ConstValue::Float(acc.as_f64().max(x.as_f64())),
        (MinimumF, _, _) => ConstValue::Float(acc.as_f64().min(x.as_f64())),
        (MaxSI, _, _) => ConstValue::Int(acc.as_i64().unwrap_or(i64::MIN).max(x.as_i64().unwrap_or(i64::MIN))),
        (MinSI, _, _) => ConstValue::Int(acc.as_i64().unwrap_or(i64::MAX).min(x.as_i64().unwrap_or(i64::MAX))),
        (And, _, _) => ConstValue::Bool(acc.as_bool() && x.as_bool()),
        (Or, _, _) => ConstValue::Bool(acc.as_bool() || x.as_bool()),
    }
}

fn elementwise(kind: OpKind, elem: ScalarDType, args: &[ConstValue], pred: Option<CmpPredicate>) -> Result<ConstValue> {
    use OpKind::*;

    let f = |i: usize| args[i].as_f64();
    let int = |i: usize| args[i].as_i64().context(EvalFailedSnafu { kind, reason: "expected an integer operand" });

    let value = match kind {
        AddF => ConstValue::Float(f(0) + f(1)),
        SubF => ConstValue::Float(f(0) - f(1)),
        MulF => ConstValue::Float(f(0) * f(1)),
        DivF => ConstValue::Float(f(0) / f(1)),
        MaximumF => ConstValue::Float(if f(0).is_nan() || f(1).is_nan() { f64::NAN } else { f(0).max(f(1)) }),
        MinimumF => ConstValue::Float(if f(0).is_nan() || f(1).is_nan() { f64::NAN } else { f(0).min(f(1)) }),
        Exp => ConstValue::Float(f(0).exp()),
        Sqrt => ConstValue::Float(f(0).sqrt()),
        Log => ConstValue::Float(f(0).ln()),
        Tanh => ConstValue::Float(f(0).tanh()),
        NegF => ConstValue::Float(-f(0)),
        FPowI => ConstValue::Float(f(0).powi(int(1)? as i32)),
        AddI => ConstValue::Int(int(0)?.wrapping_add(int(1)?)).cast(elem),
        SubI => ConstValue::Int(int(0)?.wrapping_sub(int(1)?)).cast(elem),
        MulI => ConstValue::Int(int(0)?.wrapping_mul(int(1)?)).cast(elem),
        AndI => ConstValue::Int(int(0)? & int(1)?).cast(elem),
        OrI => ConstValue::Int(int(0)? | int(1)?).cast(elem),
        XOrI => ConstValue::Int(int(0)? ^ int(1)?).cast(elem),
        Select => {
            if args[0].as_bool() {
                args[1]
            } else {
                args[2]
            }
        }
        CmpI | CmpF => {
            let pred = pred.context(EvalFailedSnafu { kind, reason: "missing predicate" })?;
            ConstValue::Bool(compare(pred, args[0], args[1]))
        }
        ArithBitcast => return EvalUnsupportedSnafu { kind }.fail(),
        _ if kind.is_cast() => args[0].cast(elem),
        _ => return EvalUnsupportedSnafu { kind }.fail(),
    };
    Ok(match value {
        ConstValue::Float(_) => value.cast(elem),
        other => other,
    })
}

fn compare(pred: CmpPredicate, a: ConstValue, b: ConstValue) -> bool {
    use CmpPredicate::*;
    let (fa, fb) = (a.as_f64(), b.as_f64());
    let (ia, ib) = (a.as_i64().unwrap_or(0), b.as_i64().unwrap_or(0));
    match pred {
        Eq => ia == ib,
        Ne => ia != ib,
        Slt => ia < ib,
        Sle => ia <= ib,
        Sgt => ia > ib,
        Sge => ia >= ib,
        Ult => (ia as u64) < (ib as u64),
        Ule => (ia as u64) <= (ib as u64),
        Ugt => (ia as u64) > (ib as u64),
        Uge => (ia as u64) >= (ib as u64),
        Oeq => fa == fb,
        One => !fa.is_nan() && !fb.is_nan() && fa != fb,
        Olt => fa < fb,
        Ole => fa <= fb,
        Ogt => fa > fb,
        Oge => fa >= fb,
    }
}
