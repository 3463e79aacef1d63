//! Shaped and scalar value types.
//!
//! A [`Type`] is an element kind plus (for shaped types) a static shape. Vector and tile
//! types may additionally carry a [`DistributionAttr`] describing how a workgroup-level
//! value is split across the subgroups of the workgroup.

use std::fmt;

use smallvec::SmallVec;
use subtile_dtype::{AddrSpace, ScalarDType};

/// Static shape of a vector, tile or memref.
pub type Shape = SmallVec<[usize; 4]>;

/// Coordinate-order convention.
///
/// For a tile type this is the element layout in memory (`Default` = row-major).
/// For a distribution it selects how a linear subgroup id is decomposed into grid
/// coordinates (`Default` = row-major subgroup placement, `Swapped` = column-major).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Order {
    #[default]
    Default,
    Swapped,
}

impl Order {
    pub fn flip(self) -> Self {
        match self {
            Self::Default => Self::Swapped,
            Self::Swapped => Self::Default,
        }
    }

    /// Dimension permutation written as a minor-to-major list, e.g. `[1, 0]` for row-major.
    pub fn as_dims(self) -> [usize; 2] {
        match self {
            Self::Default => [1, 0],
            Self::Swapped => [0, 1],
        }
    }
}

/// Workgroup-to-subgroup partitioning of a 2D value.
///
/// `grid` is the subgroup grid `(Gx, Gy)` and `tile` the per-subgroup tile `(Tx, Ty)`.
/// A workgroup extent `W` on axis `d` is either `grid[d] * tile[d]` or an integer
/// multiple of it, in which case each subgroup owns several tiles on that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DistributionAttr {
    pub grid: [usize; 2],
    pub tile: [usize; 2],
    pub order: Option<Order>,
    pub scope: Option<AddrSpace>,
}

impl DistributionAttr {
    pub fn new(grid: [usize; 2], tile: [usize; 2]) -> Self {
        Self { grid, tile, order: None, scope: None }
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_scope(mut self, scope: AddrSpace) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Number of subgroups in the grid.
    pub fn subgroups(&self) -> usize {
        self.grid[0] * self.grid[1]
    }

    /// Extent covered by one round of the grid on `axis`.
    pub fn coverage(&self, axis: usize) -> usize {
        self.grid[axis] * self.tile[axis]
    }

    /// True when `extent` is exactly one grid round on `axis`.
    pub fn is_one_to_one(&self, axis: usize, extent: usize) -> bool {
        self.coverage(axis) == extent
    }
}

impl fmt::Display for DistributionAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#dist<grid = [{}, {}], tile = [{}, {}]", self.grid[0], self.grid[1], self.tile[0], self.tile[1])?;
        if let Some(order) = self.order {
            write!(f, ", order = {order}")?;
        }
        if let Some(scope) = self.scope {
            write!(f, ", scope = {scope}")?;
        }
        write!(f, ">")
    }
}

/// N-dimensional register vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VectorType {
    pub shape: Shape,
    pub elem: ScalarDType,
    /// Per-dimension scalable flags; same length as `shape`.
    pub scalable: SmallVec<[bool; 4]>,
    pub dist: Option<DistributionAttr>,
}

impl VectorType {
    pub fn new(shape: impl Into<Shape>, elem: ScalarDType) -> Self {
        let shape = shape.into();
        let scalable = shape.iter().map(|_| false).collect();
        Self { shape, elem, scalable, dist: None }
    }

    pub fn scalable(shape: impl Into<Shape>, elem: ScalarDType, scalable: impl Into<SmallVec<[bool; 4]>>) -> Self {
        let shape = shape.into();
        let scalable = scalable.into();
        debug_assert_eq!(shape.len(), scalable.len(), "scalable flags must match rank");
        Self { shape, elem, scalable, dist: None }
    }

    pub fn with_dist(mut self, dist: DistributionAttr) -> Self {
        self.dist = Some(dist);
        self
    }

    /// Same element kind and scalability pattern, new shape; distribution dropped.
    pub fn reshaped(&self, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let scalable = if shape.len() == self.shape.len() {
            self.scalable.clone()
        } else {
            shape.iter().map(|_| false).collect()
        };
        Self { shape, elem: self.elem, scalable, dist: None }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn num_scalable_dims(&self) -> usize {
        self.scalable.iter().filter(|s| **s).count()
    }

    pub fn is_scalable(&self) -> bool {
        self.num_scalable_dims() > 0
    }

    pub fn with_elem(&self, elem: ScalarDType) -> Self {
        Self { elem, ..self.clone() }
    }
}

/// Descriptor for a 2D block of a memref (or a set of scattered rows when `scatter` is set).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileType {
    pub shape: [usize; 2],
    pub elem: ScalarDType,
    /// Element layout of the described block.
    pub order: Order,
    pub scope: AddrSpace,
    pub scatter: bool,
    pub dist: Option<DistributionAttr>,
}

impl TileType {
    pub fn new(shape: [usize; 2], elem: ScalarDType) -> Self {
        Self { shape, elem, order: Order::Default, scope: AddrSpace::Global, scatter: false, dist: None }
    }

    pub fn with_dist(mut self, dist: DistributionAttr) -> Self {
        self.dist = Some(dist);
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn with_scope(mut self, scope: AddrSpace) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_scatter(mut self, scatter: bool) -> Self {
        self.scatter = scatter;
        self
    }

    /// Vector type produced by loading the whole tile.
    pub fn value_type(&self) -> VectorType {
        VectorType::new(self.shape.to_vec(), self.elem)
    }
}

/// Strided view of a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemRefType {
    pub shape: Shape,
    pub elem: ScalarDType,
    /// Element strides; row-major when constructed through [`MemRefType::new`].
    pub strides: Shape,
    pub scope: AddrSpace,
}

impl MemRefType {
    pub fn new(shape: impl Into<Shape>, elem: ScalarDType) -> Self {
        let shape = shape.into();
        let strides = row_major_strides(&shape);
        Self { shape, elem, strides, scope: AddrSpace::Global }
    }

    pub fn with_scope(mut self, scope: AddrSpace) -> Self {
        self.scope = scope;
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_row_major(&self) -> bool {
        self.strides == row_major_strides(&self.shape)
    }

    /// View with shape and strides permuted by `perm` (`result.shape[i] = shape[perm[i]]`).
    pub fn permuted(&self, perm: &[usize]) -> Self {
        Self {
            shape: perm.iter().map(|&p| self.shape[p]).collect(),
            strides: perm.iter().map(|&p| self.strides[p]).collect(),
            elem: self.elem,
            scope: self.scope,
        }
    }
}

/// Row-major element strides for `shape`.
pub fn row_major_strides(shape: &[usize]) -> Shape {
    let mut strides: Shape = smallvec::smallvec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(ScalarDType),
    Vector(VectorType),
    Tile(TileType),
    MemRef(MemRefType),
}

impl Type {
    pub const fn index() -> Self {
        Self::Scalar(ScalarDType::Index)
    }

    pub fn vector(shape: impl Into<Shape>, elem: ScalarDType) -> Self {
        Self::Vector(VectorType::new(shape, elem))
    }

    pub fn as_vector(&self) -> Option<&VectorType> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tile(&self) -> Option<&TileType> {
        match self {
            Self::Tile(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_memref(&self) -> Option<&MemRefType> {
        match self {
            Self::MemRef(m) => Some(m),
            _ => None,
        }
    }

    pub fn elem(&self) -> ScalarDType {
        match self {
            Self::Scalar(s) => *s,
            Self::Vector(v) => v.elem,
            Self::Tile(t) => t.elem,
            Self::MemRef(m) => m.elem,
        }
    }

    /// Static shape; empty for scalars.
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Scalar(_) => &[],
            Self::Vector(v) => &v.shape,
            Self::Tile(t) => &t.shape,
            Self::MemRef(m) => &m.shape,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn dist(&self) -> Option<&DistributionAttr> {
        match self {
            Self::Vector(v) => v.dist.as_ref(),
            Self::Tile(t) => t.dist.as_ref(),
            _ => None,
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.dist().is_some()
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Same type with the element kind replaced (shape and distribution kept).
    pub fn with_elem(&self, elem: ScalarDType) -> Self {
        match self {
            Self::Scalar(_) => Self::Scalar(elem),
            Self::Vector(v) => Self::Vector(v.with_elem(elem)),
            Self::Tile(t) => Self::Tile(TileType { elem, ..t.clone() }),
            Self::MemRef(m) => Self::MemRef(MemRefType { elem, ..m.clone() }),
        }
    }
}

impl From<ScalarDType> for Type {
    fn from(s: ScalarDType) -> Self {
        Self::Scalar(s)
    }
}

impl From<VectorType> for Type {
    fn from(v: VectorType) -> Self {
        Self::Vector(v)
    }
}

impl From<TileType> for Type {
    fn from(t: TileType) -> Self {
        Self::Tile(t)
    }
}

impl From<MemRefType> for Type {
    fn from(m: MemRefType) -> Self {
        Self::MemRef(m)
    }
}

fn write_dims(f: &mut fmt::Formatter<'_>, shape: &[usize], scalable: &[bool]) -> fmt::Result {
    for (i, dim) in shape.iter().enumerate() {
        if scalable.get(i).copied().unwrap_or(false) {
            write!(f, "[{dim}]x")?;
        } else {
            write!(f, "{dim}x")?;
        }
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Vector(v) => {
                write!(f, "vector<")?;
                write_dims(f, &v.shape, &v.scalable)?;
                write!(f, "{}", v.elem)?;
                if let Some(dist) = &v.dist {
                    write!(f, ", {dist}")?;
                }
                write!(f, ">")
            }
            Self::Tile(t) => {
                write!(f, "tile<{}x{}x{}", t.shape[0], t.shape[1], t.elem)?;
                if t.order != Order::Default {
                    write!(f, ", order = {}", t.order)?;
                }
                if t.scope != AddrSpace::Global {
                    write!(f, ", scope = {}", t.scope)?;
                }
                if t.scatter {
                    write!(f, ", scatter")?;
                }
                if let Some(dist) = &t.dist {
                    write!(f, ", {dist}")?;
                }
                write!(f, ">")
            }
            Self::MemRef(m) => {
                write!(f, "memref<")?;
                write_dims(f, &m.shape, &[])?;
                write!(f, "{}", m.elem)?;
                if !m.is_row_major() {
                    write!(f, ", strides = {:?}", m.strides.as_slice())?;
                }
                if m.scope != AddrSpace::Global {
                    write!(f, ", {}", m.scope.id())?;
                }
                write!(f, ">")
            }
        }
    }
}
