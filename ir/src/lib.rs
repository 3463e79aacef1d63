//! Region-based IR for workgroup-level tile and vector programs.
//!
//! This crate defines the data structures shared by the lowering passes and the
//! conversion driver that applies them.
//!
//! # Module Organization
//!
//! - [`graph`] - Arena of operations, values and single-block regions
//! - [`op`] - Operation kinds
//! - [`types`] - Scalar, vector, tile and memref types plus distribution attributes
//! - [`attr`] - Operation attributes and constants
//! - [`builder`] - Typed operation constructors shared by tests and rewrite rules
//! - [`conversion`] - Legality targets, rule sets and the one-to-many conversion driver
//! - [`verify`] - Structural verifier
//! - [`eval`] - Reference interpreter used to check rewrites
//! - [`print`] - Textual rendering

pub mod attr;
pub mod builder;
pub mod conversion;
pub mod error;
pub mod eval;
pub mod fold;
pub mod graph;
pub mod op;
pub mod print;
pub mod types;
pub mod verify;


pub use attr::{Attribute, Attributes, CacheHint, CmpPredicate, CombiningKind, ConstValue, DenseElements};
pub use builder::{Builder, GraphBuilder};
pub use error::{Error, MatchFailure, MatchResult, Result};
pub use graph::{Graph, InsertPoint, OpId, RegionId, ValueDef, ValueId};
pub use op::OpKind;
pub use types::{DistributionAttr, MemRefType, Order, Shape, TileType, Type, VectorType};
pub use verify::verify;

pub use subtile_dtype::{AddrSpace, ScalarDType};
