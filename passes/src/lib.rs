//! Lowering passes over the `subtile-ir` graph.
//!
//! # Module Organization
//!
//! - [`layout`] - Subgroup layout analysis (which tile sites feed a transpose)
//! - [`distribute`] - Workgroup-to-subgroup tile distribution
//! - [`linearize`] - Flattening of multi-dimensional vector operations to 1-D form
//! - [`cleanup`] - Shape-cast folding run after linearization
//! - [`config`] - Pass configuration with environment fallbacks
//!
//! Every pass is all-or-nothing: on error the caller's graph is left untouched.

pub mod cleanup;
pub mod config;
pub mod distribute;
pub mod error;
pub mod layout;
pub mod linearize;

#[cfg(test)]
pub mod test;

pub use cleanup::fold_shape_casts;
pub use config::{DistributeConfig, LinearizeConfig};
pub use distribute::{DistributeStats, distribute};
pub use error::{Error, Result};
pub use layout::{LayoutMap, analyze_layouts};
pub use linearize::{LinearizeStats, linearize};
