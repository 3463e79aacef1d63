//! Dialect-conversion infrastructure.
//!
//! A conversion is described by three pieces:
//!
//! - [`ConversionTarget`]: which operations are legal (per kind, or via a predicate)
//! - [`PatternSet`]: rewrite rules indexed by operation kind
//! - optionally a [`TypeConverter`] mapping original types to legal types
//!
//! [`apply_conversion`] drives the rules until no illegal operation remains. Rules may
//! replace one result by any number of values (including none); the running
//! [`ValueMapping`] resolves such values for later rules through the [`Adaptor`].
//! The conversion is all-or-nothing: on error the input graph is left untouched.

mod driver;
mod mapping;
mod pattern;
mod rewriter;
mod target;
mod type_converter;

use bon::bon;

pub use driver::apply_conversion;
pub use mapping::{Replacements, ValueMapping};
pub use pattern::{Adaptor, PatternSet, Rule, RuleFn};
pub use rewriter::{Applied, Rewriter};
pub use target::{ConversionTarget, Legality, LegalityFn};
pub use type_converter::{Conversion, TypeConverter, materialize};

/// Driver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionConfig {
    /// Upper bound on worklist rounds before the conversion gives up.
    pub max_rounds: usize,
    /// Run the structural verifier on the converted graph.
    pub verify: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self { max_rounds: 32, verify: cfg!(debug_assertions) }
    }
}

#[bon]
impl ConversionConfig {
    #[builder]
    pub fn builder(
        #[builder(default = 32)] max_rounds: usize,
        #[builder(default = cfg!(debug_assertions))] verify: bool,
    ) -> Self {
        Self { max_rounds, verify }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `SUBTILE_MAX_ROUNDS` - Worklist round limit (default: 32)
    /// * `SUBTILE_VERIFY` - `0` disables, anything else enables verification
    ///   (default: enabled in debug builds)
    pub fn from_env() -> Self {
        let max_rounds = std::env::var("SUBTILE_MAX_ROUNDS").ok().and_then(|s| s.parse().ok()).unwrap_or(32);
        let verify = std::env::var("SUBTILE_VERIFY").map(|s| s != "0").unwrap_or(cfg!(debug_assertions));
        Self { max_rounds, verify }
    }
}

/// Counters reported by [`apply_conversion`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub rounds: usize,
    /// Committed rule applications.
    pub rewrites: usize,
    pub created: usize,
    pub erased: usize,
    /// Casts inserted while rewiring uses of replaced values.
    pub materializations: usize,
}
