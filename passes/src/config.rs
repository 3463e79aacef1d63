//! Pass configuration.
//!
//! Typed configuration with bon builders and environment variable fallbacks.

use bon::bon;
use subtile_ir::conversion::ConversionConfig;

// ============================================================================
// DISTRIBUTION
// ============================================================================

/// Settings for [`distribute`](crate::distribute()).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributeConfig {
    /// Fold a single-use transpose feeding a `convert_layout` into the scratch-memory
    /// store instead of transposing in registers.
    pub fold_transpose_into_relayout: bool,
    pub conversion: ConversionConfig,
}

impl Default for DistributeConfig {
    fn default() -> Self {
        Self { fold_transpose_into_relayout: true, conversion: ConversionConfig::default() }
    }
}

#[bon]
impl DistributeConfig {
    #[builder]
    pub fn builder(
        #[builder(default = true)] fold_transpose_into_relayout: bool,
        #[builder(default)] conversion: ConversionConfig,
    ) -> Self {
        Self { fold_transpose_into_relayout, conversion }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `SUBTILE_NO_RELAYOUT_FOLDING` - Keep transposes out of relayout stores
    /// * Driver settings as read by [`ConversionConfig::from_env`]
    pub fn from_env() -> Self {
        let fold_transpose_into_relayout = std::env::var("SUBTILE_NO_RELAYOUT_FOLDING").is_err();
        Self { fold_transpose_into_relayout, conversion: ConversionConfig::from_env() }
    }
}

// ============================================================================
// LINEARIZATION
// ============================================================================

/// Settings for [`linearize`](crate::linearize()).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearizeConfig {
    /// Expand `broadcast` into splat/extract/insert form before linearizing.
    pub lower_broadcasts: bool,
    /// Remove redundant `shape_cast` chains afterwards.
    pub fold_shape_casts: bool,
    pub conversion: ConversionConfig,
}

impl Default for LinearizeConfig {
    fn default() -> Self {
        Self { lower_broadcasts: true, fold_shape_casts: true, conversion: ConversionConfig::default() }
    }
}

#[bon]
impl LinearizeConfig {
    #[builder]
    pub fn builder(
        #[builder(default = true)] lower_broadcasts: bool,
        #[builder(default = true)] fold_shape_casts: bool,
        #[builder(default)] conversion: ConversionConfig,
    ) -> Self {
        Self { lower_broadcasts, fold_shape_casts, conversion }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `SUBTILE_NO_BROADCAST_LOWERING` - Skip the broadcast pre-lowering
    /// * `SUBTILE_NO_CAST_FOLDING` - Keep every materialized `shape_cast`
    /// * Driver settings as read by [`ConversionConfig::from_env`]
    pub fn from_env() -> Self {
        let lower_broadcasts = std::env::var("SUBTILE_NO_BROADCAST_LOWERING").is_err();
        let fold_shape_casts = std::env::var("SUBTILE_NO_CAST_FOLDING").is_err();
        Self { lower_broadcasts, fold_shape_casts, conversion: ConversionConfig::from_env() }
    }
}
