//! Strategies over element kinds, derived from the variant list.

use proptest::prelude::*;
use proptest::sample::select;
use strum::VariantArray;

use crate::ScalarDType;

fn kinds(keep: fn(&ScalarDType) -> bool) -> Vec<ScalarDType> {
    ScalarDType::VARIANTS.iter().copied().filter(|d| keep(d)).collect()
}

/// Integer kinds, `index` included.
pub fn int_dtype() -> impl Strategy<Value = ScalarDType> {
    select(kinds(ScalarDType::is_int))
}

pub fn float_dtype() -> impl Strategy<Value = ScalarDType> {
    select(kinds(ScalarDType::is_float))
}

/// Element kinds that may appear in vectors and tiles.
pub fn element_dtype() -> impl Strategy<Value = ScalarDType> {
    select(ScalarDType::VARIANTS)
}
