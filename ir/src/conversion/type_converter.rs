use crate::builder::Builder;
use crate::{OpKind, Type, ValueId};

/// Result of one conversion callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// The callback does not apply; try the next one.
    Unchanged,
    Converted(Type),
    /// The type has no legal counterpart.
    Unconvertible,
}

type ConversionFn = Box<dyn Fn(&Type) -> Conversion + Send + Sync>;

/// Maps original types to legal types.
///
/// Callbacks are tried most-recently-added first; the first one that does not return
/// [`Conversion::Unchanged`] decides. A type no callback touches converts to itself.
/// Values crossing between original and converted types are bridged with `shape_cast`
/// (see [`materialize`]).
#[derive(Default)]
pub struct TypeConverter {
    conversions: Vec<ConversionFn>,
}

impl std::fmt::Debug for TypeConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeConverter").field("conversions", &self.conversions.len()).finish()
    }
}

impl TypeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversion<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Type) -> Conversion + Send + Sync + 'static,
    {
        self.conversions.push(Box::new(f));
        self
    }

    /// Legal counterpart of `ty`, or `None` if it cannot be converted.
    pub fn convert(&self, ty: &Type) -> Option<Type> {
        for conversion in self.conversions.iter().rev() {
            match conversion(ty) {
                Conversion::Unchanged => continue,
                Conversion::Converted(t) => return Some(t),
                Conversion::Unconvertible => return None,
            }
        }
        Some(ty.clone())
    }

    /// True if `ty` converts to itself.
    pub fn is_legal(&self, ty: &Type) -> bool {
        self.convert(ty).as_ref() == Some(ty)
    }

    pub fn all_legal<'t>(&self, types: impl IntoIterator<Item = &'t Type>) -> bool {
        types.into_iter().all(|t| self.is_legal(t))
    }
}

/// Bridge `value` to `ty` with a `shape_cast`.
///
/// A cast of a cast folds back to the original value when the types round-trip, and a
/// value already of type `ty` is returned as-is.
pub fn materialize<B: Builder + ?Sized>(builder: &mut B, value: ValueId, ty: &Type) -> ValueId {
    let graph = builder.graph();
    if graph.value_type(value) == ty {
        return value;
    }
    if let Some(def) = graph.defining_op(value)
        && graph.kind(def) == OpKind::ShapeCast
    {
        let source = graph.operand(def, 0);
        if graph.value_type(source) == ty {
            return source;
        }
    }
    builder.shape_cast(value, ty.clone())
}
