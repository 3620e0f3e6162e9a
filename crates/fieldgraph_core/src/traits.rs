use crate::derivative::FieldDerivative;
use crate::error::{AssignmentResult, FieldError, Result};
use crate::field::{Field, FieldKind};
use crate::field_cache::FieldCache;
use crate::location::{Mesh, MeshLocation};
use crate::propagation;
use crate::value_cache::{DerivativeValueCache, ValueCache};
use num_traits::{Float, FromPrimitive};
use std::any::Any;
use std::fmt::Debug;

/// A trait for types that can be used as scalars in componentwise field functions.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Numeric behaviour of one field type.
///
/// Operators write into the field's own caches and obtain source values through the
/// evaluation context, which memoizes them. Only `kind`, `evaluate` and `as_any` are
/// required; every other capability has a conservative default.
pub trait FieldOperator: Send + Sync + Any {
    fn kind(&self) -> FieldKind;

    /// Storage for the field's value, including any algorithm workspace.
    fn create_value_cache(&self, field: &Field) -> ValueCache {
        ValueCache::new(field.component_count())
    }

    /// Computes the field value at the context's location.
    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()>;

    /// Computes the requested derivative. Defaults to central finite differences.
    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        propagation::finite_difference(field, cache, derivative, out)
    }

    /// Upper bound on which derivative orders can be non-zero. Defaults to the conservative
    /// bound for a non-linear function of the sources.
    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        distinct_sources(field)
            .map(|source| derivative.maximum_tree_order(source.derivative_tree_order(derivative)))
            .max()
            .unwrap_or(0)
    }

    /// Pushes desired values back towards the sources.
    fn assign(&self, _field: &Field, _cache: &FieldCache, _values: &[f64]) -> AssignmentResult {
        AssignmentResult::Fail
    }

    /// Finds where in `mesh` the field takes `values` by inverting this operator.
    fn propagate_find_mesh_location(
        &self,
        field: &Field,
        _cache: &FieldCache,
        _values: &[f64],
        _mesh: &Mesh,
    ) -> Result<MeshLocation> {
        Err(FieldError::not_supported(field.name(), "find mesh location"))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Tree order of an operator that is linear in its sources.
pub(crate) fn linear_tree_order(field: &Field, derivative: &FieldDerivative) -> usize {
    distinct_sources(field)
        .map(|source| source.derivative_tree_order(derivative))
        .max()
        .unwrap_or(0)
}

/// Sources of `field`, skipping any that repeat an earlier one.
pub(crate) fn distinct_sources(field: &Field) -> impl Iterator<Item = &Field> {
    let sources = field.sources();
    sources
        .iter()
        .enumerate()
        .filter(move |(i, source)| !sources[..*i].iter().any(|s| s.id() == source.id()))
        .map(|(_, source)| source)
}

/// Tree orders of the two sources of a binary operator. A repeated source is asked once.
pub(crate) fn binary_tree_orders(field: &Field, derivative: &FieldDerivative) -> (usize, usize) {
    let (a, b) = (&field.sources()[0], &field.sources()[1]);
    let order_a = a.derivative_tree_order(derivative);
    if a.id() == b.id() {
        (order_a, order_a)
    } else {
        (order_a, b.derivative_tree_order(derivative))
    }
}
