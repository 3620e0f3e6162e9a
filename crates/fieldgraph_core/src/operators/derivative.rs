use crate::derivative::FieldDerivative;
use crate::error::{FieldError, Result};
use crate::field::{Field, FieldKind};
use crate::field_cache::FieldCache;
use crate::module::FieldModule;
use crate::traits::FieldOperator;
use crate::value_cache::ValueCache;
use std::any::Any;

/// First derivative of the source along one xi direction.
pub struct DerivativeOperator {
    mesh_dimension: usize,
    xi_index: usize,
}

impl FieldOperator for DerivativeOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Derivative
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let first = FieldDerivative::mesh(self.mesh_dimension, 1)?;
        let source = cache.evaluate_derivative(&field.sources()[0], &first)?;
        let source = source.borrow();
        for (c, value) in values.values.iter_mut().enumerate() {
            *value = source.values[c * self.mesh_dimension + self.xi_index];
        }
        Ok(())
    }

    // Differentiating raises every source order by one, so no bound below the requested
    // order is known.
    fn derivative_tree_order(&self, _field: &Field, derivative: &FieldDerivative) -> usize {
        derivative.total_order()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl FieldModule {
    /// Derivative of `source` with respect to xi direction `xi_index` (1-based) of
    /// `mesh_dimension`-D elements.
    pub fn create_derivative(
        &self,
        source: &Field,
        mesh_dimension: usize,
        xi_index: usize,
    ) -> Result<Field> {
        if !(1..=3).contains(&mesh_dimension) || !(1..=mesh_dimension).contains(&xi_index) {
            return Err(FieldError::InvalidArgument(format!(
                "xi index {xi_index} is not a direction of {mesh_dimension}-D elements"
            )));
        }
        self.create_field(
            source.component_count(),
            vec![source.clone()],
            Vec::new(),
            DerivativeOperator {
                mesh_dimension,
                xi_index: xi_index - 1,
            },
        )
    }
}

impl Field {
    /// The 1-based xi index of a derivative field.
    pub fn derivative_xi_index(&self) -> Result<usize> {
        self.typed_operator::<DerivativeOperator>()
            .map(|operator| operator.xi_index + 1)
            .ok_or_else(|| FieldError::WrongSourceType {
                field: self.name(),
                expected: FieldKind::Derivative.as_str(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_field_picks_one_xi_direction() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        let square = module.create_multiply_components(&xi, &xi).unwrap();
        let d_dxi2 = module.create_derivative(&square, 2, 2).unwrap();
        assert_eq!(d_dxi2.derivative_xi_index().unwrap(), 2);

        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.25, 0.5]);
        let values = module.evaluate_real(&d_dxi2, &cache).unwrap();
        assert_eq!(values, vec![0.0, 1.0]);

        let d = FieldDerivative::mesh(2, 1).unwrap();
        assert_eq!(d_dxi2.derivative_tree_order(&d), 1);
        let second = module.evaluate_derivative_real(&d_dxi2, &cache, &d).unwrap();
        let expected = [0.0, 0.0, 0.0, 2.0];
        for (got, want) in second.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {second:?}");
        }
    }

    #[test]
    fn rejects_out_of_range_xi_index() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        assert!(module.create_derivative(&xi, 2, 0).is_err());
        assert!(module.create_derivative(&xi, 2, 3).is_err());
        assert!(xi.derivative_xi_index().is_err());
    }
}
