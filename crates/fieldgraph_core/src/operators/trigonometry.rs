//! Trigonometric fields. The single-argument functions are [`ComponentFunction`]s; `atan2`
//! takes the quadrant from two sources.

use crate::autodiff::Dual;
use crate::derivative::FieldDerivative;
use crate::error::{FieldError, Result};
use crate::field::{Field, FieldKind};
use crate::field_cache::FieldCache;
use crate::module::FieldModule;
use crate::operators::arithmetic::ComponentFunction;
use crate::operators::require_same_components;
use crate::propagation;
use crate::traits::{binary_tree_orders, FieldOperator};
use crate::value_cache::{DerivativeValueCache, ValueCache};
use num_traits::Float;
use std::any::Any;

/// Angle of the point (x, y) = (second source, first source), componentwise.
pub struct Atan2Operator;

impl FieldOperator for Atan2Operator {
    fn kind(&self) -> FieldKind {
        FieldKind::Atan2
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let y = cache.evaluate(&field.sources()[0])?.borrow().values.clone();
        let x = cache.evaluate(&field.sources()[1])?.borrow().values.clone();
        for (value, (y, x)) in values.values.iter_mut().zip(y.iter().zip(&x)) {
            *value = y.atan2(*x);
        }
        Ok(())
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        if derivative.total_order() > 1 {
            return propagation::finite_difference(field, cache, derivative, out);
        }
        let (y_field, x_field) = (&field.sources()[0], &field.sources()[1]);
        let y = cache.evaluate(y_field)?.borrow().values.clone();
        let x = cache.evaluate(x_field)?.borrow().values.clone();
        let (order_y, order_x) = binary_tree_orders(field, derivative);
        let dy = (order_y > 0)
            .then(|| cache.evaluate_derivative(y_field, derivative))
            .transpose()?;
        let dx = (order_x > 0)
            .then(|| cache.evaluate_derivative(x_field, derivative))
            .transpose()?;
        let (dy, dx) = (dy.as_ref().map(|d| d.borrow()), dx.as_ref().map(|d| d.borrow()));
        let terms = derivative.term_count();
        out.zero_values();
        for c in 0..field.component_count() {
            let along_y = Dual::variable(y[c]).atan2(Dual::constant(x[c])).eps;
            let along_x = Dual::constant(y[c]).atan2(Dual::variable(x[c])).eps;
            if !(along_y.is_finite() && along_x.is_finite()) {
                return Err(FieldError::numeric(
                    field.name(),
                    format!("atan2 has no derivative at the origin (component {})", c + 1),
                ));
            }
            for t in 0..terms {
                let i = c * terms + t;
                if let Some(dy) = &dy {
                    out.values[i] += along_y * dy.values[i];
                }
                if let Some(dx) = &dx {
                    out.values[i] += along_x * dx.values[i];
                }
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl FieldModule {
    pub fn create_sin(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Sin)
    }

    pub fn create_cos(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Cos)
    }

    pub fn create_tan(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Tan)
    }

    pub fn create_asin(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Asin)
    }

    pub fn create_acos(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Acos)
    }

    pub fn create_atan(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Atan)
    }

    /// `atan2(y, x)` componentwise; both sources need the same component count.
    pub fn create_atan2(&self, y: &Field, x: &Field) -> Result<Field> {
        require_same_components(y, x, "atan2")?;
        self.create_field(
            y.component_count(),
            vec![y.clone(), x.clone()],
            Vec::new(),
            Atan2Operator,
        )
    }
}
