//! Componentwise arithmetic fields.
//!
//! Linear operators (scale, offset, masks, weighted sums) forward source derivatives of any
//! order. Products and quotients use the product and quotient rules; the transcendental
//! functions use the chain rule at first order with `f'(u)` from dual numbers. Everything
//! else falls back to finite differences.

use crate::autodiff::Dual;
use crate::derivative::FieldDerivative;
use crate::error::{AssignmentResult, FieldError, Result};
use crate::field::{Field, FieldKind};
use crate::field_cache::FieldCache;
use crate::location::{Mesh, MeshLocation};
use crate::module::FieldModule;
use crate::operators::{require_components, require_same_components};
use crate::propagation::{self, ProductShape};
use crate::search;
use crate::traits::{binary_tree_orders, linear_tree_order, FieldOperator, Scalar};
use crate::value_cache::{DerivativeValueCache, ValueCache};
use log::debug;
use std::any::Any;

fn source_values(cache: &FieldCache, source: &Field) -> Result<Vec<f64>> {
    Ok(cache.evaluate(source)?.borrow().values.clone())
}

/// Applies `f(component, source_value, parameter)` to build the field value.
fn map_with_parameters(
    field: &Field,
    cache: &FieldCache,
    values: &mut ValueCache,
    f: impl Fn(f64, f64) -> f64,
) -> Result<()> {
    let source = cache.evaluate(&field.sources()[0])?;
    let source = source.borrow();
    field.with_scalar_parameters(|parameters| {
        for ((value, &u), &p) in values.values.iter_mut().zip(&source.values).zip(parameters) {
            *value = f(u, p);
        }
    });
    Ok(())
}

/// Copies the source derivative, multiplying component `c` by `factor(c)`.
fn scaled_source_derivative(
    field: &Field,
    cache: &FieldCache,
    derivative: &FieldDerivative,
    out: &mut DerivativeValueCache,
    factor: impl Fn(usize) -> f64,
) -> Result<()> {
    let source = cache.evaluate_derivative(&field.sources()[0], derivative)?;
    let source = source.borrow();
    let terms = derivative.term_count();
    for c in 0..field.component_count() {
        let f = factor(c);
        for t in 0..terms {
            out.values[c * terms + t] = f * source.values[c * terms + t];
        }
    }
    Ok(())
}

/// Multiplies each component by a constant factor.
pub struct ScaleOperator;

impl FieldOperator for ScaleOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Scale
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        map_with_parameters(field, cache, values, |u, factor| u * factor)
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        let factors = field.scalar_parameters();
        scaled_source_derivative(field, cache, derivative, out, |c| factors[c])
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        linear_tree_order(field, derivative)
    }

    fn assign(&self, field: &Field, cache: &FieldCache, values: &[f64]) -> AssignmentResult {
        let factors = field.scalar_parameters();
        if factors.iter().any(|&f| f == 0.0) {
            debug!("cannot assign {}: zero scale factor", field.name());
            return AssignmentResult::Fail;
        }
        let unscaled: Vec<f64> = values.iter().zip(&factors).map(|(v, f)| v / f).collect();
        AssignmentResult::AllValuesSet.then(cache.assign(&field.sources()[0], &unscaled))
    }

    fn propagate_find_mesh_location(
        &self,
        field: &Field,
        cache: &FieldCache,
        values: &[f64],
        mesh: &Mesh,
    ) -> Result<MeshLocation> {
        let factors = field.scalar_parameters();
        if factors.iter().any(|&f| f == 0.0) {
            return Err(FieldError::numeric(
                field.name(),
                "zero scale factor cannot be inverted",
            ));
        }
        let unscaled: Vec<f64> = values.iter().zip(&factors).map(|(v, f)| v / f).collect();
        search::find_mesh_location(&field.sources()[0], cache, &unscaled, mesh)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct OffsetOperator;

impl FieldOperator for OffsetOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Offset
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        map_with_parameters(field, cache, values, |u, offset| u + offset)
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        let source = cache.evaluate_derivative(&field.sources()[0], derivative)?;
        out.copy_values(&source.borrow().values);
        Ok(())
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        linear_tree_order(field, derivative)
    }

    fn assign(&self, field: &Field, cache: &FieldCache, values: &[f64]) -> AssignmentResult {
        let offsets = field.scalar_parameters();
        let shifted: Vec<f64> = values.iter().zip(&offsets).map(|(v, o)| v - o).collect();
        AssignmentResult::AllValuesSet.then(cache.assign(&field.sources()[0], &shifted))
    }

    fn propagate_find_mesh_location(
        &self,
        field: &Field,
        cache: &FieldCache,
        values: &[f64],
        mesh: &Mesh,
    ) -> Result<MeshLocation> {
        let offsets = field.scalar_parameters();
        let shifted: Vec<f64> = values.iter().zip(&offsets).map(|(v, o)| v - o).collect();
        search::find_mesh_location(&field.sources()[0], cache, &shifted, mesh)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pass-through whose assignment only writes components with a non-zero mask entry.
pub struct EditMaskOperator;

impl FieldOperator for EditMaskOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::EditMask
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        map_with_parameters(field, cache, values, |u, _| u)
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        let source = cache.evaluate_derivative(&field.sources()[0], derivative)?;
        out.copy_values(&source.borrow().values);
        Ok(())
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        linear_tree_order(field, derivative)
    }

    fn assign(&self, field: &Field, cache: &FieldCache, values: &[f64]) -> AssignmentResult {
        let source = &field.sources()[0];
        let current = match source_values(cache, source) {
            Ok(current) => current,
            Err(err) => {
                debug!("cannot assign {}: {err}", field.name());
                return AssignmentResult::Fail;
            }
        };
        let mask = field.scalar_parameters();
        let merged: Vec<f64> = current
            .iter()
            .zip(values)
            .zip(&mask)
            .map(|((&old, &new), &m)| if m != 0.0 { new } else { old })
            .collect();
        let result = if mask.iter().all(|&m| m != 0.0) {
            AssignmentResult::AllValuesSet
        } else {
            AssignmentResult::PartialValuesSet
        };
        result.then(cache.assign(source, &merged))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Componentwise clamp against per-component limits.
pub struct ClampOperator {
    minimum: bool,
}

impl ClampOperator {
    fn clamp(&self, u: f64, limit: f64) -> f64 {
        if self.minimum {
            u.max(limit)
        } else {
            u.min(limit)
        }
    }

    fn is_clamped(&self, u: f64, limit: f64) -> bool {
        if self.minimum {
            u < limit
        } else {
            u > limit
        }
    }
}

impl FieldOperator for ClampOperator {
    fn kind(&self) -> FieldKind {
        if self.minimum {
            FieldKind::ClampMinimum
        } else {
            FieldKind::ClampMaximum
        }
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        map_with_parameters(field, cache, values, |u, limit| self.clamp(u, limit))
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        let values = source_values(cache, &field.sources()[0])?;
        let limits = field.scalar_parameters();
        scaled_source_derivative(field, cache, derivative, out, |c| {
            if self.is_clamped(values[c], limits[c]) {
                0.0
            } else {
                1.0
            }
        })
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        linear_tree_order(field, derivative)
    }

    fn assign(&self, field: &Field, cache: &FieldCache, values: &[f64]) -> AssignmentResult {
        let limits = field.scalar_parameters();
        let clamped: Vec<f64> = values
            .iter()
            .zip(&limits)
            .map(|(&v, &limit)| self.clamp(v, limit))
            .collect();
        let result = if clamped.iter().zip(values).all(|(c, v)| c == v) {
            AssignmentResult::AllValuesSet
        } else {
            AssignmentResult::PartialValuesSet
        };
        result.then(cache.assign(&field.sources()[0], &clamped))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `w1 * a + w2 * b`, componentwise.
pub struct WeightedAddOperator;

impl FieldOperator for WeightedAddOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::WeightedAdd
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let a = source_values(cache, &field.sources()[0])?;
        let b = source_values(cache, &field.sources()[1])?;
        let weights = field.scalar_parameters();
        for (value, (a, b)) in values.values.iter_mut().zip(a.iter().zip(&b)) {
            *value = weights[0] * a + weights[1] * b;
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
        let da = cache.evaluate_derivative(&field.sources()[0], derivative)?;
        let db = cache.evaluate_derivative(&field.sources()[1], derivative)?;
        let (da, db) = (da.borrow(), db.borrow());
        let weights = field.scalar_parameters();
        for (value, (a, b)) in out.values.iter_mut().zip(da.values.iter().zip(&db.values)) {
            *value = weights[0] * a + weights[1] * b;
        }
        Ok(())
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        linear_tree_order(field, derivative)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MultiplyComponentsOperator;

impl FieldOperator for MultiplyComponentsOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::MultiplyComponents
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let a = source_values(cache, &field.sources()[0])?;
        let b = source_values(cache, &field.sources()[1])?;
        ProductShape::Componentwise {
            count: field.component_count(),
        }
        .apply(&a, &b, &mut values.values);
        Ok(())
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        let shape = ProductShape::Componentwise {
            count: field.component_count(),
        };
        propagation::product_derivative(field, cache, derivative, shape, out)
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        let (a, b) = binary_tree_orders(field, derivative);
        derivative.product_tree_order(a, b)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Values of the second source, which must all be non-zero.
fn denominators(field: &Field, cache: &FieldCache) -> Result<Vec<f64>> {
    let v = source_values(cache, &field.sources()[1])?;
    match v.iter().position(|&d| d == 0.0) {
        Some(c) => Err(FieldError::numeric(
            field.name(),
            format!("division by zero in component {}", c + 1),
        )),
        None => Ok(v),
    }
}

pub struct DivideComponentsOperator;

impl FieldOperator for DivideComponentsOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::DivideComponents
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let u = source_values(cache, &field.sources()[0])?;
        let v = denominators(field, cache)?;
        for (c, value) in values.values.iter_mut().enumerate() {
            *value = u[c] / v[c];
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
        let (numerator, denominator) = (&field.sources()[0], &field.sources()[1]);
        let total = derivative.total_order();
        let (order_u, order_v) = binary_tree_orders(field, derivative);
        let terms = derivative.term_count();
        let v = denominators(field, cache)?;
        out.zero_values();

        if order_v == 0 {
            if order_u < total {
                return Ok(());
            }
            let du = cache.evaluate_derivative(numerator, derivative)?;
            let du = du.borrow();
            for c in 0..field.component_count() {
                for t in 0..terms {
                    out.values[c * terms + t] = du.values[c * terms + t] / v[c];
                }
            }
            return Ok(());
        }
        if total > 1 {
            return propagation::finite_difference(field, cache, derivative, out);
        }
        let u = source_values(cache, numerator)?;
        let du = cache.evaluate_derivative(numerator, derivative)?;
        let dv = cache.evaluate_derivative(denominator, derivative)?;
        let (du, dv) = (du.borrow(), dv.borrow());
        for c in 0..field.component_count() {
            let v2 = v[c] * v[c];
            for t in 0..terms {
                let i = c * terms + t;
                out.values[i] = (du.values[i] * v[c] - u[c] * dv.values[i]) / v2;
            }
        }
        Ok(())
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        let (u, v) = binary_tree_orders(field, derivative);
        if v == 0 {
            u
        } else {
            derivative.maximum_tree_order(v)
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `a ^ b`, componentwise.
pub struct PowerOperator;

impl FieldOperator for PowerOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Power
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let u = source_values(cache, &field.sources()[0])?;
        let v = source_values(cache, &field.sources()[1])?;
        for (c, value) in values.values.iter_mut().enumerate() {
            *value = u[c].powf(v[c]);
            if !value.is_finite() {
                return Err(FieldError::numeric(
                    field.name(),
                    format!("{} ^ {} is not finite", u[c], v[c]),
                ));
            }
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
        let (base, exponent) = (&field.sources()[0], &field.sources()[1]);
        let u = source_values(cache, base)?;
        let v = source_values(cache, exponent)?;
        let terms = derivative.term_count();
        let (order_u, order_v) = binary_tree_orders(field, derivative);
        let du = if order_u > 0 {
            Some(cache.evaluate_derivative(base, derivative)?)
        } else {
            None
        };
        let dv = if order_v > 0 {
            Some(cache.evaluate_derivative(exponent, derivative)?)
        } else {
            None
        };
        let du = du.as_ref().map(|du| du.borrow());
        let dv = dv.as_ref().map(|dv| dv.borrow());
        for c in 0..field.component_count() {
            let power = u[c].powf(v[c]);
            let base_factor = match &du {
                Some(_) => v[c] * u[c].powf(v[c] - 1.0),
                None => 0.0,
            };
            if !base_factor.is_finite() {
                return Err(FieldError::numeric(
                    field.name(),
                    format!("{} ^ {} has no derivative with respect to the base", u[c], v[c]),
                ));
            }
            let exponent_factor = match &dv {
                Some(_) if u[c] <= 0.0 => {
                    return Err(FieldError::numeric(
                        field.name(),
                        "derivative with respect to the exponent needs a positive base",
                    ))
                }
                Some(_) => power * u[c].ln(),
                None => 0.0,
            };
            for t in 0..terms {
                let i = c * terms + t;
                let mut value = 0.0;
                if let Some(du) = &du {
                    value += base_factor * du.values[i];
                }
                if let Some(dv) = &dv {
                    value += exponent_factor * dv.values[i];
                }
                out.values[i] = value;
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Transcendental componentwise functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentFunction {
    Log,
    Sqrt,
    Exp,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
}

impl ComponentFunction {
    pub fn apply<T: Scalar>(self, x: T) -> T {
        match self {
            ComponentFunction::Log => x.ln(),
            ComponentFunction::Sqrt => x.sqrt(),
            ComponentFunction::Exp => x.exp(),
            ComponentFunction::Sin => x.sin(),
            ComponentFunction::Cos => x.cos(),
            ComponentFunction::Tan => x.tan(),
            ComponentFunction::Asin => x.asin(),
            ComponentFunction::Acos => x.acos(),
            ComponentFunction::Atan => x.atan(),
        }
    }

    fn in_domain(self, x: f64) -> bool {
        match self {
            ComponentFunction::Log => x > 0.0,
            ComponentFunction::Sqrt => x >= 0.0,
            ComponentFunction::Tan => x.cos() != 0.0,
            ComponentFunction::Asin | ComponentFunction::Acos => (-1.0..=1.0).contains(&x),
            ComponentFunction::Exp
            | ComponentFunction::Sin
            | ComponentFunction::Cos
            | ComponentFunction::Atan => true,
        }
    }

    fn kind(self) -> FieldKind {
        match self {
            ComponentFunction::Log => FieldKind::Log,
            ComponentFunction::Sqrt => FieldKind::Sqrt,
            ComponentFunction::Exp => FieldKind::Exp,
            ComponentFunction::Sin => FieldKind::Sin,
            ComponentFunction::Cos => FieldKind::Cos,
            ComponentFunction::Tan => FieldKind::Tan,
            ComponentFunction::Asin => FieldKind::Asin,
            ComponentFunction::Acos => FieldKind::Acos,
            ComponentFunction::Atan => FieldKind::Atan,
        }
    }
}

pub struct ComponentFunctionOperator {
    function: ComponentFunction,
}

impl FieldOperator for ComponentFunctionOperator {
    fn kind(&self) -> FieldKind {
        self.function.kind()
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let u = source_values(cache, &field.sources()[0])?;
        for (value, &x) in values.values.iter_mut().zip(&u) {
            if !self.function.in_domain(x) {
                return Err(FieldError::numeric(
                    field.name(),
                    format!("{} is outside the domain of {}", x, self.function.kind()),
                ));
            }
            *value = self.function.apply(x);
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
        let u = source_values(cache, &field.sources()[0])?;
        let mut slopes = Vec::with_capacity(u.len());
        for &x in &u {
            let slope = self.function.apply(Dual::variable(x)).eps;
            if !self.function.in_domain(x) || !slope.is_finite() {
                return Err(FieldError::numeric(
                    field.name(),
                    format!("{} has no derivative at {}", self.function.kind(), x),
                ));
            }
            slopes.push(slope);
        }
        scaled_source_derivative(field, cache, derivative, out, |c| slopes[c])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Componentwise absolute value; derivatives take the sign of the source, zero at zero.
pub struct AbsOperator;

impl FieldOperator for AbsOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Abs
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let u = source_values(cache, &field.sources()[0])?;
        for (value, x) in values.values.iter_mut().zip(&u) {
            *value = x.abs();
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
        let u = source_values(cache, &field.sources()[0])?;
        scaled_source_derivative(field, cache, derivative, out, |c| {
            num_traits::Float::abs(Dual::variable(u[c])).eps
        })
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        linear_tree_order(field, derivative)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl FieldModule {
    fn create_with_coefficients(
        &self,
        source: &Field,
        coefficients: &[f64],
        what: &str,
        operator: impl FieldOperator,
    ) -> Result<Field> {
        if coefficients.len() != source.component_count() {
            return Err(FieldError::ComponentMismatch {
                context: format!("{what} for {}", source.name()),
                expected: source.component_count(),
                actual: coefficients.len(),
            });
        }
        self.create_field(
            source.component_count(),
            vec![source.clone()],
            coefficients.to_vec(),
            operator,
        )
    }

    pub fn create_scale(&self, source: &Field, factors: &[f64]) -> Result<Field> {
        self.create_with_coefficients(source, factors, "scale factors", ScaleOperator)
    }

    pub fn create_offset(&self, source: &Field, offsets: &[f64]) -> Result<Field> {
        self.create_with_coefficients(source, offsets, "offsets", OffsetOperator)
    }

    pub fn create_edit_mask(&self, source: &Field, mask: &[f64]) -> Result<Field> {
        self.create_with_coefficients(source, mask, "edit mask", EditMaskOperator)
    }

    pub fn create_clamp_minimum(&self, source: &Field, minimums: &[f64]) -> Result<Field> {
        let operator = ClampOperator { minimum: true };
        self.create_with_coefficients(source, minimums, "clamp minimums", operator)
    }

    pub fn create_clamp_maximum(&self, source: &Field, maximums: &[f64]) -> Result<Field> {
        let operator = ClampOperator { minimum: false };
        self.create_with_coefficients(source, maximums, "clamp maximums", operator)
    }

    pub fn create_weighted_add(
        &self,
        a: &Field,
        b: &Field,
        weight_a: f64,
        weight_b: f64,
    ) -> Result<Field> {
        require_same_components(a, b, "weighted add")?;
        self.create_field(
            a.component_count(),
            vec![a.clone(), b.clone()],
            vec![weight_a, weight_b],
            WeightedAddOperator,
        )
    }

    pub fn create_add(&self, a: &Field, b: &Field) -> Result<Field> {
        self.create_weighted_add(a, b, 1.0, 1.0)
    }

    pub fn create_subtract(&self, a: &Field, b: &Field) -> Result<Field> {
        self.create_weighted_add(a, b, 1.0, -1.0)
    }

    pub fn create_multiply_components(&self, a: &Field, b: &Field) -> Result<Field> {
        require_same_components(a, b, "multiply components")?;
        self.create_field(
            a.component_count(),
            vec![a.clone(), b.clone()],
            Vec::new(),
            MultiplyComponentsOperator,
        )
    }

    pub fn create_divide_components(&self, a: &Field, b: &Field) -> Result<Field> {
        require_same_components(a, b, "divide components")?;
        self.create_field(
            a.component_count(),
            vec![a.clone(), b.clone()],
            Vec::new(),
            DivideComponentsOperator,
        )
    }

    pub fn create_power(&self, base: &Field, exponent: &Field) -> Result<Field> {
        require_components(exponent, base.component_count(), "power exponent")?;
        self.create_field(
            base.component_count(),
            vec![base.clone(), exponent.clone()],
            Vec::new(),
            PowerOperator,
        )
    }

    pub fn create_component_function(
        &self,
        source: &Field,
        function: ComponentFunction,
    ) -> Result<Field> {
        self.create_field(
            source.component_count(),
            vec![source.clone()],
            Vec::new(),
            ComponentFunctionOperator { function },
        )
    }

    pub fn create_log(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Log)
    }

    pub fn create_sqrt(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Sqrt)
    }

    pub fn create_exp(&self, source: &Field) -> Result<Field> {
        self.create_component_function(source, ComponentFunction::Exp)
    }

    pub fn create_abs(&self, source: &Field) -> Result<Field> {
        self.create_field(
            source.component_count(),
            vec![source.clone()],
            Vec::new(),
            AbsOperator,
        )
    }
}

impl Field {
    fn coefficients_of(&self, kinds: &[FieldKind], expected: &'static str) -> Result<Vec<f64>> {
        if kinds.contains(&self.kind()) {
            Ok(self.scalar_parameters())
        } else {
            Err(FieldError::WrongSourceType {
                field: self.name(),
                expected,
            })
        }
    }

    fn set_coefficients_of(
        &self,
        kinds: &[FieldKind],
        expected: &'static str,
        values: &[f64],
    ) -> Result<()> {
        self.coefficients_of(kinds, expected)?;
        self.set_scalar_parameters(values)
    }

    pub fn scale_factors(&self) -> Result<Vec<f64>> {
        self.coefficients_of(&[FieldKind::Scale], "scale")
    }

    pub fn set_scale_factors(&self, factors: &[f64]) -> Result<()> {
        self.set_coefficients_of(&[FieldKind::Scale], "scale", factors)
    }

    pub fn offsets(&self) -> Result<Vec<f64>> {
        self.coefficients_of(&[FieldKind::Offset], "offset")
    }

    pub fn set_offsets(&self, offsets: &[f64]) -> Result<()> {
        self.set_coefficients_of(&[FieldKind::Offset], "offset", offsets)
    }

    pub fn edit_mask(&self) -> Result<Vec<f64>> {
        self.coefficients_of(&[FieldKind::EditMask], "edit_mask")
    }

    pub fn set_edit_mask(&self, mask: &[f64]) -> Result<()> {
        self.set_coefficients_of(&[FieldKind::EditMask], "edit_mask", mask)
    }

    pub fn clamp_limits(&self) -> Result<Vec<f64>> {
        self.coefficients_of(&[FieldKind::ClampMinimum, FieldKind::ClampMaximum], "clamp")
    }

    pub fn set_clamp_limits(&self, limits: &[f64]) -> Result<()> {
        self.set_coefficients_of(
            &[FieldKind::ClampMinimum, FieldKind::ClampMaximum],
            "clamp",
            limits,
        )
    }

    pub fn weights(&self) -> Result<Vec<f64>> {
        self.coefficients_of(&[FieldKind::WeightedAdd], "weighted_add")
    }

    pub fn set_weights(&self, weight_a: f64, weight_b: f64) -> Result<()> {
        self.set_coefficients_of(&[FieldKind::WeightedAdd], "weighted_add", &[weight_a, weight_b])
    }
}
