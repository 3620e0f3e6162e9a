//! Generic derivative propagation: central finite differences and the product rule.

use crate::derivative::{Direction, FieldDerivative};
use crate::error::{FieldError, Result};
use crate::field::Field;
use crate::field_cache::FieldCache;
use crate::location::{Location, MeshLocation, ParameterPerturbation};
use crate::traits::binary_tree_orders;
use crate::value_cache::DerivativeValueCache;
use log::debug;

/// Central finite-difference approximation of `derivative`, differencing the one-order-lower
/// derivative along the outermost direction.
///
/// Perturbed samples are taken in a detached working cache so that nothing memoized at the
/// unperturbed location is read or overwritten.
pub(crate) fn finite_difference(
    field: &Field,
    cache: &FieldCache,
    derivative: &FieldDerivative,
    out: &mut DerivativeValueCache,
) -> Result<()> {
    let lower = derivative.lower();
    let directions = derivative.outer_count();
    let working = cache.create_working_cache();

    let sample = |working: &FieldCache| -> Result<Vec<f64>> {
        match &lower {
            Some(lower) => Ok(working.evaluate_derivative(field, lower)?.borrow().values.clone()),
            None => Ok(working.evaluate(field)?.borrow().values.clone()),
        }
    };

    let result = match derivative.outer_direction() {
        Direction::Mesh => {
            let base = mesh_base(cache, derivative)?;
            let delta = cache.settings().finite_difference.mesh_delta;
            let weight = 0.5 / delta;
            (0..directions).try_for_each(|direction| {
                let mut xi = base.xi.clone();
                xi[direction] = base.xi[direction] + delta;
                working.set_location(Location::Mesh(MeshLocation::new(base.element, xi.clone())));
                let plus = sample(&working)?;
                xi[direction] = base.xi[direction] - delta;
                working.set_location(Location::Mesh(MeshLocation::new(base.element, xi)));
                let minus = sample(&working)?;
                store_difference(out, &plus, &minus, weight, direction, directions);
                Ok(())
            })
        }
        Direction::Parameter => {
            let parameters = derivative.parameter_directions().ok_or_else(|| {
                FieldError::DerivativeMismatch("parameter derivative without parameters".into())
            })?;
            let delta = cache.settings().finite_difference.parameter_delta;
            let weight = 0.5 / delta;
            (0..directions).try_for_each(|direction| {
                let perturb = |delta: f64| -> Result<Vec<f64>> {
                    working.push_perturbation(ParameterPerturbation {
                        field: parameters.field,
                        index: direction,
                        delta,
                    });
                    let values = sample(&working);
                    working.pop_perturbation();
                    values
                };
                let plus = perturb(delta)?;
                let minus = perturb(-delta)?;
                store_difference(out, &plus, &minus, weight, direction, directions);
                Ok(())
            })
        }
    };
    if let Err(err) = &result {
        debug!(
            "finite difference {} of {} failed: {err}",
            derivative,
            field.name()
        );
    }
    result
}

fn mesh_base(cache: &FieldCache, derivative: &FieldDerivative) -> Result<MeshLocation> {
    let base = match cache.location() {
        Location::Mesh(location) => location,
        Location::Node { .. } => {
            return Err(FieldError::LocationUnsupported(
                "mesh derivatives by finite difference need an element location".into(),
            ))
        }
        Location::None => return Err(FieldError::NoLocation),
    };
    if base.dimension() != derivative.mesh_dimension() {
        return Err(FieldError::DerivativeMismatch(format!(
            "derivative is for {}-D elements, location is {}-D",
            derivative.mesh_dimension(),
            base.dimension()
        )));
    }
    Ok(base)
}

fn store_difference(
    out: &mut DerivativeValueCache,
    plus: &[f64],
    minus: &[f64],
    weight: f64,
    direction: usize,
    directions: usize,
) {
    for (index, (p, m)) in plus.iter().zip(minus).enumerate() {
        out.values[index * directions + direction] = (p - m) * weight;
    }
}

/// How the components of two operands pair up in a bilinear product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProductShape {
    /// out[i] = a[i] * b[i]
    Componentwise { count: usize },
    /// out = a (m x s) * b (s x n), row-major
    Matrix { m: usize, s: usize, n: usize },
}

impl ProductShape {
    pub(crate) fn output_count(&self) -> usize {
        match *self {
            ProductShape::Componentwise { count } => count,
            ProductShape::Matrix { m, n, .. } => m * n,
        }
    }

    /// Calls `f(output, a_index, b_index)` for every term of the product.
    pub(crate) fn for_each(&self, mut f: impl FnMut(usize, usize, usize)) {
        match *self {
            ProductShape::Componentwise { count } => (0..count).for_each(|i| f(i, i, i)),
            ProductShape::Matrix { m, s, n } => {
                for i in 0..m {
                    for j in 0..n {
                        for k in 0..s {
                            f(i * n + j, i * s + k, k * n + j);
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn apply(&self, a: &[f64], b: &[f64], out: &mut [f64]) {
        out.iter_mut().for_each(|v| *v = 0.0);
        self.for_each(|o, ia, ib| out[o] += a[ia] * b[ib]);
    }
}

/// Derivative of the product of the field's two sources.
///
/// Uses the constant-factor shortcut when one operand has tree order zero, the product rule
/// at first order and the explicit second-order rule (including mixed mesh/parameter
/// derivatives). Higher orders fall back to finite differences.
pub(crate) fn product_derivative(
    field: &Field,
    cache: &FieldCache,
    derivative: &FieldDerivative,
    shape: ProductShape,
    out: &mut DerivativeValueCache,
) -> Result<()> {
    let (a, b) = match field.sources() {
        [a, b] => (a, b),
        _ => {
            return Err(FieldError::InvalidArgument(format!(
                "{} needs two sources",
                field.name()
            )))
        }
    };
    let total = derivative.total_order();
    let same = a.id() == b.id();
    let (order_a, order_b) = binary_tree_orders(field, derivative);
    let terms = derivative.term_count();
    out.zero_values();

    if order_a + order_b < total {
        return Ok(());
    }
    if order_a == 0 || order_b == 0 {
        if order_a == 0 {
            let a_value = cache.evaluate(a)?;
            let db = cache.evaluate_derivative(b, derivative)?;
            let (av, db) = (a_value.borrow(), db.borrow());
            shape.for_each(|o, ia, ib| {
                for t in 0..terms {
                    out.values[o * terms + t] += av.values[ia] * db.values[ib * terms + t];
                }
            });
        } else {
            let b_value = cache.evaluate(b)?;
            let da = cache.evaluate_derivative(a, derivative)?;
            let (da, bv) = (da.borrow(), b_value.borrow());
            shape.for_each(|o, ia, ib| {
                for t in 0..terms {
                    out.values[o * terms + t] += da.values[ia * terms + t] * bv.values[ib];
                }
            });
        }
        return Ok(());
    }

    match total {
        1 => {
            let a_value = cache.evaluate(a)?;
            let b_value = cache.evaluate(b)?;
            let da = cache.evaluate_derivative(a, derivative)?;
            let db = if same {
                da.clone()
            } else {
                cache.evaluate_derivative(b, derivative)?
            };
            let (av, bv, da, db) = (a_value.borrow(), b_value.borrow(), da.borrow(), db.borrow());
            shape.for_each(|o, ia, ib| {
                for t in 0..terms {
                    out.values[o * terms + t] += da.values[ia * terms + t] * bv.values[ib]
                        + av.values[ia] * db.values[ib * terms + t];
                }
            });
            Ok(())
        }
        2 => second_order_product(cache, derivative, shape, (a, order_a), (b, order_b), out),
        _ => finite_difference(field, cache, derivative, out),
    }
}

fn second_order_product(
    cache: &FieldCache,
    derivative: &FieldDerivative,
    shape: ProductShape,
    (a, order_a): (&Field, usize),
    (b, order_b): (&Field, usize),
    out: &mut DerivativeValueCache,
) -> Result<()> {
    let inner = derivative.lower().ok_or_else(|| {
        FieldError::DerivativeMismatch("second order derivative has no lower order".into())
    })?;
    let outer = derivative.outer_first_order();
    let inner_terms = inner.term_count();
    let outer_terms = outer.term_count();
    let terms = derivative.term_count();

    let a_value = cache.evaluate(a)?;
    let b_value = cache.evaluate(b)?;
    let a_inner = cache.evaluate_derivative(a, &inner)?;
    let a_outer = cache.evaluate_derivative(a, &outer)?;
    let b_inner = cache.evaluate_derivative(b, &inner)?;
    let b_outer = cache.evaluate_derivative(b, &outer)?;
    {
        let (ai, ao, bi, bo) = (
            a_inner.borrow(),
            a_outer.borrow(),
            b_inner.borrow(),
            b_outer.borrow(),
        );
        shape.for_each(|o, ia, ib| {
            for d in 0..inner_terms {
                for e in 0..outer_terms {
                    out.values[o * terms + d * outer_terms + e] += ai.values[ia * inner_terms + d]
                        * bo.values[ib * outer_terms + e]
                        + ao.values[ia * outer_terms + e] * bi.values[ib * inner_terms + d];
                }
            }
        });
    }
    if order_b >= 2 {
        let d2b = cache.evaluate_derivative(b, derivative)?;
        let (av, d2b) = (a_value.borrow(), d2b.borrow());
        shape.for_each(|o, ia, ib| {
            for t in 0..terms {
                out.values[o * terms + t] += av.values[ia] * d2b.values[ib * terms + t];
            }
        });
    }
    if order_a >= 2 {
        let d2a = cache.evaluate_derivative(a, derivative)?;
        let (d2a, bv) = (d2a.borrow(), b_value.borrow());
        shape.for_each(|o, ia, ib| {
            for t in 0..terms {
                out.values[o * terms + t] += d2a.values[ia * terms + t] * bv.values[ib];
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::FieldModule;

    fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() <= tolerance, "got {actual:?}, expected {expected:?}");
        }
    }

    #[test]
    fn matrix_shape_visits_every_product_term() {
        let shape = ProductShape::Matrix { m: 2, s: 3, n: 1 };
        let mut out = vec![0.0; shape.output_count()];
        shape.apply(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[1.0, 0.0, -1.0], &mut out);
        assert_eq!(out, vec![-2.0, -2.0]);
    }

    #[test]
    fn finite_difference_matches_analytic_first_derivative() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        let product = module.create_multiply_components(&xi, &xi).unwrap();
        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.3, 0.7]);
        let d = FieldDerivative::mesh(2, 1).unwrap();

        let analytic = cache.evaluate_derivative(&product, &d).unwrap().borrow().values.clone();
        let mut numeric = DerivativeValueCache::new(2, 2);
        finite_difference(&product, &cache, &d, &mut numeric).unwrap();
        assert_close(&analytic, &[0.6, 0.0, 0.0, 1.4], 1e-12);
        assert_close(&numeric.values, &analytic, 1e-8);
    }

    #[test]
    fn mixed_second_derivative_of_product() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(1).unwrap();
        let p = module.create_parameters(&[2.0]).unwrap();
        let product = module.create_multiply_components(&xi, &p).unwrap();
        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.4]);

        let mixed = FieldDerivative::mixed(1, 1, &p, 1).unwrap();
        let values = cache.evaluate_derivative(&product, &mixed).unwrap().borrow().values.clone();
        assert_close(&values, &[1.0], 1e-12);

        let mut numeric = DerivativeValueCache::new(1, 1);
        finite_difference(&product, &cache, &mixed, &mut numeric).unwrap();
        assert_close(&numeric.values, &[1.0], 1e-6);
    }

    #[test]
    fn constant_factor_shortcut_scales_other_operand() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(1).unwrap();
        let c = module.create_constant(&[3.0]).unwrap();
        let product = module.create_multiply_components(&c, &xi).unwrap();
        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.5]);
        let d1 = FieldDerivative::mesh(1, 1).unwrap();
        let d2 = FieldDerivative::mesh(1, 2).unwrap();
        assert_close(&cache.evaluate_derivative(&product, &d1).unwrap().borrow().values, &[3.0], 0.0);
        assert_close(&cache.evaluate_derivative(&product, &d2).unwrap().borrow().values, &[0.0], 0.0);
    }

    #[test]
    fn third_order_falls_back_to_finite_differences() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(1).unwrap();
        let square = module.create_multiply_components(&xi, &xi).unwrap();
        let cube = module.create_multiply_components(&square, &xi).unwrap();
        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.5]);
        let d3 = FieldDerivative::mesh(1, 3).unwrap();
        let values = cache.evaluate_derivative(&cube, &d3).unwrap().borrow().values.clone();
        assert_close(&values, &[6.0], 1e-4);
    }

    #[test]
    fn mesh_finite_difference_needs_an_element_location() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(1).unwrap();
        let root = module.create_sqrt(&xi).unwrap();
        let cache = module.create_field_cache();
        let d2 = FieldDerivative::mesh(1, 2).unwrap();
        cache.set_node(3, None);
        let err = cache.evaluate_derivative(&root, &d2).unwrap_err();
        assert!(matches!(err.root_cause(), FieldError::LocationUnsupported(_)));
        cache.set_mesh_location(1, &[0.5, 0.5]);
        let err = cache.evaluate_derivative(&root, &d2).unwrap_err();
        assert!(matches!(err.root_cause(), FieldError::DerivativeMismatch(_)));
    }
}
