//! Inverse evaluation in space: find the mesh location where a field takes given values.

use crate::derivative::FieldDerivative;
use crate::error::{FieldError, Result};
use crate::field::Field;
use crate::field_cache::FieldCache;
use crate::location::{Mesh, MeshLocation};
use crate::module::FieldModule;
use crate::settings::SearchSettings;
use log::trace;
use nalgebra::{DMatrix, DVector};

/// Inverts the field's own operator when it can, otherwise searches element by element.
pub(crate) fn find_mesh_location(
    field: &Field,
    cache: &FieldCache,
    values: &[f64],
    mesh: &Mesh,
) -> Result<MeshLocation> {
    if values.len() != field.component_count() {
        return Err(FieldError::ComponentMismatch {
            context: format!("mesh location search on {}", field.name()),
            expected: field.component_count(),
            actual: values.len(),
        });
    }
    match field
        .operator()
        .propagate_find_mesh_location(field, cache, values, mesh)
    {
        Err(FieldError::NotSupported { .. }) => newton_search(field, cache, values, mesh),
        result => result,
    }
}

fn newton_search(
    field: &Field,
    cache: &FieldCache,
    values: &[f64],
    mesh: &Mesh,
) -> Result<MeshLocation> {
    let derivative = FieldDerivative::mesh(mesh.dimension, 1)?;
    let working = cache.create_working_cache();
    let settings = cache.settings().search;
    for &element in &mesh.elements {
        match solve_in_element(field, &working, &derivative, element, values, mesh, &settings) {
            Ok(Some(xi)) => return Ok(MeshLocation::new(element, xi)),
            Ok(None) => trace!("{} does not reach the values in element {element}", field.name()),
            Err(err) => trace!("skipping element {element} for {}: {err}", field.name()),
        }
    }
    Err(FieldError::NotFound(field.name()))
}

fn solve_in_element(
    field: &Field,
    working: &FieldCache,
    derivative: &FieldDerivative,
    element: usize,
    values: &[f64],
    mesh: &Mesh,
    settings: &SearchSettings,
) -> Result<Option<Vec<f64>>> {
    let dimension = mesh.dimension;
    let components = field.component_count();
    let mut xi = vec![0.5; dimension];
    for _ in 0..settings.max_steps {
        working.set_mesh_location(element, &xi);
        let current = working.evaluate(field)?.borrow().values.clone();
        let residual: Vec<f64> = current.iter().zip(values).map(|(c, v)| c - v).collect();
        let residual_norm = residual.iter().map(|r| r * r).sum::<f64>().sqrt();
        if residual_norm <= settings.tolerance {
            if !mesh.contains_xi(&xi, settings.xi_tolerance) {
                return Ok(None);
            }
            return Ok(Some(xi.iter().map(|x| x.clamp(0.0, 1.0)).collect()));
        }

        let jacobian = working.evaluate_derivative(field, derivative)?;
        let jacobian = DMatrix::from_row_slice(components, dimension, &jacobian.borrow().values);
        let step = jacobian
            .svd(true, true)
            .solve(&DVector::from_vec(residual), 1e-14)
            .map_err(|message| FieldError::numeric(field.name(), message))?;
        for (x, dx) in xi.iter_mut().zip(step.iter()) {
            *x -= settings.damping * dx;
        }
    }
    Ok(None)
}

impl FieldModule {
    /// Finds the location in `mesh` where `field` evaluates to `values`.
    pub fn find_mesh_location(
        &self,
        field: &Field,
        cache: &FieldCache,
        values: &[f64],
        mesh: &Mesh,
    ) -> Result<MeshLocation> {
        self.check_source(field)?;
        find_mesh_location(field, cache, values, mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newton_search_inverts_non_linear_fields() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        let square = module.create_multiply_components(&xi, &xi).unwrap();
        let cache = module.create_field_cache();
        let mesh = Mesh::new(2, vec![4, 5]);
        let found = module
            .find_mesh_location(&square, &cache, &[0.09, 0.49], &mesh)
            .unwrap();
        assert_eq!(found.element, 4);
        assert!((found.xi[0] - 0.3).abs() < 1e-8, "got {found:?}");
        assert!((found.xi[1] - 0.7).abs() < 1e-8, "got {found:?}");
    }

    #[test]
    fn reports_values_outside_the_mesh() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(1).unwrap();
        let exp = module.create_exp(&xi).unwrap();
        let cache = module.create_field_cache();
        let mesh = Mesh::new(1, vec![1]);
        let err = module
            .find_mesh_location(&exp, &cache, &[10.0], &mesh)
            .unwrap_err();
        assert!(matches!(err, FieldError::NotFound(_)), "got {err}");
        assert!(matches!(
            module.find_mesh_location(&exp, &cache, &[1.0, 2.0], &mesh),
            Err(FieldError::ComponentMismatch { .. })
        ));
    }

    #[test]
    fn search_leaves_the_callers_location_untouched() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(1).unwrap();
        let exp = module.create_exp(&xi).unwrap();
        let cache = module.create_field_cache();
        cache.set_mesh_location(3, &[0.1]);
        let mesh = Mesh::new(1, vec![3]);
        let target = 0.4_f64.exp();
        let found = module.find_mesh_location(&exp, &cache, &[target], &mesh).unwrap();
        assert!((found.xi[0] - 0.4).abs() < 1e-8);
        assert_eq!(cache.mesh_location(), Some(MeshLocation::new(3, vec![0.1])));
    }
}
