//! Leaf fields: values supplied directly by the location, by the field itself or by an
//! external provider such as a mesh interpolation layer.

use crate::derivative::FieldDerivative;
use crate::error::{AssignmentResult, FieldError, Result};
use crate::field::{Field, FieldKind};
use crate::field_cache::FieldCache;
use crate::location::{Location, Mesh, MeshLocation};
use crate::module::FieldModule;
use crate::propagation;
use crate::traits::FieldOperator;
use crate::value_cache::{DerivativeValueCache, ValueCache};
use log::debug;
use std::any::Any;

fn write_identity(out: &mut DerivativeValueCache, n: usize) {
    out.zero_values();
    for i in 0..n {
        out.values[i * n + i] = 1.0;
    }
}

pub struct ConstantOperator;

impl FieldOperator for ConstantOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Constant
    }

    fn evaluate(&self, field: &Field, _cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        field.with_scalar_parameters(|constants| values.values.copy_from_slice(constants));
        Ok(())
    }

    fn derivative_tree_order(&self, _field: &Field, _derivative: &FieldDerivative) -> usize {
        0
    }

    fn assign(&self, field: &Field, _cache: &FieldCache, values: &[f64]) -> AssignmentResult {
        match field.set_scalar_parameters(values) {
            Ok(()) => AssignmentResult::AllValuesSet,
            Err(err) => {
                debug!("assigning {}: {err}", field.name());
                AssignmentResult::Fail
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Element xi coordinates of the bound location.
pub struct XiCoordinatesOperator {
    dimension: usize,
}

impl XiCoordinatesOperator {
    fn location(&self, cache: &FieldCache) -> Result<MeshLocation> {
        let location = match cache.location() {
            Location::None => return Err(FieldError::NoLocation),
            Location::Node { host: None, node } => {
                return Err(FieldError::LocationUnsupported(format!(
                    "node {node} has no host element for xi coordinates"
                )))
            }
            Location::Node {
                host: Some(host), ..
            } => host,
            Location::Mesh(location) => location,
        };
        if location.dimension() != self.dimension {
            return Err(FieldError::LocationUnsupported(format!(
                "{}-D xi coordinates at a {}-D element location",
                self.dimension,
                location.dimension()
            )));
        }
        Ok(location)
    }
}

impl FieldOperator for XiCoordinatesOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::XiCoordinates
    }

    fn evaluate(&self, _field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let location = self.location(cache)?;
        values.values.copy_from_slice(&location.xi);
        Ok(())
    }

    fn evaluate_derivative(
        &self,
        _field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        if derivative.mesh_order() == 1 && derivative.parameter_order() == 0 {
            if derivative.mesh_dimension() != self.dimension {
                return Err(FieldError::DerivativeMismatch(format!(
                    "{}-D derivative of {}-D xi coordinates",
                    derivative.mesh_dimension(),
                    self.dimension
                )));
            }
            self.location(cache)?;
            write_identity(out, self.dimension);
        } else {
            out.zero_values();
        }
        Ok(())
    }

    fn derivative_tree_order(&self, _field: &Field, derivative: &FieldDerivative) -> usize {
        usize::from(derivative.mesh_order() > 0)
    }

    fn propagate_find_mesh_location(
        &self,
        field: &Field,
        cache: &FieldCache,
        values: &[f64],
        mesh: &Mesh,
    ) -> Result<MeshLocation> {
        let tolerance = cache.settings().search.xi_tolerance;
        match mesh.elements.first() {
            Some(&element) if mesh.dimension == self.dimension && mesh.contains_xi(values, tolerance) => {
                let xi = values.iter().map(|x| x.clamp(0.0, 1.0)).collect::<Vec<_>>();
                Ok(MeshLocation::new(element, xi))
            }
            _ => Err(FieldError::NotFound(field.name())),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TimeOperator;

impl FieldOperator for TimeOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Time
    }

    fn evaluate(&self, _field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        values.values[0] = cache.time();
        Ok(())
    }

    fn derivative_tree_order(&self, _field: &Field, _derivative: &FieldDerivative) -> usize {
        0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Free parameters that derivatives can be taken with respect to.
pub struct ParametersOperator;

impl FieldOperator for ParametersOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Parameters
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        field.with_scalar_parameters(|parameters| {
            for (i, (value, parameter)) in values.values.iter_mut().zip(parameters).enumerate() {
                *value = parameter + cache.parameter_perturbation(field.id(), i);
            }
        });
        Ok(())
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        _cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        if derivative.mesh_order() == 0
            && derivative.parameter_order() == 1
            && derivative.is_with_respect_to(field.id())
        {
            write_identity(out, field.component_count());
        } else {
            out.zero_values();
        }
        Ok(())
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        usize::from(derivative.parameter_order() > 0 && derivative.is_with_respect_to(field.id()))
    }

    fn assign(&self, field: &Field, _cache: &FieldCache, values: &[f64]) -> AssignmentResult {
        match field.set_scalar_parameters(values) {
            Ok(()) => AssignmentResult::AllValuesSet,
            Err(err) => {
                debug!("assigning {}: {err}", field.name());
                AssignmentResult::Fail
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Values supplied by an outside layer, e.g. interpolated nodal coordinates.
///
/// Only `component_count` and `evaluate` are required. Derivatives the provider does not
/// supply are computed by finite differences.
pub trait ExternalSource: Send + Sync {
    fn component_count(&self) -> usize;

    fn evaluate(&self, location: &Location, time: f64, values: &mut [f64]) -> Result<()>;

    fn has_derivative(&self, _derivative: &FieldDerivative) -> bool {
        false
    }

    fn evaluate_derivative(
        &self,
        _location: &Location,
        _time: f64,
        _derivative: &FieldDerivative,
        _values: &mut [f64],
    ) -> Result<()> {
        Err(FieldError::not_supported("external source", "analytic derivative"))
    }

    fn derivative_tree_order(&self, derivative: &FieldDerivative) -> usize {
        derivative.total_order()
    }

    fn assign(&self, _location: &Location, _time: f64, _values: &[f64]) -> AssignmentResult {
        AssignmentResult::Fail
    }

    fn supports_find_mesh_location(&self) -> bool {
        false
    }

    fn find_mesh_location(&self, _values: &[f64], _mesh: &Mesh) -> Option<MeshLocation> {
        None
    }
}

pub struct ExternalOperator {
    source: Box<dyn ExternalSource>,
}

impl FieldOperator for ExternalOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::External
    }

    fn evaluate(&self, _field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        self.source
            .evaluate(&cache.location(), cache.time(), &mut values.values)
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        if self.source.has_derivative(derivative) {
            self.source.evaluate_derivative(
                &cache.location(),
                cache.time(),
                derivative,
                &mut out.values,
            )
        } else {
            propagation::finite_difference(field, cache, derivative, out)
        }
    }

    fn derivative_tree_order(&self, _field: &Field, derivative: &FieldDerivative) -> usize {
        self.source.derivative_tree_order(derivative)
    }

    fn assign(&self, field: &Field, cache: &FieldCache, values: &[f64]) -> AssignmentResult {
        let result = self.source.assign(&cache.location(), cache.time(), values);
        if result.is_success() {
            field.notify_changed();
        }
        result
    }

    fn propagate_find_mesh_location(
        &self,
        field: &Field,
        _cache: &FieldCache,
        values: &[f64],
        mesh: &Mesh,
    ) -> Result<MeshLocation> {
        if !self.source.supports_find_mesh_location() {
            return Err(FieldError::not_supported(field.name(), "find mesh location"));
        }
        self.source
            .find_mesh_location(values, mesh)
            .ok_or_else(|| FieldError::NotFound(field.name()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl FieldModule {
    pub fn create_constant(&self, values: &[f64]) -> Result<Field> {
        self.create_field(values.len(), Vec::new(), values.to_vec(), ConstantOperator)
    }

    pub fn create_xi_coordinates(&self, dimension: usize) -> Result<Field> {
        if dimension == 0 || dimension > 3 {
            return Err(FieldError::InvalidArgument(format!(
                "xi coordinates need 1 to 3 dimensions, got {dimension}"
            )));
        }
        self.create_field(
            dimension,
            Vec::new(),
            Vec::new(),
            XiCoordinatesOperator { dimension },
        )
    }

    pub fn create_time(&self) -> Result<Field> {
        self.create_field(1, Vec::new(), Vec::new(), TimeOperator)
    }

    pub fn create_parameters(&self, values: &[f64]) -> Result<Field> {
        self.create_field(values.len(), Vec::new(), values.to_vec(), ParametersOperator)
    }

    pub fn create_external(&self, source: Box<dyn ExternalSource>) -> Result<Field> {
        let component_count = source.component_count();
        self.create_field(component_count, Vec::new(), Vec::new(), ExternalOperator { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssignmentResult;

    #[test]
    fn xi_coordinates_read_the_element_location() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        let cache = module.create_field_cache();
        cache.set_node(5, Some(MeshLocation::new(2, vec![0.1, 0.9])));
        assert_eq!(module.evaluate_real(&xi, &cache).unwrap(), vec![0.1, 0.9]);
        cache.set_node(5, None);
        assert!(module.evaluate_real(&xi, &cache).is_err());

        cache.set_mesh_location(2, &[0.2, 0.3]);
        let d = FieldDerivative::mesh(2, 1).unwrap();
        assert_eq!(
            module.evaluate_derivative_real(&xi, &cache, &d).unwrap(),
            vec![1.0, 0.0, 0.0, 1.0]
        );
        let d2 = FieldDerivative::mesh(2, 2).unwrap();
        assert_eq!(
            module.evaluate_derivative_real(&xi, &cache, &d2).unwrap(),
            vec![0.0; 8]
        );
    }

    #[test]
    fn parameters_are_perturbed_and_differentiated() {
        let module = FieldModule::new();
        let p = module.create_parameters(&[1.0, 2.0]).unwrap();
        let other = module.create_parameters(&[0.0]).unwrap();
        let cache = module.create_field_cache();
        let d = FieldDerivative::parameters(&p, 1).unwrap();
        assert_eq!(
            module.evaluate_derivative_real(&p, &cache, &d).unwrap(),
            vec![1.0, 0.0, 0.0, 1.0]
        );
        let d_other = FieldDerivative::parameters(&other, 1).unwrap();
        assert_eq!(p.derivative_tree_order(&d_other), 0);
        assert_eq!(
            module.evaluate_derivative_real(&p, &cache, &d_other).unwrap(),
            vec![0.0, 0.0]
        );

        assert_eq!(cache.assign(&p, &[3.0, 4.0]), AssignmentResult::AllValuesSet);
        assert_eq!(p.scalar_parameters(), vec![3.0, 4.0]);
    }

    #[test]
    fn time_and_constants_have_zero_derivatives() {
        let module = FieldModule::new();
        let time = module.create_time().unwrap();
        let constant = module.create_constant(&[1.5]).unwrap();
        let cache = module.create_field_cache();
        cache.set_time(2.5);
        assert_eq!(module.evaluate_real(&time, &cache).unwrap(), vec![2.5]);
        cache.set_mesh_location(1, &[0.5]);
        let d = FieldDerivative::mesh(1, 1).unwrap();
        assert_eq!(module.evaluate_derivative_real(&time, &cache, &d).unwrap(), vec![0.0]);
        assert_eq!(module.evaluate_derivative_real(&constant, &cache, &d).unwrap(), vec![0.0]);
        assert_eq!(cache.assign(&constant, &[4.0]), AssignmentResult::AllValuesSet);
        assert_eq!(module.evaluate_real(&constant, &cache).unwrap(), vec![4.0]);
    }

    #[test]
    fn xi_coordinates_invert_directly() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        let cache = module.create_field_cache();
        let mesh = Mesh::new(2, vec![11, 12]);
        let found = module
            .find_mesh_location(&xi, &cache, &[0.25, 0.75], &mesh)
            .unwrap();
        assert_eq!(found, MeshLocation::new(11, vec![0.25, 0.75]));
        assert!(module
            .find_mesh_location(&xi, &cache, &[1.5, 0.75], &mesh)
            .is_err());
    }

    struct LinearProvider;

    impl ExternalSource for LinearProvider {
        fn component_count(&self) -> usize {
            1
        }

        fn evaluate(&self, location: &Location, time: f64, values: &mut [f64]) -> Result<()> {
            let xi = &location.mesh_location().ok_or(FieldError::NoLocation)?.xi;
            values[0] = 2.0 * xi[0] + time;
            Ok(())
        }
    }

    #[test]
    fn external_sources_fall_back_to_finite_differences() {
        let module = FieldModule::new();
        let field = module.create_external(Box::new(LinearProvider)).unwrap();
        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.5]);
        cache.set_time(1.0);
        assert_eq!(module.evaluate_real(&field, &cache).unwrap(), vec![2.0]);
        let d = FieldDerivative::mesh(1, 1).unwrap();
        let derivative = module.evaluate_derivative_real(&field, &cache, &d).unwrap();
        assert!((derivative[0] - 2.0).abs() < 1e-9);
        assert_eq!(cache.assign(&field, &[1.0]), AssignmentResult::Fail);
    }
}
