//! Derivative descriptors: which partial derivatives are requested and how they are laid out.
//!
//! A derivative buffer stores `component_count * term_count` values. Components vary
//! slowest; within one component the terms of the one-order-lower derivative vary next and
//! the outermost differentiation direction varies fastest. Parameter directions are always
//! outermost, so a mixed derivative lists mesh directions before parameter directions.

use crate::error::{FieldError, Result};
use crate::field::{Field, FieldId, FieldKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-parameter directions: one per component of a parameters field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterDirections {
    pub field: FieldId,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Mesh,
    Parameter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDerivative {
    mesh_dimension: usize,
    mesh_order: usize,
    parameters: Option<ParameterDirections>,
    parameter_order: usize,
}

impl FieldDerivative {
    /// Derivative of `order` with respect to the xi coordinates of a `dimension`-D element.
    pub fn mesh(dimension: usize, order: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(FieldError::InvalidArgument(
                "mesh derivative needs a positive element dimension".into(),
            ));
        }
        if order == 0 {
            return Err(FieldError::InvalidArgument(
                "derivative order must be at least 1".into(),
            ));
        }
        Ok(Self {
            mesh_dimension: dimension,
            mesh_order: order,
            parameters: None,
            parameter_order: 0,
        })
    }

    /// Derivative of `order` with respect to every component of a parameters field.
    pub fn parameters(field: &Field, order: usize) -> Result<Self> {
        Self::mixed(0, 0, field, order)
    }

    /// Mesh derivative of `mesh_order` followed by a parameter derivative of `parameter_order`.
    pub fn mixed(
        mesh_dimension: usize,
        mesh_order: usize,
        field: &Field,
        parameter_order: usize,
    ) -> Result<Self> {
        if field.kind() != FieldKind::Parameters {
            return Err(FieldError::WrongSourceType {
                field: field.name(),
                expected: FieldKind::Parameters.as_str(),
            });
        }
        if mesh_order > 0 && mesh_dimension == 0 {
            return Err(FieldError::InvalidArgument(
                "mesh derivative needs a positive element dimension".into(),
            ));
        }
        if mesh_order + parameter_order == 0 {
            return Err(FieldError::InvalidArgument(
                "derivative order must be at least 1".into(),
            ));
        }
        let parameters = (parameter_order > 0).then(|| ParameterDirections {
            field: field.id(),
            count: field.component_count(),
        });
        Ok(Self {
            mesh_dimension: if mesh_order > 0 { mesh_dimension } else { 0 },
            mesh_order,
            parameters,
            parameter_order,
        })
    }

    pub fn mesh_dimension(&self) -> usize {
        self.mesh_dimension
    }

    pub fn mesh_order(&self) -> usize {
        self.mesh_order
    }

    pub fn parameter_order(&self) -> usize {
        self.parameter_order
    }

    pub fn parameter_directions(&self) -> Option<ParameterDirections> {
        self.parameters
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.map_or(0, |p| p.count)
    }

    pub fn total_order(&self) -> usize {
        self.mesh_order + self.parameter_order
    }

    pub fn is_mixed(&self) -> bool {
        self.mesh_order > 0 && self.parameter_order > 0
    }

    /// Whether the derivative is with respect to the given parameters field.
    pub fn is_with_respect_to(&self, field: FieldId) -> bool {
        self.parameters.is_some_and(|p| p.field == field)
    }

    /// Number of derivative terms per component.
    pub fn term_count(&self) -> usize {
        self.mesh_dimension.pow(self.mesh_order as u32)
            * self.parameter_count().pow(self.parameter_order as u32)
    }

    pub fn outer_direction(&self) -> Direction {
        if self.parameter_order > 0 {
            Direction::Parameter
        } else {
            Direction::Mesh
        }
    }

    /// Number of directions along the outermost differentiation.
    pub fn outer_count(&self) -> usize {
        match self.outer_direction() {
            Direction::Parameter => self.parameter_count(),
            Direction::Mesh => self.mesh_dimension,
        }
    }

    /// The derivative one order lower, or `None` when that is the field value itself.
    pub fn lower(&self) -> Option<Self> {
        let mut lower = *self;
        if lower.parameter_order > 0 {
            lower.parameter_order -= 1;
            if lower.parameter_order == 0 {
                lower.parameters = None;
            }
        } else if lower.mesh_order > 0 {
            lower.mesh_order -= 1;
            if lower.mesh_order == 0 {
                lower.mesh_dimension = 0;
            }
        }
        (lower.total_order() > 0).then_some(lower)
    }

    /// First-order derivative along the outermost direction only.
    pub fn outer_first_order(&self) -> Self {
        match self.outer_direction() {
            Direction::Parameter => Self {
                mesh_dimension: 0,
                mesh_order: 0,
                parameters: self.parameters,
                parameter_order: 1,
            },
            Direction::Mesh => Self {
                mesh_dimension: self.mesh_dimension,
                mesh_order: 1,
                parameters: None,
                parameter_order: 0,
            },
        }
    }

    /// Tree order of a product whose factors have tree orders `a` and `b`.
    pub fn product_tree_order(&self, a: usize, b: usize) -> usize {
        (a + b).min(self.total_order())
    }

    /// Tree order of a non-linear function of a source with tree order `source`.
    pub fn maximum_tree_order(&self, source: usize) -> usize {
        if source == 0 {
            0
        } else {
            self.total_order()
        }
    }
}

impl fmt::Display for FieldDerivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.total_order())?;
        if self.mesh_order > 0 {
            write!(f, "/dxi{}^{}", self.mesh_dimension, self.mesh_order)?;
        }
        if let Some(parameters) = self.parameters {
            write!(
                f,
                "/dp[{}x{}]^{}",
                parameters.field, parameters.count, self.parameter_order
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::FieldModule;

    #[test]
    fn term_count_is_directions_to_the_power_of_order() {
        let module = FieldModule::new();
        let parameters = module.create_parameters(&[1.0, 2.0, 3.0]).unwrap();
        let mesh2 = FieldDerivative::mesh(2, 2).unwrap();
        assert_eq!(mesh2.term_count(), 4);
        let mixed = FieldDerivative::mixed(2, 1, &parameters, 2).unwrap();
        assert_eq!(mixed.total_order(), 3);
        assert_eq!(mixed.term_count(), 2 * 9);
        assert!(mixed.is_mixed());
        assert_eq!(mixed.outer_direction(), Direction::Parameter);
        assert_eq!(mixed.outer_count(), 3);
    }

    #[test]
    fn lowering_removes_parameter_order_first() {
        let module = FieldModule::new();
        let parameters = module.create_parameters(&[0.0, 0.0]).unwrap();
        let mixed = FieldDerivative::mixed(3, 1, &parameters, 1).unwrap();
        let lower = mixed.lower().unwrap();
        assert_eq!(lower, FieldDerivative::mesh(3, 1).unwrap());
        assert_eq!(lower.lower(), None);
        assert_eq!(
            mixed.outer_first_order(),
            FieldDerivative::parameters(&parameters, 1).unwrap()
        );
    }

    #[test]
    fn rejects_parameter_derivative_of_non_parameter_field() {
        let module = FieldModule::new();
        let constant = module.create_constant(&[1.0]).unwrap();
        let err = FieldDerivative::parameters(&constant, 1).unwrap_err();
        assert!(matches!(err, FieldError::WrongSourceType { .. }));
        assert!(FieldDerivative::mesh(0, 1).is_err());
        assert!(FieldDerivative::mesh(2, 0).is_err());
    }

    #[test]
    fn tree_order_helpers_saturate_at_total_order() {
        let d = FieldDerivative::mesh(2, 2).unwrap();
        assert_eq!(d.product_tree_order(1, 0), 1);
        assert_eq!(d.product_tree_order(2, 2), 2);
        assert_eq!(d.maximum_tree_order(0), 0);
        assert_eq!(d.maximum_tree_order(1), 2);
    }
}
