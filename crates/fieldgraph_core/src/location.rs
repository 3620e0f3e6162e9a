//! Domain locations that an evaluation context can be bound to.

use crate::field::FieldId;
use serde::{Deserialize, Serialize};

/// A point inside one mesh element: element identifier plus local xi coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshLocation {
    pub element: usize,
    pub xi: Vec<f64>,
}

impl MeshLocation {
    pub fn new(element: usize, xi: impl Into<Vec<f64>>) -> Self {
        Self {
            element,
            xi: xi.into(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.xi.len()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Location {
    #[default]
    None,
    Mesh(MeshLocation),
    /// A node, optionally embedded in a host element for fields that are only defined on elements.
    Node {
        node: usize,
        host: Option<MeshLocation>,
    },
}

impl Location {
    /// The element location used for mesh-dependent evaluation, if any.
    pub fn mesh_location(&self) -> Option<&MeshLocation> {
        match self {
            Location::Mesh(location) => Some(location),
            Location::Node { host, .. } => host.as_ref(),
            Location::None => None,
        }
    }

    pub fn node(&self) -> Option<usize> {
        match self {
            Location::Node { node, .. } => Some(*node),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Location::None)
    }
}

/// Offset applied to one component of a parameters field while sampling finite differences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterPerturbation {
    pub field: FieldId,
    pub index: usize,
    pub delta: f64,
}

/// Element topology handed to inverse mesh-location searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub dimension: usize,
    pub elements: Vec<usize>,
}

impl Mesh {
    pub fn new(dimension: usize, elements: impl Into<Vec<usize>>) -> Self {
        Self {
            dimension,
            elements: elements.into(),
        }
    }

    /// Whether `xi` lies within the unit element, allowing `tolerance` of slack.
    pub fn contains_xi(&self, xi: &[f64], tolerance: f64) -> bool {
        xi.len() == self.dimension
            && xi
                .iter()
                .all(|&x| x >= -tolerance && x <= 1.0 + tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_locations_expose_their_host_element() {
        let host = MeshLocation::new(3, vec![0.25, 0.5]);
        let location = Location::Node {
            node: 7,
            host: Some(host.clone()),
        };
        assert_eq!(location.mesh_location(), Some(&host));
        assert_eq!(location.node(), Some(7));
        assert!(Location::Node { node: 1, host: None }
            .mesh_location()
            .is_none());
        assert!(Location::default().is_none());
    }

    #[test]
    fn mesh_contains_xi_within_tolerance() {
        let mesh = Mesh::new(2, vec![1, 2]);
        assert!(mesh.contains_xi(&[0.0, 1.0], 0.0));
        assert!(mesh.contains_xi(&[-1e-8, 0.5], 1e-6));
        assert!(!mesh.contains_xi(&[1.1, 0.5], 1e-6));
        assert!(!mesh.contains_xi(&[0.5], 1e-6));
    }
}
