use serde::{Deserialize, Serialize};

/// Perturbations used by central finite differences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FiniteDifferenceSettings {
    /// Step applied to element xi coordinates.
    pub mesh_delta: f64,
    /// Step applied to free parameters.
    pub parameter_delta: f64,
}

impl Default for FiniteDifferenceSettings {
    fn default() -> Self {
        Self {
            mesh_delta: 1e-5,
            parameter_delta: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EigenSettings {
    /// Absolute tolerance of the symmetry check; larger asymmetry logs a warning.
    pub symmetry_tolerance: f64,
    /// Maximum number of Jacobi sweeps before giving up.
    pub max_sweeps: usize,
}

impl Default for EigenSettings {
    fn default() -> Self {
        Self {
            symmetry_tolerance: 1e-6,
            max_sweeps: 50,
        }
    }
}

/// Newton iteration controls for mesh location searches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
    /// Slack allowed outside the unit element when accepting a converged xi.
    pub xi_tolerance: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
            xi_tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub finite_difference: FiniteDifferenceSettings,
    pub eigen: EigenSettings,
    /// Pivot magnitude below which LU decomposition reports a singular matrix.
    pub singular_tolerance: f64,
    pub search: SearchSettings,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            finite_difference: FiniteDifferenceSettings::default(),
            eigen: EigenSettings::default(),
            singular_tolerance: 1e-12,
            search: SearchSettings::default(),
        }
    }
}

impl EvaluationSettings {
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::FieldError;
        let fd = &self.finite_difference;
        if !(fd.mesh_delta > 0.0) || !(fd.parameter_delta > 0.0) {
            return Err(FieldError::InvalidArgument(
                "finite difference deltas must be positive".into(),
            ));
        }
        if self.eigen.max_sweeps == 0 {
            return Err(FieldError::InvalidArgument(
                "max_sweeps must be greater than zero".into(),
            ));
        }
        if self.singular_tolerance < 0.0 || self.eigen.symmetry_tolerance < 0.0 {
            return Err(FieldError::InvalidArgument(
                "tolerances must not be negative".into(),
            ));
        }
        let search = &self.search;
        if search.max_steps == 0 || !(search.damping > 0.0) || !(search.tolerance > 0.0) {
            return Err(FieldError::InvalidArgument(
                "search requires positive max_steps, damping and tolerance".into(),
            ));
        }
        Ok(())
    }
}
