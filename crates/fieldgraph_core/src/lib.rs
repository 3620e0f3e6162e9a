//! The `fieldgraph_core` crate evaluates finite-element fields built as expression graphs.
//!
//! Fields are immutable nodes owned by a [`FieldModule`]. Values and mesh or parameter
//! derivatives are computed on demand through a [`FieldCache`], which holds the evaluation
//! location and memoizes results per field.
//!
//! Key components:
//! - **Field graph**: `Field`, `FieldModule` (creation, change notification) and `FieldKind`.
//! - **Evaluation**: `FieldCache` with location, time and parameter perturbation state.
//! - **Derivatives**: `FieldDerivative` descriptors, analytic propagation and central differences.
//! - **Operators**: leaf, arithmetic, trigonometric, derivative and matrix field types.
//! - **Search**: inverse evaluation of fields to mesh locations.

pub mod autodiff;
pub mod derivative;
pub mod error;
pub mod field;
pub mod field_cache;
pub mod linalg;
pub mod location;
pub mod module;
pub mod operators;
pub(crate) mod propagation;
pub mod search;
pub mod settings;
pub mod traits;
pub mod value_cache;

pub use derivative::{Direction, FieldDerivative, ParameterDirections};
pub use error::{AssignmentResult, FieldError, Result};
pub use field::{Field, FieldId, FieldKind};
pub use field_cache::FieldCache;
pub use location::{Location, Mesh, MeshLocation, ParameterPerturbation};
pub use module::{ChangeGuard, FieldModule, FieldModuleEvent};
pub use operators::leaf::ExternalSource;
pub use operators::arithmetic::ComponentFunction;
pub use settings::EvaluationSettings;
pub use traits::{FieldOperator, Scalar};
pub use value_cache::{DerivativeValueCache, ValueCache};
