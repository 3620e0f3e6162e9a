//! The field node: a shared, immutable DAG vertex delegating numerics to its operator.

use crate::derivative::FieldDerivative;
use crate::error::{FieldError, Result};
use crate::module::{FieldModule, ModuleState};
use crate::traits::FieldOperator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Module-unique field identifier. Identifiers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u64);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Constant,
    XiCoordinates,
    Time,
    Parameters,
    External,
    Scale,
    Offset,
    EditMask,
    ClampMinimum,
    ClampMaximum,
    WeightedAdd,
    MultiplyComponents,
    DivideComponents,
    Power,
    Log,
    Sqrt,
    Exp,
    Abs,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Derivative,
    Determinant,
    Eigenvalues,
    Eigenvectors,
    MatrixInvert,
    MatrixMultiply,
    Projection,
    Transpose,
    QuaternionToMatrix,
    MatrixToQuaternion,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Constant => "constant",
            FieldKind::XiCoordinates => "xi_coordinates",
            FieldKind::Time => "time",
            FieldKind::Parameters => "parameters",
            FieldKind::External => "external",
            FieldKind::Scale => "scale",
            FieldKind::Offset => "offset",
            FieldKind::EditMask => "edit_mask",
            FieldKind::ClampMinimum => "clamp_minimum",
            FieldKind::ClampMaximum => "clamp_maximum",
            FieldKind::WeightedAdd => "weighted_add",
            FieldKind::MultiplyComponents => "multiply_components",
            FieldKind::DivideComponents => "divide_components",
            FieldKind::Power => "power",
            FieldKind::Log => "log",
            FieldKind::Sqrt => "sqrt",
            FieldKind::Exp => "exp",
            FieldKind::Abs => "abs",
            FieldKind::Sin => "sin",
            FieldKind::Cos => "cos",
            FieldKind::Tan => "tan",
            FieldKind::Asin => "asin",
            FieldKind::Acos => "acos",
            FieldKind::Atan => "atan",
            FieldKind::Atan2 => "atan2",
            FieldKind::Derivative => "derivative",
            FieldKind::Determinant => "determinant",
            FieldKind::Eigenvalues => "eigenvalues",
            FieldKind::Eigenvectors => "eigenvectors",
            FieldKind::MatrixInvert => "matrix_invert",
            FieldKind::MatrixMultiply => "matrix_multiply",
            FieldKind::Projection => "projection",
            FieldKind::Transpose => "transpose",
            FieldKind::QuaternionToMatrix => "quaternion_to_matrix",
            FieldKind::MatrixToQuaternion => "matrix_to_quaternion",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct FieldInner {
    id: FieldId,
    name: RwLock<String>,
    component_count: usize,
    sources: Vec<Field>,
    source_values: RwLock<Vec<f64>>,
    operator: Box<dyn FieldOperator>,
    module: Arc<ModuleState>,
}

/// Shared handle to a field. Cloning shares the node; the node is dropped with its last handle.
#[derive(Clone)]
pub struct Field(Arc<FieldInner>);

impl Field {
    pub(crate) fn new(
        module: Arc<ModuleState>,
        id: FieldId,
        component_count: usize,
        sources: Vec<Field>,
        source_values: Vec<f64>,
        operator: Box<dyn FieldOperator>,
    ) -> Self {
        let name = format!("{}{}", operator.kind().as_str(), id);
        Field(Arc::new(FieldInner {
            id,
            name: RwLock::new(name),
            component_count,
            sources,
            source_values: RwLock::new(source_values),
            operator,
            module,
        }))
    }

    pub fn id(&self) -> FieldId {
        self.0.id
    }

    pub fn name(&self) -> String {
        self.0
            .name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.0.name.write().unwrap_or_else(PoisonError::into_inner) = name.into();
    }

    pub fn component_count(&self) -> usize {
        self.0.component_count
    }

    pub fn sources(&self) -> &[Field] {
        &self.0.sources
    }

    pub fn source(&self, index: usize) -> Option<&Field> {
        self.0.sources.get(index)
    }

    pub fn kind(&self) -> FieldKind {
        self.0.operator.kind()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub(crate) fn operator(&self) -> &dyn FieldOperator {
        self.0.operator.as_ref()
    }

    pub(crate) fn module_state(&self) -> &Arc<ModuleState> {
        &self.0.module
    }

    pub fn module(&self) -> FieldModule {
        FieldModule::from_state(self.0.module.clone())
    }

    pub(crate) fn downgrade(&self) -> WeakField {
        WeakField(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Field) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Scalar coefficients owned by the field: factors, offsets, limits, weights or values.
    pub fn scalar_parameters(&self) -> Vec<f64> {
        self.0
            .source_values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the scalar coefficients, which must keep their count, and notifies dependants.
    pub fn set_scalar_parameters(&self, values: &[f64]) -> Result<()> {
        {
            let mut current = self
                .0
                .source_values
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if current.len() != values.len() {
                return Err(FieldError::ComponentMismatch {
                    context: format!("scalar parameters of {}", self.name()),
                    expected: current.len(),
                    actual: values.len(),
                });
            }
            current.copy_from_slice(values);
        }
        self.notify_changed();
        Ok(())
    }

    pub(crate) fn with_scalar_parameters<R>(&self, f: impl FnOnce(&[f64]) -> R) -> R {
        let values = self
            .0
            .source_values
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&values)
    }

    pub(crate) fn notify_changed(&self) {
        self.0.module.notify_change(self.id());
    }

    /// Whether this field is `other` or reaches it through its sources.
    pub fn depends_on(&self, other: &Field) -> bool {
        self.id() == other.id() || self.sources().iter().any(|s| s.depends_on(other))
    }

    /// Upper bound on the total order of non-zero partials up to `derivative`.
    pub fn derivative_tree_order(&self, derivative: &FieldDerivative) -> usize {
        self.operator().derivative_tree_order(self, derivative)
    }

    pub(crate) fn typed_operator<T: FieldOperator>(&self) -> Option<&T> {
        self.operator().as_any().downcast_ref::<T>()
    }
}

/// Non-owning reference to a field, held by caches keyed on the field.
#[derive(Clone)]
pub(crate) struct WeakField(Weak<FieldInner>);

impl WeakField {
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Field {}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("components", &self.component_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::FieldModule;

    #[test]
    fn fields_are_auto_named_after_their_type() {
        let module = FieldModule::new();
        let a = module.create_constant(&[1.0, 2.0]).unwrap();
        let b = module.create_scale(&a, &[2.0, 3.0]).unwrap();
        assert_eq!(b.name(), format!("scale{}", b.id()));
        assert_eq!(b.type_name(), "scale");
        b.set_name("stretched");
        assert_eq!(b.name(), "stretched");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn depends_on_follows_sources() {
        let module = FieldModule::new();
        let a = module.create_constant(&[1.0]).unwrap();
        let b = module.create_constant(&[2.0]).unwrap();
        let sum = module.create_add(&a, &b).unwrap();
        let scaled = module.create_scale(&sum, &[3.0]).unwrap();
        assert!(scaled.depends_on(&a));
        assert!(scaled.depends_on(&scaled));
        assert!(!a.depends_on(&scaled));
    }

    #[test]
    fn scalar_parameters_keep_their_length() {
        let module = FieldModule::new();
        let a = module.create_constant(&[1.0, 2.0]).unwrap();
        let err = a.set_scalar_parameters(&[1.0]).unwrap_err();
        assert!(matches!(err, FieldError::ComponentMismatch { expected: 2, actual: 1, .. }));
        a.set_scalar_parameters(&[5.0, 6.0]).unwrap();
        assert_eq!(a.scalar_parameters(), vec![5.0, 6.0]);
    }
}
