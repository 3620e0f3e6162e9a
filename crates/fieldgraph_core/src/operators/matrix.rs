//! Matrix fields. Matrices are stored row-major in the field components.

use crate::derivative::FieldDerivative;
use crate::error::{AssignmentResult, FieldError, Result};
use crate::field::{Field, FieldKind};
use crate::field_cache::FieldCache;
use crate::linalg;
use crate::module::FieldModule;
use crate::operators::{require_components, square_size};
use crate::propagation::{self, ProductShape};
use crate::traits::{binary_tree_orders, linear_tree_order, FieldOperator};
use crate::value_cache::{DerivativeValueCache, Scratch, ValueCache};
use log::{debug, error, warn};
use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion};
use std::any::Any;

fn source_values(cache: &FieldCache, field: &Field, index: usize) -> Result<Vec<f64>> {
    Ok(cache.evaluate(&field.sources()[index])?.borrow().values.clone())
}

fn missing_workspace(field: &Field) -> FieldError {
    FieldError::numeric(field.name(), "value cache has no workspace for this operator")
}

pub struct DeterminantOperator {
    n: usize,
}

impl FieldOperator for DeterminantOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Determinant
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let matrix = source_values(cache, field, 0)?;
        values.values[0] = linalg::determinant(&matrix, self.n)
            .map_err(|err| FieldError::numeric(field.name(), err.to_string()))?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Eigenvalues of a symmetric matrix in descending order. The matching eigenvectors are kept
/// in the value cache for [`EigenvectorsOperator`].
pub struct EigenvaluesOperator {
    n: usize,
}

impl FieldOperator for EigenvaluesOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Eigenvalues
    }

    fn create_value_cache(&self, _field: &Field) -> ValueCache {
        ValueCache::eigen(self.n)
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let source = source_values(cache, field, 0)?;
        let settings = cache.settings().eigen;
        if !linalg::is_symmetric(&source, self.n, settings.symmetry_tolerance) {
            warn!(
                "{}: source matrix is not symmetric, eigenvalues are approximate",
                field.name()
            );
        }
        let ValueCache {
            values: eigenvalues,
            scratch,
            ..
        } = values;
        let Scratch::Eigen { matrix, vectors } = scratch else {
            return Err(missing_workspace(field));
        };
        matrix.copy_from_slice(&source);
        linalg::jacobi_eigen(matrix, self.n, eigenvalues, vectors, settings.max_sweeps)
            .map_err(|err| FieldError::numeric(field.name(), err.to_string()))?;
        linalg::eigen_sort(eigenvalues, vectors, self.n);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Eigenvectors of an eigenvalues field, one per row, in the order of the eigenvalues.
pub struct EigenvectorsOperator {
    n: usize,
}

impl FieldOperator for EigenvectorsOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Eigenvectors
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let source = cache.evaluate(&field.sources()[0])?;
        let source = source.borrow();
        let vectors = source
            .eigenvectors()
            .ok_or_else(|| missing_workspace(field))?;
        let n = self.n;
        for i in 0..n {
            for j in 0..n {
                values.values[i * n + j] = vectors[j * n + i];
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MatrixInvertOperator {
    n: usize,
}

impl FieldOperator for MatrixInvertOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::MatrixInvert
    }

    fn create_value_cache(&self, _field: &Field) -> ValueCache {
        ValueCache::invert(self.n)
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let source = source_values(cache, field, 0)?;
        let n = self.n;
        let ValueCache {
            values: inverse,
            scratch,
            ..
        } = values;
        let Scratch::Invert { lu, pivots, work } = scratch else {
            return Err(missing_workspace(field));
        };
        lu.copy_from_slice(&source);
        if let Err(err) = linalg::lu_decompose(lu, n, pivots, cache.settings().singular_tolerance) {
            error!("{}: {err}", field.name());
            return Err(FieldError::SingularMatrix(field.name()));
        }
        for j in 0..n {
            work.iter_mut().for_each(|w| *w = 0.0);
            work[j] = 1.0;
            linalg::lu_back_substitute(lu, n, pivots, work);
            for i in 0..n {
                inverse[i * n + j] = work[i];
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// (m x s) times (s x n) matrix product.
pub struct MatrixMultiplyOperator {
    rows: usize,
    inner: usize,
    columns: usize,
}

impl MatrixMultiplyOperator {
    fn shape(&self) -> ProductShape {
        ProductShape::Matrix {
            m: self.rows,
            s: self.inner,
            n: self.columns,
        }
    }
}

impl FieldOperator for MatrixMultiplyOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::MatrixMultiply
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let a = source_values(cache, field, 0)?;
        let b = source_values(cache, field, 1)?;
        self.shape().apply(&a, &b, &mut values.values);
        Ok(())
    }

    fn evaluate_derivative(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
        out: &mut DerivativeValueCache,
    ) -> Result<()> {
        propagation::product_derivative(field, cache, derivative, self.shape(), out)
    }

    fn derivative_tree_order(&self, field: &Field, derivative: &FieldDerivative) -> usize {
        let (a, b) = binary_tree_orders(field, derivative);
        derivative.product_tree_order(a, b)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Homogeneous transform of a c-vector by a (rows x (c+1)) matrix, with perspective divide.
pub struct ProjectionOperator {
    vector_size: usize,
    rows: usize,
}

impl ProjectionOperator {
    fn inverse(&self, matrix: &[f64], values: &[f64], tolerance: f64) -> Option<Vec<f64>> {
        let n = self.rows;
        let mut lu = matrix.to_vec();
        let mut pivots = vec![0; n];
        if let Err(err) = linalg::lu_decompose(&mut lu, n, &mut pivots, tolerance) {
            debug!("projection matrix cannot be inverted: {err}");
            return None;
        }
        let mut rhs = values.to_vec();
        rhs.push(1.0);
        linalg::lu_back_substitute(&lu, n, &pivots, &mut rhs);
        let w = rhs[n - 1];
        (w != 0.0).then(|| rhs[..n - 1].iter().map(|r| r / w).collect())
    }
}

impl FieldOperator for ProjectionOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Projection
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let vector = source_values(cache, field, 0)?;
        let matrix = source_values(cache, field, 1)?;
        let columns = self.vector_size + 1;
        let transformed: Vec<f64> = (0..self.rows)
            .map(|r| {
                let row = &matrix[r * columns..(r + 1) * columns];
                row[..self.vector_size]
                    .iter()
                    .zip(&vector)
                    .map(|(m, v)| m * v)
                    .sum::<f64>()
                    + row[self.vector_size]
            })
            .collect();
        let perspective = transformed[self.rows - 1];
        if perspective == 0.0 {
            return Err(FieldError::numeric(field.name(), "zero perspective value"));
        }
        for (value, t) in values.values.iter_mut().zip(&transformed) {
            *value = t / perspective;
        }
        Ok(())
    }

    fn assign(&self, field: &Field, cache: &FieldCache, values: &[f64]) -> AssignmentResult {
        if self.vector_size != 3 || self.rows != 4 {
            debug!("{}: inverse projection needs a 3-vector and 4x4 matrix", field.name());
            return AssignmentResult::Fail;
        }
        let matrix = match source_values(cache, field, 1) {
            Ok(matrix) => matrix,
            Err(err) => {
                debug!("cannot assign {}: {err}", field.name());
                return AssignmentResult::Fail;
            }
        };
        match self.inverse(&matrix, values, cache.settings().singular_tolerance) {
            Some(source) => {
                AssignmentResult::AllValuesSet.then(cache.assign(&field.sources()[0], &source))
            }
            None => AssignmentResult::Fail,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Transpose of a (rows x columns) source into (columns x rows).
pub struct TransposeOperator {
    source_rows: usize,
    source_columns: usize,
}

impl FieldOperator for TransposeOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::Transpose
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let source = source_values(cache, field, 0)?;
        let (m, n) = (self.source_rows, self.source_columns);
        for i in 0..n {
            for j in 0..m {
                values.values[i * m + j] = source[j * n + i];
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
        let source = cache.evaluate_derivative(&field.sources()[0], derivative)?;
        let source = source.borrow();
        let (m, n) = (self.source_rows, self.source_columns);
        let terms = derivative.term_count();
        for i in 0..n {
            for j in 0..m {
                let (to, from) = ((i * m + j) * terms, (j * n + i) * terms);
                out.values[to..to + terms].copy_from_slice(&source.values[from..from + terms]);
            }
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

/// Quaternion (w, x, y, z) to a 4x4 homogeneous rotation matrix.
pub struct QuaternionToMatrixOperator;

impl FieldOperator for QuaternionToMatrixOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::QuaternionToMatrix
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let q = source_values(cache, field, 0)?;
        let quaternion = Quaternion::new(q[0], q[1], q[2], q[3]);
        if quaternion.norm() == 0.0 {
            return Err(FieldError::numeric(field.name(), "zero quaternion"));
        }
        let rotation = UnitQuaternion::from_quaternion(quaternion).to_rotation_matrix();
        let matrix = rotation.matrix();
        values.values.iter_mut().for_each(|v| *v = 0.0);
        for i in 0..3 {
            for j in 0..3 {
                values.values[i * 4 + j] = matrix[(i, j)];
            }
        }
        values.values[15] = 1.0;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Nearest unit quaternion (w, x, y, z), with w >= 0, to the rotation part of a 4x4 matrix.
pub struct MatrixToQuaternionOperator;

impl FieldOperator for MatrixToQuaternionOperator {
    fn kind(&self) -> FieldKind {
        FieldKind::MatrixToQuaternion
    }

    fn evaluate(&self, field: &Field, cache: &FieldCache, values: &mut ValueCache) -> Result<()> {
        let m = source_values(cache, field, 0)?;
        let upper = Matrix3::new(m[0], m[1], m[2], m[4], m[5], m[6], m[8], m[9], m[10]);
        if !upper.iter().all(|v| v.is_finite()) {
            return Err(FieldError::numeric(field.name(), "matrix is not finite"));
        }
        let rotation = Rotation3::from_matrix(&upper);
        let q = UnitQuaternion::from_rotation_matrix(&rotation).into_inner();
        let sign = if q.w < 0.0 { -1.0 } else { 1.0 };
        values
            .values
            .copy_from_slice(&[sign * q.w, sign * q.i, sign * q.j, sign * q.k]);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn require_square(field: &Field) -> Result<usize> {
    square_size(field.component_count()).ok_or_else(|| FieldError::NotSquareMatrix(field.name()))
}

impl FieldModule {
    pub fn create_determinant(&self, source: &Field) -> Result<Field> {
        let n = require_square(source)?;
        if n > 3 {
            return Err(FieldError::InvalidArgument(format!(
                "determinant supports up to 3x3 matrices, {} is {n}x{n}",
                source.name()
            )));
        }
        self.create_field(1, vec![source.clone()], Vec::new(), DeterminantOperator { n })
    }

    pub fn create_eigenvalues(&self, source: &Field) -> Result<Field> {
        let n = require_square(source)?;
        self.create_field(n, vec![source.clone()], Vec::new(), EigenvaluesOperator { n })
    }

    pub fn create_eigenvectors(&self, eigenvalues: &Field) -> Result<Field> {
        if eigenvalues.kind() != FieldKind::Eigenvalues {
            return Err(FieldError::WrongSourceType {
                field: eigenvalues.name(),
                expected: FieldKind::Eigenvalues.as_str(),
            });
        }
        let n = eigenvalues.component_count();
        self.create_field(
            n * n,
            vec![eigenvalues.clone()],
            Vec::new(),
            EigenvectorsOperator { n },
        )
    }

    pub fn create_matrix_invert(&self, source: &Field) -> Result<Field> {
        let n = require_square(source)?;
        self.create_field(n * n, vec![source.clone()], Vec::new(), MatrixInvertOperator { n })
    }

    /// Product of `a` with `rows` rows and `b`; inner and column counts follow from the sizes.
    pub fn create_matrix_multiply(&self, rows: usize, a: &Field, b: &Field) -> Result<Field> {
        if rows == 0 || a.component_count() % rows != 0 {
            return Err(FieldError::IncompatibleShapes(format!(
                "{} components of {} do not form {rows} rows",
                a.component_count(),
                a.name()
            )));
        }
        let inner = a.component_count() / rows;
        if b.component_count() % inner != 0 {
            return Err(FieldError::IncompatibleShapes(format!(
                "{} has {} components, not a multiple of the {inner} columns of {}",
                b.name(),
                b.component_count(),
                a.name()
            )));
        }
        let columns = b.component_count() / inner;
        self.create_field(
            rows * columns,
            vec![a.clone(), b.clone()],
            Vec::new(),
            MatrixMultiplyOperator {
                rows,
                inner,
                columns,
            },
        )
    }

    pub fn create_projection(&self, vector: &Field, matrix: &Field) -> Result<Field> {
        let columns = vector.component_count() + 1;
        let rows = matrix.component_count() / columns;
        if matrix.component_count() % columns != 0 || rows < 2 {
            return Err(FieldError::IncompatibleShapes(format!(
                "projection matrix {} with {} components does not have {columns} columns",
                matrix.name(),
                matrix.component_count()
            )));
        }
        self.create_field(
            rows - 1,
            vec![vector.clone(), matrix.clone()],
            Vec::new(),
            ProjectionOperator {
                vector_size: vector.component_count(),
                rows,
            },
        )
    }

    /// Transpose of `source` read as a matrix with `source_rows` rows.
    pub fn create_transpose(&self, source_rows: usize, source: &Field) -> Result<Field> {
        if source_rows == 0 || source.component_count() % source_rows != 0 {
            return Err(FieldError::IncompatibleShapes(format!(
                "{} components of {} do not form {source_rows} rows",
                source.component_count(),
                source.name()
            )));
        }
        self.create_field(
            source.component_count(),
            vec![source.clone()],
            Vec::new(),
            TransposeOperator {
                source_rows,
                source_columns: source.component_count() / source_rows,
            },
        )
    }

    pub fn create_quaternion_to_matrix(&self, quaternion: &Field) -> Result<Field> {
        require_components(quaternion, 4, "quaternion to matrix")?;
        self.create_field(16, vec![quaternion.clone()], Vec::new(), QuaternionToMatrixOperator)
    }

    pub fn create_matrix_to_quaternion(&self, matrix: &Field) -> Result<Field> {
        require_components(matrix, 16, "matrix to quaternion")?;
        self.create_field(4, vec![matrix.clone()], Vec::new(), MatrixToQuaternionOperator)
    }
}

impl Field {
    pub fn matrix_multiply_number_of_rows(&self) -> Result<usize> {
        self.typed_operator::<MatrixMultiplyOperator>()
            .map(|operator| operator.rows)
            .ok_or_else(|| FieldError::WrongSourceType {
                field: self.name(),
                expected: FieldKind::MatrixMultiply.as_str(),
            })
    }

    pub fn transpose_source_number_of_rows(&self) -> Result<usize> {
        self.typed_operator::<TransposeOperator>()
            .map(|operator| operator.source_rows)
            .ok_or_else(|| FieldError::WrongSourceType {
                field: self.name(),
                expected: FieldKind::Transpose.as_str(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EvaluationSettings;
    use test_log::test;

    fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
        assert_eq!(actual.len(), expected.len(), "got {actual:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() <= tolerance, "got {actual:?}, expected {expected:?}");
        }
    }

    fn identity(n: usize) -> Vec<f64> {
        (0..n * n)
            .map(|k| if k / n == k % n { 1.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn determinant_matches_cofactor_expansion() {
        let module = FieldModule::new();
        let cache = module.create_field_cache();
        let cases: [(&[f64], f64); 3] = [
            (&[-2.5], -2.5),
            (&[3.0, 1.0, 4.0, 2.0], 2.0),
            (&[2.0, 0.0, 1.0, 1.0, 3.0, 2.0, 1.0, 1.0, 2.0], 6.0),
        ];
        for (matrix, expected) in cases {
            let a = module.create_constant(matrix).unwrap();
            let det = module.create_determinant(&a).unwrap();
            assert_close(&module.evaluate_real(&det, &cache).unwrap(), &[expected], 1e-12);
        }
    }

    #[test]
    fn matrix_times_inverse_is_identity() {
        let module = FieldModule::new();
        let a = module
            .create_constant(&[4.0, 7.0, 2.0, 3.0, 6.0, 1.0, 2.0, 5.0, 3.0])
            .unwrap();
        let inverse = module.create_matrix_invert(&a).unwrap();
        let product = module.create_matrix_multiply(3, &a, &inverse).unwrap();
        let cache = module.create_field_cache();
        assert_close(&module.evaluate_real(&product, &cache).unwrap(), &identity(3), 1e-12);
    }

    #[test]
    fn singular_inverse_fails_evaluation() {
        let module = FieldModule::new();
        let a = module.create_constant(&[1.0, 2.0, 2.0, 4.0]).unwrap();
        let inverse = module.create_matrix_invert(&a).unwrap();
        let cache = module.create_field_cache();
        let err = cache.evaluate(&inverse).unwrap_err();
        assert_eq!(err.root_cause(), &FieldError::SingularMatrix(inverse.name()));
    }

    #[test]
    fn double_transpose_is_exact() {
        let module = FieldModule::new();
        let values = [0.1, 0.2, 0.3, 1.0 / 3.0, 1e-17, -7.25];
        let a = module.create_constant(&values).unwrap();
        let t = module.create_transpose(2, &a).unwrap();
        let tt = module.create_transpose(3, &t).unwrap();
        let cache = module.create_field_cache();
        assert_eq!(
            module.evaluate_real(&t, &cache).unwrap(),
            vec![0.1, 1.0 / 3.0, 0.2, 1e-17, 0.3, -7.25]
        );
        assert_eq!(module.evaluate_real(&tt, &cache).unwrap(), values.to_vec());
        assert_eq!(t.transpose_source_number_of_rows().unwrap(), 2);
    }

    #[test]
    fn symmetric_eigen_decomposition_reconstructs_matrix() {
        let module = FieldModule::new();
        let a_values = [2.0, -1.0, 0.0, -1.0, 2.0, -1.0, 0.0, -1.0, 2.0];
        let a = module.create_constant(&a_values).unwrap();
        let eigenvalues = module.create_eigenvalues(&a).unwrap();
        let eigenvectors = module.create_eigenvectors(&eigenvalues).unwrap();
        let cache = module.create_field_cache();
        let lambda = module.evaluate_real(&eigenvalues, &cache).unwrap();
        let e = module.evaluate_real(&eigenvectors, &cache).unwrap();

        assert!(lambda[0] >= lambda[1] && lambda[1] >= lambda[2], "{lambda:?}");
        let sqrt2 = 2.0_f64.sqrt();
        assert_close(&lambda, &[2.0 + sqrt2, 2.0, 2.0 - sqrt2], 1e-10);

        let mut rebuilt = vec![0.0; 9];
        for i in 0..3 {
            for j in 0..3 {
                rebuilt[i * 3 + j] = (0..3).map(|k| e[k * 3 + i] * lambda[k] * e[k * 3 + j]).sum();
            }
        }
        assert_close(&rebuilt, &a_values, 1e-10);
    }

    #[test]
    fn asymmetric_eigen_source_is_not_an_error() {
        let module = FieldModule::new();
        let a_values = [1.0, 0.5, 0.0, 1.0];
        let tolerance = EvaluationSettings::default().eigen.symmetry_tolerance;
        assert!(!linalg::is_symmetric(&a_values, 2, tolerance));
        let a = module.create_constant(&a_values).unwrap();
        let eigenvalues = module.create_eigenvalues(&a).unwrap();
        let cache = module.create_field_cache();
        let lambda = module.evaluate_real(&eigenvalues, &cache).unwrap();
        assert!(lambda.iter().all(|v| v.is_finite()));
        assert!(lambda[0] >= lambda[1]);
    }

    #[test]
    fn identity_projection_returns_the_vector() {
        let module = FieldModule::new();
        let v = module.create_constant(&[1.5, -2.0, 0.25]).unwrap();
        let m = module.create_constant(&identity(4)).unwrap();
        let projection = module.create_projection(&v, &m).unwrap();
        let cache = module.create_field_cache();
        assert_eq!(projection.component_count(), 3);
        assert_close(&module.evaluate_real(&projection, &cache).unwrap(), &[1.5, -2.0, 0.25], 0.0);
    }

    #[test]
    fn projection_assignment_solves_for_the_source() {
        let module = FieldModule::new();
        let v = module.create_parameters(&[0.0, 0.0, 0.0]).unwrap();
        let m = module
            .create_constant(&[
                2.0, 0.0, 0.0, 1.0, //
                0.0, 1.0, 0.5, 0.0, //
                0.0, 0.0, 1.0, 3.0, //
                0.0, 0.0, 0.5, 1.0,
            ])
            .unwrap();
        let projection = module.create_projection(&v, &m).unwrap();
        let cache = module.create_field_cache();
        let desired = [0.5, -1.0, 1.0];
        assert_eq!(cache.assign(&projection, &desired), AssignmentResult::AllValuesSet);
        assert_close(&module.evaluate_real(&projection, &cache).unwrap(), &desired, 1e-10);

        let v2 = module.create_parameters(&[0.0, 0.0]).unwrap();
        let m2 = module.create_constant(&identity(3)).unwrap();
        let planar = module.create_projection(&v2, &m2).unwrap();
        assert_eq!(cache.assign(&planar, &[1.0, 2.0]), AssignmentResult::Fail);
    }

    #[test]
    fn quaternion_round_trip() {
        let module = FieldModule::new();
        let half = std::f64::consts::FRAC_PI_6;
        let q = module
            .create_constant(&[2.0 * half.cos(), 0.0, 0.0, 2.0 * half.sin()])
            .unwrap();
        let matrix = module.create_quaternion_to_matrix(&q).unwrap();
        let back = module.create_matrix_to_quaternion(&matrix).unwrap();
        let cache = module.create_field_cache();

        let m = module.evaluate_real(&matrix, &cache).unwrap();
        let (c, s) = (0.5, 3.0_f64.sqrt() / 2.0);
        assert_close(
            &m,
            &[
                c, -s, 0.0, 0.0, //
                s, c, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
            1e-12,
        );
        assert_close(
            &module.evaluate_real(&back, &cache).unwrap(),
            &[half.cos(), 0.0, 0.0, half.sin()],
            1e-9,
        );

        let zero = module.create_constant(&[0.0; 4]).unwrap();
        let degenerate = module.create_quaternion_to_matrix(&zero).unwrap();
        assert!(cache.evaluate(&degenerate).is_err());
    }

    #[test]
    fn matrix_multiply_derivatives_use_the_product_rule() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        let a = module.create_offset(&xi, &[1.0, 2.0]).unwrap();
        let row = module.create_scale(&xi, &[3.0, -1.0]).unwrap();
        let outer = module.create_matrix_multiply(2, &a, &row).unwrap();
        assert_eq!(outer.component_count(), 4);
        assert_eq!(outer.matrix_multiply_number_of_rows().unwrap(), 2);
        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.2, 0.4]);

        let d1 = FieldDerivative::mesh(2, 1).unwrap();
        let analytic = module.evaluate_derivative_real(&outer, &cache, &d1).unwrap();
        let mut numeric = DerivativeValueCache::new(4, 2);
        propagation::finite_difference(&outer, &cache, &d1, &mut numeric).unwrap();
        assert_close(&analytic, &numeric.values, 1e-8);

        let d2 = FieldDerivative::mesh(2, 2).unwrap();
        let second = module.evaluate_derivative_real(&outer, &cache, &d2).unwrap();
        let mut numeric = DerivativeValueCache::new(4, 4);
        propagation::finite_difference(&outer, &cache, &d2, &mut numeric).unwrap();
        assert_close(&second, &numeric.values, 1e-6);
        // d2(a0 * 3 xi0) / dxi0 dxi0 = 6
        assert!((second[0] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn transpose_derivative_is_a_relayout() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        let column = module.create_transpose(2, &xi).unwrap();
        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.2, 0.4]);
        let d = FieldDerivative::mesh(2, 1).unwrap();
        assert_eq!(
            module.evaluate_derivative_real(&column, &cache, &d).unwrap(),
            vec![1.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn finite_difference_only_operators_differentiate() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        let one = module.create_constant(&[1.0, 1.0]).unwrap();
        let diagonal = module.create_add(&xi, &one).unwrap();
        let m = module.create_matrix_multiply(2, &diagonal, &one).unwrap();
        let transposed = module.create_transpose(2, &m).unwrap();
        let square = module.create_matrix_multiply(2, &m, &transposed).unwrap();
        let det = module.create_determinant(&square).unwrap();
        let cache = module.create_field_cache();
        cache.set_mesh_location(1, &[0.5, 0.5]);
        let d = FieldDerivative::mesh(2, 1).unwrap();
        let values = module.evaluate_derivative_real(&det, &cache, &d).unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn factories_validate_shapes() {
        let module = FieldModule::new();
        let five = module.create_constant(&[1.0; 5]).unwrap();
        let six = module.create_constant(&[1.0; 6]).unwrap();
        let four = module.create_constant(&[1.0; 4]).unwrap();
        let sixteen = module.create_constant(&[1.0; 16]).unwrap();

        assert!(matches!(
            module.create_determinant(&five),
            Err(FieldError::NotSquareMatrix(_))
        ));
        assert!(module.create_determinant(&sixteen).is_err());
        assert!(matches!(
            module.create_matrix_multiply(2, &six, &five),
            Err(FieldError::IncompatibleShapes(_))
        ));
        assert!(module.create_matrix_multiply(4, &six, &four).is_err());
        assert!(module.create_transpose(4, &six).is_err());
        assert!(module.create_transpose(0, &six).is_err());
        assert!(matches!(
            module.create_eigenvectors(&four),
            Err(FieldError::WrongSourceType { .. })
        ));
        assert!(module.create_matrix_invert(&six).is_err());
        assert!(module.create_projection(&four, &six).is_err());
        assert!(module.create_quaternion_to_matrix(&five).is_err());
        assert!(module.create_matrix_to_quaternion(&four).is_err());
        assert!(six.matrix_multiply_number_of_rows().is_err());
    }
}
