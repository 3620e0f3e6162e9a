//! Small dense linear algebra on row-major slices: LU with partial pivoting, cyclic Jacobi
//! eigen-analysis and closed-form determinants.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinalgError {
    #[error("matrix is singular (pivot {pivot:e} in column {column})")]
    Singular { column: usize, pivot: f64 },
    #[error("Jacobi iteration did not converge in {sweeps} sweeps")]
    NoConvergence { sweeps: usize },
    #[error("determinant is only available for 1x1, 2x2 and 3x3 matrices, not {0}x{0}")]
    UnsupportedSize(usize),
}

/// Determinant of an `n` x `n` matrix with `n <= 3`, by cofactor expansion.
pub fn determinant(a: &[f64], n: usize) -> Result<f64, LinalgError> {
    match n {
        1 => Ok(a[0]),
        2 => Ok(a[0] * a[3] - a[1] * a[2]),
        3 => Ok(a[0] * (a[4] * a[8] - a[5] * a[7]) - a[1] * (a[3] * a[8] - a[5] * a[6])
            + a[2] * (a[3] * a[7] - a[4] * a[6])),
        _ => Err(LinalgError::UnsupportedSize(n)),
    }
}

/// In-place Crout LU decomposition with partial pivoting and implicit row scaling.
///
/// On success `a` holds L (unit diagonal, below) and U (on and above the diagonal) of the
/// row-permuted matrix; `pivots[i]` is the row swapped into row `i`. Returns the permutation
/// parity (+1 or -1).
pub fn lu_decompose(
    a: &mut [f64],
    n: usize,
    pivots: &mut [usize],
    tolerance: f64,
) -> Result<f64, LinalgError> {
    let mut scale = vec![0.0; n];
    for (i, s) in scale.iter_mut().enumerate() {
        let big = a[i * n..(i + 1) * n]
            .iter()
            .fold(0.0_f64, |m, v| m.max(v.abs()));
        if big <= tolerance {
            return Err(LinalgError::Singular {
                column: i,
                pivot: big,
            });
        }
        *s = 1.0 / big;
    }

    let mut parity = 1.0;
    for j in 0..n {
        for i in 0..j {
            let mut sum = a[i * n + j];
            for k in 0..i {
                sum -= a[i * n + k] * a[k * n + j];
            }
            a[i * n + j] = sum;
        }
        let mut big = 0.0;
        let mut pivot_row = j;
        for i in j..n {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= a[i * n + k] * a[k * n + j];
            }
            a[i * n + j] = sum;
            let merit = scale[i] * sum.abs();
            if merit >= big {
                big = merit;
                pivot_row = i;
            }
        }
        if pivot_row != j {
            for k in 0..n {
                a.swap(pivot_row * n + k, j * n + k);
            }
            parity = -parity;
            scale[pivot_row] = scale[j];
        }
        pivots[j] = pivot_row;
        let pivot = a[j * n + j];
        if pivot.abs() <= tolerance {
            return Err(LinalgError::Singular { column: j, pivot });
        }
        for i in (j + 1)..n {
            a[i * n + j] /= pivot;
        }
    }
    Ok(parity)
}

/// Solves `A x = b` in place given the factors from [`lu_decompose`].
pub fn lu_back_substitute(lu: &[f64], n: usize, pivots: &[usize], b: &mut [f64]) {
    let mut first_nonzero = None;
    for i in 0..n {
        let p = pivots[i];
        let mut sum = b[p];
        b[p] = b[i];
        if let Some(start) = first_nonzero {
            for j in start..i {
                sum -= lu[i * n + j] * b[j];
            }
        } else if sum != 0.0 {
            first_nonzero = Some(i);
        }
        b[i] = sum;
    }
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= lu[i * n + j] * b[j];
        }
        b[i] = sum / lu[i * n + i];
    }
}

pub fn is_symmetric(a: &[f64], n: usize, tolerance: f64) -> bool {
    (0..n).all(|i| (0..i).all(|j| (a[i * n + j] - a[j * n + i]).abs() <= tolerance))
}

/// Cyclic Jacobi eigen-analysis of a symmetric matrix.
///
/// Destroys the upper triangle of `a`. Eigenvalues land in `values` and the matching
/// eigenvectors in the columns of `vectors`. Returns the number of sweeps used.
pub fn jacobi_eigen(
    a: &mut [f64],
    n: usize,
    values: &mut [f64],
    vectors: &mut [f64],
    max_sweeps: usize,
) -> Result<usize, LinalgError> {
    vectors.iter_mut().for_each(|v| *v = 0.0);
    for i in 0..n {
        vectors[i * n + i] = 1.0;
        values[i] = a[i * n + i];
    }
    let mut b = values.to_vec();
    let mut z = vec![0.0; n];

    for sweep in 1..=max_sweeps {
        let off_diagonal: f64 = (0..n)
            .flat_map(|p| ((p + 1)..n).map(move |q| (p, q)))
            .map(|(p, q)| a[p * n + q].abs())
            .sum();
        if off_diagonal == 0.0 {
            return Ok(sweep - 1);
        }
        let threshold = if sweep < 4 {
            0.2 * off_diagonal / (n * n) as f64
        } else {
            0.0
        };
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                let g = 100.0 * apq.abs();
                if sweep > 4
                    && values[p].abs() + g == values[p].abs()
                    && values[q].abs() + g == values[q].abs()
                {
                    a[p * n + q] = 0.0;
                } else if apq.abs() > threshold {
                    let h = values[q] - values[p];
                    let t = if h.abs() + g == h.abs() {
                        apq / h
                    } else {
                        let theta = 0.5 * h / apq;
                        let t = 1.0 / (theta.abs() + (1.0 + theta * theta).sqrt());
                        if theta < 0.0 {
                            -t
                        } else {
                            t
                        }
                    };
                    let c = 1.0 / (1.0 + t * t).sqrt();
                    let s = t * c;
                    let tau = s / (1.0 + c);
                    let h = t * apq;
                    z[p] -= h;
                    z[q] += h;
                    values[p] -= h;
                    values[q] += h;
                    a[p * n + q] = 0.0;
                    let rotate = |m: &mut [f64], i: usize, j: usize, k: usize, l: usize| {
                        let g = m[i * n + j];
                        let h = m[k * n + l];
                        m[i * n + j] = g - s * (h + g * tau);
                        m[k * n + l] = h + s * (g - h * tau);
                    };
                    for j in 0..p {
                        rotate(a, j, p, j, q);
                    }
                    for j in (p + 1)..q {
                        rotate(a, p, j, j, q);
                    }
                    for j in (q + 1)..n {
                        rotate(a, p, j, q, j);
                    }
                    for j in 0..n {
                        rotate(vectors, j, p, j, q);
                    }
                }
            }
        }
        for p in 0..n {
            b[p] += z[p];
            values[p] = b[p];
            z[p] = 0.0;
        }
    }
    Err(LinalgError::NoConvergence { sweeps: max_sweeps })
}

/// Sorts eigenvalues into descending order, permuting eigenvector columns to match.
pub fn eigen_sort(values: &mut [f64], vectors: &mut [f64], n: usize) {
    for i in 0..n {
        let mut k = i;
        for j in (i + 1)..n {
            if values[j] > values[k] {
                k = j;
            }
        }
        if k != i {
            values.swap(i, k);
            for row in 0..n {
                vectors.swap(row * n + i, row * n + k);
            }
        }
    }
}
