//! Small dense linear algebra for the bandit learners.
//!
//! Square matrices of bandit context dimension (~12), stored row-major.
//! Inversion is Gaussian elimination with partial pivoting; when conditioning
//! degrades a ridge term is added to the diagonal and the inverse retried, so
//! the learners' covariance matrices stay positive definite instead of
//! blowing up.

use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;

/// Ridge added to the diagonal when a plain inverse fails.
const RIDGE: f64 = 1e-6;

/// Pivot magnitude below which the matrix counts as singular.
const SINGULAR_EPS: f64 = 1e-12;

/// Row-major square matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub dim: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            data: vec![0.0; dim * dim],
        }
    }

    pub fn identity(dim: usize) -> Self {
        let mut m = Self::zeros(dim);
        for i in 0..dim {
            m.data[i * dim + i] = 1.0;
        }
        m
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.dim + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.dim + col] = value;
    }

    /// `self += x xᵀ`.
    pub fn add_outer(&mut self, x: &[f64]) {
        debug_assert_eq!(x.len(), self.dim);
        for i in 0..self.dim {
            for j in 0..self.dim {
                self.data[i * self.dim + j] += x[i] * x[j];
            }
        }
    }

    /// `self · v`.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(v.len(), self.dim);
        (0..self.dim)
            .map(|i| (0..self.dim).map(|j| self.get(i, j) * v[j]).sum())
            .collect()
    }

    /// Inverse via Gauss-Jordan with partial pivoting. On a singular pivot,
    /// retries once with a ridge term on the diagonal; a second failure is a
    /// degenerate learner.
    pub fn inverse(&self) -> Result<Matrix, OptimizerError> {
        match self.inverse_plain() {
            Ok(inv) => Ok(inv),
            Err(_) => {
                let mut ridged = self.clone();
                for i in 0..self.dim {
                    ridged.data[i * self.dim + i] += RIDGE;
                }
                ridged.inverse_plain()
            }
        }
    }

    fn inverse_plain(&self) -> Result<Matrix, OptimizerError> {
        let n = self.dim;
        let mut a = self.clone();
        let mut inv = Matrix::identity(n);

        for col in 0..n {
            // Partial pivot.
            let mut pivot_row = col;
            let mut pivot_mag = a.get(col, col).abs();
            for row in (col + 1)..n {
                let mag = a.get(row, col).abs();
                if mag > pivot_mag {
                    pivot_row = row;
                    pivot_mag = mag;
                }
            }
            if pivot_mag < SINGULAR_EPS {
                return Err(OptimizerError::LearnerDegenerate(format!(
                    "singular matrix at column {col}"
                )));
            }
            if pivot_row != col {
                for j in 0..n {
                    a.data.swap(col * n + j, pivot_row * n + j);
                    inv.data.swap(col * n + j, pivot_row * n + j);
                }
            }

            let pivot = a.get(col, col);
            for j in 0..n {
                a.data[col * n + j] /= pivot;
                inv.data[col * n + j] /= pivot;
            }
            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = a.get(row, col);
                if factor == 0.0 {
                    continue;
                }
                for j in 0..n {
                    let a_cj = a.get(col, j);
                    let i_cj = inv.get(col, j);
                    a.data[row * n + j] -= factor * a_cj;
                    inv.data[row * n + j] -= factor * i_cj;
                }
            }
        }
        Ok(inv)
    }

    /// Lower-triangular Cholesky factor of a symmetric positive semidefinite
    /// matrix. Diagonal jitter covers semidefinite inputs.
    pub fn cholesky(&self) -> Result<Matrix, OptimizerError> {
        let n = self.dim;
        let mut l = Matrix::zeros(n);
        for i in 0..n {
            for j in 0..=i {
                let mut sum = self.get(i, j);
                for k in 0..j {
                    sum -= l.get(i, k) * l.get(j, k);
                }
                if i == j {
                    let value = sum + RIDGE;
                    if value <= 0.0 {
                        return Err(OptimizerError::LearnerDegenerate(format!(
                            "non-positive diagonal {value} at row {i} in Cholesky"
                        )));
                    }
                    l.set(i, j, value.sqrt());
                } else {
                    l.set(i, j, sum / l.get(j, j));
                }
            }
        }
        Ok(l)
    }

    /// True when every entry is finite and the matrix equals its transpose to
    /// within tolerance.
    pub fn is_symmetric_finite(&self) -> bool {
        let n = self.dim;
        for i in 0..n {
            for j in 0..n {
                let v = self.get(i, j);
                if !v.is_finite() {
                    return false;
                }
                if (v - self.get(j, i)).abs() > 1e-9 {
                    return false;
                }
            }
        }
        true
    }
}

/// `aᵀ b`.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// `xᵀ M x`, the quadratic form used by the UCB exploration bonus.
pub fn quadratic_form(m: &Matrix, x: &[f64]) -> f64 {
    dot(&m.mul_vec(x), x)
}
