//! Dense solvers for the small symmetric systems of the regression
//!
//! The normal equations live in `ndarray` storage on the predictor side and
//! are handed to `nalgebra` factorizations for the solve.

use crate::io::configuration::Solver;
use nalgebra::DMatrix;
use nalgebra::linalg::{Cholesky, QR};
use ndarray::{Array2, ArrayView2};

fn to_matrix(view: ArrayView2<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(view.nrows(), view.ncols(), |i, j| view[[i, j]])
}

fn to_array(matrix: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(matrix.shape(), |index| matrix.get(index).copied().unwrap_or(0.0))
}

/// Solve `matrix · x = rhs` for every column of `rhs`
///
/// Cholesky is attempted first when selected; a matrix that is not
/// numerically positive definite falls back to QR.
pub fn solve(matrix: ArrayView2<'_, f64>, rhs: ArrayView2<'_, f64>, solver: Solver) -> Array2<f64> {
    if solver == Solver::Cholesky {
        if let Some(solution) = cholesky_solve(matrix, rhs) {
            return solution;
        }
    }
    qr_solve(matrix, rhs)
}

/// Cholesky factorization `A = L·Lᵀ` followed by two triangular solves
///
/// Returns `None` when the matrix is not positive definite.
pub fn cholesky_solve(matrix: ArrayView2<'_, f64>, rhs: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
    let factor = Cholesky::new(to_matrix(matrix))?;
    let solution = factor.solve(&to_matrix(rhs));
    solution
        .iter()
        .all(|value| value.is_finite())
        .then(|| to_array(&solution))
}

/// QR least-squares solve
///
/// A pivot of `R` below a relative tolerance marks the system rank
/// deficient; it is then solved through the SVD pseudo-inverse, so the
/// result is finite for finite input.
pub fn qr_solve(matrix: ArrayView2<'_, f64>, rhs: ArrayView2<'_, f64>) -> Array2<f64> {
    let a = to_matrix(matrix);
    let b = to_matrix(rhs);
    let tolerance = a.amax() * f64::EPSILON * a.nrows().max(a.ncols()) as f64;

    if a.is_square() {
        let qr = QR::new(a.clone());
        let full_rank = qr.r().diagonal().iter().all(|pivot| pivot.abs() > tolerance);
        if full_rank {
            if let Some(solution) = qr.solve(&b) {
                return to_array(&solution);
            }
        }
    }

    a.svd(true, true)
        .solve(&b, tolerance)
        .map_or_else(|_| Array2::zeros((matrix.ncols(), rhs.ncols())), |x| to_array(&x))
}
