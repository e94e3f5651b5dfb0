//! Jacobi-preconditioned conjugate gradient for sparse symmetric
//! positive-(semi)definite systems.

use itertools::izip;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// Tuning parameters for the conjugate gradient iteration.
#[derive(Clone, Copy, Debug)]
pub struct PcgConfig {
    /// Maximum number of iterations before giving up.
    pub max_iterations: usize,
    /// Relative residual tolerance: convergence when
    /// `‖b − Ax‖ ≤ tolerance · ‖b‖`.
    pub tolerance: f64,
}

impl Default for PcgConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-3,
        }
    }
}

/// A converged solution along with iteration diagnostics.
#[derive(Clone, Debug)]
pub struct PcgSolution {
    /// The solution vector.
    pub x: DVector<f64>,
    /// Number of iterations taken.
    pub iterations: usize,
    /// Achieved relative residual.
    pub residual: f64,
}

/// Failure modes of the conjugate gradient iteration.
#[derive(thiserror::Error, Debug)]
pub enum PcgError {
    /// The search direction lost positive curvature,
    /// which means the matrix is not positive (semi)definite
    /// or has degenerated numerically.
    #[error("conjugate gradient breakdown after {iterations} iterations (relative residual {residual:.3e})")]
    Breakdown {
        /// Iterations completed before the breakdown.
        iterations: usize,
        /// Relative residual at the breakdown.
        residual: f64,
    },
    /// The iteration cap was reached before the residual dropped
    /// below tolerance.
    #[error("no convergence within {iterations} iterations (relative residual {residual:.3e})")]
    NotConverged {
        /// Iterations completed.
        iterations: usize,
        /// Relative residual after the final iteration.
        residual: f64,
    },
}

/// Solve `A·x = b` starting from `guess`.
///
/// `matrix` must be square, symmetric and positive (semi)definite;
/// symmetry is the caller's responsibility and is not checked here.
/// Rows with a non-positive diagonal fall back to unpreconditioned
/// updates rather than poisoning the preconditioner.
pub fn solve(
    matrix: &CsrMatrix<f64>,
    rhs: &DVector<f64>,
    guess: &DVector<f64>,
    config: PcgConfig,
) -> Result<PcgSolution, PcgError> {
    let n = rhs.len();
    assert_eq!(matrix.nrows(), n, "matrix and rhs dimensions must match");
    assert_eq!(matrix.ncols(), n, "matrix must be square");
    assert_eq!(guess.len(), n, "guess and rhs dimensions must match");

    if n == 0 {
        return Ok(PcgSolution {
            x: DVector::zeros(0),
            iterations: 0,
            residual: 0.0,
        });
    }

    let inv_diagonal = jacobi_inverse_diagonal(matrix);
    let apply_preconditioner = |out: &mut DVector<f64>, r: &DVector<f64>| {
        for (out, &inv_d, &r) in izip!(out.iter_mut(), inv_diagonal.iter(), r.iter()) {
            *out = inv_d * r;
        }
    };

    let rhs_norm = rhs.norm();
    // an all-zero right-hand side makes the relative criterion absolute
    let residual_threshold = config.tolerance * if rhs_norm > 0.0 { rhs_norm } else { 1.0 };
    let relative_scale = if rhs_norm > 0.0 { rhs_norm } else { 1.0 };

    let mut x = guess.clone();
    let mut r = rhs - matrix * &x;
    let mut residual_norm = r.norm();

    if residual_norm <= residual_threshold {
        return Ok(PcgSolution {
            x,
            iterations: 0,
            residual: residual_norm / relative_scale,
        });
    }

    let mut z = DVector::zeros(n);
    apply_preconditioner(&mut z, &r);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for iteration in 1..=config.max_iterations {
        let ap = matrix * &p;
        let curvature = p.dot(&ap);
        if curvature <= 0.0 {
            return Err(PcgError::Breakdown {
                iterations: iteration - 1,
                residual: residual_norm / relative_scale,
            });
        }

        let alpha = rz / curvature;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);

        residual_norm = r.norm();
        if residual_norm <= residual_threshold {
            return Ok(PcgSolution {
                x,
                iterations: iteration,
                residual: residual_norm / relative_scale,
            });
        }

        apply_preconditioner(&mut z, &r);
        let rz_next = r.dot(&z);
        let beta = rz_next / rz;
        rz = rz_next;

        // p = z + beta * p
        p.axpy(1.0, &z, beta);
    }

    Err(PcgError::NotConverged {
        iterations: config.max_iterations,
        residual: residual_norm / relative_scale,
    })
}

/// Reciprocal matrix diagonal, with non-positive entries mapped to 1
/// so the preconditioner degrades to identity on degenerate rows.
fn jacobi_inverse_diagonal(matrix: &CsrMatrix<f64>) -> DVector<f64> {
    let mut inv_diagonal = DVector::from_element(matrix.nrows(), 1.0);
    for (row, lane) in matrix.row_iter().enumerate() {
        for (&col, &value) in lane.col_indices().iter().zip(lane.values()) {
            if col == row && value > 0.0 {
                inv_diagonal[row] = 1.0 / value;
            }
        }
    }
    inv_diagonal
}
