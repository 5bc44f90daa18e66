use super::{SdpProblem, SdpSolution, SdpSolver};
use crate::core::errors::TomographyError;
use crate::core::utils;
use crate::tomography::fitter_data::{coordinates_to_hermitian, hermitian_to_coordinates};
use nalgebra::{DMatrix, DVector, Dyn, LU};
use ndarray::{Array1, Array2, ArrayView1};
use num_complex::Complex64;
use tracing::debug;

/// Residual ratio that triggers a penalty update.
const PENALTY_RATIO: f64 = 10.0;
/// Factor by which the penalty grows or shrinks.
const PENALTY_STEP: f64 = 2.0;
const PENALTY_INTERVAL: usize = 10;
/// Relative eigenvalue cutoffs tried when reading the rank of the ADMM iterate.
const SUPPORT_CUTOFFS: [f64; 3] = [1e-8, 1e-6, 1e-4];
/// Tenfold tightenings of the stopping rule tried while polishing fails.
const REFINEMENTS: usize = 3;

/// Alternating direction method of multipliers.
///
/// Splits the problem into an equality-constrained quadratic step on `x`
/// (one KKT solve) and a Euclidean projection of `z` onto the PSD cone,
/// tied by `x = z` through the scaled dual `u`. The penalty ρ is adapted by
/// residual balancing.
///
/// Once the residuals meet `tolerance` the iterate is polished: the quadratic
/// is solved exactly over the matrices sharing the range of `z`, and that
/// point is returned when it passes the primal and dual optimality checks.
/// Otherwise iteration continues with a tenfold tighter tolerance, down to
/// `tolerance * 1e-3`. If the equality-constrained minimizer is already PSD it
/// is returned without iterating.
#[derive(Clone, Debug)]
pub struct AdmmSolver {
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Initial penalty ρ.
    pub penalty: f64,
}

impl Default for AdmmSolver {
    fn default() -> Self {
        Self::new(1e-7, 20_000)
    }
}

impl AdmmSolver {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            penalty: 1.0,
        }
    }

    fn validate(&self, problem: &SdpProblem) -> Result<(), TomographyError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(TomographyError::InvalidParameter(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(TomographyError::InvalidParameter(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.penalty.is_finite() && self.penalty > 0.0) {
            return Err(TomographyError::InvalidParameter(format!(
                "penalty must be positive, got {}",
                self.penalty
            )));
        }

        let n = problem.dim * problem.dim;
        for got in [
            problem.quadratic.nrows(),
            problem.quadratic.ncols(),
            problem.linear.len(),
            problem.constraints.ncols(),
        ] {
            if got != n {
                return Err(TomographyError::DimensionMismatch { expected: n, got });
            }
        }
        if problem.bounds.len() != problem.constraints.nrows() {
            return Err(TomographyError::DimensionMismatch {
                expected: problem.constraints.nrows(),
                got: problem.bounds.len(),
            });
        }
        Ok(())
    }
}

/// LU factors of `[[P + ρI, Cᵀ], [C, 0]]`.
fn factor_kkt(
    p: &DMatrix<f64>,
    c: &DMatrix<f64>,
    rho: f64,
) -> Result<LU<f64, Dyn, Dyn>, TomographyError> {
    let n = p.nrows();
    let m = c.nrows();

    let mut kkt = DMatrix::<f64>::zeros(n + m, n + m);
    kkt.view_mut((0, 0), (n, n))
        .copy_from(&(p + DMatrix::<f64>::identity(n, n) * rho));
    kkt.view_mut((0, n), (n, m)).copy_from(&c.transpose());
    kkt.view_mut((n, 0), (m, n)).copy_from(c);

    let lu = kkt.lu();
    if !lu.is_invertible() {
        return Err(TomographyError::SingularDesignMatrix(
            "constraint system is rank deficient".into(),
        ));
    }
    Ok(lu)
}

/// Euclidean projection of Hermitian coordinates onto the PSD cone.
fn project_psd(coords: &DVector<f64>, dim: usize) -> DVector<f64> {
    let matrix = coordinates_to_hermitian(ArrayView1::from(coords.as_slice()), dim);
    let (values, vectors) = utils::hermitian_eigen(&matrix);
    let projected = utils::from_spectrum(&values.mapv(|v| v.max(0.0)), &vectors);
    let x: Array1<f64> = hermitian_to_coordinates(&projected);
    DVector::from_iterator(x.len(), x.iter().copied())
}

/// Orthonormal basis, in Hermitian coordinates, of `{V H V† : H Hermitian}`.
fn face_basis(vectors: &Array2<Complex64>) -> DMatrix<f64> {
    let (dim, rank) = vectors.dim();
    let adjoint = utils::dagger(vectors);
    let mut basis = DMatrix::<f64>::zeros(dim * dim, rank * rank);
    for k in 0..rank * rank {
        let mut unit = Array1::<f64>::zeros(rank * rank);
        unit[k] = 1.0;
        let local = coordinates_to_hermitian(unit.view(), rank);
        let lifted = hermitian_to_coordinates(&vectors.dot(&local).dot(&adjoint));
        for (i, &v) in lifted.iter().enumerate() {
            basis[(i, k)] = v;
        }
    }
    basis
}

/// Quadratic objective and its constraints in nalgebra form.
struct Kkt<'a> {
    p: &'a DMatrix<f64>,
    c: &'a DMatrix<f64>,
    q: &'a DVector<f64>,
    bounds: &'a DVector<f64>,
    dim: usize,
}

impl Kkt<'_> {
    /// Exact minimizer over the span of `basis` subject to the equality
    /// constraints, kept only if it is PSD and its multiplier certifies it as
    /// optimal over the whole cone.
    fn certified_minimizer(&self, basis: &DMatrix<f64>, tolerance: f64) -> Option<DVector<f64>> {
        let k = basis.ncols();
        let m = self.c.nrows();
        if m > k {
            return None;
        }

        let reduced_p = basis.transpose() * self.p * basis;
        let reduced_c = self.c * basis;
        let reduced_q = basis.transpose() * self.q;
        let lu = factor_kkt(&reduced_p, &reduced_c, 0.0).ok()?;

        let mut rhs = DVector::<f64>::zeros(k + m);
        rhs.rows_mut(0, k).copy_from(&reduced_q);
        rhs.rows_mut(k, m).copy_from(self.bounds);
        let solution = lu.solve(&rhs)?;
        if solution.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let h = solution.rows(0, k).into_owned();
        let lambda = solution.rows(k, m).into_owned();

        let stationarity = (&reduced_p * &h + reduced_c.transpose() * &lambda - &reduced_q).norm();
        let feasibility = (&reduced_c * &h - self.bounds).norm();
        if stationarity > tolerance * (1.0 + reduced_q.norm())
            || feasibility > tolerance * (1.0 + self.bounds.norm())
        {
            return None;
        }

        let x = basis * h;
        let (primal, _) = utils::hermitian_eigen(&coordinates_to_hermitian(
            ArrayView1::from(x.as_slice()),
            self.dim,
        ));
        let primal_scale = primal.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
        if primal.iter().any(|&v| v < -tolerance * primal_scale) {
            return None;
        }

        // The multiplier of the cone, P x − q + Cᵀλ, must itself be PSD.
        let slack = self.p * &x - self.q + self.c.transpose() * &lambda;
        let (dual, _) = utils::hermitian_eigen(&coordinates_to_hermitian(
            ArrayView1::from(slack.as_slice()),
            self.dim,
        ));
        let dual_scale = 1.0 + self.q.norm();
        if dual.iter().any(|&v| v < -tolerance * dual_scale) {
            return None;
        }

        Some(project_psd(&x, self.dim))
    }

    /// Tries the faces spanned by the leading eigenvectors of `z`.
    fn polish(&self, z: &DVector<f64>, tolerance: f64) -> Option<DVector<f64>> {
        let matrix = coordinates_to_hermitian(ArrayView1::from(z.as_slice()), self.dim);
        let (values, vectors) = utils::hermitian_eigen(&matrix);
        let largest = values.iter().copied().fold(0.0, f64::max);
        if largest <= 0.0 {
            return None;
        }

        let mut tried = Vec::new();
        for cutoff in SUPPORT_CUTOFFS {
            let support: Vec<usize> =
                (0..self.dim).filter(|&i| values[i] > cutoff * largest).collect();
            if tried.contains(&support) {
                continue;
            }
            let face = Array2::from_shape_fn((self.dim, support.len()), |(i, k)| {
                vectors[[i, support[k]]]
            });
            if let Some(x) = self.certified_minimizer(&face_basis(&face), tolerance) {
                debug!(rank = support.len(), "polished admm iterate");
                return Some(x);
            }
            tried.push(support);
        }
        None
    }
}

impl SdpSolver for AdmmSolver {
    fn name(&self) -> &str {
        "admm"
    }

    fn solve(&self, problem: &SdpProblem) -> Result<SdpSolution, TomographyError> {
        self.validate(problem)?;

        let n = problem.dim * problem.dim;
        let m = problem.constraints.nrows();
        let p = DMatrix::from_fn(n, n, |i, j| problem.quadratic[[i, j]]);
        let c = DMatrix::from_fn(m, n, |i, j| problem.constraints[[i, j]]);
        let q = DVector::from_iterator(n, problem.linear.iter().copied());
        let bounds = DVector::from_iterator(m, problem.bounds.iter().copied());
        let sqrt_n = (n as f64).sqrt();

        let kkt_system = Kkt {
            p: &p,
            c: &c,
            q: &q,
            bounds: &bounds,
            dim: problem.dim,
        };
        let full_space = DMatrix::<f64>::identity(n, n);
        if let Some(x) = kkt_system.certified_minimizer(&full_space, self.tolerance) {
            debug!("equality-constrained minimizer is already PSD");
            return Ok(SdpSolution {
                coordinates: Array1::from_iter(x.iter().copied()),
                iterations: 0,
                residual: 0.0,
            });
        }

        let mut rho = self.penalty;
        let mut kkt = factor_kkt(&p, &c, rho)?;

        let mut z = DVector::<f64>::zeros(n);
        let mut u = DVector::<f64>::zeros(n);
        let mut rhs = DVector::<f64>::zeros(n + m);
        rhs.rows_mut(n, m).copy_from(&bounds);
        let mut residual = f64::INFINITY;
        let mut stopping = self.tolerance;
        let mut refinements = 0;
        let mut converged = false;

        for iteration in 1..=self.max_iterations {
            rhs.rows_mut(0, n).copy_from(&(&q + (&z - &u) * rho));
            let solution = kkt.solve(&rhs).ok_or_else(|| {
                TomographyError::SingularDesignMatrix("KKT solve failed".into())
            })?;
            let x = solution.rows(0, n).into_owned();

            let z_prev = std::mem::replace(&mut z, project_psd(&(&x + &u), problem.dim));
            u += &x - &z;

            let primal = (&x - &z).norm();
            let dual = rho * (&z - &z_prev).norm();
            residual = primal.max(dual);

            let primal_tol = stopping * (sqrt_n + x.norm().max(z.norm()));
            let dual_tol = stopping * (sqrt_n + rho * u.norm());
            if primal <= primal_tol && dual <= dual_tol {
                converged = true;
                if let Some(polished) = kkt_system.polish(&z, self.tolerance) {
                    debug!(iterations = iteration, primal, dual, rho, "admm converged");
                    return Ok(SdpSolution {
                        coordinates: Array1::from_iter(polished.iter().copied()),
                        iterations: iteration,
                        residual,
                    });
                }
                if refinements == REFINEMENTS {
                    debug!(iterations = iteration, primal, dual, rho, "admm converged unpolished");
                    return Ok(SdpSolution {
                        coordinates: Array1::from_iter(z.iter().copied()),
                        iterations: iteration,
                        residual,
                    });
                }
                refinements += 1;
                stopping /= 10.0;
            }

            if iteration % PENALTY_INTERVAL == 0 {
                let scale = if primal > PENALTY_RATIO * dual {
                    PENALTY_STEP
                } else if dual > PENALTY_RATIO * primal {
                    1.0 / PENALTY_STEP
                } else {
                    1.0
                };
                if scale != 1.0 {
                    rho *= scale;
                    u /= scale;
                    kkt = factor_kkt(&p, &c, rho)?;
                    debug!(iteration, rho, primal, dual, "admm penalty update");
                }
            }
        }

        // the budget ran out while refining an already converged iterate
        if converged {
            return Ok(SdpSolution {
                coordinates: Array1::from_iter(z.iter().copied()),
                iterations: self.max_iterations,
                residual,
            });
        }
        Err(TomographyError::SolverDidNotConverge {
            solver: self.name().to_string(),
            iterations: self.max_iterations,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Nearest unit-trace PSD matrix to `target` in Frobenius norm.
    fn nearest_state_problem(target: [f64; 4]) -> SdpProblem {
        SdpProblem {
            dim: 2,
            quadratic: Array2::eye(4),
            linear: Array1::from(target.to_vec()),
            constraints: array![[1.0, 0.0, 0.0, 1.0]],
            bounds: array![1.0],
        }
    }

    #[test]
    fn feasible_target_is_returned() {
        let problem = nearest_state_problem([0.7, 0.1, -0.2, 0.3]);
        let solution = AdmmSolver::default().solve(&problem).unwrap();
        for (got, want) in solution.coordinates.iter().zip([0.7, 0.1, -0.2, 0.3]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-5);
        }
    }

    #[test]
    fn infeasible_target_lands_on_boundary() {
        // diag(1.5, -0.5) projects to diag(1, 0).
        let problem = nearest_state_problem([1.5, 0.0, 0.0, -0.5]);
        let solution = AdmmSolver::default().solve(&problem).unwrap();
        assert_abs_diff_eq!(solution.coordinates[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(solution.coordinates[3], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn psd_minimizer_needs_no_iterations() {
        let problem = nearest_state_problem([0.7, 0.1, -0.2, 0.3]);
        let solution = AdmmSolver::default().solve(&problem).unwrap();
        assert_eq!(solution.iterations, 0);
        for (got, want) in solution.coordinates.iter().zip([0.7, 0.1, -0.2, 0.3]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn boundary_optimum_is_exact_on_poorly_scaled_objective() {
        // One diagonal entry is a thousand times less informative than the
        // others; the optimum is still diag(1, 0).
        let mut problem = nearest_state_problem([1.5, 0.0, 0.0, -0.5]);
        problem.quadratic = Array2::from_diag(&array![1.0, 1.0, 1.0, 1e-3]);
        problem.linear = problem.quadratic.dot(&array![1.5, 0.0, 0.0, -0.5]);

        let solution = AdmmSolver::default().solve(&problem).unwrap();
        assert!(solution.iterations > 0);
        for (got, want) in solution.coordinates.iter().zip([1.0, 0.0, 0.0, 0.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-9);
        }
    }

    #[test]
    fn iteration_budget_is_enforced() {
        let problem = nearest_state_problem([1.5, 0.0, 0.0, -0.5]);
        let err = AdmmSolver::new(1e-14, 2).solve(&problem).unwrap_err();
        assert!(matches!(
            err,
            TomographyError::SolverDidNotConverge { iterations: 2, .. }
        ));
    }

    #[test]
    fn rejects_bad_settings() {
        let problem = nearest_state_problem([0.5, 0.0, 0.0, 0.5]);
        assert!(AdmmSolver::new(0.0, 10).solve(&problem).is_err());
        assert!(AdmmSolver::new(1e-6, 0).solve(&problem).is_err());
    }
}
