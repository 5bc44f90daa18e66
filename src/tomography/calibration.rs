//! Readout-error calibration and correction.
//!
//! The calibration matrix `A` has `A[i][j] = P(measure i | prepared j)` over
//! the `2^m` computational basis states of the measured register. Correction
//! undoes `p = A·p'` for every per-configuration probability sub-vector.

use crate::core::errors::TomographyError;
use crate::core::utils;
use crate::tomography::aggregate::{
    AggregatedData, CircuitResult, OutcomeAggregator, OutcomeHistogram,
};
use crate::tomography::basis::Configuration;
use crate::tomography::fitter_data::FitterData;
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1, s};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const SIMPLEX_TOLERANCE: f64 = 1e-10;
const SIMPLEX_MAX_ITERATIONS: usize = 10_000;

/// Correction policy, numbered as in the measurement-mitigation literature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionMethod {
    /// Solve `A·p' = p` with the inverse, or the pseudo-inverse when `A` is singular.
    Inverse = 0,
    /// Least squares restricted to the probability simplex.
    #[default]
    ConstrainedLeastSquares = 1,
}

impl TryFrom<u8> for CorrectionMethod {
    type Error = TomographyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CorrectionMethod::Inverse),
            1 => Ok(CorrectionMethod::ConstrainedLeastSquares),
            _ => Err(TomographyError::InvalidParameter(format!(
                "unknown correction method {value}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMatrix {
    matrix: Array2<f64>,
    num_qubits: usize,
}

impl CalibrationMatrix {
    /// Wraps a column-stochastic `2^m × 2^m` matrix.
    pub fn new(matrix: Array2<f64>) -> Result<Self, TomographyError> {
        let (rows, cols) = matrix.dim();
        if rows != cols || !rows.is_power_of_two() {
            return Err(TomographyError::DimensionMismatch {
                expected: rows,
                got: cols,
            });
        }
        for (j, column) in matrix.columns().into_iter().enumerate() {
            let invalid = column.iter().any(|&v| !(v.is_finite() && v >= 0.0));
            if invalid || (column.sum() - 1.0).abs() > 1e-9 {
                return Err(TomographyError::InvalidParameter(format!(
                    "calibration column {j} is not a probability distribution"
                )));
            }
        }
        Ok(Self {
            num_qubits: rows.trailing_zeros() as usize,
            matrix,
        })
    }

    /// Perfect readout.
    pub fn identity(num_qubits: usize) -> Self {
        Self {
            matrix: Array2::eye(1 << num_qubits),
            num_qubits,
        }
    }

    /// Builds `A` from the histograms of the `2^m` calibration circuits.
    pub fn from_data(data: &AggregatedData, num_qubits: usize) -> Result<Self, TomographyError> {
        let dim = 1usize << num_qubits;
        let mut matrix = Array2::<f64>::zeros((dim, dim));

        for j in 0..dim {
            let bits = format!("{j:0num_qubits$b}");
            let histogram = data
                .get(&Configuration::Calibration(bits.clone()))
                .filter(|h| h.shots() > 0)
                .ok_or(TomographyError::IncompleteCalibrationSet(bits))?;

            let shots = histogram.shots() as f64;
            let column: Array1<f64> = histogram
                .indexed_counts(num_qubits)?
                .into_iter()
                .map(|c| c as f64 / shots)
                .collect();
            matrix.column_mut(j).assign(&column);
        }

        let calibration = Self { matrix, num_qubits };
        debug!(
            num_qubits,
            readout_fidelity = calibration.readout_fidelity(),
            "built calibration matrix"
        );
        Ok(calibration)
    }

    /// Aggregates calibration circuit results named `cal_<bits>` and builds `A`.
    pub fn from_results(
        results: &[CircuitResult],
        num_qubits: usize,
    ) -> Result<Self, TomographyError> {
        Self::from_data(&OutcomeAggregator::new().aggregate(results)?, num_qubits)
    }

    /// Full matrix from independent per-qubit 2×2 matrices, qubit 0 first.
    pub fn tensored(per_qubit: &[Array2<f64>]) -> Result<Self, TomographyError> {
        let factors: Vec<Array2<Complex64>> = per_qubit
            .iter()
            .rev()
            .map(|a| a.mapv(|v| Complex64::new(v, 0.0)))
            .collect();
        if let Some(bad) = factors.iter().find(|f| f.dim() != (2, 2)) {
            return Err(TomographyError::DimensionMismatch {
                expected: 2,
                got: bad.nrows(),
            });
        }
        Self::new(utils::kron_all(&factors).mapv(|c| c.re))
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Mean probability of reading back the prepared state.
    pub fn readout_fidelity(&self) -> f64 {
        self.matrix.diag().mean().unwrap_or(0.0)
    }

    /// Corrects a vector made of consecutive `2^m`-long sub-vectors.
    pub fn apply(
        &self,
        probabilities: &Array1<f64>,
        method: CorrectionMethod,
    ) -> Result<Array1<f64>, TomographyError> {
        let dim = self.matrix.nrows();
        if probabilities.len() % dim != 0 {
            return Err(TomographyError::DimensionMismatch {
                expected: dim,
                got: probabilities.len(),
            });
        }

        let mut corrected = Array1::<f64>::zeros(probabilities.len());
        match method {
            CorrectionMethod::Inverse => {
                let inverse = self.inverse()?;
                for (block, chunk) in probabilities.exact_chunks(dim).into_iter().enumerate() {
                    corrected
                        .slice_mut(s![block * dim..(block + 1) * dim])
                        .assign(&inverse.dot(&chunk));
                }
            }
            CorrectionMethod::ConstrainedLeastSquares => {
                let solver = SimplexLeastSquares::new(&self.matrix)?;
                let inverse = DMatrix::from_fn(dim, dim, |i, j| self.matrix[[i, j]])
                    .try_inverse()
                    .filter(|inverse| inverse.iter().all(|v| v.is_finite()))
                    .map(|inverse| Array2::from_shape_fn((dim, dim), |(i, j)| inverse[(i, j)]));
                for (block, chunk) in probabilities.exact_chunks(dim).into_iter().enumerate() {
                    // start from the unconstrained solution when there is one
                    let start = match &inverse {
                        Some(inverse) => inverse.dot(&chunk),
                        None => chunk.to_owned(),
                    };
                    corrected
                        .slice_mut(s![block * dim..(block + 1) * dim])
                        .assign(&solver.solve(chunk, &start)?);
                }
            }
        }
        Ok(corrected)
    }

    /// Corrects every probability of `data` and recomputes its weights.
    pub fn correct(
        &self,
        data: &FitterData,
        method: CorrectionMethod,
    ) -> Result<FitterData, TomographyError> {
        if data.outcomes_per_configuration != self.matrix.nrows() {
            return Err(TomographyError::DimensionMismatch {
                expected: self.matrix.nrows(),
                got: data.outcomes_per_configuration,
            });
        }
        let corrected = self.apply(&data.probabilities, method)?;
        debug!(rows = corrected.len(), ?method, "applied readout correction");
        data.with_probabilities(corrected)
    }

    /// Corrected outcome distribution of one histogram, indexed by outcome.
    pub fn correct_histogram(
        &self,
        histogram: &OutcomeHistogram,
        method: CorrectionMethod,
    ) -> Result<Array1<f64>, TomographyError> {
        let shots = histogram.shots();
        if shots == 0 {
            return Err(TomographyError::InvalidParameter("histogram has no shots".into()));
        }
        let probabilities: Array1<f64> = histogram
            .indexed_counts(self.num_qubits)?
            .into_iter()
            .map(|c| c as f64 / shots as f64)
            .collect();
        self.apply(&probabilities, method)
    }

    fn inverse(&self) -> Result<Array2<f64>, TomographyError> {
        let dim = self.matrix.nrows();
        let a = DMatrix::from_fn(dim, dim, |i, j| self.matrix[[i, j]]);

        let inverse = match a.clone().try_inverse() {
            Some(inverse) => inverse,
            None => {
                warn!("calibration matrix is singular, using its pseudo-inverse");
                a.pseudo_inverse(1e-12)
                    .map_err(|_| TomographyError::SingularCalibrationMatrix)?
            }
        };
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(TomographyError::SingularCalibrationMatrix);
        }
        Ok(Array2::from_shape_fn((dim, dim), |(i, j)| inverse[(i, j)]))
    }
}

/// Accelerated projected gradient for `min ½‖A x − p‖²` over the probability simplex.
struct SimplexLeastSquares {
    gram: Array2<f64>,
    transpose: Array2<f64>,
    step: f64,
}

impl SimplexLeastSquares {
    fn new(a: &Array2<f64>) -> Result<Self, TomographyError> {
        let gram = a.t().dot(a);
        let n = gram.nrows();
        let lipschitz = DMatrix::from_fn(n, n, |i, j| gram[[i, j]])
            .symmetric_eigenvalues()
            .max();
        if !(lipschitz.is_finite() && lipschitz > 0.0) {
            return Err(TomographyError::SingularCalibrationMatrix);
        }
        Ok(Self {
            gram,
            transpose: a.t().to_owned(),
            step: 1.0 / lipschitz,
        })
    }

    /// Minimizes from `start`, which is projected onto the simplex first.
    fn solve(
        &self,
        p: ArrayView1<f64>,
        start: &Array1<f64>,
    ) -> Result<Array1<f64>, TomographyError> {
        let target = self.transpose.dot(&p);
        let mut x = project_to_simplex(start);
        let mut y = x.clone();
        let mut t = 1.0_f64;
        let mut delta = f64::INFINITY;

        for _ in 0..SIMPLEX_MAX_ITERATIONS {
            let gradient = self.gram.dot(&y) - &target;
            let next = project_to_simplex(&(&y - &(gradient * self.step)));

            let step = &next - &x;
            delta = step.dot(&step).sqrt();
            if delta <= SIMPLEX_TOLERANCE {
                return Ok(next);
            }

            // restart momentum when it points against the last step
            if (&y - &next).dot(&step) > 0.0 {
                y = next.clone();
                t = 1.0;
            } else {
                let t_next = (1.0 + (1.0 + 4.0 * t * t).sqrt()) / 2.0;
                y = &next + &(step * ((t - 1.0) / t_next));
                t = t_next;
            }
            x = next;
        }

        Err(TomographyError::SolverDidNotConverge {
            solver: "simplex-fista".into(),
            iterations: SIMPLEX_MAX_ITERATIONS,
            residual: delta,
        })
    }
}

/// Euclidean projection onto `{x : x ≥ 0, Σx = 1}` by sorting.
fn project_to_simplex(v: &Array1<f64>) -> Array1<f64> {
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (k, &value) in sorted.iter().enumerate() {
        cumulative += value;
        let candidate = (cumulative - 1.0) / (k + 1) as f64;
        if value - candidate > 0.0 {
            theta = candidate;
        }
    }
    v.mapv(|x| (x - theta).max(0.0))
}
