//! Linear inversion followed by projection onto the physical set.

use crate::core::errors::TomographyError;
use crate::core::utils;
use crate::tomography::ReconstructedMatrix;
use crate::tomography::fitter_data::{FitterData, coordinates_to_hermitian};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LstsqOptions {
    /// Scale each row by its binomial weight.
    pub weighted: bool,
    /// Trace of the result; the target's natural trace when `None`.
    pub trace: Option<f64>,
    /// Eigenvalues at or below this are set to zero by the projection.
    pub psd_epsilon: f64,
}

impl Default for LstsqOptions {
    fn default() -> Self {
        Self {
            weighted: true,
            trace: None,
            psd_epsilon: 0.0,
        }
    }
}

impl LstsqOptions {
    pub fn with_weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    pub fn with_trace(mut self, trace: f64) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_psd_epsilon(mut self, epsilon: f64) -> Self {
        self.psd_epsilon = epsilon;
        self
    }
}

/// Fast non-iterative estimator: weighted least squares, then
/// [`project_to_physical`].
#[derive(Clone, Debug, Default)]
pub struct LstsqFitter {
    pub options: LstsqOptions,
}

impl LstsqFitter {
    pub fn new(options: LstsqOptions) -> Self {
        Self { options }
    }

    pub fn fit(&self, data: &FitterData) -> Result<ReconstructedMatrix, TomographyError> {
        let trace = self.options.trace.unwrap_or(data.target.default_trace());
        if !(trace.is_finite() && trace > 0.0) {
            return Err(TomographyError::InvalidParameter(format!(
                "trace must be positive, got {trace}"
            )));
        }

        let (a, y) = data.weighted_system(self.options.weighted);
        let coords = solve_least_squares(&a, &y)?;

        let dim = data.target.dim();
        let unconstrained = coordinates_to_hermitian(ArrayView1::from(coords.as_slice()), dim);
        let matrix = project_to_physical(&unconstrained, trace, self.options.psd_epsilon)?;

        info!(
            fitter = "lstsq",
            rows = data.len(),
            dim,
            trace,
            "fit complete"
        );
        Ok(ReconstructedMatrix {
            matrix,
            target: data.target,
        })
    }
}

/// Minimum-norm solution of `min ‖A x − b‖²` through an SVD.
fn solve_least_squares(a: &Array2<f64>, b: &Array1<f64>) -> Result<DVector<f64>, TomographyError> {
    let (rows, cols) = a.dim();
    let a = DMatrix::from_fn(rows, cols, |i, j| a[[i, j]]);
    let b = DVector::from_iterator(b.len(), b.iter().copied());

    let svd = a.svd(true, true);
    let largest = svd.singular_values.max();
    if !largest.is_finite() {
        return Err(TomographyError::SingularDesignMatrix(
            "design matrix has non-finite entries".into(),
        ));
    }
    let cutoff = f64::EPSILON * rows.max(cols) as f64 * largest;

    let rank = svd.rank(cutoff);
    if rank == 0 {
        return Err(TomographyError::SingularDesignMatrix(
            "design matrix has rank zero".into(),
        ));
    }
    if rank < cols {
        warn!(rank, columns = cols, "rank-deficient design matrix, using minimum-norm solution");
    }

    let x = svd
        .solve(&b, cutoff)
        .map_err(|e| TomographyError::SingularDesignMatrix(e.to_string()))?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(TomographyError::SingularDesignMatrix(
            "least-squares solution is not finite".into(),
        ));
    }
    Ok(x)
}

/// Positive semidefinite matrix with the given trace closest in spectrum to `matrix`.
///
/// Eigenvalues below `epsilon` are visited in ascending order, set to zero,
/// and their value is spread evenly over all larger eigenvalues. When the
/// negative part outweighs the positive part this leaves nothing, and plain
/// clipping is used instead. The result is then rescaled to `trace`.
/// Applying the projection twice gives the same result as applying it once.
pub fn project_to_physical(
    matrix: &Array2<Complex64>,
    trace: f64,
    epsilon: f64,
) -> Result<Array2<Complex64>, TomographyError> {
    let (values, vectors) = utils::hermitian_eigen(matrix);
    if values.iter().any(|v| !v.is_finite()) || values.iter().all(|&v| v <= 0.0) {
        return Err(TomographyError::NonPositiveProjection);
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut redistributed = values.clone();
    let mut clipped = 0;
    for (position, &j) in order.iter().enumerate() {
        if redistributed[j] >= epsilon {
            continue;
        }
        let excess = redistributed[j];
        redistributed[j] = 0.0;
        let rest = &order[position + 1..];
        if excess != 0.0 {
            clipped += 1;
            for &k in rest {
                redistributed[k] += excess / rest.len() as f64;
            }
        }
    }

    let mut kept = redistributed.sum();
    if kept <= 0.0 {
        redistributed = values.mapv(|v| if v >= epsilon { v } else { 0.0 });
        kept = redistributed.sum();
    }
    if kept <= 0.0 {
        return Err(TomographyError::NonPositiveProjection);
    }
    if clipped > 0 {
        debug!(clipped, "redistributed eigenvalues below the PSD threshold");
    }

    let values = redistributed.mapv(|v| v * trace / kept);
    Ok(utils::hermitize(&utils::from_spectrum(&values, &vectors)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Gate, QuantumState};
    use crate::sampler::Sampler;
    use crate::tomography::aggregate::aggregate;
    use crate::tomography::basis::{MeasurementBasis, MeasurementOp, state_configurations};
    use crate::tomography::fitter_data::FitterDataBuilder;
    use crate::tomography::{Configuration, TomographyTarget};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    #[test]
    fn projection_clips_and_rescales() {
        let m = array![[c(1.2), c(0.0)], [c(0.0), c(-0.2)]];
        let p = project_to_physical(&m, 1.0, 0.0).unwrap();
        assert_abs_diff_eq!(p[[0, 0]].re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[[1, 1]].re, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn projection_accepts_non_positive_trace() {
        let m = array![[c(0.3), c(0.0)], [c(0.0), c(-0.5)]];
        let p = project_to_physical(&m, 1.0, 0.0).unwrap();
        assert_abs_diff_eq!(p[[0, 0]].re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[[1, 1]].re, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(utils::trace(&p).re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn projection_spreads_clipped_weight() {
        // -0.1 is spread over 0.3 and 0.8 before rescaling.
        let m = array![
            [c(0.8), c(0.0), c(0.0)],
            [c(0.0), c(0.3), c(0.0)],
            [c(0.0), c(0.0), c(-0.1)]
        ];
        let p = project_to_physical(&m, 1.0, 0.0).unwrap();
        assert_abs_diff_eq!(p[[0, 0]].re, 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(p[[1, 1]].re, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(p[[2, 2]].re, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn projection_is_idempotent() {
        let m = array![
            [c(0.6), Complex64::new(0.5, 0.3)],
            [Complex64::new(0.5, -0.3), c(0.1)]
        ];
        let once = project_to_physical(&m, 1.0, 0.0).unwrap();
        let twice = project_to_physical(&once, 1.0, 0.0).unwrap();
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn negative_definite_matrix_cannot_be_projected() {
        let m = array![[c(-1.0), c(0.0)], [c(0.0), c(-0.5)]];
        assert!(matches!(
            project_to_physical(&m, 1.0, 0.0),
            Err(TomographyError::NonPositiveProjection)
        ));
    }

    #[test]
    fn recovers_noiseless_plus_state() {
        let mut state = QuantumState::new(1);
        state.apply(&Gate::h(), &[0]).unwrap();
        let configs = state_configurations(MeasurementBasis::Pauli, 1);
        let mut rng = StdRng::seed_from_u64(0);
        let results = Sampler::new(10_000)
            .exact()
            .sample_state(&state, &configs, &mut rng)
            .unwrap();
        let data = FitterDataBuilder::new().build(&aggregate(&results).unwrap()).unwrap();

        let fit = LstsqFitter::default().fit(&data).unwrap();
        assert!(fit.is_physical(1e-9));
        assert_abs_diff_eq!(fit.trace(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            fit.fidelity(&state.density_matrix).unwrap(),
            1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn partial_basis_still_fits() {
        // Z only: off-diagonal coordinates are unconstrained.
        let state = QuantumState::new(1);
        let configs = [Configuration::State(vec![MeasurementOp::Z])];
        let mut rng = StdRng::seed_from_u64(0);
        let results = Sampler::new(100).exact().sample_state(&state, &configs, &mut rng).unwrap();
        let data = FitterDataBuilder::new().build(&aggregate(&results).unwrap()).unwrap();

        let fit = LstsqFitter::default().fit(&data).unwrap();
        assert_abs_diff_eq!(fit.matrix[[0, 0]].re, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.matrix[[0, 1]].norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_design_matrix_is_singular() {
        let data = FitterData {
            probabilities: Array1::from(vec![0.5, 0.5]),
            basis_matrix: Arc::new(Array2::zeros((2, 4))),
            weights: Array1::ones(2),
            shots: Array1::from(vec![10.0, 10.0]),
            target: TomographyTarget::State { num_qubits: 1 },
            configurations: vec![Configuration::State(vec![MeasurementOp::Z])],
            outcomes_per_configuration: 2,
            weight_floor: 1e-4,
        };
        assert!(matches!(
            LstsqFitter::default().fit(&data),
            Err(TomographyError::SingularDesignMatrix(_))
        ));
    }
}
