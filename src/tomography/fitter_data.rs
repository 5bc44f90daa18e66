//! Linear measurement model for the fitters.
//!
//! A D×D Hermitian matrix M is represented by D² real coordinates in an
//! orthonormal Hermitian basis:
//!
//! - `x[i*D + i] = M[i][i]`
//! - `x[i*D + j] = √2 Re M[i][j]` for i < j
//! - `x[j*D + i] = √2 Im M[i][j]` for i < j
//!
//! Because the basis is orthonormal, `Tr(P M)` is the dot product of the
//! coordinates of P and M, so every row of the basis matrix is simply the
//! coordinate vector of an outcome operator.

use crate::core::errors::TomographyError;
use crate::core::utils;
use crate::tomography::TomographyTarget;
use crate::tomography::aggregate::AggregatedData;
use crate::tomography::basis::{
    Configuration, MeasurementBasis, PreparationBasis, measurement_operator,
    preparation_operator,
};
use ndarray::{Array1, Array2, ArrayView1, s};
use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::SQRT_2;
use std::sync::Arc;
use tracing::debug;

/// Default lower bound on `p(1-p)` in the weight denominator.
pub const DEFAULT_WEIGHT_FLOOR: f64 = 1e-4;

/// Real coordinates of the Hermitian part of `matrix`.
pub fn hermitian_to_coordinates(matrix: &Array2<Complex64>) -> Array1<f64> {
    let dim = matrix.nrows();
    let mut coords = Array1::<f64>::zeros(dim * dim);
    for i in 0..dim {
        coords[i * dim + i] = matrix[[i, i]].re;
        for j in (i + 1)..dim {
            // average with the conjugate entry so non-Hermitian input is symmetrized
            let z = (matrix[[i, j]] + matrix[[j, i]].conj()) * 0.5;
            coords[i * dim + j] = SQRT_2 * z.re;
            coords[j * dim + i] = SQRT_2 * z.im;
        }
    }
    coords
}

/// Hermitian matrix with the given coordinates.
pub fn coordinates_to_hermitian(coords: ArrayView1<f64>, dim: usize) -> Array2<Complex64> {
    let mut matrix = Array2::<Complex64>::zeros((dim, dim));
    for i in 0..dim {
        matrix[[i, i]] = Complex64::new(coords[i * dim + i], 0.0);
        for j in (i + 1)..dim {
            let z = Complex64::new(coords[i * dim + j], coords[j * dim + i]) / SQRT_2;
            matrix[[i, j]] = z;
            matrix[[j, i]] = z.conj();
        }
    }
    matrix
}

/// Inverse-standard-error weight of a binomial frequency estimate.
fn binomial_weight(probability: f64, shots: f64, floor: f64) -> f64 {
    shots.sqrt() / (probability * (1.0 - probability)).max(floor).sqrt()
}

/// Probability vector, basis matrix and weights aligned by row.
///
/// Rows are grouped by configuration in label order; each configuration
/// contributes one row per outcome index `0..2^k`, zero counts included.
#[derive(Clone, Debug)]
pub struct FitterData {
    pub probabilities: Array1<f64>,
    pub basis_matrix: Arc<Array2<f64>>,
    pub weights: Array1<f64>,
    /// Shots of the configuration each row belongs to.
    pub shots: Array1<f64>,
    pub target: TomographyTarget,
    pub configurations: Vec<Configuration>,
    pub outcomes_per_configuration: usize,
    pub weight_floor: f64,
}

impl FitterData {
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Copy with replaced probabilities and weights recomputed from them.
    pub fn with_probabilities(
        &self,
        probabilities: Array1<f64>,
    ) -> Result<FitterData, TomographyError> {
        if probabilities.len() != self.len() {
            return Err(TomographyError::DimensionMismatch {
                expected: self.len(),
                got: probabilities.len(),
            });
        }

        let weights = probabilities
            .iter()
            .zip(self.shots.iter())
            .map(|(&p, &n)| binomial_weight(p, n, self.weight_floor))
            .collect();

        Ok(FitterData {
            probabilities,
            weights,
            ..self.clone()
        })
    }

    /// `(W·A, W·y)`, or `(A, y)` when `weighted` is false.
    pub fn weighted_system(&self, weighted: bool) -> (Array2<f64>, Array1<f64>) {
        let mut a = self.basis_matrix.as_ref().clone();
        let mut y = self.probabilities.clone();
        if weighted {
            let rows = a.rows_mut().into_iter().zip(y.iter_mut());
            for ((mut row, yi), &w) in rows.zip(self.weights.iter()) {
                row *= w;
                *yi *= w;
            }
        }
        (a, y)
    }
}

/// Key identifying a basis matrix: everything it depends on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BasisMatrixKey {
    pub target: TomographyTarget,
    pub measurement_basis: MeasurementBasis,
    pub preparation_basis: PreparationBasis,
    /// Sorted configuration labels.
    pub configurations: Vec<Configuration>,
}

/// Caller-owned store of previously built basis matrices.
#[derive(Debug, Default)]
pub struct BasisMatrixCache {
    entries: HashMap<BasisMatrixKey, Arc<Array2<f64>>>,
}

impl BasisMatrixCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BasisMatrixKey) -> Option<Arc<Array2<f64>>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: BasisMatrixKey, matrix: Arc<Array2<f64>>) {
        self.entries.insert(key, matrix);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Turns [`AggregatedData`] into [`FitterData`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitterDataBuilder {
    pub measurement_basis: MeasurementBasis,
    pub preparation_basis: PreparationBasis,
    /// Additive smoothing β ≥ 0 applied to every outcome count.
    pub beta: f64,
    /// ε > 0 bounding the binomial variance away from zero.
    pub weight_floor: f64,
}

impl Default for FitterDataBuilder {
    fn default() -> Self {
        Self {
            measurement_basis: MeasurementBasis::Pauli,
            preparation_basis: PreparationBasis::Pauli,
            beta: 0.0,
            weight_floor: DEFAULT_WEIGHT_FLOOR,
        }
    }
}

impl FitterDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preparation_basis(mut self, basis: PreparationBasis) -> Self {
        self.preparation_basis = basis;
        self
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_weight_floor(mut self, floor: f64) -> Self {
        self.weight_floor = floor;
        self
    }

    pub fn build(&self, data: &AggregatedData) -> Result<FitterData, TomographyError> {
        self.build_inner(data, None)
    }

    /// Like [`build`](Self::build), reusing or filling `cache` for the basis matrix.
    pub fn build_cached(
        &self,
        data: &AggregatedData,
        cache: &mut BasisMatrixCache,
    ) -> Result<FitterData, TomographyError> {
        self.build_inner(data, Some(cache))
    }

    fn validate(&self) -> Result<(), TomographyError> {
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return Err(TomographyError::InvalidParameter(format!(
                "smoothing beta must be a finite non-negative number, got {}",
                self.beta
            )));
        }
        if !(self.weight_floor.is_finite() && self.weight_floor > 0.0) {
            return Err(TomographyError::InvalidParameter(format!(
                "weight floor must be positive, got {}",
                self.weight_floor
            )));
        }
        Ok(())
    }

    /// Target implied by the configurations, checking they agree on qubit counts.
    fn target(&self, data: &AggregatedData) -> Result<TomographyTarget, TomographyError> {
        let mut configurations = data.configurations();
        let first = configurations.next().ok_or(TomographyError::EmptyAggregatedData)?;
        let target = self.configuration_target(first)?;

        for configuration in configurations {
            let other = self.configuration_target(configuration)?;
            match (target, other) {
                (
                    TomographyTarget::State { num_qubits: expected },
                    TomographyTarget::State { num_qubits: got },
                ) if expected != got => {
                    return Err(TomographyError::InconsistentQubitCount { expected, got });
                }
                (
                    TomographyTarget::Process { input_qubits, output_qubits },
                    TomographyTarget::Process {
                        input_qubits: got_in,
                        output_qubits: got_out,
                    },
                ) => {
                    if input_qubits != got_in {
                        return Err(TomographyError::InconsistentQubitCount {
                            expected: input_qubits,
                            got: got_in,
                        });
                    }
                    if output_qubits != got_out {
                        return Err(TomographyError::InconsistentQubitCount {
                            expected: output_qubits,
                            got: got_out,
                        });
                    }
                }
                (TomographyTarget::State { .. }, TomographyTarget::State { .. }) => {}
                _ => {
                    return Err(TomographyError::InvalidParameter(
                        "state and process configurations cannot be fitted together".into(),
                    ));
                }
            }
        }
        Ok(target)
    }

    fn configuration_target(
        &self,
        configuration: &Configuration,
    ) -> Result<TomographyTarget, TomographyError> {
        match configuration {
            Configuration::State(measurement) => Ok(TomographyTarget::State {
                num_qubits: measurement.len(),
            }),
            Configuration::Process {
                preparation,
                measurement,
            } => {
                if let Some(op) = preparation
                    .iter()
                    .find(|op| !self.preparation_basis.recognizes(**op))
                {
                    return Err(TomographyError::UnknownBasisTag(op.to_string()));
                }
                Ok(TomographyTarget::Process {
                    input_qubits: preparation.len(),
                    output_qubits: measurement.len(),
                })
            }
            Configuration::Calibration(_) => Err(TomographyError::InvalidParameter(format!(
                "calibration configuration {configuration} cannot be used for tomography"
            ))),
        }
    }

    fn build_inner(
        &self,
        data: &AggregatedData,
        cache: Option<&mut BasisMatrixCache>,
    ) -> Result<FitterData, TomographyError> {
        self.validate()?;
        let target = self.target(data)?;

        let configurations: Vec<Configuration> = data.configurations().cloned().collect();
        let num_bits = configurations[0].measured_qubits();
        let outcomes = 1usize << num_bits;
        let rows = configurations.len() * outcomes;

        let mut probabilities = Array1::<f64>::zeros(rows);
        let mut weights = Array1::<f64>::zeros(rows);
        let mut shots = Array1::<f64>::zeros(rows);

        for (block, (configuration, histogram)) in data.iter().enumerate() {
            let total = histogram.shots();
            if total == 0 {
                return Err(TomographyError::InvalidParameter(format!(
                    "configuration {configuration} has no shots"
                )));
            }
            let total = total as f64;
            let denominator = total + self.beta * outcomes as f64;

            for (o, count) in histogram.indexed_counts(num_bits)?.into_iter().enumerate() {
                let row = block * outcomes + o;
                let p = (count as f64 + self.beta) / denominator;
                probabilities[row] = p;
                weights[row] = binomial_weight(p, total, self.weight_floor);
                shots[row] = total;
            }
        }

        let key = BasisMatrixKey {
            target,
            measurement_basis: self.measurement_basis,
            preparation_basis: self.preparation_basis,
            configurations: configurations.clone(),
        };

        let basis_matrix = match cache {
            Some(cache) => match cache.get(&key) {
                Some(matrix) => {
                    debug!(configurations = configurations.len(), "basis matrix cache hit");
                    matrix
                }
                None => {
                    let matrix = Arc::new(build_basis_matrix(&configurations, target, outcomes)?);
                    cache.insert(key, Arc::clone(&matrix));
                    matrix
                }
            },
            None => Arc::new(build_basis_matrix(&configurations, target, outcomes)?),
        };

        debug!(
            rows = basis_matrix.nrows(),
            columns = basis_matrix.ncols(),
            beta = self.beta,
            "built fitter data"
        );

        Ok(FitterData {
            probabilities,
            basis_matrix,
            weights,
            shots,
            target,
            configurations,
            outcomes_per_configuration: outcomes,
            weight_floor: self.weight_floor,
        })
    }
}

/// Outcome operator whose overlap with the target matrix is the outcome probability.
fn outcome_operator(
    configuration: &Configuration,
    outcome: usize,
) -> Result<Array2<Complex64>, TomographyError> {
    match configuration {
        Configuration::Process {
            preparation,
            measurement,
        } => {
            // Tr[(ρᵀ ⊗ E) J] = Tr[E 𝓔(ρ)]
            let input = preparation_operator(preparation).t().to_owned();
            Ok(utils::kronecker_product(
                &input,
                &measurement_operator(measurement, outcome),
            ))
        }
        Configuration::State(measurement) => Ok(measurement_operator(measurement, outcome)),
        Configuration::Calibration(_) => Err(TomographyError::InvalidParameter(format!(
            "calibration configuration {configuration} has no outcome operator"
        ))),
    }
}

/// Stacks the rows of every configuration, built in parallel.
fn build_basis_matrix(
    configurations: &[Configuration],
    target: TomographyTarget,
    outcomes: usize,
) -> Result<Array2<f64>, TomographyError> {
    let dim = target.dim();
    let blocks: Vec<Vec<Array1<f64>>> = configurations
        .par_iter()
        .map(|configuration| {
            (0..outcomes)
                .map(|o| Ok(hermitian_to_coordinates(&outcome_operator(configuration, o)?)))
                .collect::<Result<Vec<_>, TomographyError>>()
        })
        .collect::<Result<_, _>>()?;

    let mut matrix = Array2::<f64>::zeros((configurations.len() * outcomes, dim * dim));
    for (block, rows) in blocks.iter().enumerate() {
        for (o, row) in rows.iter().enumerate() {
            matrix.slice_mut(s![block * outcomes + o, ..]).assign(row);
        }
    }
    Ok(matrix)
}
