//! Reconstruction of density matrices and Choi matrices from measured outcome counts.
//!
//! The pipeline is
//! [`aggregate`](aggregate::aggregate) → [`FitterDataBuilder`] →
//! ([`CalibrationMatrix::correct`] optionally) → [`LstsqFitter`] or [`SdpFitter`].

pub mod aggregate;
pub mod basis;
pub mod calibration;
pub mod fitter_data;
pub mod lstsq;
pub mod sdp;

pub use aggregate::{AggregatedData, CircuitResult, OutcomeAggregator, OutcomeHistogram};
pub use basis::{
    Configuration, MeasurementBasis, MeasurementOp, PreparationBasis, PreparationOp,
    calibration_configurations, process_configurations, state_configurations,
};
pub use calibration::{CalibrationMatrix, CorrectionMethod};
pub use fitter_data::{BasisMatrixCache, FitterData, FitterDataBuilder};
pub use lstsq::{LstsqFitter, LstsqOptions, project_to_physical};
pub use sdp::{AdmmSolver, SdpFitter, SdpOptions, SdpSolver, SolverKind};

use crate::core::errors::TomographyError;
use crate::core::{QuantumChannel, QuantumState, utils};
use ndarray::{Array1, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// What is being reconstructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TomographyTarget {
    /// Density matrix of `num_qubits` qubits.
    State { num_qubits: usize },
    /// Choi matrix of a channel from `input_qubits` to `output_qubits` qubits.
    Process {
        input_qubits: usize,
        output_qubits: usize,
    },
}

impl TomographyTarget {
    pub fn input_dim(self) -> usize {
        match self {
            TomographyTarget::State { .. } => 1,
            TomographyTarget::Process { input_qubits, .. } => 1 << input_qubits,
        }
    }

    pub fn output_dim(self) -> usize {
        match self {
            TomographyTarget::State { num_qubits } => 1 << num_qubits,
            TomographyTarget::Process { output_qubits, .. } => 1 << output_qubits,
        }
    }

    /// Side length of the reconstructed matrix.
    pub fn dim(self) -> usize {
        self.input_dim() * self.output_dim()
    }

    /// Trace of a physical matrix: 1 for a state, the input dimension for a
    /// trace-preserving channel's Choi matrix.
    pub fn default_trace(self) -> f64 {
        self.input_dim() as f64
    }

    pub fn is_process(self) -> bool {
        matches!(self, TomographyTarget::Process { .. })
    }
}

/// Hermitian matrix returned by a fitter.
#[derive(Clone, Debug)]
pub struct ReconstructedMatrix {
    pub matrix: Array2<Complex64>,
    pub target: TomographyTarget,
}

impl ReconstructedMatrix {
    pub fn trace(&self) -> f64 {
        utils::trace(&self.matrix).re
    }

    /// Eigenvalues in ascending order.
    pub fn eigenvalues(&self) -> Vec<f64> {
        let (values, _) = utils::hermitian_eigen(&self.matrix);
        let mut values = values.to_vec();
        values.sort_by(f64::total_cmp);
        values
    }

    /// Hermitian and positive semidefinite, both within `tolerance`.
    pub fn is_physical(&self, tolerance: f64) -> bool {
        utils::is_hermitian(&self.matrix, tolerance)
            && self.eigenvalues().first().is_none_or(|&min| min >= -tolerance)
    }

    /// Whether the partial trace over the output is the input identity.
    /// Always false for a density matrix.
    pub fn is_trace_preserving(&self, tolerance: f64) -> bool {
        if !self.target.is_process() {
            return false;
        }
        let reduced = utils::partial_trace_output(&self.matrix, self.target.output_dim());
        reduced.indexed_iter().all(|((i, j), v)| {
            let expected = if i == j { 1.0 } else { 0.0 };
            (v - Complex64::new(expected, 0.0)).norm() <= tolerance
        })
    }

    /// The matrix scaled to unit trace.
    pub fn normalized(&self) -> Array2<Complex64> {
        let trace = self.trace();
        self.matrix.mapv(|c| c / trace)
    }

    /// Uhlmann fidelity against `expected`, both normalized to unit trace.
    pub fn fidelity(&self, expected: &Array2<Complex64>) -> Result<f64, TomographyError> {
        if expected.dim() != self.matrix.dim() {
            return Err(TomographyError::DimensionMismatch {
                expected: self.matrix.nrows(),
                got: expected.nrows(),
            });
        }
        let expected_trace = utils::trace(expected).re;
        let expected = expected.mapv(|c| c / expected_trace);
        Ok(utils::state_fidelity(&self.normalized(), &expected))
    }

    /// Overlap $\langle\psi|\rho|\psi\rangle$ with a pure state vector.
    pub fn pure_state_fidelity(&self, psi: &Array1<Complex64>) -> Result<f64, TomographyError> {
        if psi.len() != self.matrix.nrows() {
            return Err(TomographyError::DimensionMismatch {
                expected: self.matrix.nrows(),
                got: psi.len(),
            });
        }
        Ok(utils::pure_state_fidelity(&self.normalized(), psi))
    }

    /// Fidelity between the normalized Choi matrices of this reconstruction and `channel`.
    pub fn process_fidelity(&self, channel: &QuantumChannel) -> Result<f64, TomographyError> {
        match self.target {
            TomographyTarget::Process {
                input_qubits,
                output_qubits,
            } if input_qubits == channel.num_qubits && output_qubits == channel.num_qubits => {
                self.fidelity(&channel.choi())
            }
            _ => Err(TomographyError::DimensionMismatch {
                expected: self.matrix.nrows(),
                got: channel.dim() * channel.dim(),
            }),
        }
    }

    /// Converts a reconstructed density matrix into a [`QuantumState`].
    pub fn into_state(self) -> Result<QuantumState, TomographyError> {
        match self.target {
            TomographyTarget::State { .. } => {
                Ok(QuantumState::from_density_matrix(self.normalized())?)
            }
            TomographyTarget::Process { .. } => Err(TomographyError::InvalidParameter(
                "a Choi matrix is not a quantum state".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Gate;
    use approx::assert_abs_diff_eq;

    #[test]
    fn target_dimensions() {
        let state = TomographyTarget::State { num_qubits: 2 };
        assert_eq!(state.dim(), 4);
        assert_eq!(state.default_trace(), 1.0);

        let process = TomographyTarget::Process {
            input_qubits: 1,
            output_qubits: 2,
        };
        assert_eq!(process.dim(), 8);
        assert_eq!(process.default_trace(), 2.0);
    }

    #[test]
    fn process_fidelity_of_exact_choi_is_one() {
        let channel = QuantumChannel::from_unitary(&Gate::h());
        let reconstructed = ReconstructedMatrix {
            matrix: channel.choi(),
            target: TomographyTarget::Process {
                input_qubits: 1,
                output_qubits: 1,
            },
        };
        assert!(reconstructed.is_physical(1e-9));
        assert!(reconstructed.is_trace_preserving(1e-9));
        assert_abs_diff_eq!(reconstructed.trace(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            reconstructed.process_fidelity(&channel).unwrap(),
            1.0,
            epsilon = 1e-9
        );
        assert!(reconstructed.into_state().is_err());
    }
}
