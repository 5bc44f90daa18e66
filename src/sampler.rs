use crate::core::errors::TomographyError;
use crate::core::{QuantumChannel, QuantumState};
use crate::tomography::aggregate::CircuitResult;
use crate::tomography::basis::{
    Configuration, calibration_configurations, measurement_operator, preparation_operator,
};
use ndarray::Array2;
use rand::Rng;
use std::collections::BTreeMap;

/// Synthetic measurement record generator.
///
/// The `Sampler` produces the histograms an execution backend would return
/// for every configuration of a tomography experiment on a known state or
/// channel, optionally adding noise before measurement and readout errors
/// after it.
#[derive(Debug, Clone)]
pub struct Sampler {
    /// Optional quantum channel applied to the measured state.
    pub channel: Option<QuantumChannel>,
    /// Per-qubit readout confusion matrix, `A[i][j] = P(read i | state j)`.
    pub readout: Option<Array2<f64>>,
    pub shots: u64,
    /// Report rounded expected counts instead of drawing samples.
    pub exact: bool,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Sampler {
    /// Noise-free sampler drawing `shots` samples per configuration.
    pub fn new(shots: u64) -> Self {
        Self {
            channel: None,
            readout: None,
            shots,
            exact: false,
        }
    }

    /// Sets a channel applied before measurement, either to the whole
    /// register when sizes match or to every qubit separately.
    pub fn with_channel(mut self, channel: QuantumChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Sets an identical readout confusion matrix on every qubit.
    pub fn with_readout_error(mut self, confusion: Array2<f64>) -> Result<Self, TomographyError> {
        if confusion.dim() != (2, 2) {
            return Err(TomographyError::DimensionMismatch {
                expected: 2,
                got: confusion.nrows(),
            });
        }
        for column in confusion.columns() {
            if column.iter().any(|&p| p < 0.0) || (column.sum() - 1.0).abs() > 1e-9 {
                return Err(TomographyError::InvalidParameter(
                    "readout confusion columns must be probability distributions".into(),
                ));
            }
        }
        self.readout = Some(confusion);
        Ok(self)
    }

    /// Switches to deterministic expected counts.
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    /// Histograms for the state tomography configurations of `state`.
    pub fn sample_state<R: Rng>(
        &self,
        state: &QuantumState,
        configurations: &[Configuration],
        rng: &mut R,
    ) -> Result<Vec<CircuitResult>, TomographyError> {
        let state = self.noisy(state)?;

        configurations
            .iter()
            .map(|configuration| {
                let Configuration::State(measurement) = configuration else {
                    return Err(TomographyError::InvalidParameter(format!(
                        "{configuration} is not a state tomography configuration"
                    )));
                };
                if measurement.len() != state.num_qubits {
                    return Err(TomographyError::InconsistentQubitCount {
                        expected: state.num_qubits,
                        got: measurement.len(),
                    });
                }
                let effects: Vec<_> = (0..1usize << measurement.len())
                    .map(|o| measurement_operator(measurement, o))
                    .collect();
                let probs = state.outcome_probabilities(&effects)?;
                Ok(self.record(configuration, probs, measurement.len(), rng))
            })
            .collect()
    }

    /// Histograms for the process tomography configurations of `process`.
    pub fn sample_process<R: Rng>(
        &self,
        process: &QuantumChannel,
        configurations: &[Configuration],
        rng: &mut R,
    ) -> Result<Vec<CircuitResult>, TomographyError> {
        configurations
            .iter()
            .map(|configuration| {
                let Configuration::Process {
                    preparation,
                    measurement,
                } = configuration
                else {
                    return Err(TomographyError::InvalidParameter(format!(
                        "{configuration} is not a process tomography configuration"
                    )));
                };
                for len in [preparation.len(), measurement.len()] {
                    if len != process.num_qubits {
                        return Err(TomographyError::InconsistentQubitCount {
                            expected: process.num_qubits,
                            got: len,
                        });
                    }
                }

                let output = process.evolve(&preparation_operator(preparation))?;
                let state = self.noisy(&QuantumState::from_density_matrix(output)?)?;
                let effects: Vec<_> = (0..1usize << measurement.len())
                    .map(|o| measurement_operator(measurement, o))
                    .collect();
                let probs = state.outcome_probabilities(&effects)?;
                Ok(self.record(configuration, probs, measurement.len(), rng))
            })
            .collect()
    }

    /// Histograms of the `2^m` readout calibration circuits.
    ///
    /// Only the readout error acts here; the channel models state noise.
    pub fn sample_calibration<R: Rng>(
        &self,
        num_qubits: usize,
        rng: &mut R,
    ) -> Vec<CircuitResult> {
        calibration_configurations(num_qubits)
            .iter()
            .enumerate()
            .map(|(prepared, configuration)| {
                let mut probs = vec![0.0; 1 << num_qubits];
                probs[prepared] = 1.0;
                self.record(configuration, probs, num_qubits, rng)
            })
            .collect()
    }

    fn noisy(&self, state: &QuantumState) -> Result<QuantumState, TomographyError> {
        let Some(channel) = &self.channel else {
            return Ok(state.clone());
        };

        let mut state = state.clone();
        if channel.num_qubits == state.num_qubits {
            let targets: Vec<usize> = (0..state.num_qubits).collect();
            state.apply_channel(channel, &targets)?;
        } else {
            for q in 0..state.num_qubits {
                state.apply_channel(channel, &[q])?;
            }
        }
        Ok(state)
    }

    /// Pushes outcome probabilities through the per-qubit confusion matrix.
    fn misread(&self, probs: Vec<f64>, num_bits: usize) -> Vec<f64> {
        let Some(confusion) = &self.readout else {
            return probs;
        };

        (0..num_bits).fold(probs, |probs, q| {
            let mask = 1usize << q;
            (0..probs.len())
                .map(|i| {
                    let read = usize::from(i & mask != 0);
                    confusion[[read, 0]] * probs[i & !mask] + confusion[[read, 1]] * probs[i | mask]
                })
                .collect()
        })
    }

    fn record<R: Rng>(
        &self,
        configuration: &Configuration,
        probs: Vec<f64>,
        num_bits: usize,
        rng: &mut R,
    ) -> CircuitResult {
        let probs = self.misread(probs, num_bits);

        let raw_counts: Vec<u64> = if self.exact {
            probs
                .iter()
                .map(|p| (p * self.shots as f64).round() as u64)
                .collect()
        } else {
            // Cumulative distribution computed once per configuration.
            let cdf: Vec<f64> = probs
                .iter()
                .scan(0.0, |acc, &p| {
                    *acc += p;
                    Some(*acc)
                })
                .collect();

            let mut raw_counts = vec![0u64; probs.len()];
            for _ in 0..self.shots {
                let r: f64 = rng.random();
                // Rounding can leave the last CDF entry just below 1.
                let idx = cdf.partition_point(|&c| c <= r).min(probs.len() - 1);
                raw_counts[idx] += 1;
            }
            raw_counts
        };

        let counts: BTreeMap<String, u64> = raw_counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(idx, &count)| (format!("{idx:0num_bits$b}"), count))
            .collect();

        CircuitResult::labelled(configuration, counts)
    }
}
