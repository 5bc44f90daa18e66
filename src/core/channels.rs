use crate::core::errors::ChannelError;
use crate::core::gates::Gate;
use crate::core::utils;
use ndarray::{Array2, array};
use num_complex::Complex64;

/// A completely positive trace-preserving map in Kraus form.
#[derive(Clone, Debug)]
pub struct QuantumChannel {
    pub kraus_ops: Vec<Array2<Complex64>>,
    pub num_qubits: usize,
}

impl QuantumChannel {
    pub fn new(kraus_ops: Vec<Array2<Complex64>>) -> Result<Self, ChannelError> {
        let Some(first) = kraus_ops.first() else {
            return Err(ChannelError::Empty);
        };

        let (rows, cols) = first.dim();
        if rows != cols || !rows.is_power_of_two() {
            return Err(ChannelError::InvalidDimensions);
        }

        if kraus_ops.iter().any(|op| op.dim() != (rows, cols)) {
            return Err(ChannelError::OperatorSizeMismatch);
        }

        if !utils::check_completeness(&kraus_ops, rows) {
            return Err(ChannelError::NotComplete);
        }

        Ok(Self {
            kraus_ops,
            num_qubits: rows.trailing_zeros() as usize,
        })
    }

    /// Channel conjugating by a single unitary.
    pub fn from_unitary(gate: &Gate) -> Self {
        Self {
            kraus_ops: vec![gate.matrix.clone()],
            num_qubits: gate.num_qubits,
        }
    }

    /// Hilbert-space dimension the channel acts on.
    pub fn dim(&self) -> usize {
        1 << self.num_qubits
    }

    /// Expands Kraus operators to a larger system
    pub fn get_expanded_operators(
        &self,
        num_total_qubits: usize,
        targets: &[usize],
    ) -> Result<Vec<Array2<Complex64>>, ChannelError> {
        if targets.len() != self.num_qubits {
            return Err(ChannelError::InvalidDimensions);
        }

        Ok(self
            .kraus_ops
            .iter()
            .map(|op| utils::expand_operator(num_total_qubits, op, targets, &[]))
            .collect())
    }

    /// Applies the channel to an operator on exactly its own register.
    ///
    /// The operator need not be Hermitian, which the Choi construction relies on.
    pub fn evolve(&self, operator: &Array2<Complex64>) -> Result<Array2<Complex64>, ChannelError> {
        let dim = self.dim();
        if operator.dim() != (dim, dim) {
            return Err(ChannelError::OperatorSizeMismatch);
        }

        Ok(self.apply_kraus(operator))
    }

    fn apply_kraus(&self, operator: &Array2<Complex64>) -> Array2<Complex64> {
        let (rows, cols) = operator.dim();
        self.kraus_ops
            .iter()
            .fold(Array2::<Complex64>::zeros((rows, cols)), |acc, k| {
                acc + k.dot(operator).dot(&utils::dagger(k))
            })
    }

    /// Choi matrix $J = \sum_{ij} |i\rangle\langle j| \otimes \mathcal{E}(|i\rangle\langle j|)$.
    ///
    /// Input factor first; the trace equals the input dimension.
    pub fn choi(&self) -> Array2<Complex64> {
        let dim = self.dim();
        let mut choi = Array2::<Complex64>::zeros((dim * dim, dim * dim));

        for i in 0..dim {
            for j in 0..dim {
                let mut unit = Array2::<Complex64>::zeros((dim, dim));
                unit[[i, j]] = Complex64::new(1.0, 0.0);
                let image = self.apply_kraus(&unit);
                choi.slice_mut(ndarray::s![i * dim..(i + 1) * dim, j * dim..(j + 1) * dim])
                    .assign(&image);
            }
        }
        choi
    }

    /// Depolarizing Channel
    /// The QuantumState totally randomices with porbability p
    pub fn depolarizing(p: f64) -> Result<QuantumChannel, ChannelError> {
        validate_prob(p)?;

        let weight_i = (1.0 - 0.75 * p).sqrt();
        let weight_xyz = (p / 4.0).sqrt();

        let ops = [Gate::i(), Gate::x(), Gate::y(), Gate::z()]
            .into_iter()
            .zip([weight_i, weight_xyz, weight_xyz, weight_xyz])
            .map(|(gate, w)| gate.matrix.mapv(|c| c * w))
            .collect();

        QuantumChannel::new(ops)
    }

    /// Amplitude Damping -> T1 relaxation
    pub fn amplitude_damping(gamma: f64) -> Result<QuantumChannel, ChannelError> {
        validate_prob(gamma)?;

        let k0 = array![
            [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
            [Complex64::new(0.0, 0.0), Complex64::new((1.0 - gamma).sqrt(), 0.0)]
        ];

        let k1 = array![
            [Complex64::new(0.0, 0.0), Complex64::new(gamma.sqrt(), 0.0)],
            [Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)]
        ];

        QuantumChannel::new(vec![k0, k1])
    }
}

/// Validate probability parameter
fn validate_prob(p: f64) -> Result<(), ChannelError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(ChannelError::InvalidProbability(p));
    }
    Ok(())
}
