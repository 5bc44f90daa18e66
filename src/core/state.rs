use crate::core::channels::QuantumChannel;
use crate::core::errors::{ChannelError, StateError};
use crate::core::gates::Gate;
use crate::core::utils::{self, find_duplicate, trace};
use ndarray::{Array1, Array2};
use num_complex::Complex64;

#[derive(Clone, Debug)]
pub struct QuantumState {
    pub density_matrix: Array2<Complex64>,
    pub num_qubits: usize,
}

impl QuantumState {
    /// Creates a new quantum state initialized to |0...0>.
    pub fn new(num_qubits: usize) -> Self {
        let dim = 1 << num_qubits;
        let mut density_matrix = Array2::<Complex64>::zeros((dim, dim));
        density_matrix[[0, 0]] = Complex64::new(1.0, 0.0);

        Self {
            density_matrix,
            num_qubits,
        }
    }

    /// Validates that the input vector is a valid quantum state.
    fn check_vector_state(vector: &Array1<Complex64>) -> Result<(), StateError> {
        if !vector.len().is_power_of_two() {
            return Err(StateError::InvalidDimensions);
        }

        let norm_sqr: f64 = vector.iter().map(|c| c.norm_sqr()).sum();
        if (norm_sqr - 1.0).abs() > 1e-12 {
            return Err(StateError::NotNormalized(norm_sqr));
        }

        Ok(())
    }

    /// Checks the validity of a density matrix
    fn check_density_matrix(matrix: &Array2<Complex64>) -> Result<(), StateError> {
        let (rows, cols) = matrix.dim();

        if rows != cols {
            return Err(StateError::DimensionMismatch {
                expected: rows,
                got_rows: rows,
                got_cols: cols,
            });
        }
        if !rows.is_power_of_two() {
            return Err(StateError::InvalidDimensions);
        }

        let tr = trace(matrix);
        if (tr - Complex64::new(1.0, 0.0)).norm() > 1e-9 {
            return Err(StateError::InvalidTrace(tr));
        }

        Ok(())
    }

    /// Apply already extended operator ot whole system
    fn apply_operator(&mut self, u: &Array2<Complex64>) -> Result<(), StateError> {
        let (rows, cols) = u.dim();
        let dim = 1 << self.num_qubits;

        if rows != dim || cols != dim {
            return Err(StateError::DimensionMismatch {
                expected: dim,
                got_rows: rows,
                got_cols: cols,
            });
        }

        self.density_matrix = u.dot(&self.density_matrix).dot(&utils::dagger(u));
        Ok(())
    }

    /// Checks if a given index is within the system QuantumState's range
    fn validate_qubit_index(&self, index: usize) -> Result<(), StateError> {
        if index >= self.num_qubits {
            return Err(StateError::IndexOutOfBounds {
                index,
                num_qubits: self.num_qubits,
            });
        }
        Ok(())
    }

    /// Creates a QuantumState from a generic vector state.
    pub fn from_state_vector(vector: Array1<Complex64>) -> Result<Self, StateError> {
        Self::check_vector_state(&vector)?;

        let num_qubits = vector.len().trailing_zeros() as usize;

        // rho = |psi><psi|
        Ok(Self {
            density_matrix: utils::outer_product(&vector, &vector),
            num_qubits,
        })
    }

    /// Creates a QuantumState from a generic density matrix.
    pub fn from_density_matrix(matrix: Array2<Complex64>) -> Result<Self, StateError> {
        Self::check_density_matrix(&matrix)?;
        // log_2 as rows is power of two
        let num_qubits = matrix.nrows().trailing_zeros() as usize;

        Ok(Self {
            density_matrix: matrix,
            num_qubits,
        })
    }

    /// Checks if a QuantumState is valid.
    pub fn is_valid(&self) -> Result<(), StateError> {
        Self::check_density_matrix(&self.density_matrix)
    }

    /// Applies non controlled quantum gate
    pub fn apply(&mut self, gate: &Gate, target_qubits: &[usize]) -> Result<(), StateError> {
        self.apply_controlled(gate, target_qubits, None)
    }

    /// Applies generic quantum gate
    pub fn apply_controlled(
        &mut self,
        gate: &Gate,
        target_qubits: &[usize],
        control_qubits: Option<&[usize]>,
    ) -> Result<(), StateError> {
        if gate.num_qubits != target_qubits.len() {
            return Err(StateError::DimensionMismatch {
                expected: gate.num_qubits,
                got_rows: target_qubits.len(),
                got_cols: 0,
            });
        }

        let controls = control_qubits.unwrap_or(&[]);
        for &q in target_qubits.iter().chain(controls) {
            self.validate_qubit_index(q)?;
        }

        let full_gate_operator = Gate::expand_gate(self.num_qubits, gate, target_qubits, controls)?;

        self.apply_operator(&full_gate_operator.matrix)
    }

    /// Apply QuantumChannel to QuantumState
    pub fn apply_channel(
        &mut self,
        channel: &QuantumChannel,
        target_qubits: &[usize],
    ) -> Result<(), StateError> {
        if let Some(dup) = find_duplicate(target_qubits) {
            return Err(StateError::ChannelError(ChannelError::DuplicateQubit(dup)));
        }
        for &q in target_qubits {
            self.validate_qubit_index(q)?;
        }

        let ops = channel.get_expanded_operators(self.num_qubits, target_qubits)?;
        let dim = self.density_matrix.nrows();

        self.density_matrix = ops
            .iter()
            .fold(Array2::<Complex64>::zeros((dim, dim)), |acc, k| {
                acc + k.dot(&self.density_matrix).dot(&utils::dagger(k))
            });

        Ok(())
    }

    /// Probability $\mathrm{Tr}(E_k \rho)$ of each effect in `effects`.
    ///
    /// Effects must already act on the whole register. Tiny negative values
    /// produced by rounding are clamped to zero.
    pub fn outcome_probabilities(
        &self,
        effects: &[Array2<Complex64>],
    ) -> Result<Vec<f64>, StateError> {
        let dim = self.density_matrix.nrows();
        effects
            .iter()
            .map(|effect| {
                if effect.dim() != (dim, dim) {
                    return Err(StateError::DimensionMismatch {
                        expected: dim,
                        got_rows: effect.nrows(),
                        got_cols: effect.ncols(),
                    });
                }
                Ok(trace(&effect.dot(&self.density_matrix)).re.max(0.0))
            })
            .collect()
    }

    /// Purity $\mathrm{Tr}(\rho^2)$.
    pub fn purity(&self) -> f64 {
        trace(&self.density_matrix.dot(&self.density_matrix)).re
    }

    /// Uhlmann fidelity with another state of the same size.
    pub fn fidelity(&self, other: &QuantumState) -> Result<f64, StateError> {
        if self.num_qubits != other.num_qubits {
            return Err(StateError::DimensionMismatch {
                expected: self.density_matrix.nrows(),
                got_rows: other.density_matrix.nrows(),
                got_cols: other.density_matrix.ncols(),
            });
        }
        Ok(utils::state_fidelity(
            &self.density_matrix,
            &other.density_matrix,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bell() -> QuantumState {
        let mut state = QuantumState::new(2);
        state.apply(&Gate::h(), &[0]).unwrap();
        state.apply(&Gate::cnot(), &[0, 1]).unwrap();
        state
    }

    #[test]
    fn bell_preparation_populates_corners() {
        let state = bell();
        let rho = &state.density_matrix;
        assert_abs_diff_eq!(rho[[0, 0]].re, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(rho[[3, 3]].re, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(rho[[0, 3]].re, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(state.purity(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn channel_keeps_trace() {
        let mut state = bell();
        let channel = QuantumChannel::depolarizing(0.3).unwrap();
        state.apply_channel(&channel, &[1]).unwrap();
        assert!(state.is_valid().is_ok());
        assert!(state.purity() < 1.0);
    }

    #[test]
    fn controlled_x_matches_cnot() {
        let mut state = QuantumState::new(2);
        state.apply(&Gate::h(), &[0]).unwrap();
        state.apply_controlled(&Gate::x(), &[1], Some(&[0][..])).unwrap();
        for (a, b) in state.density_matrix.iter().zip(bell().density_matrix.iter()) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-12);
        }

        let err = state.apply_controlled(&Gate::x(), &[1], Some(&[1][..])).unwrap_err();
        assert!(matches!(err, StateError::GateError(_)));
    }

    #[test]
    fn rejects_out_of_range_qubit() {
        let mut state = QuantumState::new(1);
        let err = state.apply(&Gate::x(), &[3]).unwrap_err();
        assert!(matches!(err, StateError::IndexOutOfBounds { index: 3, .. }));
    }
}
