use crate::core::errors::GateError;
use crate::core::utils;
use ndarray::{Array2, arr2};
use num_complex::Complex64;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);

/// Represents a quantum gate.
///
/// A gate is defined by its unitary matrix and the number of qubits it acts on.
#[derive(Clone, Debug)]
pub struct Gate {
    /// The unitary matrix of the gate.
    pub matrix: Array2<Complex64>,
    /// The number of qubits the gate acts on.
    pub num_qubits: usize,
}

impl Gate {
    /// Creates a new `Gate` from a unitary matrix.
    ///
    /// # Errors
    ///
    /// Returns a `GateError` if:
    /// - The matrix is not square.
    /// - The matrix dimensions are not a power of 2.
    /// - The matrix is not unitary.
    pub fn new(matrix: Array2<Complex64>) -> Result<Self, GateError> {
        let (rows, cols) = matrix.dim();

        if rows != cols {
            return Err(GateError::NotSquareMatrix);
        }

        if !rows.is_power_of_two() {
            return Err(GateError::InvalidDimensions);
        }

        if !Self::check_unitary(&matrix) {
            return Err(GateError::NonUnitary);
        }

        let num_qubits = rows.trailing_zeros() as usize;

        Ok(Self { matrix, num_qubits })
    }

    /// Standard single-qubit gates are unitary by construction.
    fn single(matrix: [[Complex64; 2]; 2]) -> Gate {
        Gate {
            matrix: arr2(&matrix),
            num_qubits: 1,
        }
    }

    /// Checks if a given matrix is unitary
    fn check_unitary(matrix: &Array2<Complex64>) -> bool {
        let (rows, _) = matrix.dim();
        let eye = Array2::<Complex64>::eye(rows);
        let product = matrix.dot(&utils::dagger(matrix));

        product
            .iter()
            .zip(eye.iter())
            .all(|(a, b)| (*a - *b).norm() < 1e-6)
    }

    /// Expands a gate to act on a larger system of qubits.
    ///
    /// The base `gate` is applied to `targets`, conditioned on every qubit in
    /// `controls` being 1, and Identity acts on the rest.
    ///
    /// # Errors
    ///
    /// Returns `GateError` if:
    /// - Duplicate indices are found in `targets` or `controls`.
    /// - A qubit is used as both control and target.
    pub fn expand_gate(
        num_total_qubits: usize,
        gate: &Gate,
        targets: &[usize],
        controls: &[usize],
    ) -> Result<Gate, GateError> {
        if let Some(dup) = utils::find_duplicate(targets) {
            return Err(GateError::DuplicateQubit(dup));
        }

        if let Some(dup) = utils::find_duplicate(controls) {
            return Err(GateError::DuplicateQubit(dup));
        }

        if let Some(&c) = controls.iter().find(|c| targets.contains(c)) {
            return Err(GateError::ControlTargetOverlap(c));
        }

        Ok(Gate {
            matrix: utils::expand_operator(num_total_qubits, &gate.matrix, targets, controls),
            num_qubits: num_total_qubits,
        })
    }

    // --- Standard Gates ---

    /// Identity gate.
    pub fn i() -> Gate {
        Gate::single([[ONE, ZERO], [ZERO, ONE]])
    }

    /// Pauli-X gate (NOT gate).
    pub fn x() -> Gate {
        Gate::single([[ZERO, ONE], [ONE, ZERO]])
    }

    /// Pauli-Y gate.
    pub fn y() -> Gate {
        Gate::single([[ZERO, -I], [I, ZERO]])
    }

    /// Pauli-Z gate.
    pub fn z() -> Gate {
        Gate::single([[ONE, ZERO], [ZERO, -ONE]])
    }

    /// Hadamard gate.
    pub fn h() -> Gate {
        let f = Complex64::new(std::f64::consts::FRAC_1_SQRT_2, 0.0);
        Gate::single([[f, f], [f, -f]])
    }

    /// S gate (Phase gate, Z^1/2).
    pub fn s() -> Gate {
        Gate::single([[ONE, ZERO], [ZERO, I]])
    }

    /// Adjoint of the S gate.
    pub fn sdg() -> Gate {
        Gate::single([[ONE, ZERO], [ZERO, -I]])
    }

    /// CNOT with qubit 0 as control and qubit 1 as target.
    pub fn cnot() -> Gate {
        Gate {
            matrix: utils::expand_operator(2, &Gate::x().matrix, &[1], &[0]),
            num_qubits: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_gates_are_unitary() {
        let gates = [
            Gate::i(),
            Gate::x(),
            Gate::y(),
            Gate::z(),
            Gate::h(),
            Gate::s(),
            Gate::sdg(),
            Gate::cnot(),
        ];
        for gate in gates {
            assert!(Gate::new(gate.matrix.clone()).is_ok());
        }
    }

    #[test]
    fn rejects_overlapping_control() {
        let result = Gate::expand_gate(2, &Gate::x(), &[0], &[0]);
        assert!(matches!(result, Err(GateError::ControlTargetOverlap(0))));
    }

    #[test]
    fn rejects_non_unitary() {
        let m = arr2(&[[ONE, ONE], [ZERO, ONE]]);
        assert!(matches!(Gate::new(m), Err(GateError::NonUnitary)));
    }
}
