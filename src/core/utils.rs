//! Utility functions for quantum operations.
//!
//! This module contains helper functions for:
//! - Matrix operations (Kronecker product, trace, adjoint, outer product, square root).
//! - Hermitian eigendecomposition through nalgebra.
//! - Operator expansion to larger systems and partial traces.
//! - Fidelity between density matrices.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use num_complex::Complex64;

/// Computes the Kronecker (Tensor) product of two matrices.
///
/// If `A` is an $m \times n$ matrix and `B` is a $p \times q$ matrix,
/// the result is an $mp \times nq$ matrix.
pub fn kronecker_product(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Array2<Complex64> {
    let (m, n) = a.dim();
    let (p, q) = b.dim();

    Array2::from_shape_fn((m * p, n * q), |(row, col)| {
        a[[row / p, col / q]] * b[[row % p, col % q]]
    })
}

/// Kronecker product of a sequence, leftmost factor most significant.
///
/// An empty sequence yields the 1x1 identity.
pub fn kron_all<'a, I>(factors: I) -> Array2<Complex64>
where
    I: IntoIterator<Item = &'a Array2<Complex64>>,
{
    factors
        .into_iter()
        .fold(Array2::<Complex64>::eye(1), |acc, f| kronecker_product(&acc, f))
}

/// Computes the trace of a matrix (sum of diagonal elements).
pub fn trace(matrix: &Array2<Complex64>) -> Complex64 {
    matrix.diag().sum()
}

/// Conjugate transpose.
pub fn dagger(matrix: &Array2<Complex64>) -> Array2<Complex64> {
    matrix.t().mapv(|c| c.conj())
}

/// Returns $(M + M^\dagger) / 2$.
pub fn hermitize(matrix: &Array2<Complex64>) -> Array2<Complex64> {
    (matrix + &dagger(matrix)).mapv(|c| c * 0.5)
}

/// Generates the full operator matrix ($2^N \times 2^N$) for the whole system.
///
/// It expands a local operator acting on `targets` (and controlled by `controls`)
/// to an operator on the full system of `num_total_qubits`.
///
/// # Arguments
///
/// * `num_total_qubits` - Total number of qubits in the system.
/// * `matrix` - The matrix representation of the local gate.
/// * `targets` - Indices of the target qubits.
/// * `controls` - Indices of the control qubits.
pub fn expand_operator(
    num_total_qubits: usize,
    matrix: &Array2<Complex64>,
    targets: &[usize],
    controls: &[usize],
) -> Array2<Complex64> {
    let dim = 1 << num_total_qubits;
    let mut full_matrix = Array2::<Complex64>::zeros((dim, dim));

    let control_mask = controls.iter().fold(0usize, |mask, &c| mask | (1 << c));
    let target_mask = targets.iter().fold(0usize, |mask, &t| mask | (1 << t));
    // Bits that are not target (do not change)
    let passive_mask = !target_mask;

    for col_idx in 0..dim {
        // Basis state not selected by the controls passes through unchanged
        if (col_idx & control_mask) != control_mask {
            full_matrix[[col_idx, col_idx]] = Complex64::new(1.0, 0.0);
            continue;
        }

        let small_col = extract_bits(col_idx, targets);
        for small_row in 0..matrix.nrows() {
            let val = matrix[[small_row, small_col]];
            if val.norm_sqr() < f64::EPSILON {
                continue;
            }
            // Scatter local row bits back to their physical positions
            let row_idx = (col_idx & passive_mask) | deposit_bits(small_row, targets);
            full_matrix[[row_idx, col_idx]] = val;
        }
    }
    full_matrix
}

/// Extracs the bits in positions `indices` of the sequence `value`
fn extract_bits(value: usize, indices: &[usize]) -> usize {
    let mut result = 0;
    for (i, &pos) in indices.iter().enumerate() {
        if (value >> pos) & 1 == 1 {
            result |= 1 << i;
        }
    }
    result
}

/// Scatters bits from `compact_value` into the positions specified by `indices`.
fn deposit_bits(compact_value: usize, indices: &[usize]) -> usize {
    let mut result = 0;
    for (i, &pos) in indices.iter().enumerate() {
        if (compact_value >> i) & 1 == 1 {
            result |= 1 << pos;
        }
    }
    result
}

/// Find duplicate in a slice of usize
pub fn find_duplicate(indices: &[usize]) -> Option<usize> {
    let mut seen = std::collections::HashSet::new();
    indices.iter().find(|&&idx| !seen.insert(idx)).copied()
}

/// Checks completeness relation for Kraus operators.
///
/// Verifies if $\sum K_k^\dagger K_k = I$.
pub fn check_completeness(ops: &[Array2<Complex64>], dim: usize) -> bool {
    let eye = Array2::<Complex64>::eye(dim);
    let sum = ops
        .iter()
        .fold(Array2::<Complex64>::zeros((dim, dim)), |acc, op| {
            acc + dagger(op).dot(op)
        });
    sum.iter()
        .zip(eye.iter())
        .all(|(a, b)| (a - b).norm() < 1e-9)
}

/// Computes the outer product of two vectors $|a\rangle\langle b|$.
pub fn outer_product(a: &Array1<Complex64>, b: &Array1<Complex64>) -> Array2<Complex64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j].conj())
}

/// Converts an ndarray matrix into an nalgebra one.
pub fn to_dmatrix(mat: &Array2<Complex64>) -> DMatrix<Complex64> {
    let (rows, cols) = mat.dim();
    DMatrix::from_fn(rows, cols, |r, c| mat[[r, c]])
}

/// Converts an nalgebra matrix back into ndarray.
pub fn from_dmatrix(mat: &DMatrix<Complex64>) -> Array2<Complex64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(r, c)| mat[(r, c)])
}

/// Spectral decomposition of a Hermitian matrix.
///
/// Returns the (real) eigenvalues and the matrix whose columns are the
/// matching eigenvectors. Only the Hermitian part of `mat` is decomposed.
pub fn hermitian_eigen(mat: &Array2<Complex64>) -> (Array1<f64>, Array2<Complex64>) {
    let eigen = to_dmatrix(&hermitize(mat)).symmetric_eigen();
    let values = Array1::from_iter(eigen.eigenvalues.iter().copied());
    (values, from_dmatrix(&eigen.eigenvectors))
}

/// Rebuilds $V \, \mathrm{diag}(\lambda) \, V^\dagger$.
pub fn from_spectrum(values: &Array1<f64>, vectors: &Array2<Complex64>) -> Array2<Complex64> {
    let mut scaled = vectors.clone();
    for (mut column, &value) in scaled.columns_mut().into_iter().zip(values.iter()) {
        column.mapv_inplace(|c| c * value);
    }
    scaled.dot(&dagger(vectors))
}

/// Finds the square root of a positive semi-definite matrix.
///
/// Uses spectral decomposition $M = V D V^\dagger$ to compute $\sqrt{M} = V \sqrt{D} V^\dagger$.
pub fn sqrt_positive_matrix(mat: &Array2<Complex64>) -> Array2<Complex64> {
    let (rows, cols) = mat.dim();

    // Optimized case for 2x2 matrix
    if rows == 2 && cols == 2 {
        return sqrt_2x2_analytical(mat);
    }

    let (values, vectors) = hermitian_eigen(mat);
    from_spectrum(&values.mapv(|v| v.max(0.0).sqrt()), &vectors)
}

/// Directo formula for square root of a 2x2 matrix
/// sqrt(A) = (A + sqrt(det)I) / sqrt(tr + 2sqrt(det))
fn sqrt_2x2_analytical(mat: &Array2<Complex64>) -> Array2<Complex64> {
    let tr = mat[[0, 0]] + mat[[1, 1]];
    let det = mat[[0, 0]] * mat[[1, 1]] - mat[[0, 1]] * mat[[1, 0]];

    let clean_det = if det.norm() < 1e-12 {
        Complex64::new(0.0, 0.0)
    } else {
        det
    };
    let sqrt_det = clean_det.sqrt();

    let s = (tr + Complex64::new(2.0, 0.0) * sqrt_det).sqrt();
    if s.norm() < 1e-12 {
        return Array2::zeros((2, 2));
    }

    let factor = Complex64::new(1.0, 0.0) / s;
    let identity = Array2::<Complex64>::eye(2);

    let numerator = mat + &identity.mapv(|x| x * sqrt_det);
    numerator.mapv(|x| x * factor)
}

/// Checks if a matrix is Hermitian
pub fn is_hermitian(mat: &Array2<Complex64>, tol: f64) -> bool {
    mat.iter()
        .zip(mat.t().iter())
        .all(|(a, b)| (a - b.conj()).norm() < tol)
}

/// Traces out the trailing subsystem of dimension `output_dim`.
///
/// `mat` acts on $\mathcal{H}_{in} \otimes \mathcal{H}_{out}$ with the input
/// factor most significant, so the result is `input_dim x input_dim`.
pub fn partial_trace_output(mat: &Array2<Complex64>, output_dim: usize) -> Array2<Complex64> {
    let input_dim = mat.nrows() / output_dim;
    Array2::from_shape_fn((input_dim, input_dim), |(a, b)| {
        (0..output_dim)
            .map(|k| mat[[a * output_dim + k, b * output_dim + k]])
            .sum()
    })
}

/// Uhlmann fidelity $F(\rho, \sigma) = (\mathrm{Tr}\sqrt{\sqrt\rho\,\sigma\sqrt\rho})^2$.
///
/// Both arguments are expected to be unit-trace positive matrices.
pub fn state_fidelity(rho: &Array2<Complex64>, sigma: &Array2<Complex64>) -> f64 {
    let sqrt_rho = sqrt_positive_matrix(rho);
    let inner = sqrt_rho.dot(sigma).dot(&sqrt_rho);
    let (values, _) = hermitian_eigen(&inner);
    let root_sum: f64 = values.iter().map(|v| v.max(0.0).sqrt()).sum();
    root_sum * root_sum
}

/// Fidelity $\langle\psi|\rho|\psi\rangle$ against a normalized pure state.
pub fn pure_state_fidelity(rho: &Array2<Complex64>, psi: &Array1<Complex64>) -> f64 {
    let bra = psi.mapv(|c| c.conj());
    bra.dot(&rho.dot(psi)).re
}
