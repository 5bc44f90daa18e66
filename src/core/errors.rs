use num_complex::Complex64;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GateError {
    #[error("Matrix is not Unitary (U†U != I)")]
    NonUnitary,

    #[error("Matrix must be square")]
    NotSquareMatrix,

    #[error("Invalid Dimensions")]
    InvalidDimensions,

    #[error("Qubit {0} cannot be both control and target")]
    ControlTargetOverlap(usize),

    #[error("Duplicate qubit index found: {0}")]
    DuplicateQubit(usize),
}

#[derive(Error, Debug, Clone)]
pub enum StateError {
    #[error("Trace is not unity: {0}")]
    InvalidTrace(Complex64),

    #[error("Vector is not normalized. Norm squared: {0}")]
    NotNormalized(f64),

    #[error("Invalid dimensions")]
    InvalidDimensions,

    #[error("Dimension mismatch: expected {expected}, got {got_rows}x{got_cols}")]
    DimensionMismatch {
        expected: usize,
        got_rows: usize,
        got_cols: usize,
    },

    #[error("Qubit index {index} out of bounds for {num_qubits} qubits")]
    IndexOutOfBounds { index: usize, num_qubits: usize },

    #[error("Gate error: {0}")]
    GateError(#[from] GateError),

    #[error("Channel error: {0}")]
    ChannelError(#[from] ChannelError),
}

#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("Channel must have at least one Kraus operator")]
    Empty,

    #[error("Kraus operators do not sum to Identity (Trace preserving relation failed)")]
    NotComplete,

    #[error("Invalid operator dimensions: Matrices must be square and 2^n")]
    InvalidDimensions,

    #[error("Dimension mismatch: All Kraus operators must have the same size")]
    OperatorSizeMismatch,

    #[error("Invalid probability: {0}. Must be between 0.0 and 1.0")]
    InvalidProbability(f64),

    #[error("Duplicate qubit index found: {0}")]
    DuplicateQubit(usize),
}

/// Failures of the reconstruction pipeline.
///
/// Every condition is reported to the caller as-is; no stage retries or
/// substitutes a best-effort matrix.
#[derive(Error, Debug, Clone)]
pub enum TomographyError {
    #[error("Unknown basis tag: {0:?}")]
    UnknownBasisTag(String),

    #[error("No configuration label could be recognized for circuit {0:?}")]
    MissingConfigurationMap(String),

    #[error("Aggregated data contains no configurations")]
    EmptyAggregatedData,

    #[error("Inconsistent qubit count: expected {expected}, got {got}")]
    InconsistentQubitCount { expected: usize, got: usize },

    #[error("Design matrix is singular: {0}")]
    SingularDesignMatrix(String),

    #[error("Solver '{solver}' did not converge after {iterations} iterations (residual {residual:.3e})")]
    SolverDidNotConverge {
        solver: String,
        iterations: usize,
        residual: f64,
    },

    #[error("Calibration set is missing the circuit preparing |{0}>")]
    IncompleteCalibrationSet(String),

    #[error("Calibration matrix is singular and has no pseudo-inverse")]
    SingularCalibrationMatrix,

    #[error("Invalid outcome key: {0:?}")]
    InvalidOutcome(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Projection failed: matrix has no positive eigenvalues")]
    NonPositiveProjection,

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}
