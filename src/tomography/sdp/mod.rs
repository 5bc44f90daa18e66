//! Constrained fit over the cone of positive semidefinite matrices.
//!
//! [`SdpFitter`] formulates the weighted least-squares problem
//!
//! ```text
//! minimize ½ xᵀ P x − qᵀ x   subject to   C x = c,   mat(x) ⪰ 0
//! ```
//!
//! in Hermitian coordinates and hands it to an [`SdpSolver`]. The fitter
//! owns the formulation; the solver only sees matrices.

mod admm;

pub use admm::AdmmSolver;

use crate::core::errors::TomographyError;
use crate::core::utils;
use crate::tomography::fitter_data::{FitterData, coordinates_to_hermitian};
use crate::tomography::{ReconstructedMatrix, TomographyTarget};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Quadratic program over Hermitian coordinates with a PSD cone constraint.
#[derive(Clone, Debug)]
pub struct SdpProblem {
    /// Side length of the matrix the coordinates describe.
    pub dim: usize,
    pub quadratic: Array2<f64>,
    pub linear: Array1<f64>,
    pub constraints: Array2<f64>,
    pub bounds: Array1<f64>,
}

#[derive(Clone, Debug)]
pub struct SdpSolution {
    /// Coordinates of a PSD matrix.
    pub coordinates: Array1<f64>,
    pub iterations: usize,
    pub residual: f64,
}

/// Solves PSD-constrained least squares.
pub trait SdpSolver: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn solve(&self, problem: &SdpProblem) -> Result<SdpSolution, TomographyError>;
}

/// Solver backends selectable by name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    #[default]
    Admm,
}

impl SolverKind {
    pub fn build(self, options: &SdpOptions) -> Box<dyn SdpSolver> {
        match self {
            SolverKind::Admm => {
                Box::new(AdmmSolver::new(options.tolerance, options.max_iterations))
            }
        }
    }
}

impl FromStr for SolverKind {
    type Err = TomographyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admm" => Ok(SolverKind::Admm),
            _ => Err(TomographyError::InvalidParameter(format!("unknown SDP solver {s:?}"))),
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverKind::Admm => write!(f, "admm"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SdpOptions {
    pub solver: SolverKind,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub weighted: bool,
    /// Trace of the result; the target's natural trace when `None`.
    pub trace: Option<f64>,
    /// For process targets, require the partial trace over the output to be
    /// the identity on the input.
    pub trace_preserving: bool,
}

impl Default for SdpOptions {
    fn default() -> Self {
        Self {
            solver: SolverKind::Admm,
            tolerance: 1e-7,
            max_iterations: 20_000,
            weighted: true,
            trace: None,
            trace_preserving: true,
        }
    }
}

impl SdpOptions {
    pub fn with_solver(mut self, solver: SolverKind) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    pub fn with_trace(mut self, trace: f64) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_trace_preserving(mut self, trace_preserving: bool) -> Self {
        self.trace_preserving = trace_preserving;
        self
    }
}

/// Constrained estimator: positivity and trace are enforced during the solve.
#[derive(Debug)]
pub struct SdpFitter {
    pub options: SdpOptions,
    solver: Box<dyn SdpSolver>,
}

impl Default for SdpFitter {
    fn default() -> Self {
        Self::new(SdpOptions::default())
    }
}

impl SdpFitter {
    pub fn new(options: SdpOptions) -> Self {
        let solver = options.solver.build(&options);
        Self { options, solver }
    }

    /// Replaces the backend chosen by `options.solver`.
    pub fn with_solver(mut self, solver: Box<dyn SdpSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn solver_name(&self) -> &str {
        self.solver.name()
    }

    pub fn fit(&self, data: &FitterData) -> Result<ReconstructedMatrix, TomographyError> {
        let problem = self.formulate(data)?;
        let solution = self.solver.solve(&problem)?;

        let matrix = utils::hermitize(&coordinates_to_hermitian(
            solution.coordinates.view(),
            problem.dim,
        ));
        let achieved = utils::trace(&matrix).re;
        if !(achieved.is_finite() && achieved > 0.0) {
            return Err(TomographyError::SolverDidNotConverge {
                solver: self.solver.name().to_string(),
                iterations: solution.iterations,
                residual: solution.residual,
            });
        }
        let trace = self.target_trace(data.target)?;
        let matrix = matrix.mapv(|c| c * (trace / achieved));

        info!(
            fitter = "sdp",
            solver = self.solver.name(),
            iterations = solution.iterations,
            residual = solution.residual,
            trace,
            "fit complete"
        );
        Ok(ReconstructedMatrix {
            matrix,
            target: data.target,
        })
    }

    fn target_trace(&self, target: TomographyTarget) -> Result<f64, TomographyError> {
        let trace = self.options.trace.unwrap_or(target.default_trace());
        if !(trace.is_finite() && trace > 0.0) {
            return Err(TomographyError::InvalidParameter(format!(
                "trace must be positive, got {trace}"
            )));
        }
        if self.enforces_trace_preservation(target)
            && (trace - target.default_trace()).abs() > 1e-12
        {
            return Err(TomographyError::InvalidParameter(format!(
                "a trace-preserving Choi matrix has trace {}, not {trace}",
                target.default_trace()
            )));
        }
        Ok(trace)
    }

    fn enforces_trace_preservation(&self, target: TomographyTarget) -> bool {
        self.options.trace_preserving && target.is_process()
    }

    /// Objective and linear constraints for `data`.
    pub fn formulate(&self, data: &FitterData) -> Result<SdpProblem, TomographyError> {
        let trace = self.target_trace(data.target)?;
        let dim = data.target.dim();

        let (a, y) = data.weighted_system(self.options.weighted);
        let quadratic = a.t().dot(&a);
        let linear = a.t().dot(&y);

        // Rescaling the objective leaves the minimizer unchanged.
        let scale = quadratic.diag().iter().copied().fold(0.0, f64::max);
        if !(scale.is_finite() && scale > 0.0) {
            return Err(TomographyError::SingularDesignMatrix(
                "design matrix has no informative rows".into(),
            ));
        }

        let (constraints, bounds) = if self.enforces_trace_preservation(data.target) {
            trace_preserving_constraints(data.target)
        } else {
            trace_constraint(dim, trace)
        };

        Ok(SdpProblem {
            dim,
            quadratic: quadratic / scale,
            linear: linear / scale,
            constraints,
            bounds,
        })
    }
}

/// Single row `Tr(M) = trace`.
fn trace_constraint(dim: usize, trace: f64) -> (Array2<f64>, Array1<f64>) {
    let mut row = Array2::<f64>::zeros((1, dim * dim));
    for i in 0..dim {
        row[[0, i * dim + i]] = 1.0;
    }
    (row, Array1::from(vec![trace]))
}

/// Rows of `Tr_out(J) = I_in`, one per real degree of freedom of the
/// input-space matrix. Together they also fix `Tr(J) = d_in`.
fn trace_preserving_constraints(target: TomographyTarget) -> (Array2<f64>, Array1<f64>) {
    let d_in = target.input_dim();
    let d_out = target.output_dim();
    let dim = d_in * d_out;

    let mut rows = Array2::<f64>::zeros((d_in * d_in, dim * dim));
    let mut bounds = Array1::<f64>::zeros(d_in * d_in);

    for a in 0..d_in {
        for k in 0..d_out {
            let i = a * d_out + k;
            rows[[a * d_in + a, i * dim + i]] = 1.0;
        }
        bounds[a * d_in + a] = 1.0;

        for b in (a + 1)..d_in {
            for k in 0..d_out {
                let i = a * d_out + k;
                let j = b * d_out + k;
                // Re and Im of entry (a, b) of the partial trace
                rows[[a * d_in + b, i * dim + j]] = FRAC_1_SQRT_2;
                rows[[b * d_in + a, j * dim + i]] = FRAC_1_SQRT_2;
            }
        }
    }
    (rows, bounds)
}
