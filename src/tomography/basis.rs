//! Tomography bases.
//!
//! Single-qubit measurement effects (Pauli eigenprojectors) and preparation
//! states (Pauli eigenstates or the tetrahedral SIC set) as constant tables,
//! their n-qubit tensor products, and the configuration labels that name one
//! experiment setting.

use crate::core::errors::TomographyError;
use crate::core::utils;
use ndarray::{Array2, arr2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

type Matrix2 = [[Complex64; 2]; 2];

const fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

// sqrt(2)/3, sqrt(2)/6 and sqrt(6)/6
const SQRT2_3: f64 = 0.471_404_520_791_031_7;
const SQRT2_6: f64 = 0.235_702_260_395_515_84;
const SQRT6_6: f64 = 0.408_248_290_463_863;

const ZP: Matrix2 = [[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(0.0, 0.0)]];
const ZM: Matrix2 = [[c(0.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]];
const XP: Matrix2 = [[c(0.5, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(0.5, 0.0)]];
const XM: Matrix2 = [[c(0.5, 0.0), c(-0.5, 0.0)], [c(-0.5, 0.0), c(0.5, 0.0)]];
const YP: Matrix2 = [[c(0.5, 0.0), c(0.0, -0.5)], [c(0.0, 0.5), c(0.5, 0.0)]];
const YM: Matrix2 = [[c(0.5, 0.0), c(0.0, 0.5)], [c(0.0, -0.5), c(0.5, 0.0)]];

const SIC0: Matrix2 = ZP;
const SIC1: Matrix2 = [
    [c(1.0 / 3.0, 0.0), c(SQRT2_3, 0.0)],
    [c(SQRT2_3, 0.0), c(2.0 / 3.0, 0.0)],
];
const SIC2: Matrix2 = [
    [c(1.0 / 3.0, 0.0), c(-SQRT2_6, SQRT6_6)],
    [c(-SQRT2_6, -SQRT6_6), c(2.0 / 3.0, 0.0)],
];
const SIC3: Matrix2 = [
    [c(1.0 / 3.0, 0.0), c(-SQRT2_6, -SQRT6_6)],
    [c(-SQRT2_6, SQRT6_6), c(2.0 / 3.0, 0.0)],
];

/// Measurement basis family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeasurementBasis {
    #[default]
    Pauli,
}

impl MeasurementBasis {
    /// Per-qubit measurement settings of the family.
    pub fn tags(self) -> &'static [MeasurementOp] {
        match self {
            MeasurementBasis::Pauli => &[MeasurementOp::X, MeasurementOp::Y, MeasurementOp::Z],
        }
    }

    /// All `tags().len()^n` settings of an n-qubit register.
    pub fn labels(self, num_qubits: usize) -> Vec<Vec<MeasurementOp>> {
        cartesian_power(self.tags(), num_qubits)
    }
}

/// Preparation basis family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PreparationBasis {
    #[default]
    Pauli,
    #[serde(rename = "SIC")]
    Sic,
}

impl PreparationBasis {
    /// Informationally complete per-qubit preparation set.
    pub fn tags(self) -> &'static [PreparationOp] {
        match self {
            PreparationBasis::Pauli => &[
                PreparationOp::Zp,
                PreparationOp::Zm,
                PreparationOp::Xp,
                PreparationOp::Yp,
            ],
            PreparationBasis::Sic => &[
                PreparationOp::S0,
                PreparationOp::S1,
                PreparationOp::S2,
                PreparationOp::S3,
            ],
        }
    }

    /// Whether `op` belongs to this family, including the over-complete
    /// Pauli states `Xm` and `Ym`.
    pub fn recognizes(self, op: PreparationOp) -> bool {
        op.basis() == self
    }

    /// All `tags().len()^n` preparations of an n-qubit register.
    pub fn labels(self, num_qubits: usize) -> Vec<Vec<PreparationOp>> {
        cartesian_power(self.tags(), num_qubits)
    }
}

impl FromStr for PreparationBasis {
    type Err = TomographyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pauli" | "pauli" => Ok(PreparationBasis::Pauli),
            "SIC" | "sic" | "Sic" => Ok(PreparationBasis::Sic),
            _ => Err(TomographyError::UnknownBasisTag(s.to_string())),
        }
    }
}

/// Single-qubit Pauli measurement setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeasurementOp {
    X,
    Y,
    Z,
}

impl MeasurementOp {
    /// Projector for a measured bit: outcome 0 is the +1 eigenspace, anything
    /// else the -1 eigenspace.
    pub fn projector(self, outcome: u8) -> Array2<Complex64> {
        arr2(self.table(outcome))
    }

    fn table(self, outcome: u8) -> &'static Matrix2 {
        match (self, outcome) {
            (MeasurementOp::X, 0) => &XP,
            (MeasurementOp::X, _) => &XM,
            (MeasurementOp::Y, 0) => &YP,
            (MeasurementOp::Y, _) => &YM,
            (MeasurementOp::Z, 0) => &ZP,
            (MeasurementOp::Z, _) => &ZM,
        }
    }

    fn name(self) -> &'static str {
        match self {
            MeasurementOp::X => "X",
            MeasurementOp::Y => "Y",
            MeasurementOp::Z => "Z",
        }
    }
}

impl fmt::Display for MeasurementOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MeasurementOp {
    type Err = TomographyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "X" => Ok(MeasurementOp::X),
            "Y" => Ok(MeasurementOp::Y),
            "Z" => Ok(MeasurementOp::Z),
            _ => Err(TomographyError::UnknownBasisTag(s.to_string())),
        }
    }
}

/// Single-qubit input state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PreparationOp {
    Zp,
    Zm,
    Xp,
    Xm,
    Yp,
    Ym,
    S0,
    S1,
    S2,
    S3,
}

impl PreparationOp {
    pub const ALL: [PreparationOp; 10] = [
        PreparationOp::Zp,
        PreparationOp::Zm,
        PreparationOp::Xp,
        PreparationOp::Xm,
        PreparationOp::Yp,
        PreparationOp::Ym,
        PreparationOp::S0,
        PreparationOp::S1,
        PreparationOp::S2,
        PreparationOp::S3,
    ];

    /// Density matrix of the prepared state.
    pub fn matrix(self) -> Array2<Complex64> {
        arr2(self.table())
    }

    fn table(self) -> &'static Matrix2 {
        match self {
            PreparationOp::Zp => &ZP,
            PreparationOp::Zm => &ZM,
            PreparationOp::Xp => &XP,
            PreparationOp::Xm => &XM,
            PreparationOp::Yp => &YP,
            PreparationOp::Ym => &YM,
            PreparationOp::S0 => &SIC0,
            PreparationOp::S1 => &SIC1,
            PreparationOp::S2 => &SIC2,
            PreparationOp::S3 => &SIC3,
        }
    }

    pub fn basis(self) -> PreparationBasis {
        match self {
            PreparationOp::S0 | PreparationOp::S1 | PreparationOp::S2 | PreparationOp::S3 => {
                PreparationBasis::Sic
            }
            _ => PreparationBasis::Pauli,
        }
    }

    fn name(self) -> &'static str {
        match self {
            PreparationOp::Zp => "Zp",
            PreparationOp::Zm => "Zm",
            PreparationOp::Xp => "Xp",
            PreparationOp::Xm => "Xm",
            PreparationOp::Yp => "Yp",
            PreparationOp::Ym => "Ym",
            PreparationOp::S0 => "S0",
            PreparationOp::S1 => "S1",
            PreparationOp::S2 => "S2",
            PreparationOp::S3 => "S3",
        }
    }
}

impl fmt::Display for PreparationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PreparationOp {
    type Err = TomographyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PreparationOp::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| TomographyError::UnknownBasisTag(s.to_string()))
    }
}

/// Effect for one outcome of an n-qubit measurement setting.
///
/// Bit q of `outcome` is the result on qubit q, which is `label[q]`. Qubit 0
/// is the least significant factor of the tensor product.
pub fn measurement_operator(label: &[MeasurementOp], outcome: usize) -> Array2<Complex64> {
    let factors: Vec<_> = label
        .iter()
        .enumerate()
        .rev()
        .map(|(q, op)| op.projector(((outcome >> q) & 1) as u8))
        .collect();
    utils::kron_all(&factors)
}

/// Density matrix of an n-qubit product preparation.
pub fn preparation_operator(label: &[PreparationOp]) -> Array2<Complex64> {
    let factors: Vec<_> = label.iter().rev().map(|op| op.matrix()).collect();
    utils::kron_all(&factors)
}

/// Every n-tuple over `tags`, first position varying slowest.
fn cartesian_power<T: Copy>(tags: &[T], n: usize) -> Vec<Vec<T>> {
    (0..n).fold(vec![Vec::with_capacity(n)], |prefixes, _| {
        prefixes
            .into_iter()
            .flat_map(|prefix| {
                tags.iter().map(move |&tag| {
                    let mut next = prefix.clone();
                    next.push(tag);
                    next
                })
            })
            .collect()
    })
}

/// Name of one executed experiment setting.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Configuration {
    /// State tomography: one measurement setting per qubit.
    State(Vec<MeasurementOp>),
    /// Process tomography: input preparation and output measurement.
    Process {
        preparation: Vec<PreparationOp>,
        measurement: Vec<MeasurementOp>,
    },
    /// Readout calibration: prepare the computational basis state with this
    /// bitstring, then measure.
    Calibration(String),
}

impl Configuration {
    /// Number of bits in each outcome.
    pub fn measured_qubits(&self) -> usize {
        match self {
            Configuration::State(m) => m.len(),
            Configuration::Process { measurement, .. } => measurement.len(),
            Configuration::Calibration(bits) => bits.len(),
        }
    }

    pub fn prepared_qubits(&self) -> Option<usize> {
        match self {
            Configuration::Process { preparation, .. } => Some(preparation.len()),
            _ => None,
        }
    }
}

/// Every measurement setting of an n-qubit state tomography experiment.
pub fn state_configurations(basis: MeasurementBasis, num_qubits: usize) -> Vec<Configuration> {
    basis
        .labels(num_qubits)
        .into_iter()
        .map(Configuration::State)
        .collect()
}

/// Every (preparation, measurement) pair of a process tomography experiment.
pub fn process_configurations(
    preparation_basis: PreparationBasis,
    input_qubits: usize,
    measurement_basis: MeasurementBasis,
    output_qubits: usize,
) -> Vec<Configuration> {
    let measurements = measurement_basis.labels(output_qubits);
    preparation_basis
        .labels(input_qubits)
        .into_iter()
        .flat_map(|preparation| {
            measurements
                .iter()
                .map(move |measurement| Configuration::Process {
                    preparation: preparation.clone(),
                    measurement: measurement.clone(),
                })
        })
        .collect()
}

/// Every calibration setting of an m-qubit register, in index order.
pub fn calibration_configurations(num_qubits: usize) -> Vec<Configuration> {
    (0..1usize << num_qubits)
        .map(|j| Configuration::Calibration(format!("{j:0num_qubits$b}")))
        .collect()
}

fn tuple<T: fmt::Display>(items: &[T]) -> String {
    let quoted: Vec<String> = items.iter().map(|t| format!("'{t}'")).collect();
    match quoted.len() {
        1 => format!("({},)", quoted[0]),
        _ => format!("({})", quoted.join(", ")),
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Configuration::State(m) => f.write_str(&tuple(m)),
            Configuration::Process {
                preparation,
                measurement,
            } => write!(f, "({}, {})", tuple(preparation), tuple(measurement)),
            Configuration::Calibration(bits) => write!(f, "cal_{bits}"),
        }
    }
}

fn parse_tags<T>(list: &str, name: &str) -> Result<Vec<T>, TomographyError>
where
    T: FromStr<Err = TomographyError>,
{
    let tags = list
        .split(',')
        .filter(|tag| !tag.is_empty())
        .map(T::from_str)
        .collect::<Result<Vec<T>, _>>()?;
    if tags.is_empty() {
        return Err(TomographyError::MissingConfigurationMap(name.to_string()));
    }
    Ok(tags)
}

impl FromStr for Configuration {
    type Err = TomographyError;

    /// Accepts the names produced by `Display`: `('X', 'Y')`,
    /// `(('Zp',), ('X',))` and `cal_01`. Whitespace and quote style are ignored.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let missing = || TomographyError::MissingConfigurationMap(name.to_string());
        let compact: String = name
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '"')
            .collect();

        if let Some(bits) = compact.strip_prefix("cal_") {
            if bits.is_empty() || !bits.chars().all(|b| b == '0' || b == '1') {
                return Err(missing());
            }
            return Ok(Configuration::Calibration(bits.to_string()));
        }

        let inner = compact
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(missing)?;

        if inner.starts_with('(') {
            let (preparation, measurement) = inner.split_once("),(").ok_or_else(missing)?;
            let preparation = preparation.strip_prefix('(').ok_or_else(missing)?;
            let measurement = measurement.strip_suffix(')').ok_or_else(missing)?;
            return Ok(Configuration::Process {
                preparation: parse_tags(preparation, name)?,
                measurement: parse_tags(measurement, name)?,
            });
        }

        Ok(Configuration::State(parse_tags(inner, name)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn pauli_projectors_resolve_identity() {
        for op in MeasurementBasis::Pauli.tags() {
            let sum = op.projector(0) + op.projector(1);
            let eye = Array2::<Complex64>::eye(2);
            for (a, b) in sum.iter().zip(eye.iter()) {
                assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-15);
            }
        }
    }

    #[test]
    fn sic_states_are_pure_and_tetrahedral() {
        let states: Vec<_> = PreparationBasis::Sic.tags().iter().map(|s| s.matrix()).collect();
        for (i, a) in states.iter().enumerate() {
            assert_abs_diff_eq!(utils::trace(&a.dot(a)).re, 1.0, epsilon = 1e-12);
            for b in &states[i + 1..] {
                assert_abs_diff_eq!(utils::trace(&a.dot(b)).re, 1.0 / 3.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn expansion_sizes() {
        assert_eq!(MeasurementBasis::Pauli.labels(2).len(), 9);
        assert_eq!(PreparationBasis::Sic.labels(3).len(), 64);
        assert_eq!(
            process_configurations(PreparationBasis::Pauli, 1, MeasurementBasis::Pauli, 1).len(),
            12
        );
        assert_eq!(
            MeasurementBasis::Pauli.labels(2)[1],
            vec![MeasurementOp::X, MeasurementOp::Y]
        );
    }

    #[test]
    fn measurement_operator_orders_qubit_zero_last() {
        // qubit 0 measured in Z with outcome 1, qubit 1 in Z with outcome 0: |01><01|
        let effect = measurement_operator(&[MeasurementOp::Z, MeasurementOp::Z], 0b01);
        assert_abs_diff_eq!(effect[[1, 1]].re, 1.0);
        assert_abs_diff_eq!(utils::trace(&effect).re, 1.0);
    }

    #[test]
    fn labels_round_trip_through_names() {
        let configs = [
            Configuration::State(vec![MeasurementOp::X]),
            Configuration::State(vec![MeasurementOp::Z, MeasurementOp::Y]),
            Configuration::Process {
                preparation: vec![PreparationOp::S2],
                measurement: vec![MeasurementOp::X, MeasurementOp::Z],
            },
            Configuration::Calibration("10".into()),
        ];
        for config in configs {
            let parsed: Configuration = config.to_string().parse().unwrap();
            assert_eq!(parsed, config);
        }
        assert_eq!(
            "(('Zp',), ('X',))".parse::<Configuration>().unwrap().to_string(),
            "(('Zp',), ('X',))"
        );
    }

    #[test]
    fn unknown_tags_are_reported() {
        assert!(matches!(
            "('Q',)".parse::<Configuration>(),
            Err(TomographyError::UnknownBasisTag(tag)) if tag == "Q"
        ));
        assert!(matches!(
            "circuit-7".parse::<Configuration>(),
            Err(TomographyError::MissingConfigurationMap(_))
        ));
        assert!("Yp".parse::<PreparationOp>().unwrap().basis() == PreparationBasis::Pauli);
    }
}
