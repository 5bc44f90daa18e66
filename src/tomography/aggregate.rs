//! Collects per-circuit outcome histograms into per-configuration data.

use crate::core::errors::TomographyError;
use crate::tomography::basis::Configuration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Counts of measured bitstrings for one configuration.
///
/// Keys are little-endian bitstrings: the last character is qubit 0.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeHistogram {
    counts: BTreeMap<String, u64>,
}

impl OutcomeHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` occurrences of `outcome`.
    pub fn record(&mut self, outcome: impl Into<String>, count: u64) {
        *self.counts.entry(outcome.into()).or_insert(0) += count;
    }

    /// Adds every count of `other` into this histogram.
    pub fn merge(&mut self, other: &OutcomeHistogram) {
        for (outcome, &count) in &other.counts {
            self.record(outcome.clone(), count);
        }
    }

    /// Total number of shots.
    pub fn shots(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count(&self, outcome: &str) -> u64 {
        self.counts.get(outcome).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Counts laid out by outcome index, zero-filled to `2^num_bits` entries.
    pub fn indexed_counts(&self, num_bits: usize) -> Result<Vec<u64>, TomographyError> {
        let mut indexed = vec![0u64; 1 << num_bits];
        for (outcome, &count) in &self.counts {
            if outcome.len() != num_bits {
                return Err(TomographyError::InvalidOutcome(outcome.clone()));
            }
            let index = usize::from_str_radix(outcome, 2)
                .map_err(|_| TomographyError::InvalidOutcome(outcome.clone()))?;
            indexed[index] += count;
        }
        Ok(indexed)
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for OutcomeHistogram {
    fn from_iter<T: IntoIterator<Item = (S, u64)>>(iter: T) -> Self {
        let mut histogram = OutcomeHistogram::new();
        for (outcome, count) in iter {
            histogram.record(outcome, count);
        }
        histogram
    }
}

/// Raw result of one executed circuit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitResult {
    /// Circuit name assigned by whoever built the circuit.
    pub name: String,
    /// Outcome counts keyed by bitstring (`"01"`, `"0 1"`) or hex (`"0x1"`).
    pub counts: BTreeMap<String, u64>,
}

impl CircuitResult {
    pub fn new(name: impl Into<String>, counts: BTreeMap<String, u64>) -> Self {
        Self {
            name: name.into(),
            counts,
        }
    }

    /// Result whose name is the canonical form of `configuration`.
    pub fn labelled(configuration: &Configuration, counts: BTreeMap<String, u64>) -> Self {
        Self::new(configuration.to_string(), counts)
    }
}

/// Histograms keyed by the configuration that produced them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedData {
    entries: BTreeMap<Configuration, OutcomeHistogram>,
}

impl AggregatedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a histogram, pooling shots with any earlier one for the same configuration.
    pub fn insert(&mut self, configuration: Configuration, histogram: OutcomeHistogram) {
        match self.entries.get_mut(&configuration) {
            Some(existing) => {
                debug!(configuration = %configuration, "pooling repeated configuration");
                existing.merge(&histogram);
            }
            None => {
                self.entries.insert(configuration, histogram);
            }
        }
    }

    pub fn get(&self, configuration: &Configuration) -> Option<&OutcomeHistogram> {
        self.entries.get(configuration)
    }

    /// Entries in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&Configuration, &OutcomeHistogram)> {
        self.entries.iter()
    }

    pub fn configurations(&self) -> impl Iterator<Item = &Configuration> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Configuration, OutcomeHistogram)> for AggregatedData {
    fn from_iter<T: IntoIterator<Item = (Configuration, OutcomeHistogram)>>(iter: T) -> Self {
        let mut data = AggregatedData::new();
        for (configuration, histogram) in iter {
            data.insert(configuration, histogram);
        }
        data
    }
}

/// Turns circuit results into [`AggregatedData`].
///
/// A result is matched to its configuration through an explicit name map
/// first, then by parsing its name.
#[derive(Clone, Debug, Default)]
pub struct OutcomeAggregator {
    labels: HashMap<String, Configuration>,
}

impl OutcomeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the configuration for a circuit name.
    pub fn with_label(mut self, name: impl Into<String>, configuration: Configuration) -> Self {
        self.labels.insert(name.into(), configuration);
        self
    }

    fn resolve(&self, name: &str) -> Result<Configuration, TomographyError> {
        match self.labels.get(name) {
            Some(configuration) => Ok(configuration.clone()),
            None => name.parse(),
        }
    }

    pub fn aggregate(&self, results: &[CircuitResult]) -> Result<AggregatedData, TomographyError> {
        let mut data = AggregatedData::new();

        for result in results {
            let configuration = self.resolve(&result.name)?;
            let width = configuration.measured_qubits();

            let mut histogram = OutcomeHistogram::new();
            for (raw, &count) in &result.counts {
                histogram.record(normalize_outcome(raw, width)?, count);
            }
            data.insert(configuration, histogram);
        }

        debug!(
            circuits = results.len(),
            configurations = data.len(),
            "aggregated circuit results"
        );
        Ok(data)
    }
}

/// Aggregates results whose names are canonical configuration labels.
pub fn aggregate(results: &[CircuitResult]) -> Result<AggregatedData, TomographyError> {
    OutcomeAggregator::new().aggregate(results)
}

/// Canonical `width`-bit form of an outcome key.
fn normalize_outcome(raw: &str, width: usize) -> Result<String, TomographyError> {
    let invalid = || TomographyError::InvalidOutcome(raw.to_string());
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    let bits = match compact.strip_prefix("0x") {
        Some(hex) => {
            let value = u64::from_str_radix(hex, 16).map_err(|_| invalid())?;
            if width < 64 && value >> width != 0 {
                return Err(invalid());
            }
            format!("{value:0width$b}")
        }
        None => compact,
    };

    if bits.len() != width || !bits.chars().all(|b| b == '0' || b == '1') {
        return Err(invalid());
    }
    Ok(bits)
}
