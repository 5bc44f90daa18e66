mod core;
mod sampler;
pub mod tomography;

pub use crate::core::{Gate, QuantumChannel, QuantumState, errors, utils};
pub use crate::sampler::Sampler;
pub use crate::tomography::{ReconstructedMatrix, TomographyTarget};
