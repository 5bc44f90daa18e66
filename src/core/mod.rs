mod channels;
pub mod errors;
mod gates;
mod state;
pub mod utils;

pub use channels::QuantumChannel;
pub use gates::Gate;
pub use state::QuantumState;
