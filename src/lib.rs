//! Bidirectional resource synchronization between a hub ("source") and spoke
//! agents over CloudEvents.
//!
//! The hub publishes desired specs, agents publish observed status back, and
//! either side can ask the other to resync after missed deliveries. Every
//! event is an [`Envelope`] routed over a pluggable [`Transport`].

pub mod constants;
pub mod utils;

mod client;
mod codec;
mod config;
mod envelope;
mod errors;
mod gc;
mod metrics;
mod resource;
mod resync;
mod store;
mod transport;
mod types;

pub use client::*;
pub use codec::*;
pub use config::*;
pub use envelope::*;
pub use errors::*;
pub use gc::*;
pub use metrics::gather_metrics;
pub use metrics::register_metrics;
pub use metrics::reset_metrics;
pub use resource::*;
pub use resync::*;
pub use store::*;
pub use transport::*;
pub use types::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
