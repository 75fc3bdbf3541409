//! gRPC transport: a broker service fanning events out over server streams,
//! and the client side connector used by hubs and agents.

mod client;
pub mod proto;
mod service;

pub use client::*;
pub use service::*;
