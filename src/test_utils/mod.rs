mod clients;
mod common;

pub(crate) use clients::*;
pub use common::*;
