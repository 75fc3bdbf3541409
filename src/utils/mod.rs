pub mod async_task;
pub mod backoff;
pub mod sequence;

pub use backoff::*;
pub use sequence::*;
