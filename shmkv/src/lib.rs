mod core;
mod errors;
pub mod queue;
pub mod shutdown;
pub mod sync;
pub mod table;
pub mod worker;

#[cfg(test)]
mod tests;

pub use crate::core::{SegmentConfig, SegmentConfigBuilder};
pub use crate::errors::ShmKvError;
pub use crate::queue::{Operation, Request, RequestQueue};

pub const MAX_KEY_LEN: usize = core::MAX_KEY_LEN;
pub const MAX_VALUE_LEN: usize = core::MAX_VALUE_LEN;
