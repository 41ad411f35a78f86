pub mod blocking;
pub mod core;
mod errors;
pub mod reader;
pub mod spin;
pub mod writer;

pub use crate::core::{
    Backend, RingBuffer, Segment, ShmValue, ShmemConfig, ShmemConfigBuilder, DEFAULT_DATA_DIR,
    DEFAULT_SEGMENT_SIZE, MIN_SEGMENT_SIZE,
};
pub use crate::errors::QueueError;

#[cfg(test)]
mod tests;
