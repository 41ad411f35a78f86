use serde_derive::{Deserialize, Serialize};
use tracing::info;

use crate::core::{open_ring, RingBuffer, ShmValue, ShmemConfig};
use crate::errors::QueueError;

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    pub shmem: ShmemConfig,
}

/// Producer end of a named queue. Creating one for a name that does not
/// exist yet creates and initializes the backing segment.
pub struct QueueWriter<T: ShmValue> {
    ring: Box<dyn RingBuffer<T>>,
    queue_name: String,
}

impl<T: ShmValue> QueueWriter<T> {
    pub fn new(cfg: &WriterConfig) -> Result<QueueWriter<T>, QueueError> {
        let ring = open_ring(&cfg.shmem)?;
        info!(queue = %cfg.shmem.queue_name, capacity = ring.capacity(), "writer attached");
        Ok(QueueWriter {
            ring,
            queue_name: cfg.shmem.queue_name.clone(),
        })
    }

    /// Append `value`, waiting while the ring is full.
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        self.ring.push(value)
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Unmap this process's view. The backing name disappears with the
    /// creating process's handle.
    pub fn close(self) {
        info!(queue = %self.queue_name, "writer closed");
    }
}
