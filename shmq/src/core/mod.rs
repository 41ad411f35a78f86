use std::hint;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde_derive::{Deserialize, Serialize};
use shared_memory::{Shmem, ShmemConf, ShmemError};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, error, info, warn};

use crate::blocking::BlockingRing;
use crate::errors::QueueError;
use crate::spin::SpinRing;

pub const DEFAULT_DATA_DIR: &str = "/dev/shm";
pub const DEFAULT_SEGMENT_SIZE: usize = 32768;
pub const MIN_SEGMENT_SIZE: usize = 4096;

pub static SHMEM_FILE_PREFIX: &str = "shmq";

/// Bytes reserved at the start of every segment for the bootstrap tag.
/// 64 keeps the backend control blocks cache-line aligned behind it.
pub(crate) const SEGMENT_TAG_BYTES: usize = 64;

const SEGMENT_READY: u8 = 1;

/// Marker for values that may live inside a shared segment.
///
/// # Safety
///
/// Implementors must be plain fixed-size data: no pointers, references,
/// or other address-space-local indirection, since the bytes are read
/// back in a different process at a different base address.
pub unsafe trait ShmValue: Copy + Send + 'static {}

unsafe impl ShmValue for u8 {}
unsafe impl ShmValue for u16 {}
unsafe impl ShmValue for u32 {}
unsafe impl ShmValue for u64 {}
unsafe impl ShmValue for u128 {}
unsafe impl ShmValue for usize {}
unsafe impl ShmValue for i8 {}
unsafe impl ShmValue for i16 {}
unsafe impl ShmValue for i32 {}
unsafe impl ShmValue for i64 {}
unsafe impl ShmValue for i128 {}
unsafe impl ShmValue for isize {}
unsafe impl ShmValue for f32 {}
unsafe impl ShmValue for f64 {}
unsafe impl ShmValue for bool {}
unsafe impl<T: ShmValue, const N: usize> ShmValue for [T; N] {}

/// Wait strategy for the ring backing a queue name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    /// Process-shared mutex + event wakeups; waiters sleep.
    Blocking,
    /// Atomic occupancy counter; waiters burn the CPU.
    Spin,
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Blocking
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShmemConfig {
    pub data_dir: String,
    pub queue_name: String,
    pub segment_size: usize,
    pub backend: Backend,
}

impl Default for ShmemConfig {
    fn default() -> ShmemConfig {
        ShmemConfig {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            queue_name: "queue".to_string(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            backend: Backend::default(),
        }
    }
}

impl ShmemConfig {
    pub fn builder() -> ShmemConfigBuilder {
        ShmemConfigBuilder::default()
    }

    pub(crate) fn link_path(&self) -> String {
        format!("{}/{}-{}", self.data_dir, SHMEM_FILE_PREFIX, self.queue_name)
    }
}

#[derive(Default)]
pub struct ShmemConfigBuilder {
    data_dir: Option<String>,
    queue_name: Option<String>,
    segment_size: Option<usize>,
    backend: Option<Backend>,
}

impl ShmemConfigBuilder {
    pub fn data_dir<S: Into<String>>(mut self, v: S) -> Self {
        self.data_dir = Some(v.into());
        self
    }

    pub fn queue_name<S: Into<String>>(mut self, v: S) -> Self {
        self.queue_name = Some(v.into());
        self
    }

    pub fn segment_size(mut self, v: usize) -> Self {
        self.segment_size = Some(v);
        self
    }

    pub fn backend(mut self, v: Backend) -> Self {
        self.backend = Some(v);
        self
    }

    pub fn build(self) -> Result<ShmemConfig, QueueError> {
        let defaults = ShmemConfig::default();
        let cfg = ShmemConfig {
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            queue_name: self.queue_name.unwrap_or(defaults.queue_name),
            segment_size: self.segment_size.unwrap_or(defaults.segment_size),
            backend: self.backend.unwrap_or(defaults.backend),
        };
        if cfg.queue_name.is_empty() || cfg.queue_name.contains('/') {
            return Err(QueueError::Config(format!(
                "queue name {:?} must be a non-empty path-free string",
                cfg.queue_name
            )));
        }
        if cfg.segment_size < MIN_SEGMENT_SIZE {
            return Err(QueueError::Config(format!(
                "segment size {} is below the minimum of {}",
                cfg.segment_size, MIN_SEGMENT_SIZE
            )));
        }
        Ok(cfg)
    }
}

static CLOSING: OnceCell<Arc<AtomicBool>> = OnceCell::new();

fn on_killed() -> ! {
    warn!("termination signal received; waiting for in-flight I/O before exit");
    thread::sleep(Duration::from_secs(3));
    process::exit(0);
}

/// Per-process flag flipped by the signal watcher. Installed once; every
/// segment shares it.
fn closing_flag() -> Arc<AtomicBool> {
    CLOSING
        .get_or_init(|| {
            let flag = Arc::new(AtomicBool::new(false));
            match Signals::new([SIGHUP, SIGINT, SIGQUIT, SIGTERM]) {
                Ok(mut signals) => {
                    let closing = Arc::clone(&flag);
                    thread::spawn(move || {
                        for _ in signals.forever() {
                            closing.store(true, Ordering::SeqCst);
                            on_killed();
                        }
                    });
                }
                Err(e) => warn!(error = %e, "unable to install signal watcher"),
            }
            flag
        })
        .clone()
}

/// One process's mapping of a named shared segment.
///
/// Whichever process creates the backing link owns it: the owner unlinks
/// the name when this handle drops, attachers only unmap their own view.
pub struct Segment {
    shmem: Shmem,
    closing: Arc<AtomicBool>,
    segment_size: usize,
    link_path: String,
}

impl Segment {
    /// Map the segment for `cfg`, creating and sizing it if this process
    /// gets there first.
    pub fn open(cfg: &ShmemConfig) -> Result<Segment, QueueError> {
        let closing = closing_flag();
        let link_path = cfg.link_path();

        let shmem = match ShmemConf::new()
            .size(cfg.segment_size)
            .flink(&link_path)
            .create()
        {
            Ok(m) => {
                info!(path = %link_path, size = cfg.segment_size, "created shared segment");
                m
            }
            Err(ShmemError::LinkExists) => {
                let m = ShmemConf::new().flink(&link_path).open().map_err(|e| {
                    error!(path = %link_path, error = %e, "unable to open shared segment");
                    QueueError::SharedMemory(e)
                })?;
                info!(path = %link_path, "attached to existing shared segment");
                m
            }
            Err(e) => {
                error!(path = %link_path, error = %e, "unable to create shared segment");
                return Err(QueueError::SharedMemory(e));
            }
        };

        if shmem.len() < cfg.segment_size {
            return Err(QueueError::Logic(format!(
                "segment {} maps {} bytes, configuration expects {}",
                link_path,
                shmem.len(),
                cfg.segment_size
            )));
        }

        Ok(Segment {
            shmem,
            closing,
            segment_size: cfg.segment_size,
            link_path,
        })
    }

    /// True when this process created (and will eventually unlink) the
    /// backing name.
    pub fn is_creator(&self) -> bool {
        self.shmem.is_owner()
    }

    pub fn declared_size(&self) -> usize {
        self.segment_size
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.shmem.as_ptr()
    }

    /// First byte past the bootstrap tag; backend control blocks start
    /// here, 64-byte aligned.
    pub(crate) fn control_base(&self) -> *mut u8 {
        unsafe { self.base().add(SEGMENT_TAG_BYTES) }
    }

    /// Bytes usable for a backend control block plus its element array.
    pub(crate) fn control_capacity(&self) -> usize {
        self.segment_size - SEGMENT_TAG_BYTES
    }

    fn tag(&self) -> &AtomicU8 {
        unsafe { &*(self.base() as *const AtomicU8) }
    }

    /// Creator-side: clear the tag before touching the control block.
    pub(crate) fn begin_init(&self) {
        self.tag().store(0, Ordering::Relaxed);
    }

    /// Creator-side: publish the fully constructed control block.
    pub(crate) fn mark_ready(&self) {
        self.tag().store(SEGMENT_READY, Ordering::Release);
    }

    /// Attacher-side: wait until the creator has published the control
    /// block. Spins forever if the creator dies mid-init.
    pub(crate) fn wait_ready(&self) {
        while self.tag().load(Ordering::Acquire) != SEGMENT_READY {
            hint::spin_loop();
        }
    }

    pub(crate) fn ensure_process_not_killed(&self) {
        if self.closing.load(Ordering::Relaxed) {
            on_killed();
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        debug!(
            path = %self.link_path,
            owner = self.shmem.is_owner(),
            "unmapping shared segment"
        );
    }
}

/// Common push/pop contract shared by the two wait strategies.
pub trait RingBuffer<T: ShmValue> {
    /// Append `value`; waits (blocks or spins) while the ring is full.
    fn push(&self, value: T) -> Result<(), QueueError>;

    /// Remove the oldest value; waits (blocks or spins) while the ring
    /// is empty.
    fn pop(&self) -> Result<T, QueueError>;

    /// Element capacity derived from the segment size at construction.
    fn capacity(&self) -> usize;
}

/// Map the segment for `cfg` and bind the configured backend to it.
pub(crate) fn open_ring<T: ShmValue>(
    cfg: &ShmemConfig,
) -> Result<Box<dyn RingBuffer<T>>, QueueError> {
    let segment = Segment::open(cfg)?;
    match cfg.backend {
        Backend::Blocking => Ok(Box::new(BlockingRing::attach(segment)?)),
        Backend::Spin => Ok(Box::new(SpinRing::attach(segment)?)),
    }
}
