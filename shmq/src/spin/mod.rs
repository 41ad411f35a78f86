use std::hint;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::core::{RingBuffer, Segment, ShmValue};
use crate::errors::QueueError;

/// 64-byte isolation so the producer's and consumer's counters never
/// share a cache line.
#[repr(C, align(64))]
struct CacheLine<T>(T);

/// Control block of the busy-wait ring. `read_idx` is written only by
/// the consumer, `write_idx` only by the producer; `count` is the single
/// cross-side synchronization point.
#[repr(C)]
struct SpinHeader {
    read_idx: CacheLine<AtomicUsize>,
    write_idx: CacheLine<AtomicUsize>,
    count: CacheLine<AtomicUsize>,
}

/// Ring buffer that trades CPU for latency: full and empty conditions
/// are busy-waited on an atomic occupancy counter, never slept on.
///
/// Correct only under the single-producer/single-consumer contract; the
/// acquire loads in the wait loops pair with the release
/// increment/decrement after each slot access, which is what makes a
/// counter observation imply slot visibility.
pub struct SpinRing<T> {
    segment: Segment,
    header: *const SpinHeader,
    slots: *mut T,
    capacity: usize,
    _elements: PhantomData<T>,
}

impl<T: ShmValue> SpinRing<T> {
    /// Bind to the segment's control block, zeroing it when this process
    /// created the segment.
    pub fn attach(segment: Segment) -> Result<SpinRing<T>, QueueError> {
        if mem::align_of::<T>() > 64 {
            return Err(QueueError::Config(format!(
                "element alignment {} exceeds the segment layout alignment of 64",
                mem::align_of::<T>()
            )));
        }

        let slots_off = mem::size_of::<SpinHeader>();
        if slots_off >= segment.control_capacity() {
            return Err(QueueError::Config(format!(
                "segment of {} bytes cannot hold the spin control block ({} bytes)",
                segment.declared_size(),
                slots_off
            )));
        }
        let capacity = (segment.control_capacity() - slots_off) / mem::size_of::<T>();
        if capacity == 0 {
            return Err(QueueError::Config(format!(
                "segment of {} bytes leaves no room for {}-byte elements",
                segment.declared_size(),
                mem::size_of::<T>()
            )));
        }

        let base = segment.control_base();
        let header = base as *mut SpinHeader;
        let slots = unsafe { base.add(slots_off) } as *mut T;

        if segment.is_creator() {
            segment.begin_init();
            unsafe {
                ptr::write(
                    header,
                    SpinHeader {
                        read_idx: CacheLine(AtomicUsize::new(0)),
                        write_idx: CacheLine(AtomicUsize::new(0)),
                        count: CacheLine(AtomicUsize::new(0)),
                    },
                );
            }
            segment.mark_ready();
            debug!(capacity, "initialized spin ring control block");
        } else {
            segment.wait_ready();
            debug!(capacity, "reopened spin ring control block");
        }

        Ok(SpinRing {
            segment,
            header,
            slots,
            capacity,
            _elements: PhantomData,
        })
    }

    #[inline]
    fn header(&self) -> &SpinHeader {
        unsafe { &*self.header }
    }

    /// Current occupancy. Exact only when the observing side is the sole
    /// mutator of its index.
    pub fn len(&self) -> usize {
        self.header().count.0.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }
}

impl<T: ShmValue> RingBuffer<T> for SpinRing<T> {
    fn push(&self, value: T) -> Result<(), QueueError> {
        self.segment.ensure_process_not_killed();
        let hdr = self.header();

        while hdr.count.0.load(Ordering::Acquire) == self.capacity {
            hint::spin_loop();
        }

        let at = hdr.write_idx.0.load(Ordering::Relaxed);
        unsafe {
            ptr::write(self.slots.add(at), value);
        }
        hdr.write_idx
            .0
            .store((at + 1) % self.capacity, Ordering::Relaxed);
        // Publishes the slot write to the consumer.
        hdr.count.0.fetch_add(1, Ordering::Release);
        Ok(())
    }

    fn pop(&self) -> Result<T, QueueError> {
        self.segment.ensure_process_not_killed();
        let hdr = self.header();

        while hdr.count.0.load(Ordering::Acquire) == 0 {
            hint::spin_loop();
        }

        let at = hdr.read_idx.0.load(Ordering::Relaxed);
        let value = unsafe { ptr::read(self.slots.add(at)) };
        hdr.read_idx
            .0
            .store((at + 1) % self.capacity, Ordering::Relaxed);
        // Publishes the freed slot to the producer.
        hdr.count.0.fetch_sub(1, Ordering::Release);
        Ok(value)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
