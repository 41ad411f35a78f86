use std::marker::PhantomData;
use std::mem;
use std::ptr;

use raw_sync::events::{Event, EventImpl, EventInit, EventState};
use raw_sync::locks::{LockImpl, LockInit, Mutex};
use raw_sync::Timeout;
use tracing::{debug, trace};

use crate::core::{RingBuffer, Segment, ShmValue};
use crate::errors::QueueError;

/// `read_idx` value meaning the ring holds nothing. With the sentinel in
/// play, `read_idx == insert_idx` (both valid) can only mean full.
const EMPTY: i64 = -1;

/// Index pair guarded by the shared mutex.
#[repr(C)]
struct Positions {
    read_idx: i64,
    insert_idx: i64,
}

#[inline]
const fn align_up(x: usize, a: usize) -> usize {
    (x + a - 1) & !(a - 1)
}

/// Ring buffer whose producer sleeps while full and consumer sleeps while
/// empty, via a process-shared mutex and a pair of events. A waiter
/// clears its event after every wakeup and re-checks the ring state
/// under the mutex, so a signal left over from an earlier transition is
/// consumed instead of turning later waits into a busy loop.
///
/// The control block lives at the start of the mapped segment:
/// mutex, `not_empty` event, `not_full` event, `Positions`, then the
/// element array filling the rest of the segment.
pub struct BlockingRing<T> {
    // The lock and events hold pointers into the mapping; `segment` is
    // declared last so it is still mapped when they drop.
    lock: Box<dyn LockImpl>,
    not_empty: Box<dyn EventImpl>,
    not_full: Box<dyn EventImpl>,
    slots: *mut T,
    capacity: usize,
    _elements: PhantomData<T>,
    segment: Segment,
}

impl<T: ShmValue> BlockingRing<T> {
    /// Bind to the segment's control block, constructing it in place when
    /// this process created the segment and reopening it otherwise.
    pub fn attach(segment: Segment) -> Result<BlockingRing<T>, QueueError> {
        if mem::align_of::<T>() > 64 {
            return Err(QueueError::Config(format!(
                "element alignment {} exceeds the segment layout alignment of 64",
                mem::align_of::<T>()
            )));
        }

        let base = segment.control_base();
        let lock_bytes = Mutex::size_of(Some(base));
        let event_bytes = Event::size_of(None);

        let not_empty_off = align_up(lock_bytes, 8);
        let not_full_off = align_up(not_empty_off + event_bytes, 8);
        let positions_off = align_up(not_full_off + event_bytes, 8);
        let slots_off = align_up(
            positions_off + mem::size_of::<Positions>(),
            mem::align_of::<T>().max(8),
        );

        if slots_off >= segment.control_capacity() {
            return Err(QueueError::Config(format!(
                "segment of {} bytes cannot hold the blocking control block ({} bytes)",
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

        let positions_ptr = unsafe { base.add(positions_off) };
        let slots = unsafe { base.add(slots_off) } as *mut T;

        let (lock, not_empty, not_full) = if segment.is_creator() {
            segment.begin_init();
            let (lock, _) =
                unsafe { Mutex::new(base, positions_ptr) }.map_err(QueueError::Lock)?;
            let (not_empty, _) = unsafe { Event::new(base.add(not_empty_off), true) }
                .map_err(QueueError::Event)?;
            let (not_full, _) = unsafe { Event::new(base.add(not_full_off), true) }
                .map_err(QueueError::Event)?;
            unsafe {
                ptr::write(
                    positions_ptr as *mut Positions,
                    Positions {
                        read_idx: EMPTY,
                        insert_idx: 0,
                    },
                );
            }
            segment.mark_ready();
            debug!(capacity, "initialized blocking ring control block");
            (lock, not_empty, not_full)
        } else {
            segment.wait_ready();
            let (lock, _) =
                unsafe { Mutex::from_existing(base, positions_ptr) }.map_err(QueueError::Lock)?;
            let (not_empty, _) = unsafe { Event::from_existing(base.add(not_empty_off)) }
                .map_err(QueueError::Event)?;
            let (not_full, _) = unsafe { Event::from_existing(base.add(not_full_off)) }
                .map_err(QueueError::Event)?;
            debug!(capacity, "reopened blocking ring control block");
            (lock, not_empty, not_full)
        };

        Ok(BlockingRing {
            lock,
            not_empty,
            not_full,
            slots,
            capacity,
            _elements: PhantomData,
            segment,
        })
    }

    #[inline]
    fn is_full(pos: &Positions) -> bool {
        pos.read_idx != EMPTY && pos.read_idx == pos.insert_idx
    }
}

/// View the mutex-protected bytes as the index pair. The caller must
/// hold the lock guard the pointer came from.
#[inline]
unsafe fn ring_positions<'a>(data: *mut u8) -> &'a mut Positions {
    &mut *(data as *mut Positions)
}

impl<T: ShmValue> RingBuffer<T> for BlockingRing<T> {
    fn push(&self, value: T) -> Result<(), QueueError> {
        self.segment.ensure_process_not_killed();

        let mut guard = self.lock.lock().map_err(QueueError::Lock)?;
        while Self::is_full(unsafe { ring_positions(*guard) }) {
            trace!("ring full; waiting for a pop");
            drop(guard);
            self.not_full
                .wait(Timeout::Infinite)
                .map_err(QueueError::Event)?;
            // Consume the signal before re-checking: a pop that lands
            // after this is re-signaled, a pop that landed before it is
            // visible once the lock is re-acquired.
            self.not_full
                .set(EventState::Clear)
                .map_err(QueueError::Event)?;
            guard = self.lock.lock().map_err(QueueError::Lock)?;
        }

        let pos = unsafe { ring_positions(*guard) };
        let was_empty = pos.read_idx == EMPTY;
        let at = pos.insert_idx;
        unsafe {
            ptr::write(self.slots.add(at as usize), value);
        }
        if was_empty {
            pos.read_idx = at;
        }
        pos.insert_idx = (at + 1) % self.capacity as i64;
        drop(guard);

        if was_empty {
            self.not_empty
                .set(EventState::Signaled)
                .map_err(QueueError::Event)?;
        }
        Ok(())
    }

    fn pop(&self) -> Result<T, QueueError> {
        self.segment.ensure_process_not_killed();

        let mut guard = self.lock.lock().map_err(QueueError::Lock)?;
        while unsafe { ring_positions(*guard) }.read_idx == EMPTY {
            trace!("ring empty; waiting for a push");
            drop(guard);
            self.not_empty
                .wait(Timeout::Infinite)
                .map_err(QueueError::Event)?;
            // Consume the signal before re-checking: a push that lands
            // after this is re-signaled, a push that landed before it is
            // visible once the lock is re-acquired.
            self.not_empty
                .set(EventState::Clear)
                .map_err(QueueError::Event)?;
            guard = self.lock.lock().map_err(QueueError::Lock)?;
        }

        let pos = unsafe { ring_positions(*guard) };
        let was_full = Self::is_full(pos);
        let at = pos.read_idx;
        let value = unsafe { ptr::read(self.slots.add(at as usize)) };
        pos.read_idx = (at + 1) % self.capacity as i64;
        if pos.read_idx == pos.insert_idx {
            // Post-read this looks like "full"; a pop can only have
            // drained the ring, so reinterpret and reset the sentinel.
            pos.read_idx = EMPTY;
            pos.insert_idx = 0;
        }
        drop(guard);

        if was_full {
            self.not_full
                .set(EventState::Signaled)
                .map_err(QueueError::Event)?;
        }
        Ok(value)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Backend, ShmemConfig, DEFAULT_SEGMENT_SIZE, SEGMENT_TAG_BYTES};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(dir: &tempfile::TempDir, segment_size: usize) -> ShmemConfig {
        static QUEUE_ID: AtomicUsize = AtomicUsize::new(0);
        ShmemConfig::builder()
            .data_dir(dir.path().to_str().unwrap())
            .queue_name(format!(
                "blocking-unit-{}-{}",
                std::process::id(),
                QUEUE_ID.fetch_add(1, Ordering::SeqCst)
            ))
            .segment_size(segment_size)
            .backend(Backend::Blocking)
            .build()
            .unwrap()
    }

    fn test_ring(cfg: &ShmemConfig) -> BlockingRing<u32> {
        BlockingRing::attach(Segment::open(cfg).unwrap()).unwrap()
    }

    #[test]
    fn fifo_within_capacity() -> Result<(), QueueError> {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir, 4096);
        let ring = test_ring(&cfg);

        for x in 0..100u32 {
            ring.push(x)?;
        }
        for x in 0..100u32 {
            assert_eq!(ring.pop()?, x);
        }
        Ok(())
    }

    #[test]
    fn fifo_across_wraparound() -> Result<(), QueueError> {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir, 4096);
        let ring = test_ring(&cfg);

        // Mixed batches totalling several times the capacity force the
        // indices around the end of the element array. Outstanding
        // elements stay below capacity so nothing blocks.
        let cap = ring.capacity() as u32;
        let mut next_push = 0u32;
        let mut next_pop = 0u32;
        let total = cap * 3;
        while next_pop < total {
            let outstanding = next_push - next_pop;
            let burst = (next_push % 7 + 1).min(total - next_push).min(cap - outstanding);
            for _ in 0..burst {
                ring.push(next_push)?;
                next_push += 1;
            }
            let drain = (next_pop % 5 + 1).min(next_push - next_pop);
            for _ in 0..drain {
                assert_eq!(ring.pop()?, next_pop);
                next_pop += 1;
            }
        }
        Ok(())
    }

    #[test]
    fn drain_resets_to_empty_state() -> Result<(), QueueError> {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir, 4096);
        let ring = test_ring(&cfg);

        // Fill completely, drain completely, then reuse: exercises the
        // full -> looks-full-after-pop -> empty reinterpretation.
        let cap = ring.capacity() as u32;
        for round in 0..3 {
            for x in 0..cap {
                ring.push(round * cap + x)?;
            }
            for x in 0..cap {
                assert_eq!(ring.pop()?, round * cap + x);
            }
        }
        Ok(())
    }

    #[test]
    fn capacity_fills_remaining_segment() -> Result<(), QueueError> {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir, 4096);
        let ring = test_ring(&cfg);

        // Exactly `capacity` pushes must complete without a consumer.
        for x in 0..ring.capacity() as u32 {
            ring.push(x)?;
        }
        Ok(())
    }

    #[test]
    fn capacity_derived_from_segment_size() -> Result<(), QueueError> {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir, DEFAULT_SEGMENT_SIZE);

        // Measure the control block the same way `attach` lays it out,
        // against the segment this ring will actually use.
        let segment = Segment::open(&cfg)?;
        let base = segment.control_base();
        let lock_bytes = Mutex::size_of(Some(base));
        let event_bytes = Event::size_of(None);
        let not_empty_off = align_up(lock_bytes, 8);
        let not_full_off = align_up(not_empty_off + event_bytes, 8);
        let positions_off = align_up(not_full_off + event_bytes, 8);
        let slots_off = align_up(positions_off + mem::size_of::<Positions>(), 8);
        let control = SEGMENT_TAG_BYTES + slots_off;

        let ring: BlockingRing<u32> = BlockingRing::attach(segment)?;
        assert_eq!(
            ring.capacity(),
            (DEFAULT_SEGMENT_SIZE - control) / mem::size_of::<u32>()
        );

        // All of the derived capacity is usable without a consumer.
        for x in 0..ring.capacity() as u32 {
            ring.push(x)?;
        }
        Ok(())
    }
}
