//! Pin counters, watermark and epoch.
//!
//! Per-id 16-bit counters are allocated lazily in blocks so memory cost
//! tracks the working set, not the id space. A [`crate::pin::bitmap::HierarchicalBitmap`]
//! tracks which ids are pinned so the watermark can be recomputed in
//! O(log N) once the currently-highest pin releases.

use crate::errors::{Result, StoreError};
use crate::pin::bitmap::HierarchicalBitmap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Per-id pin counters plus the derived watermark and distinct-pin count.
pub struct PinCounters {
    block_size: usize,
    blocks: RwLock<Vec<Option<Box<[AtomicU16]>>>>,
    bitmap: HierarchicalBitmap,
    /// Highest pinned id, or -1 when nothing is pinned.
    watermark: AtomicI64,
    /// Bumped on every pin/unpin; used to detect a racing pin while
    /// recomputing the watermark after the current maximum unpins.
    epoch: AtomicU64,
    distinct_count: AtomicUsize,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
}

impl PinCounters {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            blocks: RwLock::new(Vec::new()),
            bitmap: HierarchicalBitmap::new(),
            watermark: AtomicI64::new(-1),
            epoch: AtomicU64::new(0),
            distinct_count: AtomicUsize::new(0),
            wait_lock: Mutex::new(()),
            wait_cv: Condvar::new(),
        }
    }

    fn locate(&self, id: u32) -> (usize, usize) {
        let id = id as usize;
        (id / self.block_size, id % self.block_size)
    }

    /// Returns the counter for `id`, allocating its block on demand.
    fn counter_slot(&self, id: u32) -> &AtomicU16 {
        let (block_idx, in_block) = self.locate(id);

        {
            let blocks = self.blocks.read();
            if let Some(Some(block)) = blocks.get(block_idx) {
                // SAFETY: we hand out a reference that outlives the read
                // guard by relying on the fact that blocks, once allocated,
                // are never reallocated or removed (only appended).
                return unsafe { &*(block.as_ref().get_unchecked(in_block) as *const AtomicU16) };
            }
        }

        let mut blocks = self.blocks.write();
        if blocks.len() <= block_idx {
            blocks.resize_with(block_idx + 1, || None);
        }
        if blocks[block_idx].is_none() {
            let block: Vec<AtomicU16> = (0..self.block_size).map(|_| AtomicU16::new(0)).collect();
            blocks[block_idx] = Some(block.into_boxed_slice());
        }
        let block = blocks[block_idx].as_ref().unwrap();
        unsafe { &*(block.get_unchecked(in_block) as *const AtomicU16) }
    }

    /// Current counter value for `id`; 0 if its block was never allocated.
    pub fn counter(&self, id: u32) -> u16 {
        let (block_idx, in_block) = self.locate(id);
        let blocks = self.blocks.read();
        match blocks.get(block_idx) {
            Some(Some(block)) => block[in_block].load(Ordering::Acquire),
            _ => 0,
        }
    }

    fn notify_waiters(&self) {
        // Acquiring wait_lock here, after the atomic state change and before
        // notifying, closes the lost-wakeup window: a waiter either observes
        // the new state in its own pre-wait check (because this acquisition
        // happens-before its check), or is already parked on `wait_cv` and
        // gets woken by this notification.
        {
            let _guard = self.wait_lock.lock();
        }
        self.wait_cv.notify_all();
    }

    /// Raises the watermark to `id` if `id` is higher than the current value.
    fn raise_watermark(&self, id: u32) {
        let id = id as i64;
        loop {
            let current = self.watermark.load(Ordering::Relaxed);
            if current >= id {
                return;
            }
            if self
                .watermark
                .compare_exchange(current, id, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Increments the pin counter for `id`. Raises the watermark and flips
    /// the bitmap bit on the 0->1 transition.
    pub fn pin(&self, id: u32) -> Result<()> {
        let counter = self.counter_slot(id);
        loop {
            let old = counter.load(Ordering::Acquire);
            if old == u16::MAX {
                return Err(StoreError::PinSaturated(id));
            }
            if counter
                .compare_exchange(old, old + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if old == 0 {
                    self.bitmap.set(id, true);
                    self.distinct_count.fetch_add(1, Ordering::AcqRel);
                    self.raise_watermark(id);
                }
                self.epoch.fetch_add(1, Ordering::AcqRel);
                return Ok(());
            }
        }
    }

    /// Decrements the pin counter for `id`. On the 1->0 transition, clears
    /// the bitmap bit and, if `id` was the watermark, recomputes it.
    pub fn unpin(&self, id: u32) {
        let counter = self.counter_slot(id);
        let mut became_zero = false;
        loop {
            let old = counter.load(Ordering::Acquire);
            debug_assert!(old > 0, "unpin({}) called with a zero counter", id);
            if old == 0 {
                return;
            }
            if counter
                .compare_exchange(old, old - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                became_zero = old == 1;
                break;
            }
        }

        if became_zero {
            self.bitmap.set(id, false);
            self.distinct_count.fetch_sub(1, Ordering::AcqRel);

            // Retry until either a recompute commits cleanly (no pin/unpin
            // raced the snapshot) or some other operation has already moved
            // the watermark off `id` — a skipped CAS here must not be the
            // last word, or the watermark can wedge above the true highest
            // pinned id forever.
            while self.watermark.load(Ordering::Acquire) == id as i64 {
                let epoch_before = self.epoch.load(Ordering::Acquire);
                let recomputed = self.bitmap.highest_set();
                if self.epoch.load(Ordering::Acquire) != epoch_before {
                    continue;
                }
                if self
                    .watermark
                    .compare_exchange(id as i64, recomputed, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
                // compare_exchange only fails when the current value no
                // longer equals `id`, meaning another unpin already
                // published a value for us; the loop condition re-checks
                // and exits on the next iteration.
            }
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.notify_waiters();
    }

    /// `id > watermark && counter(id) == 0` — both loads acquire.
    pub fn can_move(&self, id: u32) -> bool {
        (id as i64) > self.watermark.load(Ordering::Acquire) && self.counter(id) == 0
    }

    pub fn has_any(&self) -> bool {
        self.distinct_count.load(Ordering::Acquire) != 0
    }

    pub fn watermark(&self) -> i64 {
        self.watermark.load(Ordering::Acquire)
    }

    /// Parks until `id` is movable: first past the watermark, then until its
    /// own counter drops to zero. No timeout; see `wait_until_movable_timeout`
    /// for a bounded variant.
    pub fn wait_until_movable(&self, id: u32) {
        let mut guard = self.wait_lock.lock();
        while (id as i64) <= self.watermark.load(Ordering::Acquire) {
            self.wait_cv.wait(&mut guard);
        }
        while self.counter(id) != 0 {
            self.wait_cv.wait(&mut guard);
        }
    }

    /// Bounded variant of [`Self::wait_until_movable`]. Returns `true` if
    /// the id became movable before `timeout` elapsed.
    pub fn wait_until_movable_timeout(&self, id: u32, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.wait_lock.lock();
        while (id as i64) <= self.watermark.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let result = self.wait_cv.wait_for(&mut guard, remaining);
            if result.timed_out() && (id as i64) <= self.watermark.load(Ordering::Acquire) {
                return false;
            }
        }
        while self.counter(id) != 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let result = self.wait_cv.wait_for(&mut guard, remaining);
            if result.timed_out() && self.counter(id) != 0 {
                return false;
            }
        }
        true
    }
}
