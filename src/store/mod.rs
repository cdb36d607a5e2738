//! The sector store itself: ordered insertion, shifting,
//! erase, defragmentation, iteration, and whole-store copy/move. Assembles
//! every leaf subsystem (layout, chunk table, sparse index, pin sidecar,
//! deferred-erase queue) behind one reader/writer lock.

pub mod deferred;
pub mod iter;
pub mod sparse;

use crate::chunk::ChunkTable;
use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};
use crate::layout::{ComponentDescriptor, Layout};
use crate::pin::{Pin, PinCounters};
use crate::sector;
use crate::util::log::{self, Log};
use deferred::DeferredQueue;
use iter::{AliveIter, IdRange, LinearIter, RangedAliveIter, RangedIter};
use parking_lot::{RwLock, RwLockWriteGuard};
use sparse::SparseIndex;
use std::ops::Range;
use std::time::Duration;

/// A read-only reference into one sector's memory.
///
/// Valid only until the next structural operation on the store that
/// produced it, unless the caller holds a [`Pin`] on its id.
#[derive(Clone, Copy)]
pub struct SectorRef<'a> {
    ptr: *const u8,
    layout: &'a Layout,
}

impl<'a> SectorRef<'a> {
    /// # Safety
    /// `ptr` must address a live sector whose layout matches `layout`, and
    /// must remain valid for the lifetime `'a` the caller assigns to it.
    pub(crate) unsafe fn new(ptr: *const u8, layout: &'a Layout) -> Self {
        Self { ptr, layout }
    }

    pub fn id(&self) -> u32 {
        unsafe { sector::read_id(self.ptr) }
    }

    pub fn is_alive(&self, mask: u32) -> bool {
        unsafe { sector::is_alive(self.ptr, mask) }
    }

    pub fn is_alive_type(&self, type_idx: u32) -> bool {
        self.layout
            .alive_mask_of(type_idx)
            .is_some_and(|mask| self.is_alive(mask))
    }

    /// Raw pointer to a field, for callers that know its true type.
    ///
    /// # Safety
    /// `T` must match the size/layout registered for `type_idx`, and the
    /// field must be alive.
    pub unsafe fn field<T>(&self, type_idx: u32) -> Option<*const T> {
        self.layout
            .offset_of(type_idx)
            .map(|offset| self.ptr.add(offset) as *const T)
    }
}

pub(crate) struct StoreInner {
    chunks: ChunkTable,
    size: usize,
    sparse: SparseIndex,
    layout: Layout,
    deferred: DeferredQueue,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        for idx in 0..self.size {
            let ptr = self.chunks.sector_mut_ptr(idx);
            unsafe { sector::destroy_sector(ptr, &self.layout) };
        }
    }
}

/// A reserved sector slot returned by [`SectorStore::acquire`].
///
/// Holds the store's exclusive lock for as long as the slot lives, so a
/// caller's write through [`Self::as_mut_ptr`] is part of the same critical
/// section as the allocation/relocation that produced the pointer.
pub struct SectorSlot<'a> {
    _guard: RwLockWriteGuard<'a, StoreInner>,
    ptr: *mut u8,
}

impl<'a> SectorSlot<'a> {
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }
}

/// Chunked, sorted-by-id storage for dense entity-component data.
pub struct SectorStore {
    inner: RwLock<StoreInner>,
    pins: PinCounters,
    config: StoreConfig,
    log: Box<dyn Log>,
}

impl SectorStore {
    /// Builds a store from an ordered component list and a chunk capacity.
    pub fn create(descriptors: &[ComponentDescriptor], chunk_capacity: usize) -> Result<Self> {
        let config = StoreConfig::builder().chunk_capacity(chunk_capacity).build();
        Self::create_with_config(descriptors, config)
    }

    /// Builds a store from the full [`StoreConfig`].
    pub fn create_with_config(
        descriptors: &[ComponentDescriptor],
        config: StoreConfig,
    ) -> Result<Self> {
        let layout = Layout::new(descriptors)?;
        let chunks = ChunkTable::new(config.chunk_capacity(), layout.sector_size());
        Ok(Self {
            inner: RwLock::new(StoreInner {
                chunks,
                size: 0,
                sparse: SparseIndex::new(),
                layout,
                deferred: DeferredQueue::new(),
            }),
            pins: PinCounters::new(config.pin_block_size()),
            config,
            log: log::factory::no_op(),
        })
    }

    /// Replaces this store's logger (see `util::log`).
    pub fn with_logger(mut self, log: Box<dyn Log>) -> Self {
        self.log = log;
        self
    }

    // ---- capacity -------------------------------------------------------

    pub fn reserve(&self, n: usize) {
        self.inner.write().chunks.reserve(n);
    }

    pub fn shrink_to_fit(&self) {
        let mut inner = self.inner.write();
        let live = inner.size;
        inner.chunks.shrink_to_fit(live);
    }

    pub fn size(&self) -> usize {
        self.inner.read().size
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().chunks.capacity()
    }

    pub fn sparse_capacity(&self) -> usize {
        self.inner.read().sparse.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        for idx in 0..inner.size {
            let ptr = inner.chunks.sector_mut_ptr(idx);
            unsafe { sector::destroy_sector(ptr, &inner.layout) };
        }
        inner.size = 0;
        inner.sparse = SparseIndex::new();
        inner.chunks.shrink_to_fit(0);
        inner.deferred = DeferredQueue::new();
    }

    // ---- read -------------------------------------------------------------

    fn dense_index_locked(inner: &StoreInner, id: u32) -> Option<usize> {
        let dense = inner.sparse.get(id);
        if dense == sparse::INVALID_ID || (dense as usize) >= inner.size {
            None
        } else {
            Some(dense as usize)
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        let inner = self.inner.read();
        Self::dense_index_locked(&inner, id).is_some()
    }

    /// Returns the sector for `id`, or `None` if it has no sector.
    ///
    /// The reference is obtained under the shared lock but outlives it —
    /// see the safety note on [`SectorRef`]. The underlying chunk storage
    /// is never deallocated except by `clear`/`shrink_to_fit`/`erase*`,
    /// which all require the exclusive lock this call has already released
    /// by the time the caller can observe the reference.
    pub fn find(&self, id: u32) -> Option<SectorRef<'_>> {
        let inner = self.inner.read();
        let dense = Self::dense_index_locked(&inner, id)?;
        let ptr = inner.chunks.sector_ptr(dense);
        let layout_ptr: *const Layout = &inner.layout;
        drop(inner);
        // SAFETY: see the doc comment above.
        Some(unsafe { SectorRef::new(ptr, &*layout_ptr) })
    }

    /// Precondition-checked variant of [`Self::find`]: panics if `id` has
    /// no sector.
    pub fn get(&self, id: u32) -> SectorRef<'_> {
        self.find(id)
            .unwrap_or_else(|| panic!("get({}) called with no sector for that id", id))
    }

    // ---- mutation: acquire / insert --------------------------------------

    fn binary_search_insert_pos(chunks: &ChunkTable, size: usize, id: u32) -> usize {
        let mut lo = 0usize;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_id = unsafe { sector::read_id(chunks.sector_ptr(mid)) };
            if mid_id < id {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn relocate_one(
        chunks: &mut ChunkTable,
        sparse: &mut SparseIndex,
        layout: &Layout,
        src: usize,
        dst: usize,
    ) {
        if layout.all_trivial() {
            Self::relocate_block(chunks, sparse, layout, src, dst, 1);
        } else {
            let src_ptr = chunks.sector_mut_ptr(src);
            let dst_ptr = chunks.sector_mut_ptr(dst);
            unsafe { sector::move_sector(src_ptr, dst_ptr, layout) };
            let id = unsafe { sector::read_id(dst_ptr) };
            sparse.set(id, dst as u32);
        }
    }

    /// Bulk-copies `count` consecutive trivially-relocatable sectors from
    /// `[src, src + count)` to `[dst, dst + count)` in one `ptr::copy`.
    ///
    /// # Safety (caller contract, not `unsafe fn` since every argument is a
    /// plain index)
    /// Both ranges must each lie within a single chunk — use
    /// `ChunkTable::max_run_from`/`max_run_to` to size `count` accordingly —
    /// and `layout.all_trivial()` must hold.
    fn relocate_block(
        chunks: &mut ChunkTable,
        sparse: &mut SparseIndex,
        layout: &Layout,
        src: usize,
        dst: usize,
        count: usize,
    ) {
        debug_assert!(layout.all_trivial());
        debug_assert!(chunks.same_chunk(src, count));
        debug_assert!(chunks.same_chunk(dst, count));
        let sector_size = chunks.sector_size();
        let src_ptr = chunks.sector_ptr(src);
        let dst_ptr = chunks.sector_mut_ptr(dst);
        // SAFETY: both spans are each contiguous within a single chunk
        // (debug-asserted above); `ptr::copy` is used rather than the
        // `_nonoverlapping` variant because the two spans may still overlap
        // when they live in the same chunk.
        unsafe { std::ptr::copy(src_ptr, dst_ptr, sector_size * count) };
        for i in 0..count {
            let id = unsafe { sector::read_id(chunks.sector_ptr(dst + i)) };
            sparse.set(id, (dst + i) as u32);
        }
    }

    /// Right-shifts the tail starting at `from` by `count` slots, processing
    /// destinations in descending order so no live source is clobbered.
    /// When every component is trivially relocatable, consecutive slots that
    /// share both a source and a destination chunk are relocated in one
    /// bulk copy instead of one `ptr::copy` per sector.
    fn shift_right_locked(inner: &mut StoreInner, from: usize, count: usize) {
        let old_size = inner.size;
        inner.chunks.reserve(old_size + count);
        let range_start = from + count;
        let trivial = inner.layout.all_trivial();
        let mut dst_end = old_size + count;

        while dst_end > range_start {
            if trivial {
                let src_end = dst_end - count;
                let run = (dst_end - range_start)
                    .min(inner.chunks.max_run_to(dst_end))
                    .min(inner.chunks.max_run_to(src_end));
                let dst_start = dst_end - run;
                let src_start = src_end - run;
                Self::relocate_block(
                    &mut inner.chunks,
                    &mut inner.sparse,
                    &inner.layout,
                    src_start,
                    dst_start,
                    run,
                );
                dst_end = dst_start;
            } else {
                dst_end -= 1;
                let src = dst_end - count;
                Self::relocate_one(&mut inner.chunks, &mut inner.sparse, &inner.layout, src, dst_end);
            }
        }
    }

    /// Left-shifts `[from, size)` down by `count` slots, ascending so the
    /// loop can never underflow. Batches bulk copies the same way as
    /// [`Self::shift_right_locked`].
    fn shift_left_locked(inner: &mut StoreInner, from: usize, count: usize) {
        let size = inner.size;
        let trivial = inner.layout.all_trivial();
        let mut src_start = from;

        while src_start < size {
            if trivial {
                let dst_start = src_start - count;
                let run = (size - src_start)
                    .min(inner.chunks.max_run_from(src_start))
                    .min(inner.chunks.max_run_from(dst_start));
                Self::relocate_block(
                    &mut inner.chunks,
                    &mut inner.sparse,
                    &inner.layout,
                    src_start,
                    dst_start,
                    run,
                );
                src_start += run;
            } else {
                let dst = src_start - count;
                Self::relocate_one(&mut inner.chunks, &mut inner.sparse, &inner.layout, src_start, dst);
                src_start += 1;
            }
        }
    }

    /// Ensures a sector and field exist for `(id, type_idx)`, returning a
    /// [`SectorSlot`] holding the exclusive lock and a writable pointer to
    /// the field. Any prior value is dropped first. The lock is released
    /// only when the returned slot is dropped, so the allocation above and
    /// the caller's write through the pointer happen in one critical
    /// section.
    pub fn acquire(&self, id: u32, type_idx: u32) -> Result<SectorSlot<'_>> {
        if id == sparse::INVALID_ID {
            return Err(StoreError::InvalidId);
        }
        let mut inner = self.inner.write();
        if inner.layout.entry(type_idx).is_none() {
            return Err(StoreError::UnknownType(type_idx));
        }

        let dense_idx = match Self::dense_index_locked(&inner, id) {
            Some(dense) => dense,
            None => {
                if inner.size >= u32::MAX as usize {
                    return Err(StoreError::CapacityExceeded(format!(
                        "store already holds u32::MAX sectors, cannot insert id {id}"
                    )));
                }
                let pos = Self::binary_search_insert_pos(&inner.chunks, inner.size, id);
                if pos < inner.size {
                    Self::shift_right_locked(&mut inner, pos, 1);
                } else {
                    inner.chunks.reserve(inner.size + 1);
                }
                let ptr = inner.chunks.sector_mut_ptr(pos);
                unsafe { sector::construct_header(ptr, id) };
                inner.size += 1;
                inner.sparse.set(id, pos as u32);
                self.log
                    .debug(&format!("acquire: inserted sector for id {id} at index {pos}"));
                pos
            }
        };

        let entry = *inner.layout.entry(type_idx).unwrap();
        let ptr = inner.chunks.sector_mut_ptr(dense_idx);
        let field_ptr = unsafe {
            sector::destroy_member(ptr, &inner.layout, type_idx);
            sector::set_alive(ptr, entry.alive_mask(), true);
            sector::field_ptr(ptr, entry.offset())
        };
        Ok(SectorSlot {
            _guard: inner,
            ptr: field_ptr,
        })
    }

    /// Writes `value` into the field for `(id, type_idx)`, holding the
    /// exclusive lock across both the allocation and the write.
    ///
    /// # Safety
    /// `T` must exactly match the size and alignment registered for
    /// `type_idx`.
    pub unsafe fn insert<T>(&self, id: u32, type_idx: u32, value: T) -> Result<()> {
        let mut slot = self.acquire(id, type_idx)?;
        (slot.as_mut_ptr() as *mut T).write(value);
        Ok(())
    }

    /// Builds and writes a field's value lazily, only constructing it once
    /// the sector slot is secured.
    ///
    /// # Safety
    /// Same contract as [`Self::insert`].
    pub unsafe fn emplace<T, F>(&self, id: u32, type_idx: u32, build: F) -> Result<()>
    where
        F: FnOnce() -> T,
    {
        self.insert(id, type_idx, build())
    }

    // ---- mutation: destroy / erase ---------------------------------------

    pub fn destroy_member(&self, type_idx: u32, id: u32) {
        let mut inner = self.inner.write();
        if let Some(dense) = Self::dense_index_locked(&inner, id) {
            let ptr = inner.chunks.sector_mut_ptr(dense);
            unsafe { sector::destroy_member(ptr, &inner.layout, type_idx) };
        }
    }

    /// Destroys `type_idx` for every id in `ids`, sorted first so the
    /// underlying dense lookups are cache-friendlier.
    pub fn destroy_members(&self, type_idx: u32, ids: &mut [u32]) {
        ids.sort_unstable();
        let mut inner = self.inner.write();
        for &id in ids.iter() {
            if let Some(dense) = Self::dense_index_locked(&inner, id) {
                let ptr = inner.chunks.sector_mut_ptr(dense);
                unsafe { sector::destroy_member(ptr, &inner.layout, type_idx) };
            }
        }
    }

    pub fn destroy_sector(&self, id: u32) {
        let mut inner = self.inner.write();
        if let Some(dense) = Self::dense_index_locked(&inner, id) {
            let ptr = inner.chunks.sector_mut_ptr(dense);
            unsafe { sector::destroy_sector(ptr, &inner.layout) };
        }
    }

    fn erase_locked(&self, inner: &mut StoreInner, range: Range<usize>) {
        for idx in range.clone() {
            let ptr = inner.chunks.sector_mut_ptr(idx);
            let id = unsafe { sector::read_id(ptr) };
            inner.sparse.clear_id(id);
            unsafe { sector::destroy_sector(ptr, &inner.layout) };
        }
        let count = range.len();
        if count > 0 {
            Self::shift_left_locked(inner, range.end, count);
            inner.size -= count;
        }
        let live = inner.size;
        inner.chunks.shrink_to_fit(live);
        self.log.debug(&format!("erase: removed {count} sector(s)"));
    }

    /// Immediate erase of a contiguous dense range. Precondition: no sector
    /// in the range has a non-zero pin counter.
    pub fn erase_range(&self, range: Range<usize>) {
        let mut inner = self.inner.write();
        debug_assert!(range.end <= inner.size);
        for idx in range.clone() {
            let ptr = inner.chunks.sector_ptr(idx);
            let id = unsafe { sector::read_id(ptr) };
            debug_assert_eq!(
                self.pins.counter(id),
                0,
                "erase_range touching a pinned sector (id {id})"
            );
        }
        self.erase_locked(&mut inner, range);
    }

    /// Erases `id` immediately if it's movable, otherwise enqueues it for
    /// [`Self::process_pending`].
    pub fn erase_async(&self, id: u32) {
        let mut inner = self.inner.write();
        if self.pins.can_move(id) {
            if let Some(dense) = Self::dense_index_locked(&inner, id) {
                self.erase_locked(&mut inner, dense..dense + 1);
                return;
            }
        }
        if inner.deferred.push(id) {
            self.log.debug(&format!("erase_async: deferred id {id}"));
        }
    }

    /// Retries every deferred erase once; ids still pinned remain queued.
    pub fn process_pending(&self) {
        let mut inner = self.inner.write();
        let mut deferred = std::mem::take(&mut inner.deferred);
        let mut freed = 0usize;

        deferred.drain_retry(|id| {
            if !self.pins.can_move(id) {
                return false;
            }
            match Self::dense_index_locked(&inner, id) {
                Some(dense) => {
                    self.erase_locked(&mut inner, dense..dense + 1);
                    freed += 1;
                    true
                }
                // Sector already gone (e.g. raced with a direct erase); drop
                // the queue entry either way.
                None => true,
            }
        });

        inner.deferred = deferred;
        if freed > 0 {
            self.log
                .info(&format!("process_pending: freed {freed} deferred sector(s)"));
        }
    }

    // ---- defragment -------------------------------------------------------

    /// Packs live sectors toward index 0, preserving id order. Aborts (and
    /// returns `false`) the moment it would have to move a pinned sector.
    pub fn defragment(&self) -> bool {
        let mut inner = self.inner.write();
        let size = inner.size;
        let mut write_idx = 0usize;
        let mut read_idx = 0usize;
        let mut aborted = false;

        while read_idx < size {
            let read_ptr = inner.chunks.sector_ptr(read_idx);
            if unsafe { !sector::is_sector_alive(read_ptr) } {
                read_idx += 1;
                continue;
            }

            if write_idx != read_idx {
                let id = unsafe { sector::read_id(read_ptr) };
                if !self.pins.can_move(id) {
                    aborted = true;
                    break;
                }
                Self::relocate_one(&mut inner.chunks, &mut inner.sparse, &inner.layout, read_idx, write_idx);
            }

            write_idx += 1;
            read_idx += 1;
        }

        if !aborted {
            inner.size = write_idx;
            let live = inner.size;
            inner.chunks.shrink_to_fit(live);
        }

        if aborted {
            self.log.warn("defragment: aborted on a pin conflict");
        } else {
            self.log.debug("defragment: completed");
        }
        !aborted
    }

    /// Same as [`Self::defragment`]; the name documents that a pin conflict
    /// is an expected, non-error outcome under load.
    pub fn try_defragment(&self) -> bool {
        let had_pins = self.pins.has_any();
        let completed = self.defragment();
        if had_pins && !completed {
            self.log
                .debug("try_defragment: deferred to a later tick, pins still active");
        }
        completed
    }

    fn dead_ratio(&self) -> f64 {
        let inner = self.inner.read();
        if inner.size == 0 {
            return 0.0;
        }
        let dead = (0..inner.size)
            .filter(|&idx| unsafe { !sector::is_sector_alive(inner.chunks.sector_ptr(idx)) })
            .count();
        dead as f64 / inner.size as f64
    }

    /// The single entry point an orchestrator ties its periodic tick to
    ///: drains the deferred queue, then defragments if
    /// the dead-sector ratio has crossed the configured threshold.
    pub fn maintenance_tick(&self) {
        self.process_pending();
        let ratio = self.dead_ratio();
        if ratio > self.config.dead_ratio_threshold() {
            let completed = self.try_defragment();
            self.log.info(&format!(
                "maintenance_tick: dead_ratio={ratio:.3} threshold={:.3} defragmented={completed}",
                self.config.dead_ratio_threshold()
            ));
        }
    }

    // ---- pinning ----------------------------------------------------------

    pub fn pin(&self, id: u32) -> Result<Pin<'_>> {
        self.pins.pin(id)?;
        Ok(Pin::new(self, id))
    }

    pub(crate) fn unpin_internal(&self, id: u32) {
        self.pins.unpin(id);
    }

    pub fn can_move(&self, id: u32) -> bool {
        self.pins.can_move(id)
    }

    pub fn has_any_pins(&self) -> bool {
        self.pins.has_any()
    }

    pub fn watermark(&self) -> i64 {
        self.pins.watermark()
    }

    pub fn wait_until_movable(&self, id: u32) {
        self.pins.wait_until_movable(id);
    }

    pub fn wait_until_movable_timeout(&self, id: u32, timeout: Duration) -> bool {
        self.pins.wait_until_movable_timeout(id, timeout)
    }

    // ---- iteration ----------------------------------------------------------

    pub fn iter(&self) -> LinearIter<'_> {
        LinearIter::new(self.inner.read())
    }

    pub fn iter_alive(&self, type_idx: u32) -> AliveIter<'_> {
        AliveIter::new(self.inner.read(), type_idx)
    }

    pub fn iter_ranged(&self, ranges: Vec<IdRange>) -> RangedIter<'_> {
        RangedIter::new(self.inner.read(), ranges)
    }

    pub fn iter_ranged_alive(&self, ranges: Vec<IdRange>, type_idx: u32) -> RangedAliveIter<'_> {
        RangedAliveIter::new(self.inner.read(), ranges, type_idx)
    }

    // ---- whole-store copy / move --------------------------------------------

    /// Copies the whole store. Requires every registered component to
    /// support copy.
    pub fn clone_store(&self) -> Result<Self> {
        let inner = self.inner.read();
        if !inner.layout.supports_copy() {
            return Err(StoreError::CopyUnsupported);
        }

        let new_layout = inner.layout.clone();
        let mut new_chunks = ChunkTable::new(inner.chunks.chunk_capacity(), new_layout.sector_size());
        new_chunks.reserve(inner.size);
        let mut new_sparse = SparseIndex::new();

        for idx in 0..inner.size {
            let src_ptr = inner.chunks.sector_ptr(idx);
            let dst_ptr = new_chunks.sector_mut_ptr(idx);
            unsafe { sector::copy_sector(src_ptr, dst_ptr, &new_layout) };
            let id = unsafe { sector::read_id(dst_ptr) };
            new_sparse.set(id, idx as u32);
        }

        Ok(Self {
            inner: RwLock::new(StoreInner {
                chunks: new_chunks,
                size: inner.size,
                sparse: new_sparse,
                layout: new_layout,
                deferred: DeferredQueue::new(),
            }),
            pins: PinCounters::new(self.config.pin_block_size()),
            config: self.config.clone(),
            log: log::factory::no_op(),
        })
    }

    /// Moves `other`'s chunks, sparse index and layout into `self`. `other`
    /// becomes empty but remains usable. Pin state is not part of the
    /// transfer and stays with whichever store it already belonged to.
    pub fn take(&mut self, other: &mut Self) {
        let mut self_inner = self.inner.write();
        let mut other_inner = other.inner.write();

        let empty_layout = other_inner.layout.clone();
        let empty_chunks =
            ChunkTable::new(other.config.chunk_capacity(), empty_layout.sector_size());

        *self_inner = std::mem::replace(
            &mut other_inner,
            StoreInner {
                chunks: empty_chunks,
                size: 0,
                sparse: SparseIndex::new(),
                layout: empty_layout,
                deferred: DeferredQueue::new(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn move_u64(src: *mut u8, dst: *mut u8) {
        let v = std::ptr::read(src as *const u64);
        std::ptr::write(dst as *mut u64, v);
    }
    unsafe fn copy_u64(src: *const u8, dst: *mut u8) {
        let v = std::ptr::read(src as *const u64);
        std::ptr::write(dst as *mut u64, v);
    }
    unsafe fn drop_u64(_ptr: *mut u8) {}

    fn u64_descriptor() -> ComponentDescriptor {
        ComponentDescriptor {
            size: 8,
            align: 8,
            is_trivially_relocatable: true,
            ops: crate::layout::ComponentOps {
                move_ctor: move_u64,
                copy_ctor: Some(copy_u64),
                drop_fn: drop_u64,
            },
        }
    }

    fn store_with_u64(chunk_capacity: usize) -> SectorStore {
        SectorStore::create(&[u64_descriptor()], chunk_capacity).unwrap()
    }

    fn put(store: &SectorStore, id: u32, value: u64) {
        unsafe { store.insert(id, 0, value).unwrap() };
    }

    fn ids_of<'a>(refs: impl Iterator<Item = SectorRef<'a>>) -> Vec<u32> {
        refs.map(|r| r.id()).collect()
    }

    #[test]
    fn test_insert_then_find_round_trip() {
        let store = store_with_u64(4);
        put(&store, 5, 0xdead_beef);
        let found = store.find(5).unwrap();
        assert_eq!(found.id(), 5);
        let value = unsafe { *found.field::<u64>(0).unwrap() };
        assert_eq!(value, 0xdead_beef);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let store = store_with_u64(4);
        let err = store.acquire(0, 7).unwrap_err();
        assert_eq!(err, StoreError::UnknownType(7));
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        let store = store_with_u64(4);
        let err = store.acquire(sparse::INVALID_ID, 0).unwrap_err();
        assert_eq!(err, StoreError::InvalidId);
    }

    // Scenario A: ordered insertion across a chunk boundary.
    #[test]
    fn test_scenario_ordered_insertion_across_chunk_boundary() {
        let store = store_with_u64(3);
        for id in 0..5u32 {
            put(&store, id, id as u64);
        }
        assert_eq!(store.size(), 5);
        assert_eq!(ids_of(store.iter()), vec![0, 1, 2, 3, 4]);
        assert!(store.capacity() >= 5);
    }

    // Scenario B: mid-insert right-shift.
    #[test]
    fn test_scenario_mid_insert_right_shift() {
        let store = store_with_u64(8);
        for &id in &[0u32, 1, 2, 4, 5] {
            put(&store, id, id as u64);
        }
        put(&store, 3, 3);
        assert_eq!(ids_of(store.iter()), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(store.find(5).unwrap().id(), 5);
    }

    // Scenario D: watermark descent after successive unpins.
    #[test]
    fn test_scenario_watermark_descent() {
        let store = store_with_u64(8);
        for id in 0..256u32 {
            put(&store, id, id as u64);
        }
        let pin_200 = store.pin(200).unwrap();
        let pin_50 = store.pin(50).unwrap();
        assert!(!store.can_move(60));

        drop(pin_200);
        assert!(store.can_move(60));
        assert_eq!(store.watermark(), 50);

        drop(pin_50);
        assert_eq!(store.watermark(), -1);
    }

    // Scenario E: defragment after scattered member destruction.
    #[test]
    fn test_scenario_defragment_after_erase_pattern() {
        let store = store_with_u64(4);
        for id in 0..10u32 {
            put(&store, id, id as u64);
        }
        for &id in &[1u32, 4, 8] {
            store.destroy_member(0, id);
        }
        assert!(store.defragment());
        assert_eq!(store.size(), 7);
        assert_eq!(ids_of(store.iter()), vec![0, 2, 3, 5, 6, 7, 9]);
    }

    #[test]
    fn test_erase_async_defers_while_pinned_then_frees_on_process_pending() {
        let store = store_with_u64(8);
        for id in 0..16u32 {
            put(&store, id, id as u64);
        }
        let pin = store.pin(10).unwrap();
        store.erase_async(10);
        assert!(store.find(10).is_some());

        drop(pin);
        store.process_pending();
        assert!(store.find(10).is_none());
        assert_eq!(store.size(), 15);
    }

    #[test]
    fn test_defragment_aborts_on_pin_conflict() {
        let store = store_with_u64(4);
        for id in 0..5u32 {
            put(&store, id, id as u64);
        }
        store.destroy_member(0, 1);
        let pin = store.pin(2).unwrap();
        assert!(!store.defragment());
        assert_eq!(store.size(), 5);
        drop(pin);
    }

    #[test]
    fn test_clone_store_produces_equivalent_contents() {
        let store = store_with_u64(4);
        for id in 0..6u32 {
            put(&store, id, (id * 10) as u64);
        }
        let cloned = store.clone_store().unwrap();
        assert_eq!(cloned.size(), store.size());
        assert_eq!(ids_of(cloned.iter()), ids_of(store.iter()));
        let value = unsafe { *cloned.find(3).unwrap().field::<u64>(0).unwrap() };
        assert_eq!(value, 30);
    }

    #[test]
    fn test_take_moves_contents_and_empties_source() {
        let mut dest = store_with_u64(4);
        let mut src = store_with_u64(4);
        for id in 0..4u32 {
            put(&src, id, id as u64);
        }
        dest.take(&mut src);
        assert_eq!(dest.size(), 4);
        assert_eq!(ids_of(dest.iter()), vec![0, 1, 2, 3]);
        assert_eq!(src.size(), 0);
        assert!(src.is_empty());
    }

    #[test]
    fn test_iter_alive_skips_destroyed_members() {
        let store = store_with_u64(4);
        for id in 0..4u32 {
            put(&store, id, id as u64);
        }
        store.destroy_member(0, 2);
        assert_eq!(ids_of(store.iter_alive(0)), vec![0, 1, 3]);
    }

    #[test]
    fn test_iter_ranged_filters_to_union_of_ranges() {
        let store = store_with_u64(4);
        for id in 0..20u32 {
            put(&store, id, id as u64);
        }
        let ranges = vec![IdRange::new(2, 5), IdRange::new(15, 17)];
        assert_eq!(ids_of(store.iter_ranged(ranges)), vec![2, 3, 4, 15, 16]);
    }

    #[test]
    fn test_clear_empties_store() {
        let store = store_with_u64(4);
        for id in 0..10u32 {
            put(&store, id, id as u64);
        }
        store.clear();
        assert_eq!(store.size(), 0);
        assert_eq!(store.capacity(), 0);
        assert!(store.find(5).is_none());
    }

    #[test]
    fn test_maintenance_tick_defragments_past_threshold() {
        let config = StoreConfig::builder()
            .chunk_capacity(4)
            .dead_ratio_threshold(0.2)
            .build();
        let store = SectorStore::create_with_config(&[u64_descriptor()], config).unwrap();
        for id in 0..10u32 {
            put(&store, id, id as u64);
        }
        for &id in &[0u32, 1, 2, 3] {
            store.destroy_member(0, id);
        }
        store.maintenance_tick();
        assert_eq!(store.size(), 6);
        assert_eq!(ids_of(store.iter()), vec![4, 5, 6, 7, 8, 9]);
    }

    // Exercises the bulk-copy fast path in shift_right_locked/shift_left_locked
    // across several chunk boundaries at once, both growing (insert near the
    // front) and shrinking (erase near the front).
    #[test]
    fn test_shift_bulk_copy_preserves_values_across_chunk_boundaries() {
        let store = store_with_u64(3);
        for id in (0..30u32).step_by(2) {
            put(&store, id, id as u64);
        }
        // Insert odd ids from the front backwards, forcing long right-shifts
        // that span multiple 3-sector chunks.
        for id in (1..30u32).step_by(2).rev() {
            put(&store, id, id as u64);
        }
        assert_eq!(store.size(), 30);
        assert_eq!(ids_of(store.iter()), (0..30u32).collect::<Vec<_>>());
        for id in 0..30u32 {
            let value = unsafe { *store.find(id).unwrap().field::<u64>(0).unwrap() };
            assert_eq!(value, id as u64);
        }

        // Erase a contiguous prefix, forcing a long left-shift of the tail.
        store.erase_range(0..10);
        assert_eq!(store.size(), 20);
        assert_eq!(ids_of(store.iter()), (10..30u32).collect::<Vec<_>>());
        for id in 10..30u32 {
            let value = unsafe { *store.find(id).unwrap().field::<u64>(0).unwrap() };
            assert_eq!(value, id as u64);
        }
    }

    #[test]
    fn test_pin_is_alive_forwards_to_sector() {
        let store = store_with_u64(4);
        put(&store, 1, 42);
        let pin = store.pin(1).unwrap();
        assert!(pin.is_alive(1));
        assert!(!pin.is_alive(2));
    }

    #[test]
    fn test_insert_holds_lock_across_allocation_and_write() {
        // Regression test for the acquire/insert lock-release race: if the
        // write ever escaped the critical section, a concurrent writer on
        // another id could shift this sector out from under it. Drives many
        // interleaved low/high ids from two threads and checks every value
        // lands where it should.
        use std::sync::Arc;

        let store = Arc::new(store_with_u64(4));
        let low = Arc::clone(&store);
        let high = Arc::clone(&store);

        let low_thread = std::thread::spawn(move || {
            for id in (0..100u32).step_by(2) {
                put(&low, id, id as u64);
            }
        });
        let high_thread = std::thread::spawn(move || {
            for id in (1..100u32).step_by(2).rev() {
                put(&high, id, id as u64);
            }
        });

        low_thread.join().unwrap();
        high_thread.join().unwrap();

        assert_eq!(store.size(), 100);
        for id in 0..100u32 {
            let value = unsafe { *store.find(id).unwrap().field::<u64>(0).unwrap() };
            assert_eq!(value, id as u64);
        }
    }
}
