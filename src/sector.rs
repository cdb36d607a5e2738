//! Sector primitive: raw operations on a single sector's memory.
//!
//! Every function here takes a raw pointer and trusts the caller to hold
//! whatever lock or pin makes that pointer valid — this module has no
//! locking of its own. The [`crate::store::SectorStore`] is the only caller.

use crate::layout::Layout;

/// Byte offset of the `id` field within a sector.
const ID_OFFSET: usize = 0;
/// Byte offset of the `alive_mask` field within a sector.
const ALIVE_MASK_OFFSET: usize = 4;

/// Reads the entity id out of a sector's header.
///
/// # Safety
/// `ptr` must point to at least [`crate::layout::HEADER_SIZE`] readable bytes.
pub unsafe fn read_id(ptr: *const u8) -> u32 {
    std::ptr::read_unaligned(ptr.add(ID_OFFSET) as *const u32)
}

/// # Safety
/// `ptr` must point to at least [`crate::layout::HEADER_SIZE`] writable bytes.
pub unsafe fn write_id(ptr: *mut u8, id: u32) {
    std::ptr::write_unaligned(ptr.add(ID_OFFSET) as *mut u32, id);
}

/// # Safety
/// `ptr` must point to at least [`crate::layout::HEADER_SIZE`] readable bytes.
pub unsafe fn read_alive_mask(ptr: *const u8) -> u32 {
    std::ptr::read_unaligned(ptr.add(ALIVE_MASK_OFFSET) as *const u32)
}

/// # Safety
/// `ptr` must point to at least [`crate::layout::HEADER_SIZE`] writable bytes.
pub unsafe fn write_alive_mask(ptr: *mut u8, mask: u32) {
    std::ptr::write_unaligned(ptr.add(ALIVE_MASK_OFFSET) as *mut u32, mask);
}

/// Writes a fresh header: the given id, alive-mask zeroed.
///
/// # Safety
/// `ptr` must point to a valid sector.
pub unsafe fn construct_header(ptr: *mut u8, id: u32) {
    write_id(ptr, id);
    write_alive_mask(ptr, 0);
}

/// # Safety
/// `ptr` must point to a valid sector.
pub unsafe fn is_alive(ptr: *const u8, mask: u32) -> bool {
    read_alive_mask(ptr) & mask != 0
}

/// A sector is logically alive if any component bit in its mask is set.
///
/// # Safety
/// `ptr` must point to a valid sector.
pub unsafe fn is_sector_alive(ptr: *const u8) -> bool {
    read_alive_mask(ptr) != 0
}

/// # Safety
/// `ptr` must point to a valid sector.
pub unsafe fn set_alive(ptr: *mut u8, mask: u32, on: bool) {
    let current = read_alive_mask(ptr);
    let updated = if on { current | mask } else { current & !mask };
    write_alive_mask(ptr, updated);
}

/// # Safety
/// `ptr` must point to a valid sector whose layout matches `layout`.
pub unsafe fn field_ptr(ptr: *mut u8, offset: usize) -> *mut u8 {
    ptr.add(offset)
}

/// Destroys one component field if alive; no-op otherwise.
///
/// # Safety
/// `ptr` must point to a valid sector whose layout matches `layout`, and
/// `type_idx` must be a registered component.
pub unsafe fn destroy_member(ptr: *mut u8, layout: &Layout, type_idx: u32) {
    let Some(entry) = layout.entry(type_idx) else {
        return;
    };
    let mask = entry.alive_mask();
    if is_alive(ptr, mask) {
        let field = field_ptr(ptr, entry.offset());
        (entry.ops().drop_fn)(field);
        set_alive(ptr, mask, false);
    }
}

/// Destroys every alive member, leaving the sector logically empty but
/// reusable (header's alive-mask becomes zero).
///
/// # Safety
/// `ptr` must point to a valid sector whose layout matches `layout`.
pub unsafe fn destroy_sector(ptr: *mut u8, layout: &Layout) {
    for i in 0..layout.type_count() as u32 {
        destroy_member(ptr, layout, i);
    }
}

/// Moves every alive field from `src` to `dst`, dropping the stale value at
/// `dst` first, and copies the id. `src` becomes logically empty.
///
/// # Safety
/// `src` and `dst` must be valid, non-overlapping sectors whose layout
/// matches `layout`.
pub unsafe fn move_sector(src: *mut u8, dst: *mut u8, layout: &Layout) {
    write_id(dst, read_id(src));
    let src_mask = read_alive_mask(src);
    let dst_mask = read_alive_mask(dst);
    let mut new_dst_mask = 0u32;

    for entry in layout.entries() {
        let bit = entry.alive_mask();
        let src_field = field_ptr(src, entry.offset());
        let dst_field = field_ptr(dst, entry.offset());

        if dst_mask & bit != 0 {
            (entry.ops().drop_fn)(dst_field);
        }
        if src_mask & bit != 0 {
            (entry.ops().move_ctor)(src_field, dst_field);
            new_dst_mask |= bit;
        }
    }

    write_alive_mask(dst, new_dst_mask);
    write_alive_mask(src, 0);
}

/// Copies every alive field from `src` to `dst` via each component's copy
/// constructor. Caller must have already verified `layout.supports_copy()`.
///
/// # Safety
/// `src` and `dst` must be valid, non-overlapping sectors whose layout
/// matches `layout`, and every registered component must have a copy
/// constructor.
pub unsafe fn copy_sector(src: *const u8, dst: *mut u8, layout: &Layout) {
    write_id(dst, read_id(src));
    let src_mask = read_alive_mask(src);

    for entry in layout.entries() {
        let bit = entry.alive_mask();
        if src_mask & bit == 0 {
            continue;
        }
        let src_field = field_ptr(src as *mut u8, entry.offset()) as *const u8;
        let dst_field = field_ptr(dst, entry.offset());
        let copy_ctor = entry
            .ops()
            .copy_ctor
            .expect("copy_sector called on a move-only layout");
        copy_ctor(src_field, dst_field);
    }

    write_alive_mask(dst, src_mask);
}
