//! Hierarchical pin bitmap.
//!
//! Level 0 is a dynamically grown vector of 64-bit words; bit `i` of word
//! `w` represents entity id `w * 64 + i`. Level `l + 1` summarises level `l`
//! the same way: bit `i` of word `w` at level `l + 1` says whether word
//! `w * 64 + i` at level `l` is non-zero. `highest_set` walks down from the
//! top level, using each level's summary to locate the next word to inspect,
//! giving an O(log N) "highest pinned id" query.
//!
//! Bit mutation is lock-free (atomic fetch-or/fetch-and on existing words);
//! growing the word vectors takes `growth_lock` so two concurrent growths
//! don't race each other. Readers never take `growth_lock`.

use crate::mem::BitUtil;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

const WORD_BITS: usize = 64;

/// Multi-level presence index over pinned entity ids.
pub struct HierarchicalBitmap {
    growth_lock: Mutex<()>,
    levels: RwLock<Vec<Vec<AtomicU64>>>,
}

impl HierarchicalBitmap {
    pub fn new() -> Self {
        Self {
            growth_lock: Mutex::new(()),
            levels: RwLock::new(Vec::new()),
        }
    }

    /// Grows the level-0 word vector (and every summary level above it) so
    /// that id `min_len_bits - 1` can be addressed. Idempotent.
    fn ensure_capacity(&self, min_len_bits: usize) {
        let _guard = self.growth_lock.lock();
        let mut levels = self.levels.write();

        if levels.is_empty() {
            levels.push(Vec::new());
        }

        let needed_level0_words = BitUtil::ceil_div(min_len_bits.max(1), WORD_BITS);
        if levels[0].len() < needed_level0_words {
            levels[0].resize_with(needed_level0_words, || AtomicU64::new(0));
        }

        let mut level = 0;
        loop {
            let words_at_level = levels[level].len();
            if words_at_level <= 1 {
                break;
            }
            let needed_next = BitUtil::ceil_div(words_at_level, WORD_BITS);
            if levels.len() <= level + 1 {
                levels.push(Vec::new());
            }
            if levels[level + 1].len() < needed_next {
                levels[level + 1].resize_with(needed_next, || AtomicU64::new(0));
            }
            level += 1;
        }
    }

    /// Sets or clears the bit for `id`, propagating the summary change
    /// upward only when the containing word's non-zero-ness flips.
    pub fn set(&self, id: u32, on: bool) {
        self.ensure_capacity(id as usize + 1);
        let levels = self.levels.read();
        let word_idx = id as usize / WORD_BITS;
        let bit = 1u64 << (id as usize % WORD_BITS);

        if on {
            let old = levels[0][word_idx].fetch_or(bit, Ordering::AcqRel);
            if old & bit != 0 {
                return;
            }
            Self::propagate_set(&levels, 0, word_idx);
        } else {
            let old = levels[0][word_idx].fetch_and(!bit, Ordering::AcqRel);
            if old & bit == 0 {
                return;
            }
            if old & !bit == 0 {
                Self::propagate_clear(&levels, 0, word_idx);
            }
        }
    }

    fn propagate_set(levels: &[Vec<AtomicU64>], mut level: usize, mut word_idx: usize) {
        loop {
            let next_level = level + 1;
            if next_level >= levels.len() {
                return;
            }
            let parent_word_idx = word_idx / WORD_BITS;
            let parent_bit = 1u64 << (word_idx % WORD_BITS);
            let old_parent =
                levels[next_level][parent_word_idx].fetch_or(parent_bit, Ordering::AcqRel);
            if old_parent & parent_bit != 0 {
                return; // ancestor already marked, stop.
            }
            level = next_level;
            word_idx = parent_word_idx;
        }
    }

    fn propagate_clear(levels: &[Vec<AtomicU64>], mut level: usize, mut word_idx: usize) {
        loop {
            let next_level = level + 1;
            if next_level >= levels.len() {
                return;
            }
            let parent_word_idx = word_idx / WORD_BITS;
            let parent_bit = 1u64 << (word_idx % WORD_BITS);
            let old_parent =
                levels[next_level][parent_word_idx].fetch_and(!parent_bit, Ordering::AcqRel);
            if old_parent & parent_bit == 0 {
                return;
            }
            if old_parent & !parent_bit != 0 {
                return; // ancestor still non-zero, stop.
            }
            level = next_level;
            word_idx = parent_word_idx;
        }
    }

    /// Level-0 bit test.
    pub fn test(&self, id: u32) -> bool {
        let levels = self.levels.read();
        if levels.is_empty() {
            return false;
        }
        let word_idx = id as usize / WORD_BITS;
        match levels[0].get(word_idx) {
            Some(word) => (word.load(Ordering::Acquire) >> (id as usize % WORD_BITS)) & 1 != 0,
            None => false,
        }
    }

    fn highest_nonzero_word(words: &[AtomicU64]) -> Option<(usize, u64)> {
        for idx in (0..words.len()).rev() {
            let value = words[idx].load(Ordering::Acquire);
            if value != 0 {
                return Some((idx, value));
            }
        }
        None
    }

    /// Highest currently-set id, or -1 when the bitmap is empty.
    ///
    /// May momentarily observe a stale summary bit during concurrent
    /// propagation, in which case it falls back to scanning the level it
    /// was about to descend into; it never returns a value below the true
    /// highest set bit.
    pub fn highest_set(&self) -> i64 {
        let levels = self.levels.read();
        if levels.is_empty() {
            return -1;
        }

        let top = levels.len() - 1;
        let Some((mut word_idx, mut word_val)) = Self::highest_nonzero_word(&levels[top]) else {
            return -1;
        };
        let mut bit_idx = 63 - word_val.leading_zeros() as usize;

        for level in (0..top).rev() {
            let candidate_word_idx = word_idx * WORD_BITS + bit_idx;
            word_val = levels[level]
                .get(candidate_word_idx)
                .map(|w| w.load(Ordering::Acquire))
                .unwrap_or(0);

            if word_val == 0 {
                // Stale summary bit observed mid-propagation; fall back to
                // scanning this level directly rather than trusting it.
                match Self::highest_nonzero_word(&levels[level]) {
                    Some((idx, val)) => {
                        word_idx = idx;
                        word_val = val;
                    }
                    None => return -1,
                }
            } else {
                word_idx = candidate_word_idx;
            }
            bit_idx = 63 - word_val.leading_zeros() as usize;
        }

        (word_idx * WORD_BITS + bit_idx) as i64
    }
}

impl Default for HierarchicalBitmap {
    fn default() -> Self {
        Self::new()
    }
}
