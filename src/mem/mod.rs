//! Small memory-layout helpers shared by the layout table and the pin bitmap.

pub mod bit_util;

pub use bit_util::BitUtil;
