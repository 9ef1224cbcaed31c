//! Bit containers backing slot presence and per-column null tracking.
//!
//! Two flavors share the same bit addressing:
//! - [`RawBitmap`]: plain bytes, single-writer, used inside projected rows.
//! - [`ConcurrentBitmap`]: atomic bytes, lock-free, overlaid on the null
//!   bitmap region of a column mini-block inside a shared block.

use std::sync::atomic::{AtomicU8, Ordering};

/// A plain bitmap viewed over a byte slice.
///
/// Bit `i` lives in byte `i / 8` at position `i % 8` (LSB first). All
/// mutation requires exclusive access; use [`ConcurrentBitmap`] for bits
/// shared between threads.
#[repr(transparent)]
pub struct RawBitmap {
    bytes: [u8],
}

impl RawBitmap {
    /// Number of bytes needed to hold `num_bits` bits.
    pub const fn size_in_bytes(num_bits: u32) -> usize {
        (num_bits as usize).div_ceil(8)
    }

    /// Views a byte slice as a bitmap.
    pub fn from_slice(bytes: &[u8]) -> &RawBitmap {
        // Sound: RawBitmap is repr(transparent) over [u8].
        unsafe { &*(bytes as *const [u8] as *const RawBitmap) }
    }

    /// Views a mutable byte slice as a bitmap.
    pub fn from_slice_mut(bytes: &mut [u8]) -> &mut RawBitmap {
        unsafe { &mut *(bytes as *mut [u8] as *mut RawBitmap) }
    }

    /// Returns the value of bit `pos`.
    pub fn test(&self, pos: u32) -> bool {
        self.bytes[(pos / 8) as usize] & (1u8 << (pos % 8)) != 0
    }

    /// Sets bit `pos` to `value`.
    pub fn set(&mut self, pos: u32, value: bool) {
        let byte = &mut self.bytes[(pos / 8) as usize];
        let mask = 1u8 << (pos % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}

/// A lock-free bitmap overlaid on raw block memory.
///
/// The only mutator is [`flip`](ConcurrentBitmap::flip), a single-shot
/// compare-and-swap: two concurrent `flip(i, false)` on the same bit can
/// never both succeed, which is what makes the presence bitmap usable as a
/// slot allocator.
///
/// Mutation is per-byte CAS rather than per-word: a mini-block's bitmap
/// region is padded only to the column's attribute size, so a wider access
/// could cover value bytes owned by concurrent writers.
#[repr(transparent)]
pub struct ConcurrentBitmap {
    bytes: [AtomicU8],
}

impl ConcurrentBitmap {
    /// Number of bytes needed to hold `num_bits` bits.
    pub const fn size_in_bytes(num_bits: u32) -> usize {
        (num_bits as usize).div_ceil(8)
    }

    /// Views raw memory as a concurrent bitmap of `num_bits` bits.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of
    /// `size_in_bytes(num_bits)` bytes for the lifetime `'a`, within a
    /// single allocation, and all concurrent access to those bytes must go
    /// through this view.
    pub unsafe fn from_raw<'a>(ptr: *const u8, num_bits: u32) -> &'a ConcurrentBitmap {
        let len = Self::size_in_bytes(num_bits);
        unsafe {
            let slice = std::slice::from_raw_parts(ptr as *const AtomicU8, len);
            &*(slice as *const [AtomicU8] as *const ConcurrentBitmap)
        }
    }

    /// Returns the value of bit `pos`.
    pub fn test(&self, pos: u32) -> bool {
        let byte = self.bytes[(pos / 8) as usize].load(Ordering::Acquire);
        byte & (1u8 << (pos % 8)) != 0
    }

    /// Atomically transitions bit `pos` from `expected` to `!expected`.
    ///
    /// Returns false without changing anything if the bit does not currently
    /// read `expected`, or if the containing byte changed underneath the
    /// swap. Callers that must not skip a still-`expected` bit re-test and
    /// retry.
    pub fn flip(&self, pos: u32, expected: bool) -> bool {
        let byte = &self.bytes[(pos / 8) as usize];
        let mask = 1u8 << (pos % 8);
        let old = byte.load(Ordering::Relaxed);
        if ((old & mask) != 0) != expected {
            return false;
        }
        byte.compare_exchange(old, old ^ mask, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Clears every bit.
    ///
    /// Individual stores are atomic but the clear as a whole is not; only
    /// use this on a bitmap no other thread is touching, e.g. while wiping a
    /// freshly acquired block.
    pub fn clear(&self) {
        for byte in &self.bytes {
            byte.store(0, Ordering::Relaxed);
        }
    }

    /// Returns the number of bytes in this view.
    pub fn num_bytes(&self) -> usize {
        self.bytes.len()
    }
}
