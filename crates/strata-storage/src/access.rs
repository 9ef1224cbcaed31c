//! Interpreting raw blocks as columnar tuple storage.
//!
//! A block under a layout is a header followed by one mini-block per
//! column:
//!
//! ```text
//! | null bitmap (padded to attr size) | value[0] | value[1] | ... |
//! ```
//!
//! A set bit means the value is present; in the presence column's bitmap a
//! set bit additionally means the slot is allocated.

use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::block::{
    ATTR_OFFSETS_OFFSET, BLOCK_SIZE, LAYOUT_VERSION_OFFSET, NUM_SLOTS_OFFSET, RawBlock, TupleSlot,
};
use crate::layout::BlockLayout;
use crate::util::pad_up_to_size;
use strata_common::bitmap::{ConcurrentBitmap, RawBitmap};
use strata_common::types::LayoutVersion;

/// The column whose null bitmap doubles as the slot-occupancy bitmap.
///
/// A tuple is not live unless this column is "present", so clearing its bit
/// frees the slot. Its value cell holds the tuple's version-chain head.
pub const PRESENCE_COLUMN_ID: u16 = 0;

/// Stateless interpreter of raw blocks under a fixed layout.
///
/// Holds only the layout and the per-column offsets derived from it, so one
/// strategy serves every block of a table concurrently.
pub struct TupleAccessStrategy {
    layout: BlockLayout,
    /// Start of each column's mini-block, as an offset from the block base.
    column_offsets: Vec<u32>,
    /// Start of each column's value array, as an offset from the block base.
    value_starts: Vec<u32>,
}

impl TupleAccessStrategy {
    /// Creates a strategy for `layout`.
    pub fn new(layout: BlockLayout) -> Self {
        let num_slots = layout.num_slots();
        let bitmap_bytes = RawBitmap::size_in_bytes(num_slots) as u32;

        let mut column_offsets = Vec::with_capacity(layout.num_cols() as usize);
        let mut value_starts = Vec::with_capacity(layout.num_cols() as usize);
        let mut offset = layout.header_size();
        for col in 0..layout.num_cols() {
            let size = layout.attr_size(col) as u32;
            column_offsets.push(offset);
            let values = offset + pad_up_to_size(size, bitmap_bytes);
            value_starts.push(values);
            offset = pad_up_to_size(8, values + num_slots * size);
        }
        debug_assert!(offset as usize <= BLOCK_SIZE);

        Self {
            layout,
            column_offsets,
            value_starts,
        }
    }

    /// Returns the layout this strategy interprets blocks with.
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Writes the block header and carves the mini-blocks.
    ///
    /// The block must be zeroed, which is how the block store hands them
    /// out; a zeroed block already has an all-clear presence bitmap and
    /// `num_records == 0`.
    pub fn initialize(&self, block: &mut RawBlock, layout_version: LayoutVersion) {
        let num_cols = self.layout.num_cols();
        let bytes = block.bytes_mut();
        debug_assert!(
            bytes[..self.layout.header_size() as usize]
                .iter()
                .all(|&b| b == 0),
            "blocks must be zero-initialized before use"
        );

        bytes[LAYOUT_VERSION_OFFSET..LAYOUT_VERSION_OFFSET + 4]
            .copy_from_slice(&layout_version.0.to_le_bytes());
        // num_records stays zero.
        bytes[NUM_SLOTS_OFFSET..NUM_SLOTS_OFFSET + 4]
            .copy_from_slice(&self.layout.num_slots().to_le_bytes());
        for (i, &offset) in self.column_offsets.iter().enumerate() {
            let at = ATTR_OFFSETS_OFFSET + 4 * i;
            bytes[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        }
        let num_attrs_at = ATTR_OFFSETS_OFFSET + 4 * num_cols as usize;
        bytes[num_attrs_at..num_attrs_at + 2].copy_from_slice(&num_cols.to_le_bytes());
        for col in 0..num_cols {
            bytes[num_attrs_at + 2 + col as usize] = self.layout.attr_size(col);
        }
    }

    /// Returns the null bitmap of `col` in `block`.
    pub fn column_null_bitmap<'a>(&self, block: &'a RawBlock, col: u16) -> &'a ConcurrentBitmap {
        let offset = self.column_offsets[col as usize] as usize;
        // Safety: the mini-block's bitmap region is in bounds for the
        // block's lifetime and only ever accessed through this atomic view.
        unsafe { ConcurrentBitmap::from_raw(block.base().add(offset), self.layout.num_slots()) }
    }

    /// Returns the start of `col`'s value array in `block`.
    pub fn column_start(&self, block: &RawBlock, col: u16) -> *mut u8 {
        let offset = self.value_starts[col as usize] as usize;
        // Safety: in bounds by construction.
        unsafe { block.base().add(offset) }
    }

    /// Claims a free slot in `block`.
    ///
    /// Probes the presence bitmap for the first clear bit and races other
    /// allocators with a compare-and-swap; exactly one thread wins any
    /// given bit. Returns `None` only when every slot is taken.
    pub fn allocate(&self, block: &RawBlock) -> Option<TupleSlot> {
        let bitmap = self.column_null_bitmap(block, PRESENCE_COLUMN_ID);
        let block_ptr = block as *const RawBlock as *mut RawBlock;
        for i in 0..self.layout.num_slots() {
            loop {
                if bitmap.test(i) {
                    break;
                }
                if bitmap.flip(i, false) {
                    block.num_records().fetch_add(1, Ordering::Relaxed);
                    return Some(TupleSlot::new(block_ptr, i));
                }
                // The swap lost to traffic on a neighboring bit; the slot
                // may still be free, so re-test before moving on.
            }
        }
        None
    }

    /// Returns the attribute address, or `None` when the value is null.
    ///
    /// # Safety
    ///
    /// `slot` must point into a live block initialized with this
    /// strategy's layout.
    pub unsafe fn access_with_null_check(&self, slot: TupleSlot, col: u16) -> Option<NonNull<u8>> {
        let block = unsafe { &*slot.block() };
        if !self.column_null_bitmap(block, col).test(slot.offset()) {
            return None;
        }
        Some(self.attr_ptr(block, slot.offset(), col))
    }

    /// Returns the attribute address, marking the value present first if it
    /// was null. This is the write path's accessor.
    ///
    /// # Safety
    ///
    /// `slot` must point into a live block initialized with this
    /// strategy's layout, and the caller must hold the tuple's write lock.
    pub unsafe fn access_force_not_null(&self, slot: TupleSlot, col: u16) -> NonNull<u8> {
        let block = unsafe { &*slot.block() };
        let bitmap = self.column_null_bitmap(block, col);
        while !bitmap.test(slot.offset()) {
            if bitmap.flip(slot.offset(), false) {
                break;
            }
        }
        self.attr_ptr(block, slot.offset(), col)
    }

    /// Returns the attribute address without consulting the null bitmap.
    ///
    /// Only the presence column may be read this way: its value cell (the
    /// version-chain head) is meaningful whether or not the bit is set.
    ///
    /// # Safety
    ///
    /// `slot` must point into a live block initialized with this
    /// strategy's layout.
    pub unsafe fn access_without_null_check(&self, slot: TupleSlot, col: u16) -> NonNull<u8> {
        assert_eq!(
            col, PRESENCE_COLUMN_ID,
            "only the presence column may skip the null check"
        );
        let block = unsafe { &*slot.block() };
        self.attr_ptr(block, slot.offset(), col)
    }

    /// Sets the attribute null. Clearing the presence column deallocates
    /// the slot.
    ///
    /// # Safety
    ///
    /// `slot` must point into a live block initialized with this
    /// strategy's layout, and the caller must hold the tuple's write lock.
    pub unsafe fn set_null(&self, slot: TupleSlot, col: u16) {
        let block = unsafe { &*slot.block() };
        let bitmap = self.column_null_bitmap(block, col);
        loop {
            if !bitmap.test(slot.offset()) {
                // Already null; nothing to do.
                return;
            }
            if bitmap.flip(slot.offset(), true) {
                if col == PRESENCE_COLUMN_ID {
                    block.num_records().fetch_sub(1, Ordering::Relaxed);
                }
                return;
            }
        }
    }

    fn attr_ptr(&self, block: &RawBlock, offset: u32, col: u16) -> NonNull<u8> {
        debug_assert!(offset < self.layout.num_slots());
        let at = self.value_starts[col as usize] as usize
            + self.layout.attr_size(col) as usize * offset as usize;
        // Safety: in bounds by the layout's slot-count math; the base
        // pointer is never null.
        unsafe { NonNull::new_unchecked(block.base().add(at)) }
    }
}
