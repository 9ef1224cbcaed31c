//! Block layout descriptors.

use crate::block::BLOCK_SIZE;
use crate::util::pad_up_to_size;
use strata_common::bitmap::RawBitmap;

/// Immutable description of how a block is divided into column mini-blocks.
///
/// A layout is a sequence of per-column byte widths drawn from {1, 2, 4, 8},
/// held in canonical order: ascending column id means non-increasing
/// attribute size, which keeps every value naturally aligned with minimal
/// padding. Column 0 is the presence column; its null bitmap doubles as the
/// slot-occupancy bitmap and its 8-byte value cell holds the version-chain
/// head, so every layout must contain at least one 8-byte column.
///
/// From the widths the layout derives `num_slots`: the largest number of
/// tuples for which the block header plus every mini-block (null bitmap
/// padded to the attribute size, then the value array) still fits in
/// [`BLOCK_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockLayout {
    attr_sizes: Vec<u8>,
    tuple_size: u32,
    header_size: u32,
    num_slots: u32,
}

impl BlockLayout {
    /// Creates a layout from per-column attribute sizes.
    ///
    /// The sizes are sorted into canonical descending order; callers refer
    /// to columns by their position after sorting.
    ///
    /// # Panics
    ///
    /// Panics if fewer than two columns are given, if any size is not one
    /// of {1, 2, 4, 8}, or if no 8-byte column exists to serve as the
    /// presence column.
    pub fn new(mut attr_sizes: Vec<u8>) -> Self {
        assert!(
            attr_sizes.len() >= 2,
            "a layout needs the presence column plus at least one attribute"
        );
        assert!(attr_sizes.len() <= u16::MAX as usize, "too many columns");
        for &size in &attr_sizes {
            assert!(
                matches!(size, 1 | 2 | 4 | 8),
                "attribute size must be one of 1, 2, 4, 8, got {size}"
            );
        }
        attr_sizes.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(
            attr_sizes[0], 8,
            "presence column must be 8 bytes wide to hold the version pointer"
        );

        let num_cols = attr_sizes.len() as u32;
        let tuple_size: u32 = attr_sizes.iter().map(|&s| s as u32).sum();
        // layout_version + num_records + num_slots + attr_offsets[num_cols]
        // + num_attrs + attr_sizes[num_cols], padded so the first mini-block
        // starts 8-aligned.
        let header_size = pad_up_to_size(8, 3 * 4 + 4 * num_cols + 2 + num_cols);
        let num_slots = Self::compute_num_slots(&attr_sizes, header_size, tuple_size);

        Self {
            attr_sizes,
            tuple_size,
            header_size,
            num_slots,
        }
    }

    /// Largest slot count whose mini-blocks all fit behind the header.
    fn compute_num_slots(attr_sizes: &[u8], header_size: u32, tuple_size: u32) -> u32 {
        let num_cols = attr_sizes.len() as u64;
        let available = (BLOCK_SIZE as u32 - header_size) as u64;
        // Ignoring padding, each tuple costs tuple_size bytes plus one bit
        // per column; padding only shrinks the real answer.
        let mut n = (available * 8 / (8 * tuple_size as u64 + num_cols)) as u32 + 1;
        while n > 0 && Self::occupied_bytes(attr_sizes, header_size, n) > BLOCK_SIZE as u32 {
            n -= 1;
        }
        assert!(n > 0, "layout does not fit a single tuple in a block");
        n
    }

    /// Total bytes a block needs for `num_slots` tuples under this layout.
    fn occupied_bytes(attr_sizes: &[u8], header_size: u32, num_slots: u32) -> u32 {
        let bitmap_bytes = RawBitmap::size_in_bytes(num_slots) as u32;
        let mut total = header_size;
        for &size in attr_sizes {
            let values_start = pad_up_to_size(size as u32, bitmap_bytes);
            // Each mini-block is padded out to 8 so the next one starts
            // aligned for its own bitmap.
            total += pad_up_to_size(8, values_start + num_slots * size as u32);
        }
        total
    }

    /// Returns the attribute size of `col` in bytes.
    #[inline]
    pub fn attr_size(&self, col: u16) -> u8 {
        self.attr_sizes[col as usize]
    }

    /// Returns the number of columns, including the presence column.
    #[inline]
    pub fn num_cols(&self) -> u16 {
        self.attr_sizes.len() as u16
    }

    /// Returns the number of tuple slots per block.
    #[inline]
    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    /// Returns the summed attribute sizes of one tuple.
    #[inline]
    pub fn tuple_size(&self) -> u32 {
        self.tuple_size
    }

    /// Returns the block header size (already padded to 8).
    #[inline]
    pub fn header_size(&self) -> u32 {
        self.header_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sorts_descending() {
        let layout = BlockLayout::new(vec![1, 8, 2, 4, 8]);
        assert_eq!(layout.num_cols(), 5);
        assert_eq!(layout.attr_size(0), 8);
        assert_eq!(layout.attr_size(1), 8);
        assert_eq!(layout.attr_size(2), 4);
        assert_eq!(layout.attr_size(3), 2);
        assert_eq!(layout.attr_size(4), 1);
        assert_eq!(layout.tuple_size(), 23);
    }

    #[test]
    fn test_layout_header_size() {
        // 12 fixed bytes + 4 * 2 offsets + 2 + 2 sizes = 24, already 8-aligned.
        let layout = BlockLayout::new(vec![8, 8]);
        assert_eq!(layout.header_size(), 24);

        // 12 + 4 * 3 + 2 + 3 = 29, padded to 32.
        let layout = BlockLayout::new(vec![8, 4, 1]);
        assert_eq!(layout.header_size(), 32);
    }

    #[test]
    fn test_layout_num_slots_is_maximal() {
        for sizes in [
            vec![8u8, 8],
            vec![8, 4, 2, 1],
            vec![8, 1, 1, 1, 1, 1, 1, 1],
            vec![8; 16],
        ] {
            let layout = BlockLayout::new(sizes.clone());
            let mut sorted = sizes.clone();
            sorted.sort_unstable_by(|a, b| b.cmp(a));

            let n = layout.num_slots();
            assert!(n > 0);
            assert!(
                BlockLayout::occupied_bytes(&sorted, layout.header_size(), n)
                    <= BLOCK_SIZE as u32
            );
            assert!(
                BlockLayout::occupied_bytes(&sorted, layout.header_size(), n + 1)
                    > BLOCK_SIZE as u32
            );
        }
    }

    #[test]
    fn test_layout_two_columns_slot_count() {
        // Two 8-byte columns: 16 bytes + 2 bits per tuple, so roughly
        // (1 MiB - 24) / 16.25 slots.
        let layout = BlockLayout::new(vec![8, 8]);
        let approx = (BLOCK_SIZE as u32 - layout.header_size()) / 17;
        assert!(layout.num_slots() > approx);
        assert!(layout.num_slots() < BLOCK_SIZE as u32 / 16);
    }

    #[test]
    fn test_layout_equality_and_hash() {
        use std::collections::HashSet;

        let a = BlockLayout::new(vec![8, 4, 2]);
        let b = BlockLayout::new(vec![2, 4, 8]);
        let c = BlockLayout::new(vec![8, 4, 4]);

        // Same canonical order, same layout.
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 2);
    }

    #[test]
    #[should_panic(expected = "presence column")]
    fn test_layout_requires_eight_byte_presence() {
        BlockLayout::new(vec![4, 4]);
    }

    #[test]
    #[should_panic(expected = "attribute size")]
    fn test_layout_rejects_bad_sizes() {
        BlockLayout::new(vec![8, 3]);
    }

    #[test]
    #[should_panic(expected = "presence column plus at least one attribute")]
    fn test_layout_rejects_single_column() {
        BlockLayout::new(vec![8]);
    }
}
