//! Self-describing partial-tuple images.
//!
//! A projected row is a single contiguous buffer describing a subset of a
//! tuple's columns together with their values and null bits:
//!
//! ```text
//! | u32 size | u16 num_cols | u16 col_ids[n] | pad to 4
//! | u32 value_offsets[n]                     | pad to 8
//! | null bitmap (ceil(n/8) bytes)            | pad to attr_size(col_ids[0])
//! | values, each padded to the next value's attribute size; total padded to 8
//! ```
//!
//! The same format serves redo images handed to inserts, deltas handed to
//! updates, select output buffers, and the before-images embedded in undo
//! records.

use crate::layout::BlockLayout;
use crate::util::pad_up_to_size;
use strata_common::bitmap::RawBitmap;

/// Byte offset of the column id list within a projected row.
const COL_IDS_OFFSET: usize = 6;

fn value_offsets_start(num_cols: u16) -> usize {
    pad_up_to_size(4, (COL_IDS_OFFSET + 2 * num_cols as usize) as u32) as usize
}

fn bitmap_start(num_cols: u16) -> usize {
    pad_up_to_size(8, (value_offsets_start(num_cols) + 4 * num_cols as usize) as u32) as usize
}

fn bitmap_end(num_cols: u16) -> usize {
    bitmap_start(num_cols) + RawBitmap::size_in_bytes(num_cols as u32)
}

fn buf_size(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn buf_num_cols(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[4], buf[5]])
}

fn buf_col_id(buf: &[u8], i: u16) -> u16 {
    let at = COL_IDS_OFFSET + 2 * i as usize;
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn buf_value_offset(buf: &[u8], i: u16) -> usize {
    let at = value_offsets_start(buf_num_cols(buf)) + 4 * i as usize;
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as usize
}

fn buf_index_of(buf: &[u8], col_id: u16) -> Option<u16> {
    let mut lo = 0u16;
    let mut hi = buf_num_cols(buf);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match buf_col_id(buf, mid).cmp(&col_id) {
            std::cmp::Ordering::Equal => return Some(mid),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    None
}

/// An exclusively owned projected row view over a caller buffer.
pub struct ProjectedRow<'a> {
    buf: &'a mut [u8],
}

impl<'a> ProjectedRow<'a> {
    /// Views an already-stamped row starting at `head`.
    ///
    /// # Safety
    ///
    /// `head` must point to a buffer previously initialized by
    /// [`ProjectedRowInitializer::initialize_row`] or
    /// [`ProjectedRow::copy_layout`], valid and exclusively borrowed for
    /// `'a`.
    pub(crate) unsafe fn from_raw(head: *mut u8) -> ProjectedRow<'a> {
        unsafe {
            let size = u32::from_le_bytes(*(head as *const [u8; 4])) as usize;
            ProjectedRow {
                buf: std::slice::from_raw_parts_mut(head, size),
            }
        }
    }

    /// Stamps a row with the same shape (size, column ids, value offsets)
    /// as `other` into `buf` and clears its bitmap.
    ///
    /// The value bytes are left untouched; the cleared bitmap makes them
    /// unreachable until written.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not 8-byte aligned or is smaller than `other`.
    pub fn copy_layout(buf: &'a mut [u8], other: ProjectedRowRef<'_>) -> ProjectedRow<'a> {
        assert_eq!(
            buf.as_ptr() as usize % 8,
            0,
            "projected row buffers must be 8-byte aligned"
        );
        let size = other.size() as usize;
        assert!(buf.len() >= size, "buffer too small for projected row");

        let header_end = bitmap_start(other.num_columns());
        buf[..header_end].copy_from_slice(&other.buf[..header_end]);
        buf[header_end..bitmap_end(other.num_columns())].fill(0);
        ProjectedRow {
            buf: &mut buf[..size],
        }
    }

    /// Returns the total size of this row image in bytes.
    pub fn size(&self) -> u32 {
        buf_size(self.buf)
    }

    /// Returns the number of projected columns.
    pub fn num_columns(&self) -> u16 {
        buf_num_cols(self.buf)
    }

    /// Returns the column id at projection position `i`.
    pub fn col_id(&self, i: u16) -> u16 {
        assert!(i < self.num_columns(), "projection position out of range");
        buf_col_id(self.buf, i)
    }

    /// Returns the projection position of `col_id`, if present.
    pub fn index_of(&self, col_id: u16) -> Option<u16> {
        buf_index_of(self.buf, col_id)
    }

    /// Returns the value bytes at position `i`, or `None` when null.
    ///
    /// The returned slice runs to the end of the row image; only the
    /// column's attribute width is meaningful.
    pub fn access_with_null_check(&self, i: u16) -> Option<&[u8]> {
        self.as_ref().access_with_null_check(i)
    }

    /// Marks position `i` not-null and returns its value bytes for writing.
    pub fn access_force_not_null(&mut self, i: u16) -> &mut [u8] {
        self.set_not_null(i);
        let offset = buf_value_offset(self.buf, i);
        &mut self.buf[offset..]
    }

    /// Sets position `i` null. The value bytes are left untouched.
    pub fn set_null(&mut self, i: u16) {
        assert!(i < self.num_columns(), "projection position out of range");
        self.bitmap_mut().set(i as u32, false);
    }

    /// Sets position `i` not-null without touching the value bytes.
    pub fn set_not_null(&mut self, i: u16) {
        assert!(i < self.num_columns(), "projection position out of range");
        self.bitmap_mut().set(i as u32, true);
    }

    /// Returns a read-only view of this row.
    pub fn as_ref(&self) -> ProjectedRowRef<'_> {
        ProjectedRowRef { buf: self.buf }
    }

    fn bitmap_mut(&mut self) -> &mut RawBitmap {
        let n = self.num_columns();
        RawBitmap::from_slice_mut(&mut self.buf[bitmap_start(n)..bitmap_end(n)])
    }
}

/// A shared, read-only projected row view.
///
/// Used to read deltas out of published undo records and as the source side
/// of copies.
#[derive(Clone, Copy)]
pub struct ProjectedRowRef<'a> {
    buf: &'a [u8],
}

impl<'a> ProjectedRowRef<'a> {
    /// Views an already-stamped row starting at `head`.
    ///
    /// # Safety
    ///
    /// `head` must point to an initialized row image that stays valid and
    /// unmodified (bitmap and values included) for `'a`.
    pub(crate) unsafe fn from_raw(head: *const u8) -> ProjectedRowRef<'a> {
        unsafe {
            let size = u32::from_le_bytes(*(head as *const [u8; 4])) as usize;
            ProjectedRowRef {
                buf: std::slice::from_raw_parts(head, size),
            }
        }
    }

    /// Returns the total size of this row image in bytes.
    pub fn size(&self) -> u32 {
        buf_size(self.buf)
    }

    /// Returns the number of projected columns.
    pub fn num_columns(&self) -> u16 {
        buf_num_cols(self.buf)
    }

    /// Returns the column id at projection position `i`.
    pub fn col_id(&self, i: u16) -> u16 {
        assert!(i < self.num_columns(), "projection position out of range");
        buf_col_id(self.buf, i)
    }

    /// Returns the projection position of `col_id`, if present.
    pub fn index_of(&self, col_id: u16) -> Option<u16> {
        buf_index_of(self.buf, col_id)
    }

    /// Returns the value bytes at position `i`, or `None` when null.
    pub fn access_with_null_check(&self, i: u16) -> Option<&'a [u8]> {
        assert!(i < self.num_columns(), "projection position out of range");
        let n = self.num_columns();
        let bitmap = RawBitmap::from_slice(&self.buf[bitmap_start(n)..bitmap_end(n)]);
        if !bitmap.test(i as u32) {
            return None;
        }
        Some(&self.buf[buf_value_offset(self.buf, i)..])
    }
}

/// A reusable recipe for stamping identically shaped projected rows.
///
/// Precomputes the size, sorted column ids, and value offsets for a given
/// layout and column subset so rows can be initialized into any caller
/// buffer without re-deriving the padding math.
#[derive(Debug, Clone)]
pub struct ProjectedRowInitializer {
    col_ids: Vec<u16>,
    offsets: Vec<u32>,
    size: u32,
}

impl ProjectedRowInitializer {
    /// Creates an initializer for `col_ids` under `layout`.
    ///
    /// The ids are sorted ascending, which under the canonical layout order
    /// is descending attribute size, so values pack with minimal padding.
    ///
    /// # Panics
    ///
    /// Panics if `col_ids` is empty, contains duplicates, names the
    /// presence column, or names a column outside the layout.
    pub fn new(layout: &BlockLayout, mut col_ids: Vec<u16>) -> Self {
        assert!(!col_ids.is_empty(), "cannot initialize an empty projection");
        assert!(
            col_ids.len() < layout.num_cols() as usize,
            "a projection must have fewer columns than the layout"
        );
        col_ids.sort_unstable();
        for pair in col_ids.windows(2) {
            assert!(pair[0] != pair[1], "duplicate column id in projection");
        }
        assert!(
            col_ids[0] > 0,
            "the presence column cannot be projected"
        );
        assert!(
            *col_ids.last().unwrap() < layout.num_cols(),
            "projected column outside the layout"
        );

        let n = col_ids.len();
        // Header: size + num_cols + col_ids, padded so offsets are aligned.
        let mut size = pad_up_to_size(4, (COL_IDS_OFFSET + 2 * n) as u32);
        // Value offsets, padded so the bitmap starts 8-aligned.
        size = pad_up_to_size(8, size + 4 * n as u32);
        // Bitmap, padded up to the first (widest) value.
        size = pad_up_to_size(
            layout.attr_size(col_ids[0]) as u32,
            size + RawBitmap::size_in_bytes(n as u32) as u32,
        );

        let mut offsets = Vec::with_capacity(n);
        for i in 0..n {
            offsets.push(size);
            // Pad up to the next value's size, or to 8 at the end of the row.
            let next_size = if i == n - 1 {
                8
            } else {
                layout.attr_size(col_ids[i + 1]) as u32
            };
            size = pad_up_to_size(next_size, size + layout.attr_size(col_ids[i]) as u32);
        }

        Self {
            col_ids,
            offsets,
            size,
        }
    }

    /// Creates an initializer over every column of `layout` except the
    /// presence column.
    pub fn all_columns(layout: &BlockLayout) -> Self {
        Self::new(layout, (1..layout.num_cols()).collect())
    }

    /// Stamps the precomputed header into `buf`, clears the bitmap, and
    /// returns the typed row.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not 8-byte aligned or smaller than
    /// [`row_size`](Self::row_size).
    pub fn initialize_row<'a>(&self, buf: &'a mut [u8]) -> ProjectedRow<'a> {
        assert_eq!(
            buf.as_ptr() as usize % 8,
            0,
            "projected row buffers must be 8-byte aligned"
        );
        assert!(
            buf.len() >= self.size as usize,
            "buffer too small for projected row"
        );

        let n = self.col_ids.len();
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..6].copy_from_slice(&(n as u16).to_le_bytes());
        for (i, &col_id) in self.col_ids.iter().enumerate() {
            let at = COL_IDS_OFFSET + 2 * i;
            buf[at..at + 2].copy_from_slice(&col_id.to_le_bytes());
        }
        let offsets_at = value_offsets_start(n as u16);
        for (i, &offset) in self.offsets.iter().enumerate() {
            let at = offsets_at + 4 * i;
            buf[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        }
        buf[bitmap_start(n as u16)..bitmap_end(n as u16)].fill(0);

        ProjectedRow {
            buf: &mut buf[..self.size as usize],
        }
    }

    /// Returns the buffer size a row of this shape needs.
    pub fn row_size(&self) -> u32 {
        self.size
    }

    /// Returns the number of projected columns.
    pub fn num_cols(&self) -> u16 {
        self.col_ids.len() as u16
    }

    /// Returns the column id at projection position `i`.
    pub fn col_id(&self, i: u16) -> u16 {
        self.col_ids[i as usize]
    }

    /// Returns the sorted projected column ids.
    pub fn col_ids(&self) -> &[u16] {
        &self.col_ids
    }
}
