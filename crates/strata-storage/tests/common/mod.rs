//! Shared helpers for the storage integration tests.
//!
//! Each test binary compiles this module separately and uses a different
//! subset of it.
#![allow(dead_code)]

use rand::Rng;
use strata_storage::{BlockLayout, ProjectedRow, util};

/// An 8-aligned byte buffer for stamping projected rows into.
pub struct AlignedBuffer {
    words: Vec<u64>,
}

impl AlignedBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            words: vec![0u64; size.div_ceil(8)],
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.words.len() * 8;
        // A u64 buffer is 8-aligned and any byte pattern is valid.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, len) }
    }
}

/// A random layout: up to `max_cols` columns with sizes from {1, 2, 4, 8},
/// led by the 8-byte presence column.
pub fn random_layout<R: Rng>(max_cols: u16, rng: &mut R) -> BlockLayout {
    let num_cols = rng.random_range(2..=max_cols.max(2));
    let mut sizes = vec![8u8];
    for _ in 1..num_cols {
        sizes.push([1u8, 2, 4, 8][rng.random_range(0..4)]);
    }
    BlockLayout::new(sizes)
}

/// A random non-empty subset of `layout`'s projectable columns.
pub fn random_column_ids<R: Rng>(layout: &BlockLayout, rng: &mut R) -> Vec<u16> {
    let mut ids: Vec<u16> = (1..layout.num_cols())
        .filter(|_| rng.random_bool(0.5))
        .collect();
    if ids.is_empty() {
        ids.push(rng.random_range(1..layout.num_cols()));
    }
    ids
}

/// Fills every position of `row` with a random value, or null with
/// probability `null_bias`.
pub fn populate_random_row<R: Rng>(
    row: &mut ProjectedRow<'_>,
    layout: &BlockLayout,
    null_bias: f64,
    rng: &mut R,
) {
    for i in 0..row.num_columns() {
        if rng.random_bool(null_bias) {
            row.set_null(i);
        } else {
            let size = layout.attr_size(row.col_id(i));
            util::write_bytes(size, rng.random::<u64>(), row.access_force_not_null(i));
        }
    }
}

/// Decodes a row into per-position values (`None` = null), masked to each
/// column's width.
pub fn row_values(layout: &BlockLayout, row: &ProjectedRow<'_>) -> Vec<Option<u64>> {
    (0..row.num_columns())
        .map(|i| {
            let size = layout.attr_size(row.col_id(i));
            row.access_with_null_check(i)
                .map(|bytes| util::read_bytes(size, bytes))
        })
        .collect()
}
