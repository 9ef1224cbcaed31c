//! Byte-level helpers shared by the storage engine.
//!
//! Attributes are fixed-width little-endian integers of 1, 2, 4, or 8
//! bytes. Values move between three homes: caller-provided projected rows,
//! column mini-blocks inside shared blocks, and undo record before-images.
//! The four copy helpers below are the only routes between them.

use std::ptr::NonNull;

use crate::access::TupleAccessStrategy;
use crate::block::TupleSlot;
use crate::layout::BlockLayout;
use crate::projection::{ProjectedRow, ProjectedRowRef};

/// Rounds `offset` up to the next multiple of `word_size`.
pub const fn pad_up_to_size(word_size: u32, offset: u32) -> u32 {
    let remainder = offset % word_size;
    if remainder == 0 {
        offset
    } else {
        offset + word_size - remainder
    }
}

/// Writes the low `attr_size` bytes of `val` to the front of `pos`,
/// little-endian. Truncates the value if necessary.
pub fn write_bytes(attr_size: u8, val: u64, pos: &mut [u8]) {
    debug_assert!(matches!(attr_size, 1 | 2 | 4 | 8));
    let n = attr_size as usize;
    pos[..n].copy_from_slice(&val.to_le_bytes()[..n]);
}

/// Reads `attr_size` bytes from the front of `pos` as a little-endian
/// integer, zero-extended to 64 bits.
pub fn read_bytes(attr_size: u8, pos: &[u8]) -> u64 {
    debug_assert!(matches!(attr_size, 1 | 2 | 4 | 8));
    let n = attr_size as usize;
    let mut bytes = [0u8; 8];
    bytes[..n].copy_from_slice(&pos[..n]);
    u64::from_le_bytes(bytes)
}

/// Raw-pointer variant of [`write_bytes`] for attribute cells inside a
/// shared block.
///
/// # Safety
///
/// `pos` must be valid for writes of `attr_size` bytes, and the caller must
/// hold the slot's write lock (its undo record at the version-chain head).
pub unsafe fn write_bytes_raw(attr_size: u8, val: u64, pos: *mut u8) {
    debug_assert!(matches!(attr_size, 1 | 2 | 4 | 8));
    unsafe {
        std::ptr::copy_nonoverlapping(val.to_le_bytes().as_ptr(), pos, attr_size as usize);
    }
}

/// Raw-pointer variant of [`read_bytes`] for attribute cells inside a
/// shared block.
///
/// The read may race an in-place writer and return a torn value; callers
/// recover by consulting the slot's version chain.
///
/// # Safety
///
/// `pos` must be valid for reads of `attr_size` bytes.
pub unsafe fn read_bytes_raw(attr_size: u8, pos: *const u8) -> u64 {
    debug_assert!(matches!(attr_size, 1 | 2 | 4 | 8));
    let mut bytes = [0u8; 8];
    unsafe {
        std::ptr::copy_nonoverlapping(pos, bytes.as_mut_ptr(), attr_size as usize);
    }
    u64::from_le_bytes(bytes)
}

/// Copies `size` bytes from `from` into position `i` of `to`, or sets the
/// position null when `from` is `None`.
///
/// # Safety
///
/// A `Some` pointer must be valid for reads of `size` bytes.
pub unsafe fn copy_with_null_check_into_row(
    from: Option<NonNull<u8>>,
    to: &mut ProjectedRow<'_>,
    size: u8,
    i: u16,
) {
    match from {
        None => to.set_null(i),
        Some(src) => {
            let dst = to.access_force_not_null(i);
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), size as usize);
            }
        }
    }
}

/// Copies an attribute from `from` into column `col` of the tuple at `to`,
/// or sets the column null when `from` is `None`.
///
/// # Safety
///
/// `to` must point into a live block initialized with `accessor`'s layout,
/// a `Some` pointer must be valid for reads of the column's width, and the
/// caller must hold the tuple's write lock.
pub unsafe fn copy_with_null_check_into_slot(
    from: Option<NonNull<u8>>,
    accessor: &TupleAccessStrategy,
    to: TupleSlot,
    col: u16,
) {
    unsafe {
        match from {
            None => accessor.set_null(to, col),
            Some(src) => {
                let dst = accessor.access_force_not_null(to, col);
                std::ptr::copy_nonoverlapping(
                    src.as_ptr(),
                    dst.as_ptr(),
                    accessor.layout().attr_size(col) as usize,
                );
            }
        }
    }
}

/// Copies the attribute at projection position `i` out of the tuple at
/// `from` into `to`, null bit included.
///
/// # Safety
///
/// `from` must point into a live block initialized with `accessor`'s
/// layout.
pub unsafe fn copy_attr_into_projection(
    accessor: &TupleAccessStrategy,
    from: TupleSlot,
    to: &mut ProjectedRow<'_>,
    i: u16,
) {
    let col = to.col_id(i);
    let size = accessor.layout().attr_size(col);
    unsafe {
        let src = accessor.access_with_null_check(from, col);
        copy_with_null_check_into_row(src, to, size, i);
    }
}

/// Copies the attribute at projection position `i` of `from` into the
/// tuple at `to`, null bit included.
///
/// # Safety
///
/// `to` must point into a live block initialized with `accessor`'s layout,
/// and the caller must hold the tuple's write lock.
pub unsafe fn copy_attr_from_projection(
    accessor: &TupleAccessStrategy,
    to: TupleSlot,
    from: ProjectedRowRef<'_>,
    i: u16,
) {
    let col = from.col_id(i);
    unsafe {
        match from.access_with_null_check(i) {
            None => accessor.set_null(to, col),
            Some(src) => {
                let dst = accessor.access_force_not_null(to, col);
                std::ptr::copy_nonoverlapping(
                    src.as_ptr(),
                    dst.as_ptr(),
                    accessor.layout().attr_size(col) as usize,
                );
            }
        }
    }
}

/// Merges `delta` into `target`, whose column set must be a superset of the
/// delta's.
///
/// Columns named by the delta have their value, or lack of one, copied into
/// the matching position of `target`; columns outside the delta keep both
/// their null state and their bytes. Applying the same delta twice is a
/// no-op, and deltas over disjoint columns commute.
pub fn apply_delta(layout: &BlockLayout, delta: ProjectedRowRef<'_>, target: &mut ProjectedRow<'_>) {
    for i in 0..delta.num_columns() {
        let col = delta.col_id(i);
        // Both id lists are sorted ascending, so the match position is a
        // binary search away. Absent columns are skipped.
        let Some(j) = target.index_of(col) else {
            continue;
        };
        match delta.access_with_null_check(i) {
            None => target.set_null(j),
            Some(src) => {
                let size = layout.attr_size(col) as usize;
                let dst = target.access_force_not_null(j);
                dst[..size].copy_from_slice(&src[..size]);
            }
        }
    }
}
