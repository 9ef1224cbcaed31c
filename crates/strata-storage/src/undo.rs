//! Undo records and the transaction-local arenas that hold them.
//!
//! An undo record is a version-chain node: a back-pointer to the next-older
//! record, an atomic timestamp, the slot and table it belongs to, and an
//! embedded projected row holding the before-image of the columns its
//! transaction overwrote. Records are built into fixed-size buffer segments
//! owned by the writing transaction and become reachable from the version
//! chain the moment the data table publishes them, so they are never copied
//! or moved afterwards.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::block::TupleSlot;
use crate::projection::{ProjectedRow, ProjectedRowInitializer, ProjectedRowRef};
use crate::table::DataTable;
use strata_common::types::Timestamp;
use strata_pool::{Allocator, ObjectPool, zeroed_box};

/// Size of one undo buffer segment in bytes.
pub const UNDO_SEGMENT_SIZE: usize = 4096;

/// A fixed-size bump arena chunk for undo records.
#[repr(C, align(8))]
pub struct BufferSegment {
    bytes: [u8; UNDO_SEGMENT_SIZE],
    end: u32,
}

impl BufferSegment {
    /// Reserves `size` bytes, or returns `None` when the segment is full.
    fn reserve(&mut self, size: u32) -> Option<NonNull<u8>> {
        debug_assert_eq!(size % 8, 0, "reservations must preserve alignment");
        if self.end as usize + size as usize > UNDO_SEGMENT_SIZE {
            return None;
        }
        let head = unsafe { NonNull::new_unchecked(self.bytes.as_mut_ptr().add(self.end as usize)) };
        self.end += size;
        Some(head)
    }

    /// Rewinds the segment for reuse. Old contents are dead but not wiped.
    fn reset(&mut self) {
        self.end = 0;
    }

    /// Returns the number of bytes reserved so far.
    pub fn len(&self) -> usize {
        self.end as usize
    }

    /// Returns true if nothing has been reserved.
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }
}

/// Allocates zeroed segments and rewinds them on reuse.
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentAllocator;

impl Allocator<BufferSegment> for SegmentAllocator {
    fn allocate(&self) -> Box<BufferSegment> {
        // Safety: an all-zero BufferSegment is a valid empty segment.
        unsafe { zeroed_box() }
    }

    fn reuse(&self, segment: &mut BufferSegment) {
        segment.reset();
    }
}

/// Pool that undo buffer segments are drawn from and returned to.
pub type UndoBufferPool = ObjectPool<BufferSegment, SegmentAllocator>;

/// A transaction's undo arena: a growing chain of pooled segments.
///
/// Reservations never move: segments are boxed, so records stay put while
/// the chain grows. All segments go back to the pool when the buffer drops,
/// which is the transaction's teardown; the engine never frees individual
/// undo records.
pub struct UndoBuffer {
    pool: Arc<UndoBufferPool>,
    segments: Vec<Box<BufferSegment>>,
}

impl UndoBuffer {
    /// Creates an empty undo buffer drawing from `pool`.
    pub fn new(pool: Arc<UndoBufferPool>) -> Self {
        Self {
            pool,
            segments: Vec::new(),
        }
    }

    /// Reserves `size` bytes, 8-aligned, fetching a new segment on demand.
    ///
    /// # Panics
    ///
    /// Panics if `size` exceeds a segment; record sizes are bounded by the
    /// layout, so that is a programming error.
    pub(crate) fn new_entry(&mut self, size: u32) -> NonNull<u8> {
        assert!(
            size as usize <= UNDO_SEGMENT_SIZE,
            "undo record of {size} bytes exceeds the segment size"
        );
        if let Some(segment) = self.segments.last_mut() {
            if let Some(head) = segment.reserve(size) {
                return head;
            }
        }
        let mut segment = self.pool.get();
        match segment.reserve(size) {
            Some(head) => {
                self.segments.push(segment);
                head
            }
            None => unreachable!("a fresh segment fits any checked reservation"),
        }
    }

    /// Returns the number of segments fetched so far.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }
}

impl Drop for UndoBuffer {
    fn drop(&mut self) {
        for segment in self.segments.drain(..) {
            self.pool.release(segment);
        }
    }
}

/// A version-chain node carrying a before-image.
///
/// Laid out as this fixed header immediately followed by the embedded
/// projected row. `next` points at the next-older record in the same slot's
/// chain (null terminates); `timestamp` is the writing transaction's id
/// until commit rewrites it.
#[repr(C)]
pub struct UndoRecord {
    next: AtomicPtr<UndoRecord>,
    timestamp: AtomicU64,
    table: *const DataTable,
    slot: TupleSlot,
}

// Safety: records are shared across threads once published to a version
// chain. The mutable fields are atomics; the embedded row is written only
// before publication.
unsafe impl Send for UndoRecord {}
unsafe impl Sync for UndoRecord {}

impl UndoRecord {
    /// Bytes needed for a record whose before-image is stamped by
    /// `initializer`.
    pub fn size_for_initializer(initializer: &ProjectedRowInitializer) -> u32 {
        size_of::<UndoRecord>() as u32 + initializer.row_size()
    }

    /// Bytes needed for a record whose before-image mirrors `delta`.
    pub fn size_for_delta(delta: ProjectedRowRef<'_>) -> u32 {
        size_of::<UndoRecord>() as u32 + delta.size()
    }

    /// Stamps a record with an initializer-shaped, all-null before-image.
    ///
    /// # Safety
    ///
    /// `head` must be 8-byte aligned and valid for
    /// [`size_for_initializer`](Self::size_for_initializer) bytes for `'a`.
    pub(crate) unsafe fn initialize<'a>(
        head: NonNull<u8>,
        timestamp: Timestamp,
        slot: TupleSlot,
        table: *const DataTable,
        initializer: &ProjectedRowInitializer,
    ) -> &'a mut UndoRecord {
        unsafe {
            let record = Self::stamp_header(head, timestamp, slot, table);
            let row = std::slice::from_raw_parts_mut(
                record.add(1) as *mut u8,
                initializer.row_size() as usize,
            );
            initializer.initialize_row(row);
            &mut *record
        }
    }

    /// Stamps a record whose before-image copies `delta`'s shape.
    ///
    /// # Safety
    ///
    /// `head` must be 8-byte aligned and valid for
    /// [`size_for_delta`](Self::size_for_delta) bytes for `'a`.
    pub(crate) unsafe fn initialize_from_delta<'a>(
        head: NonNull<u8>,
        timestamp: Timestamp,
        slot: TupleSlot,
        table: *const DataTable,
        delta: ProjectedRowRef<'_>,
    ) -> &'a mut UndoRecord {
        unsafe {
            let record = Self::stamp_header(head, timestamp, slot, table);
            let row =
                std::slice::from_raw_parts_mut(record.add(1) as *mut u8, delta.size() as usize);
            ProjectedRow::copy_layout(row, delta);
            &mut *record
        }
    }

    unsafe fn stamp_header(
        head: NonNull<u8>,
        timestamp: Timestamp,
        slot: TupleSlot,
        table: *const DataTable,
    ) -> *mut UndoRecord {
        debug_assert_eq!(head.as_ptr() as usize % 8, 0);
        let record = head.as_ptr() as *mut UndoRecord;
        unsafe {
            (&raw mut (*record).next).write(AtomicPtr::new(std::ptr::null_mut()));
            (&raw mut (*record).timestamp).write(AtomicU64::new(timestamp.value()));
            (&raw mut (*record).table).write(table);
            (&raw mut (*record).slot).write(slot);
        }
        record
    }

    // The embedded row begins right after the header; the header size is a
    // multiple of 8, so the row inherits the record's alignment.

    fn row_ptr(&self) -> *const u8 {
        unsafe { (self as *const UndoRecord).add(1) as *const u8 }
    }

    fn row_ptr_mut(&mut self) -> *mut u8 {
        unsafe { (self as *mut UndoRecord).add(1) as *mut u8 }
    }

    /// Returns the next-older record in the chain, or null at the tail.
    pub fn next(&self) -> *mut UndoRecord {
        self.next.load(Ordering::Acquire)
    }

    /// Points this record at the rest of the chain. Only valid before the
    /// record is published as the chain head.
    pub(crate) fn set_next(&self, next: *mut UndoRecord) {
        self.next.store(next, Ordering::Relaxed);
    }

    /// Returns the record's timestamp cell.
    ///
    /// Holds the writing transaction's id while in flight; commit rewrites
    /// it to the commit timestamp through this cell.
    pub fn timestamp(&self) -> &AtomicU64 {
        &self.timestamp
    }

    /// Returns the slot this record versions.
    pub fn slot(&self) -> TupleSlot {
        self.slot
    }

    /// Returns the table the slot belongs to.
    pub fn table(&self) -> *const DataTable {
        self.table
    }

    /// Returns the embedded before-image.
    pub fn delta(&self) -> ProjectedRowRef<'_> {
        unsafe { ProjectedRowRef::from_raw(self.row_ptr()) }
    }

    /// Returns the embedded before-image for population.
    pub(crate) fn delta_mut(&mut self) -> ProjectedRow<'_> {
        unsafe { ProjectedRow::from_raw(self.row_ptr_mut()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_record_header_size_is_aligned() {
        assert_eq!(size_of::<UndoRecord>() % 8, 0);
    }

    #[test]
    fn test_segment_reserve_and_reset() {
        let mut segment: Box<BufferSegment> = SegmentAllocator.allocate();
        assert!(segment.is_empty());

        let a = segment.reserve(64).unwrap();
        let b = segment.reserve(128).unwrap();
        assert_eq!(segment.len(), 192);
        assert_eq!(
            b.as_ptr() as usize - a.as_ptr() as usize,
            64,
            "reservations must be adjacent"
        );
        assert_eq!(a.as_ptr() as usize % 8, 0);

        // Fill the rest, then overflow.
        assert!(segment.reserve((UNDO_SEGMENT_SIZE - 192) as u32).is_some());
        assert!(segment.reserve(8).is_none());

        segment.reset();
        assert!(segment.is_empty());
        assert!(segment.reserve(8).is_some());
    }

    #[test]
    fn test_undo_buffer_chains_segments() {
        let pool = Arc::new(UndoBufferPool::new(SegmentAllocator, 16));
        let mut buffer = UndoBuffer::new(Arc::clone(&pool));

        let entry_size = (UNDO_SEGMENT_SIZE / 2) as u32;
        let _a = buffer.new_entry(entry_size);
        let _b = buffer.new_entry(entry_size);
        assert_eq!(buffer.num_segments(), 1);

        // The third entry no longer fits in the first segment.
        let _c = buffer.new_entry(entry_size);
        assert_eq!(buffer.num_segments(), 2);
    }

    #[test]
    fn test_undo_buffer_entries_stay_put() {
        let pool = Arc::new(UndoBufferPool::new(SegmentAllocator, 16));
        let mut buffer = UndoBuffer::new(Arc::clone(&pool));

        let first = buffer.new_entry(32);
        unsafe { first.as_ptr().write(0x5A) };
        for _ in 0..1000 {
            let _ = buffer.new_entry(64);
        }
        assert_eq!(unsafe { first.as_ptr().read() }, 0x5A);
    }

    #[test]
    fn test_undo_buffer_returns_segments_to_pool() {
        let pool = Arc::new(UndoBufferPool::new(SegmentAllocator, 16));
        {
            let mut buffer = UndoBuffer::new(Arc::clone(&pool));
            let _ = buffer.new_entry(64);
            let _ = buffer.new_entry(UNDO_SEGMENT_SIZE as u32);
            assert_eq!(buffer.num_segments(), 2);
        }
        assert_eq!(pool.cached(), 2);

        // A new buffer recycles them rewound.
        let mut buffer = UndoBuffer::new(Arc::clone(&pool));
        let _ = buffer.new_entry(8);
        assert_eq!(pool.cached(), 1);
        assert_eq!(buffer.segments.last().unwrap().len(), 8);
    }

    #[test]
    #[should_panic(expected = "exceeds the segment size")]
    fn test_undo_buffer_rejects_oversized_entry() {
        let pool = Arc::new(UndoBufferPool::new(SegmentAllocator, 4));
        let mut buffer = UndoBuffer::new(pool);
        let _ = buffer.new_entry(UNDO_SEGMENT_SIZE as u32 + 8);
    }
}
