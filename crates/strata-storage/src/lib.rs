//! Columnar tuple storage engine for StrataDB.
//!
//! This crate provides:
//! - Fixed-size raw blocks recycled through a block store
//! - Block layouts dividing a block into per-column mini-blocks
//! - A tuple access strategy for slot allocation and per-column access
//! - Self-describing projected rows for redos, deltas, and selects
//! - Undo records chained into per-tuple version chains
//! - A data table exposing multi-version insert/update/select
//! - Transaction contexts owning undo buffer arenas

mod access;
mod block;
mod layout;
mod projection;
mod table;
pub mod txn;
mod undo;
pub mod util;

pub use access::{PRESENCE_COLUMN_ID, TupleAccessStrategy};
pub use block::{
    ATTR_OFFSETS_OFFSET, BLOCK_SIZE, BlockAllocator, BlockStore, LAYOUT_VERSION_OFFSET,
    NUM_RECORDS_OFFSET, NUM_SLOTS_OFFSET, RawBlock, TupleSlot,
};
pub use layout::BlockLayout;
pub use projection::{ProjectedRow, ProjectedRowInitializer, ProjectedRowRef};
pub use table::DataTable;
pub use txn::TransactionContext;
pub use undo::{
    BufferSegment, SegmentAllocator, UNDO_SEGMENT_SIZE, UndoBuffer, UndoBufferPool, UndoRecord,
};
