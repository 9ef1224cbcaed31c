//! Transaction contexts.
//!
//! The storage core does not schedule or commit transactions; it only needs
//! the state a transaction carries while running: its start timestamp, its
//! id (which doubles as the uncommitted-write sentinel), and the arena its
//! undo records are built into.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::block::TupleSlot;
use crate::projection::{ProjectedRowInitializer, ProjectedRowRef};
use crate::table::DataTable;
use crate::undo::{UndoBuffer, UndoBufferPool, UndoRecord};
use strata_common::types::Timestamp;

/// Per-transaction state threaded through the data table operations.
///
/// Undo records reserved here become reachable from version chains the
/// moment the table publishes them. The context must therefore outlive
/// every table it has written to; reclaiming records while a reader might
/// still traverse them is the transaction manager's job, not this layer's.
pub struct TransactionContext {
    start_time: Timestamp,
    txn_id: AtomicU64,
    undo_buffer: UndoBuffer,
}

impl TransactionContext {
    /// Creates a context.
    ///
    /// `txn_id` should be larger than every committed timestamp (high bit
    /// set) so that other transactions treat this one's writes as
    /// uncommitted.
    pub fn new(start_time: Timestamp, txn_id: Timestamp, pool: Arc<UndoBufferPool>) -> Self {
        Self {
            start_time,
            txn_id: AtomicU64::new(txn_id.value()),
            undo_buffer: UndoBuffer::new(pool),
        }
    }

    /// Returns the transaction's start (read) timestamp.
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Returns the transaction's current id.
    pub fn txn_id(&self) -> Timestamp {
        Timestamp::new(self.txn_id.load(Ordering::Acquire))
    }

    /// Returns the id cell, which commit rewrites to the commit timestamp.
    pub fn txn_id_cell(&self) -> &AtomicU64 {
        &self.txn_id
    }

    /// Reserves an undo record whose before-image mirrors `delta`'s
    /// projection, stamped with this transaction's id.
    ///
    /// The before-image starts all-null; the table fills it with the
    /// current in-place values before publishing.
    pub fn undo_record_for_update(
        &mut self,
        table: &DataTable,
        slot: TupleSlot,
        delta: ProjectedRowRef<'_>,
    ) -> &mut UndoRecord {
        let timestamp = self.txn_id();
        let head = self.undo_buffer.new_entry(UndoRecord::size_for_delta(delta));
        // Safety: the reservation is 8-aligned and exactly the record's size.
        unsafe { UndoRecord::initialize_from_delta(head, timestamp, slot, table, delta) }
    }

    /// Reserves an undo record for an insert: an all-columns before-image
    /// that stays all-null, so undoing past it erases the tuple.
    pub fn undo_record_for_insert(
        &mut self,
        table: &DataTable,
        slot: TupleSlot,
        initializer: &ProjectedRowInitializer,
    ) -> &mut UndoRecord {
        let timestamp = self.txn_id();
        let head = self
            .undo_buffer
            .new_entry(UndoRecord::size_for_initializer(initializer));
        // Safety: the reservation is 8-aligned and exactly the record's size.
        unsafe { UndoRecord::initialize(head, timestamp, slot, table, initializer) }
    }

    /// Returns the number of undo segments this transaction has filled.
    pub fn undo_segments(&self) -> usize {
        self.undo_buffer.num_segments()
    }
}
