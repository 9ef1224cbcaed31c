//! The multi-version data table.
//!
//! A table is a list of blocks interpreted through one access strategy.
//! Writers take a per-tuple write lock by installing an undo record whose
//! timestamp is their (uncommitted) transaction id at the head of the
//! slot's version chain; readers reconstruct the version visible to their
//! start timestamp by walking the chain and undoing every newer record.

use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::Mutex;

use crate::access::{PRESENCE_COLUMN_ID, TupleAccessStrategy};
use crate::block::{BlockStore, RawBlock, TupleSlot};
use crate::layout::BlockLayout;
use crate::projection::{ProjectedRow, ProjectedRowInitializer};
use crate::txn::TransactionContext;
use crate::undo::UndoRecord;
use crate::util;
use strata_common::error::Result;
use strata_common::types::{LayoutVersion, Timestamp};

/// A table of multi-versioned tuples stored in columnar blocks.
///
/// `TupleSlot`s returned by [`insert`](DataTable::insert) are only
/// meaningful while the table is alive, and version chains reference undo
/// records owned by the writing transactions, so transaction contexts must
/// outlive the last reader that might traverse their records.
pub struct DataTable {
    block_store: Arc<BlockStore>,
    accessor: TupleAccessStrategy,
    layout_version: LayoutVersion,
    blocks: Mutex<Vec<Box<RawBlock>>>,
    insert_initializer: ProjectedRowInitializer,
}

impl DataTable {
    /// Creates an empty table. Blocks are acquired from `block_store` on
    /// demand and returned when the table drops.
    pub fn new(
        block_store: Arc<BlockStore>,
        layout: BlockLayout,
        layout_version: LayoutVersion,
    ) -> Self {
        let insert_initializer = ProjectedRowInitializer::all_columns(&layout);
        Self {
            block_store,
            accessor: TupleAccessStrategy::new(layout),
            layout_version,
            blocks: Mutex::new(Vec::new()),
            insert_initializer,
        }
    }

    /// Returns the table's layout.
    pub fn layout(&self) -> &BlockLayout {
        self.accessor.layout()
    }

    /// Returns the number of blocks the table currently owns.
    pub fn num_blocks(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Inserts a tuple and returns its slot.
    ///
    /// The new slot's version chain starts with an undo record carrying an
    /// all-null before-image, so readers older than the insert see no
    /// tuple. Fails only when the block store refuses another block.
    pub fn insert(&self, txn: &mut TransactionContext, redo: &ProjectedRow<'_>) -> Result<TupleSlot> {
        let slot = self.allocate_slot()?;

        let undo_ptr: *mut UndoRecord =
            txn.undo_record_for_insert(self, slot, &self.insert_initializer);
        self.version_cell(slot).store(undo_ptr, Ordering::Release);

        for i in 0..redo.num_columns() {
            // Safety: the slot was just allocated from a live block of this
            // table, and holding the chain head makes us the writer.
            unsafe { util::copy_attr_from_projection(&self.accessor, slot, redo.as_ref(), i) };
        }
        Ok(slot)
    }

    /// Applies `delta` to the tuple at `slot`.
    ///
    /// Returns false without changing the tuple when another transaction's
    /// uncommitted write holds the slot. The undo record reserved for the
    /// attempt stays in the caller's arena either way.
    pub fn update(
        &self,
        txn: &mut TransactionContext,
        slot: TupleSlot,
        delta: &ProjectedRow<'_>,
    ) -> bool {
        let txn_id = txn.txn_id();
        let undo_ptr: *mut UndoRecord = txn.undo_record_for_update(self, slot, delta.as_ref());
        let cell = self.version_cell(slot);

        loop {
            let head = cell.load(Ordering::Acquire);
            if let Some(holder) = self.uncommitted_holder(head) {
                if holder != txn_id {
                    tracing::trace!(%slot, holder = %holder, "write-write conflict");
                    return false;
                }
            }

            // Safety: the record is ours and unpublished until the CAS
            // below succeeds.
            let undo = unsafe { &mut *undo_ptr };

            // Capture the pre-update values for exactly the delta's columns.
            let mut before = undo.delta_mut();
            for i in 0..before.num_columns() {
                let col = before.col_id(i);
                let size = self.accessor.layout().attr_size(col);
                // Safety: the slot belongs to this table; a racing writer
                // would fail the CAS below and send us back around.
                unsafe {
                    let current = self.accessor.access_with_null_check(slot, col);
                    util::copy_with_null_check_into_row(current, &mut before, size, i);
                }
            }

            undo.set_next(head);
            if cell
                .compare_exchange(head, undo_ptr, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            // Lost the head to a racing writer: re-observe, re-check the
            // lock, and re-capture the before-image.
        }

        for i in 0..delta.num_columns() {
            // Safety: our record at the chain head is the write lock.
            unsafe { util::copy_attr_from_projection(&self.accessor, slot, delta.as_ref(), i) };
        }
        true
    }

    /// Materializes the version of `slot` visible at `txn`'s start
    /// timestamp into `out`.
    ///
    /// `out`'s columns end up all-null when the tuple did not exist at that
    /// time (never inserted yet, or inserted by a newer transaction).
    pub fn select(&self, txn: &TransactionContext, slot: TupleSlot, out: &mut ProjectedRow<'_>) {
        let cell = self.version_cell(slot);
        let mut version = cell.load(Ordering::Acquire);

        // Safety: the slot belongs to this live table.
        let block = unsafe { &*slot.block() };
        if version.is_null()
            && !self
                .accessor
                .column_null_bitmap(block, PRESENCE_COLUMN_ID)
                .test(slot.offset())
        {
            // Nothing was ever installed here.
            for i in 0..out.num_columns() {
                out.set_null(i);
            }
            return;
        }

        // Start from the in-place values. These may be mid-overwrite by a
        // concurrent writer, but any such writer's undo record was already
        // at the chain head when we loaded it, so the walk below undoes
        // whatever we caught halfway.
        for i in 0..out.num_columns() {
            unsafe { util::copy_attr_into_projection(&self.accessor, slot, out, i) };
        }

        // Undo every version not visible to this transaction.
        while !version.is_null() {
            let record = unsafe { &*version };
            let timestamp = Timestamp::new(record.timestamp().load(Ordering::Acquire));
            if !timestamp.newer_than(txn.start_time()) {
                break;
            }
            util::apply_delta(self.accessor.layout(), record.delta(), out);
            version = record.next();
        }
    }

    /// Returns the id of the uncommitted transaction holding `head`, if
    /// any.
    fn uncommitted_holder(&self, head: *mut UndoRecord) -> Option<Timestamp> {
        if head.is_null() {
            return None;
        }
        // Safety: published chain heads stay valid while the table and the
        // writing transactions are alive.
        let record = unsafe { &*head };
        let timestamp = Timestamp::new(record.timestamp().load(Ordering::Acquire));
        (!timestamp.is_committed()).then_some(timestamp)
    }

    /// Returns the slot's version-chain head cell, stored in the presence
    /// column's value.
    fn version_cell(&self, slot: TupleSlot) -> &AtomicPtr<UndoRecord> {
        // Safety: the presence column is always 8 bytes, 8-aligned, and
        // considered present for every allocated slot; all access to the
        // cell goes through this atomic view.
        unsafe {
            let ptr = self
                .accessor
                .access_without_null_check(slot, PRESENCE_COLUMN_ID);
            AtomicPtr::from_ptr(ptr.as_ptr() as *mut *mut UndoRecord)
        }
    }

    /// Finds a block with a free slot, growing the table when none has one.
    fn allocate_slot(&self) -> Result<TupleSlot> {
        loop {
            let candidate = {
                let blocks = self.blocks.lock();
                blocks.last().map(|b| &**b as *const RawBlock as *mut RawBlock)
            };
            if let Some(block) = candidate {
                // Safety: blocks are never released while the table lives.
                if let Some(slot) = self.accessor.allocate(unsafe { &*block }) {
                    return Ok(slot);
                }
            }

            let mut blocks = self.blocks.lock();
            let tail = blocks.last().map(|b| &**b as *const RawBlock as *mut RawBlock);
            if tail == candidate {
                let mut block = self.block_store.get()?;
                self.accessor.initialize(&mut block, self.layout_version);
                blocks.push(block);
                tracing::debug!(blocks = blocks.len(), "table grew by a block");
            }
            // Otherwise another thread grew the table first; retry on the
            // new tail.
        }
    }
}

impl Drop for DataTable {
    fn drop(&mut self) {
        for block in self.blocks.get_mut().drain(..) {
            self.block_store.release(block);
        }
    }
}
