//! End-to-end data table tests: multi-version reads, write-write
//! conflicts, block growth, and concurrent insertion.

mod common;

use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_common::types::{LayoutVersion, Timestamp};
use strata_storage::{
    BlockLayout, BlockStore, DataTable, ProjectedRowInitializer, SegmentAllocator,
    TransactionContext, TupleSlot, UndoBufferPool, util,
};

/// Drives a table with random rows while tracking every version externally,
/// so selects can be checked against an independently computed reference.
struct TableTestObject {
    table: DataTable,
    redo_init: ProjectedRowInitializer,
    pool: Arc<UndoBufferPool>,
    // Transactions stay alive for the whole test: version chains reference
    // their undo arenas.
    txns: Vec<TransactionContext>,
    versions: HashMap<TupleSlot, Vec<(u64, Vec<Option<u64>>)>>,
    slots: Vec<TupleSlot>,
    null_bias: f64,
}

impl TableTestObject {
    fn new(store: Arc<BlockStore>, layout: BlockLayout, null_bias: f64) -> Self {
        let redo_init = ProjectedRowInitializer::all_columns(&layout);
        Self {
            table: DataTable::new(store, layout, LayoutVersion(0)),
            redo_init,
            pool: Arc::new(UndoBufferPool::new(SegmentAllocator, 10_000)),
            txns: Vec::new(),
            versions: HashMap::new(),
            slots: Vec::new(),
            null_bias,
        }
    }

    fn insert_random<R: Rng>(&mut self, ts: u64, rng: &mut R) -> TupleSlot {
        let mut buf = AlignedBuffer::new(self.redo_init.row_size() as usize);
        let mut redo = self.redo_init.initialize_row(buf.as_bytes_mut());
        populate_random_row(&mut redo, self.table.layout(), self.null_bias, rng);
        let reference = row_values(self.table.layout(), &redo);

        self.txns.push(TransactionContext::new(
            Timestamp::new(ts),
            Timestamp::new(ts),
            Arc::clone(&self.pool),
        ));
        let txn = self.txns.last_mut().unwrap();
        let slot = self.table.insert(txn, &redo).unwrap();

        self.versions.insert(slot, vec![(ts, reference)]);
        self.slots.push(slot);
        slot
    }

    fn update_random<R: Rng>(&mut self, ts: u64, slot: TupleSlot, rng: &mut R) -> bool {
        let col_ids = random_column_ids(self.table.layout(), rng);
        let init = ProjectedRowInitializer::new(self.table.layout(), col_ids);
        let mut buf = AlignedBuffer::new(init.row_size() as usize);
        let mut delta = init.initialize_row(buf.as_bytes_mut());
        populate_random_row(&mut delta, self.table.layout(), self.null_bias, rng);

        self.txns.push(TransactionContext::new(
            Timestamp::new(ts),
            Timestamp::new(ts),
            Arc::clone(&self.pool),
        ));
        let txn = self.txns.last_mut().unwrap();
        let applied = self.table.update(txn, slot, &delta);

        if applied {
            // Maintain the reference append-only, the way the chain would.
            let layout = self.table.layout();
            let mut next = self.versions[&slot].last().unwrap().1.clone();
            for i in 0..delta.num_columns() {
                let col = delta.col_id(i);
                let size = layout.attr_size(col);
                next[(col - 1) as usize] = delta
                    .access_with_null_check(i)
                    .map(|bytes| util::read_bytes(size, bytes));
            }
            self.versions.get_mut(&slot).unwrap().push((ts, next));
        }
        applied
    }

    fn select_at(&mut self, slot: TupleSlot, ts: u64) -> Vec<Option<u64>> {
        self.txns.push(TransactionContext::new(
            Timestamp::new(ts),
            Timestamp::new(ts),
            Arc::clone(&self.pool),
        ));
        let txn = self.txns.last().unwrap();
        let mut buf = AlignedBuffer::new(self.redo_init.row_size() as usize);
        let mut out = self.redo_init.initialize_row(buf.as_bytes_mut());
        self.table.select(txn, slot, &mut out);
        row_values(self.table.layout(), &out)
    }

    /// The newest reference version at or before `ts`, or `None` if the
    /// tuple did not exist yet.
    fn reference_at(&self, slot: TupleSlot, ts: u64) -> Option<&Vec<Option<u64>>> {
        self.versions[&slot]
            .iter()
            .rev()
            .find(|(version_ts, _)| *version_ts <= ts)
            .map(|(_, values)| values)
    }
}

#[test]
fn simple_insert_select() {
    let mut rng = StdRng::seed_from_u64(15721);
    let store = Arc::new(BlockStore::new(16));

    for _ in 0..3 {
        let layout = random_layout(100, &mut rng);
        let null_bias = rng.random::<f64>();
        let mut tested = TableTestObject::new(Arc::clone(&store), layout, null_bias);

        for _ in 0..1000 {
            tested.insert_random(0, &mut rng);
        }
        assert_eq!(tested.slots.len(), 1000);

        for slot in tested.slots.clone() {
            let stored = tested.select_at(slot, 1);
            let reference = tested.reference_at(slot, 1).unwrap();
            assert_eq!(&stored, reference);
        }
    }
}

#[test]
fn simple_version_chain() {
    let mut rng = StdRng::seed_from_u64(721);
    let store = Arc::new(BlockStore::new(16));

    for _ in 0..20 {
        let layout = random_layout(100, &mut rng);
        let null_bias = rng.random::<f64>();
        let mut tested = TableTestObject::new(Arc::clone(&store), layout, null_bias);

        let slot = tested.insert_random(0, &mut rng);
        for ts in 1..=10u64 {
            assert!(tested.update_random(ts, slot, &mut rng));
        }

        // Every timestamp reconstructs the row the deltas up to it produced.
        for ts in 0..=10u64 {
            let stored = tested.select_at(slot, ts);
            let reference = tested.reference_at(slot, ts).unwrap();
            assert_eq!(&stored, reference, "wrong version at ts {ts}");
        }
    }
}

#[test]
fn write_write_conflict_update_fails() {
    let mut rng = StdRng::seed_from_u64(42);
    let store = Arc::new(BlockStore::new(16));

    for _ in 0..20 {
        let layout = random_layout(100, &mut rng);
        let null_bias = rng.random::<f64>();
        let mut tested = TableTestObject::new(Arc::clone(&store), layout, null_bias);

        let slot = tested.insert_random(0, &mut rng);

        // Take the write lock with an uncommitted (sentinel) timestamp.
        assert!(tested.update_random(u64::MAX, slot, &mut rng));
        // A second transaction's write must bounce off.
        assert!(!tested.update_random(1, slot, &mut rng));

        // The lock holder still reads its own uncommitted version.
        let stored = tested.select_at(slot, u64::MAX);
        let reference = tested.reference_at(slot, u64::MAX).unwrap();
        assert_eq!(&stored, reference);
    }
}

#[test]
fn unwritten_slot_reads_all_null() {
    let mut rng = StdRng::seed_from_u64(7);
    let store = Arc::new(BlockStore::new(16));
    let layout = random_layout(20, &mut rng);
    let num_cols = layout.num_cols();
    let mut tested = TableTestObject::new(Arc::clone(&store), layout, 0.2);

    let slot = tested.insert_random(3, &mut rng);
    // Reading from before the insert existed yields an all-null row.
    let stored = tested.select_at(slot, 2);
    assert_eq!(stored, vec![None; (num_cols - 1) as usize]);
}

#[test]
fn insert_grows_into_new_blocks() {
    let mut rng = StdRng::seed_from_u64(512);
    let store = Arc::new(BlockStore::new(4));
    // Wide tuples keep the per-block slot count small.
    let layout = BlockLayout::new(vec![8; 128]);
    let mut tested = TableTestObject::new(Arc::clone(&store), layout, 0.5);

    let slots_per_block = tested.table.layout().num_slots() as usize;
    let inserts = slots_per_block + 10;
    for _ in 0..inserts {
        tested.insert_random(0, &mut rng);
    }

    assert_eq!(tested.table.num_blocks(), 2);
    assert_eq!(store.outstanding(), 2);

    // Rows from both blocks read back correctly.
    for slot in [tested.slots[0], tested.slots[inserts - 1]] {
        let stored = tested.select_at(slot, 1);
        assert_eq!(&stored, tested.reference_at(slot, 1).unwrap());
    }
}

#[test]
fn concurrent_inserts_get_distinct_slots() {
    let store = Arc::new(BlockStore::new(4));
    let layout = BlockLayout::new(vec![8, 8, 4]);
    let table = DataTable::new(Arc::clone(&store), layout, LayoutVersion(0));
    let pool = Arc::new(UndoBufferPool::new(SegmentAllocator, 10_000));

    const THREADS: usize = 8;
    const INSERTS: usize = 250;

    let slots: Vec<Vec<TupleSlot>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let table = &table;
                let pool = Arc::clone(&pool);
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t as u64);
                    let mut txn = TransactionContext::new(
                        Timestamp::new(0),
                        Timestamp::new(0),
                        pool,
                    );
                    let init = ProjectedRowInitializer::all_columns(table.layout());
                    let mut buf = AlignedBuffer::new(init.row_size() as usize);
                    let mut slots = Vec::with_capacity(INSERTS);
                    for _ in 0..INSERTS {
                        let mut redo = init.initialize_row(buf.as_bytes_mut());
                        populate_random_row(&mut redo, table.layout(), 0.2, &mut rng);
                        slots.push(table.insert(&mut txn, &redo).unwrap());
                    }
                    slots
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let all: Vec<TupleSlot> = slots.into_iter().flatten().collect();
    let distinct: HashSet<TupleSlot> = all.iter().copied().collect();
    assert_eq!(all.len(), THREADS * INSERTS);
    assert_eq!(distinct.len(), THREADS * INSERTS);
}
