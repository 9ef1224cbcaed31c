//! Raw memory blocks and the store that recycles them.
//!
//! Block header layout (little-endian, written by
//! [`TupleAccessStrategy::initialize`](crate::TupleAccessStrategy::initialize)):
//!
//! ```text
//! offset 0  : u32 layout_version
//!        4  : u32 num_records        (mutable, relaxed atomic)
//!        8  : u32 num_slots
//!       12  : u32 attr_offsets[num_cols]
//!           : u16 num_attrs
//!           : u8  attr_sizes[num_attrs]
//!  pad to 8 : mini-blocks in attr_offsets[] order
//! ```

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use strata_common::config::StorageConfig;
use strata_common::error::{Result, StrataError};
use strata_common::types::LayoutVersion;
use strata_pool::{Allocator, ObjectPool, zeroed_box};

/// Size of a raw block in bytes (1 MiB).
pub const BLOCK_SIZE: usize = 1 << 20;

/// Byte offset of the layout version in the block header.
pub const LAYOUT_VERSION_OFFSET: usize = 0;
/// Byte offset of the record counter in the block header.
pub const NUM_RECORDS_OFFSET: usize = 4;
/// Byte offset of the slot count in the block header.
pub const NUM_SLOTS_OFFSET: usize = 8;
/// Byte offset of the per-column mini-block offset array.
pub const ATTR_OFFSETS_OFFSET: usize = 12;

/// A fixed-size, 8-byte-aligned slab of memory holding one table's tuples
/// in columnar form.
///
/// A block is dumb storage: all structure (header fields, mini-blocks,
/// bitmaps) is imposed by a [`TupleAccessStrategy`](crate::TupleAccessStrategy)
/// interpreting it through a [`BlockLayout`](crate::BlockLayout). Blocks are
/// zero-initialized on every hand-out from the [`BlockStore`].
#[repr(C, align(8))]
pub struct RawBlock {
    data: UnsafeCell<[u8; BLOCK_SIZE]>,
}

impl std::fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBlock").finish_non_exhaustive()
    }
}

// Safety: a block's bytes are shared mutable state, but every concurrent
// mutation path goes through atomics (presence/null bitmaps, the version
// pointer cell, num_records) or is owned by the slot's write-lock holder.
// Plain readers that race a writer only ever observe torn *values*, which
// the version chain protocol makes recoverable.
unsafe impl Send for RawBlock {}
unsafe impl Sync for RawBlock {}

impl RawBlock {
    /// Returns the base address of the block.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.data.get() as *mut u8
    }

    /// Returns the block contents for exclusive initialization.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        self.data.get_mut()
    }

    /// Returns the layout version written at initialization.
    #[inline]
    pub fn layout_version(&self) -> LayoutVersion {
        LayoutVersion(self.read_u32(LAYOUT_VERSION_OFFSET))
    }

    /// Returns the (approximate, advisory) count of live records.
    #[inline]
    pub fn num_records(&self) -> &AtomicU32 {
        // Safety: offset 4 in an 8-aligned slab is 4-aligned, in bounds,
        // and only ever accessed through this atomic view after
        // initialization.
        unsafe { AtomicU32::from_ptr(self.base().add(NUM_RECORDS_OFFSET) as *mut u32) }
    }

    /// Returns the number of tuple slots this block was divided into.
    #[inline]
    pub fn num_slots(&self) -> u32 {
        self.read_u32(NUM_SLOTS_OFFSET)
    }

    /// Reads a `u32` header field. Meaningful only after initialization.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= BLOCK_SIZE);
        // Safety: in bounds, and header fields other than num_records are
        // immutable once the block is initialized and shared.
        unsafe { (self.base().add(offset) as *const u32).read() }
    }

    /// Reads a `u16` header field. Meaningful only after initialization.
    #[inline]
    pub fn read_u16(&self, offset: usize) -> u16 {
        debug_assert!(offset + 2 <= BLOCK_SIZE);
        unsafe { (self.base().add(offset) as *const u16).read_unaligned() }
    }

    /// Reads a single header byte. Meaningful only after initialization.
    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        debug_assert!(offset < BLOCK_SIZE);
        unsafe { self.base().add(offset).read() }
    }
}

/// Allocates zeroed blocks and re-zeroes them on reuse.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockAllocator;

impl Allocator<RawBlock> for BlockAllocator {
    fn allocate(&self) -> Box<RawBlock> {
        // Safety: an all-zero RawBlock is valid; it is exactly the state
        // the tuple access strategy requires before initialization.
        unsafe { zeroed_box() }
    }

    fn reuse(&self, block: &mut RawBlock) {
        block.bytes_mut().fill(0);
    }
}

/// Hands out zeroed [`RawBlock`]s, recycling released ones.
///
/// Thin wrapper over an [`ObjectPool`] that adds an optional capacity on
/// the number of blocks outstanding at once. Exceeding the capacity is the
/// storage core's out-of-memory analogue.
pub struct BlockStore {
    pool: ObjectPool<RawBlock, BlockAllocator>,
    capacity: Option<usize>,
    outstanding: AtomicUsize,
}

impl BlockStore {
    /// Creates an unbounded block store caching up to `reuse_limit`
    /// released blocks.
    pub fn new(reuse_limit: usize) -> Self {
        Self {
            pool: ObjectPool::new(BlockAllocator, reuse_limit),
            capacity: None,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Creates a block store that refuses to exceed `capacity` outstanding
    /// blocks.
    pub fn with_capacity(reuse_limit: usize, capacity: usize) -> Self {
        Self {
            pool: ObjectPool::new(BlockAllocator, reuse_limit),
            capacity: Some(capacity),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Creates a block store from a validated configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(match config.block_store_capacity {
            Some(capacity) => Self::with_capacity(config.block_store_reuse_limit, capacity),
            None => Self::new(config.block_store_reuse_limit),
        })
    }

    /// Creates a block store budgeted to 25% of available system RAM.
    ///
    /// Minimum 16 blocks so tiny systems still get a usable store.
    pub fn auto_sized() -> Self {
        let mut sys = sysinfo::System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let capacity = (available_bytes / 4 / BLOCK_SIZE).max(16);
        tracing::debug!(capacity, "sized block store from available memory");

        Self::with_capacity(capacity, capacity)
    }

    /// Hands out a zeroed block.
    ///
    /// Returns [`StrataError::OutOfBlocks`] when a capacity is configured
    /// and every block is already outstanding.
    pub fn get(&self) -> Result<Box<RawBlock>> {
        if let Some(capacity) = self.capacity {
            let mut current = self.outstanding.load(Ordering::Relaxed);
            loop {
                if current >= capacity {
                    return Err(StrataError::OutOfBlocks {
                        outstanding: current,
                        capacity,
                    });
                }
                match self.outstanding.compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        } else {
            self.outstanding.fetch_add(1, Ordering::Relaxed);
        }
        Ok(self.pool.get())
    }

    /// Returns a block for reuse. The block's contents are dead after this
    /// call; the store re-zeroes it before the next hand-out.
    pub fn release(&self, block: Box<RawBlock>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.pool.release(block);
    }

    /// Returns the number of blocks currently handed out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Returns the number of released blocks cached for reuse.
    pub fn cached(&self) -> usize {
        self.pool.cached()
    }
}

/// A logical handle to one tuple: a block and a slot index within it.
///
/// Slots are never freed individually; a slot is eligible for reuse once
/// the presence bit of the tuple's presence column is cleared. Equality and
/// hashing are by (block address, offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleSlot {
    block: *mut RawBlock,
    offset: u32,
}

// Safety: a TupleSlot is a plain handle; dereferencing the block pointer is
// the unsafe act and is confined to the access strategy and data table,
// which require the owning table to be alive.
unsafe impl Send for TupleSlot {}
unsafe impl Sync for TupleSlot {}

impl TupleSlot {
    /// Creates a slot handle.
    pub fn new(block: *mut RawBlock, offset: u32) -> Self {
        Self { block, offset }
    }

    /// Returns the block this slot lives in.
    #[inline]
    pub fn block(&self) -> *mut RawBlock {
        self.block
    }

    /// Returns the slot index within the block.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl std::fmt::Display for TupleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:p}:{}", self.block, self.offset)
    }
}
