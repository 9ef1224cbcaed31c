//! Generic object pool.

use crate::alloc::Allocator;
use parking_lot::Mutex;

/// A pool that recycles fixed-size objects instead of freeing them.
///
/// Released objects are cached up to `reuse_limit`; anything beyond that is
/// dropped. Cached objects pass through the allocator's
/// [`reuse`](Allocator::reuse) hook before being handed out again, which is
/// the pool's only affordance for buffer hygiene.
///
/// The pool does not track objects it has handed out: an object that is
/// never released is simply dropped by its owner.
pub struct ObjectPool<T, A: Allocator<T>> {
    alloc: A,
    reuse_queue: Mutex<Vec<Box<T>>>,
    reuse_limit: usize,
}

impl<T, A: Allocator<T>> ObjectPool<T, A> {
    /// Creates a pool caching up to `reuse_limit` released objects.
    pub fn new(alloc: A, reuse_limit: usize) -> Self {
        Self {
            alloc,
            reuse_queue: Mutex::new(Vec::new()),
            reuse_limit,
        }
    }

    /// Hands out an object, recycling a released one when available.
    pub fn get(&self) -> Box<T> {
        let cached = self.reuse_queue.lock().pop();
        match cached {
            Some(mut obj) => {
                self.alloc.reuse(&mut obj);
                obj
            }
            None => self.alloc.allocate(),
        }
    }

    /// Returns an object to the pool, allowing it to be reused or freed.
    ///
    /// The object must not be referenced after this call; its memory may be
    /// handed out again at any point.
    pub fn release(&self, obj: Box<T>) {
        let mut queue = self.reuse_queue.lock();
        if queue.len() < self.reuse_limit {
            queue.push(obj);
        }
        // Else: fall through and drop, the cache is full.
    }

    /// Returns the number of objects currently cached for reuse.
    pub fn cached(&self) -> usize {
        self.reuse_queue.lock().len()
    }

    /// Returns the reuse limit.
    pub fn reuse_limit(&self) -> usize {
        self.reuse_limit
    }
}
