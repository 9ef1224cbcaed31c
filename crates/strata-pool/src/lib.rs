//! Object pooling for StrataDB.
//!
//! This crate provides:
//! - An [`Allocator`] abstraction that constructs and logically resets
//!   pooled objects
//! - A generic [`ObjectPool`] that recycles fixed-size buffers instead of
//!   returning them to the global allocator

mod alloc;
mod pool;

pub use alloc::{Allocator, DefaultAllocator, zeroed_box};
pub use pool::ObjectPool;
