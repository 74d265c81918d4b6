//! HiLo block allocation.

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use crate::value_generation::ValueGenerator;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Supplies the start of each new block of values, typically by reading the
/// next value of a database sequence.
pub trait BlockSource: Send + Sync {
    /// Returns the first value of a fresh block.
    fn next_block_start(&self) -> CoreResult<i64>;
}

#[derive(Debug)]
struct Block {
    next: AtomicI64,
    high: i64,
}

impl Block {
    fn exhausted() -> Self {
        Self {
            next: AtomicI64::new(0),
            high: 0,
        }
    }

    /// Claims one value from the block, or `None` once it is used up.
    fn claim(&self) -> Option<i64> {
        let mut current = self.next.load(Ordering::Acquire);
        loop {
            if current >= self.high {
                return None;
            }
            match self.next.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(current),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Generates integer keys from blocks of `block_size` values.
///
/// Values are claimed with a compare-and-swap on the current block; the fetch
/// lock is taken only when the block is used up and a new one is needed.
pub struct HiLoValueGenerator<S> {
    source: S,
    block_size: i64,
    block: RwLock<Arc<Block>>,
    fetch_lock: Mutex<()>,
}

impl<S: BlockSource> HiLoValueGenerator<S> {
    /// Creates a generator; `block_size` must be positive.
    pub fn new(source: S, block_size: i64) -> CoreResult<Self> {
        if block_size <= 0 {
            return Err(CoreError::invalid_argument(format!(
                "block size must be positive, got {block_size}"
            )));
        }
        Ok(Self {
            source,
            block_size,
            block: RwLock::new(Arc::new(Block::exhausted())),
            fetch_lock: Mutex::new(()),
        })
    }

    /// Returns the configured block size.
    pub fn block_size(&self) -> i64 {
        self.block_size
    }

    /// Returns the next key.
    pub fn next(&self) -> CoreResult<i64> {
        loop {
            let block = self.block.read().clone();
            if let Some(value) = block.claim() {
                return Ok(value);
            }

            let _guard = self.fetch_lock.lock();
            // Another caller may have installed a block while we waited.
            if !Arc::ptr_eq(&block, &self.block.read()) {
                continue;
            }
            let low = self.source.next_block_start()?;
            tracing::debug!(low, block_size = self.block_size, "fetched hi-lo block");
            *self.block.write() = Arc::new(Block {
                next: AtomicI64::new(low),
                high: low + self.block_size,
            });
        }
    }
}

impl<S: BlockSource> ValueGenerator for HiLoValueGenerator<S> {
    fn next_value(&self) -> CoreResult<Value> {
        self.next().map(Value::Integer)
    }
}

impl<S> fmt::Debug for HiLoValueGenerator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HiLoValueGenerator")
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}
