//! Convenience fan-out helpers layered on the [`WorkerPool`] scheduler. All
//! of them block until their blocks have run, with the calling thread helping
//! to drain the pool, so the closures may freely borrow from the caller's
//! stack.

use std::cmp::min;
use std::ops::Range;
use std::panic::Location;
use std::sync::Mutex;

use crate::dependency_group::DependencyGroup;
use crate::pool::WorkerPool;
use crate::task::TaskFn;

type BlockFn<'a> = &'a (dyn Fn(usize, Range<usize>) + Send + Sync);

/// Waits for the block tasks even when the caller unwinds, so the borrows
/// they hold can never escape the parent call.
struct CompletionGuard<'a> {
    pool: &'a WorkerPool,
    group: DependencyGroup,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.pool.process_until_complete(std::slice::from_ref(&self.group));
    }
}

impl WorkerPool {
    /// Number of blocks a parallel call over `size` elements is split into.
    /// Fan-out is bounded by a small multiple of the worker count, not by the
    /// input size, to cap scheduling overhead.
    pub fn probable_block_count(&self, size: usize) -> usize {
        min(size, self.concurrency().max(1) * 4).max(2)
    }

    /// Splits `range` into contiguous blocks and runs `function` once per
    /// block with the block index and its sub-range. Blocks until every block
    /// has run. A panicking block never bumps the shared fence, so the call
    /// does not return while sibling blocks may still be using its borrows.
    #[track_caller]
    pub fn parallel_indexed_block_for<F>(&self, range: Range<usize>, function: F)
    where
        F: Fn(usize, Range<usize>) + Send + Sync,
    {
        let size = range.len();
        if size == 0 {
            return;
        }

        let chunk = (size / (self.probable_block_count(size) - 1)).max(1);
        let chunk_count = size.div_ceil(chunk);

        // The tasks borrow `function` from this stack frame. The completion
        // guard waits on the fence before the frame is left, even during
        // unwind, so the erased lifetime never outlives the borrow.
        let function: BlockFn<'static> = unsafe { std::mem::transmute::<BlockFn<'_>, BlockFn<'static>>(&function) };

        let mut done = DependencyGroup::non_empty();
        let guard = CompletionGuard {
            pool: self,
            group: done.clone(),
        };

        // All blocks register on the fence in one atomic batch: with the
        // blocks handed out one schedule() at a time, a fast pool could drain
        // the early ones and trip the fence before the rest are queued.
        let blocks: Vec<TaskFn> = (0..chunk_count)
            .map(|index| {
                let first = range.start + index * chunk;
                let last = min(range.end, first + chunk);
                Box::new(move || function(index, first..last)) as TaskFn
            })
            .collect();
        self.schedule_batch(blocks, &mut done, Location::caller());

        drop(guard);
    }

    /// [`parallel_indexed_block_for`](Self::parallel_indexed_block_for)
    /// without the block index.
    pub fn parallel_block_for<F>(&self, range: Range<usize>, function: F)
    where
        F: Fn(Range<usize>) + Send + Sync,
    {
        self.parallel_indexed_block_for(range, |_, block| function(block));
    }

    /// Runs `function` for every index in `range`, in parallel blocks.
    pub fn parallel_for<F>(&self, range: Range<usize>, function: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        self.parallel_indexed_block_for(range, |_, block| {
            for index in block {
                function(index);
            }
        });
    }

    /// Runs `function` for every element of `items`, in parallel blocks.
    pub fn parallel_for_each<T, F>(&self, items: &[T], function: F)
    where
        T: Sync,
        F: Fn(&T) + Send + Sync,
    {
        self.parallel_indexed_block_for(0..items.len(), |_, block| {
            for item in &items[block] {
                function(item);
            }
        });
    }

    /// Runs `function` once per block and collects the per-block results.
    /// Result order follows block completion, not block index.
    pub fn parallel_block_collect<R, F>(&self, range: Range<usize>, function: F) -> Vec<R>
    where
        R: Send,
        F: Fn(Range<usize>) -> R + Send + Sync,
    {
        let results = Mutex::new(Vec::with_capacity(self.probable_block_count(range.len())));

        self.parallel_indexed_block_for(range, |_, block| {
            let result = function(block);
            results.lock().unwrap().push(result);
        });

        results.into_inner().unwrap()
    }

    /// [`parallel_block_collect`](Self::parallel_block_collect) flattened
    /// into a single vector.
    pub fn parallel_collect<R, F>(&self, range: Range<usize>, function: F) -> Vec<R>
    where
        R: Send,
        F: Fn(Range<usize>) -> Vec<R> + Send + Sync,
    {
        let blocks = self.parallel_block_collect(range, function);

        let total: usize = blocks.iter().map(Vec::len).sum();
        let mut merged = Vec::with_capacity(total);
        for block in blocks {
            merged.extend(block);
        }

        merged
    }
}
