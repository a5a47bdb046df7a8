use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared completion counters behind a [`DependencyGroup`].
///
/// The atomics are the interior-mutability vehicle only: every mutation
/// happens while the owning pool's mutex is held, so Relaxed ordering is
/// sufficient and there is no per-group lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    counter: AtomicU32,
    max: AtomicU32,
}

impl Counters {
    fn is_ready(&self) -> bool {
        self.counter.load(Ordering::Relaxed) == self.max.load(Ordering::Relaxed)
    }

    /// Records the completion of one producer. Returns true iff this was the
    /// last one, i.e. the group just became ready.
    pub(crate) fn notify(&self) -> bool {
        let completed = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let max = self.max.load(Ordering::Relaxed);
        debug_assert!(completed <= max, "More producers completed than were registered");
        completed == max
    }
}

/// A resettable many-producers-into-one-barrier fence.
///
/// Every task scheduled with this group as its signal registers as one
/// producer; the group reports ready once all registered producers have
/// finished. Handles are cheap to clone and share the same underlying
/// counters, which are allocated lazily on the first registration. A group
/// nothing has ever been registered on is always ready.
///
/// After a round has completed the same group can be recycled with
/// [`reset`](Self::reset), which is what lets frame code keep one fence per
/// stage instead of allocating fresh synchronization every frame.
#[derive(Clone, Debug, Default)]
pub struct DependencyGroup {
    counters: Option<Arc<Counters>>,
}

impl DependencyGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// A group with its shared state allocated up front.
    ///
    /// Clones of an unallocated group do not observe a later lazy allocation,
    /// so use this when handles are passed around before the first producer
    /// registers.
    pub fn non_empty() -> Self {
        Self {
            counters: Some(Arc::new(Counters::default())),
        }
    }

    /// True iff no shared state has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.counters.is_none()
    }

    /// True iff every registered producer has completed, or nothing has ever
    /// been registered. Once ready, a group stays ready until
    /// [`reset`](Self::reset).
    pub fn is_ready(&self) -> bool {
        self.counters.as_ref().is_none_or(|counters| counters.is_ready())
    }

    /// Registers one more producer and returns the counters that producer
    /// bumps on completion. Called by the pool with its lock held.
    ///
    /// Registration may race completion: earlier producers of the round can
    /// finish while later ones are still being scheduled, and the group then
    /// simply tracks all producers registered so far. The misuse check for
    /// recycling lives in [`reset`](Self::reset).
    pub(crate) fn create_signal(&mut self) -> Arc<Counters> {
        let counters = self.counters.get_or_insert_with(Arc::default);
        counters.max.fetch_add(1, Ordering::Relaxed);
        counters.clone()
    }

    /// Recycles the group for the next scheduling round.
    ///
    /// Only legal once the group is ready; resetting while producers are
    /// still pending is a usage error.
    pub fn reset(&mut self) {
        assert!(self.is_ready(), "reset() on a dependency group that is not ready");
        if let Some(counters) = &self.counters {
            counters.counter.store(0, Ordering::Relaxed);
            counters.max.store(0, Ordering::Relaxed);
        }
    }
}
