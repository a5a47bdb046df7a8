use std::panic::Location;
use std::sync::Arc;

use crate::dependency_group::{Counters, DependencyGroup};

pub(crate) type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A queued unit of work: the closure, the group it signals on completion and
/// the groups that must be ready before it may start. Immutable once built;
/// only the shared counters it bumps are mutated afterwards.
pub(crate) struct Task {
    function: TaskFn,
    signal: Option<Arc<Counters>>,
    wait_for: Vec<DependencyGroup>,
    /// Call site of the `schedule()` that created this task.
    location: &'static Location<'static>,
}

impl Task {
    pub(crate) fn new(
        function: TaskFn,
        signal: Option<Arc<Counters>>,
        wait_for: &[DependencyGroup],
        location: &'static Location<'static>,
    ) -> Self {
        // Already-ready groups can never block this task, don't retain them.
        let wait_for = wait_for.iter().filter(|group| !group.is_ready()).cloned().collect();

        Self {
            function,
            signal,
            wait_for,
            location,
        }
    }

    /// Eligible to run. Only meaningful while the pool lock is held.
    pub(crate) fn is_ready(&self) -> bool {
        self.wait_for.iter().all(DependencyGroup::is_ready)
    }

    pub(crate) fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Runs the closure and hands back the counters to notify, if any.
    pub(crate) fn execute(self) -> Option<Arc<Counters>> {
        (self.function)();
        self.signal
    }
}
