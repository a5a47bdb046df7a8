use std::panic::Location;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use log::{debug, trace};

use crate::dependency_group::DependencyGroup;
use crate::future::TaskFuture;
use crate::task::{Task, TaskFn};

/// Identity handed to a worker thread's entry point. Kept explicit instead of
/// stashing it in a thread-local.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub index: usize,
    pub name: String,
}

#[derive(Default)]
struct Inner {
    /// Unordered: order carries no meaning, the pool scans for any ready task.
    tasks: Vec<Task>,
    /// Bumped under the lock whenever the ready-set may have changed. Condvar
    /// waiters sleep until it moves, which closes the check-then-sleep race.
    generation: u64,
    run: bool,
    /// Threads (workers or helping callers) currently executing a task.
    working: u32,
}

struct Shared {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Shared {
    /// The lock is never held while user closures run, so even a poisoned
    /// mutex still guards consistent state. Recovering instead of propagating
    /// keeps waiters (the parallel helpers' completion guards in particular)
    /// able to wait during an unwind.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Inner>, generation: u64) -> MutexGuard<'a, Inner> {
        self.condvar
            .wait_while(guard, |inner| inner.generation == generation)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fixed-size worker-thread pool executing closures under
/// [`DependencyGroup`] ordering constraints.
///
/// There is no task graph: a task names the groups it waits on and at most
/// one group it signals, and workers pick whichever queued task is currently
/// unblocked. Any thread that blocks in
/// [`process_until_complete`](Self::process_until_complete) drains tasks
/// itself instead of idling, so a task may schedule sub-tasks and wait on
/// them without risking pool exhaustion.
pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// A pool with `max(4, available_parallelism)` workers.
    pub fn with_default_concurrency() -> Self {
        let threads = std::thread::available_parallelism().map_or(4, |n| n.get().max(4));
        Self::new(threads)
    }

    /// Spawns `thread_count` workers. Zero is legal and makes the pool
    /// synchronous: `schedule()` then runs ready tasks inline on the caller.
    pub fn new(thread_count: usize) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                run: true,
                ..Default::default()
            }),
            condvar: Condvar::new(),
        });

        let threads = (0..thread_count)
            .map(|index| {
                let shared = shared.clone();
                let context = WorkerContext {
                    index,
                    name: format!("Worker {index}"),
                };
                std::thread::Builder::new()
                    .name(context.name.clone())
                    .spawn(move || Self::worker(&shared, context))
                    .expect("Spawning a worker thread succeeds")
            })
            .collect();

        debug!("Started worker pool with {thread_count} threads");
        Self { shared, threads }
    }

    /// Number of worker threads.
    pub fn concurrency(&self) -> usize {
        self.threads.len()
    }

    /// True iff no task is queued and none is currently being executed.
    pub fn is_empty(&self) -> bool {
        let inner = self.shared.lock();
        inner.tasks.is_empty() && inner.working == 0
    }

    /// Queued plus in-flight task count.
    pub fn pending_tasks(&self) -> usize {
        let inner = self.shared.lock();
        inner.tasks.len() + inner.working as usize
    }

    /// Enqueues `function` to run once every group in `wait_for` is ready,
    /// bumping `signal` on completion if one is given. Returns immediately
    /// (unless the pool has zero workers, in which case ready tasks run
    /// inline before returning).
    ///
    /// Panics from `function` are not caught; they unwind through whichever
    /// thread executes the task, and the task never bumps its signal group.
    #[track_caller]
    pub fn schedule<F>(&self, function: F, wait_for: &[DependencyGroup], signal: Option<&mut DependencyGroup>)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_boxed(Box::new(function), wait_for, signal, Location::caller());
    }

    /// Like [`schedule`](Self::schedule), additionally returning a one-shot
    /// future for the closure's result.
    #[track_caller]
    pub fn schedule_with_future<F, R>(
        &self,
        function: F,
        wait_for: &[DependencyGroup],
        signal: Option<&mut DependencyGroup>,
    ) -> TaskFuture<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let task = move || {
            // The receiver may be gone already for fire-and-forget callers.
            let _ = sender.send(function());
        };
        self.schedule_boxed(Box::new(task), wait_for, signal, Location::caller());
        TaskFuture::new(receiver)
    }

    fn schedule_boxed(
        &self,
        function: TaskFn,
        wait_for: &[DependencyGroup],
        signal: Option<&mut DependencyGroup>,
        location: &'static Location<'static>,
    ) {
        let mut inner = self.shared.lock();
        assert!(inner.run, "schedule() on a worker pool that is shutting down");

        let signal = signal.map(|group| group.create_signal());
        trace!("Scheduling task from {location}");

        inner.tasks.push(Task::new(function, signal, wait_for, location));
        inner.generation += 1;

        if self.threads.is_empty() {
            // Synchronous pool: nobody else will ever run this. Tasks blocked
            // on groups produced by later schedule() calls stay queued until
            // those calls make them ready.
            loop {
                let (guard, processed) = Self::process_one(&self.shared, inner);
                inner = guard;
                if !processed {
                    break;
                }
            }
        } else {
            // One new task, one worker suffices.
            drop(inner);
            self.shared.condvar.notify_one();
        }
    }

    /// Enqueues a batch of producers for `signal` under a single lock
    /// acquisition, so workers cannot observe the group half-registered:
    /// either the round is still at its previous count or all of `functions`
    /// are accounted for.
    pub(crate) fn schedule_batch(
        &self,
        functions: Vec<TaskFn>,
        signal: &mut DependencyGroup,
        location: &'static Location<'static>,
    ) {
        let mut inner = self.shared.lock();
        assert!(inner.run, "schedule() on a worker pool that is shutting down");
        trace!("Scheduling {} tasks from {location}", functions.len());

        for function in functions {
            let task = Task::new(function, Some(signal.create_signal()), &[], location);
            inner.tasks.push(task);
        }
        inner.generation += 1;

        if self.threads.is_empty() {
            loop {
                let (guard, processed) = Self::process_one(&self.shared, inner);
                inner = guard;
                if !processed {
                    break;
                }
            }
        } else {
            drop(inner);
            self.shared.condvar.notify_all();
        }
    }

    /// Drops every task that has not started yet. Tasks a thread has already
    /// picked up are unaffected. Groups whose producers get cancelled will
    /// never become ready.
    pub fn cancel_pending_tasks(&self) {
        let mut inner = self.shared.lock();
        let dropped = inner.tasks.len();
        inner.tasks.clear();
        inner.generation += 1;
        drop(inner);
        self.shared.condvar.notify_all();

        if dropped > 0 {
            debug!("Cancelled {dropped} pending tasks");
        }
    }

    /// Blocks until every group in `wait_for` is ready, executing queued
    /// tasks on the calling thread while it waits.
    pub fn process_until_complete(&self, wait_for: &[DependencyGroup]) {
        profiling::scope!("process_until_complete");

        let mut inner = self.shared.lock();
        loop {
            if wait_for.iter().all(DependencyGroup::is_ready) {
                return;
            }

            let (guard, processed) = Self::process_one(&self.shared, inner);
            inner = guard;
            if processed {
                continue;
            }

            // Nothing to help with right now. The lock has been held since
            // the failed scan, so the snapshot cannot miss a wakeup.
            let generation = inner.generation;
            inner = self.shared.wait(inner, generation);
        }
    }

    /// Alias for [`process_until_complete`](Self::process_until_complete).
    pub fn wait_for_all(&self, groups: &[DependencyGroup]) {
        self.process_until_complete(groups);
    }

    /// Runs at most one ready task, temporarily releasing the lock around the
    /// closure. Returns the re-acquired guard and whether a task ran. `false`
    /// does not mean the queue is empty: queued tasks may all be blocked on
    /// their dependencies.
    fn process_one<'a>(shared: &'a Shared, mut inner: MutexGuard<'a, Inner>) -> (MutexGuard<'a, Inner>, bool) {
        // Scan instead of popping: dependency order is not submission order
        // and the only unblocked task may sit anywhere in the list.
        let Some(index) = inner.tasks.iter().position(Task::is_ready) else {
            return (inner, false);
        };

        let task = inner.tasks.swap_remove(index);
        inner.working += 1;
        drop(inner);

        trace!("Executing task scheduled at {}", task.location());
        let signal = {
            profiling::scope!("task");
            task.execute()
        };

        let mut inner = shared.lock();
        inner.working -= 1;
        // Wake everyone when the fence became ready (queued tasks and waiters
        // may now be unblocked) or when the pool went quiescent (threads
        // draining during shutdown wait for in-flight work to settle).
        if signal.is_some_and(|signal| signal.notify()) || inner.working == 0 {
            inner.generation += 1;
            shared.condvar.notify_all();
        }

        (inner, true)
    }

    fn worker(shared: &Shared, context: WorkerContext) {
        profiling::register_thread!(context.name.as_str());
        trace!("{} up", context.name);

        let mut inner = shared.lock();
        loop {
            let (guard, processed) = Self::process_one(shared, inner);
            inner = guard;
            if processed {
                continue;
            }

            // Once shutdown starts, leave as soon as the scan comes up empty.
            // Whatever tasks remain can only become ready through a thread
            // finishing one, and that thread keeps scanning afterwards, so a
            // departing worker never strands runnable work. Tasks that stay
            // blocked forever are reported by the pool's Drop instead of
            // keeping the worker alive.
            if !inner.run {
                break;
            }

            let generation = inner.generation;
            inner = shared.wait(inner, generation);
        }

        trace!("{} down", context.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.lock();

            // Drain everything that is or becomes ready before stopping the
            // workers. While other threads still execute tasks their results
            // may unblock more of the queue, so keep helping until the pool is
            // quiescent rather than stopping at the first empty scan.
            loop {
                let (guard, processed) = Self::process_one(&self.shared, inner);
                inner = guard;
                if processed {
                    continue;
                }
                if inner.working == 0 {
                    break;
                }
                let generation = inner.generation;
                inner = self.shared.wait(inner, generation);
            }

            inner.run = false;
            inner.generation += 1;
            self.shared.condvar.notify_all();
        }

        for thread in self.threads.drain(..) {
            thread.join().expect("Worker thread to terminate normally");
        }

        // A non-empty list here means user work would be silently discarded.
        let inner = self.shared.lock();
        assert!(inner.tasks.is_empty(), "Worker pool dropped with unfinished tasks");
        debug!("Worker pool shut down");
    }
}
