use std::sync::mpsc::{Receiver, TryRecvError};

/// One-shot result channel returned by
/// [`WorkerPool::schedule_with_future`](crate::WorkerPool::schedule_with_future).
///
/// Unlike a [`DependencyGroup`](crate::DependencyGroup) this is strictly
/// single-producer, single-consumer: it carries one task's return value and
/// nothing else.
pub struct TaskFuture<R> {
    receiver: Receiver<R>,
}

impl<R> TaskFuture<R> {
    pub(crate) fn new(receiver: Receiver<R>) -> Self {
        Self { receiver }
    }

    /// Blocks until the task has run and returns its result.
    ///
    /// Panics if the task was cancelled before it could run. Note that this
    /// wait does not help drain the pool; waiting on a future from inside a
    /// task can deadlock a fully busy pool, prefer dependency groups there.
    pub fn wait(self) -> R {
        self.receiver
            .recv()
            .expect("Task to complete before its future resolves")
    }

    /// Non-blocking check: the result if the task has finished, otherwise the
    /// future handed back for a later attempt.
    ///
    /// Panics if the task was cancelled before it could run.
    pub fn try_get(self) -> Result<R, Self> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(value),
            Err(TryRecvError::Empty) => Err(self),
            Err(TryRecvError::Disconnected) => panic!("Task was cancelled before its future resolved"),
        }
    }
}
