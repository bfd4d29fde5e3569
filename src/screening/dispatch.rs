//! Bounded FIFO dispatcher for units of LLM work.
//!
//! At most `max_concurrent` units run at once. Excess units wait in a FIFO
//! queue; after any unit finishes the dispatcher waits a fixed delay before
//! starting more, which spaces out calls against provider rate limits.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

/// Default pause after each completed unit.
pub const DEFAULT_DISPATCH_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatched unit panicked")]
    Panicked,
    #[error("dispatched unit was dropped before completing")]
    Dropped,
}

type Job = BoxFuture<'static, ()>;

struct State {
    running: usize,
    queue: VecDeque<Job>,
}

struct Inner {
    max_concurrent: usize,
    delay: Duration,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Jobs never run under the lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn drain(self: &Arc<Self>) {
        let mut ready = Vec::new();
        {
            let mut state = self.lock();
            while state.running < self.max_concurrent {
                let Some(job) = state.queue.pop_front() else {
                    break;
                };
                state.running += 1;
                ready.push(job);
            }
        }

        for job in ready {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                job.await;
                inner.finish().await;
            });
        }
    }

    async fn finish(self: Arc<Self>) {
        {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
        }
        tokio::time::sleep(self.delay).await;
        self.drain();
    }
}

/// Concurrency-bounded work queue. Cheap to clone; clones share one queue.
///
/// Units are spawned onto the ambient tokio runtime, so `execute` must be
/// called from within one.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("delay", &self.inner.delay)
            .field("running", &self.running())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Dispatcher {
    /// `max_concurrent` of zero is treated as one.
    pub fn new(max_concurrent: usize, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrent: max_concurrent.max(1),
                delay,
                state: Mutex::new(State {
                    running: 0,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Units currently running.
    pub fn running(&self) -> usize {
        self.inner.lock().running
    }

    /// Units waiting for a free slot.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Submit a unit of work.
    ///
    /// The unit is queued immediately, before the returned future is polled,
    /// so submission order is start order. The returned future resolves with
    /// the unit's own output once it has run.
    pub fn execute<F, T>(&self, unit: F) -> impl Future<Output = Result<T, DispatchError>> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = async move {
            let outcome = AssertUnwindSafe(unit).catch_unwind().await;
            let _ = tx.send(outcome.map_err(|_| DispatchError::Panicked));
        }
        .boxed();

        self.inner.lock().queue.push_back(job);
        self.inner.drain();

        async move { rx.await.unwrap_or(Err(DispatchError::Dropped)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn starts_units_in_submission_order() {
        let dispatcher = Dispatcher::new(1, Duration::from_millis(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let futs: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                dispatcher.execute(async move {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    i * 10
                })
            })
            .collect();

        let outputs: Vec<_> = futures::future::join_all(futs).await;
        let outputs: Vec<_> = outputs.into_iter().map(Result::unwrap).collect();
        assert_eq!(outputs, vec![0, 10, 20, 30, 40]);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn panicking_unit_reports_error_and_frees_slot() {
        let dispatcher = Dispatcher::new(1, Duration::from_millis(1));
        let bad = dispatcher.execute(async {
            panic!("boom");
        });
        let good = dispatcher.execute(async { 7u32 });

        assert_eq!(bad.await, Err::<(), _>(DispatchError::Panicked));
        assert_eq!(good.await, Ok(7));
    }

    #[tokio::test]
    async fn queue_drains_to_empty() {
        let dispatcher = Dispatcher::new(2, Duration::from_millis(1));
        let done = Arc::new(AtomicUsize::new(0));
        let futs: Vec<_> = (0..4)
            .map(|_| {
                let done = Arc::clone(&done);
                dispatcher.execute(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        assert_eq!(dispatcher.queued(), 2);

        futures::future::join_all(futs).await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(dispatcher.queued(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(Dispatcher::new(0, DEFAULT_DISPATCH_DELAY).max_concurrent(), 1);
    }
}
