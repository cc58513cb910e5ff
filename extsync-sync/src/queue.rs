//! Serialized execution lane for remote mutations.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Runs submitted futures one at a time, in submission order.
///
/// Callers queue rather than being rejected; there is no bound on how many
/// may wait. The lane is a tokio mutex, which grants the lock to waiters in
/// FIFO order.
#[derive(Debug, Default)]
pub struct SerialQueue {
    lane: Mutex<()>,
    pending: AtomicUsize,
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for every earlier task to finish, then runs `task`.
    pub async fn run<F>(&self, task: F) -> F::Output
    where
        F: Future,
    {
        let _pending = PendingGuard::enter(&self.pending);
        let _lane = self.lane.lock().await;
        task.await
    }

    /// Number of tasks running or waiting.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
