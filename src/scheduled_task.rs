use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    task::{JoinError, JoinHandle},
    time::Duration,
};

/// Work that runs once at a set instant unless cancelled first.
pub struct ScheduledTask<T> {
    handle: JoinHandle<T>,
    run_at: DateTime<Utc>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Schedule `task` for `run_at`. An instant in the past runs it straight away.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let delay = time_until(run_at);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await
        });
        Self { handle, run_at }
    }

    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task without waiting for it to wind down.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Stop the task. Returns true iff it had already run to completion.
    pub async fn cancel(self) -> bool {
        self.handle.abort();
        self.handle.await.is_ok()
    }
}

/// Awaiting a `ScheduledTask` waits for it to run.
impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

/// Time from now until `instant`, or zero if it has passed.
fn time_until(instant: DateTime<Utc>) -> Duration {
    (instant - Utc::now()).to_std().unwrap_or_default()
}
