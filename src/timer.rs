//! Cancellable delayed and repeating tasks.

use std::future::Future;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// Holds at most one scheduled task; installing a new one aborts the previous.
#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: Option<AbortHandle>,
}

impl TaskSlot {
    pub fn replace(&mut self, task: JoinHandle<()>) {
        self.cancel();
        self.handle = Some(task.abort_handle());
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs `task` once after `delay`.
pub fn spawn_delayed<F>(delay: Duration, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task.await;
    })
}

/// Runs `tick` after `first_delay`, then again after whatever delay each tick
/// returns, until a tick returns `None`.
pub fn spawn_repeating<F, Fut>(first_delay: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Option<Duration>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut delay = first_delay;
        loop {
            tokio::time::sleep(delay).await;
            match tick().await {
                Some(next) => delay = next,
                None => break,
            }
        }
    })
}
