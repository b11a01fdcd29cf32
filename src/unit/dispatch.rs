use futures::future::BoxFuture;
use std::sync::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{Level, event};

/// Runs post-commit work (callbacks, subscribers, event flushing).
///
/// Dispatched work never influences the commit result.
pub trait CallbackDispatcher: Send + Sync {
    fn dispatch(&self, job: BoxFuture<'static, ()>);
}

/// Fire-and-forget dispatch onto the current tokio runtime. Outside a
/// runtime the job runs to completion on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnDispatcher;

impl CallbackDispatcher for SpawnDispatcher {
    fn dispatch(&self, job: BoxFuture<'static, ()>) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(job);
            }
            Err(_) => futures::executor::block_on(job),
        }
    }
}

/// Spawning dispatcher that remembers its tasks so callers can wait for
/// every dispatched job deterministically.
#[derive(Debug, Default)]
pub struct TrackingDispatcher {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TrackingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until every job dispatched so far has finished.
    pub async fn wait_idle(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = match self.handles.lock() {
                Ok(mut handles) => handles.drain(..).collect(),
                Err(poisoned) => poisoned.into_inner().drain(..).collect(),
            };
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(err) = handle.await {
                    event!(Level::WARN, error = %err, "dispatched job panicked");
                }
            }
        }
    }
}

impl CallbackDispatcher for TrackingDispatcher {
    fn dispatch(&self, job: BoxFuture<'static, ()>) {
        let handle = tokio::spawn(job);
        match self.handles.lock() {
            Ok(mut handles) => handles.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }
}
