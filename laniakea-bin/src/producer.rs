use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A background task feeding a frame stream, stoppable from outside.
pub struct Producer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Producer {
    /// Spawn `task` with a fresh cancellation token it should watch.
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        Self { cancel, handle }
    }

    /// False once the task has returned on its own, e.g. because the reader
    /// went away.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "producer task failed");
        }
    }
}
