//! Awaitable, cancellable job handles.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::foundation::error::{JobError, JobResult};

/// Handle to a job submitted to a worker pool or the main-thread queue.
///
/// Cancellation is cooperative: [`cancel`](Self::cancel) sets the token; a
/// queued job is dropped before it starts, a running job observes the token
/// through the `&CancellationToken` it was handed. Nothing is killed
/// forcibly.
#[derive(Debug)]
pub struct JobHandle<T> {
    token: CancellationToken,
    receiver: oneshot::Receiver<JobResult<T>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(
        token: CancellationToken,
        receiver: oneshot::Receiver<JobResult<T>>,
    ) -> Self {
        Self { token, receiver }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The job's cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Waits for the job to finish.
    pub async fn join(self) -> JobResult<T> {
        self.receiver.await.unwrap_or(Err(JobError::PoolClosed))
    }
}

/// Renders a panic payload into a printable message.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
