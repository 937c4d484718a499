//! Deadline and cancellation guard for calls to external collaborators

use crate::error::{CragError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run an external call under a deadline, observing query cancellation
///
/// Errors that are not already classified as upstream or cancellation
/// errors are wrapped as an [`CragError::UpstreamFailure`] for `service`.
pub async fn guarded<T, F>(
    service: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(CragError::Cancelled {
            service: service.to_string(),
        });
    }

    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(CragError::Cancelled {
            service: service.to_string(),
        }),

        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if e.is_upstream() || e.is_cancelled() => Err(e),
            Ok(Err(e)) => Err(CragError::upstream(service, e.to_string())),
            Err(_) => {
                tracing::warn!("{} did not answer within {:?}", service, timeout);
                Err(CragError::Timeout {
                    service: service.to_string(),
                    after: timeout,
                })
            }
        },
    }
}
