//! Deadline enforcement for method invocations.
//!
//! Methods are synchronous, so each invocation runs on tokio's blocking pool.
//! With a non-zero timeout the controller stops waiting when the deadline
//! passes and reports [`RpcError::HandleTimeout`]. The blocking task is not
//! cancelled: it keeps its concurrency permit until the method returns, and
//! its reply is dropped unseen.

use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;

use crate::error::{Result, RpcError};
use crate::service::Invocation;

/// Run `invocation` under `timeout` (zero waits forever).
///
/// `permit` is released when the invocation itself finishes, not when this
/// future resolves.
pub(crate) async fn invoke(
    method: &str,
    invocation: Invocation,
    permit: OwnedSemaphorePermit,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        invocation()
    });

    let joined = if timeout.is_zero() {
        handle.await
    } else {
        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::debug!("{} still running after {:?}, detaching", method, timeout);
                return Err(RpcError::HandleTimeout(timeout));
            }
        }
    };

    joined.map_err(|_| RpcError::MethodPanicked(method.to_string()))?
}
