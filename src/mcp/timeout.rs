//! Timeout guard for delegated operations.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use super::error::RequestError;

/// Run `future` for at most `timeout_ms`.
///
/// On timeout the future is dropped, so whatever it would have produced later
/// is never observed. A panic inside the future becomes
/// [`RequestError::Panicked`].
pub async fn with_timeout<F, T, E>(
    future: F,
    timeout_ms: u64,
    operation: &str,
) -> Result<T, RequestError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<RequestError>,
{
    let guarded = AssertUnwindSafe(future).catch_unwind();
    match tokio::time::timeout(Duration::from_millis(timeout_ms), guarded).await {
        Ok(Ok(result)) => result.map_err(Into::into),
        Ok(Err(payload)) => Err(RequestError::Panicked(panic_message(payload.as_ref()))),
        Err(_) => Err(RequestError::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        }),
    }
}

/// Message carried by a panic payload, or `Unknown error`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown error".to_string()
    }
}
