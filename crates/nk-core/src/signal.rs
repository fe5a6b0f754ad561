//! Interruptor signal
//!
//! Cancellable operations take an `Interruptor`. Once it fires, in-flight work
//! observes it at its next suspension point and returns `Interrupted`.

use std::future::Future;
use thiserror::Error;
pub use tokio_util::sync::CancellationToken as Interruptor;

/// Operation was cancelled through its interruptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation interrupted")]
pub struct Interrupted;

/// Run `fut` until it completes or `interruptor` fires
pub async fn interruptible<F>(fut: F, interruptor: &Interruptor) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = interruptor.cancelled() => Err(Interrupted),
        out = fut => Ok(out),
    }
}

/// Fail fast if `interruptor` already fired
pub fn check(interruptor: &Interruptor) -> Result<(), Interrupted> {
    if interruptor.is_cancelled() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}
