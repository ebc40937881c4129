//! Process-wide shutdown signal.
//!
//! The binary owns a `watch::Sender<bool>` and flips it to `true` once on
//! shutdown. Every long wait in the relay (rate-limit windows, retry delays,
//! sweep timers) races against a receiver so the process exits promptly.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::AppError;
use crate::result::AppResult;

/// Receiving half of the shutdown signal.
pub type ShutdownReceiver = watch::Receiver<bool>;

/// Create a new shutdown channel in the "running" state.
pub fn channel() -> (watch::Sender<bool>, ShutdownReceiver) {
    watch::channel(false)
}

/// Resolve once shutdown has been signalled.
///
/// If the sender is dropped without signalling, this never resolves.
pub async fn signalled(mut rx: ShutdownReceiver) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `duration` unless shutdown is signalled first.
pub async fn sleep(duration: Duration, rx: Option<&ShutdownReceiver>) -> AppResult<()> {
    match rx {
        Some(rx) => {
            if *rx.borrow() {
                return Err(AppError::cancelled("Shutdown in progress"));
            }
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = signalled(rx.clone()) => Err(AppError::cancelled("Shutdown in progress")),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_signal() {
        let (_tx, rx) = channel();
        assert!(sleep(Duration::from_secs(5), Some(&rx)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_cancelled_by_signal() {
        let (tx, rx) = channel();
        let waiter = tokio::spawn(async move { sleep(Duration::from_secs(3600), Some(&rx)).await });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_sleep_rejects_when_already_signalled() {
        let (tx, rx) = channel();
        tx.send(true).unwrap();
        let err = sleep(Duration::from_millis(1), Some(&rx)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
