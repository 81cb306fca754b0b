//! Job cancellation.
//!
//! The scheduler cancels a job by sending SIGTERM to the filter. The signal
//! listener only raises a flag; the reaper is the one that acts on it, by
//! forwarding SIGTERM to every stage still running and then clearing the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Shared "job canceled" flag with async wake-up.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.cancelled.swap(false, Ordering::SeqCst)
    }

    /// Resolve once the flag is set.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // register before checking so a cancel between check and await is
        // not lost
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Cancel `token` whenever the process receives SIGTERM.
///
/// Must be called from within a tokio runtime. The listener runs until the
/// returned task is aborted.
pub fn listen_for_termination(token: CancelToken) -> std::io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(tokio::spawn(async move {
        while sigterm.recv().await.is_some() {
            debug!("Caught SIGTERM, canceling job");
            token.cancel();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn take_clears_the_flag() {
        let token = CancelToken::new();
        assert!(!token.take());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.take());
        assert!(!token.is_cancelled());
        assert!(!token.take());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_set() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("should resolve");
    }

    #[tokio::test]
    async fn cancelled_wakes_on_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }
}
