//! Cancellable Scheduled Tasks
//!
//! A deferred event owned by the session. Scheduling replaces any pending
//! task; every schedule gets a fresh token, and the owner only acts on an
//! event whose token is still current. Aborting the sleeper and checking
//! the token together guarantee a superseded task never fires twice or
//! late.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// One pending deferred event.
#[derive(Debug, Default)]
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl ScheduledTask {
    /// No task pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `make(token)` on `tx` after `delay`, replacing any pending
    /// task. Returns the token.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<E, F>(&mut self, delay: Duration, tx: UnboundedSender<E>, make: F) -> u64
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let token = self.generation;

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(make(token));
        }));
        token
    }

    /// Cancel the pending task. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                // Invalidate an event that already left the sleeper
                self.generation += 1;
                true
            }
            None => false,
        }
    }

    /// Accept a fired event. Returns true (and clears the task) only if
    /// `token` belongs to the pending task.
    pub fn complete(&mut self, token: u64) -> bool {
        if self.handle.is_some() && token == self.generation {
            self.handle = None;
            true
        } else {
            false
        }
    }

    /// True while a task is scheduled and not yet completed or cancelled.
    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut task = ScheduledTask::new();

        let token = task.schedule(Duration::from_secs(5), tx, |t| t);
        assert!(task.is_pending());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, token);
        assert!(task.complete(fired));
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut task = ScheduledTask::new();

        task.schedule(Duration::from_secs(5), tx, |t| t);
        assert!(task.cancel());
        assert!(!task.cancel());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_invalidates_old_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut task = ScheduledTask::new();

        let old = task.schedule(Duration::from_secs(1), tx.clone(), |t| t);
        let new = task.schedule(Duration::from_secs(2), tx, |t| t);
        assert_ne!(old, new);
        assert!(!task.complete(old));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, new);
        assert!(task.complete(fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_after_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut task = ScheduledTask::new();

        let token = task.schedule(Duration::from_millis(10), tx, |t| t);
        // Let the event land in the queue, then cancel before handling it
        let fired = rx.recv().await.unwrap();
        task.cancel();

        assert_eq!(fired, token);
        assert!(!task.complete(fired));
    }
}
