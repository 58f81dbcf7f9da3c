//! One-command-in-flight flow control
//!
//! A pair of counters: `issued` advances when a command is sent, `completed`
//! when its acknowledgment arrives. `completed <= issued <= completed + 1`
//! holds at all times.

use grbllink_core::{ProtocolError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Window-1 acknowledgment gate
#[derive(Debug, Default)]
pub struct AckGate {
    issued: AtomicU64,
    completed: AtomicU64,
    notify: Notify,
}

impl AckGate {
    /// Create a settled gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a command is about to be sent.
    ///
    /// Fails with `CommandOutstanding` while the previous command is
    /// unacknowledged.
    pub fn issue(&self) -> Result<()> {
        let completed = self.completed.load(Ordering::SeqCst);
        self.issued
            .compare_exchange(completed, completed + 1, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|issued| {
                ProtocolError::CommandOutstanding {
                    issued,
                    completed,
                }
                .into()
            })
    }

    /// Record an acknowledgment.
    ///
    /// Returns false (and leaves the counters alone) when nothing is
    /// outstanding; such an acknowledgment is unsolicited.
    pub fn complete(&self) -> bool {
        let issued = self.issued.load(Ordering::SeqCst);
        let advanced = self
            .completed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |completed| {
                (completed < issued).then_some(completed + 1)
            })
            .is_ok();

        if advanced {
            self.notify.notify_one();
        } else {
            tracing::warn!("Unsolicited acknowledgment ignored (issued {})", issued);
        }
        advanced
    }

    /// True when no command is outstanding
    pub fn is_settled(&self) -> bool {
        self.completed.load(Ordering::SeqCst) == self.issued.load(Ordering::SeqCst)
    }

    /// Commands issued so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Acknowledgments observed so far
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Zero both counters.
    pub fn reset(&self) {
        self.completed.store(0, Ordering::SeqCst);
        self.issued.store(0, Ordering::SeqCst);
    }

    /// Wait until the outstanding command is acknowledged.
    ///
    /// Wakes on every acknowledgment and at least every `poll_interval`;
    /// `check` runs between wake-ups and ends the wait early by returning an
    /// error (timeout budget, cancellation, lost connection).
    pub async fn await_completion<F>(&self, poll_interval: Duration, mut check: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        loop {
            // Register interest before testing so a completion in between is not lost.
            let notified = self.notify.notified();
            if self.is_settled() {
                return Ok(());
            }
            check()?;
            let _ = tokio::time::timeout(poll_interval, notified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_issue_requires_settled_gate() {
        let gate = AckGate::new();
        assert!(gate.issue().is_ok());

        let err = gate.issue().unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(gate.issued(), 1);

        assert!(gate.complete());
        assert!(gate.issue().is_ok());
        assert_eq!(gate.issued(), 2);
    }

    #[test]
    fn test_unsolicited_ack_is_ignored() {
        let gate = AckGate::new();
        assert!(!gate.complete());
        assert_eq!(gate.completed(), 0);

        gate.issue().unwrap();
        assert!(gate.complete());
        assert!(!gate.complete());
        assert_eq!(gate.completed(), 1);
    }

    #[test]
    fn test_reset() {
        let gate = AckGate::new();
        gate.issue().unwrap();
        gate.reset();
        assert!(gate.is_settled());
        assert_eq!(gate.issued(), 0);
    }

    #[tokio::test]
    async fn test_await_returns_on_completion() {
        let gate = Arc::new(AckGate::new());
        gate.issue().unwrap();

        let completer = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            completer.complete();
        });

        let result = gate
            .await_completion(Duration::from_millis(500), || Ok(()))
            .await;
        assert!(result.is_ok());
        assert!(gate.is_settled());
    }

    #[tokio::test]
    async fn test_await_stops_when_check_fails() {
        let gate = AckGate::new();
        gate.issue().unwrap();

        let mut polls = 0;
        let result = gate
            .await_completion(Duration::from_millis(5), || {
                polls += 1;
                if polls > 3 {
                    Err(ProtocolError::Cancelled.into())
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(polls, 4);
        assert!(!gate.is_settled());
    }

    proptest! {
        #[test]
        fn prop_counters_stay_within_window(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let gate = AckGate::new();
            for issue in ops {
                let before = (gate.issued(), gate.completed());
                if issue {
                    let result = gate.issue();
                    prop_assert_eq!(result.is_ok(), before.0 == before.1);
                } else {
                    gate.complete();
                }
                let (issued, completed) = (gate.issued(), gate.completed());
                prop_assert!(completed <= issued);
                prop_assert!(issued <= completed + 1);
            }
        }
    }
}
