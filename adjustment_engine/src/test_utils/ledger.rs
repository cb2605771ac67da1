use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
    Mutex,
};

use crate::{
    db_types::LedgerNotification,
    ledger::{LedgerClient, LedgerError},
};

/// An in-memory ledger that records every accepted submission. It can be told to reject submissions, either all of
/// them until further notice, or just the next few.
#[derive(Debug, Clone, Default)]
pub struct RecordingLedger {
    submissions: Arc<Mutex<Vec<LedgerNotification>>>,
    attempts: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
    fail_next: Arc<AtomicUsize>,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted submission, in order.
    pub fn submissions(&self) -> Vec<LedgerNotification> {
        self.submissions.lock().expect("ledger lock poisoned").clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().expect("ledger lock poisoned").len()
    }

    /// Accepted and rejected submissions
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

impl LedgerClient for RecordingLedger {
    async fn submit_adjustment(&self, notification: &LedgerNotification) -> Result<(), LedgerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("ledger is offline".into()));
        }
        let injected = self.fail_next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if injected {
            return Err(LedgerError::Rejected { status: 503, message: "injected failure".into() });
        }
        self.submissions.lock().expect("ledger lock poisoned").push(notification.clone());
        Ok(())
    }
}
