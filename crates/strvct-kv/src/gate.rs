//! Per-folder transaction admission.
//!
//! Each folder owns one [`AdmissionGate`]. A native transaction acquires an
//! [`Admission`] when it opens and releases it when dropped, so transactions
//! against one folder never overlap. Waiters are admitted in FIFO order.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// FIFO gate serializing transactions against one folder.
#[derive(Clone, Debug, Default)]
pub struct AdmissionGate {
    lock: Arc<Mutex<()>>,
}

/// Proof of admission. Releases the gate on drop.
#[derive(Debug)]
pub struct Admission {
    _guard: OwnedMutexGuard<()>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the gate.
    pub async fn admit(&self) -> Admission {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        debug!("transaction admitted");
        Admission { _guard: guard }
    }

    /// Take the gate only if it is free right now.
    pub fn try_admit(&self) -> Option<Admission> {
        Arc::clone(&self.lock)
            .try_lock_owned()
            .ok()
            .map(|guard| Admission { _guard: guard })
    }

    /// Returns `true` while some transaction holds the gate.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_admission_waits_for_first() {
        let gate = AdmissionGate::new();
        let first = gate.admit().await;
        assert!(gate.is_busy());
        assert!(gate.try_admit().is_none());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _second = gate.admit().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert!(!gate.is_busy());
    }
}
