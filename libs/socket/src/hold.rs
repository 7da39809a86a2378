//! Counted requests that the host process stay alive.
//!
//! A tokio runtime exits when `main` returns, whatever connections are still
//! open. Sockets that should keep a service running acquire a [`ProcessHold`]
//! (see [`Socket::retain`](crate::Socket::retain)); `main` awaits
//! [`ProcessHold::released`] before returning.

use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

/// Shared counter of outstanding holds
#[derive(Debug, Clone)]
pub struct ProcessHold {
    holders: Arc<watch::Sender<usize>>,
}

impl ProcessHold {
    /// Independent hold, mostly useful in tests
    pub fn new() -> Self {
        let (holders, _) = watch::channel(0);
        Self {
            holders: Arc::new(holders),
        }
    }

    /// The process-wide hold used by sockets unless configured otherwise
    pub fn global() -> Self {
        static GLOBAL: OnceLock<ProcessHold> = OnceLock::new();
        GLOBAL.get_or_init(ProcessHold::new).clone()
    }

    pub fn acquire(&self) {
        self.holders.send_modify(|count| *count += 1);
    }

    /// Drop one hold; extra releases are ignored
    pub fn release(&self) {
        self.holders.send_modify(|count| *count = count.saturating_sub(1));
    }

    pub fn holders(&self) -> usize {
        *self.holders.borrow()
    }

    pub fn is_held(&self) -> bool {
        self.holders() > 0
    }

    /// Wait until no holds remain
    pub async fn released(&self) {
        let mut rx = self.holders.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ProcessHold {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counts_holders() {
        let hold = ProcessHold::new();
        assert!(!hold.is_held());

        hold.acquire();
        hold.acquire();
        assert_eq!(hold.holders(), 2);

        hold.release();
        assert!(hold.is_held());
        hold.release();
        assert!(!hold.is_held());

        hold.release();
        assert_eq!(hold.holders(), 0);
    }

    #[test]
    fn global_hold_is_shared() {
        let a = ProcessHold::global();
        let b = ProcessHold::global();
        assert!(Arc::ptr_eq(&a.holders, &b.holders));
    }

    #[tokio::test]
    async fn released_waits_for_last_holder() {
        let hold = ProcessHold::new();
        hold.acquire();

        let waiter = {
            let hold = hold.clone();
            tokio::spawn(async move { hold.released().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        hold.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("released() should resolve")
            .unwrap();
    }
}
