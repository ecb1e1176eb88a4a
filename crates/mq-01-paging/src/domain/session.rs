//! # Send Context
//!
//! A producer session's close signal and wait bound, passed to every send
//! that may suspend. Closing the session wakes all of its suspended sends
//! with `Closed`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a session; closing it cancels suspended sends.
#[derive(Debug)]
pub struct SessionHandle {
    closed: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { closed }
    }

    pub fn context(&self) -> SendContext {
        SendContext {
            closed: self.closed.subscribe(),
            timeout: None,
            _detached: None,
        }
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed view of a session for one send.
///
/// Dropping the [`SessionHandle`] counts as closing it.
#[derive(Debug, Clone)]
pub struct SendContext {
    closed: watch::Receiver<bool>,
    timeout: Option<Duration>,
    _detached: Option<Arc<watch::Sender<bool>>>,
}

impl SendContext {
    /// Context not tied to any session; it never closes.
    pub fn detached() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            closed: rx,
            timeout: None,
            _detached: Some(Arc::new(tx)),
        }
    }

    /// Override the address's block timeout for this send.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err()
    }

    /// Resolves once the session closes.
    pub async fn closed(&self) {
        let mut rx = self.closed.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
