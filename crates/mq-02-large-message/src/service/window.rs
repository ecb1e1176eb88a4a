//! # Confirmation Window
//!
//! Bounds the chunk bytes a producer has sent but the broker has not yet
//! confirmed. Independent of normal message flow control: a producer that
//! runs out of credit suspends in [`CreditWindow::acquire`] until
//! [`CreditWindow::confirm`] returns some.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::domain::errors::{LargeMessageError, LargeMessageResult};

#[derive(Debug)]
struct WindowInner {
    size: usize,
    permits: Semaphore,
    in_flight: AtomicUsize,
}

/// Cloneable handle; the producer acquires, the transport confirms.
#[derive(Debug, Clone)]
pub struct CreditWindow {
    inner: Arc<WindowInner>,
}

impl CreditWindow {
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(WindowInner {
                size,
                permits: Semaphore::new(size),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Credit left before a send would suspend.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Bytes sent and not yet confirmed.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Take `bytes` of credit, suspending until enough is confirmed.
    ///
    /// Requests larger than the window are capped at the window size so they
    /// can still proceed once everything else is confirmed.
    pub async fn acquire(&self, bytes: usize) -> LargeMessageResult<usize> {
        let wanted = bytes.min(self.inner.size);
        if wanted == 0 {
            return Ok(0);
        }
        let permits = u32::try_from(wanted).unwrap_or(u32::MAX);
        self.inner
            .permits
            .acquire_many(permits)
            .await
            .map_err(|_| LargeMessageError::WindowClosed)?
            .forget();
        self.inner
            .in_flight
            .fetch_add(permits as usize, Ordering::AcqRel);
        Ok(permits as usize)
    }

    /// Return credit for `bytes` the broker has taken. Confirming more than
    /// is in flight releases only what is in flight.
    pub fn confirm(&self, bytes: usize) {
        let released = self
            .inner
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current - bytes.min(current))
            })
            .map(|previous| bytes.min(previous))
            .unwrap_or(0);
        if released > 0 {
            self.inner.permits.add_permits(released);
        }
    }

    /// Wake every waiter with `WindowClosed`; later acquires fail the same way.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }
}
