//! Generation-based cooperative cancellation.
//!
//! A [`CancelDomain`] holds a generation counter. Starting a new operation
//! bumps the counter and hands out a [`Ticket`] for the new generation;
//! every older ticket becomes stale. Long-running work races its awaits
//! against [`Ticket::cancelled`] and checks [`Ticket::is_current`] before
//! publishing results.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// A family of operations where each new one supersedes the previous.
#[derive(Debug)]
pub struct CancelDomain {
    tx: watch::Sender<u64>,
}

impl Default for CancelDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelDomain {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Invalidate all outstanding tickets and issue one for the new generation.
    pub fn supersede(&self) -> Ticket {
        let mut generation = 0;
        self.tx.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        Ticket {
            generation,
            rx: self.tx.subscribe(),
        }
    }

    /// Invalidate all outstanding tickets.
    pub fn cancel(&self) {
        self.tx.send_modify(|g| *g += 1);
    }

    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }
}

/// Proof of belonging to one generation of a [`CancelDomain`].
#[derive(Debug, Clone)]
pub struct Ticket {
    generation: u64,
    rx: watch::Receiver<u64>,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether no newer generation has started.
    pub fn is_current(&self) -> bool {
        *self.rx.borrow() == self.generation
    }

    /// `Err(Error::Cancelled)` once superseded.
    pub fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(Error::Cancelled)
        }
    }

    /// Resolves once this ticket is superseded or its domain is dropped.
    pub async fn cancelled(&self) {
        let mine = self.generation;
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|g| *g != mine).await;
    }
}
