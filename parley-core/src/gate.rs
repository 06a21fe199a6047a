//! One-shot readiness gate shared by every caller of a connection attempt.
//!
//! A [`ReadinessGate`] is created when an attempt begins and is settled exactly
//! once: resolved when the session is established, or rejected on timeout,
//! logout, interruption or cancellation. Any number of [`GateWaiter`]s can be
//! handed out, before or after settlement, and all of them observe the same
//! outcome. A new attempt always gets a new gate.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ConnectError;

type Outcome = Result<(), ConnectError>;

/// Single-settlement synchronization point for one connection attempt.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<Option<Outcome>>,
    timeout: Duration,
    deadline: Instant,
}

impl ReadinessGate {
    /// Create an unsettled gate whose deadline starts now.
    pub fn new(timeout: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    /// When the attempt is abandoned if still unsettled.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether an outcome has been recorded.
    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Hand out a waiter. Waiters created after settlement complete immediately.
    pub fn waiter(&self) -> GateWaiter {
        GateWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Release all waiters successfully. Returns `false` if already settled.
    pub fn resolve(&self) -> bool {
        self.settle(Ok(()))
    }

    /// Release all waiters with `error`. Returns `false` if already settled.
    pub fn reject(&self, error: ConnectError) -> bool {
        self.settle(Err(error))
    }

    /// Reject with [`ConnectError::ConnectTimeout`]. Returns `false` if already settled.
    pub fn expire(&self) -> bool {
        self.reject(ConnectError::ConnectTimeout(self.timeout))
    }

    fn settle(&self, outcome: Outcome) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }
}

/// A caller's view of a [`ReadinessGate`].
#[derive(Debug, Clone)]
pub struct GateWaiter {
    rx: watch::Receiver<Option<Outcome>>,
}

impl GateWaiter {
    /// Suspend until the gate settles.
    ///
    /// If the gate is dropped unsettled the waiter fails with
    /// [`ConnectError::Shutdown`].
    pub async fn wait(mut self) -> Result<(), ConnectError> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone().unwrap_or(Err(ConnectError::Shutdown)),
            Err(_) => Err(ConnectError::Shutdown),
        }
    }
}
