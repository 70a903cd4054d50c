//! Change-notification publish/subscribe abstraction (mechanics only).
//!
//! The bus is the transport for per-key mutation notifications leaving a
//! regional replica. It makes minimal assumptions:
//!
//! - **Transport-agnostic**: in-memory channels, Redis Streams, etc.
//! - **At-least-once delivery**: a notification may arrive more than once;
//!   consumers must be idempotent.
//! - **Per-key ordering only**: notifications for one key arrive in order,
//!   nothing is promised across keys.
//! - **No persistence**: the replicated store is the source of truth; a lost
//!   notification only delays recomputation.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A subscription to a notification stream.
///
/// Each subscription receives a copy of every published message (broadcast
/// semantics) and is meant to be drained by a single consumer thread.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(event) => process(event)?,
///         Err(RecvTimeoutError::Timeout) => continue,  // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // bus dropped
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Collect up to `max` messages, waiting at most `wait` for the first one.
    ///
    /// Returns an empty batch on timeout and `Err(Disconnected)` once the bus is
    /// gone and nothing is buffered.
    pub fn recv_batch(&self, max: usize, wait: Duration) -> Result<Vec<M>, RecvTimeoutError> {
        let deadline = Instant::now() + wait;
        let mut batch = Vec::new();

        match self.receiver.recv_timeout(wait) {
            Ok(first) => batch.push(first),
            Err(RecvTimeoutError::Timeout) => return Ok(batch),
            Err(RecvTimeoutError::Disconnected) => return Err(RecvTimeoutError::Disconnected),
        }

        while batch.len() < max {
            match self.receiver.try_recv() {
                Ok(next) => batch.push(next),
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        Ok(batch)
    }
}

/// Transport-agnostic notification bus.
///
/// ```text
/// replica applies mutation → bus.publish(ChangeEvent) → subscribers
///                                                         └─ change observer
/// ```
///
/// `publish` may fail (closed transport, network error); the store treats that
/// as a lost notification, not as a failed write.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
