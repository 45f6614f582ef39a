//! Event publishing/subscription abstraction (mechanics only).
//!
//! A lightweight pub/sub contract for distributing committed events to
//! consumers (projections, workers). The bus is for distribution, not
//! storage: events live in the event store first, then get published here,
//! so a failed publication never loses data.
//!
//! Delivery is **at-least-once** and ordering between concurrent publishers
//! is not guaranteed; consumers must be idempotent.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription receives a copy of every event published to the bus
/// (broadcast semantics). Designed for single-threaded consumption; spin up
/// one subscription per consumer loop.
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
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// Sits between the event store and event consumers:
///
/// ```text
/// Command → Event Store (append) → Event Bus (publish) → Consumers
///                                                            ├─ Projections
///                                                            └─ Workers
/// ```
///
/// `publish()` failures are surfaced to the caller (typically the command
/// dispatcher); since events are already persisted, retrying publication is
/// safe.
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
