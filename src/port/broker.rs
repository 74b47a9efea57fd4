//! Broker client capability: connect, declare a durable queue, publish
//! persistent messages, consume with manual acknowledgement.
//!
//! The traits are dyn-compatible by returning boxed futures, so the
//! connector, publisher and consumer can run against `AmqpClient` in
//! production and the in-memory broker in tests.

use crate::error::BrokerError;
use futures::future::BoxFuture;

/// Opens sessions to a broker.
pub trait BrokerClient: Send + Sync {
    /// One connection attempt. Retrying is the caller's business.
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn BrokerSession>, BrokerError>>;
}

/// An open connection plus the channel used on it.
pub trait BrokerSession: Send + Sync {
    /// Declare `queue` as durable. Succeeds if it already exists with the same durability.
    fn declare_durable_queue<'a>(&'a self, queue: &'a str)
    -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Publish `payload` as a persistent message routed to `queue`.
    /// Resolves once the broker has confirmed the message.
    fn publish_persistent<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Start a manual-ack consumer holding at most `prefetch` unacknowledged deliveries.
    fn consume<'a>(
        &'a self,
        queue: &'a str,
        prefetch: u16,
    ) -> BoxFuture<'a, Result<Box<dyn DeliveryStream>, BrokerError>>;

    /// Close the connection. Unacknowledged deliveries return to the queue.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>>;
}

/// Deliveries in arrival order.
pub trait DeliveryStream: Send {
    /// `None` once the broker has cancelled the consumer.
    fn next_delivery(&mut self) -> BoxFuture<'_, Option<Result<Box<dyn Delivery>, BrokerError>>>;
}

/// A received message awaiting its single acknowledgement. Both `ack` and
/// `nack_requeue` consume the delivery, so it cannot be settled twice.
pub trait Delivery: Send {
    fn payload(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    /// Whether the broker has handed this message out before.
    fn redelivered(&self) -> bool;

    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>>;

    fn nack_requeue(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>>;
}
