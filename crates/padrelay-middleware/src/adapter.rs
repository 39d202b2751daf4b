//! The bus boundary.
//!
//! PadRelay never speaks to a concrete pub/sub service directly.  The
//! producer and consumer pipelines only hold an `Arc<dyn MessageBus>`; an
//! implementation translates the calls into the protocol of the outside
//! world.  [`InMemoryBus`][crate::bus::InMemoryBus] is the in-process
//! implementation used by the CLI and the tests.

use std::time::Duration;

use async_trait::async_trait;
use padrelay_types::{BusMessage, RelayError};

/// Publish/subscribe/acknowledge primitives of an at-least-once bus.
///
/// # Contract
///
/// * `publish` – hands `data` to every subscription attached to `topic` and
///   returns the server-assigned message id.
/// * `pull` – waits for the next batch of messages on `subscription`.  A
///   delivered message that is not acknowledged before its ack deadline is
///   delivered again, possibly out of publish order.
/// * `ack` – marks one delivery (`ack_id`) as processed.  Acknowledging an
///   expired or unknown delivery is not an error.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `data` to `topic`.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, RelayError>;

    /// Attach a new subscription named `name` to `topic`.
    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> Result<(), RelayError>;

    /// Wait for the next batch of messages on `subscription`.
    async fn pull(&self, subscription: &str) -> Result<Vec<BusMessage>, RelayError>;

    /// Acknowledge one delivery.
    async fn ack(&self, subscription: &str, ack_id: &str) -> Result<(), RelayError>;
}
