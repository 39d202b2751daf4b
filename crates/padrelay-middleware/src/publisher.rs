//! Serialize-and-publish adapter bound to one topic.
//!
//! Publishing is fire-and-forget: the caller gets control back as soon as
//! the payload is encoded, the bus round-trip runs on its own task, and a
//! failed publish is logged and dropped.  Nothing is retried.

use std::sync::Arc;

use padrelay_types::RelayError;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapter::MessageBus;

/// Cheap to clone; all clones publish to the same topic on the same bus.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

impl Publisher {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode `value` as JSON and publish it in the background.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Codec`] when `value` cannot be encoded; nothing
    /// is published in that case.  Bus failures are not reported here.
    pub fn publish_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<JoinHandle<()>, RelayError> {
        let data = serde_json::to_vec(value).map_err(|e| RelayError::Codec(e.to_string()))?;
        Ok(self.spawn_publish(data))
    }

    /// Publish raw bytes on a background task.  The returned handle only
    /// matters to callers that want to observe completion (tests).
    pub fn spawn_publish(&self, data: Vec<u8>) -> JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let topic = self.topic.clone();
        tokio::spawn(async move {
            match bus.publish(&topic, data).await {
                Ok(message_id) => debug!(%topic, %message_id, "published"),
                Err(e) => warn!(%topic, error = %e, "publish failed; message dropped"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use padrelay_types::ControlMessage;
    use std::collections::HashMap;
    use std::time::Duration;

    async fn setup() -> (Arc<InMemoryBus>, Publisher) {
        let bus = Arc::new(InMemoryBus::new());
        bus.create_topic("input");
        bus.create_subscription("reader", "input", Duration::from_secs(60))
            .await
            .unwrap();
        let publisher = Publisher::new(bus.clone(), "input");
        (bus, publisher)
    }

    #[tokio::test]
    async fn publish_json_reaches_subscription() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, publisher) = setup().await;
        let message = ControlMessage {
            control: 1,
            x: 0,
            value: 20,
        };
        publisher.publish_json(&message)?.await?;

        let batch = bus.pull("reader").await?;
        let decoded: ControlMessage = serde_json::from_slice(&batch[0].data)?;
        assert_eq!(decoded, message);
        Ok(())
    }

    #[tokio::test]
    async fn unencodable_value_is_a_codec_error() {
        let (_bus, publisher) = setup().await;
        let mut bad = HashMap::new();
        bad.insert((1, 2), 3);
        let result = publisher.publish_json(&bad);
        assert!(matches!(result, Err(RelayError::Codec(_))));
    }

    #[tokio::test]
    async fn bus_failure_is_swallowed() {
        let bus = Arc::new(InMemoryBus::new());
        let publisher = Publisher::new(bus, "nowhere");
        let handle = publisher.spawn_publish(b"{}".to_vec());
        assert!(handle.await.is_ok(), "publish task must not panic on bus errors");
    }
}
