//! [`ProducerPipeline`] – controller input to the debounce registry.
//!
//! Reads the controller one event at a time, in the order the device emitted
//! them, and dispatches each as a [`RawEvent`][padrelay_types::RawEvent].
//! Dispatch never waits on a debouncer, so the device is never held back.

use std::sync::Arc;
use std::time::Duration;

use padrelay_hal::InputController;
use tracing::{info, instrument, trace, warn};

use crate::debounce::DebounceRegistry;

/// Pause after a failed controller read before trying again.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(10);

pub struct ProducerPipeline {
    controller: Box<dyn InputController>,
    registry: Arc<DebounceRegistry>,
}

impl ProducerPipeline {
    pub fn new(controller: Box<dyn InputController>, registry: Arc<DebounceRegistry>) -> Self {
        Self {
            controller,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<DebounceRegistry> {
        &self.registry
    }

    /// Reset the controller, then feed its events to the registry until the
    /// controller goes away.  Returns the number of events dispatched.
    ///
    /// Read errors are logged and retried after a short pause.
    #[instrument(skip_all, fields(controller = self.controller.id()))]
    pub async fn run(&mut self) -> u64 {
        if let Err(e) = self.controller.reset() {
            warn!(error = %e, "controller reset failed; continuing");
        }
        info!(
            quiet_period_ms = self.registry.quiet_period().as_millis() as u64,
            "listening for controller input"
        );

        let mut dispatched = 0;
        loop {
            match self.controller.next_event().await {
                Ok(Some(event)) => {
                    trace!(control = event.control, x = event.x, value = event.value, "input");
                    self.registry.dispatch(event.into());
                    dispatched += 1;
                }
                Ok(None) => {
                    info!(dispatched, "controller closed");
                    return dispatched;
                }
                Err(e) => {
                    warn!(error = %e, "controller read failed");
                    tokio::time::sleep(READ_RETRY_BACKOFF).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debounce::DEFAULT_QUIET_PERIOD;
    use padrelay_hal::{SimController, SimControllerHandle};
    use padrelay_middleware::{InMemoryBus, MessageBus, Publisher};
    use padrelay_types::{ControlMessage, KeyId};
    use tokio::time::{Instant, sleep, timeout};

    async fn pipeline() -> (ProducerPipeline, SimControllerHandle, Arc<InMemoryBus>) {
        let bus = Arc::new(InMemoryBus::new());
        bus.create_topic("launchcontrol");
        bus.create_subscription("watcher", "launchcontrol", Duration::from_secs(60))
            .await
            .unwrap();
        let publisher = Publisher::new(bus.clone(), "launchcontrol");
        let registry = Arc::new(DebounceRegistry::new(Arc::new(publisher), DEFAULT_QUIET_PERIOD));
        let (controller, handle) = SimController::new("lc");
        (ProducerPipeline::new(Box::new(controller), registry), handle, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn knob_burst_is_published_once_after_quiet_period() -> Result<(), Box<dyn std::error::Error>> {
        let (mut producer, handle, bus) = pipeline().await;
        tokio::spawn(async move { producer.run().await });
        let start = Instant::now();

        handle.send(1, 0, 10);
        sleep(Duration::from_millis(100)).await;
        handle.send(1, 0, 20);

        let batch = bus.pull("watcher").await?;
        let elapsed = start.elapsed();
        assert_eq!(batch.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&batch[0].data)?;
        assert_eq!(body, serde_json::json!({"control": 1, "x": 0, "value": 20}));
        assert!(elapsed >= Duration::from_millis(600), "published after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(800), "published after {elapsed:?}");
        bus.ack("watcher", &batch[0].ack_id).await?;

        let more = timeout(Duration::from_secs(3), bus.pull("watcher")).await;
        assert!(more.is_err(), "burst must publish exactly once");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn interleaved_controls_publish_one_message_each() -> Result<(), Box<dyn std::error::Error>> {
        let (mut producer, handle, bus) = pipeline().await;
        tokio::spawn(async move { producer.run().await });

        for value in 0..5 {
            handle.send(1, 0, value);
            handle.send(3, 2, value * 10);
            sleep(Duration::from_millis(50)).await;
        }

        let mut messages = Vec::new();
        while messages.len() < 2 {
            for m in bus.pull("watcher").await? {
                messages.push(serde_json::from_slice::<ControlMessage>(&m.data)?);
            }
        }
        messages.sort_by_key(|m| m.key());
        assert_eq!(messages[0].key(), KeyId::new(1, 0));
        assert_eq!(messages[0].value, 4);
        assert_eq!(messages[1].key(), KeyId::new(3, 2));
        assert_eq!(messages[1].value, 40);
        Ok(())
    }

    #[tokio::test]
    async fn read_errors_do_not_stop_the_pipeline() {
        let (mut producer, handle, _bus) = pipeline().await;
        handle.send(1, 0, 1);
        handle.fail("usb hiccup");
        handle.send(1, 1, 2);
        handle.finish();

        let dispatched = producer.run().await;
        assert_eq!(dispatched, 2);
        assert_eq!(producer.registry().key_count(), 2);
        assert_eq!(handle.resets(), 1, "controller is reset before listening");
    }
}
