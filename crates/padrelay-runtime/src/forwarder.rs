//! [`HitForwarder`] – publishes grid button presses as they happen.
//!
//! Button hits are discrete, so unlike knob input they are not debounced:
//! every hit becomes one `{"X": x, "Y": y}` message on the input topic.

use std::time::Duration;

use padrelay_hal::PadInput;
use padrelay_middleware::Publisher;
use tracing::{info, instrument, warn};

const READ_RETRY_BACKOFF: Duration = Duration::from_millis(10);

pub struct HitForwarder {
    pad: Box<dyn PadInput>,
    publisher: Publisher,
}

impl HitForwarder {
    pub fn new(pad: Box<dyn PadInput>, publisher: Publisher) -> Self {
        Self { pad, publisher }
    }

    /// Forward hits until the pad goes away.  Returns the number of hits
    /// handed to the publisher.
    #[instrument(skip_all, fields(topic = %self.publisher.topic()))]
    pub async fn run(&mut self) -> u64 {
        info!("forwarding pad hits");
        let mut forwarded = 0;
        loop {
            match self.pad.next_hit().await {
                Ok(Some(hit)) => match self.publisher.publish_json(&hit) {
                    Ok(_) => forwarded += 1,
                    Err(e) => warn!(x = hit.x, y = hit.y, error = %e, "could not encode hit"),
                },
                Ok(None) => {
                    info!(forwarded, "pad input closed");
                    return forwarded;
                }
                Err(e) => {
                    warn!(error = %e, "pad read failed");
                    tokio::time::sleep(READ_RETRY_BACKOFF).await;
                }
            }
        }
    }
}
