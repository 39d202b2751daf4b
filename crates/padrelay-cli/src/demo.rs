//! Level-meter bridge used by `--mode both`.
//!
//! Closes the loop in a single process: controller messages arriving on the
//! input topic are turned into an 8×8 bar display and published to the
//! output topic, where the consumer pipeline paints them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use padrelay_middleware::{MessageBus, Publisher};
use padrelay_runtime::GridPublisher;
use padrelay_types::{ControlMessage, DisplayGrid, RelayError, Rgb};
use tracing::{debug, info, instrument, warn};

pub const METER_WIDTH: usize = 8;
pub const METER_HEIGHT: usize = 8;

/// Controller values run 0..=127.
const FULL_SCALE: i64 = 127;

/// Latest value per column, rendered as bars growing from the bottom row.
#[derive(Debug, Default)]
pub struct LevelMeter {
    levels: BTreeMap<usize, i64>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message`.  Returns `false` when its `x` falls outside the
    /// meter.
    pub fn update(&mut self, message: &ControlMessage) -> bool {
        match usize::try_from(message.x) {
            Ok(x) if x < METER_WIDTH => {
                self.levels.insert(x, message.value.clamp(0, FULL_SCALE));
                true
            }
            _ => false,
        }
    }

    /// Number of lit rows for `value`.
    fn bar_height(value: i64) -> usize {
        let rows = METER_HEIGHT as i64;
        ((value * rows + FULL_SCALE / 2) / FULL_SCALE).clamp(0, rows) as usize
    }

    pub fn render(&self) -> DisplayGrid {
        let mut grid = DisplayGrid::blank(METER_WIDTH, METER_HEIGHT);
        for (&x, &value) in &self.levels {
            for step in 0..Self::bar_height(value) {
                let y = METER_HEIGHT - 1 - step;
                grid.set(x, y, row_colour(step));
            }
        }
        grid
    }
}

// Green at the bottom, amber in the middle, red on top.
fn row_colour(step: usize) -> Rgb {
    match step {
        0..=4 => Rgb(0, 63, 0),
        5..=6 => Rgb(63, 40, 0),
        _ => Rgb(63, 0, 0),
    }
}

/// Pulls controller messages from the input topic and republishes the meter.
pub struct MeterBridge {
    bus: Arc<dyn MessageBus>,
    subscription: String,
    meter: LevelMeter,
    grids: GridPublisher,
    pull_backoff: Duration,
}

impl MeterBridge {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        subscription: impl Into<String>,
        output: Publisher,
        pull_backoff: Duration,
    ) -> Self {
        Self {
            bus,
            subscription: subscription.into(),
            meter: LevelMeter::new(),
            grids: GridPublisher::new(output),
            pull_backoff,
        }
    }

    #[instrument(skip_all, fields(subscription = %self.subscription))]
    pub async fn run(&mut self) {
        info!("level meter bridge started");
        loop {
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "meter pull failed");
                tokio::time::sleep(self.pull_backoff).await;
            }
        }
    }

    /// Pull one batch, fold it into the meter and publish the result if it
    /// changed.  Returns whether a grid was published.
    pub async fn run_once(&mut self) -> Result<bool, RelayError> {
        let batch = self.bus.pull(&self.subscription).await?;
        for message in batch {
            match serde_json::from_slice::<ControlMessage>(&message.data) {
                Ok(control) => {
                    if !self.meter.update(&control) {
                        debug!(x = control.x, "control outside meter ignored");
                    }
                }
                // Pad hits share the input topic.
                Err(e) => debug!(message_id = %message.id, error = %e, "not a control message"),
            }
            if let Err(e) = self.bus.ack(&self.subscription, &message.ack_id).await {
                warn!(message_id = %message.id, error = %e, "ack failed");
            }
        }
        self.grids.publish_if_changed(self.meter.render())
    }
}
