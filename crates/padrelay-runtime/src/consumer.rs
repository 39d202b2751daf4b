//! [`ConsumerPipeline`] – bus subscription to the grid display.
//!
//! Loops `Pulling → Draining → Pulling` for the lifetime of the process:
//!
//! 1. **Pulling** – wait for a batch on the subscription.  A failed pull is
//!    logged and retried after a short pause; it never ends the loop.
//! 2. **Draining** – decode each message as a full [`DisplayGrid`] and apply
//!    it.  A message that does not decode is skipped and left
//!    unacknowledged, so the bus delivers it again later.  Every decoded
//!    message is applied and then acknowledged on a background task, even
//!    when the display refused some of its cells: redelivering the same grid
//!    would be refused the same way.
//!
//! Grids are applied in pull order with no reordering or deduplication.  The
//! bus may redeliver an older grid after a newer one; whatever was applied
//! last is what the display shows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use padrelay_middleware::MessageBus;
use padrelay_types::{BusMessage, DisplayGrid, RelayError};
use tracing::{debug, info, instrument, warn};

use crate::applier::StateApplier;

/// Pause after a failed pull before pulling again.
pub const DEFAULT_PULL_BACKOFF: Duration = Duration::from_millis(10);

/// Ack deadline of a subscription created by [`resolve_subscription`].
pub const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Pulling,
    Draining,
}

/// What happened to the messages of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Applied and acknowledged.
    pub applied: usize,
    /// Not a grid; left for redelivery.
    pub malformed: usize,
    /// Applied, but the display refused some cells.  Counted in `applied`
    /// too.
    pub partial: usize,
}

pub struct ConsumerPipeline {
    bus: Arc<dyn MessageBus>,
    subscription: String,
    applier: StateApplier,
    pull_backoff: Duration,
    state: ConsumerState,
}

impl ConsumerPipeline {
    pub fn new(bus: Arc<dyn MessageBus>, subscription: impl Into<String>, applier: StateApplier) -> Self {
        Self {
            bus,
            subscription: subscription.into(),
            applier,
            pull_backoff: DEFAULT_PULL_BACKOFF,
            state: ConsumerState::Pulling,
        }
    }

    pub fn with_pull_backoff(mut self, pull_backoff: Duration) -> Self {
        self.pull_backoff = pull_backoff;
        self
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn applier_mut(&mut self) -> &mut StateApplier {
        &mut self.applier
    }

    /// Pull and apply forever.
    #[instrument(skip_all, fields(subscription = %self.subscription, display = self.applier.display_id()))]
    pub async fn run(&mut self) {
        if let Err(e) = self.applier.reset() {
            warn!(error = %e, "display reset failed; continuing");
        }
        info!("listening for display grids");
        loop {
            match self.run_once().await {
                Ok(report) => debug!(?report, "batch drained"),
                Err(e) => {
                    warn!(error = %e, "pull failed; retrying");
                    tokio::time::sleep(self.pull_backoff).await;
                }
            }
        }
    }

    /// One `Pulling → Draining → Pulling` cycle.
    ///
    /// # Errors
    ///
    /// Returns the pull error; nothing was drained in that case.
    pub async fn run_once(&mut self) -> Result<BatchReport, RelayError> {
        self.state = ConsumerState::Pulling;
        let batch = self.bus.pull(&self.subscription).await?;
        self.state = ConsumerState::Draining;
        let report = self.drain(batch);
        self.state = ConsumerState::Pulling;
        Ok(report)
    }

    /// Apply every message of `batch` in order.
    pub fn drain(&mut self, batch: Vec<BusMessage>) -> BatchReport {
        let mut report = BatchReport::default();
        for message in batch {
            let grid: DisplayGrid = match serde_json::from_slice(&message.data) {
                Ok(grid) => grid,
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "malformed grid skipped");
                    report.malformed += 1;
                    continue;
                }
            };
            let outcome = self.applier.apply(&grid);
            if !outcome.is_complete() {
                warn!(message_id = %message.id, rejected = outcome.rejected, "grid only partly shown");
                report.partial += 1;
            }
            debug!(message_id = %message.id, ack_id = %message.ack_id, lit = outcome.lit, "grid applied");
            self.spawn_ack(message.ack_id);
            report.applied += 1;
        }
        report
    }

    // Fire-and-forget: a lost ack only means one more (idempotent) redelivery.
    fn spawn_ack(&self, ack_id: String) {
        let bus = Arc::clone(&self.bus);
        let subscription = self.subscription.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.ack(&subscription, &ack_id).await {
                warn!(%subscription, %ack_id, error = %e, "ack failed");
            }
        });
    }
}

/// Name used for a subscription created at `now`.
pub fn default_subscription_name(now: DateTime<Utc>) -> String {
    format!("padrelay-agent-{}", now.timestamp())
}

/// Return the subscription to consume from.
///
/// A configured name is used as-is.  Without one a fresh subscription named
/// after the current time is attached to `topic`.
///
/// # Errors
///
/// Returns the bus error when the new subscription cannot be created.
pub async fn resolve_subscription(
    bus: &dyn MessageBus,
    configured: Option<&str>,
    topic: &str,
    ack_deadline: Duration,
) -> Result<String, RelayError> {
    if let Some(name) = configured.filter(|name| !name.is_empty()) {
        return Ok(name.to_string());
    }
    let name = default_subscription_name(Utc::now());
    bus.create_subscription(&name, topic, ack_deadline).await?;
    info!(subscription = %name, topic, "created subscription");
    Ok(name)
}
