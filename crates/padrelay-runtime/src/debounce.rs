//! Per-key debouncing of controller input.
//!
//! A knob being turned emits a burst of values.  [`DebounceRegistry`] routes
//! each [`RawEvent`] to the [`KeyedDebouncer`] that owns its [`KeyId`]; the
//! debouncer keeps only the latest value and emits it once the key has been
//! quiet for the configured period.
//!
//! # State machine
//!
//! | State | Leaves on | To |
//! |---|---|---|
//! | `Idle` | new value | `Pending` (deadline = now + D) |
//! | `Pending` | new value before deadline | `Pending` (value replaced, deadline re-armed) |
//! | `Pending` | deadline reached | `Flushing` |
//! | `Flushing` | value handed to the sink | `Idle` |
//!
//! An unbroken burst therefore produces exactly one emission, D after its
//! last value.  Intermediate values are never emitted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use padrelay_middleware::Publisher;
use padrelay_types::{CoalescedEvent, KeyId, RawEvent, RelayError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, trace, warn};

/// Quiet period used when none is configured.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Where debounced values go once their quiet period is over.
pub trait EventSink: Send + Sync {
    /// Hand `event` off without waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Codec`] when the event cannot be encoded.  The
    /// debouncer drops the value in that case.
    fn emit(&self, event: &CoalescedEvent) -> Result<(), RelayError>;
}

impl EventSink for Publisher {
    fn emit(&self, event: &CoalescedEvent) -> Result<(), RelayError> {
        self.publish_json(&event.to_wire()).map(|_| ())
    }
}

/// Where a [`KeyedDebouncer`] is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { value: i64, deadline: Instant },
    Flushing { value: i64 },
}

/// Debounce worker for a single key.
///
/// Owned by its task; the only way in is the single-value `watch` slot held
/// by the registry, so a newer value always overwrites an older one.
pub struct KeyedDebouncer {
    key: KeyId,
    quiet_period: Duration,
    slot: watch::Receiver<Option<i64>>,
    sink: Arc<dyn EventSink>,
    state: DebounceState,
}

impl KeyedDebouncer {
    fn new(
        key: KeyId,
        quiet_period: Duration,
        slot: watch::Receiver<Option<i64>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            key,
            quiet_period,
            slot,
            sink,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Drive the state machine until the registry drops the slot.
    pub async fn run(mut self) {
        while self.step().await {}
        debug!(key = %self.key, "debouncer input closed");
    }

    /// Perform one transition.  Returns `false` once there is nothing left
    /// to do.
    async fn step(&mut self) -> bool {
        match self.state {
            DebounceState::Idle => {
                if self.slot.changed().await.is_err() {
                    return false;
                }
                self.take_latest();
            }
            DebounceState::Pending { value, deadline } => {
                // A value that lands together with the deadline still
                // belongs to the burst.
                tokio::select! {
                    biased;
                    changed = self.slot.changed() => match changed {
                        Ok(()) => self.take_latest(),
                        // Registry gone: still deliver what we hold.
                        Err(_) => self.state = DebounceState::Flushing { value },
                    },
                    () = tokio::time::sleep_until(deadline) => {
                        self.state = DebounceState::Flushing { value };
                    }
                }
            }
            DebounceState::Flushing { value } => {
                self.flush(value);
                self.state = DebounceState::Idle;
            }
        }
        true
    }

    fn take_latest(&mut self) {
        let latest = *self.slot.borrow_and_update();
        if let Some(value) = latest {
            let deadline = Instant::now() + self.quiet_period;
            trace!(key = %self.key, value, "deadline re-armed");
            self.state = DebounceState::Pending { value, deadline };
        }
    }

    fn flush(&self, value: i64) {
        let event = CoalescedEvent {
            key: self.key,
            value,
            timestamp: Utc::now(),
        };
        debug!(key.control = self.key.control, key.x = self.key.x, value, "emitting debounced value");
        if let Err(e) = self.sink.emit(&event) {
            warn!(key = %self.key, value, error = %e, "could not emit debounced value; dropped");
        }
    }
}

/// Lazily creates one [`KeyedDebouncer`] per key and routes events to it.
///
/// Keys are never removed; the key space of a physical controller is small
/// and fixed.  `dispatch` takes `&self` and may be called from several
/// tasks at once.
pub struct DebounceRegistry {
    quiet_period: Duration,
    sink: Arc<dyn EventSink>,
    slots: Mutex<HashMap<KeyId, watch::Sender<Option<i64>>>>,
}

impl DebounceRegistry {
    pub fn new(sink: Arc<dyn EventSink>, quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            sink,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Route `event` to its key's debouncer, spawning the debouncer on first
    /// sight of the key.
    ///
    /// Never waits on the debouncer: the value is written into its slot,
    /// replacing any value it has not picked up yet.  Must be called from
    /// within a Tokio runtime.
    pub fn dispatch(&self, event: RawEvent) {
        let mut slots = self.lock();
        let slot = slots
            .entry(event.key)
            .or_insert_with(|| self.spawn_debouncer(event.key));
        slot.send_replace(Some(event.value));
    }

    /// Number of keys seen so far.
    pub fn key_count(&self) -> usize {
        self.lock().len()
    }

    fn spawn_debouncer(&self, key: KeyId) -> watch::Sender<Option<i64>> {
        let (tx, rx) = watch::channel(None);
        let debouncer = KeyedDebouncer::new(key, self.quiet_period, rx, Arc::clone(&self.sink));
        tokio::spawn(debouncer.run().instrument(info_span!("debouncer", %key)));
        debug!(%key, "new debouncer");
        tx
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<KeyId, watch::Sender<Option<i64>>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
