//! Generic `InputController` trait for knob/fader/button banks that report
//! integer values.
//!
//! Drivers hand events out one at a time in the order the hardware emitted
//! them.  The rest of the system only sees the trait.

use async_trait::async_trait;
use padrelay_types::{KeyId, RawEvent, RelayError};

/// A device-native input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlEvent {
    /// Bank of controls the element belongs to (knob row, fader row, …).
    pub control: i32,
    /// Column of the element within its bank.
    pub x: i32,
    pub value: i64,
}

impl From<ControlEvent> for RawEvent {
    fn from(event: ControlEvent) -> Self {
        RawEvent {
            key: KeyId::new(event.control, event.x),
            value: event.value,
        }
    }
}

/// A pull-style input controller.
#[async_trait]
pub trait InputController: Send {
    /// Stable identifier for log output, e.g. `"launchcontrol"`.
    fn id(&self) -> &str;

    /// Return the device to its power-on state.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Device`] if the device rejects the command.
    fn reset(&mut self) -> Result<(), RelayError>;

    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` once the device is gone and no further events will
    /// arrive.  An `Err` is a transient read failure; the caller may keep
    /// reading.
    async fn next_event(&mut self) -> Result<Option<ControlEvent>, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_event_maps_to_raw_event() {
        let raw = RawEvent::from(ControlEvent {
            control: 3,
            x: 7,
            value: 127,
        });
        assert_eq!(raw.key, KeyId::new(3, 7));
        assert_eq!(raw.value, 127);
    }
}
