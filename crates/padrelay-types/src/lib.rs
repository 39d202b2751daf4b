use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Identity of one independently debounced physical control.
///
/// A controller exposes banks of knobs/faders (`control`) with one element
/// per column (`x`); the pair is stable for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId {
    pub control: i32,
    pub x: i32,
}

impl KeyId {
    pub fn new(control: i32, x: i32) -> Self {
        Self { control, x }
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.control, self.x)
    }
}

/// An immediate observation from the input controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub key: KeyId,
    pub value: i64,
}

/// The single value published for a key after its quiet period elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedEvent {
    pub key: KeyId,
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

impl CoalescedEvent {
    /// The JSON body published on the input topic.
    pub fn to_wire(&self) -> ControlMessage {
        ControlMessage {
            control: self.key.control,
            x: self.key.x,
            value: self.value,
        }
    }
}

/// Wire payload for controller input: `{"control": 1, "x": 0, "value": 20}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub control: i32,
    pub x: i32,
    pub value: i64,
}

impl ControlMessage {
    pub fn key(&self) -> KeyId {
        KeyId::new(self.control, self.x)
    }
}

/// A button hit on the grid surface, forwarded as `{"X": 3, "Y": 5}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadHit {
    #[serde(rename = "X")]
    pub x: i32,
    #[serde(rename = "Y")]
    pub y: i32,
}

/// One cell colour, encoded on the wire as `[r, g, b]`.
///
/// Publishers send plain integers; components outside `0..=255` are clamped
/// on decode rather than rejecting the whole grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [r, g, b] = <[i64; 3]>::deserialize(deserializer)?;
        Ok(Rgb(channel(r), channel(g), channel(b)))
    }
}

fn channel(value: i64) -> u8 {
    value.clamp(0, u8::MAX as i64) as u8
}

impl Rgb {
    pub const OFF: Rgb = Rgb(0, 0, 0);

    /// `true` for the blank colour a reset device already shows.
    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }
}

/// Full snapshot of the display: `grid[x][y] = [r, g, b]`.
///
/// Columns may have different lengths; a missing cell is dark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayGrid(pub Vec<Vec<Rgb>>);

impl DisplayGrid {
    /// An all-dark grid of `width` columns by `height` rows.
    pub fn blank(width: usize, height: usize) -> Self {
        Self(vec![vec![Rgb::OFF; height]; width])
    }

    /// Iterate over `(x, y, colour)` for every cell present in the grid.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, Rgb)> + '_ {
        self.0
            .iter()
            .enumerate()
            .flat_map(|(x, column)| column.iter().enumerate().map(move |(y, rgb)| (x, y, *rgb)))
    }

    /// Set a cell, growing the grid as needed.
    pub fn set(&mut self, x: usize, y: usize, rgb: Rgb) {
        if self.0.len() <= x {
            self.0.resize(x + 1, Vec::new());
        }
        let column = &mut self.0[x];
        if column.len() <= y {
            column.resize(y + 1, Rgb::OFF);
        }
        column[y] = rgb;
    }
}

/// Envelope delivered by a bus subscription.
///
/// `id` is stable across redeliveries; `ack_id` identifies one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub id: String,
    pub ack_id: String,
    pub data: Vec<u8>,
}

/// Error type shared by the bus, the device drivers and the pipelines.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum RelayError {
    #[error("Bus Error: {0}")]
    Bus(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("Codec Error: {0}")]
    Codec(String),

    #[error("Device Fault on {device}: {details}")]
    Device { device: String, details: String },

    #[error("Configuration Error: {0}")]
    Config(String),
}
