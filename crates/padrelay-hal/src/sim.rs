//! In-process device doubles for tests and headless runs.
//!
//! Each simulated device comes with a handle the test (or the CLI) keeps to
//! drive it or to inspect what it was told to do.
//!
//! # Stub behaviour
//!
//! | Device | Stub behaviour |
//! |---|---|
//! | [`SimController`] | Replays events sent through its [`SimControllerHandle`]; ends on `finish` or when every handle is dropped. |
//! | [`SimDisplay`]    | Records lit cells, resets and presented frames; clones share state; optionally bounded. |
//! | [`SimPad`]        | Replays hits sent through its [`SimPadHandle`]. |

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use padrelay_types::{PadHit, RelayError, Rgb};
use tokio::sync::mpsc;

use crate::controller::{ControlEvent, InputController};
use crate::display::{GridDisplay, PadInput};

// ────────────────────────────────────────────────────────────────────────────
// Simulated controller
// ────────────────────────────────────────────────────────────────────────────

/// A controller whose events are injected through a [`SimControllerHandle`].
pub struct SimController {
    id: String,
    events: mpsc::UnboundedReceiver<Option<Result<ControlEvent, RelayError>>>,
    resets: Arc<AtomicUsize>,
}

/// Sending side of a [`SimController`].
#[derive(Clone)]
pub struct SimControllerHandle {
    events: mpsc::UnboundedSender<Option<Result<ControlEvent, RelayError>>>,
    resets: Arc<AtomicUsize>,
}

impl SimController {
    pub fn new(id: impl Into<String>) -> (Self, SimControllerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let resets = Arc::new(AtomicUsize::new(0));
        let controller = Self {
            id: id.into(),
            events: rx,
            resets: Arc::clone(&resets),
        };
        (controller, SimControllerHandle { events: tx, resets })
    }
}

impl SimControllerHandle {
    /// Emit a control change.  Returns `false` once the controller is gone.
    pub fn send(&self, control: i32, x: i32, value: i64) -> bool {
        self.events
            .send(Some(Ok(ControlEvent { control, x, value })))
            .is_ok()
    }

    /// Emit a transient read failure.
    pub fn fail(&self, details: impl Into<String>) -> bool {
        self.events
            .send(Some(Err(RelayError::Device {
                device: "sim-controller".to_string(),
                details: details.into(),
            })))
            .is_ok()
    }

    /// Unplug the controller: it reports end of stream once the events
    /// already sent have been read.
    pub fn finish(&self) {
        let _ = self.events.send(None);
    }

    /// Number of times the controller was reset.
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputController for SimController {
    fn id(&self) -> &str {
        &self.id
    }

    fn reset(&mut self) -> Result<(), RelayError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ControlEvent>, RelayError> {
        match self.events.recv().await {
            Some(Some(event)) => event.map(Some),
            Some(None) | None => Ok(None),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated display
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct DisplayState {
    cells: BTreeMap<(usize, usize), Rgb>,
    resets: usize,
    frames: usize,
    failing: bool,
    // (width, height) when addressing is bounded like real hardware
    size: Option<(usize, usize)>,
}

/// A display that records what it was told to show.
///
/// Clones share the same state, so keep one clone for assertions and hand
/// the other to the code under test.
#[derive(Clone)]
pub struct SimDisplay {
    id: String,
    state: Arc<Mutex<DisplayState>>,
}

impl SimDisplay {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(DisplayState::default())),
        }
    }

    /// A display that rejects cells outside `1..=width` × `1..=height`.
    pub fn with_size(id: impl Into<String>, width: usize, height: usize) -> Self {
        let display = Self::new(id);
        display.lock().size = Some((width, height));
        display
    }

    /// Every cell that is currently lit, keyed by device coordinate.
    pub fn lit_cells(&self) -> BTreeMap<(usize, usize), Rgb> {
        self.lock().cells.clone()
    }

    /// `true` when no cell is lit.
    pub fn is_dark(&self) -> bool {
        self.lock().cells.is_empty()
    }

    pub fn resets(&self) -> usize {
        self.lock().resets
    }

    pub fn frames(&self) -> usize {
        self.lock().frames
    }

    /// Make every subsequent `light` call fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn lock(&self) -> MutexGuard<'_, DisplayState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl GridDisplay for SimDisplay {
    fn id(&self) -> &str {
        &self.id
    }

    fn reset(&mut self) -> Result<(), RelayError> {
        let mut state = self.lock();
        state.cells.clear();
        state.resets += 1;
        Ok(())
    }

    fn light(&mut self, x: usize, y: usize, rgb: Rgb) -> Result<(), RelayError> {
        let mut state = self.lock();
        if state.failing {
            return Err(RelayError::Device {
                device: self.id.clone(),
                details: format!("light({x}, {y}) rejected"),
            });
        }
        if let Some((width, height)) = state.size
            && (x == 0 || y == 0 || x > width || y > height)
        {
            return Err(RelayError::Device {
                device: self.id.clone(),
                details: format!("cell ({x}, {y}) outside {width}x{height}"),
            });
        }
        if rgb.is_off() {
            state.cells.remove(&(x, y));
        } else {
            state.cells.insert((x, y), rgb);
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), RelayError> {
        self.lock().frames += 1;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated pad input
// ────────────────────────────────────────────────────────────────────────────

/// Button surface whose hits are injected through a [`SimPadHandle`].
pub struct SimPad {
    hits: mpsc::UnboundedReceiver<PadHit>,
}

/// Sending side of a [`SimPad`].
#[derive(Clone)]
pub struct SimPadHandle {
    hits: mpsc::UnboundedSender<PadHit>,
}

impl SimPad {
    pub fn new() -> (Self, SimPadHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { hits: rx }, SimPadHandle { hits: tx })
    }
}

impl SimPadHandle {
    /// Press button `(x, y)`.  Returns `false` once the pad is gone.
    pub fn hit(&self, x: i32, y: i32) -> bool {
        self.hits.send(PadHit { x, y }).is_ok()
    }
}

#[async_trait]
impl PadInput for SimPad {
    async fn next_hit(&mut self) -> Result<Option<PadHit>, RelayError> {
        Ok(self.hits.recv().await)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
