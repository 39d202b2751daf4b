//! Grid display traits.
//!
//! A grid display is an addressable matrix of RGB cells with no "diff"
//! primitive: it can be cleared and individual cells can be lit, nothing
//! else.  Cell coordinates are the device's own (the pads in use count from
//! 1).

use async_trait::async_trait;
use padrelay_types::{PadHit, RelayError, Rgb};

/// An addressable RGB cell matrix.
pub trait GridDisplay: Send {
    /// Stable identifier for log output, e.g. `"launchpad"`.
    fn id(&self) -> &str;

    /// Turn every cell off.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Device`] if the command cannot be delivered.
    fn reset(&mut self) -> Result<(), RelayError>;

    /// Light cell `(x, y)` with `rgb`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Device`] if the command cannot be delivered.
    fn light(&mut self, x: usize, y: usize, rgb: Rgb) -> Result<(), RelayError>;

    /// Called once a full frame has been painted.  Hardware that updates
    /// cells immediately has nothing to do here.
    fn present(&mut self) -> Result<(), RelayError> {
        Ok(())
    }
}

/// Button hits reported by a grid surface that doubles as an input device.
#[async_trait]
pub trait PadInput: Send {
    /// Wait for the next hit.  `Ok(None)` means the surface is gone.
    async fn next_hit(&mut self) -> Result<Option<PadHit>, RelayError>;
}
