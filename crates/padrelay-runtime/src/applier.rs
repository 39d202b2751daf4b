//! [`StateApplier`] – paints a [`DisplayGrid`] onto a [`GridDisplay`].
//!
//! The display has no diff primitive, so every grid is applied as reset then
//! paint.  A cell the new grid leaves out (or sets to black) can never keep a
//! colour from an earlier grid, and applying the same grid twice leaves the
//! display exactly as applying it once.

use padrelay_hal::GridDisplay;
use padrelay_types::{DisplayGrid, RelayError};
use tracing::{trace, warn};

/// Grid cell `(0, 0)` is device cell `(1, 1)`.
pub const DEVICE_ORIGIN: usize = 1;

/// Outcome of one [`StateApplier::apply`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Cells the display accepted.
    pub lit: usize,
    /// Cells the display refused, e.g. outside its bounds.
    pub rejected: usize,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.rejected == 0
    }
}

pub struct StateApplier {
    display: Box<dyn GridDisplay>,
}

impl StateApplier {
    pub fn new(display: Box<dyn GridDisplay>) -> Self {
        Self { display }
    }

    pub fn display_id(&self) -> &str {
        self.display.id()
    }

    /// Blank the display.
    pub fn reset(&mut self) -> Result<(), RelayError> {
        self.display.reset()
    }

    /// Replace whatever the display shows with `grid`.
    ///
    /// Total: every non-black cell is attempted and the frame is always
    /// presented.  Device errors are logged and counted in the report, never
    /// returned, so one bad cell cannot keep the rest of the grid off the
    /// display.
    pub fn apply(&mut self, grid: &DisplayGrid) -> ApplyReport {
        let display_id = self.display.id().to_string();
        if let Err(e) = self.display.reset() {
            warn!(display = %display_id, error = %e, "reset before paint failed");
        }
        let mut report = ApplyReport::default();
        for (x, y, rgb) in grid.cells().filter(|(_, _, rgb)| !rgb.is_off()) {
            match self.display.light(x + DEVICE_ORIGIN, y + DEVICE_ORIGIN, rgb) {
                Ok(()) => report.lit += 1,
                Err(e) => {
                    trace!(display = %display_id, x, y, error = %e, "cell rejected");
                    report.rejected += 1;
                }
            }
        }
        if report.rejected > 0 {
            warn!(display = %display_id, rejected = report.rejected, "cells not shown");
        }
        if let Err(e) = self.display.present() {
            warn!(display = %display_id, error = %e, "present failed");
        }
        trace!(lit = report.lit, "grid applied");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use padrelay_hal::{ConsoleDisplay, SimDisplay};
    use padrelay_types::Rgb;

    fn grid(json: &str) -> DisplayGrid {
        serde_json::from_str(json).expect("valid grid json")
    }

    fn applier() -> (StateApplier, SimDisplay) {
        let display = SimDisplay::new("pad");
        (StateApplier::new(Box::new(display.clone())), display)
    }

    #[test]
    fn cells_are_lit_at_device_coordinates() {
        let (mut applier, display) = applier();
        let report = applier.apply(&grid("[[[255,0,0]],[[0,0,0],[0,63,0]]]"));

        assert_eq!(report, ApplyReport { lit: 2, rejected: 0 });
        let cells = display.lit_cells();
        assert_eq!(cells.get(&(1, 1)), Some(&Rgb(255, 0, 0)));
        assert_eq!(cells.get(&(2, 2)), Some(&Rgb(0, 63, 0)));
        assert_eq!(cells.len(), 2);
        assert_eq!(display.frames(), 1);
    }

    #[test]
    fn applying_twice_matches_applying_once() {
        let g = grid("[[[1,2,3],[4,5,6]],[[7,8,9]]]");

        let (mut once, once_display) = applier();
        once.apply(&g);

        let (mut twice, twice_display) = applier();
        twice.apply(&g);
        twice.apply(&g);

        assert_eq!(once_display.lit_cells(), twice_display.lit_cells());
    }

    #[test]
    fn cells_missing_from_the_next_grid_go_dark() {
        let (mut applier, display) = applier();
        applier.apply(&grid("[[[63,0,0],[0,63,0]],[[0,0,63]]]"));
        applier.apply(&grid("[[[63,0,0]]]"));

        let cells = display.lit_cells();
        assert_eq!(cells.len(), 1);
        assert!(cells.contains_key(&(1, 1)));
    }

    #[test]
    fn red_then_empty_grid_leaves_display_dark() {
        let (mut applier, display) = applier();
        applier.apply(&grid("[[[255,0,0]]]"));
        assert!(!display.is_dark());

        applier.apply(&grid("[[]]"));
        assert!(display.is_dark());
        assert_eq!(display.resets(), 2);
    }

    #[test]
    fn failing_device_still_presents_the_frame() {
        let (mut applier, display) = applier();
        display.set_failing(true);
        let report = applier.apply(&grid("[[[1,1,1]],[[2,2,2]]]"));
        assert_eq!(report, ApplyReport { lit: 0, rejected: 2 });
        assert!(!report.is_complete());
        assert_eq!(display.frames(), 1);
    }

    #[test]
    fn cells_beyond_the_display_are_skipped_not_fatal() {
        let display = SimDisplay::with_size("pad", 8, 8);
        let mut applier = StateApplier::new(Box::new(display.clone()));

        let mut wide = DisplayGrid::blank(9, 1);
        wide.set(0, 0, Rgb(63, 0, 0));
        wide.set(8, 0, Rgb(0, 63, 0));
        let report = applier.apply(&wide);

        assert_eq!(report, ApplyReport { lit: 1, rejected: 1 });
        assert_eq!(display.lit_cells().get(&(1, 1)), Some(&Rgb(63, 0, 0)));
        assert_eq!(display.frames(), 1);

        let mut console = StateApplier::new(Box::new(ConsoleDisplay::new(8, 8)));
        assert_eq!(console.apply(&wide), ApplyReport { lit: 1, rejected: 1 });
    }
}
