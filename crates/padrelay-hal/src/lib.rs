//! `padrelay-hal` – device boundary.
//!
//! The pipelines only ever talk to the traits in this crate, so a MIDI
//! driver, a simulator, or a terminal stand-in can be swapped without
//! touching debounce or apply logic.
//!
//! # Modules
//!
//! - [`controller`] – [`InputController`]: pull-style source of knob/fader
//!   events.
//! - [`display`] – [`GridDisplay`] (reset + light a cell) and [`PadInput`]
//!   (button hits on the grid surface).
//! - [`sim`] – recording in-process doubles for tests and headless runs.
//! - [`console`] – stdin controller and pad plus a terminal grid renderer,
//!   used by the CLI when no hardware is attached.

pub mod console;
pub mod controller;
pub mod display;
pub mod sim;

pub use console::{
    ConsoleController, ConsoleDisplay, ConsoleLine, ConsolePad, parse_console_line, spawn_console_input, stdin_input,
};
pub use controller::{ControlEvent, InputController};
pub use display::{GridDisplay, PadInput};
pub use sim::{SimController, SimControllerHandle, SimDisplay, SimPad, SimPadHandle};
