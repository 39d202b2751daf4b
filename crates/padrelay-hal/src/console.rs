//! Terminal stand-ins for the hardware.
//!
//! [`spawn_console_input`] reads text lines and splits them between a
//! [`ConsoleController`] (`control x value`, e.g. `3 0 96`) and a
//! [`ConsolePad`] (`hit x y`, e.g. `hit 2 5`).  [`ConsoleDisplay`] draws the
//! grid with ANSI colours after every frame.

use std::collections::BTreeMap;

use async_trait::async_trait;
use colored::Colorize;
use padrelay_types::{PadHit, RelayError, Rgb};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::controller::{ControlEvent, InputController};
use crate::display::{GridDisplay, PadInput};

/// One meaningful line of console input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLine {
    Control(ControlEvent),
    Hit(PadHit),
}

/// Start reading `reader` on a background task.
///
/// Blank lines and lines starting with `#` are ignored.  Lines that parse
/// as neither form are reported through the controller as device errors.
/// Either half may be dropped; its lines are discarded.  End of input closes
/// both.
pub fn spawn_console_input(
    id: impl Into<String>,
    reader: Box<dyn AsyncRead + Unpin + Send>,
) -> (ConsoleController, ConsolePad) {
    let id = id.into();
    let (controls_tx, controls_rx) = mpsc::unbounded_channel();
    let (hits_tx, hits_rx) = mpsc::unbounded_channel();
    tokio::spawn(route_lines(id.clone(), reader, controls_tx, hits_tx));
    (
        ConsoleController {
            id,
            events: controls_rx,
        },
        ConsolePad { hits: hits_rx },
    )
}

/// [`spawn_console_input`] on the process's standard input.
pub fn stdin_input() -> (ConsoleController, ConsolePad) {
    spawn_console_input("stdin", Box::new(tokio::io::stdin()))
}

async fn route_lines(
    id: String,
    reader: Box<dyn AsyncRead + Unpin + Send>,
    controls: mpsc::UnboundedSender<Result<ControlEvent, RelayError>>,
    hits: mpsc::UnboundedSender<PadHit>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        if controls.is_closed() && hits.is_closed() {
            return;
        }
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(device = %id, "end of input");
                return;
            }
            Err(e) => {
                let _ = controls.send(Err(device_error(&id, e.to_string())));
                return;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_console_line(trimmed) {
            Ok(ConsoleLine::Control(event)) => {
                if controls.send(Ok(event)).is_err() {
                    trace!(device = %id, "no controller reader; control line dropped");
                }
            }
            Ok(ConsoleLine::Hit(hit)) => {
                if hits.send(hit).is_err() {
                    trace!(device = %id, "no pad reader; hit dropped");
                }
            }
            Err(details) => {
                if controls.send(Err(device_error(&id, details.clone()))).is_err() {
                    warn!(device = %id, %details, "unreadable input line");
                }
            }
        }
    }
}

fn device_error(id: &str, details: String) -> RelayError {
    RelayError::Device {
        device: id.to_string(),
        details,
    }
}

/// Control events read by [`spawn_console_input`].
pub struct ConsoleController {
    id: String,
    events: mpsc::UnboundedReceiver<Result<ControlEvent, RelayError>>,
}

#[async_trait]
impl InputController for ConsoleController {
    fn id(&self) -> &str {
        &self.id
    }

    fn reset(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ControlEvent>, RelayError> {
        self.events.recv().await.transpose()
    }
}

/// Pad hits read by [`spawn_console_input`].
pub struct ConsolePad {
    hits: mpsc::UnboundedReceiver<PadHit>,
}

#[async_trait]
impl PadInput for ConsolePad {
    async fn next_hit(&mut self) -> Result<Option<PadHit>, RelayError> {
        Ok(self.hits.recv().await)
    }
}

fn fields(line: &str) -> Vec<&str> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|f| !f.is_empty())
        .collect()
}

/// Parse `hit x y` or `control x value`.
pub fn parse_console_line(line: &str) -> Result<ConsoleLine, String> {
    match fields(line).as_slice() {
        [keyword, x, y] if keyword.eq_ignore_ascii_case("hit") => {
            let x = x.parse::<i32>().map_err(|e| format!("bad x {x:?}: {e}"))?;
            let y = y.parse::<i32>().map_err(|e| format!("bad y {y:?}: {e}"))?;
            Ok(ConsoleLine::Hit(PadHit { x, y }))
        }
        _ => parse_control_line(line).map(ConsoleLine::Control),
    }
}

/// Parse `control x value`; fields may be separated by whitespace or commas.
pub fn parse_control_line(line: &str) -> Result<ControlEvent, String> {
    let fields = fields(line);
    let [control, x, value] = fields.as_slice() else {
        return Err(format!("expected `control x value` or `hit x y`, got {line:?}"));
    };
    let control = control
        .parse::<i32>()
        .map_err(|e| format!("bad control {control:?}: {e}"))?;
    let x = x.parse::<i32>().map_err(|e| format!("bad x {x:?}: {e}"))?;
    let value = value
        .parse::<i64>()
        .map_err(|e| format!("bad value {value:?}: {e}"))?;
    Ok(ControlEvent { control, x, value })
}

/// Grid renderer for a colour terminal.
pub struct ConsoleDisplay {
    id: String,
    width: usize,
    height: usize,
    cells: BTreeMap<(usize, usize), Rgb>,
}

impl ConsoleDisplay {
    /// A `width` × `height` display addressed from `(1, 1)`.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            id: "console".to_string(),
            width,
            height,
            cells: BTreeMap::new(),
        }
    }

    /// One text row per `y`, columns left to right.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for y in 1..=self.height {
            for x in 1..=self.width {
                let glyph = match self.cells.get(&(x, y)) {
                    Some(Rgb(r, g, b)) => "●".truecolor(scale(*r), scale(*g), scale(*b)).to_string(),
                    None => "·".dimmed().to_string(),
                };
                out.push_str(&glyph);
                out.push(' ');
            }
            out.push('\n');
        }
        out
    }
}

impl GridDisplay for ConsoleDisplay {
    fn id(&self) -> &str {
        &self.id
    }

    fn reset(&mut self) -> Result<(), RelayError> {
        self.cells.clear();
        Ok(())
    }

    fn light(&mut self, x: usize, y: usize, rgb: Rgb) -> Result<(), RelayError> {
        if x == 0 || y == 0 || x > self.width || y > self.height {
            return Err(RelayError::Device {
                device: self.id.clone(),
                details: format!("cell ({x}, {y}) outside {}x{}", self.width, self.height),
            });
        }
        self.cells.insert((x, y), rgb);
        Ok(())
    }

    fn present(&mut self) -> Result<(), RelayError> {
        trace!(lit = self.cells.len(), "presenting frame");
        println!("{}", self.render());
        Ok(())
    }
}

// Pad palettes run 0..=63; stretch them so they are visible on a terminal.
fn scale(component: u8) -> u8 {
    if component <= 63 {
        component.saturating_mul(4)
    } else {
        component
    }
}
