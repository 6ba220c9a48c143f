//! Log-backed sinks for hosts without the panel hardware.

use tracing::info;

use super::{Indicator, LevelDisplay};
use crate::mqtt::level::{Icon, LevelFrame};

pub struct LogIndicator {
    name: &'static str,
    on: Option<bool>,
}

impl LogIndicator {
    pub fn new(name: &'static str) -> Self {
        Self { name, on: None }
    }
}

impl Indicator for LogIndicator {
    fn set(&mut self, on: bool) {
        if self.on == Some(on) {
            return;
        }
        self.on = Some(on);
        info!("{} {}", self.name, if on { "on" } else { "off" });
    }
}

/// Writes the matrix and the two text lines to the log.
#[derive(Default)]
pub struct ConsoleDisplay;

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self
    }
}

impl LevelDisplay for ConsoleDisplay {
    fn render(&mut self, frame: &LevelFrame) {
        info!(
            "\n{}\nComodo: {}\nNivel: {}",
            matrix_art(frame.icon()),
            frame.room_label(),
            frame.text()
        );
    }
}

/// One line per matrix row, `#` for a lit pixel.
pub fn matrix_art(icon: &Icon) -> String {
    icon.iter()
        .map(|row| {
            row.iter()
                .map(|lit| if *lit { '#' } else { '.' })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
