//! # Device Sinks
//!
//! The session only decides *what* the panel shows. This module owns the outputs that
//! carry it out: the controllable LED, the green/red status lights and the level display.
//!
//! Two backends exist for the indicators:
//! - `gpio`: real output pins through rppal
//! - `log`: every change is written to the log, for hosts without GPIO

pub mod console;
pub mod gpio;

use thiserror::Error;
use tracing::debug;

use crate::config::{IndicatorBackend, IndicatorConfig};
use crate::mqtt::level::LevelFrame;
use console::{ConsoleDisplay, LogIndicator};
use gpio::GpioIndicator;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("gpio error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// A single on/off output.
pub trait Indicator: Send {
    fn set(&mut self, on: bool);
}

/// Shows the icon and text of a level update.
pub trait LevelDisplay: Send {
    fn render(&mut self, frame: &LevelFrame);
}

/// State of the green and red status lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLights {
    pub green: bool,
    pub red: bool,
}

impl StatusLights {
    pub const STARTING: StatusLights = StatusLights {
        green: true,
        red: true,
    };
    /// Broker address known
    pub const LINKED: StatusLights = StatusLights {
        green: true,
        red: false,
    };
    pub const FAILED: StatusLights = StatusLights {
        green: false,
        red: true,
    };
    /// Loop left normally
    pub const STOPPED: StatusLights = StatusLights {
        green: false,
        red: true,
    };
}

pub struct Device {
    led: Box<dyn Indicator>,
    green: Box<dyn Indicator>,
    red: Box<dyn Indicator>,
    display: Box<dyn LevelDisplay>,
}

impl Device {
    pub fn from_config(config: &IndicatorConfig) -> Result<Self, DeviceError> {
        let display = Box::new(ConsoleDisplay::new());
        match config.backend {
            IndicatorBackend::Gpio => {
                debug!(
                    "Using gpio indicators (led {}, green {}, red {})",
                    config.led_pin, config.green_pin, config.red_pin
                );
                Ok(Self::with_sinks(
                    Box::new(GpioIndicator::new(config.led_pin)?),
                    Box::new(GpioIndicator::new(config.green_pin)?),
                    Box::new(GpioIndicator::new(config.red_pin)?),
                    display,
                ))
            }
            IndicatorBackend::Log => Ok(Self::with_sinks(
                Box::new(LogIndicator::new("led")),
                Box::new(LogIndicator::new("green")),
                Box::new(LogIndicator::new("red")),
                display,
            )),
        }
    }

    pub fn with_sinks(
        led: Box<dyn Indicator>,
        green: Box<dyn Indicator>,
        red: Box<dyn Indicator>,
        display: Box<dyn LevelDisplay>,
    ) -> Self {
        Self {
            led,
            green,
            red,
            display,
        }
    }

    pub fn set_led(&mut self, on: bool) {
        self.led.set(on);
    }

    pub fn set_status(&mut self, lights: StatusLights) {
        self.green.set(lights.green);
        self.red.set(lights.red);
    }

    pub fn render(&mut self, frame: &LevelFrame) {
        self.display.render(frame);
    }
}
