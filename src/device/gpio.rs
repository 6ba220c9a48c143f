//! Indicators on Raspberry Pi output pins.

use rppal::gpio::{Gpio, OutputPin};
use tracing::debug;

use super::{DeviceError, Indicator};

pub struct GpioIndicator {
    pin: OutputPin,
}

impl GpioIndicator {
    /// Claims BCM pin `pin` as an output, starting low.
    pub fn new(pin: u8) -> Result<Self, DeviceError> {
        let mut pin = Gpio::new()?.get(pin)?.into_output();
        pin.set_low();
        debug!("Claimed gpio {}", pin.pin());
        Ok(Self { pin })
    }
}

impl Indicator for GpioIndicator {
    fn set(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}
