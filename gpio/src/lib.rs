pub mod filter;
pub mod gpiod;
pub mod keypad;
pub mod mock;
pub mod raw;

use bitvec::vec::BitVec;
use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;
use thiserror::Error;

/// The operation that was attempted on a pin when an error occurred.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinOp {
    ConfigureInput,
    ConfigureOutput,
    Read,
    Write,
    Release,
}

impl Display for PinOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PinOp::ConfigureInput => "configure as input",
            PinOp::ConfigureOutput => "configure as output",
            PinOp::Read => "read",
            PinOp::Write => "write",
            PinOp::Release => "release",
        };
        f.write_str(name)
    }
}

/// The function a pin is currently configured for.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PinMode {
    #[default] Unconfigured,
    Input,
    Output,
}

impl Display for PinMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PinMode::Unconfigured => "unconfigured",
            PinMode::Input => "input",
            PinMode::Output => "output",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum PortError {
    /// The platform GPIO handle could not be acquired.
    #[error("GPIO port unavailable: {0}")]
    Unavailable(String),
    #[error("cannot {op} pin {pin}: pin is {mode}")]
    WrongMode { pin: usize, op: PinOp, mode: PinMode },
    #[error("pin {0} does not exist on this port")]
    InvalidPin(usize),
    #[error("cannot {op} pin {pin}: IO error: {kind}")]
    Io { pin: usize, op: PinOp, kind: std::io::ErrorKind },
}

impl PortError {
    pub fn io(pin: usize, op: PinOp, err: std::io::Error) -> Self {
        PortError::Io { pin, op, kind: err.kind() }
    }

    /// Gets the pin the error refers to, if any.
    pub fn pin(&self) -> Option<usize> {
        match self {
            PortError::WrongMode { pin, .. } | PortError::Io { pin, .. } => Some(*pin),
            PortError::InvalidPin(pin) => Some(*pin),
            PortError::Unavailable(_) => None,
        }
    }
}

pub type PortResult<T> = Result<T, PortError>;

/// Specifies the active level of a signal.
///
/// By default, the active level is high.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioActiveLevel {
    #[default] High,
    Low,
}

impl GpioActiveLevel {
    /// Gets the real state that will be present on the GPIO pin based on the active level and the value.
    pub fn get_state(&self, value: bool) -> bool {
        match self {
            GpioActiveLevel::High => value,
            GpioActiveLevel::Low => !value,
        }
    }

    /// Gets the bias that keeps an undriven input at the inactive level.
    pub fn idle_bias(&self) -> GpioBias {
        match self {
            GpioActiveLevel::High => GpioBias::PullDown,
            GpioActiveLevel::Low => GpioBias::PullUp,
        }
    }
}

/// Specifies the bias of the GPIO pin.
///
/// You can use this to enable pull-up or pull-down resistors.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBias {
    #[default] None,
    PullUp,
    PullDown,
}

impl GpioBias {
    /// Gets the level an input with this bias settles at when nothing drives it.
    pub fn resting_level(&self) -> bool {
        matches!(self, GpioBias::PullUp)
    }
}

/// Input noise filter.
///
/// A level change has to stay put for `steady` before it is reported.
/// After that, changes pass through unfiltered for `active`, then the filter re-arms.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NoiseFilter {
    pub steady: Duration,
    pub active: Duration,
}

impl NoiseFilter {
    pub fn new(steady: Duration, active: Duration) -> Self {
        Self { steady, active }
    }

    pub fn from_micros(steady: u64, active: u64) -> Self {
        Self::new(Duration::from_micros(steady), Duration::from_micros(active))
    }
}

/// A port of individually addressable digital lines.
///
/// Pins are identified by the platform's numbering (BCM on the Raspberry Pi).
pub trait GpioPort: Debug {
    /// Sets the pin to output mode and drives `level` on it.
    ///
    /// Calling this again on an output only changes the driven level.
    fn configure_output(&mut self, pin: usize, level: bool) -> PortResult<()>;

    /// Sets the pin to input mode with the given bias and optional noise filter.
    fn configure_input(
        &mut self,
        pin: usize,
        bias: GpioBias,
        filter: Option<NoiseFilter>,
    ) -> PortResult<()>;

    /// Drives `level` on a pin configured as output.
    ///
    /// # Errors
    /// - `PortError::WrongMode` if the pin is not an output.
    fn write(&mut self, pin: usize, level: bool) -> PortResult<()>;

    /// Reads the level of a pin configured as input.
    ///
    /// # Errors
    /// - `PortError::WrongMode` if the pin is not an input.
    fn read(&self, pin: usize) -> PortResult<bool>;

    /// Gets the current mode of the pin.
    fn pin_mode(&self, pin: usize) -> PinMode;

    /// Returns every configured pin to a floating input and forgets it.
    ///
    /// Calling this more than once is a no-op.
    fn release(&mut self) -> PortResult<()>;
}

/// Bookkeeping of which pins of a port are inputs and which are outputs.
#[derive(Debug, Clone)]
pub(crate) struct PinModes {
    inputs: BitVec,
    outputs: BitVec,
}

impl PinModes {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            inputs: BitVec::repeat(false, count),
            outputs: BitVec::repeat(false, count),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.inputs.len()
    }

    pub(crate) fn check_pin(&self, pin: usize) -> PortResult<()> {
        if pin >= self.count() {
            return Err(PortError::InvalidPin(pin));
        }
        Ok(())
    }

    pub(crate) fn mode(&self, pin: usize) -> PinMode {
        if pin >= self.count() {
            PinMode::Unconfigured
        } else if self.outputs[pin] {
            PinMode::Output
        } else if self.inputs[pin] {
            PinMode::Input
        } else {
            PinMode::Unconfigured
        }
    }

    pub(crate) fn set(&mut self, pin: usize, mode: PinMode) {
        self.inputs.set(pin, mode == PinMode::Input);
        self.outputs.set(pin, mode == PinMode::Output);
    }

    /// Fails with `PortError::WrongMode` unless the pin is in the `expected` mode.
    pub(crate) fn expect(&self, pin: usize, expected: PinMode, op: PinOp) -> PortResult<()> {
        self.check_pin(pin)?;
        let mode = self.mode(pin);
        if mode != expected {
            return Err(PortError::WrongMode { pin, op, mode });
        }
        Ok(())
    }

    /// Gets every pin that is currently configured, in ascending order.
    pub(crate) fn configured(&self) -> Vec<usize> {
        let mut pins: Vec<usize> = self.inputs.iter_ones().chain(self.outputs.iter_ones()).collect();
        pins.sort_unstable();
        pins
    }

    pub(crate) fn clear(&mut self) {
        self.inputs.fill(false);
        self.outputs.fill(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_level_bias_pairing() {
        assert_eq!(GpioActiveLevel::High.idle_bias(), GpioBias::PullDown);
        assert_eq!(GpioActiveLevel::Low.idle_bias(), GpioBias::PullUp);
        assert!(!GpioActiveLevel::High.idle_bias().resting_level());
        assert!(GpioActiveLevel::Low.idle_bias().resting_level());
    }

    #[test]
    fn test_pin_modes_expect() {
        let mut modes = PinModes::new(8);
        modes.set(3, PinMode::Output);
        modes.set(5, PinMode::Input);

        assert!(modes.expect(3, PinMode::Output, PinOp::Write).is_ok());
        assert_eq!(
            modes.expect(5, PinMode::Output, PinOp::Write),
            Err(PortError::WrongMode { pin: 5, op: PinOp::Write, mode: PinMode::Input })
        );
        assert_eq!(
            modes.expect(9, PinMode::Input, PinOp::Read),
            Err(PortError::InvalidPin(9))
        );
        assert_eq!(modes.configured(), vec![3, 5]);

        modes.clear();
        assert!(modes.configured().is_empty());
        assert_eq!(modes.mode(3), PinMode::Unconfigured);
    }

    #[test]
    fn test_error_message_names_pin_and_mode() {
        let err = PortError::WrongMode { pin: 17, op: PinOp::Read, mode: PinMode::Output };
        assert_eq!(err.to_string(), "cannot read pin 17: pin is output");
        assert_eq!(err.pin(), Some(17));
    }

    #[test]
    fn test_unavailable_has_no_pin() {
        let err = PortError::Unavailable("/dev/gpiomem: permission denied".to_string());
        assert_eq!(err.pin(), None);
        assert_eq!(err.to_string(), "GPIO port unavailable: /dev/gpiomem: permission denied");
    }
}
