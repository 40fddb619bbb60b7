use std::time::Duration;
use crate::{GpioActiveLevel, GpioBias, NoiseFilter};
use crate::keypad::{KeyMap, PinAssignment};

/// Which set of matrix lines is driven during a scan. The other set is sensed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DriverLines {
    Rows,
    #[default] Columns,
}

/// How a candidate press is confirmed before it is reported.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfirmPolicy {
    /// Waits for the given time, then checks that the key still reads as pressed.
    SettleDelay(Duration),
    /// Busy-waits until the key is released and reports it then.
    ///
    /// `settle` is an optional pause between detecting the press and starting to wait.
    ReleaseWait { settle: Option<Duration> },
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        ConfirmPolicy::ReleaseWait { settle: None }
    }
}

/// Everything a [KeypadScanner](crate::keypad::KeypadScanner) needs to know about the wiring and timing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanConfig {
    pub pins: PinAssignment,
    pub key_map: KeyMap,
    pub driver_lines: DriverLines,
    /// The level a pressed key puts on a sense line.
    pub active_level: GpioActiveLevel,
    pub confirm: ConfirmPolicy,
    pub noise_filter: Option<NoiseFilter>,
    /// Minimum spacing between two reported key presses.
    pub cool_down: Duration,
}

impl ScanConfig {
    pub const DEFAULT_COOL_DOWN: Duration = Duration::from_millis(30);

    pub fn new(pins: PinAssignment, key_map: KeyMap) -> Self {
        Self {
            pins,
            key_map,
            driver_lines: DriverLines::default(),
            active_level: GpioActiveLevel::default(),
            confirm: ConfirmPolicy::default(),
            noise_filter: None,
            cool_down: Self::DEFAULT_COOL_DOWN,
        }
    }

    pub fn with_driver_lines(mut self, driver_lines: DriverLines) -> Self {
        self.driver_lines = driver_lines;
        self
    }

    pub fn with_active_level(mut self, active_level: GpioActiveLevel) -> Self {
        self.active_level = active_level;
        self
    }

    pub fn with_confirm(mut self, confirm: ConfirmPolicy) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_noise_filter(mut self, noise_filter: Option<NoiseFilter>) -> Self {
        self.noise_filter = noise_filter;
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    /// Gets the driver pins, in scan order.
    pub fn driver_pins(&self) -> [usize; 4] {
        match self.driver_lines {
            DriverLines::Rows => self.pins.rows(),
            DriverLines::Columns => self.pins.cols(),
        }
    }

    /// Gets the sense pins, in scan order.
    pub fn sense_pins(&self) -> [usize; 4] {
        match self.driver_lines {
            DriverLines::Rows => self.pins.cols(),
            DriverLines::Columns => self.pins.rows(),
        }
    }

    pub fn sense_bias(&self) -> GpioBias {
        self.active_level.idle_bias()
    }

    /// Converts a (driver, sense) index pair to a (row, column) position of the key map.
    pub fn position(&self, driver: usize, sense: usize) -> (usize, usize) {
        match self.driver_lines {
            DriverLines::Rows => (driver, sense),
            DriverLines::Columns => (sense, driver),
        }
    }
}

impl Default for ScanConfig {
    /// The wiring and timing of the reference keypad build: columns driven high,
    /// rows pulled down, release-wait confirmation.
    fn default() -> Self {
        ScanConfig::new(PinAssignment::default(), KeyMap::default())
    }
}
