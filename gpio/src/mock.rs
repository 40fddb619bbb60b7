//! In-memory GPIO port that simulates a switch matrix.
//!
//! Useful for exercising scanners without hardware. A pressed key connects two pins;
//! an input reads the level of any output it is connected to that overrides the
//! input's bias, otherwise it reads its resting level.
//! Noise filters are recorded but not applied.

use crate::{GpioBias, GpioPort, NoiseFilter, PinMode, PinModes, PinOp, PortError, PortResult};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct MockPress {
    a: usize,
    b: usize,
    /// How many more conducting reads the key stays pressed for.
    remaining: Option<usize>,
}

impl MockPress {
    fn other(&self, pin: usize) -> Option<usize> {
        if self.a == pin {
            Some(self.b)
        } else if self.b == pin {
            Some(self.a)
        } else {
            None
        }
    }

    fn joins(&self, a: usize, b: usize) -> bool {
        (self.a == a && self.b == b) || (self.a == b && self.b == a)
    }
}

pub struct MockPort {
    modes: PinModes,
    levels: HashMap<usize, bool>,
    biases: HashMap<usize, GpioBias>,
    filters: HashMap<usize, NoiseFilter>,
    presses: RefCell<Vec<MockPress>>,
    failing: Cell<Option<(usize, std::io::ErrorKind)>>,
    writes: Vec<(usize, bool)>,
    reads: Cell<usize>,
    releases: usize,
}

impl MockPort {
    pub const PIN_COUNT: usize = 64;

    pub fn new() -> Self {
        Self {
            modes: PinModes::new(Self::PIN_COUNT),
            levels: HashMap::new(),
            biases: HashMap::new(),
            filters: HashMap::new(),
            presses: RefCell::new(Vec::new()),
            failing: Cell::new(None),
            writes: Vec::new(),
            reads: Cell::new(0),
            releases: 0,
        }
    }

    /// Holds down the key joining pins `a` and `b` until [MockPort::lift] is called.
    pub fn press(&self, a: usize, b: usize) {
        self.presses.borrow_mut().push(MockPress { a, b, remaining: None });
    }

    /// Holds down the key joining `a` and `b` for `reads` conducting reads, then lets go of it.
    /// Zero reads presses nothing.
    pub fn press_for(&self, a: usize, b: usize, reads: usize) {
        if reads == 0 {
            return;
        }
        self.presses.borrow_mut().push(MockPress { a, b, remaining: Some(reads) });
    }

    /// Lets go of the key joining `a` and `b`.
    pub fn lift(&self, a: usize, b: usize) {
        self.presses.borrow_mut().retain(|press| !press.joins(a, b));
    }

    pub fn is_pressed(&self, a: usize, b: usize) -> bool {
        self.presses.borrow().iter().any(|press| press.joins(a, b))
    }

    /// Makes every subsequent read or write of `pin` fail with an IO error.
    pub fn fail_pin(&self, pin: usize, kind: std::io::ErrorKind) {
        self.failing.set(Some((pin, kind)));
    }

    /// Gets the level currently driven on an output pin.
    pub fn output_level(&self, pin: usize) -> Option<bool> {
        match self.modes.mode(pin) {
            PinMode::Output => self.levels.get(&pin).copied(),
            _ => None,
        }
    }

    pub fn bias(&self, pin: usize) -> Option<GpioBias> {
        self.biases.get(&pin).copied()
    }

    pub fn noise_filter(&self, pin: usize) -> Option<NoiseFilter> {
        self.filters.get(&pin).copied()
    }

    /// Gets every level written so far, in order, including initial output levels.
    pub fn writes(&self) -> &[(usize, bool)] {
        &self.writes
    }

    pub fn read_count(&self) -> usize {
        self.reads.get()
    }

    /// Gets how many times a release actually changed pin state.
    pub fn release_count(&self) -> usize {
        self.releases
    }

    fn check_failing(&self, pin: usize, op: PinOp) -> PortResult<()> {
        match self.failing.get() {
            Some((failing, kind)) if failing == pin => Err(PortError::Io { pin, op, kind }),
            _ => Ok(()),
        }
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MockPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockPort({:?})", self.modes.configured())
    }
}

impl GpioPort for MockPort {
    fn configure_output(&mut self, pin: usize, level: bool) -> PortResult<()> {
        self.modes.check_pin(pin)?;
        self.check_failing(pin, PinOp::ConfigureOutput)?;
        self.modes.set(pin, PinMode::Output);
        self.biases.remove(&pin);
        self.filters.remove(&pin);
        self.levels.insert(pin, level);
        self.writes.push((pin, level));
        Ok(())
    }

    fn configure_input(
        &mut self,
        pin: usize,
        bias: GpioBias,
        filter: Option<NoiseFilter>,
    ) -> PortResult<()> {
        self.modes.check_pin(pin)?;
        self.check_failing(pin, PinOp::ConfigureInput)?;
        self.modes.set(pin, PinMode::Input);
        self.levels.remove(&pin);
        self.biases.insert(pin, bias);
        match filter {
            Some(filter) => self.filters.insert(pin, filter),
            None => self.filters.remove(&pin),
        };
        Ok(())
    }

    fn write(&mut self, pin: usize, level: bool) -> PortResult<()> {
        self.modes.expect(pin, PinMode::Output, PinOp::Write)?;
        self.check_failing(pin, PinOp::Write)?;
        self.levels.insert(pin, level);
        self.writes.push((pin, level));
        Ok(())
    }

    fn read(&self, pin: usize) -> PortResult<bool> {
        self.modes.expect(pin, PinMode::Input, PinOp::Read)?;
        self.check_failing(pin, PinOp::Read)?;
        self.reads.set(self.reads.get() + 1);

        let resting = self.bias(pin).unwrap_or_default().resting_level();
        let mut presses = self.presses.borrow_mut();

        let conducting = presses.iter().position(|press| {
            press.remaining != Some(0)
                && press
                    .other(pin)
                    .and_then(|other| self.output_level(other))
                    .is_some_and(|level| level != resting)
        });

        let Some(index) = conducting else {
            return Ok(resting);
        };

        let press = &mut presses[index];
        if let Some(remaining) = press.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                presses.remove(index);
            }
        }
        Ok(!resting)
    }

    fn pin_mode(&self, pin: usize) -> PinMode {
        self.modes.mode(pin)
    }

    fn release(&mut self) -> PortResult<()> {
        if self.modes.configured().is_empty() {
            return Ok(());
        }
        self.modes.clear();
        self.levels.clear();
        self.biases.clear();
        self.filters.clear();
        self.releases += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressed_key_conducts_driven_level() {
        let mut port = MockPort::new();
        port.configure_output(4, false).unwrap();
        port.configure_input(18, GpioBias::PullDown, None).unwrap();
        port.press(18, 4);

        assert_eq!(port.read(18), Ok(false));
        port.write(4, true).unwrap();
        assert_eq!(port.read(18), Ok(true));

        port.lift(4, 18);
        assert_eq!(port.read(18), Ok(false));
    }

    #[test]
    fn test_pull_up_reads_low_through_key() {
        let mut port = MockPort::new();
        port.configure_output(4, true).unwrap();
        port.configure_input(18, GpioBias::PullUp, None).unwrap();
        port.press(4, 18);

        assert_eq!(port.read(18), Ok(true));
        port.write(4, false).unwrap();
        assert_eq!(port.read(18), Ok(false));
    }

    #[test]
    fn test_press_for_lets_go_after_reads() {
        let mut port = MockPort::new();
        port.configure_output(4, true).unwrap();
        port.configure_input(18, GpioBias::PullDown, None).unwrap();
        port.press_for(4, 18, 2);

        assert_eq!(port.read(18), Ok(true));
        assert_eq!(port.read(18), Ok(true));
        assert_eq!(port.read(18), Ok(false));
        assert!(!port.is_pressed(4, 18));
    }

    #[test]
    fn test_press_for_zero_reads_presses_nothing() {
        let mut port = MockPort::new();
        port.configure_output(4, true).unwrap();
        port.configure_input(18, GpioBias::PullDown, None).unwrap();
        port.press_for(4, 18, 0);

        assert!(!port.is_pressed(4, 18));
        assert_eq!(port.read(18), Ok(false));
    }

    #[test]
    fn test_wrong_mode_is_reported() {
        let mut port = MockPort::new();
        port.configure_output(4, false).unwrap();

        assert_eq!(
            port.read(4),
            Err(PortError::WrongMode { pin: 4, op: PinOp::Read, mode: PinMode::Output })
        );
        assert_eq!(
            port.write(5, true),
            Err(PortError::WrongMode { pin: 5, op: PinOp::Write, mode: PinMode::Unconfigured })
        );
        assert_eq!(port.configure_output(64, false), Err(PortError::InvalidPin(64)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut port = MockPort::new();
        port.configure_output(4, true).unwrap();
        port.configure_input(18, GpioBias::PullDown, None).unwrap();

        assert_eq!(port.release(), Ok(()));
        assert_eq!(port.release(), Ok(()));
        assert_eq!(port.release_count(), 1);
        assert_eq!(port.pin_mode(4), PinMode::Unconfigured);
        assert_eq!(port.pin_mode(18), PinMode::Unconfigured);
    }
}
