//! GPIO port backed by the Linux GPIO character device, through the gpiod library.
use crate::filter::SoftNoiseFilter;
use crate::{GpioBias, GpioPort, NoiseFilter, PinMode, PinModes, PinOp, PortError, PortResult};
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::Path;

enum GpiodLine {
    Input {
        line: gpiod::Lines<gpiod::Input>,
        filter: Option<SoftNoiseFilter>,
    },
    Output(gpiod::Lines<gpiod::Output>),
}

/// GpiodPort requests one line of the chip per configured pin.
pub struct GpiodPort {
    chip: gpiod::Chip,
    modes: PinModes,
    lines: HashMap<usize, GpiodLine>,
}

impl GpiodPort {
    pub fn new(chip: gpiod::Chip) -> Self {
        let n = chip.num_lines() as usize;
        Self {
            chip,
            modes: PinModes::new(n),
            lines: HashMap::new(),
        }
    }

    /// Opens the chip at `path`, e.g. `/dev/gpiochip0`.
    pub fn open(path: impl AsRef<Path>) -> PortResult<Self> {
        let path = path.as_ref();
        let chip = gpiod::Chip::new(path)
            .map_err(|err| PortError::Unavailable(format!("{}: {}", path.display(), err)))?;
        Ok(Self::new(chip))
    }

    fn request_input(&self, pin: usize, bias: GpioBias) -> PortResult<gpiod::Lines<gpiod::Input>> {
        self.chip
            .request_lines(
                gpiod::Options::input([pin as u32])
                    .consumer(env!("CARGO_PKG_NAME"))
                    .bias(bias.into()),
            )
            .map_err(|err| PortError::io(pin, PinOp::ConfigureInput, err))
    }
}

impl Debug for GpiodPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodPort({})", self.chip.name())
    }
}

impl From<GpioBias> for gpiod::Bias {
    fn from(bias: GpioBias) -> Self {
        match bias {
            GpioBias::None => gpiod::Bias::Disable,
            GpioBias::PullUp => gpiod::Bias::PullUp,
            GpioBias::PullDown => gpiod::Bias::PullDown,
        }
    }
}

impl GpioPort for GpiodPort {
    fn configure_output(&mut self, pin: usize, level: bool) -> PortResult<()> {
        self.modes.check_pin(pin)?;

        if let Some(GpiodLine::Output(line)) = self.lines.get(&pin) {
            return line
                .set_values([level])
                .map_err(|err| PortError::io(pin, PinOp::ConfigureOutput, err));
        }

        // The kernel refuses a second request for a line we still hold.
        self.lines.remove(&pin);
        self.modes.set(pin, PinMode::Unconfigured);

        // The level goes in with the request so the line starts out at it.
        let line = self
            .chip
            .request_lines(
                gpiod::Options::output([pin as u32])
                    .values([level])
                    .consumer(env!("CARGO_PKG_NAME"))
                    .bias(gpiod::Bias::Disable),
            )
            .map_err(|err| PortError::io(pin, PinOp::ConfigureOutput, err))?;

        self.lines.insert(pin, GpiodLine::Output(line));
        self.modes.set(pin, PinMode::Output);
        Ok(())
    }

    fn configure_input(
        &mut self,
        pin: usize,
        bias: GpioBias,
        filter: Option<NoiseFilter>,
    ) -> PortResult<()> {
        self.modes.check_pin(pin)?;

        self.lines.remove(&pin);
        self.modes.set(pin, PinMode::Unconfigured);

        let line = self.request_input(pin, bias)?;
        self.lines.insert(
            pin,
            GpiodLine::Input {
                line,
                filter: filter.map(SoftNoiseFilter::new),
            },
        );
        self.modes.set(pin, PinMode::Input);
        Ok(())
    }

    fn write(&mut self, pin: usize, level: bool) -> PortResult<()> {
        self.modes.expect(pin, PinMode::Output, PinOp::Write)?;
        match self.lines.get(&pin) {
            Some(GpiodLine::Output(line)) => line
                .set_values([level])
                .map_err(|err| PortError::io(pin, PinOp::Write, err)),
            _ => Err(PortError::WrongMode { pin, op: PinOp::Write, mode: PinMode::Unconfigured }),
        }
    }

    fn read(&self, pin: usize) -> PortResult<bool> {
        self.modes.expect(pin, PinMode::Input, PinOp::Read)?;
        let Some(GpiodLine::Input { line, filter }) = self.lines.get(&pin) else {
            return Err(PortError::WrongMode { pin, op: PinOp::Read, mode: PinMode::Unconfigured });
        };

        let sample = || -> PortResult<bool> {
            let values = line
                .get_values([false])
                .map_err(|err| PortError::io(pin, PinOp::Read, err))?;
            Ok(values[0])
        };

        match filter {
            Some(filter) => filter.read(sample),
            None => sample(),
        }
    }

    fn pin_mode(&self, pin: usize) -> PinMode {
        self.modes.mode(pin)
    }

    fn release(&mut self) -> PortResult<()> {
        let pins = self.modes.configured();
        if pins.is_empty() {
            return Ok(());
        }
        debug!("Releasing pins {:?}", pins);

        let mut result = Ok(());
        for pin in pins {
            // Dropping the old handle first, then parking the line as a floating input.
            self.lines.remove(&pin);
            if let Err(err) = self.request_input(pin, GpioBias::None) {
                let err = match err {
                    PortError::Io { pin, kind, .. } => PortError::Io { pin, op: PinOp::Release, kind },
                    other => other,
                };
                result = result.and(Err(err));
            }
        }
        self.lines.clear();
        self.modes.clear();
        result
    }
}

impl Drop for GpiodPort {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to release {:?}: {}", self, err);
        }
    }
}
