//! Software noise filter for input lines.

use std::cell::Cell;
use std::fmt::{Debug, Formatter};
use std::hint::spin_loop;
use std::time::Instant;
use crate::{NoiseFilter, PortResult};

/// A stateful input filter that hides level changes shorter than [NoiseFilter::steady].
///
/// The filter is sampled, not clocked: it only runs when the line is read.
/// A read that sees a new level keeps sampling the line until the level has held for
/// the steady time, so a single read can take up to that long.
pub struct SoftNoiseFilter {
    filter: NoiseFilter,
    reported: Cell<Option<bool>>,
    open_until: Cell<Option<Instant>>,
}

impl SoftNoiseFilter {
    pub fn new(filter: NoiseFilter) -> Self {
        Self {
            filter,
            reported: Cell::new(None),
            open_until: Cell::new(None),
        }
    }

    /// Reads the line through the filter, calling `sample` for every raw sample.
    pub fn read(&self, mut sample: impl FnMut() -> PortResult<bool>) -> PortResult<bool> {
        let level = sample()?;

        let Some(reported) = self.reported.get() else {
            self.reported.set(Some(level));
            return Ok(level);
        };

        if level == reported {
            return Ok(level);
        }

        if self.open_until.get().is_some_and(|until| Instant::now() < until) {
            self.reported.set(Some(level));
            return Ok(level);
        }

        let since = Instant::now();
        while since.elapsed() < self.filter.steady {
            if sample()? != level {
                // Glitch
                return Ok(reported);
            }
            spin_loop();
        }

        self.reported.set(Some(level));
        self.open_until.set(Some(Instant::now() + self.filter.active));
        Ok(level)
    }
}

impl Debug for SoftNoiseFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SoftNoiseFilter({:?}/{:?}, {:?})",
            self.filter.steady, self.filter.active, self.reported.get()
        )
    }
}
