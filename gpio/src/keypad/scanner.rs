use std::fmt::{Debug, Formatter};
use std::hint::spin_loop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};
use bitvec::array::BitArray;
use log::{debug, trace, warn};
use crate::{GpioPort, PortError, PortResult};
use crate::keypad::{ConfirmPolicy, Keypad, KeypadKey, ScanConfig};

/// The debounce state of a [KeypadScanner].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebounceState {
    /// No press is being tracked.
    Idle,
    /// A sense line read as active and the press is waiting for confirmation.
    CandidateDetected {
        driver: usize,
        sense: usize,
        key: KeypadKey,
        since: Instant,
    },
    /// The last candidate was reported.
    Confirmed(KeypadKey),
    /// The last candidate went away before it was confirmed.
    Rejected,
}

/// The outcome of a non-blocking [KeypadScanner::try_poll].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScanStatus {
    Idle,
    /// A key is down but not confirmed yet. Poll again.
    Pending(KeypadKey),
    Pressed(KeypadKey),
}

/// Levels seen on the sense lines while one driver line was asserted.
struct ScanState {
    driver: usize,
    levels: [Option<bool>; 4],
}

enum LineScan {
    Quiet,
    Cancelled,
    Candidate(KeypadKey),
    Pressed(KeypadKey),
}

/// Scans a 4x4 matrix keypad over a [GpioPort].
///
/// One driver line at a time is asserted and all sense lines are read; the first active
/// sense line, in driver-then-sense index order, is the pressed key. Simultaneous presses
/// beyond the first are ignored.
///
/// The scanner owns the port and releases it on [KeypadScanner::shutdown] or when dropped.
pub struct KeypadScanner<P: GpioPort> {
    port: P,
    config: ScanConfig,
    state: DebounceState,
    /// Confirmed presses not seen released yet, indexed by `driver * 4 + sense`.
    held: BitArray<[u16; 1]>,
    last_event: Option<Instant>,
    interrupt: Option<Arc<AtomicBool>>,
    released: bool,
}

impl<P: GpioPort> KeypadScanner<P> {
    /// Configures the keypad lines on `port`.
    ///
    /// Driver lines become outputs at their inactive level, sense lines become inputs
    /// biased towards the inactive level.
    pub fn new(mut port: P, config: ScanConfig) -> PortResult<Self> {
        let inactive = config.active_level.get_state(false);
        for pin in config.driver_pins() {
            port.configure_output(pin, inactive)?;
        }
        for pin in config.sense_pins() {
            port.configure_input(pin, config.sense_bias(), config.noise_filter)?;
        }

        debug!(
            "Keypad configured on {:?}: drivers {:?}, sense {:?}, active {:?}, {:?}",
            port,
            config.driver_pins(),
            config.sense_pins(),
            config.active_level,
            config.confirm,
        );

        Ok(KeypadScanner {
            port,
            config,
            state: DebounceState::Idle,
            held: BitArray::ZERO,
            last_event: None,
            interrupt: None,
            released: false,
        })
    }

    /// Acquires the port with `acquire` and configures the keypad on it.
    ///
    /// # Errors
    /// - `PortError::Unavailable` if the port could not be acquired. No pin is touched in that case.
    /// - Any error from configuring the pins.
    pub fn open(acquire: impl FnOnce() -> PortResult<P>, config: ScanConfig) -> PortResult<Self> {
        let port = acquire().map_err(|err| match err {
            PortError::Unavailable(_) => err,
            other => PortError::Unavailable(other.to_string()),
        })?;
        Self::new(port, config)
    }

    /// Lets `interrupt` abort a release wait. Once it is set, no new sweeps are started.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Sweeps the whole matrix once and returns the first confirmed key.
    ///
    /// With [ConfirmPolicy::ReleaseWait] this blocks, spinning on the sense line, until the
    /// key is let go of. Nothing else runs on the calling thread in the meantime.
    ///
    /// Returns `None` while the cool-down after the previous key runs.
    pub fn poll_once(&mut self) -> PortResult<Option<KeypadKey>> {
        self.finish_event();
        if self.interrupted() || self.cooling_down() {
            return Ok(None);
        }

        let outcome = self.sweep(true).inspect_err(|_| self.state = DebounceState::Idle)?;
        match outcome {
            LineScan::Pressed(key) => Ok(Some(key)),
            LineScan::Quiet | LineScan::Cancelled | LineScan::Candidate(_) => Ok(None),
        }
    }

    /// Non-blocking variant of [KeypadScanner::poll_once].
    ///
    /// The first call that sees a key returns [ScanStatus::Pending] right away. Later calls only
    /// re-check that key until it is confirmed (and [ScanStatus::Pressed] is returned) or rejected.
    pub fn try_poll(&mut self) -> PortResult<ScanStatus> {
        if let DebounceState::CandidateDetected { driver, sense, key, since } = self.state {
            return self.recheck(driver, sense, key, since);
        }

        self.finish_event();
        if self.interrupted() || self.cooling_down() {
            return Ok(ScanStatus::Idle);
        }

        let outcome = self.sweep(false).inspect_err(|_| self.state = DebounceState::Idle)?;
        match outcome {
            LineScan::Candidate(key) => Ok(ScanStatus::Pending(key)),
            LineScan::Quiet | LineScan::Cancelled | LineScan::Pressed(_) => Ok(ScanStatus::Idle),
        }
    }

    /// Releases every keypad pin. Only the first call has an effect.
    pub fn shutdown(&mut self) -> PortResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.state = DebounceState::Idle;
        debug!("Releasing keypad on {:?}", self.port);
        self.port.release()
    }

    /// Confirmed and rejected candidates only last until the next poll.
    fn finish_event(&mut self) {
        self.state = DebounceState::Idle;
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|interrupt| interrupt.load(Ordering::Relaxed))
    }

    fn cooling_down(&self) -> bool {
        self.last_event
            .is_some_and(|last| last.elapsed() < self.config.cool_down)
    }

    fn settle_time(&self) -> Duration {
        match self.config.confirm {
            ConfirmPolicy::SettleDelay(settle) => settle,
            ConfirmPolicy::ReleaseWait { settle } => settle.unwrap_or_default(),
        }
    }

    fn drive(&mut self, driver: usize, active: bool) -> PortResult<()> {
        let pin = self.config.driver_pins()[driver];
        self.port.write(pin, self.config.active_level.get_state(active))
    }

    /// Reads a sense line, returning whether it is at the active level.
    fn sense(&self, sense: usize) -> PortResult<bool> {
        let pin = self.config.sense_pins()[sense];
        Ok(self.port.read(pin)? == self.config.active_level.get_state(true))
    }

    /// Runs `f` with the driver line asserted. The line is deasserted again on every path.
    fn with_driver<T>(
        &mut self,
        driver: usize,
        f: impl FnOnce(&mut Self) -> PortResult<T>,
    ) -> PortResult<T> {
        self.drive(driver, true)?;
        let result = f(self);
        let restored = self.drive(driver, false);
        let value = result?;
        restored?;
        Ok(value)
    }

    fn sweep(&mut self, confirm: bool) -> PortResult<LineScan> {
        for driver in 0..4 {
            match self.with_driver(driver, |this| this.scan_line(driver, confirm))? {
                LineScan::Quiet => continue,
                outcome => return Ok(outcome),
            }
        }
        Ok(LineScan::Quiet)
    }

    fn scan_line(&mut self, driver: usize, confirm: bool) -> PortResult<LineScan> {
        let mut scan = ScanState { driver, levels: [None; 4] };
        let mut outcome = LineScan::Quiet;

        for sense in 0..4 {
            let active = self.sense(sense)?;
            scan.levels[sense] = Some(active);
            if !active {
                self.held.set(driver * 4 + sense, false);
                continue;
            }

            // Still down since it was reported.
            if self.held[driver * 4 + sense] {
                continue;
            }

            let (row, col) = self.config.position(driver, sense);
            let Some(key) = self.config.key_map.get(row, col) else {
                continue;
            };

            debug!("Candidate {} at row {}, column {}", key, row, col);
            self.state = DebounceState::CandidateDetected {
                driver,
                sense,
                key,
                since: Instant::now(),
            };

            if !confirm {
                outcome = LineScan::Candidate(key);
                break;
            }

            outcome = self.confirm(driver, sense, key)?;
            if !matches!(outcome, LineScan::Quiet) {
                break;
            }
        }

        trace!("Driver line {}: {:?}", scan.driver, scan.levels);
        Ok(outcome)
    }

    /// Confirms a candidate while its driver line is asserted, blocking as the policy requires.
    fn confirm(&mut self, driver: usize, sense: usize, key: KeypadKey) -> PortResult<LineScan> {
        match self.config.confirm {
            ConfirmPolicy::SettleDelay(settle) => {
                sleep(settle);
                if self.sense(sense)? {
                    Ok(self.confirmed(key, Some((driver, sense))))
                } else {
                    self.rejected(key);
                    Ok(LineScan::Quiet)
                }
            }
            ConfirmPolicy::ReleaseWait { settle } => {
                if let Some(settle) = settle {
                    sleep(settle);
                }
                while self.sense(sense)? {
                    if self.interrupted() {
                        debug!("Release wait for {} interrupted", key);
                        self.state = DebounceState::Idle;
                        return Ok(LineScan::Cancelled);
                    }
                    spin_loop();
                }
                Ok(self.confirmed(key, None))
            }
        }
    }

    fn recheck(
        &mut self,
        driver: usize,
        sense: usize,
        key: KeypadKey,
        since: Instant,
    ) -> PortResult<ScanStatus> {
        if since.elapsed() < self.settle_time() {
            return Ok(ScanStatus::Pending(key));
        }

        let active = self.with_driver(driver, |this| this.sense(sense))?;
        let status = match (self.config.confirm, active) {
            (ConfirmPolicy::ReleaseWait { .. }, true) => ScanStatus::Pending(key),
            (ConfirmPolicy::ReleaseWait { .. }, false) => {
                self.confirmed(key, None);
                ScanStatus::Pressed(key)
            }
            (ConfirmPolicy::SettleDelay(_), true) => {
                self.confirmed(key, Some((driver, sense)));
                ScanStatus::Pressed(key)
            }
            (ConfirmPolicy::SettleDelay(_), false) => {
                self.rejected(key);
                ScanStatus::Idle
            }
        };
        Ok(status)
    }

    fn confirmed(&mut self, key: KeypadKey, latch: Option<(usize, usize)>) -> LineScan {
        debug!("Key {} confirmed", key);
        self.state = DebounceState::Confirmed(key);
        if let Some((driver, sense)) = latch {
            self.held.set(driver * 4 + sense, true);
        }
        self.last_event = Some(Instant::now());
        LineScan::Pressed(key)
    }

    fn rejected(&mut self, key: KeypadKey) {
        debug!("Candidate {} rejected as noise", key);
        self.state = DebounceState::Rejected;
    }
}

impl<P: GpioPort> Debug for KeypadScanner<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "KeypadScanner({:?}, {:?}, {:?})",
            self.port,
            self.config.driver_pins(),
            self.config.sense_pins()
        )
    }
}

impl<P: GpioPort> Keypad for KeypadScanner<P> {
    type Key = KeypadKey;

    fn poll_once(&mut self) -> PortResult<Option<KeypadKey>> {
        KeypadScanner::poll_once(self)
    }

    fn shutdown(&mut self) -> PortResult<()> {
        KeypadScanner::shutdown(self)
    }
}

impl<P: GpioPort> Drop for KeypadScanner<P> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("Failed to release {:?}: {}", self, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;
    use crate::{GpioBias, NoiseFilter, PinMode};

    fn scanner(config: ScanConfig) -> KeypadScanner<MockPort> {
        KeypadScanner::new(MockPort::new(), config.with_cool_down(Duration::ZERO)).unwrap()
    }

    #[test]
    fn test_new_configures_lines() {
        let config = ScanConfig::default()
            .with_noise_filter(Some(NoiseFilter::from_micros(50_000, 500_000)));
        let scanner = KeypadScanner::new(MockPort::new(), config).unwrap();
        let port = scanner.port();

        for pin in [4, 17, 27, 22] {
            assert_eq!(port.pin_mode(pin), PinMode::Output);
            assert_eq!(port.output_level(pin), Some(false));
        }
        for pin in [18, 23, 24, 25] {
            assert_eq!(port.pin_mode(pin), PinMode::Input);
            assert_eq!(port.bias(pin), Some(GpioBias::PullDown));
            assert_eq!(port.noise_filter(pin), Some(NoiseFilter::from_micros(50_000, 500_000)));
        }
    }

    #[test]
    fn test_confirmed_state_after_press() {
        let mut scanner = scanner(ScanConfig::default());
        scanner.port().press_for(18, 17, 3);

        assert_eq!(scanner.poll_once(), Ok(Some(KeypadKey::Key2)));
        assert_eq!(scanner.state(), DebounceState::Confirmed(KeypadKey::Key2));

        assert_eq!(scanner.poll_once(), Ok(None));
        assert_eq!(scanner.state(), DebounceState::Idle);
    }

    #[test]
    fn test_settle_delay_rejects_bounce() {
        let mut scanner = scanner(
            ScanConfig::default().with_confirm(ConfirmPolicy::SettleDelay(Duration::from_millis(1))),
        );
        // Gone after the first read.
        scanner.port().press_for(23, 4, 1);

        assert_eq!(scanner.poll_once(), Ok(None));
        assert_eq!(scanner.state(), DebounceState::Rejected);
    }

    #[test]
    fn test_settle_delay_latches_held_key() {
        let mut scanner = scanner(
            ScanConfig::default().with_confirm(ConfirmPolicy::SettleDelay(Duration::from_millis(1))),
        );
        scanner.port().press(24, 27);

        assert_eq!(scanner.poll_once(), Ok(Some(KeypadKey::Key9)));
        assert_eq!(scanner.poll_once(), Ok(None));
        assert_eq!(scanner.poll_once(), Ok(None));

        scanner.port().lift(24, 27);
        assert_eq!(scanner.poll_once(), Ok(None));

        scanner.port().press(24, 27);
        assert_eq!(scanner.poll_once(), Ok(Some(KeypadKey::Key9)));
    }

    #[test]
    fn test_cool_down_suppresses_sweeps() {
        let mut scanner = KeypadScanner::new(
            MockPort::new(),
            ScanConfig::default().with_cool_down(Duration::from_secs(60)),
        )
        .unwrap();
        scanner.port().press_for(25, 22, 1);
        assert_eq!(scanner.poll_once(), Ok(Some(KeypadKey::KeyD)));

        scanner.port().press(25, 22);
        let reads = scanner.port().read_count();
        assert_eq!(scanner.poll_once(), Ok(None));
        assert_eq!(scanner.port().read_count(), reads);
    }

    #[test]
    fn test_try_poll_release_wait() {
        let mut scanner = scanner(ScanConfig::default());
        scanner.port().press(23, 27);

        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Pending(KeypadKey::Key6)));
        assert!(matches!(scanner.state(), DebounceState::CandidateDetected { key: KeypadKey::Key6, .. }));
        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Pending(KeypadKey::Key6)));
        // The driver line is only asserted while the key is re-checked.
        assert_eq!(scanner.port().output_level(27), Some(false));

        scanner.port().lift(23, 27);
        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Pressed(KeypadKey::Key6)));
        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Idle));
    }

    #[test]
    fn test_try_poll_settle_delay() {
        let mut scanner = scanner(
            ScanConfig::default().with_confirm(ConfirmPolicy::SettleDelay(Duration::from_millis(5))),
        );
        scanner.port().press(18, 4);

        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Pending(KeypadKey::Key1)));
        sleep(Duration::from_millis(10));
        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Pressed(KeypadKey::Key1)));
        // Still held.
        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Idle));

        scanner.port().lift(18, 4);
        scanner.port().press(23, 4);
        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Pending(KeypadKey::Key4)));
        scanner.port().lift(23, 4);
        sleep(Duration::from_millis(10));
        assert_eq!(scanner.try_poll(), Ok(ScanStatus::Idle));
        assert_eq!(scanner.state(), DebounceState::Rejected);
    }

    #[test]
    fn test_interrupt_aborts_release_wait() {
        let interrupt = Arc::new(AtomicBool::new(true));
        let mut scanner = scanner(ScanConfig::default()).with_interrupt(interrupt.clone());
        scanner.port().press(18, 4);

        assert_eq!(scanner.poll_once(), Ok(None));
        assert_eq!(scanner.port().read_count(), 0);

        // Interrupt raised while the key is already held.
        interrupt.store(false, Ordering::Relaxed);
        let flag = interrupt.clone();
        let handle = std::thread::spawn(move || {
            sleep(Duration::from_millis(20));
            flag.store(true, Ordering::Relaxed);
        });
        assert_eq!(scanner.poll_once(), Ok(None));
        handle.join().unwrap();

        assert_eq!(scanner.port().output_level(4), Some(false));
        assert_eq!(scanner.state(), DebounceState::Idle);
    }

    #[test]
    fn test_shutdown_releases_once() {
        let mut scanner = scanner(ScanConfig::default());
        scanner.shutdown().unwrap();
        scanner.shutdown().unwrap();
        assert_eq!(scanner.port().release_count(), 1);
        assert_eq!(scanner.port().pin_mode(4), PinMode::Unconfigured);
    }
}
