use crate::filter::SoftNoiseFilter;
use crate::{GpioBias, GpioPort, NoiseFilter, PinMode, PinModes, PinOp, PortError, PortResult};
use log::{debug, warn};
use memmap2::{MmapOptions, MmapRaw};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::fs::{self, OpenOptions};
use std::thread;
use std::time::Duration;

/// How the SoC sets the pull resistors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PullControl {
    /// One `GPIO_PUP_PDN_CNTRL` field per pin (BCM2711).
    Direct,
    /// The `GPPUD` + `GPPUDCLK` clocking sequence (BCM2835, BCM2836, BCM2837).
    Clocked,
}

impl PullControl {
    /// Picks the pull control for a GPIO block mapped at `gpio_base`.
    pub fn for_base(gpio_base: u64) -> Self {
        match gpio_base {
            RawGpioPort::GPIO_BASE_BCM2711 => PullControl::Direct,
            _ => PullControl::Clocked,
        }
    }

    /// Picks the pull control from a device tree `compatible` list.
    pub fn from_compatible(compatible: &str) -> Option<Self> {
        compatible
            .split('\0')
            .find_map(|entry| match entry.trim() {
                "brcm,bcm2711" => Some(PullControl::Direct),
                "brcm,bcm2835" | "brcm,bcm2836" | "brcm,bcm2837" => Some(PullControl::Clocked),
                _ => None,
            })
    }

    fn detect() -> Self {
        let compatible = fs::read_to_string("/proc/device-tree/compatible").unwrap_or_default();
        PullControl::from_compatible(&compatible).unwrap_or_else(|| {
            warn!("Unknown SoC {:?}, assuming BCM2711 pull registers", compatible);
            PullControl::Direct
        })
    }

    /// Gets the register value that selects `bias`.
    fn bits(self, bias: GpioBias) -> u32 {
        match (self, bias) {
            (_, GpioBias::None) => 0b00,
            (PullControl::Direct, GpioBias::PullUp) => 0b01,
            (PullControl::Direct, GpioBias::PullDown) => 0b10,
            (PullControl::Clocked, GpioBias::PullDown) => 0b01,
            (PullControl::Clocked, GpioBias::PullUp) => 0b10,
        }
    }
}

/// GPIO port that drives the BCM GPIO registers directly through a memory mapping.
pub struct RawGpioPort {
    mmap: MmapRaw,
    pull: PullControl,
    modes: PinModes,
    filters: HashMap<usize, SoftNoiseFilter>,
}

impl RawGpioPort {
    /// Physical base of the GPIO block on the BCM2711 (Raspberry Pi 4).
    pub const GPIO_BASE_BCM2711: u64 = 0xFE200000;
    /// Physical base of the GPIO block on the BCM2836 and BCM2837 (Raspberry Pi 2 and 3).
    pub const GPIO_BASE_BCM2837: u64 = 0x3F200000;
    /// Physical base of the GPIO block on the BCM2835 (Raspberry Pi 1 and Zero).
    pub const GPIO_BASE_BCM2835: u64 = 0x20200000;

    const PIN_COUNT: usize = 58;

    fn create(path: &str, offset: u64, pull: PullControl) -> PortResult<Self> {
        let unavailable = |err: std::io::Error| PortError::Unavailable(format!("{path}: {err}"));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(unavailable)?;

        let mmap = MmapOptions::new()
            .offset(offset)
            .len(4096)
            .map_raw(&file)
            .map_err(unavailable)?;

        debug!("Mapped GPIO registers from {} at {:#x}, {:?} pulls", path, offset, pull);

        Ok(Self::with_mapping(mmap, pull))
    }

    fn with_mapping(mmap: MmapRaw, pull: PullControl) -> Self {
        RawGpioPort {
            mmap,
            pull,
            modes: PinModes::new(Self::PIN_COUNT),
            filters: HashMap::new(),
        }
    }

    /// Opens the GPIO-only mapping exposed by the kernel. Does not require root.
    ///
    /// The pull control is picked from the device tree.
    pub fn open_gpiomem() -> PortResult<Self> {
        Self::create("/dev/gpiomem", 0, PullControl::detect())
    }

    /// Opens the GPIO block through `/dev/mem` at the given physical base.
    pub fn open_mem(gpio_base: u64) -> PortResult<Self> {
        Self::create("/dev/mem", gpio_base, PullControl::for_base(gpio_base))
    }

    pub fn pull_control(&self) -> PullControl {
        self.pull
    }

    fn register(&self, offset: usize) -> *mut u32 {
        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        unsafe { mmap.add(offset / 4) }
    }

    fn raw_set_pin_function(&self, pin_index: usize, function: u8) {
        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        // GPFSELn register
        let register_ptr = unsafe { mmap.add(pin_index / 10) };
        let shift = (pin_index % 10) * 3;

        let mut register_value = unsafe { register_ptr.read_volatile() };
        register_value &= !(0b111 << shift);
        register_value |= (function as u32) << shift;
        unsafe { register_ptr.write_volatile(register_value) };
    }

    fn raw_set_pin_output(&self, pin_index: usize, high: bool) {
        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        // GPSETn/GPCLRn register
        let register_ptr = unsafe { mmap.add(if high { 0x1c / 4 } else { 0x28 / 4 } + pin_index / 32) };
        let shift = pin_index % 32;

        unsafe { register_ptr.write_volatile(1 << shift) };
    }

    fn raw_get_pin_level(&self, pin_index: usize) -> bool {
        let mmap = self.mmap.as_ptr() as *const u32;
        // GPLEVn register
        let register_ptr = unsafe { mmap.add((0x34 / 4) + pin_index / 32) };
        let shift = pin_index % 32;

        let register_value = unsafe { register_ptr.read_volatile() };
        (register_value >> shift) & 1 != 0
    }

    fn raw_set_bias(&self, pin_index: usize, bias: GpioBias) {
        let bias_value = self.pull.bits(bias);

        match self.pull {
            PullControl::Direct => {
                // GPIO_PUP_PDN_CNTRL_REGn register (yes that is a long name)
                let register_ptr = self.register(0xE4 + (pin_index / 16) * 4);
                let shift = (pin_index % 16) * 2;
                let mut register_value = unsafe { register_ptr.read_volatile() };
                register_value &= !(0b11 << shift);
                register_value |= bias_value << shift;

                unsafe { register_ptr.write_volatile(register_value) };
            }
            PullControl::Clocked => {
                // GPPUD, then GPPUDCLKn, each held for at least 150 cycles
                let pud = self.register(0x94);
                let clock = self.register(0x98 + (pin_index / 32) * 4);

                unsafe { pud.write_volatile(bias_value) };
                thread::sleep(Duration::from_micros(5));
                unsafe { clock.write_volatile(1 << (pin_index % 32)) };
                thread::sleep(Duration::from_micros(5));
                unsafe { pud.write_volatile(0) };
                unsafe { clock.write_volatile(0) };
            }
        }
    }

    fn raw_reset(&self, pin_index: usize) {
        self.raw_set_pin_function(pin_index, 0);
        self.raw_set_bias(pin_index, GpioBias::None);
    }
}

impl Debug for RawGpioPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawGpioPort({:?}, {:?})", self.mmap.as_ptr().addr(), self.pull)
    }
}

impl GpioPort for RawGpioPort {
    fn configure_output(&mut self, pin: usize, level: bool) -> PortResult<()> {
        self.modes.check_pin(pin)?;
        self.filters.remove(&pin);

        // Latch the level first so the pin never glitches to the other one.
        self.raw_set_pin_output(pin, level);
        if self.modes.mode(pin) != PinMode::Output {
            self.raw_set_bias(pin, GpioBias::None);
            self.raw_set_pin_function(pin, 1);
            self.modes.set(pin, PinMode::Output);
        }
        Ok(())
    }

    fn configure_input(
        &mut self,
        pin: usize,
        bias: GpioBias,
        filter: Option<NoiseFilter>,
    ) -> PortResult<()> {
        self.modes.check_pin(pin)?;

        self.raw_set_pin_function(pin, 0);
        self.raw_set_bias(pin, bias);
        self.modes.set(pin, PinMode::Input);

        match filter {
            Some(filter) => {
                self.filters.insert(pin, SoftNoiseFilter::new(filter));
            }
            None => {
                self.filters.remove(&pin);
            }
        }
        Ok(())
    }

    fn write(&mut self, pin: usize, level: bool) -> PortResult<()> {
        self.modes.expect(pin, PinMode::Output, PinOp::Write)?;
        self.raw_set_pin_output(pin, level);
        Ok(())
    }

    fn read(&self, pin: usize) -> PortResult<bool> {
        self.modes.expect(pin, PinMode::Input, PinOp::Read)?;
        match self.filters.get(&pin) {
            Some(filter) => filter.read(|| Ok(self.raw_get_pin_level(pin))),
            None => Ok(self.raw_get_pin_level(pin)),
        }
    }

    fn pin_mode(&self, pin: usize) -> PinMode {
        self.modes.mode(pin)
    }

    fn release(&mut self) -> PortResult<()> {
        let pins = self.modes.configured();
        if !pins.is_empty() {
            debug!("Releasing pins {:?}", pins);
        }
        for pin in pins {
            self.raw_reset(pin);
        }
        self.modes.clear();
        self.filters.clear();
        Ok(())
    }
}

impl Drop for RawGpioPort {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to release {:?}: {}", self, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memmap2::MmapOptions;

    fn anonymous(pull: PullControl) -> RawGpioPort {
        let mmap = MmapOptions::new().len(4096).map_anon().unwrap();
        RawGpioPort::with_mapping(mmap.into(), pull)
    }

    fn word(port: &RawGpioPort, offset: usize) -> u32 {
        unsafe { port.register(offset).read_volatile() }
    }

    #[test]
    fn test_pull_control_from_base() {
        assert_eq!(PullControl::for_base(RawGpioPort::GPIO_BASE_BCM2711), PullControl::Direct);
        assert_eq!(PullControl::for_base(RawGpioPort::GPIO_BASE_BCM2837), PullControl::Clocked);
        assert_eq!(PullControl::for_base(RawGpioPort::GPIO_BASE_BCM2835), PullControl::Clocked);
    }

    #[test]
    fn test_pull_control_from_device_tree() {
        assert_eq!(
            PullControl::from_compatible("raspberrypi,4-model-b\0brcm,bcm2711\0"),
            Some(PullControl::Direct)
        );
        assert_eq!(
            PullControl::from_compatible("raspberrypi,3-model-b\0brcm,bcm2837\0"),
            Some(PullControl::Clocked)
        );
        assert_eq!(
            PullControl::from_compatible("raspberrypi,model-zero-w\0brcm,bcm2835\0"),
            Some(PullControl::Clocked)
        );
        assert_eq!(PullControl::from_compatible(""), None);
    }

    #[test]
    fn test_pull_encodings_differ() {
        assert_eq!(PullControl::Direct.bits(GpioBias::PullDown), 0b10);
        assert_eq!(PullControl::Clocked.bits(GpioBias::PullDown), 0b01);
        assert_eq!(PullControl::Direct.bits(GpioBias::PullUp), 0b01);
        assert_eq!(PullControl::Clocked.bits(GpioBias::PullUp), 0b10);
        assert_eq!(PullControl::Clocked.bits(GpioBias::None), 0);
    }

    #[test]
    fn test_direct_pull_sets_pin_field() {
        let mut port = anonymous(PullControl::Direct);
        port.configure_input(18, GpioBias::PullDown, None).unwrap();

        // Pin 18 is field 2 of GPIO_PUP_PDN_CNTRL_REG1
        assert_eq!(word(&port, 0xE4 + 4), 0b10 << 4);
        assert_eq!(port.pin_mode(18), PinMode::Input);
    }

    #[test]
    fn test_clocked_pull_leaves_direct_registers_alone() {
        let mut port = anonymous(PullControl::Clocked);
        port.configure_input(18, GpioBias::PullDown, None).unwrap();

        assert_eq!(word(&port, 0xE4), 0);
        assert_eq!(word(&port, 0xE4 + 4), 0);
        // The sequence ends with both control registers cleared.
        assert_eq!(word(&port, 0x94), 0);
        assert_eq!(word(&port, 0x98), 0);
    }

    #[test]
    fn test_output_latches_level_before_function() {
        let mut port = anonymous(PullControl::Direct);
        port.configure_output(4, true).unwrap();

        assert_eq!(word(&port, 0x1c), 1 << 4);
        // GPFSEL0, pin 4 set to output
        assert_eq!((word(&port, 0) >> 12) & 0b111, 1);
    }
}
