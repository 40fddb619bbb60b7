use std::path::PathBuf;
use std::time::Duration;
use keyscan_gpio::keypad::{ConfirmPolicy, DriverLines, KeyMap, PinAssignment, ScanConfig};
use keyscan_gpio::raw::RawGpioPort;
use keyscan_gpio::{GpioActiveLevel, NoiseFilter};

/// Where the GPIO port comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Backend {
    /// `/dev/gpiomem`
    GpioMem,
    /// `/dev/mem`, at the given GPIO base address.
    Mem(u64),
    /// A GPIO character device.
    Gpiod(PathBuf),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub backend: Backend,
    pub scan: ScanConfig,
    pub poll_interval: Duration,
}

impl Config {
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
    const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

    /// Reads the configuration from the environment (and `.env`, if loaded).
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|name| dotenv::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let backend = match var("KEYSCAN_BACKEND").as_deref().map(str::trim) {
            None | Some("gpiomem") => Backend::GpioMem,
            Some("mem") => {
                let base = match var("KEYSCAN_GPIO_BASE") {
                    Some(base) => parse_address(&base)?,
                    None => RawGpioPort::GPIO_BASE_BCM2711,
                };
                Backend::Mem(base)
            }
            Some("gpiod") => Backend::Gpiod(
                var("KEYSCAN_GPIOCHIP").unwrap_or_else(|| "/dev/gpiochip0".to_string()).into(),
            ),
            Some(other) => eyre::bail!("Unknown backend {:?}", other),
        };

        let defaults = PinAssignment::default();
        let rows = var("KEYSCAN_PINS_ROWS")
            .map(|rows| parse_pin_bus(&rows))
            .transpose()?
            .unwrap_or(defaults.rows());
        let cols = var("KEYSCAN_PINS_COLS")
            .map(|cols| parse_pin_bus(&cols))
            .transpose()?
            .unwrap_or(defaults.cols());
        let pins = PinAssignment::new(rows, cols)?;

        let driver_lines = match var("KEYSCAN_DRIVE").as_deref().map(str::trim) {
            None | Some("cols") => DriverLines::Columns,
            Some("rows") => DriverLines::Rows,
            Some(other) => eyre::bail!("KEYSCAN_DRIVE must be rows or cols, not {:?}", other),
        };

        let active_level = match var("KEYSCAN_ACTIVE").as_deref().map(str::trim) {
            None | Some("high") => GpioActiveLevel::High,
            Some("low") => GpioActiveLevel::Low,
            Some(other) => eyre::bail!("KEYSCAN_ACTIVE must be high or low, not {:?}", other),
        };

        let settle = var("KEYSCAN_SETTLE_MS").map(|ms| parse_millis(&ms)).transpose()?;
        let confirm = match var("KEYSCAN_CONFIRM").as_deref().map(str::trim) {
            None | Some("release") => ConfirmPolicy::ReleaseWait { settle },
            Some("settle") => ConfirmPolicy::SettleDelay(settle.unwrap_or(Self::DEFAULT_SETTLE)),
            Some(other) => eyre::bail!("KEYSCAN_CONFIRM must be release or settle, not {:?}", other),
        };

        let noise_filter = var("KEYSCAN_NOISE_FILTER_US")
            .map(|filter| parse_noise_filter(&filter))
            .transpose()?;

        let cool_down = var("KEYSCAN_COOLDOWN_MS")
            .map(|ms| parse_millis(&ms))
            .transpose()?
            .unwrap_or(ScanConfig::DEFAULT_COOL_DOWN);

        let poll_interval = var("KEYSCAN_POLL_MS")
            .map(|ms| parse_millis(&ms))
            .transpose()?
            .unwrap_or(Self::DEFAULT_POLL_INTERVAL);

        let scan = ScanConfig::new(pins, KeyMap::default())
            .with_driver_lines(driver_lines)
            .with_active_level(active_level)
            .with_confirm(confirm)
            .with_noise_filter(noise_filter)
            .with_cool_down(cool_down);

        Ok(Config { backend, scan, poll_interval })
    }
}

fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

pub fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    split_list(pin_str)
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Expected exactly 4 pins in {:?}", pin_str))
}

fn parse_millis(s: &str) -> eyre::Result<Duration> {
    Ok(Duration::from_millis(s.trim().parse()?))
}

fn parse_noise_filter(s: &str) -> eyre::Result<NoiseFilter> {
    let [steady, active]: [u64; 2] = split_list(s)
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Expected steady and active microseconds in {:?}", s))?;
    Ok(NoiseFilter::from_micros(steady, active))
}

fn parse_address(s: &str) -> eyre::Result<u64> {
    let s = s.trim();
    let address = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> eyre::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_match_reference_wiring() {
        let config = config(&[]).unwrap();
        assert_eq!(config.backend, Backend::GpioMem);
        assert_eq!(config.scan, ScanConfig::default());
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_full_configuration() {
        let config = config(&[
            ("KEYSCAN_BACKEND", "gpiod"),
            ("KEYSCAN_GPIOCHIP", "/dev/gpiochip4"),
            ("KEYSCAN_PINS_ROWS", "5, 6, 13, 19"),
            ("KEYSCAN_PINS_COLS", "12;16;20;21"),
            ("KEYSCAN_DRIVE", "rows"),
            ("KEYSCAN_ACTIVE", "low"),
            ("KEYSCAN_CONFIRM", "settle"),
            ("KEYSCAN_SETTLE_MS", "25"),
            ("KEYSCAN_NOISE_FILTER_US", "50000,500000"),
            ("KEYSCAN_COOLDOWN_MS", "100"),
            ("KEYSCAN_POLL_MS", "20"),
        ])
        .unwrap();

        assert_eq!(config.backend, Backend::Gpiod("/dev/gpiochip4".into()));
        assert_eq!(config.scan.pins.rows(), [5, 6, 13, 19]);
        assert_eq!(config.scan.pins.cols(), [12, 16, 20, 21]);
        assert_eq!(config.scan.driver_lines, DriverLines::Rows);
        assert_eq!(config.scan.active_level, GpioActiveLevel::Low);
        assert_eq!(config.scan.confirm, ConfirmPolicy::SettleDelay(Duration::from_millis(25)));
        assert_eq!(config.scan.noise_filter, Some(NoiseFilter::from_micros(50_000, 500_000)));
        assert_eq!(config.scan.cool_down, Duration::from_millis(100));
        assert_eq!(config.poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_mem_backend_base_address() {
        let pi3 = config(&[("KEYSCAN_BACKEND", "mem"), ("KEYSCAN_GPIO_BASE", "0x3F200000")]).unwrap();
        assert_eq!(pi3.backend, Backend::Mem(0x3F200000));

        let pi4 = config(&[("KEYSCAN_BACKEND", "mem")]).unwrap();
        assert_eq!(pi4.backend, Backend::Mem(RawGpioPort::GPIO_BASE_BCM2711));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config(&[("KEYSCAN_PINS_ROWS", "1,2,3")]).is_err());
        assert!(config(&[("KEYSCAN_PINS_COLS", "18,19,20,21")]).is_err());
        assert!(config(&[("KEYSCAN_ACTIVE", "sideways")]).is_err());
        assert!(config(&[("KEYSCAN_BACKEND", "spi")]).is_err());
        assert!(config(&[("KEYSCAN_NOISE_FILTER_US", "50000")]).is_err());
    }

    #[test]
    fn test_parse_pin_bus() {
        assert_eq!(parse_pin_bus("4 17 27 22").unwrap(), [4, 17, 27, 22]);
        assert!(parse_pin_bus("4, x, 27, 22").is_err());
    }
}
