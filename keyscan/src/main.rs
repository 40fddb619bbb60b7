mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use dotenv::dotenv;
use eyre::WrapErr;
use log::{debug, info};
use sysinfo::System;
use keyscan_gpio::GpioPort;
use keyscan_gpio::gpiod::GpiodPort;
use keyscan_gpio::keypad::{Keypad, KeypadKey, KeypadScanner};
use keyscan_gpio::raw::RawGpioPort;
use crate::config::{Backend, Config};

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    const UNKNOWN_STR: &str = "???";

    info!("keyscan starting...");
    info!(
        "Host {} running {}, kernel {}",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR),
        System::long_os_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );

    let config = Config::from_env().wrap_err("Invalid configuration")?;
    info!(
        "Keypad @ Rows: {:?}, Cols: {:?}",
        config.scan.pins.rows(),
        config.scan.pins.cols()
    );
    debug!("{:?}", config);

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = interrupt.clone();
        ctrlc::set_handler(move || interrupt.store(true, Ordering::Relaxed))?;
    }

    debug!("Initializing {:?} backend...", config.backend);
    match &config.backend {
        Backend::GpioMem => run(
            KeypadScanner::open(RawGpioPort::open_gpiomem, config.scan),
            interrupt,
            config.poll_interval,
        ),
        Backend::Mem(base) => run(
            KeypadScanner::open(|| RawGpioPort::open_mem(*base), config.scan),
            interrupt,
            config.poll_interval,
        ),
        Backend::Gpiod(path) => run(
            KeypadScanner::open(|| GpiodPort::open(path), config.scan),
            interrupt,
            config.poll_interval,
        ),
    }
}

fn run<P: GpioPort>(
    scanner: keyscan_gpio::PortResult<KeypadScanner<P>>,
    interrupt: Arc<AtomicBool>,
    poll_interval: Duration,
) -> eyre::Result<()> {
    let mut scanner = scanner
        .wrap_err("Failed to initialize keypad")?
        .with_interrupt(interrupt.clone());
    debug!("{:?} initialized.", scanner);

    println!("Press keys on the keypad...");
    let result = poll_loop(&mut scanner, &interrupt, poll_interval);

    info!("Cleaning up...");
    scanner.shutdown().wrap_err("Failed to release keypad pins")?;
    result?;

    info!("Application stopped!");
    Ok(())
}

fn poll_loop(
    keypad: &mut impl Keypad<Key = KeypadKey>,
    interrupt: &AtomicBool,
    poll_interval: Duration,
) -> eyre::Result<()> {
    while !interrupt.load(Ordering::Relaxed) {
        if let Some(key) = keypad.poll_once().wrap_err("Keypad scan failed")? {
            println!("Key pressed: {}", key);
        }
        thread::sleep(poll_interval);
    }
    info!("Interrupt received.");
    Ok(())
}
