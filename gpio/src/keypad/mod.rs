mod config;
mod key;
mod scanner;

use std::fmt::Debug;
use crate::PortResult;
pub use config::*;
pub use key::*;
pub use scanner::*;

/// The `Keypad` trait defines the interface for keypad input devices.
pub trait Keypad: Debug {
    type Key;

    /// Reads at most one key press. `None` when no key was pressed.
    fn poll_once(&mut self) -> PortResult<Option<Self::Key>>;

    /// Releases the hardware behind the keypad.
    fn shutdown(&mut self) -> PortResult<()>;
}
