use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Represents the keys on a 4x4 keypad.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum KeypadKey {
    /// The `1` key.
    Key1,
    /// The `2` key.
    Key2,
    /// The `3` key.
    Key3,
    /// The `4` key.
    Key4,
    /// The `5` key.
    Key5,
    /// The `6` key.
    Key6,
    /// The `7` key.
    Key7,
    /// The `8` key.
    Key8,
    /// The `9` key.
    Key9,
    /// The `0` key.
    Key0,
    /// The `*` key.
    KeyAsterisk,
    /// The `#` key.
    KeyHash,
    /// The `A` key.
    KeyA,
    /// The `B` key.
    KeyB,
    /// The `C` key.
    KeyC,
    /// The `D` key.
    KeyD,
}

impl KeypadKey {
    /// Converts a character to its [KeypadKey], if there is one.
    pub fn from_char(c: char) -> Option<KeypadKey> {
        use KeypadKey::*;

        let key = match c.to_ascii_uppercase() {
            '1' => Key1,
            '2' => Key2,
            '3' => Key3,
            '4' => Key4,
            '5' => Key5,
            '6' => Key6,
            '7' => Key7,
            '8' => Key8,
            '9' => Key9,
            '0' => Key0,
            '*' => KeyAsterisk,
            '#' => KeyHash,
            'A' => KeyA,
            'B' => KeyB,
            'C' => KeyC,
            'D' => KeyD,
            _ => return None,
        };
        Some(key)
    }

    /// Converts the [KeypadKey] to its corresponding character.
    pub fn to_char(self) -> char {
        use KeypadKey::*;

        match self {
            Key1 => '1',
            Key2 => '2',
            Key3 => '3',
            Key4 => '4',
            Key5 => '5',
            Key6 => '6',
            Key7 => '7',
            Key8 => '8',
            Key9 => '9',
            Key0 => '0',
            KeyAsterisk => '*',
            KeyHash => '#',
            KeyA => 'A',
            KeyB => 'B',
            KeyC => 'C',
            KeyD => 'D',
        }
    }
}

impl Display for KeypadKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyMapError {
    #[error("{0:?} is not a keypad symbol")]
    UnknownSymbol(char),
}

/// Maps a (row, column) position of the matrix to the key printed there.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyMap {
    keys: [[KeypadKey; 4]; 4],
}

impl KeyMap {
    pub const fn new(keys: [[KeypadKey; 4]; 4]) -> Self {
        Self { keys }
    }

    /// Builds a key map from the characters printed on the keys, row by row.
    pub fn from_chars(chars: [[char; 4]; 4]) -> Result<Self, KeyMapError> {
        let mut keys = [[KeypadKey::Key0; 4]; 4];
        for (row, chars) in chars.iter().enumerate() {
            for (col, &c) in chars.iter().enumerate() {
                keys[row][col] = KeypadKey::from_char(c).ok_or(KeyMapError::UnknownSymbol(c))?;
            }
        }
        Ok(Self { keys })
    }

    /// Gets the key at a position, or `None` outside of the 4x4 grid.
    pub fn get(&self, row: usize, col: usize) -> Option<KeypadKey> {
        self.keys.get(row)?.get(col).copied()
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        use KeypadKey::*;

        KeyMap::new([
            [ Key1, Key2, Key3, KeyA, ],
            [ Key4, Key5, Key6, KeyB, ],
            [ Key7, Key8, Key9, KeyC, ],
            [ KeyAsterisk, Key0, KeyHash, KeyD, ],
        ])
    }
}

#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum PinAssignmentError {
    #[error("pin {0} is assigned more than once")]
    DuplicatePin(usize),
}

/// The pins the keypad's rows and columns are wired to.
///
/// Index `i` of `rows` is row `i` of the [KeyMap], and likewise for columns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinAssignment {
    rows: [usize; 4],
    cols: [usize; 4],
}

impl PinAssignment {
    /// Creates a pin assignment, making sure no pin is used twice.
    pub fn new(rows: [usize; 4], cols: [usize; 4]) -> Result<Self, PinAssignmentError> {
        let all = rows.iter().chain(cols.iter());
        for (i, pin) in all.clone().enumerate() {
            if all.clone().skip(i + 1).any(|other| other == pin) {
                return Err(PinAssignmentError::DuplicatePin(*pin));
            }
        }
        Ok(Self { rows, cols })
    }

    pub fn rows(&self) -> [usize; 4] {
        self.rows
    }

    pub fn cols(&self) -> [usize; 4] {
        self.cols
    }
}

impl Default for PinAssignment {
    fn default() -> Self {
        PinAssignment {
            rows: [18, 23, 24, 25],
            cols: [4, 17, 27, 22],
        }
    }
}
