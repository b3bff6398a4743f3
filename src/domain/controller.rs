//! Button state shared between the input side and the session loop.
//!
//! ```text
//! | Byte       | x01  | x02 | x04     | x08     | x10  | x20     | x40 | x80           |
//! |:----------:|:----:|:---:|:-------:|:-------:|:----:|:-------:|:---:|:-------------:|
//! | 0 (Right)  | Y    | X   | B       | A       | SR   | SL      | R   | ZR            |
//! | 1 (Shared) | -    | +   | R Stick | L Stick | Home | Capture | --  | Charging Grip |
//! | 2 (Left)   | Down | Up  | Right   | Left    | SR   | SL      | L   | ZL            |
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Y,
    X,
    B,
    A,
    R,
    ZR,
    Minus,
    Plus,
    RightStick,
    LeftStick,
    Home,
    Capture,
    ChargingGrip,
    Down,
    Up,
    Right,
    Left,
    L,
    ZL,
}

impl Button {
    pub const ALL: [Button; 19] = [
        Self::Y,
        Self::X,
        Self::B,
        Self::A,
        Self::R,
        Self::ZR,
        Self::Minus,
        Self::Plus,
        Self::RightStick,
        Self::LeftStick,
        Self::Home,
        Self::Capture,
        Self::ChargingGrip,
        Self::Down,
        Self::Up,
        Self::Right,
        Self::Left,
        Self::L,
        Self::ZL,
    ];

    /// (byte index, bit) of this button in the 3-byte bitmap
    pub fn position(&self) -> (usize, u8) {
        match self {
            Self::Y => (0, 0),
            Self::X => (0, 1),
            Self::B => (0, 2),
            Self::A => (0, 3),
            Self::R => (0, 6),
            Self::ZR => (0, 7),
            // Hardware report layout: Minus is bit 0, Plus bit 1. Some
            // community button maps list the two the other way round.
            Self::Minus => (1, 0),
            Self::Plus => (1, 1),
            Self::RightStick => (1, 2),
            Self::LeftStick => (1, 3),
            Self::Home => (1, 4),
            Self::Capture => (1, 5),
            Self::ChargingGrip => (1, 7),
            Self::Down => (2, 0),
            Self::Up => (2, 1),
            Self::Right => (2, 2),
            Self::Left => (2, 3),
            Self::L => (2, 6),
            Self::ZL => (2, 7),
        }
    }

    fn mask(&self) -> (usize, u8) {
        let (index, bit) = self.position();
        (index, 1 << bit)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Y => "Y",
            Self::X => "X",
            Self::B => "B",
            Self::A => "A",
            Self::R => "R",
            Self::ZR => "ZR",
            Self::Minus => "Minus",
            Self::Plus => "Plus",
            Self::RightStick => "RStick",
            Self::LeftStick => "LStick",
            Self::Home => "Home",
            Self::Capture => "Capture",
            Self::ChargingGrip => "ChargingGrip",
            Self::Down => "Down",
            Self::Up => "Up",
            Self::Right => "Right",
            Self::Left => "Left",
            Self::L => "L",
            Self::ZL => "ZL",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown button: {0}")]
pub struct UnknownButton(pub String);

impl FromStr for Button {
    type Err = UnknownButton;

    /// Case-insensitive; `+`/`-` are accepted for Plus/Minus
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        match name {
            "+" => return Ok(Self::Plus),
            "-" => return Ok(Self::Minus),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownButton(s.to_string()))
    }
}

/// Parse a list of button names, failing on the first unknown one
pub fn parse_buttons<S: AsRef<str>>(names: &[S]) -> Result<Vec<Button>, UnknownButton> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

/// Pressed-button bitmap plus a flag telling the session loop to push it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerState {
    buttons: [u8; 3],
    dirty: bool,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bits of `buttons`; already-held buttons stay held
    pub fn press(&mut self, buttons: &[Button]) {
        for button in buttons {
            let (index, mask) = button.mask();
            if self.buttons[index] & mask == 0 {
                self.buttons[index] |= mask;
                self.dirty = true;
            }
        }
    }

    /// Clear the bits of `buttons`; released buttons stay released
    pub fn release(&mut self, buttons: &[Button]) {
        for button in buttons {
            let (index, mask) = button.mask();
            if self.buttons[index] & mask != 0 {
                self.buttons[index] &= !mask;
                self.dirty = true;
            }
        }
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        let (index, mask) = button.mask();
        self.buttons[index] & mask != 0
    }

    pub fn buttons(&self) -> [u8; 3] {
        self.buttons
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Return the bitmap and clear the dirty flag
    pub fn dump(&mut self) -> [u8; 3] {
        self.dirty = false;
        self.buttons
    }
}

/// Cloneable handle to a [`ControllerState`] shared with the session loop
#[derive(Debug, Clone, Default)]
pub struct ControllerHandle {
    state: Arc<Mutex<ControllerState>>,
}

impl ControllerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, buttons: &[Button]) {
        self.state.lock().press(buttons);
    }

    pub fn release(&self, buttons: &[Button]) {
        self.state.lock().release(buttons);
    }

    pub fn snapshot(&self) -> ControllerState {
        self.state.lock().clone()
    }

    /// Read-and-clear in one critical section: the bitmap if it changed
    /// since the last call
    pub fn take_if_dirty(&self) -> Option<[u8; 3]> {
        let mut state = self.state.lock();
        state.is_dirty().then(|| state.dump())
    }
}
