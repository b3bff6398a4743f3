//! Pro Controller emulator
//!
//! Impersonates a Pro-style Bluetooth gamepad towards a game console. The
//! platform Bluetooth stack owns pairing and L2CAP; this crate takes the
//! connected HID interrupt channel and speaks the controller protocol on it.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod input_client;
pub mod input_worker;
