pub mod controller;
pub mod mcu;
pub mod models;
pub mod nfc;
pub mod session;
pub mod settings;
