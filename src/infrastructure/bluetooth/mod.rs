//! Controller Protocol Module
//!
//! Speaks the Pro Controller HID protocol to a console over an already
//! connected interrupt channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     SessionServer                        │
//! │   (handshake / steady-state polling, one per console)    │
//! └──────┬──────────────────────┬──────────────────┬────────┘
//!        │                      │                  │
//!        ▼                      ▼                  ▼
//! ┌─────────────┐     ┌──────────────────┐   ┌────────────┐
//! │  Transport  │     │ SubcommandEngine │   │ ReportPool │
//! │             │     │                  │   │            │
//! │ - try_recv  │     │ - dispatch table │   │ - 50 / 363 │
//! │ - send      │     │ - SPI flash      │   │   buffers  │
//! │ - endpoints │     │ - MCU + CRC-8    │   │            │
//! └─────────────┘     └────────┬─────────┘   └────────────┘
//!                              ▼
//!                     ┌──────────────────┐
//!                     │ Report / Protocol│
//!                     │ (frame codec)    │
//!                     └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Report ids, subcommands, MCU commands and frame sizes
//! - [`report`] - Input and output report frames
//! - [`checksum`] - CRC-8 for MCU acknowledgements
//! - [`pool`] - Reusable input report buffers
//! - [`spi_flash`] - Canned SPI flash contents
//! - [`engine`] - Subcommand dispatch
//! - [`connection`] - Interrupt/control channel transport
//! - [`service`] - Session loop

pub mod checksum;
pub mod connection;
pub mod engine;
pub mod pool;
pub mod protocol;
pub mod report;
pub mod service;
pub mod spi_flash;

// Re-export main service for convenience
pub use service::{SessionConfig, SessionServer};
