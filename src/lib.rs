//! BLE keyboard to USB HID bridge.
//!
//! The bridge connects to one Bluetooth LE keyboard as a Central, and
//! re-emits every key report to a USB host as a standard boot keyboard.
//!
//! ```text
//!  BLE keyboard ──notify──▶ LinkManager ──▶ translate ──▶ OutputSink ──▶ USB host
//!                               │                                        ▲
//!                       PairingAuthenticator                   write completion
//! ```
//!
//! Everything outside the `embedded` feature is plain `no_std` logic
//! behind small traits ([`ble::LinkControl`], [`usb::HostInterface`],
//! [`ble::pairing::BondStore`], [`ui::OperatorChannel`]) and runs in host
//! tests: `cargo test`.
//!
//! The firmware image is `cargo build --release --features embedded
//! --target thumbv7em-none-eabihf` (nRF52840 + SoftDevice S140).

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod hid;
pub mod ui;
pub mod usb;

pub use error::{Error, LinkError};
