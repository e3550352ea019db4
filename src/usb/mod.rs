//! USB Device subsystem - presents a boot keyboard to the host.
//!
//! [`sink`] holds the host-independent flow control (one report in flight,
//! bounded wait, drop accounting). With the `embedded` feature,
//! [`hid_device`] builds the embassy-usb composite device on the nRF52840
//! (HID keyboard + CDC-ACM operator console) and drives the endpoint.

#[cfg(feature = "embedded")]
pub mod hid_device;
pub mod sink;

pub use sink::{ActivitySignal, HostInterface, InFlightSlot, OutputSink, Statistics};
