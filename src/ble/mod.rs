//! Bluetooth Low Energy subsystem.
//!
//! The bridge runs in **Central** role against exactly one keyboard:
//!
//! 1. **Link Manager** ([`link`]) - owns the connection lifecycle
//!    (scan → connect → secure → discover → ready) and forwards input
//!    reports through the translator into the USB sink.
//! 2. **Pairing** ([`pairing`]) - answers security-manager challenges as a
//!    display-only device and clears bonds on request.
//! 3. **Advertisement parsing** ([`adv_parser`]) - HID service filter and
//!    device names.
//!
//! The wireless stack itself sits behind [`LinkControl`]. With the
//! `embedded` feature, [`central`] implements it on the Nordic SoftDevice
//! S140 and [`bonder`] adapts the SoftDevice security callbacks.

pub mod adv_parser;
#[cfg(feature = "embedded")]
pub mod bonder;
#[cfg(feature = "embedded")]
pub mod central;
pub mod link;
pub mod pairing;
pub mod reports;

use core::fmt;

use heapless::String;

use crate::config;
use crate::error::LinkError;

pub use link::{LinkManager, LinkState};

/// A BLE device address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    /// Address bytes, least-significant first (air order).
    pub bytes: [u8; 6],
    /// Random (static/private) rather than public address.
    pub random: bool,
}

impl PeerAddress {
    pub const fn new(bytes: [u8; 6], random: bool) -> Self {
        Self { bytes, random }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ({})",
            b[5],
            b[4],
            b[3],
            b[2],
            b[1],
            b[0],
            if self.random { "random" } else { "public" }
        )
    }
}

/// A peripheral seen while scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Candidate {
    /// BLE address.
    pub address: PeerAddress,
    /// Human-readable name (truncated to 32 bytes for `heapless::String`).
    pub name: String<32>,
    /// Received Signal Strength Indicator (dBm).
    pub rssi: i8,
    /// Advertising as connectable.
    pub connectable: bool,
}

impl Candidate {
    /// Build a candidate from raw advertisement data.
    ///
    /// Returns `None` unless the advertisement lists the HID service.
    pub fn from_advertisement(
        address: PeerAddress,
        rssi: i8,
        connectable: bool,
        data: &[u8],
    ) -> Option<Self> {
        if !adv_parser::contains_hid_service_uuid(data) {
            return None;
        }
        Some(Self {
            address,
            name: adv_parser::extract_device_name(data),
            rssi,
            connectable,
        })
    }
}

/// Connection parameters requested after connecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    /// Minimum connection interval (1.25 ms units).
    pub interval_min: u16,
    /// Maximum connection interval (1.25 ms units).
    pub interval_max: u16,
    /// Peripheral latency (connection events).
    pub latency: u16,
    /// Supervision timeout (10 ms units).
    pub timeout: u16,
}

impl ConnParams {
    /// 7.5-15 ms interval, no latency, 4 s supervision timeout.
    pub const LOW_LATENCY: Self = Self {
        interval_min: config::BLE_CONN_INTERVAL_MIN,
        interval_max: config::BLE_CONN_INTERVAL_MAX,
        latency: config::BLE_SLAVE_LATENCY,
        timeout: config::BLE_SUP_TIMEOUT,
    };
}

/// LE security levels (Bluetooth Core Vol 3, Part C, 10.2.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityLevel {
    /// Level 1: no encryption.
    Open,
    /// Level 2: encrypted, unauthenticated pairing.
    Encrypted,
    /// Level 3: encrypted, authenticated (MITM-protected) pairing.
    Authenticated,
    /// Level 4: authenticated LE Secure Connections.
    SecureConnections,
}

/// HID report characteristic types (Report Reference descriptor).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportKind {
    Input,
    Output,
    Feature,
}

/// One report characteristic found by HID service discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReportInfo {
    /// Attribute handle of the report value.
    pub handle: u16,
    /// Report ID from the Report Reference descriptor (0 = none).
    pub id: u8,
    pub kind: ReportKind,
    /// Report size in bytes, when known.
    pub size: u8,
}

/// Why the discovery procedure ended without a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryFailure {
    /// The peer has no HID service.
    NotFound,
    /// The GATT procedure failed with a stack error code.
    Error(u32),
}

/// HCI reason codes used when the bridge drops a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    /// 0x05 - pairing or encryption failed.
    AuthenticationFailure,
    /// 0x13 - ordinary local teardown.
    RemoteUserTerminated,
}

impl DisconnectReason {
    pub const fn hci_code(self) -> u8 {
        match self {
            DisconnectReason::AuthenticationFailure => 0x05,
            DisconnectReason::RemoteUserTerminated => 0x13,
        }
    }
}

/// Requests the Link Manager makes of the wireless stack.
///
/// Every call is a non-blocking request; outcomes come back later through
/// the Link Manager's `on_*` event methods.
pub trait LinkControl {
    /// Opaque reference to an established link. Two handles compare equal
    /// only when they refer to the same link.
    type Peer: Clone + PartialEq;

    /// Begin scanning for advertisers of the 16-bit `service` UUID.
    fn start_scan(&mut self, service: u16) -> Result<(), LinkError>;

    fn stop_scan(&mut self);

    /// Initiate a connection to `candidate`.
    fn connect(&mut self, candidate: &Candidate, params: &ConnParams) -> Result<(), LinkError>;

    fn request_conn_params(&mut self, peer: &Self::Peer, params: &ConnParams)
        -> Result<(), LinkError>;

    fn request_security(&mut self, peer: &Self::Peer, level: SecurityLevel)
        -> Result<(), LinkError>;

    /// Start GATT discovery of the 16-bit `service` UUID.
    fn discover(&mut self, peer: &Self::Peer, service: u16) -> Result<(), LinkError>;

    /// Enable notifications on one input report.
    fn subscribe(&mut self, peer: &Self::Peer, report: &ReportInfo) -> Result<(), LinkError>;

    fn disconnect(&mut self, peer: &Self::Peer, reason: DisconnectReason) -> Result<(), LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn candidate_requires_hid_service() {
        let addr = PeerAddress::new([1, 2, 3, 4, 5, 6], true);
        let hid = [0x03, 0x03, 0x12, 0x18, 0x04, 0x09, b'K', b'b', b'd'];
        let battery = [0x03, 0x03, 0x0F, 0x18, 0x04, 0x09, b'K', b'b', b'd'];

        let c = Candidate::from_advertisement(addr, -40, true, &hid).unwrap();
        assert_eq!(c.name.as_str(), "Kbd");
        assert_eq!(c.rssi, -40);
        assert!(c.connectable);

        assert!(Candidate::from_advertisement(addr, -40, true, &battery).is_none());
    }

    #[test]
    fn peer_address_displays_msb_first() {
        let addr = PeerAddress::new([0x01, 0x02, 0x03, 0x04, 0x05, 0xC6], true);
        assert_eq!(addr.to_string(), "C6:05:04:03:02:01 (random)");
    }

    #[test]
    fn low_latency_params_match_config() {
        let p = ConnParams::LOW_LATENCY;
        assert_eq!((p.interval_min, p.interval_max), (6, 12));
        assert_eq!((p.latency, p.timeout), (0, 400));
    }

    #[test]
    fn disconnect_reasons_map_to_hci_codes() {
        assert_eq!(DisconnectReason::AuthenticationFailure.hci_code(), 0x05);
        assert_eq!(DisconnectReason::RemoteUserTerminated.hci_code(), 0x13);
    }
}
