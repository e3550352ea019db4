//! Unified error type for the bridge.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (feature `defmt`) for efficient on-target logging.

use core::fmt;

/// Top-level error type used across the bridging pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Host (USB)
    /// The host interface has not finished enumeration/configuration.
    NotReady,

    /// The previous report did not complete within the send timeout.
    Busy,

    /// The host driver rejected the endpoint write.
    HostWrite,

    // Link (BLE)
    /// No link exists to act on.
    NotConnected,

    /// The wireless stack reported a failure.
    Link(LinkError),
}

/// Subset of link-layer errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// Raw error code from the stack.
    Raw(u32),
    /// Scan could not start.
    ScanFailed,
    /// Connection attempt failed.
    ConnectFailed,
    /// Encryption/pairing could not be established.
    SecurityFailed,
    /// GATT discovery failed or the HID service is missing.
    DiscoveryFailed,
    /// Enabling notifications on a report failed.
    SubscribeFailed,
    /// The stack refused the disconnect request.
    DisconnectFailed,
}

// Convenience conversions

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Error::Link(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotReady => f.write_str("host interface not ready"),
            Error::Busy => f.write_str("host interface busy"),
            Error::HostWrite => f.write_str("host endpoint write failed"),
            Error::NotConnected => f.write_str("not connected"),
            Error::Link(e) => write!(f, "link failure: {:?}", e),
        }
    }
}
