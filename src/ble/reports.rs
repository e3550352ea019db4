//! Hand-off of raw notifications from the GATT callback to the bridging
//! loop.
//!
//! The channel outlives any single link, so whatever is still queued when
//! a link ends must be discarded before the next one starts forwarding.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::config::{MAX_RAW_REPORT_LEN, REPORT_HANDOFF_DEPTH};

/// One raw notification payload.
pub type RawReport = Vec<u8, MAX_RAW_REPORT_LEN>;

/// Notifications waiting for the Link Manager.
pub type ReportChannel = Channel<CriticalSectionRawMutex, RawReport, REPORT_HANDOFF_DEPTH>;

/// Drop every queued notification. Returns how many were dropped.
pub fn discard_stale(reports: &ReportChannel) -> usize {
    let mut dropped = 0;
    while reports.try_receive().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("discarded {} reports from a closed link", dropped);
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(key: u8) -> RawReport {
        Vec::from_slice(&[0, 0, key, 0, 0, 0, 0, 0]).unwrap()
    }

    #[test]
    fn discard_empties_a_full_channel() {
        let reports = ReportChannel::new();
        for key in 4..4 + REPORT_HANDOFF_DEPTH as u8 {
            reports.try_send(report(key)).unwrap();
        }
        assert!(reports.try_send(report(0x10)).is_err());

        assert_eq!(discard_stale(&reports), REPORT_HANDOFF_DEPTH);
        assert!(reports.try_receive().is_err());

        // The channel is usable again for the next link.
        reports.try_send(report(0x05)).unwrap();
        assert_eq!(reports.try_receive().unwrap(), report(0x05));
    }

    #[test]
    fn discard_on_empty_channel_is_harmless() {
        let reports = ReportChannel::new();
        assert_eq!(discard_stale(&reports), 0);
    }
}
