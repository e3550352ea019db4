//! Peripheral report → canonical report translation.
//!
//! Keyboards deliver input reports in one of two shapes:
//!
//! ```text
//! Boot   (8 bytes):  [modifier][reserved][k0][k1][k2][k3][k4][k5]
//! Bitmap (15 bytes): [modifier][reserved][b0 .. b12]
//!                    bit n of b[i] set => keycode i*8+n held
//! ```
//!
//! Anything else is forwarded best-effort (truncated or zero-padded to
//! 8 bytes) rather than dropped.

use super::keyboard::{CanonicalReport, KEYBOARD_REPORT_SIZE};

/// Length of a bitmap (NKRO-style) report.
pub const BITMAP_REPORT_SIZE: usize = 15;

/// Bytes of per-keycode presence bits in a bitmap report (104 keycodes).
pub const BITMAP_KEY_BYTES: usize = 13;

/// Keycodes 0..=3 are the "no event"/error-rollover range and are never
/// forwarded from a bitmap.
pub const FIRST_FORWARDED_KEYCODE: u8 = 4;

/// Report shape, decided by length alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportEncoding {
    Boot,
    Bitmap,
    Other(usize),
}

impl ReportEncoding {
    pub fn classify(raw: &[u8]) -> Self {
        match raw.len() {
            KEYBOARD_REPORT_SIZE => ReportEncoding::Boot,
            BITMAP_REPORT_SIZE => ReportEncoding::Bitmap,
            len => ReportEncoding::Other(len),
        }
    }
}

/// Translate one raw peripheral report into exactly one canonical report.
pub fn translate(raw: &[u8]) -> CanonicalReport {
    match ReportEncoding::classify(raw) {
        ReportEncoding::Boot => copy_prefix(raw),
        ReportEncoding::Bitmap => from_bitmap(raw),
        ReportEncoding::Other(len) => {
            warn!(
                "unexpected report length {} (expected {} or {}), forwarding best-effort",
                len,
                KEYBOARD_REPORT_SIZE,
                BITMAP_REPORT_SIZE
            );
            copy_prefix(raw)
        }
    }
}

fn copy_prefix(raw: &[u8]) -> CanonicalReport {
    let mut bytes = [0u8; KEYBOARD_REPORT_SIZE];
    let n = raw.len().min(KEYBOARD_REPORT_SIZE);
    bytes[..n].copy_from_slice(&raw[..n]);
    CanonicalReport::from_bytes(&bytes)
}

fn from_bitmap(raw: &[u8]) -> CanonicalReport {
    let mut report = CanonicalReport {
        modifier: raw[0],
        ..CanonicalReport::EMPTY
    };

    let bitmap = &raw[2..2 + BITMAP_KEY_BYTES];
    'scan: for (byte_index, &byte) in bitmap.iter().enumerate() {
        if byte == 0 {
            continue;
        }
        for bit in 0..8u8 {
            if byte & (1 << bit) == 0 {
                continue;
            }
            let keycode = byte_index as u8 * 8 + bit;
            if keycode < FIRST_FORWARDED_KEYCODE {
                continue;
            }
            // Boot format holds 6 keys; the rest are dropped.
            if !report.push_key(keycode) {
                break 'scan;
            }
        }
    }

    report
}
