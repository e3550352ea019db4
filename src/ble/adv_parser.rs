//! Advertising-data (AD structure) parsing.
//!
//! Each AD structure is `[len][type][payload; len - 1]`. A zero length or
//! a structure running past the end terminates parsing.

use heapless::String;

use crate::config::HID_SERVICE_UUID;

/// Incomplete / complete list of 16-bit service UUIDs.
const AD_INCOMPLETE_UUID16: u8 = 0x02;
const AD_COMPLETE_UUID16: u8 = 0x03;
/// Shortened / complete local name.
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;

/// Iterate `(ad_type, payload)` pairs of well-formed AD structures.
fn ad_structures(data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut i = 0;
    core::iter::from_fn(move || {
        let len = *data.get(i)? as usize;
        if len == 0 || i + len >= data.len() {
            return None;
        }
        let item = (data[i + 1], &data[i + 2..i + 1 + len]);
        i += len + 1;
        Some(item)
    })
}

/// Check if raw advertisement data contains the HID Service UUID (0x1812).
pub fn contains_hid_service_uuid(data: &[u8]) -> bool {
    let hid_uuid_le = HID_SERVICE_UUID.to_le_bytes();

    ad_structures(data)
        .filter(|(ad_type, _)| matches!(*ad_type, AD_INCOMPLETE_UUID16 | AD_COMPLETE_UUID16))
        .any(|(_, uuids)| uuids.chunks_exact(2).any(|chunk| chunk == hid_uuid_le))
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    let mut name = String::new();

    match ad_structures(data).find(|(ad_type, _)| matches!(*ad_type, AD_SHORT_NAME | AD_COMPLETE_NAME)) {
        Some((_, name_bytes)) => {
            for &b in name_bytes {
                if name.push(b as char).is_err() {
                    break;
                }
            }
        }
        None => {
            let _ = name.push_str("Unknown");
        }
    }
    name
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_hid_uuid_in_advertisement() {
        // AD structure: len=3, type=0x03 (Complete 16-bit UUIDs), UUID=0x1812
        let ad_data = [
            0x03, 0x03, 0x12, 0x18, // HID Service UUID in little-endian
        ];
        assert!(contains_hid_service_uuid(&ad_data));
    }

    #[test]
    fn no_hid_uuid_in_advertisement() {
        // Battery Service UUID (0x180F) instead
        let ad_data = [0x03, 0x03, 0x0F, 0x18];
        assert!(!contains_hid_service_uuid(&ad_data));
    }

    #[test]
    fn hid_uuid_among_multiple_uuids_after_flags() {
        let ad_data = [
            0x02, 0x01, 0x06, // Flags
            0x07, 0x03, // len=7, type=0x03 (Complete 16-bit UUIDs)
            0x0F, 0x18, // Battery
            0x12, 0x18, // HID - this should be found
            0x01, 0x18, // GATT
        ];
        assert!(contains_hid_service_uuid(&ad_data));
    }

    #[test]
    fn incomplete_uuid_list() {
        let ad_data = [0x03, 0x02, 0x12, 0x18];
        assert!(contains_hid_service_uuid(&ad_data));
    }

    #[test]
    fn malformed_lengths_stop_parsing() {
        assert!(!contains_hid_service_uuid(&[]));
        assert!(!contains_hid_service_uuid(&[0x00]));
        assert!(!contains_hid_service_uuid(&[0x05, 0x03, 0x12]));
    }

    #[test]
    fn extract_complete_local_name() {
        let ad_data = [
            0x09, 0x09, // len=9, type=0x09
            b'K', b'e', b'y', b'b', b'o', b'a', b'r', b'd',
        ];
        assert_eq!(extract_device_name(&ad_data).as_str(), "Keyboard");
    }

    #[test]
    fn extract_shortened_local_name() {
        let ad_data = [0x05, 0x08, b'B', b'T', b' ', b'K'];
        assert_eq!(extract_device_name(&ad_data).as_str(), "BT K");
    }

    #[test]
    fn no_name_in_advertisement() {
        let ad_data = [0x02, 0x01, 0x06];
        assert_eq!(extract_device_name(&ad_data).as_str(), "Unknown");
    }

    #[test]
    fn name_truncated_to_32_chars() {
        let mut ad_data = [0u8; 40];
        ad_data[0] = 35; // len
        ad_data[1] = 0x09; // Complete Local Name
        for b in &mut ad_data[2..37] {
            *b = b'X';
        }
        assert_eq!(extract_device_name(&ad_data).len(), 32);
    }
}
