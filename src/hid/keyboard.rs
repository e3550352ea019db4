//! Canonical keyboard report, as sent to the USB host.
//!
//! ```text
//! [0]    modifiers  LCtrl LShift LAlt LGUI RCtrl RShift RAlt RGUI (bit 0..7)
//! [1]    reserved
//! [2..8] keycodes   6 slots, 0 = empty
//! ```

/// Keyboard report size in bytes.
pub const KEYBOARD_REPORT_SIZE: usize = 8;

/// Number of keycode slots in a boot report.
pub const KEY_SLOTS: usize = 6;

/// The bridge's single output representation: a boot-protocol keyboard
/// report.
///
/// Occupied keycode slots are always packed from slot 0 upwards.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanonicalReport {
    /// Modifier bits, left Ctrl in bit 0.
    pub modifier: u8,
    /// Reserved byte (0x00 unless copied verbatim from a boot report).
    pub reserved: u8,
    /// Held keycodes, packed from slot 0.
    pub keycodes: [u8; KEY_SLOTS],
}

impl CanonicalReport {
    /// The all-keys-released report.
    pub const EMPTY: Self = Self {
        modifier: 0,
        reserved: 0,
        keycodes: [0; KEY_SLOTS],
    };

    /// Build from an 8-byte boot report, byte for byte.
    pub const fn from_bytes(bytes: &[u8; KEYBOARD_REPORT_SIZE]) -> Self {
        Self {
            modifier: bytes[0],
            reserved: bytes[1],
            keycodes: [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]],
        }
    }

    /// Wire form for the USB interrupt endpoint.
    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_SIZE] {
        let mut buf = [0u8; KEYBOARD_REPORT_SIZE];
        self.serialize(&mut buf);
        buf
    }

    /// Write the 8 wire bytes into `buf`.
    /// Returns the number of bytes written (8, or 0 if `buf` is too small).
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        if buf.len() < KEYBOARD_REPORT_SIZE {
            return 0;
        }
        buf[0] = self.modifier;
        buf[1] = self.reserved;
        buf[2..8].copy_from_slice(&self.keycodes);
        KEYBOARD_REPORT_SIZE
    }

    /// Put `keycode` into the first free slot.
    ///
    /// Returns `false` once all 6 slots are occupied.
    pub fn push_key(&mut self, keycode: u8) -> bool {
        match self.keycodes.iter_mut().find(|k| **k == 0) {
            Some(slot) => {
                *slot = keycode;
                true
            }
            None => false,
        }
    }

    /// Number of occupied keycode slots.
    pub fn key_count(&self) -> usize {
        self.keycodes.iter().filter(|&&k| k != 0).count()
    }

    /// Returns `true` if no keys and no modifiers are pressed (release event).
    pub fn is_empty(&self) -> bool {
        self.modifier == 0 && self.keycodes.iter().all(|&k| k == 0)
    }
}

/// Boot keyboard report descriptor: modifier bits, reserved byte, three
/// LED outputs and a 6-key array.
pub const KEYBOARD_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    //
    //   - Modifier keys (8 bits) -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    //   - Reserved byte -
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant) - padding
    //
    //   - LED output (Num/Caps/Scroll Lock + 5 padding bits) -
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (Num Lock)
    0x29, 0x03, //   Usage Maximum (Scroll Lock)
    0x95, 0x03, //   Report Count (3)
    0x75, 0x01, //   Report Size (1)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x05, //   Report Size (5)
    0x91, 0x01, //   Output (Constant) - padding
    //
    //   - Key codes (6 bytes) -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x00, //   Input (Data, Array)
    //
    0xC0, // End Collection
];
