//! HID report types and the BLE→USB translation layer.

pub mod keyboard;
pub mod translate;


pub use keyboard::{CanonicalReport, KEYBOARD_REPORT_DESCRIPTOR, KEYBOARD_REPORT_SIZE};
pub use translate::{translate, ReportEncoding};
