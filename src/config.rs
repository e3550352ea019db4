//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, protocol constants and capacity limits live here
//! so they can be tuned in one place.

// BLE

/// HID-over-GATT service UUID used as the scan filter and discovery target.
pub const HID_SERVICE_UUID: u16 = 0x1812;

/// BLE connection interval range (in 1.25 ms units).
/// 6 = 7.5 ms (lowest latency for HID), 12 = 15 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 6;
pub const BLE_CONN_INTERVAL_MAX: u16 = 12;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// Give up on a connection attempt that has not completed after this long.
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// How often the security level is polled while waiting for encryption,
/// and how many polls are made before giving up (25 × 200 ms = 5 s).
pub const SECURITY_POLL_MS: u64 = 200;
pub const SECURITY_POLL_ATTEMPTS: usize = 25;

/// Polling of the link state after a disconnect request (10 × 50 ms).
pub const TEARDOWN_POLL_MS: u64 = 50;
pub const TEARDOWN_POLL_ATTEMPTS: usize = 10;

/// Maximum number of input reports subscribed on one peripheral.
pub const MAX_INPUT_REPORTS: usize = 8;

/// Notifications handed from the GATT callback to the bridging task.
pub const REPORT_HANDOFF_DEPTH: usize = 4;

/// Largest notification payload accepted from the peripheral.
pub const MAX_RAW_REPORT_LEN: usize = 20;

// USB

/// USB VID/PID - use the "pid.codes" open-source test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0002;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "ble-kbd-bridge";
pub const USB_PRODUCT: &str = "BLE-to-USB Keyboard Bridge";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// USB HID polling interval (ms). 1 ms = 1000 Hz for lowest latency.
pub const USB_HID_POLL_MS: u8 = 1;

/// Bounded wait for the single in-flight report slot before a report is
/// dropped as `Busy`.
pub const HOST_SEND_TIMEOUT_MS: u32 = 100;

// Diagnostics

/// Log a "host not ready" warning on the 1st, 101st, 201st... drop.
pub const NOT_READY_LOG_INTERVAL: u32 = 100;

/// Log the statistics line every this many forwarded reports.
pub const STATS_LOG_INTERVAL: u32 = 1000;

// Status indicator
//
//   Status LED     → P0.13 (nRF52840-DK LED1, active low)

/// Supervisory loop period (ms).
pub const SUPERVISOR_TICK_MS: u64 = 100;

/// Ticks between LED toggles while scanning (10 × 100 ms = 1 s).
pub const SCAN_BLINK_TICKS: u32 = 10;

/// Length of the activity flash on each forwarded report (ms).
pub const ACTIVITY_PULSE_MS: u64 = 10;

// Pairing / console

/// Maximum number of bonded peers kept by the security handler.
pub const MAX_BONDS: usize = 4;

/// Capacity of one operator console line.
pub const OPERATOR_LINE_LEN: usize = 96;

/// Operator lines queued towards the console before new ones are dropped.
pub const OPERATOR_QUEUE_DEPTH: usize = 16;
