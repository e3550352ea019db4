//! USB composite device - boot keyboard + serial console.
//!
//! One boot-keyboard interrupt endpoint for the forwarded reports and a
//! CDC-ACM port for the operator console, on the nRF52840 USBD.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::select;
use embassy_nrf::usb::vbus_detect::HardwareVbusDetect;
use embassy_nrf::usb::Driver;
use embassy_nrf::{self, bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_usb::class::cdc_acm::{self, CdcAcmClass};
use embassy_usb::class::hid::{Config as HidConfig, HidWriter, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

use crate::config;
use crate::error::Error;
use crate::hid::{KEYBOARD_REPORT_DESCRIPTOR, KEYBOARD_REPORT_SIZE};
use crate::ui::{console, Console, ConsoleCommand, LineQueue, OperatorQueue};

use super::{HostInterface, InFlightSlot};

bind_interrupts!(struct Irqs {
    USBD => embassy_nrf::usb::InterruptHandler<peripherals::USBD>;
    CLOCK_POWER => embassy_nrf::usb::vbus_detect::InterruptHandler;
});

pub type UsbDriver = Driver<'static, peripherals::USBD, HardwareVbusDetect>;

/// Reports accepted by [`UsbHost`] and not yet written to the endpoint.
/// One deep: the in-flight slot admits a single report at a time.
pub type Outbox = Channel<CriticalSectionRawMutex, [u8; KEYBOARD_REPORT_SIZE], 1>;

const CDC_PACKET_SIZE: usize = 64;

static KB_STATE: StaticCell<State> = StaticCell::new();
static CDC_STATE: StaticCell<cdc_acm::State> = StaticCell::new();
static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 128]> = StaticCell::new();
static USB_HANDLER: StaticCell<DeviceHandler> = StaticCell::new();
static CONFIGURED: AtomicBool = AtomicBool::new(false);

/// Tracks whether the host has configured the device.
struct DeviceHandler;

impl embassy_usb::Handler for DeviceHandler {
    fn reset(&mut self) {
        CONFIGURED.store(false, Ordering::Relaxed);
    }

    fn configured(&mut self, configured: bool) {
        CONFIGURED.store(configured, Ordering::Relaxed);
        if configured {
            info!("USB configured by host");
        } else {
            info!("USB deconfigured");
        }
    }

    fn suspended(&mut self, suspended: bool) {
        debug!("USB suspended: {}", suspended);
    }
}

/// Build result containing the USB device runner and its two classes.
pub struct UsbBridgeDevice {
    pub device: UsbDevice<'static, UsbDriver>,
    pub keyboard: HidWriter<'static, UsbDriver, 8>,
    pub serial: CdcAcmClass<'static, UsbDriver>,
}

/// Initialise the USB stack and create the composite device.
///
/// Call once: the descriptor buffers are `StaticCell`s.
pub fn init(usbd: peripherals::USBD) -> UsbBridgeDevice {
    let driver = Driver::new(usbd, Irqs, HardwareVbusDetect::new(Irqs));

    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.max_power = 100; // mA
    usb_config.max_packet_size_0 = 64;
    // Composite with CDC: use the IAD device class triple.
    usb_config.device_class = 0xEF;
    usb_config.device_sub_class = 0x02;
    usb_config.device_protocol = 0x01;
    usb_config.composite_with_iads = true;

    let mut builder = Builder::new(
        driver,
        usb_config,
        USB_CONFIG_DESC.init([0u8; 256]),
        USB_BOS_DESC.init([0u8; 256]),
        USB_MSOS_DESC.init([0u8; 256]),
        USB_CTRL_BUF.init([0u8; 128]),
    );
    builder.handler(USB_HANDLER.init(DeviceHandler));

    let kb_config = HidConfig {
        report_descriptor: KEYBOARD_REPORT_DESCRIPTOR,
        request_handler: None,
        poll_ms: config::USB_HID_POLL_MS,
        max_packet_size: 8,
    };
    let keyboard = HidWriter::new(&mut builder, KB_STATE.init(State::new()), kb_config);

    let serial = CdcAcmClass::new(
        &mut builder,
        CDC_STATE.init(cdc_acm::State::new()),
        CDC_PACKET_SIZE as u16,
    );

    let device = builder.build();

    info!("USB composite device initialised (keyboard + console)");

    UsbBridgeDevice {
        device,
        keyboard,
        serial,
    }
}

/// USB device state machine; owns its own task.
pub async fn run_usb_device(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

/// [`HostInterface`] over the keyboard endpoint.
///
/// `write_report` only queues; [`report_writer`] performs the transfer
/// and releases the in-flight slot when it completes.
pub struct UsbHost {
    outbox: Sender<'static, CriticalSectionRawMutex, [u8; KEYBOARD_REPORT_SIZE], 1>,
}

impl UsbHost {
    pub fn new(outbox: &'static Outbox) -> Self {
        Self {
            outbox: outbox.sender(),
        }
    }
}

impl HostInterface for UsbHost {
    fn configured(&self) -> bool {
        CONFIGURED.load(Ordering::Relaxed)
    }

    fn write_report(&mut self, report: &[u8; KEYBOARD_REPORT_SIZE]) -> Result<(), Error> {
        self.outbox.try_send(*report).map_err(|_| Error::HostWrite)
    }
}

/// Endpoint writer - drains the outbox and signals write completion.
pub async fn report_writer(
    mut keyboard: HidWriter<'static, UsbDriver, 8>,
    outbox: Receiver<'static, CriticalSectionRawMutex, [u8; KEYBOARD_REPORT_SIZE], 1>,
    slot: &'static InFlightSlot,
) -> ! {
    loop {
        let report = outbox.receive().await;
        if let Err(e) = keyboard.write(&report).await {
            warn!("USB keyboard write failed: {:?}", e);
        }
        slot.release();
    }
}

async fn write_line(
    tx: &mut cdc_acm::Sender<'static, UsbDriver>,
    line: &[u8],
) -> Result<(), EndpointError> {
    for chunk in line.chunks(CDC_PACKET_SIZE) {
        tx.write_packet(chunk).await?;
    }
    // A full-size last packet needs a terminator before the host sees it.
    if line.len() % CDC_PACKET_SIZE == 0 && !line.is_empty() {
        tx.write_packet(&[]).await?;
    }
    tx.write_packet(b"\r\n").await
}

/// Operator console over CDC-ACM.
///
/// Prints the banner whenever a terminal opens the port, forwards queued
/// operator lines, and feeds typed bytes into the [`Console`].
pub async fn console_task(
    serial: CdcAcmClass<'static, UsbDriver>,
    lines: &'static OperatorQueue,
    commands: Sender<'static, CriticalSectionRawMutex, ConsoleCommand, 1>,
) -> ! {
    let (mut tx, mut rx) = serial.split();
    let mut out = LineQueue::new(lines);
    let mut console = Console::new();

    loop {
        rx.wait_connection().await;
        info!("console attached");
        console::print_banner(&mut out);

        let writer = async {
            loop {
                let line = lines.receive().await;
                if write_line(&mut tx, line.as_bytes()).await.is_err() {
                    break;
                }
            }
        };

        let reader = async {
            let mut buf = [0u8; CDC_PACKET_SIZE];
            loop {
                let n = match rx.read_packet(&mut buf).await {
                    Ok(n) => n,
                    Err(_) => break,
                };
                for &byte in &buf[..n] {
                    if let Some(cmd) = console.on_byte(byte, &mut out) {
                        if commands.try_send(cmd).is_err() {
                            warn!("console command dropped, previous one pending");
                        }
                    }
                }
            }
        };

        select(writer, reader).await;
        info!("console detached");
    }
}
