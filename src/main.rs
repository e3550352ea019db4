//! Firmware entry point (nRF52840 + SoftDevice S140).
//!
//! Task layout:
//!
//! ```text
//!  softdevice_task   SoftDevice event pump
//!  usb_task          USB device state machine
//!  writer_task       keyboard endpoint writes, releases the in-flight slot
//!  console_task      CDC-ACM operator console
//!  link_task         LinkManager + SoftDevice link driver
//!  status_task       status LED supervisor and activity flash
//! ```

#![no_std]
#![no_main]

use core::convert::Infallible;
use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};

use defmt::{info, unwrap};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Duration, Ticker, Timer};
use embedded_hal::digital::{ErrorType, OutputPin};
use nrf_softdevice::{raw, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use ble_kbd_bridge::ble::bonder::Bonder;
use ble_kbd_bridge::ble::central::{LinkDriver, SoftdeviceLink};
use ble_kbd_bridge::ble::reports::ReportChannel;
use ble_kbd_bridge::ble::LinkManager;
use ble_kbd_bridge::config::{ACTIVITY_PULSE_MS, SUPERVISOR_TICK_MS};
use ble_kbd_bridge::ui::{console, ConsoleCommand, LineQueue, OperatorQueue, StatusMonitor};
use ble_kbd_bridge::usb::hid_device::{self, Outbox, UsbDriver, UsbHost};
use ble_kbd_bridge::usb::{ActivitySignal, InFlightSlot, OutputSink};
use embassy_usb::class::cdc_acm::CdcAcmClass;
use embassy_usb::class::hid::HidWriter;
use embassy_usb::UsbDevice;

type OperatorOut = LineQueue<'static>;

static SLOT: InFlightSlot = InFlightSlot::new();
static ACTIVITY: ActivitySignal = ActivitySignal::new();
static OUTBOX: Outbox = Channel::new();
static REPORTS: ReportChannel = Channel::new();
static OPERATOR: OperatorQueue = Channel::new();
static COMMANDS: Channel<CriticalSectionRawMutex, ConsoleCommand, 1> = Channel::new();
static CONNECTED: AtomicBool = AtomicBool::new(false);
static BONDER: StaticCell<Bonder<OperatorOut>> = StaticCell::new();

/// LED wired between VDD and the pin.
struct ActiveLow(Output<'static>);

impl ErrorType for ActiveLow {
    type Error = Infallible;
}

impl OutputPin for ActiveLow {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set_high();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set_low();
        Ok(())
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn usb_task(device: UsbDevice<'static, UsbDriver>) -> ! {
    hid_device::run_usb_device(device).await
}

#[embassy_executor::task]
async fn writer_task(keyboard: HidWriter<'static, UsbDriver, 8>) -> ! {
    hid_device::report_writer(keyboard, OUTBOX.receiver(), &SLOT).await
}

#[embassy_executor::task]
async fn console_task(serial: CdcAcmClass<'static, UsbDriver>) -> ! {
    hid_device::console_task(serial, &OPERATOR, COMMANDS.sender()).await
}

#[embassy_executor::task]
async fn link_task(sd: &'static Softdevice, bonder: &'static Bonder<OperatorOut>) -> ! {
    let sink = OutputSink::new(UsbHost::new(&OUTBOX), Delay, &SLOT, &ACTIVITY);
    let mut manager = LinkManager::new(SoftdeviceLink::new(), sink);
    console::print_scanning(&mut LineQueue::new(&OPERATOR));

    LinkDriver::new(sd, bonder, &REPORTS, COMMANDS.receiver(), &CONNECTED)
        .run(&mut manager)
        .await
}

#[embassy_executor::task]
async fn status_task(mut led: ActiveLow) -> ! {
    let mut status = StatusMonitor::new();
    let mut out = LineQueue::new(&OPERATOR);
    let mut ticker = Ticker::every(Duration::from_millis(SUPERVISOR_TICK_MS));

    loop {
        match select(ticker.next(), ACTIVITY.wait()).await {
            Either::First(()) => status.tick(CONNECTED.load(Ordering::Relaxed), &mut led, &mut out),
            Either::Second(()) => {
                // Blink against the current level, then restore it.
                let lit = status.lit();
                let _ = if lit { led.set_low() } else { led.set_high() };
                Timer::after(Duration::from_millis(ACTIVITY_PULSE_MS)).await;
                let _ = if lit { led.set_high() } else { led.set_low() };
            }
        }
    }
}

fn softdevice_config() -> nrf_softdevice::Config {
    const DEVICE_NAME: &[u8] = b"ble-kbd-bridge";

    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 1,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("BLE-to-USB-HID keyboard bridge starting...");

    // The SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);
    interrupt::USBD.set_priority(Priority::P2);
    interrupt::CLOCK_POWER.set_priority(Priority::P2);

    let led = ActiveLow(Output::new(p.P0_13, Level::High, OutputDrive::Standard));

    let usb = hid_device::init(p.USBD);
    unwrap!(spawner.spawn(usb_task(usb.device)));
    unwrap!(spawner.spawn(writer_task(usb.keyboard)));
    unwrap!(spawner.spawn(console_task(usb.serial)));

    let sd = Softdevice::enable(&softdevice_config());
    unwrap!(spawner.spawn(softdevice_task(sd)));

    let bonder = BONDER.init(Bonder::new(LineQueue::new(&OPERATOR)));
    unwrap!(spawner.spawn(link_task(sd, bonder)));
    unwrap!(spawner.spawn(status_task(led)));
}
