//! SoftDevice S140 link driver.
//!
//! [`SoftdeviceLink`] implements [`LinkControl`] by queueing
//! [`LinkCommand`]s. [`LinkDriver::run`] executes them one by one with
//! the SoftDevice Central APIs and feeds each outcome back into the
//! [`LinkManager`] as an event. When nothing is queued the driver scans,
//! pumps report notifications, or waits for the next supervisory tick.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, select3, Either, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{with_timeout, Duration, Ticker, Timer};
use embedded_hal_async::delay::DelayNs;
use heapless::Deque;
use nrf_softdevice::ble::gatt_client::{self, DiscoverError};
use nrf_softdevice::ble::{central, Address, Connection, EncryptError, SecurityMode};
use nrf_softdevice::{raw, Softdevice};

use crate::config::{
    CONNECT_TIMEOUT_MS, MAX_RAW_REPORT_LEN, SECURITY_POLL_ATTEMPTS, SECURITY_POLL_MS,
    SUPERVISOR_TICK_MS, TEARDOWN_POLL_ATTEMPTS, TEARDOWN_POLL_MS,
};
use crate::error::LinkError;
use crate::ui::{ConsoleCommand, OperatorChannel};
use crate::usb::HostInterface;

use super::bonder::{peer_address, Bonder};
use super::reports::{discard_stale, ReportChannel};
use super::{
    Candidate, ConnParams, DiscoveryFailure, DisconnectReason, LinkControl, LinkManager,
    LinkState, ReportInfo, ReportKind, SecurityLevel,
};

/// HCI "connection timeout", reported when the link drops under us.
const LINK_LOST: u8 = 0x08;

/// An established link, numbered in the order links were made.
///
/// SoftDevice connection slots are reused, so the number is what tells an
/// old link from the current one.
#[derive(Clone)]
pub struct LinkHandle {
    conn: Connection,
    serial: u32,
}

impl PartialEq for LinkHandle {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

/// nrf-softdevice GATT client for the HID-over-GATT service.
#[nrf_softdevice::gatt_client(uuid = "1812")]
pub struct HidServiceClient {
    /// HID Report (Input) - notifications carry live keystrokes.
    #[characteristic(uuid = "2a4d", read, notify)]
    pub hid_report: heapless::Vec<u8, 20>,

    /// Protocol Mode - 0 = Boot Protocol, 1 = Report Protocol.
    #[characteristic(uuid = "2a4e", read, write)]
    pub protocol_mode: u8,
}

/// A request queued by the Link Manager.
pub enum LinkCommand {
    StartScan,
    StopScan,
    Connect(Candidate),
    ConnParams(LinkHandle, ConnParams),
    Secure(LinkHandle, SecurityLevel),
    Discover(LinkHandle),
    Subscribe(LinkHandle, ReportInfo),
    Disconnect(LinkHandle, DisconnectReason),
}

const COMMAND_QUEUE_DEPTH: usize = 8;

#[derive(Default)]
pub struct SoftdeviceLink {
    queue: Deque<LinkCommand, COMMAND_QUEUE_DEPTH>,
}

impl SoftdeviceLink {
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
        }
    }

    fn push(&mut self, cmd: LinkCommand, err: LinkError) -> Result<(), LinkError> {
        self.queue.push_back(cmd).map_err(|_| {
            warn!("link command queue full");
            err
        })
    }

    fn next(&mut self) -> Option<LinkCommand> {
        self.queue.pop_front()
    }

    fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }
}

impl LinkControl for SoftdeviceLink {
    type Peer = LinkHandle;

    fn start_scan(&mut self, _service: u16) -> Result<(), LinkError> {
        self.push(LinkCommand::StartScan, LinkError::ScanFailed)
    }

    fn stop_scan(&mut self) {
        let _ = self.push(LinkCommand::StopScan, LinkError::ScanFailed);
    }

    fn connect(&mut self, candidate: &Candidate, _params: &ConnParams) -> Result<(), LinkError> {
        self.push(LinkCommand::Connect(candidate.clone()), LinkError::ConnectFailed)
    }

    fn request_conn_params(&mut self, peer: &LinkHandle, params: &ConnParams) -> Result<(), LinkError> {
        self.push(LinkCommand::ConnParams(peer.clone(), *params), LinkError::Raw(0))
    }

    fn request_security(&mut self, peer: &LinkHandle, level: SecurityLevel) -> Result<(), LinkError> {
        self.push(LinkCommand::Secure(peer.clone(), level), LinkError::SecurityFailed)
    }

    fn discover(&mut self, peer: &LinkHandle, _service: u16) -> Result<(), LinkError> {
        self.push(LinkCommand::Discover(peer.clone()), LinkError::DiscoveryFailed)
    }

    fn subscribe(&mut self, peer: &LinkHandle, report: &ReportInfo) -> Result<(), LinkError> {
        self.push(LinkCommand::Subscribe(peer.clone(), *report), LinkError::SubscribeFailed)
    }

    fn disconnect(&mut self, peer: &LinkHandle, reason: DisconnectReason) -> Result<(), LinkError> {
        self.push(LinkCommand::Disconnect(peer.clone(), reason), LinkError::DisconnectFailed)
    }
}

fn raw_conn_params(params: &ConnParams) -> raw::ble_gap_conn_params_t {
    raw::ble_gap_conn_params_t {
        min_conn_interval: params.interval_min,
        max_conn_interval: params.interval_max,
        slave_latency: params.latency,
        conn_sup_timeout: params.timeout,
    }
}

fn security_level(mode: SecurityMode) -> SecurityLevel {
    match mode {
        SecurityMode::NoAccess | SecurityMode::Open => SecurityLevel::Open,
        SecurityMode::JustWorks | SecurityMode::Signed => SecurityLevel::Encrypted,
        SecurityMode::Mitm | SecurityMode::SignedMitm => SecurityLevel::Authenticated,
        SecurityMode::LescMitm => SecurityLevel::SecureConnections,
    }
}

async fn wait_for_secure_link(conn: &Connection) -> bool {
    for _ in 0..SECURITY_POLL_ATTEMPTS {
        match conn.security_mode() {
            SecurityMode::NoAccess | SecurityMode::Open => {
                Timer::after(Duration::from_millis(SECURITY_POLL_MS)).await
            }
            _ => return true,
        }
    }
    false
}

/// Wait for the SoftDevice to report the link closed.
async fn wait_for_link_down(conn: &Connection) -> bool {
    for _ in 0..TEARDOWN_POLL_ATTEMPTS {
        if !conn.is_connected() {
            return true;
        }
        Timer::after(Duration::from_millis(TEARDOWN_POLL_MS)).await;
    }
    !conn.is_connected()
}

/// Scan until a connectable HID keyboard advertises.
async fn scan_for_keyboard(sd: &Softdevice) -> Result<(Candidate, Address), LinkError> {
    let config = central::ScanConfig {
        // Active scan to retrieve scan-response data (device names).
        active: true,
        ..Default::default()
    };

    central::scan(sd, &config, |params| {
        let data = unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };
        let raw_address = Address::from_raw(params.peer_addr);
        let connectable = params.type_.connectable() != 0;
        Candidate::from_advertisement(peer_address(&raw_address), params.rssi, connectable, data)
            .filter(|c| c.connectable)
            .map(|c| (c, raw_address))
    })
    .await
    .map_err(|_| LinkError::ScanFailed)
}

/// Runs the SoftDevice side of the single keyboard link.
pub struct LinkDriver<'a, O: 'static> {
    sd: &'static Softdevice,
    bonder: &'static Bonder<O>,
    reports: &'a ReportChannel,
    requests: Receiver<'a, CriticalSectionRawMutex, ConsoleCommand, 1>,
    connected: &'a AtomicBool,
    client: Option<HidServiceClient>,
    /// Address of the last candidate, with its exact type for the whitelist.
    target: Option<Address>,
    scanning: bool,
    links_made: u32,
}

impl<'a, O: OperatorChannel> LinkDriver<'a, O> {
    pub fn new(
        sd: &'static Softdevice,
        bonder: &'static Bonder<O>,
        reports: &'a ReportChannel,
        requests: Receiver<'a, CriticalSectionRawMutex, ConsoleCommand, 1>,
        connected: &'a AtomicBool,
    ) -> Self {
        Self {
            sd,
            bonder,
            reports,
            requests,
            connected,
            client: None,
            target: None,
            scanning: false,
            links_made: 0,
        }
    }

    pub async fn run<H, D>(mut self, manager: &mut LinkManager<'_, SoftdeviceLink, H, D>) -> !
    where
        H: HostInterface,
        D: DelayNs,
    {
        if manager.start().is_err() {
            warn!("initial scan request failed, retrying on tick");
        }
        let mut ticker = Ticker::every(Duration::from_millis(SUPERVISOR_TICK_MS));

        loop {
            self.connected
                .store(manager.is_connected(), Ordering::Relaxed);

            if let Some(cmd) = manager.control_mut().next() {
                self.execute(cmd, manager).await;
                continue;
            }

            match manager.state() {
                LinkState::Scanning if self.scanning => self.scan(manager, &mut ticker).await,
                LinkState::Ready => self.bridge(manager, &mut ticker).await,
                _ => match select(ticker.next(), self.requests.receive()).await {
                    Either::First(()) => manager.tick(),
                    Either::Second(cmd) => self.handle_request(cmd, manager),
                },
            }
        }
    }

    async fn execute<H, D>(&mut self, cmd: LinkCommand, manager: &mut LinkManager<'_, SoftdeviceLink, H, D>)
    where
        H: HostInterface,
        D: DelayNs,
    {
        match cmd {
            LinkCommand::StartScan => {
                discard_stale(self.reports);
                self.scanning = true;
            }
            LinkCommand::StopScan => self.scanning = false,
            LinkCommand::Connect(candidate) => {
                self.bonder.set_peer(candidate.address);
                let Some(address) = self.target.take() else {
                    manager.on_connected(Err(LinkError::ConnectFailed)).await;
                    return;
                };
                let whitelist = [&address];
                let config = central::ConnectConfig {
                    scan_config: central::ScanConfig {
                        whitelist: Some(&whitelist),
                        ..Default::default()
                    },
                    conn_params: raw_conn_params(&ConnParams::LOW_LATENCY),
                    ..Default::default()
                };

                let connect = central::connect_with_security(self.sd, &config, self.bonder);
                let result = match with_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS), connect).await {
                    Ok(Ok(conn)) => {
                        self.links_made = self.links_made.wrapping_add(1);
                        Ok(LinkHandle {
                            conn,
                            serial: self.links_made,
                        })
                    }
                    Ok(Err(_)) => Err(LinkError::ConnectFailed),
                    Err(_) => {
                        warn!("connection attempt timed out");
                        Err(LinkError::ConnectFailed)
                    }
                };
                manager.on_connected(result).await;
            }
            LinkCommand::ConnParams(link, params) => {
                match link.conn.set_conn_params(raw_conn_params(&params)) {
                    Ok(()) => manager.on_conn_params_updated(&params),
                    Err(_) => warn!("connection parameter update rejected"),
                }
            }
            LinkCommand::Secure(link, _level) => {
                let conn = &link.conn;
                let mut pairing = false;
                let secure = match conn.encrypt() {
                    Ok(()) => wait_for_secure_link(conn).await,
                    Err(EncryptError::PeerKeysNotFound) => {
                        pairing = true;
                        conn.request_pairing().is_ok() && wait_for_secure_link(conn).await
                    }
                    Err(_) => false,
                };

                if !secure && !conn.is_connected() {
                    info!("link dropped while securing");
                    self.client = None;
                    manager.on_disconnected(&link, LINK_LOST).await;
                    return;
                }

                let result = if secure {
                    if pairing {
                        // The bond, if any, is stored on the same event that
                        // completes encryption; give it a moment to land.
                        Timer::after(Duration::from_millis(SECURITY_POLL_MS)).await;
                        self.bonder.finish_pairing();
                    }
                    Ok(security_level(conn.security_mode()))
                } else {
                    self.bonder
                        .report_auth_failed(DisconnectReason::AuthenticationFailure.hci_code());
                    Err(LinkError::SecurityFailed)
                };
                manager.on_security_changed(result).await;
            }
            LinkCommand::Discover(link) => {
                info!("Discovering HID service...");
                match gatt_client::discover::<HidServiceClient>(&link.conn).await {
                    Ok(client) => {
                        // Boot protocol keeps reports in the fixed 8-byte layout.
                        match client.protocol_mode_write(&0u8).await {
                            Ok(_) => info!("Set HID protocol to Boot mode"),
                            Err(_) => warn!("Could not set boot protocol (device may not support it)"),
                        }
                        self.client = Some(client);
                        let inventory = [ReportInfo {
                            handle: 0,
                            id: 0,
                            kind: ReportKind::Input,
                            size: MAX_RAW_REPORT_LEN as u8,
                        }];
                        manager.on_discovery_complete(&inventory).await;
                    }
                    Err(DiscoverError::ServiceNotFound) => {
                        manager.on_discovery_failed(DiscoveryFailure::NotFound).await
                    }
                    Err(_) => manager.on_discovery_failed(DiscoveryFailure::Error(0)).await,
                }
            }
            LinkCommand::Subscribe(_link, report) => {
                let enabled = match self.client.as_ref() {
                    Some(client) => client.hid_report_cccd_write(true).await.is_ok(),
                    None => false,
                };
                if !enabled {
                    warn!("Enabling notifications on report {} failed", report.id);
                    let _ = manager.disconnect().await;
                }
            }
            LinkCommand::Disconnect(link, reason) => {
                if link.conn.disconnect().is_err() {
                    debug!("link already down");
                } else if !wait_for_link_down(&link.conn).await {
                    warn!("link still up after disconnect request");
                }
                self.client = None;
                discard_stale(self.reports);
                manager.on_disconnected(&link, reason.hci_code()).await;
            }
        }
    }

    async fn scan<H, D>(&mut self, manager: &mut LinkManager<'_, SoftdeviceLink, H, D>, ticker: &mut Ticker)
    where
        H: HostInterface,
        D: DelayNs,
    {
        match select3(scan_for_keyboard(self.sd), ticker.next(), self.requests.receive()).await {
            Either3::First(Ok((candidate, address))) => {
                self.target = Some(address);
                manager.on_candidate_found(&candidate);
            }
            Either3::First(Err(e)) => {
                warn!("scan ended with error: {:?}", e);
                Timer::after(Duration::from_millis(SUPERVISOR_TICK_MS)).await;
            }
            Either3::Second(()) => manager.tick(),
            Either3::Third(cmd) => self.handle_request(cmd, manager),
        }
    }

    /// Forward notifications until the link drops or the manager wants
    /// something done.
    async fn bridge<H, D>(&mut self, manager: &mut LinkManager<'_, SoftdeviceLink, H, D>, ticker: &mut Ticker)
    where
        H: HostInterface,
        D: DelayNs,
    {
        let (Some(link), Some(client)) = (manager.peer().cloned(), self.client.as_ref()) else {
            let _ = manager.disconnect().await;
            return;
        };

        let reports = self.reports;
        let notifications = gatt_client::run(&link.conn, client, |event| match event {
            HidServiceClientEvent::HidReportNotification(data) => {
                // The bridging loop below drains this; a full channel means
                // it is stuck on the host, so the report is dropped.
                if reports.try_send(data).is_err() {
                    warn!("HID report channel full - dropping report");
                }
            }
        });

        let requests = &self.requests;
        let bonder = self.bonder;
        let events = async {
            loop {
                match select3(reports.receive(), ticker.next(), requests.receive()).await {
                    Either3::First(raw) => {
                        let _ = manager.on_report(&raw).await;
                    }
                    Either3::Second(()) => manager.tick(),
                    Either3::Third(ConsoleCommand::ClearBonds) => {
                        bonder.clear_bonds();
                    }
                }
                if manager.state() != LinkState::Ready || manager.control().has_pending() {
                    break;
                }
            }
        };

        let ended = select(notifications, events).await;
        if let Either::First(_) = ended {
            info!("HID notification loop ended (connection closed)");
            self.client = None;
            discard_stale(reports);
            manager.on_disconnected(&link, LINK_LOST).await;
        } else if manager.state() != LinkState::Ready {
            discard_stale(reports);
        }
    }

    fn handle_request<H, D>(&mut self, cmd: ConsoleCommand, manager: &mut LinkManager<'_, SoftdeviceLink, H, D>)
    where
        H: HostInterface,
        D: DelayNs,
    {
        match cmd {
            ConsoleCommand::ClearBonds => {
                self.bonder.clear_bonds();
                if !manager.is_connected() {
                    self.scanning = false;
                    if manager.rescan().is_err() {
                        warn!("rescan request failed, retrying on tick");
                    }
                }
            }
        }
    }
}
