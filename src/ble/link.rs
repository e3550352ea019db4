//! Link Manager - connection lifecycle for the single keyboard link.
//!
//! ```text
//!  Idle ──start──▶ Scanning ──candidate──▶ Connecting ──linked──▶ Connected
//!   ▲                 ▲  │                     │                     │
//!   └──────stop───────┘  └◀──────failed────────┘          security requested
//!                     ▲                                              ▼
//!                     │                                          Securing
//!                     │                                              │
//!               Disconnecting ◀──────── any failure / link lost ─────┤
//!                     ▲                                              ▼
//!                     └────────── link lost ─── Ready ◀──reports── Discovering
//! ```
//!
//! The manager never blocks on the stack: each [`LinkControl`] call is a
//! request, and the outcome arrives later through one of the `on_*` event
//! methods. Events that don't fit the current state are logged and ignored.

use crate::config::{HID_SERVICE_UUID, MAX_INPUT_REPORTS};
use crate::error::{Error, LinkError};
use crate::hid::translate;
use crate::usb::{HostInterface, OutputSink, Statistics};

use super::{
    Candidate, ConnParams, DiscoveryFailure, DisconnectReason, LinkControl, ReportInfo,
    ReportKind, SecurityLevel,
};

use embedded_hal_async::delay::DelayNs;

/// Security level required before HID discovery starts.
pub const REQUIRED_SECURITY: SecurityLevel = SecurityLevel::Encrypted;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Securing,
    Discovering,
    Ready,
    Disconnecting,
}

impl LinkState {
    /// A link to the keyboard is up and not being torn down.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            LinkState::Connected | LinkState::Securing | LinkState::Discovering | LinkState::Ready
        )
    }
}

/// Owner of the link state, the peer handle and the output sink.
pub struct LinkManager<'s, L: LinkControl, H, D> {
    control: L,
    sink: OutputSink<'s, H, D>,
    state: LinkState,
    peer: Option<L::Peer>,
    /// Link whose teardown was requested and not yet confirmed.
    closing: Option<L::Peer>,
    target: Option<Candidate>,
    /// The stack accepted the last `start_scan`.
    scan_active: bool,
    subscribed: usize,
}

impl<'s, L, H, D> LinkManager<'s, L, H, D>
where
    L: LinkControl,
    H: HostInterface,
    D: DelayNs,
{
    pub fn new(control: L, sink: OutputSink<'s, H, D>) -> Self {
        Self {
            control,
            sink,
            state: LinkState::Idle,
            peer: None,
            closing: None,
            target: None,
            scan_active: false,
            subscribed: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn peer(&self) -> Option<&L::Peer> {
        self.peer.as_ref()
    }

    /// The candidate being connected to or connected.
    pub fn target(&self) -> Option<&Candidate> {
        self.target.as_ref()
    }

    /// Input reports with notifications enabled on the current link.
    pub fn subscribed_reports(&self) -> usize {
        self.subscribed
    }

    pub fn stats(&self) -> Statistics {
        self.sink.stats()
    }

    pub fn sink(&self) -> &OutputSink<'s, H, D> {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut OutputSink<'s, H, D> {
        &mut self.sink
    }

    pub fn control(&self) -> &L {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut L {
        &mut self.control
    }

    // ═══════════════════════════════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════════════════════════════

    /// Begin looking for a keyboard. No-op unless `Idle`.
    ///
    /// When the stack refuses to scan the manager still moves to `Scanning`
    /// and [`tick`](Self::tick) retries; the refusal is returned.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != LinkState::Idle {
            return Ok(());
        }
        self.state = LinkState::Scanning;
        self.begin_scan()
    }

    /// Stop scanning and return to `Idle`. No-op in any other state.
    pub fn stop(&mut self) {
        if self.state != LinkState::Scanning {
            return;
        }
        if self.scan_active {
            self.control.stop_scan();
            self.scan_active = false;
        }
        self.state = LinkState::Idle;
        info!("Scanning stopped");
    }

    /// Tear down the current link.
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        match self.state {
            LinkState::Connected | LinkState::Securing | LinkState::Discovering | LinkState::Ready => {
                info!("Disconnect requested");
                self.enter_disconnecting(Some(DisconnectReason::RemoteUserTerminated))
                    .await;
                Ok(())
            }
            LinkState::Disconnecting => Ok(()),
            LinkState::Idle | LinkState::Scanning | LinkState::Connecting => Err(Error::NotConnected),
        }
    }

    /// Restart the scan from scratch, e.g. after the bond list changed.
    /// No-op while a link exists or is being set up.
    pub fn rescan(&mut self) -> Result<(), Error> {
        match self.state {
            LinkState::Idle => self.start(),
            LinkState::Scanning => {
                self.stop();
                self.start()
            }
            _ => Ok(()),
        }
    }

    /// Supervisory tick: retry a scan the stack refused to start.
    pub fn tick(&mut self) {
        if self.state == LinkState::Scanning && !self.scan_active {
            let _ = self.begin_scan();
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Stack events
    // ═══════════════════════════════════════════════════════════════════

    /// A device advertising the HID service was seen.
    pub fn on_candidate_found(&mut self, candidate: &Candidate) {
        if self.state != LinkState::Scanning {
            trace!("ignoring candidate {} in {:?}", candidate.address, self.state);
            return;
        }
        if !candidate.connectable {
            debug!("{} is not connectable", candidate.address);
            return;
        }

        info!(
            "Found HID device: {} [{}] RSSI {}",
            candidate.name,
            candidate.address,
            candidate.rssi
        );

        if self.scan_active {
            self.control.stop_scan();
            self.scan_active = false;
        }
        self.state = LinkState::Connecting;

        match self.control.connect(candidate, &ConnParams::LOW_LATENCY) {
            Ok(()) => self.target = Some(candidate.clone()),
            Err(e) => {
                warn!("Create connection failed: {:?}", e);
                self.state = LinkState::Scanning;
                let _ = self.begin_scan();
            }
        }
    }

    /// Outcome of the connection attempt.
    pub async fn on_connected(&mut self, result: Result<L::Peer, LinkError>) {
        if self.state != LinkState::Connecting {
            if let Ok(peer) = result {
                warn!("Unexpected link in {:?}, tearing it down", self.state);
                let _ = self
                    .control
                    .disconnect(&peer, DisconnectReason::RemoteUserTerminated);
            }
            return;
        }

        let peer = match result {
            Ok(peer) => peer,
            Err(e) => {
                warn!("Failed to connect: {:?}", e);
                self.target = None;
                self.state = LinkState::Scanning;
                let _ = self.begin_scan();
                return;
            }
        };

        info!("Connected");
        self.state = LinkState::Connected;

        if let Err(e) = self.control.request_conn_params(&peer, &ConnParams::LOW_LATENCY) {
            warn!("Connection parameter request failed: {:?}", e);
        }

        let security = self.control.request_security(&peer, REQUIRED_SECURITY);
        self.peer = Some(peer);
        match security {
            Ok(()) => self.state = LinkState::Securing,
            Err(e) => {
                warn!("Failed to set security: {:?}", e);
                self.enter_disconnecting(Some(DisconnectReason::AuthenticationFailure))
                    .await;
            }
        }
    }

    /// The security manager finished (or gave up) encrypting the link.
    pub async fn on_security_changed(&mut self, result: Result<SecurityLevel, LinkError>) {
        if self.state != LinkState::Securing {
            debug!("security change in {:?} ignored", self.state);
            return;
        }

        match result {
            Ok(level) if level >= REQUIRED_SECURITY => {
                info!("Security changed: level {:?}", level);
                self.state = LinkState::Discovering;
                let discover = match self.peer.as_ref() {
                    Some(peer) => self.control.discover(peer, HID_SERVICE_UUID),
                    None => Err(LinkError::DiscoveryFailed),
                };
                if let Err(e) = discover {
                    warn!("HID discovery failed to start: {:?}", e);
                    self.enter_disconnecting(Some(DisconnectReason::RemoteUserTerminated))
                        .await;
                }
            }
            Ok(level) => {
                warn!("Security level {:?} too low", level);
                self.enter_disconnecting(Some(DisconnectReason::AuthenticationFailure))
                    .await;
            }
            Err(e) => {
                warn!("Security failed: {:?}", e);
                self.enter_disconnecting(Some(DisconnectReason::AuthenticationFailure))
                    .await;
            }
        }
    }

    /// HID service discovery finished with this report inventory.
    pub async fn on_discovery_complete(&mut self, reports: &[ReportInfo]) {
        if self.state != LinkState::Discovering {
            debug!("discovery result in {:?} ignored", self.state);
            return;
        }

        info!("HIDS discovery complete: {} reports", reports.len());
        self.subscribed = 0;
        for report in reports {
            info!(
                "Report ID {} type {:?} size {}",
                report.id,
                report.kind,
                report.size
            );
            if report.kind != ReportKind::Input {
                continue;
            }
            if self.subscribed >= MAX_INPUT_REPORTS {
                warn!("Too many input reports, ignoring ID {}", report.id);
                continue;
            }
            let result = match self.peer.as_ref() {
                Some(peer) => self.control.subscribe(peer, report),
                None => Err(LinkError::SubscribeFailed),
            };
            match result {
                Ok(()) => {
                    debug!("Subscribed to input report {}", report.id);
                    self.subscribed += 1;
                }
                Err(e) => warn!("Subscribe to report {} failed: {:?}", report.id, e),
            }
        }

        if self.subscribed == 0 {
            warn!("No input report could be subscribed");
            self.enter_disconnecting(Some(DisconnectReason::RemoteUserTerminated))
                .await;
            return;
        }

        info!("Subscribed to {} input reports, bridging", self.subscribed);
        self.state = LinkState::Ready;
    }

    /// HID service discovery could not complete.
    pub async fn on_discovery_failed(&mut self, failure: DiscoveryFailure) {
        if self.state != LinkState::Discovering {
            debug!("discovery failure in {:?} ignored", self.state);
            return;
        }
        match failure {
            DiscoveryFailure::NotFound => warn!("HID service not found"),
            DiscoveryFailure::Error(code) => warn!("Discovery error: {}", code),
        }
        self.enter_disconnecting(Some(DisconnectReason::RemoteUserTerminated))
            .await;
    }

    /// An input report notification arrived.
    ///
    /// Outside `Ready` the report is ignored and `NotConnected` returned.
    pub async fn on_report(&mut self, raw: &[u8]) -> Result<(), Error> {
        if self.state != LinkState::Ready {
            trace!("report in {:?} ignored", self.state);
            return Err(Error::NotConnected);
        }
        self.sink.note_received();
        let report = translate(raw);
        self.sink.send(&report).await
    }

    /// The link to `peer` is gone (`reason` is the HCI code).
    ///
    /// Events for any link other than the current one, or the one being
    /// torn down, are ignored.
    pub async fn on_disconnected(&mut self, peer: &L::Peer, reason: u8) {
        match self.state {
            LinkState::Disconnecting if self.closing.as_ref() == Some(peer) => {
                info!("Disconnected (reason {:x})", reason);
                self.finish_disconnect();
            }
            state if state.is_connected() && self.peer.as_ref() == Some(peer) => {
                info!("Disconnected (reason {:x})", reason);
                self.enter_disconnecting(None).await;
            }
            state => {
                debug!("disconnect of another link in {:?} ignored", state);
            }
        }
    }

    /// The peripheral accepted new connection parameters.
    pub fn on_conn_params_updated(&mut self, params: &ConnParams) {
        if !self.state.is_connected() {
            return;
        }
        info!(
            "Connection params updated: interval {} latency {} timeout {}",
            params.interval_max,
            params.latency,
            params.timeout
        );
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    fn begin_scan(&mut self) -> Result<(), Error> {
        match self.control.start_scan(HID_SERVICE_UUID) {
            Ok(()) => {
                self.scan_active = true;
                info!("Scanning for BLE HID keyboards...");
                Ok(())
            }
            Err(e) => {
                self.scan_active = false;
                warn!("Scanning failed to start: {:?}", e);
                Err(Error::Link(LinkError::ScanFailed))
            }
        }
    }

    /// Enter `Disconnecting`: request teardown when the link is still up,
    /// release every key on the host and drop the peer handle.
    ///
    /// With `teardown == None` the link is already gone and the manager
    /// moves straight on to `Scanning`.
    async fn enter_disconnecting(&mut self, teardown: Option<DisconnectReason>) {
        self.state = LinkState::Disconnecting;

        if let (Some(reason), Some(peer)) = (teardown, self.peer.take()) {
            match self.control.disconnect(&peer, reason) {
                Ok(()) => self.closing = Some(peer),
                Err(e) => warn!("Disconnect request failed: {:?}", e),
            }
        }
        let link_up = self.closing.is_some();

        let _ = self.sink.release_all().await;
        self.peer = None;
        self.target = None;
        self.subscribed = 0;

        if !link_up {
            self.finish_disconnect();
        }
    }

    fn finish_disconnect(&mut self) {
        self.peer = None;
        self.closing = None;
        self.state = LinkState::Scanning;
        let _ = self.begin_scan();
    }
}
