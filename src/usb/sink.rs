//! Output sink - delivers canonical reports to the USB host.
//!
//! The host endpoint accepts one report at a time. [`InFlightSlot`] tracks
//! that report: `send` claims it, and the driver's write-completion event
//! releases it. When the slot is still held after
//! [`HOST_SEND_TIMEOUT_MS`](crate::config::HOST_SEND_TIMEOUT_MS) the report
//! is dropped and counted, so a wedged host never stalls the link.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal_async::delay::DelayNs;

use crate::config::{HOST_SEND_TIMEOUT_MS, NOT_READY_LOG_INTERVAL, STATS_LOG_INTERVAL};
use crate::error::Error;
use crate::hid::{CanonicalReport, KEYBOARD_REPORT_SIZE};

/// Signalled once per forwarded report; the status task flashes the LED.
pub type ActivitySignal = Signal<CriticalSectionRawMutex, ()>;

/// The host-interface driver as seen by the sink.
pub trait HostInterface {
    /// `true` once the host has enumerated and configured the device.
    fn configured(&self) -> bool;

    /// Queue one report on the interrupt IN endpoint.
    ///
    /// Must not wait for the transfer; completion is reported separately
    /// through [`InFlightSlot::release`].
    fn write_report(&mut self, report: &[u8; KEYBOARD_REPORT_SIZE]) -> Result<(), Error>;
}

/// Single report-in-flight token shared between the sink and the endpoint
/// completion path.
pub struct InFlightSlot {
    busy: AtomicBool,
    released: Signal<CriticalSectionRawMutex, ()>,
}

impl InFlightSlot {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            released: Signal::new(),
        }
    }

    /// Claim the slot without waiting.
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the slot, waiting at most `timeout_ms` for the previous report
    /// to complete.
    pub async fn acquire<D: DelayNs>(&self, delay: &mut D, timeout_ms: u32) -> bool {
        if self.try_acquire() {
            return true;
        }

        // Forget completions that happened while nobody was waiting.
        self.released.reset();
        match select(self.released.wait(), delay.delay_ms(timeout_ms)).await {
            Either::First(()) => self.try_acquire(),
            Either::Second(()) => false,
        }
    }

    /// Write-completion event: the host has taken the report.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
        self.released.signal(());
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Default for InFlightSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostic counters. Never consulted for control flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    /// Reports received from the link while `Ready`.
    pub received: u32,
    /// Reports handed to the host endpoint.
    pub forwarded: u32,
    /// Reports given up on (host not ready, busy, or write error).
    pub dropped: u32,
}

/// Delivers canonical reports to the host under one-in-flight flow control.
pub struct OutputSink<'s, H, D> {
    host: H,
    delay: D,
    slot: &'s InFlightSlot,
    activity: &'s ActivitySignal,
    stats: Statistics,
}

impl<'s, H, D> OutputSink<'s, H, D>
where
    H: HostInterface,
    D: DelayNs,
{
    pub fn new(host: H, delay: D, slot: &'s InFlightSlot, activity: &'s ActivitySignal) -> Self {
        Self {
            host,
            delay,
            slot,
            activity,
            stats: Statistics::default(),
        }
    }

    /// Host-interface configured state.
    pub fn ready(&self) -> bool {
        self.host.configured()
    }

    /// Deliver one report to the host.
    ///
    /// Fails with [`Error::NotReady`] before enumeration and with
    /// [`Error::Busy`] when the previous report is still in flight after the
    /// send timeout. Every failure is counted as a drop.
    pub async fn send(&mut self, report: &CanonicalReport) -> Result<(), Error> {
        if !self.host.configured() {
            self.stats.dropped = self.stats.dropped.wrapping_add(1);
            if self.stats.dropped % NOT_READY_LOG_INTERVAL == 1 {
                warn!("USB not ready, reports dropped: {}", self.stats.dropped);
            }
            return Err(Error::NotReady);
        }

        if !self.slot.acquire(&mut self.delay, HOST_SEND_TIMEOUT_MS).await {
            self.stats.dropped = self.stats.dropped.wrapping_add(1);
            warn!("HID report timeout, dropping report");
            return Err(Error::Busy);
        }

        if let Err(e) = self.host.write_report(&report.to_bytes()) {
            // Nothing went out, so nothing will complete.
            self.slot.release();
            self.stats.dropped = self.stats.dropped.wrapping_add(1);
            debug!("failed to send USB report: {:?}", e);
            return Err(e);
        }

        self.stats.forwarded = self.stats.forwarded.wrapping_add(1);
        self.activity.signal(());

        if self.stats.forwarded % STATS_LOG_INTERVAL == 0 {
            info!(
                "Stats: received={}, forwarded={}, dropped={}",
                self.stats.received,
                self.stats.forwarded,
                self.stats.dropped
            );
        }
        Ok(())
    }

    /// Send the all-zero report so the host sees every key released.
    ///
    /// The failure is logged and returned; callers tearing down a link
    /// carry on regardless.
    pub async fn release_all(&mut self) -> Result<(), Error> {
        debug!("releasing all keys");
        let result = self.send(&CanonicalReport::EMPTY).await;
        if let Err(e) = result {
            warn!("release-all report not delivered: {:?}", e);
        }
        result
    }

    /// Count a report arriving from the link.
    pub fn note_received(&mut self) {
        self.stats.received = self.stats.received.wrapping_add(1);
    }

    pub fn stats(&self) -> Statistics {
        self.stats
    }

    pub fn slot(&self) -> &'s InFlightSlot {
        self.slot
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use embassy_futures::block_on;

    struct MockHost {
        configured: bool,
        fail_writes: bool,
        written: Vec<[u8; 8]>,
    }

    impl MockHost {
        fn ready() -> Self {
            Self {
                configured: true,
                fail_writes: false,
                written: Vec::new(),
            }
        }
    }

    impl HostInterface for MockHost {
        fn configured(&self) -> bool {
            self.configured
        }

        fn write_report(&mut self, report: &[u8; 8]) -> Result<(), Error> {
            if self.fail_writes {
                return Err(Error::HostWrite);
            }
            self.written.push(*report);
            Ok(())
        }
    }

    /// Every wait times out immediately.
    struct NoDelay;

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    const KEY_A: CanonicalReport = CanonicalReport {
        modifier: 0x02,
        reserved: 0,
        keycodes: [0x04, 0, 0, 0, 0, 0],
    };

    #[test]
    fn send_writes_report_and_holds_slot() {
        let slot = InFlightSlot::new();
        let activity = ActivitySignal::new();
        let mut sink = OutputSink::new(MockHost::ready(), NoDelay, &slot, &activity);

        assert_eq!(block_on(sink.send(&KEY_A)), Ok(()));
        assert_eq!(sink.host().written, [[0x02, 0, 0x04, 0, 0, 0, 0, 0]]);
        assert!(slot.is_busy());
        assert!(activity.signaled());
        assert_eq!(sink.stats().forwarded, 1);
        assert_eq!(sink.stats().dropped, 0);
    }

    #[test]
    fn send_before_enumeration_is_not_ready() {
        let slot = InFlightSlot::new();
        let activity = ActivitySignal::new();
        let mut host = MockHost::ready();
        host.configured = false;
        let mut sink = OutputSink::new(host, NoDelay, &slot, &activity);

        assert!(!sink.ready());
        assert_eq!(block_on(sink.send(&KEY_A)), Err(Error::NotReady));
        assert!(!slot.is_busy());
        assert!(sink.host().written.is_empty());
        assert_eq!(sink.stats().dropped, 1);
    }

    #[test]
    fn held_slot_drops_every_send() {
        let slot = InFlightSlot::new();
        let activity = ActivitySignal::new();
        let mut sink = OutputSink::new(MockHost::ready(), NoDelay, &slot, &activity);
        assert!(slot.try_acquire());

        for _ in 0..5 {
            assert_eq!(block_on(sink.send(&KEY_A)), Err(Error::Busy));
        }
        assert_eq!(sink.stats().dropped, 5);
        assert_eq!(sink.stats().forwarded, 0);
        assert!(sink.host().written.is_empty());
    }

    /// Completes the in-flight transfer as soon as the sink starts waiting,
    /// and never finishes the wait itself.
    struct CompletesDuringWait<'a> {
        slot: &'a InFlightSlot,
        waited_ms: &'a Cell<Option<u32>>,
    }

    impl DelayNs for CompletesDuringWait<'_> {
        async fn delay_ns(&mut self, ns: u32) {
            self.waited_ms.set(Some(ns / 1_000_000));
            self.slot.release();
            core::future::pending::<()>().await
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.waited_ms.set(Some(ms));
            self.slot.release();
            core::future::pending::<()>().await
        }
    }

    #[test]
    fn completion_during_wait_lets_report_through() {
        let slot = InFlightSlot::new();
        let activity = ActivitySignal::new();
        let waited_ms = Cell::new(None);
        let delay = CompletesDuringWait {
            slot: &slot,
            waited_ms: &waited_ms,
        };
        let mut sink = OutputSink::new(MockHost::ready(), delay, &slot, &activity);
        assert!(slot.try_acquire());

        assert_eq!(block_on(sink.send(&KEY_A)), Ok(()));
        assert_eq!(waited_ms.get(), Some(HOST_SEND_TIMEOUT_MS));
        assert_eq!(sink.host().written, [KEY_A.to_bytes()]);
        assert!(slot.is_busy());
        assert_eq!(sink.stats().forwarded, 1);
        assert_eq!(sink.stats().dropped, 0);
    }

    #[test]
    fn completion_frees_slot_for_next_report() {
        let slot = InFlightSlot::new();
        let activity = ActivitySignal::new();
        let mut sink = OutputSink::new(MockHost::ready(), NoDelay, &slot, &activity);

        block_on(sink.send(&KEY_A)).unwrap();
        slot.release();
        block_on(sink.send(&CanonicalReport::EMPTY)).unwrap();

        assert_eq!(sink.stats().forwarded, 2);
        assert_eq!(sink.host().written.len(), 2);
    }

    #[test]
    fn stale_completion_does_not_fake_a_free_slot() {
        let slot = InFlightSlot::new();
        slot.release();
        assert!(slot.try_acquire());
        assert!(!block_on(slot.acquire(&mut NoDelay, 100)));
    }

    #[test]
    fn failed_write_gives_slot_back() {
        let slot = InFlightSlot::new();
        let activity = ActivitySignal::new();
        let mut host = MockHost::ready();
        host.fail_writes = true;
        let mut sink = OutputSink::new(host, NoDelay, &slot, &activity);

        assert_eq!(block_on(sink.send(&KEY_A)), Err(Error::HostWrite));
        assert!(!slot.is_busy());
        assert!(!activity.signaled());
        assert_eq!(sink.stats().dropped, 1);
    }

    #[test]
    fn release_all_twice_is_counted_not_fatal() {
        let slot = InFlightSlot::new();
        let activity = ActivitySignal::new();
        let mut sink = OutputSink::new(MockHost::ready(), NoDelay, &slot, &activity);

        assert_eq!(block_on(sink.release_all()), Ok(()));
        assert_eq!(block_on(sink.release_all()), Err(Error::Busy));
        assert_eq!(sink.host().written, [[0u8; 8]]);
        assert_eq!(
            sink.stats(),
            Statistics {
                received: 0,
                forwarded: 1,
                dropped: 1
            }
        );
    }
}
