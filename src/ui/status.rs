//! Status LED supervisor.
//!
//! Called once per supervisory tick. While no keyboard is connected the LED
//! toggles every [`SCAN_BLINK_TICKS`] ticks; once connected it stays on.
//! Connection changes are announced on the operator channel.

use embedded_hal::digital::OutputPin;

use crate::config::SCAN_BLINK_TICKS;

use super::OperatorChannel;

#[derive(Debug, Default)]
pub struct StatusMonitor {
    was_connected: bool,
    blink_counter: u32,
    lit: bool,
}

impl StatusMonitor {
    pub const fn new() -> Self {
        Self {
            was_connected: false,
            blink_counter: 0,
            lit: false,
        }
    }

    /// Whether the LED is currently driven on.
    pub fn lit(&self) -> bool {
        self.lit
    }

    pub fn tick<P: OutputPin>(&mut self, connected: bool, led: &mut P, out: &mut impl OperatorChannel) {
        if connected != self.was_connected {
            self.was_connected = connected;
            self.blink_counter = 0;
            if connected {
                info!("Keyboard connected");
                out.blank_line();
                out.write_line(format_args!("*** Connected to Bluetooth keyboard! ***"));
                out.blank_line();
            } else {
                info!("Keyboard disconnected");
                out.blank_line();
                out.write_line(format_args!("*** Disconnected. Scanning for devices... ***"));
                out.blank_line();
            }
        }

        if connected {
            self.set(led, true);
            return;
        }

        self.blink_counter += 1;
        if self.blink_counter >= SCAN_BLINK_TICKS {
            self.blink_counter = 0;
            let next = !self.lit;
            self.set(led, next);
        }
    }

    fn set<P: OutputPin>(&mut self, led: &mut P, on: bool) {
        let result = if on { led.set_high() } else { led.set_low() };
        if result.is_err() {
            debug!("status LED write failed");
        }
        self.lit = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::testing::Transcript;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    #[derive(Default)]
    struct Led {
        on: bool,
        writes: usize,
    }

    impl ErrorType for Led {
        type Error = Infallible;
    }

    impl OutputPin for Led {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.on = false;
            self.writes += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.on = true;
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn blinks_once_per_ten_ticks_while_scanning() {
        let (mut status, mut led, mut out) = (StatusMonitor::new(), Led::default(), Transcript::default());

        for _ in 0..9 {
            status.tick(false, &mut led, &mut out);
        }
        assert!(!led.on);
        status.tick(false, &mut led, &mut out);
        assert!(led.on);
        for _ in 0..10 {
            status.tick(false, &mut led, &mut out);
        }
        assert!(!led.on);
        assert_eq!(led.writes, 2);
        assert!(out.lines.is_empty());
    }

    #[test]
    fn solid_while_connected_and_transitions_announced() {
        let (mut status, mut led, mut out) = (StatusMonitor::new(), Led::default(), Transcript::default());

        status.tick(true, &mut led, &mut out);
        assert!(led.on);
        assert!(status.lit());
        assert!(out.contains("Connected to Bluetooth keyboard!"));

        for _ in 0..25 {
            status.tick(true, &mut led, &mut out);
        }
        assert!(led.on);
        assert_eq!(out.lines.iter().filter(|l| l.contains("Connected")).count(), 1);

        status.tick(false, &mut led, &mut out);
        assert!(out.contains("Disconnected. Scanning for devices..."));
    }
}
