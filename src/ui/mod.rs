//! Operator-facing surfaces - serial console and status LED.
//!
//! ## Components
//!
//! - **Console**: start-up banner and single-key commands (`c` clears
//!   bonds after a `y/n` confirmation)
//! - **Status**: LED blinks while looking for a keyboard, stays lit while
//!   connected, and flashes on every forwarded report

pub mod console;
pub mod status;

use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Sender};
use heapless::String;

use crate::config::{OPERATOR_LINE_LEN, OPERATOR_QUEUE_DEPTH};

pub use console::{Console, ConsoleCommand};
pub use status::StatusMonitor;

/// One line of operator text, without terminator.
pub type OperatorLine = String<OPERATOR_LINE_LEN>;

/// Lines waiting for the console transport.
pub type OperatorQueue = Channel<CriticalSectionRawMutex, OperatorLine, OPERATOR_QUEUE_DEPTH>;

/// Line-oriented text output read by a human (USB serial console).
///
/// Writes never block; a channel that cannot keep up drops lines.
pub trait OperatorChannel {
    fn write_line(&mut self, args: fmt::Arguments<'_>);

    fn blank_line(&mut self) {
        self.write_line(format_args!(""));
    }
}

impl<T: OperatorChannel + ?Sized> OperatorChannel for &mut T {
    fn write_line(&mut self, args: fmt::Arguments<'_>) {
        (**self).write_line(args)
    }
}

/// [`OperatorChannel`] feeding an [`OperatorQueue`].
///
/// Lines longer than [`OPERATOR_LINE_LEN`] are cut short and lines are
/// dropped while the queue is full.
#[derive(Clone, Copy)]
pub struct LineQueue<'a> {
    tx: Sender<'a, CriticalSectionRawMutex, OperatorLine, OPERATOR_QUEUE_DEPTH>,
}

impl<'a> LineQueue<'a> {
    pub fn new(queue: &'a OperatorQueue) -> Self {
        Self { tx: queue.sender() }
    }
}

impl OperatorChannel for LineQueue<'_> {
    fn write_line(&mut self, args: fmt::Arguments<'_>) {
        let mut line = OperatorLine::new();
        if line.write_fmt(args).is_err() {
            debug!("operator line truncated");
        }
        if self.tx.try_send(line).is_err() {
            debug!("operator queue full, line dropped");
        }
    }
}

/// Section rule used around banners and prompts.
pub(crate) const RULE: &str = "========================================";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_queue_delivers_formatted_lines_in_order() {
        let queue = OperatorQueue::new();
        let mut out = LineQueue::new(&queue);
        out.write_line(format_args!("passkey {:06}", 42));
        out.blank_line();

        assert_eq!(queue.try_receive().unwrap().as_str(), "passkey 000042");
        assert_eq!(queue.try_receive().unwrap().as_str(), "");
        assert!(queue.try_receive().is_err());
    }

    #[test]
    fn line_queue_drops_when_full_and_truncates_long_lines() {
        let queue = OperatorQueue::new();
        let mut out = LineQueue::new(&queue);
        for i in 0..OPERATOR_QUEUE_DEPTH + 3 {
            out.write_line(format_args!("line {}", i));
        }
        assert_eq!(queue.len(), OPERATOR_QUEUE_DEPTH);
        assert_eq!(queue.try_receive().unwrap().as_str(), "line 0");

        let queue = OperatorQueue::new();
        let mut out = LineQueue::new(&queue);
        let long = [b'x'; 200];
        out.write_line(format_args!("{}", core::str::from_utf8(&long).unwrap()));
        assert!(queue.try_receive().unwrap().len() <= OPERATOR_LINE_LEN);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::OperatorChannel;
    use core::fmt;
    use std::string::{String, ToString};
    use std::vec::Vec;

    /// Records every operator line.
    #[derive(Default)]
    pub struct Transcript {
        pub lines: Vec<String>,
    }

    impl Transcript {
        pub fn contains(&self, needle: &str) -> bool {
            self.lines.iter().any(|l| l.contains(needle))
        }
    }

    impl OperatorChannel for Transcript {
        fn write_line(&mut self, args: fmt::Arguments<'_>) {
            self.lines.push(args.to_string());
        }
    }
}
