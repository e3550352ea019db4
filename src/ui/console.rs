//! Serial console - banner and single-key commands.
//!
//! Input is polled one byte at a time. Clearing bonds is gated behind a
//! confirmation: `c` prompts, then `y` confirms, `n` cancels and any other
//! key cancels as invalid input.

use super::{OperatorChannel, RULE};

/// Commands the console asks the rest of the bridge to carry out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConsoleCommand {
    /// Remove every stored bond, then look for keyboards again.
    ClearBonds,
}

/// Print the start-up banner.
pub fn print_banner(out: &mut impl OperatorChannel) {
    out.blank_line();
    out.write_line(format_args!("{}", RULE));
    out.write_line(format_args!("  BLE-to-USB-HID Keyboard Bridge"));
    out.write_line(format_args!("{}", RULE));
    out.blank_line();
    out.write_line(format_args!("This device bridges a Bluetooth HID keyboard"));
    out.write_line(format_args!("to a USB host as a boot keyboard."));
    out.blank_line();
    out.write_line(format_args!("Pairing passkeys will be displayed here."));
    out.blank_line();
    out.write_line(format_args!("Commands:"));
    out.write_line(format_args!("  c - Clear all Bluetooth bonds"));
    out.blank_line();
}

/// Print the "now scanning" notice once the link has started.
pub fn print_scanning(out: &mut impl OperatorChannel) {
    out.blank_line();
    out.write_line(format_args!("{}", RULE));
    out.write_line(format_args!("  SCANNING FOR BLUETOOTH HID KEYBOARDS"));
    out.write_line(format_args!("{}", RULE));
    out.write_line(format_args!("Put your keyboard in pairing mode now."));
    out.blank_line();
}

/// Print the outcome of a confirmed bond clear.
pub fn print_bonds_cleared(out: &mut impl OperatorChannel, removed: usize) {
    out.write_line(format_args!("Removed {} bond(s).", removed));
    out.write_line(format_args!(
        "All bonds cleared. Device will scan for new keyboards."
    ));
    out.write_line(format_args!(
        "You may need to put your keyboard in pairing mode again."
    ));
    out.blank_line();
}

/// Console input state.
#[derive(Debug, Default)]
pub struct Console {
    awaiting_confirm: bool,
}

impl Console {
    pub const fn new() -> Self {
        Self {
            awaiting_confirm: false,
        }
    }

    /// A confirmation prompt is open.
    pub fn awaiting_confirm(&self) -> bool {
        self.awaiting_confirm
    }

    /// Feed one received byte.
    pub fn on_byte(&mut self, byte: u8, out: &mut impl OperatorChannel) -> Option<ConsoleCommand> {
        if self.awaiting_confirm {
            self.awaiting_confirm = false;
            return match byte {
                b'y' | b'Y' => {
                    out.blank_line();
                    out.write_line(format_args!("Clearing all Bluetooth bonds..."));
                    Some(ConsoleCommand::ClearBonds)
                }
                b'n' | b'N' => {
                    out.blank_line();
                    out.write_line(format_args!("Bond clearing cancelled."));
                    out.blank_line();
                    None
                }
                _ => {
                    out.blank_line();
                    out.write_line(format_args!("Invalid input. Bond clearing cancelled."));
                    out.blank_line();
                    None
                }
            };
        }

        if matches!(byte, b'c' | b'C') {
            out.blank_line();
            out.write_line(format_args!("{}", RULE));
            out.write_line(format_args!("  CLEAR ALL BLUETOOTH BONDS?"));
            out.write_line(format_args!("{}", RULE));
            out.write_line(format_args!("This will remove all paired devices."));
            out.write_line(format_args!("You will need to re-pair your keyboard."));
            out.blank_line();
            out.write_line(format_args!(
                "Press 'y' to confirm, any other key to cancel: "
            ));
            self.awaiting_confirm = true;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::testing::Transcript;

    #[test]
    fn c_then_y_clears_bonds() {
        let mut out = Transcript::default();
        let mut console = Console::new();

        assert_eq!(console.on_byte(b'c', &mut out), None);
        assert!(console.awaiting_confirm());
        assert!(out.contains("CLEAR ALL BLUETOOTH BONDS?"));

        assert_eq!(console.on_byte(b'Y', &mut out), Some(ConsoleCommand::ClearBonds));
        assert!(!console.awaiting_confirm());
        assert!(out.contains("Clearing all Bluetooth bonds..."));
    }

    #[test]
    fn n_cancels() {
        let mut out = Transcript::default();
        let mut console = Console::new();
        console.on_byte(b'C', &mut out);
        assert_eq!(console.on_byte(b'n', &mut out), None);
        assert!(out.contains("Bond clearing cancelled."));
        assert!(!out.contains("Invalid input"));
    }

    #[test]
    fn any_other_key_cancels_as_invalid() {
        let mut out = Transcript::default();
        let mut console = Console::new();
        console.on_byte(b'c', &mut out);
        assert_eq!(console.on_byte(b'x', &mut out), None);
        assert!(out.contains("Invalid input. Bond clearing cancelled."));

        // The prompt is closed: a lone 'y' does nothing.
        let before = out.lines.len();
        assert_eq!(console.on_byte(b'y', &mut out), None);
        assert_eq!(out.lines.len(), before);
    }

    #[test]
    fn unknown_keys_are_ignored_without_prompt() {
        let mut out = Transcript::default();
        let mut console = Console::new();
        for b in *b"hello\r\n" {
            assert_eq!(console.on_byte(b, &mut out), None);
        }
        assert!(out.lines.is_empty());
    }

    #[test]
    fn banner_lists_commands() {
        let mut out = Transcript::default();
        print_banner(&mut out);
        assert!(out.contains("c - Clear all Bluetooth bonds"));
        assert!(out.contains("Pairing passkeys will be displayed here."));
    }
}
