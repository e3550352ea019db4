//! Pairing authenticator.
//!
//! The bridge has a display (the serial console) but no keypad, so it
//! answers security-manager challenges as a display-only device:
//!
//! - passkey display: print the 6-digit code for the user to type on the
//!   keyboard
//! - passkey entry: cancel, there is nothing to type it on
//! - numeric comparison: confirm without asking
//!
//! Failed pairings are reported and never retried here; the Link Manager
//! drops the link and scans again.

use heapless::Vec;

use crate::config::MAX_BONDS;
use crate::error::Error;
use crate::ui::{OperatorChannel, RULE};

use super::PeerAddress;

/// Replies to the pending security-manager challenge.
pub trait AuthResponder {
    /// Accept a numeric-comparison value.
    fn confirm_numeric(&mut self);

    /// Abort the pairing procedure.
    fn cancel_auth(&mut self);
}

/// Bond storage owned by the security manager.
pub trait BondStore {
    fn bonded_peers(&self) -> Vec<PeerAddress, MAX_BONDS>;

    fn unpair(&mut self, peer: &PeerAddress) -> Result<(), Error>;
}

/// Numeric value of a passkey given as six ASCII digits.
pub fn passkey_from_ascii(digits: &[u8; 6]) -> u32 {
    digits
        .iter()
        .fold(0, |acc, &d| acc * 10 + u32::from(d.wrapping_sub(b'0') % 10))
}

pub struct PairingAuthenticator<O> {
    operator: O,
}

impl<O: OperatorChannel> PairingAuthenticator<O> {
    pub const fn new(operator: O) -> Self {
        Self { operator }
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn operator_mut(&mut self) -> &mut O {
        &mut self.operator
    }

    /// Show the passkey the user must type on the keyboard.
    pub fn on_display_passkey(&mut self, peer: &PeerAddress, passkey: u32) {
        info!("Pairing request from {}, passkey shown on console", peer);

        let out = &mut self.operator;
        out.blank_line();
        out.write_line(format_args!("{}", RULE));
        out.write_line(format_args!("PAIRING REQUEST from {}", peer));
        out.write_line(format_args!("Enter this passkey on your keyboard:"));
        out.blank_line();
        out.write_line(format_args!("        {:06}", passkey % 1_000_000));
        out.blank_line();
        out.write_line(format_args!("{}", RULE));
        out.blank_line();
    }

    /// The peer wants us to type a passkey. We can't.
    pub fn on_passkey_entry_requested(&mut self, peer: &PeerAddress, responder: &mut impl AuthResponder) {
        warn!("Passkey entry requested by {} - not supported", peer);
        responder.cancel_auth();
    }

    pub fn on_numeric_confirm(
        &mut self,
        peer: &PeerAddress,
        passkey: u32,
        responder: &mut impl AuthResponder,
    ) {
        info!("Passkey confirm for {}: {}", peer, passkey);
        responder.confirm_numeric();
    }

    pub fn on_auth_complete(&mut self, peer: &PeerAddress, bonded: bool) {
        if !bonded {
            info!("Pairing complete (not bonded): {}", peer);
            return;
        }

        info!("Pairing successful with {}", peer);
        let out = &mut self.operator;
        out.blank_line();
        out.write_line(format_args!("{}", RULE));
        out.write_line(format_args!("PAIRING SUCCESSFUL with {}", peer));
        out.write_line(format_args!("Bond stored - will auto-reconnect"));
        out.write_line(format_args!("{}", RULE));
        out.blank_line();
    }

    pub fn on_auth_failed(&mut self, peer: &PeerAddress, reason: u8) {
        error!("Pairing failed: {}, reason {}", peer, reason);

        let out = &mut self.operator;
        out.blank_line();
        out.write_line(format_args!("PAIRING FAILED with {} (reason {})", peer, reason));
        out.write_line(format_args!("Please try again."));
        out.blank_line();
    }

    /// Remove every stored bond. Returns how many were removed.
    ///
    /// A bond that refuses to go is logged and skipped.
    pub fn clear_bonds(&mut self, store: &mut impl BondStore) -> usize {
        info!("Clearing all bonds...");
        let mut removed = 0;
        for peer in store.bonded_peers() {
            match store.unpair(&peer) {
                Ok(()) => {
                    info!("Unpaired: {}", peer);
                    removed += 1;
                }
                Err(e) => error!("Failed to unpair {}: {:?}", peer, e),
            }
        }
        info!("All bonds cleared");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::testing::Transcript;

    #[derive(Default)]
    struct Responder {
        confirmed: u32,
        cancelled: u32,
    }

    impl AuthResponder for Responder {
        fn confirm_numeric(&mut self) {
            self.confirmed += 1;
        }

        fn cancel_auth(&mut self) {
            self.cancelled += 1;
        }
    }

    struct Store {
        bonds: Vec<PeerAddress, MAX_BONDS>,
        stuck: Option<PeerAddress>,
    }

    impl BondStore for Store {
        fn bonded_peers(&self) -> Vec<PeerAddress, MAX_BONDS> {
            self.bonds.clone()
        }

        fn unpair(&mut self, peer: &PeerAddress) -> Result<(), Error> {
            if self.stuck.as_ref() == Some(peer) {
                return Err(Error::Link(crate::error::LinkError::Raw(8)));
            }
            self.bonds.retain(|p| p != peer);
            Ok(())
        }
    }

    const PEER: PeerAddress = PeerAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0xC6], true);

    #[test]
    fn passkey_is_zero_padded_to_six_digits() {
        let mut auth = PairingAuthenticator::new(Transcript::default());
        auth.on_display_passkey(&PEER, 4_321);
        assert!(auth.operator().lines.iter().any(|l| l.trim() == "004321"));
        assert!(auth.operator().contains("PAIRING REQUEST from C6:55:44:33:22:11"));
    }

    #[test]
    fn ascii_passkey_digits_are_decoded() {
        assert_eq!(passkey_from_ascii(b"004321"), 4_321);
        assert_eq!(passkey_from_ascii(b"999999"), 999_999);
    }

    #[test]
    fn passkey_entry_is_cancelled() {
        let mut auth = PairingAuthenticator::new(Transcript::default());
        let mut responder = Responder::default();
        auth.on_passkey_entry_requested(&PEER, &mut responder);
        assert_eq!((responder.cancelled, responder.confirmed), (1, 0));
    }

    #[test]
    fn numeric_comparison_is_auto_confirmed() {
        let mut auth = PairingAuthenticator::new(Transcript::default());
        let mut responder = Responder::default();
        auth.on_numeric_confirm(&PEER, 123_456, &mut responder);
        assert_eq!((responder.confirmed, responder.cancelled), (1, 0));
    }

    #[test]
    fn outcomes_are_reported_to_operator() {
        let mut auth = PairingAuthenticator::new(Transcript::default());
        auth.on_auth_complete(&PEER, false);
        assert!(auth.operator().lines.is_empty());

        auth.on_auth_complete(&PEER, true);
        assert!(auth.operator().contains("PAIRING SUCCESSFUL"));

        auth.on_auth_failed(&PEER, 4);
        assert!(auth.operator().contains("(reason 4)"));
        assert!(auth.operator().contains("Please try again."));
    }

    #[test]
    fn clear_bonds_is_idempotent() {
        let mut auth = PairingAuthenticator::new(Transcript::default());
        let mut store = Store {
            bonds: Vec::from_slice(&[PEER, PeerAddress::new([1; 6], false)]).unwrap(),
            stuck: None,
        };

        assert_eq!(auth.clear_bonds(&mut store), 2);
        assert!(store.bonds.is_empty());
        assert_eq!(auth.clear_bonds(&mut store), 0);
    }

    #[test]
    fn clear_bonds_skips_a_bond_that_will_not_go() {
        let mut auth = PairingAuthenticator::new(Transcript::default());
        let other = PeerAddress::new([1; 6], false);
        let mut store = Store {
            bonds: Vec::from_slice(&[PEER, other]).unwrap(),
            stuck: Some(PEER),
        };

        assert_eq!(auth.clear_bonds(&mut store), 1);
        assert_eq!(store.bonds.as_slice(), &[PEER]);
    }
}
