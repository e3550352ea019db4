//! SoftDevice security handler.
//!
//! Keeps bonds in RAM and hands every pairing challenge to the
//! [`PairingAuthenticator`], which prints passkeys on the operator console.

use core::cell::{Cell, RefCell};

use heapless::Vec;
use nrf_softdevice::ble::security::{IoCapabilities, PasskeyReply, SecurityHandler};
use nrf_softdevice::ble::{
    Address, AddressType, Connection, EncryptionInfo, IdentityKey, MasterId, SecurityMode,
};

use crate::config::MAX_BONDS;
use crate::error::Error;
use crate::ui::{console, OperatorChannel};

use super::pairing::{passkey_from_ascii, AuthResponder, BondStore, PairingAuthenticator};
use super::PeerAddress;

struct PeerBond {
    address: PeerAddress,
    master_id: MasterId,
    key: EncryptionInfo,
    peer_id: IdentityKey,
}

pub struct Bonder<O> {
    peers: RefCell<Vec<PeerBond, MAX_BONDS>>,
    /// Peer of the connection being set up; the passkey callbacks carry
    /// no connection.
    current: Cell<Option<PeerAddress>>,
    /// A bond was stored for `current`.
    bonded: Cell<bool>,
    authenticator: RefCell<PairingAuthenticator<O>>,
}

impl<O: OperatorChannel> Bonder<O> {
    pub fn new(operator: O) -> Self {
        Self {
            peers: RefCell::new(Vec::new()),
            current: Cell::new(None),
            bonded: Cell::new(false),
            authenticator: RefCell::new(PairingAuthenticator::new(operator)),
        }
    }

    pub fn set_peer(&self, peer: PeerAddress) {
        self.current.set(Some(peer));
        self.bonded.set(false);
    }

    fn peer(&self) -> PeerAddress {
        self.current
            .get()
            .unwrap_or(PeerAddress::new([0; 6], false))
    }

    /// Encryption could not be established on the current link.
    pub fn report_auth_failed(&self, reason: u8) {
        self.authenticator
            .borrow_mut()
            .on_auth_failed(&self.peer(), reason);
    }

    /// A fresh pairing on the current link finished encrypting.
    ///
    /// A bonded pairing has already been announced from `on_bonded`; only
    /// the unbonded outcome is reported here.
    pub fn finish_pairing(&self) {
        if !self.bonded.get() {
            self.authenticator
                .borrow_mut()
                .on_auth_complete(&self.peer(), false);
        }
    }

    /// Forget every bonded keyboard.
    pub fn clear_bonds(&self) -> usize {
        let mut auth = self.authenticator.borrow_mut();
        let removed = auth.clear_bonds(&mut BondList(&self.peers));
        console::print_bonds_cleared(auth.operator_mut(), removed);
        removed
    }
}

/// [`BondStore`] view of the RAM bond list.
struct BondList<'a>(&'a RefCell<Vec<PeerBond, MAX_BONDS>>);

impl BondStore for BondList<'_> {
    fn bonded_peers(&self) -> Vec<PeerAddress, MAX_BONDS> {
        self.0.borrow().iter().map(|p| p.address).collect()
    }

    fn unpair(&mut self, peer: &PeerAddress) -> Result<(), Error> {
        self.0.borrow_mut().retain(|p| p.address != *peer);
        Ok(())
    }
}

/// Reply handle for a passkey-entry challenge.
struct EntryReply(Option<PasskeyReply>);

impl AuthResponder for EntryReply {
    fn confirm_numeric(&mut self) {
        warn!("numeric confirmation does not apply to passkey entry");
    }

    fn cancel_auth(&mut self) {
        if let Some(reply) = self.0.take() {
            if reply.reply(None).is_err() {
                warn!("passkey entry cancel rejected");
            }
        }
    }
}

impl<O: OperatorChannel> SecurityHandler for Bonder<O> {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::DisplayOnly
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn display_passkey(&self, passkey: &[u8; 6]) {
        self.authenticator
            .borrow_mut()
            .on_display_passkey(&self.peer(), passkey_from_ascii(passkey));
    }

    fn enter_passkey(&self, reply: PasskeyReply) {
        self.authenticator
            .borrow_mut()
            .on_passkey_entry_requested(&self.peer(), &mut EntryReply(Some(reply)));
    }

    fn on_bonded(
        &self,
        conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        let address = peer_address(&conn.peer_address());
        {
            let mut peers = self.peers.borrow_mut();
            if let Some(existing) = peers.iter_mut().find(|p| p.master_id == master_id) {
                existing.key = key;
                existing.peer_id = peer_id;
            } else {
                if peers.is_full() {
                    peers.remove(0);
                }
                let _ = peers.push(PeerBond {
                    address,
                    master_id,
                    key,
                    peer_id,
                });
            }
        }
        self.bonded.set(true);
        self.authenticator
            .borrow_mut()
            .on_auth_complete(&address, true);
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.peers
            .borrow()
            .iter()
            .find_map(|p| (p.master_id == master_id).then_some(p.key))
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        self.peers.borrow().iter().find_map(|p| {
            p.peer_id
                .is_match(conn.peer_address())
                .then_some((p.master_id, p.key))
        })
    }

    fn on_security_update(&self, _conn: &Connection, mode: SecurityMode) {
        info!("BLE security mode updated: {}", mode);
    }
}

/// Convert a SoftDevice address.
pub fn peer_address(addr: &Address) -> PeerAddress {
    PeerAddress::new(addr.bytes(), addr.address_type() != AddressType::Public)
}
