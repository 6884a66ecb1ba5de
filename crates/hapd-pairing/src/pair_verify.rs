//! Pair-verify (M1-M4), accessory side.
//!
//! A paired controller and the accessory run an ephemeral X25519 exchange
//! and sign both ephemeral keys with their long-term Ed25519 keys:
//!
//! ```text
//! M1 ->  {State=1, PublicKey=controller ephemeral}
//! M2 <-  {State=2, PublicKey=accessory ephemeral, EncryptedData={Identifier, Signature}}
//! M3 ->  {State=3, EncryptedData={Identifier, Signature}}
//! M4 <-  {State=4}
//! ```
//!
//! After M4 the session switches to encrypted frames keyed from the shared
//! secret.

use hapd_core::error::{CryptoError, PairingError, Result};
use hapd_crypto::chacha::{nonce_from_string, nonces};
use hapd_crypto::curve25519::EcdhKeyPair;
use hapd_crypto::ed25519;
use hapd_crypto::hkdf::{self, Context};
use hapd_crypto::keys::{SharedSecret, TrafficKeys};
use hapd_crypto::tlv::{Tlv8, TlvType};

use crate::event::{ConnectionId, Event, Route};
use crate::manager::{required, PairingManager, Queue};
use crate::session::{CryptoFrame, FrameData, FramePurpose, VerifyExchange};

impl PairingManager {
    /// M1: derive the shared secret and sign both ephemeral keys.
    pub(crate) fn verify_m1(&mut self, conn: ConnectionId, tlv: &Tlv8, queue: &mut Queue) -> Result<()> {
        let peer_public: [u8; 32] = required(tlv, TlvType::PublicKey)?;
        self.session_mut(conn)?.restart(Route::PairVerify);

        let ephemeral = EcdhKeyPair::generate();
        let accessory_public = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(&peer_public)?;
        let handshake_key = hkdf::derive(Context::VerifyEncrypt, &shared)?;

        let identity = self.require_identity()?;
        let mut message =
            Vec::with_capacity(accessory_public.len() + identity.id_bytes().len() + peer_public.len());
        message.extend_from_slice(&accessory_public);
        message.extend_from_slice(identity.id_bytes());
        message.extend_from_slice(&peer_public);
        let signature = identity.sign(&message);

        let sub = Tlv8::insert(None, TlvType::Signature, &signature);
        let sub = Tlv8::insert(Some(sub), TlvType::Identifier, identity.id_bytes()).export();

        let session = self.session_mut(conn)?;
        session.verify = Some(VerifyExchange {
            accessory_public,
            peer_public,
            shared_secret: SharedSecret::new(shared.to_vec()),
            handshake_key,
            peer: None,
        });
        session.frame = Some(CryptoFrame::handshake(
            FramePurpose::VerifyM2,
            handshake_key,
            nonce_from_string(nonces::PAIR_VERIFY_M2),
            FrameData::Plain(sub),
        ));

        tracing::debug!(%conn, "Pair-verify started");
        queue.emit(Event::EncryptNeeded(conn));
        Ok(())
    }

    /// M2 sub-TLV sealed: answer with the accessory ephemeral key.
    pub(crate) fn send_verify_m2(&mut self, conn: ConnectionId, sealed: Vec<u8>) {
        let Some(accessory_public) = self
            .sessions
            .get(&conn)
            .filter(|s| s.is_verifying)
            .and_then(|s| s.verify.as_ref())
            .map(|verify| verify.accessory_public)
        else {
            return;
        };

        let tlv = Tlv8::insert(None, TlvType::EncryptedData, &sealed);
        let tlv = Tlv8::insert(Some(tlv), TlvType::PublicKey, &accessory_public);
        let tlv = Tlv8::insert(Some(tlv), TlvType::State, &[2]);
        tracing::debug!(%conn, "Pair-verify M2 sent");
        self.respond(conn, tlv);
    }

    /// M3: queue the controller's sealed proof for decryption.
    pub(crate) fn verify_m3(&mut self, conn: ConnectionId, tlv: &Tlv8, queue: &mut Queue) -> Result<()> {
        let sealed = tlv
            .get(TlvType::EncryptedData)
            .ok_or(PairingError::MissingTlv(TlvType::EncryptedData as u8))?;

        let session = self.session_mut(conn)?;
        let key = session
            .verify
            .as_ref()
            .map(|verify| verify.handshake_key)
            .ok_or_else(|| PairingError::InvalidState("no pair-verify exchange".into()))?;
        session.advance(3);
        session.frame = Some(CryptoFrame::handshake(
            FramePurpose::VerifyM3,
            key,
            nonce_from_string(nonces::PAIR_VERIFY_M3),
            FrameData::Sealed(sealed),
        ));

        tracing::debug!(%conn, "Pair-verify M3 accepted");
        queue.emit(Event::DecryptNeeded(conn));
        Ok(())
    }

    /// M3 sub-TLV opened (or rejected).
    pub(crate) fn finish_verify_m3(&mut self, conn: ConnectionId, data: FrameData, queue: &mut Queue) {
        match self.identify_controller(conn, data) {
            Ok(()) => queue.emit(Event::DeviceVerified(conn)),
            Err(err) => self.fail_step(conn, err, queue),
        }
    }

    fn identify_controller(&mut self, conn: ConnectionId, data: FrameData) -> Result<()> {
        let FrameData::Plain(plaintext) = data else {
            return Err(CryptoError::AuthTagMismatch.into());
        };
        let sub = Tlv8::parse(&plaintext)?;
        let id = sub
            .get(TlvType::Identifier)
            .ok_or(PairingError::MissingTlv(TlvType::Identifier as u8))?;
        let signature: [u8; 64] = required(&sub, TlvType::Signature)?;

        let peer = self
            .store
            .retrieve_peer(&id)?
            .ok_or_else(|| PairingError::UnknownPeer(String::from_utf8_lossy(&id).into_owned()))?;

        let session = self.session_mut(conn)?;
        let verify = session
            .verify
            .as_mut()
            .ok_or_else(|| PairingError::InvalidState("no pair-verify exchange".into()))?;

        let mut message = Vec::with_capacity(verify.peer_public.len() + id.len() + verify.accessory_public.len());
        message.extend_from_slice(&verify.peer_public);
        message.extend_from_slice(&id);
        message.extend_from_slice(&verify.accessory_public);
        ed25519::verify(&peer.public_key, &message, &signature)
            .map_err(|_| PairingError::SignatureInvalid)?;

        verify.peer = Some(peer);
        Ok(())
    }

    /// Controller verified: send M4 and switch to encrypted frames.
    pub(crate) fn on_device_verified(&mut self, conn: ConnectionId, queue: &mut Queue) {
        let ready = self
            .sessions
            .get(&conn)
            .filter(|s| s.is_verifying && s.current_step == 4)
            .and_then(|s| s.verify.as_ref())
            .and_then(|verify| verify.peer.map(|peer| (peer, TrafficKeys::derive(&verify.shared_secret))));
        let Some((peer, keys)) = ready else {
            return;
        };
        let keys = match keys {
            Ok(keys) => keys,
            Err(err) => {
                self.fail_step(conn, err.into(), queue);
                return;
            }
        };

        // M4 goes out in the clear, ahead of any encrypted frame.
        self.respond(conn, Tlv8::insert(None, TlvType::State, &[4]));
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.install_keys(&keys);
            session.peer_id = Some(peer.id);
            session.end_exchange();
        }
        tracing::info!(%conn, peer = %peer.id_lossy(), "Controller verified");
        self.pump(conn, queue);
    }
}
