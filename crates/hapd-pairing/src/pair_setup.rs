//! Pair-setup (M1-M6), accessory side.
//!
//! The controller proves knowledge of the setup code with SRP-6a, then both
//! sides exchange their Ed25519 long-term keys under the SRP session key:
//!
//! ```text
//! M1 ->  {State=1, Method=0}
//! M2 <-  {State=2, PublicKey=B, Salt}
//! M3 ->  {State=3, PublicKey=A, Proof=M1}
//! M4 <-  {State=4, Proof=M2}
//! M5 ->  {State=5, EncryptedData={Identifier, PublicKey, Signature}}
//! M6 <-  {State=6, EncryptedData={Identifier, PublicKey, Signature}}
//! ```
//!
//! The four exponentiations (`v`, `g^b`, `v^u`, `S`) run on the
//! exponentiation engine; each result arrives as an `ExpModFinal` event.

use hapd_core::error::{CryptoError, PairingError, Result};
use hapd_crypto::chacha::{nonce_from_string, nonces, TAG_LEN};
use hapd_crypto::ed25519;
use hapd_crypto::hkdf::{self, Context};
use hapd_crypto::srp::{SrpVerifier, PAIR_SETUP_USERNAME};
use hapd_crypto::tlv::{Tlv8, TlvType};
use num_bigint::BigUint;

use crate::event::{ConnectionId, Event, ExpModStage, ExpModTarget, Route};
use crate::manager::{required, PairingManager, Queue};
use crate::session::{CryptoFrame, FrameData, FramePurpose, SetupExchange};
use crate::traits::{PeerRecord, PEER_ID_LEN};

impl PairingManager {
    /// M1: claim the pairing slot and start deriving `B`.
    pub(crate) fn setup_m1(&mut self, conn: ConnectionId, queue: &mut Queue) -> Result<()> {
        self.pairing_owner = Some(conn);
        self.engine.cancel_connection(conn);

        let (srp, request) =
            SrpVerifier::new(PAIR_SETUP_USERNAME, self.config.setup_code.as_bytes());
        let session = self.session_mut(conn)?;
        session.restart(Route::PairSetup);
        session.setup = Some(SetupExchange::new(srp));

        tracing::info!(%conn, "Pair-setup started");
        self.submit_expmod(conn, ExpModStage::Verifier, request, queue)
    }

    /// M3: accept `A` and the controller proof, then derive `S`.
    pub(crate) fn setup_m3(&mut self, conn: ConnectionId, tlv: &Tlv8, queue: &mut Queue) -> Result<()> {
        let client_public = tlv
            .get(TlvType::PublicKey)
            .ok_or(PairingError::MissingTlv(TlvType::PublicKey as u8))?;
        let proof = tlv
            .get(TlvType::Proof)
            .ok_or(PairingError::MissingTlv(TlvType::Proof as u8))?;

        let session = self.session_mut(conn)?;
        let setup = session
            .setup
            .as_mut()
            .ok_or_else(|| PairingError::InvalidState("no pair-setup exchange".into()))?;
        let request = setup.srp.begin_proof(&client_public, &proof)?;
        session.advance(3);

        tracing::debug!(%conn, "Pair-setup M3 accepted");
        self.submit_expmod(conn, ExpModStage::VerifierPower, request, queue)
    }

    /// M5: queue the controller's sealed record for decryption.
    pub(crate) fn setup_m5(&mut self, conn: ConnectionId, tlv: &Tlv8, queue: &mut Queue) -> Result<()> {
        let sealed = tlv
            .get(TlvType::EncryptedData)
            .ok_or(PairingError::MissingTlv(TlvType::EncryptedData as u8))?;
        if sealed.len() <= TAG_LEN {
            return Err(CryptoError::Decryption("M5 encrypted data too short".into()).into());
        }

        let session = self.session_mut(conn)?;
        let session_key = session
            .setup
            .as_ref()
            .and_then(|setup| setup.srp.session_key())
            .ok_or(PairingError::SrpVerificationFailed)?;
        let key = hkdf::derive(Context::SetupEncrypt, session_key)?;
        session.advance(5);
        session.frame = Some(CryptoFrame::handshake(
            FramePurpose::SetupM5,
            key,
            nonce_from_string(nonces::PAIR_SETUP_M5),
            FrameData::Sealed(sealed),
        ));

        tracing::debug!(%conn, "Pair-setup M5 accepted");
        queue.emit(Event::DecryptNeeded(conn));
        Ok(())
    }

    /// Route one exponentiation result into the exchange that asked for it.
    pub(crate) fn on_expmod_final(&mut self, target: ExpModTarget, value: BigUint, queue: &mut Queue) {
        let conn = target.conn;
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if session.exchange != target.exchange {
            tracing::trace!(%conn, stage = ?target.stage, "Discarding stale exponentiation");
            return;
        }
        let Some(setup) = session.setup.as_mut() else {
            return;
        };

        let next = match target.stage {
            ExpModStage::Verifier => Ok(Some((ExpModStage::PublicTerm, setup.srp.set_verifier(value)))),
            ExpModStage::PublicTerm => setup.srp.set_public_term(value).map(|_| {
                setup.public_key_ready = true;
                queue.emit(Event::SetupInitComplete(conn));
                None
            }),
            ExpModStage::VerifierPower => setup
                .srp
                .set_verifier_power(value)
                .map(|request| Some((ExpModStage::Premaster, request))),
            ExpModStage::Premaster => setup.srp.set_premaster(value).map(|()| {
                setup.proof_ready = true;
                queue.emit(Event::SetupProofComplete(conn));
                None
            }),
        };

        let result = match next {
            Ok(Some((stage, request))) => self.submit_expmod(conn, stage, request, queue),
            Ok(None) => Ok(()),
            Err(e) => Err(e.into()),
        };
        if let Err(err) = result {
            self.fail_step(conn, err, queue);
        }
    }

    /// `B` is ready: send M2.
    pub(crate) fn on_setup_init_complete(&mut self, conn: ConnectionId) {
        let Some(setup) = self
            .sessions
            .get(&conn)
            .filter(|s| s.is_pairing && s.current_step == 2)
            .and_then(|s| s.setup.as_ref())
            .filter(|setup| setup.public_key_ready)
        else {
            return;
        };
        let Some(public_key) = setup.srp.public_key() else {
            return;
        };
        let salt = *setup.srp.salt();

        let tlv = Tlv8::insert(None, TlvType::Salt, &salt);
        let tlv = Tlv8::insert(Some(tlv), TlvType::PublicKey, &public_key);
        let tlv = Tlv8::insert(Some(tlv), TlvType::State, &[2]);
        tracing::debug!(%conn, "Pair-setup M2 sent");
        self.respond(conn, tlv);
    }

    /// `K` and both proofs are ready: check the controller and send M4.
    pub(crate) fn on_setup_proof_complete(&mut self, conn: ConnectionId, queue: &mut Queue) {
        let Some(setup) = self
            .sessions
            .get_mut(&conn)
            .filter(|s| s.is_pairing && s.current_step == 4)
            .and_then(|s| s.setup.as_mut())
            .filter(|setup| setup.proof_ready)
        else {
            return;
        };

        if !setup.srp.verify_client_proof() {
            self.fail_step(conn, PairingError::SrpVerificationFailed.into(), queue);
            return;
        }
        let Some(server_proof) = setup.srp.server_proof().map(<[u8]>::to_vec) else {
            return;
        };

        let tlv = Tlv8::insert(None, TlvType::Proof, &server_proof);
        let tlv = Tlv8::insert(Some(tlv), TlvType::State, &[4]);
        tracing::debug!(%conn, "Pair-setup M4 sent");
        self.respond(conn, tlv);
    }

    /// M5 sub-TLV opened (or rejected).
    pub(crate) fn finish_setup_m5(&mut self, conn: ConnectionId, data: FrameData, queue: &mut Queue) {
        match self.accept_controller(conn, data) {
            Ok(()) => queue.emit(Event::DevicePaired(conn)),
            Err(err) => self.fail_step(conn, err, queue),
        }
    }

    fn accept_controller(&mut self, conn: ConnectionId, data: FrameData) -> Result<()> {
        let FrameData::Plain(plaintext) = data else {
            return Err(CryptoError::AuthTagMismatch.into());
        };
        let sub = Tlv8::parse(&plaintext)?;
        let id: [u8; PEER_ID_LEN] = required(&sub, TlvType::Identifier)?;
        let ltpk: [u8; 32] = required(&sub, TlvType::PublicKey)?;
        let signature: [u8; 64] = required(&sub, TlvType::Signature)?;

        let session = self.session_mut(conn)?;
        let setup = session
            .setup
            .as_mut()
            .ok_or_else(|| PairingError::InvalidState("no pair-setup exchange".into()))?;
        let session_key = setup
            .srp
            .session_key()
            .ok_or(PairingError::SrpVerificationFailed)?;
        let controller_x = hkdf::derive(Context::ControllerSign, session_key)?;

        let mut message = Vec::with_capacity(controller_x.len() + PEER_ID_LEN + ltpk.len());
        message.extend_from_slice(&controller_x);
        message.extend_from_slice(&id);
        message.extend_from_slice(&ltpk);
        ed25519::verify(&ltpk, &message, &signature).map_err(|_| PairingError::SignatureInvalid)?;

        setup.peer = Some(PeerRecord::new(id, ltpk));
        session.is_paired = true;
        Ok(())
    }

    /// Controller accepted: seal the accessory's own record for M6.
    pub(crate) fn on_device_paired(&mut self, conn: ConnectionId, queue: &mut Queue) {
        let ready = self.sessions.get(&conn).is_some_and(|s| {
            s.is_pairing
                && s.current_step == 6
                && s.setup.as_ref().is_some_and(|setup| setup.peer.is_some())
        });
        if !ready {
            return;
        }
        match self.seal_accessory_record(conn) {
            Ok(()) => queue.emit(Event::EncryptNeeded(conn)),
            Err(err) => self.fail_step(conn, err, queue),
        }
    }

    fn seal_accessory_record(&mut self, conn: ConnectionId) -> Result<()> {
        let session = self
            .sessions
            .get(&conn)
            .ok_or(PairingError::UnknownConnection(conn.0))?;
        let session_key = session
            .setup
            .as_ref()
            .and_then(|setup| setup.srp.session_key())
            .ok_or(PairingError::SrpVerificationFailed)?;
        let accessory_x = hkdf::derive(Context::AccessorySign, session_key)?;
        let key = hkdf::derive(Context::SetupEncrypt, session_key)?;

        let identity = self.require_identity()?;
        let ltpk = identity.public_key();
        let mut message = Vec::with_capacity(accessory_x.len() + identity.id_bytes().len() + ltpk.len());
        message.extend_from_slice(&accessory_x);
        message.extend_from_slice(identity.id_bytes());
        message.extend_from_slice(&ltpk);
        let signature = identity.sign(&message);

        let sub = Tlv8::insert(None, TlvType::Signature, &signature);
        let sub = Tlv8::insert(Some(sub), TlvType::PublicKey, &ltpk);
        let sub = Tlv8::insert(Some(sub), TlvType::Identifier, identity.id_bytes()).export();

        self.session_mut(conn)?.frame = Some(CryptoFrame::handshake(
            FramePurpose::SetupM6,
            key,
            nonce_from_string(nonces::PAIR_SETUP_M6),
            FrameData::Plain(sub),
        ));
        Ok(())
    }

    /// M6 sealed: persist the controller, then answer.
    pub(crate) fn send_setup_m6(&mut self, conn: ConnectionId, sealed: Vec<u8>, queue: &mut Queue) {
        let Some(peer) = self
            .sessions
            .get(&conn)
            .and_then(|s| s.setup.as_ref())
            .and_then(|setup| setup.peer)
        else {
            return;
        };

        if let Err(err) = self.store.add_peer(&peer) {
            self.fail_step(conn, err, queue);
            return;
        }

        let tlv = Tlv8::insert(None, TlvType::EncryptedData, &sealed);
        let tlv = Tlv8::insert(Some(tlv), TlvType::State, &[6]);
        self.respond(conn, tlv);

        if let Some(session) = self.sessions.get_mut(&conn) {
            session.end_exchange();
        }
        if self.pairing_owner == Some(conn) {
            self.pairing_owner = None;
        }
        tracing::info!(%conn, peer = %peer.id_lossy(), "Controller paired");
    }
}
