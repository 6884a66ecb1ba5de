//! Pairing manager: owns every session and reacts to scheduler events.
//!
//! Requests are admitted in two phases. The gate checks the step against
//! the session and the accessory-wide pairing slot without mutating
//! anything; a rejected request only produces an error response. Once a step
//! is admitted, any failure terminates the running exchange.

use std::collections::HashMap;

use hapd_core::config::AccessoryConfig;
use hapd_core::error::{CryptoError, Error, PairingError, ParseError, Result, StorageError};
use hapd_crypto::chacha::{decrypt_with_nonce, encrypt_with_nonce};
use hapd_crypto::tlv::{Tlv8, TlvError, TlvType};

use crate::event::{ConnectionId, Event, ExpModStage, ExpModTarget, Route};
use crate::expmod::ExpModEngine;
use crate::identity::AccessoryIdentity;
use crate::outbox::{Outbound, Outbox};
use crate::scheduler::EventQueue;
use crate::session::{CryptoFrame, FrameData, FramePurpose, PairSession};
use crate::traits::PairingStore;

/// Event queue handed to manager handlers.
pub type Queue = EventQueue<PairingManager>;

/// Accessory-wide pairing state.
pub struct PairingManager {
    pub(crate) config: AccessoryConfig,
    pub(crate) store: Box<dyn PairingStore>,
    pub(crate) identity: Option<AccessoryIdentity>,
    pub(crate) sessions: HashMap<ConnectionId, PairSession>,
    /// Connection running pair-setup; only one at a time.
    pub(crate) pairing_owner: Option<ConnectionId>,
    pub(crate) engine: ExpModEngine,
    pub(crate) outbox: Outbox,
}

impl PairingManager {
    /// Create a manager over `store`, loading the accessory identity if the
    /// store already holds keys.
    pub fn new(config: AccessoryConfig, store: Box<dyn PairingStore>) -> Result<Self> {
        let identity = AccessoryIdentity::from_store(store.as_ref(), &config.accessory_id)?;
        let engine = ExpModEngine::new(config.chunked_math);
        Ok(Self {
            config,
            store,
            identity,
            sessions: HashMap::new(),
            pairing_owner: None,
            engine,
            outbox: Outbox::new(),
        })
    }

    pub fn config(&self) -> &AccessoryConfig {
        &self.config
    }

    pub fn identity(&self) -> Option<&AccessoryIdentity> {
        self.identity.as_ref()
    }

    /// The store holds no accessory keys yet.
    pub fn needs_keypair(&self) -> bool {
        self.identity.is_none()
    }

    pub fn store(&self) -> &dyn PairingStore {
        self.store.as_ref()
    }

    pub fn session(&self, conn: ConnectionId) -> Option<&PairSession> {
        self.sessions.get(&conn)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Connection currently holding the pair-setup slot.
    pub fn pairing_owner(&self) -> Option<ConnectionId> {
        self.pairing_owner
    }

    pub fn engine(&self) -> &ExpModEngine {
        &self.engine
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Route one scheduler event to its handler.
    pub fn handle_event(&mut self, event: &Event, queue: &mut Queue) {
        match event {
            Event::Connected(conn) => self.connect(*conn),
            Event::RequestReceived { conn, route, body } => {
                self.handle_request(*conn, *route, body, queue)
            }
            Event::Disconnected(conn) => self.disconnect(*conn),
            Event::KeypairNeeded => self.generate_keypair(),
            Event::SetupInitComplete(conn) => self.on_setup_init_complete(*conn),
            Event::SetupProofComplete(conn) => self.on_setup_proof_complete(*conn, queue),
            Event::EncryptNeeded(conn) => self.on_encrypt_needed(*conn, queue),
            Event::Encrypted(conn) => self.on_encrypted(*conn, queue),
            Event::DecryptNeeded(conn) => self.on_decrypt_needed(*conn, queue),
            Event::Decrypted(conn) => self.on_decrypted(*conn, queue),
            Event::DevicePaired(conn) => self.on_device_paired(*conn, queue),
            Event::DeviceVerified(conn) => self.on_device_verified(*conn, queue),
            Event::ExpModStep(job) => self.engine.step(*job, queue),
            Event::ExpModFinal { target, value, .. } => {
                self.on_expmod_final(*target, value.clone(), queue)
            }
        }
    }

    /// Track a newly accepted connection. Idempotent.
    pub fn connect(&mut self, conn: ConnectionId) {
        self.sessions.entry(conn).or_insert_with(|| {
            tracing::debug!(%conn, "Connection accepted");
            PairSession::new(conn)
        });
    }

    /// Drop a connection with everything pending for it.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        if self.sessions.remove(&conn).is_some() {
            tracing::debug!(%conn, "Connection closed");
        }
        if self.pairing_owner == Some(conn) {
            self.pairing_owner = None;
        }
        self.engine.cancel_connection(conn);
        self.outbox.forget(conn);
    }

    /// Drop every session.
    pub fn disconnect_all(&mut self) {
        let conns: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        for conn in conns {
            self.disconnect(conn);
        }
    }

    /// Create and persist the accessory keys when the store has none.
    pub fn generate_keypair(&mut self) {
        if self.identity.is_some() {
            return;
        }
        match AccessoryIdentity::load_or_generate(self.store.as_mut(), &self.config.accessory_id) {
            Ok(identity) => self.identity = Some(identity),
            Err(e) => tracing::error!(error = %e, "Unable to create accessory long-term keys"),
        }
    }

    /// Forget a paired controller and close the sessions it verified.
    pub fn remove_pairing(&mut self, peer_id: &[u8]) -> Result<bool> {
        let removed = self.store.remove_peer(peer_id)?;
        let verified: Vec<ConnectionId> = self
            .sessions
            .values()
            .filter(|s| s.peer_id.is_some_and(|id| id.as_slice() == peer_id))
            .map(|s| s.conn())
            .collect();
        for conn in verified {
            self.close_with(conn, "pairing removed");
        }
        if removed {
            tracing::info!(peer = %String::from_utf8_lossy(peer_id), "Pairing removed");
        }
        Ok(removed)
    }

    /// Queue plaintext for encryption on a verified session.
    pub fn send_frame(&mut self, conn: ConnectionId, plaintext: Vec<u8>) -> Result<Option<Event>> {
        if plaintext.is_empty() {
            return Ok(None);
        }
        self.enqueue_frame(conn, CryptoFrame::session(FramePurpose::Outbound, FrameData::Plain(plaintext)))
    }

    /// Queue bytes received on a verified session for decryption.
    pub fn receive_frame(&mut self, conn: ConnectionId, bytes: Vec<u8>) -> Result<Option<Event>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        self.enqueue_frame(conn, CryptoFrame::session(FramePurpose::Inbound, FrameData::Sealed(bytes)))
    }

    /// Decrypted session bytes received so far on `conn`.
    pub fn take_inbound(&mut self, conn: ConnectionId) -> Vec<u8> {
        self.sessions
            .get_mut(&conn)
            .map(|s| s.inbound.drain(..).flatten().collect())
            .unwrap_or_default()
    }

    pub(crate) fn session_mut(&mut self, conn: ConnectionId) -> Result<&mut PairSession> {
        self.sessions
            .get_mut(&conn)
            .ok_or_else(|| PairingError::UnknownConnection(conn.0).into())
    }

    pub(crate) fn require_identity(&self) -> Result<&AccessoryIdentity> {
        self.identity
            .as_ref()
            .ok_or_else(|| PairingError::Unavailable.into())
    }

    fn enqueue_frame(&mut self, conn: ConnectionId, frame: CryptoFrame) -> Result<Option<Event>> {
        let session = self.session_mut(conn)?;
        if !session.is_secured() {
            return Err(PairingError::NotVerified(conn.0).into());
        }
        session.backlog.push_back(frame);
        Ok(self.start_next_frame(conn))
    }

    /// Start the next backlog frame when nothing is in flight.
    pub(crate) fn start_next_frame(&mut self, conn: ConnectionId) -> Option<Event> {
        let session = self.sessions.get_mut(&conn)?;
        if session.frame.is_some() {
            return None;
        }
        let frame = session.backlog.pop_front()?;
        let event = match frame.purpose {
            FramePurpose::Outbound => Event::EncryptNeeded(conn),
            _ => Event::DecryptNeeded(conn),
        };
        session.frame = Some(frame);
        Some(event)
    }

    pub(crate) fn pump(&mut self, conn: ConnectionId, queue: &mut Queue) {
        if let Some(event) = self.start_next_frame(conn) {
            queue.emit(event);
        }
    }

    // ---- requests ----

    fn handle_request(&mut self, conn: ConnectionId, route: Route, body: &[u8], queue: &mut Queue) {
        let tlv = match Tlv8::parse(body) {
            Ok(tlv) => tlv,
            Err(e) => {
                tracing::warn!(%conn, route = route.path(), error = %e, "Malformed pairing request");
                self.reject(conn, None, TlvError::Unknown);
                return;
            }
        };
        let Some(step) = tlv.state() else {
            tracing::warn!(%conn, route = route.path(), "Pairing request without state");
            self.reject(conn, None, TlvError::Unknown);
            return;
        };
        let reply_state = step.wrapping_add(1);

        if let Err(err) = self.admit(conn, route, step) {
            tracing::warn!(%conn, route = route.path(), step, error = %err, "Pairing request rejected");
            self.reject(conn, Some(reply_state), error_code(&err));
            return;
        }

        tracing::debug!(%conn, route = route.path(), step, "Pairing request admitted");
        if step == 1 {
            self.answer_superseded(conn);
        }
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.owed_reply = Some(reply_state);
        }
        let result = match (route, step) {
            (Route::PairSetup, 1) => self.setup_m1(conn, queue),
            (Route::PairSetup, 3) => self.setup_m3(conn, &tlv, queue),
            (Route::PairSetup, _) => self.setup_m5(conn, &tlv, queue),
            (Route::PairVerify, 1) => self.verify_m1(conn, &tlv, queue),
            (Route::PairVerify, _) => self.verify_m3(conn, &tlv, queue),
        };
        if let Err(err) = result {
            tracing::warn!(%conn, route = route.path(), step, error = %err, "Pairing step failed");
            self.abort_exchange(conn, queue);
            self.respond_error(conn, Some(reply_state), error_code(&err));
        }
    }

    /// Check that `step` may run on `conn` now. Never mutates.
    fn admit(&self, conn: ConnectionId, route: Route, step: u8) -> Result<()> {
        let session = self
            .sessions
            .get(&conn)
            .ok_or(PairingError::UnknownConnection(conn.0))?;
        let frame_busy = session.frame.is_some();

        match (route, step) {
            (Route::PairSetup, 1) => {
                if session.is_paired {
                    return Err(PairingError::AlreadyPaired.into());
                }
                if session.is_verifying {
                    return Err(PairingError::InvalidState("pair-verify in progress".into()).into());
                }
                if self.pairing_owner.is_some_and(|owner| owner != conn) {
                    return Err(PairingError::Busy.into());
                }
                self.require_identity()?;
                if self.store.peer_count() >= self.config.max_peers {
                    return Err(PairingError::MaxPeers.into());
                }
            }
            (Route::PairVerify, 1) => {
                if session.is_pairing {
                    return Err(PairingError::InvalidState("pair-setup in progress".into()).into());
                }
                if session.frame.as_ref().is_some_and(|f| !f.purpose.is_handshake()) {
                    return Err(PairingError::Busy.into());
                }
                self.require_identity()?;
            }
            (Route::PairSetup, 3) | (Route::PairSetup, 5) | (Route::PairVerify, 3) => {
                if !session.accepts_step(route, step) {
                    return Err(PairingError::StateMismatch {
                        expected: session.current_step.wrapping_add(1),
                        actual: step,
                    }
                    .into());
                }
                let setup_pending = route == Route::PairSetup
                    && session.setup.as_ref().is_some_and(|s| {
                        (step == 3 && !s.public_key_ready) || (step == 5 && !s.proof_ready)
                    });
                if frame_busy || setup_pending {
                    return Err(PairingError::Busy.into());
                }
            }
            _ => {
                return Err(
                    PairingError::InvalidState(format!("unknown {} step {}", route.path(), step))
                        .into(),
                )
            }
        }
        Ok(())
    }

    // ---- responses ----

    /// Answer the admitted request on `conn`.
    pub(crate) fn respond(&mut self, conn: ConnectionId, tlv: Tlv8) {
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.owed_reply = None;
        }
        self.push_response(conn, tlv);
    }

    /// Refuse a request at admission; a reply still owed stays owed.
    fn reject(&mut self, conn: ConnectionId, state: Option<u8>, code: TlvError) {
        self.push_response(conn, error_tlv(state, code));
    }

    /// An M1 restarts the exchange: the request it supersedes gets `Unknown`.
    fn answer_superseded(&mut self, conn: ConnectionId) {
        let owed = self
            .sessions
            .get_mut(&conn)
            .and_then(|session| session.owed_reply.take());
        if let Some(state) = owed {
            tracing::debug!(%conn, state, "Answering superseded pairing request");
            self.push_response(conn, error_tlv(Some(state), TlvError::Unknown));
        }
    }

    fn push_response(&mut self, conn: ConnectionId, tlv: Tlv8) {
        self.outbox.push(Outbound::Response {
            conn,
            body: tlv.export(),
        });
    }

    pub(crate) fn respond_error(&mut self, conn: ConnectionId, state: Option<u8>, code: TlvError) {
        self.respond(conn, error_tlv(state, code));
    }

    /// Terminate the running exchange on `conn` and release the pairing slot.
    pub(crate) fn abort_exchange(&mut self, conn: ConnectionId, queue: &mut Queue) {
        if let Some(session) = self.sessions.get_mut(&conn) {
            if session.is_pairing {
                session.is_paired = false;
            }
            session.end_exchange();
        }
        if self.pairing_owner == Some(conn) {
            self.pairing_owner = None;
        }
        self.engine.cancel_connection(conn);
        self.pump(conn, queue);
    }

    /// Fail the step `conn` is in the middle of, answering with its state.
    pub(crate) fn fail_step(&mut self, conn: ConnectionId, err: Error, queue: &mut Queue) {
        let Some(state) = self.sessions.get(&conn).map(|s| s.current_step) else {
            return;
        };
        tracing::warn!(%conn, state, error = %err, "Pairing exchange failed");
        self.abort_exchange(conn, queue);
        self.respond_error(conn, Some(state), error_code(&err));
    }

    /// Poison the session and ask the transport to close it.
    fn close_with(&mut self, conn: ConnectionId, reason: &str) {
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.poison();
            session.frame = None;
            session.peer_id = None;
        }
        if self.pairing_owner == Some(conn) {
            self.pairing_owner = None;
        }
        tracing::warn!(%conn, reason, "Closing connection");
        self.outbox.discard(conn);
        self.outbox.push(Outbound::Close(conn));
    }

    // ---- frame crypto ----

    fn on_encrypt_needed(&mut self, conn: ConnectionId, queue: &mut Queue) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        let Some(frame) = session.frame.as_mut() else {
            return;
        };
        let FrameData::Plain(plaintext) = &frame.data else {
            return;
        };

        let sealed = match (&frame.sealing, session.cipher.as_mut()) {
            (Some(sealing), _) => encrypt_with_nonce(&sealing.key, &sealing.nonce, plaintext)
                .map_err(Error::Crypto),
            (None, Some(cipher)) => cipher.encrypt(plaintext),
            (None, None) => Err(PairingError::NotVerified(conn.0).into()),
        };

        match sealed {
            Ok(ciphertext) => {
                frame.data = FrameData::Sealed(ciphertext);
                queue.emit(Event::Encrypted(conn));
            }
            Err(err) if frame.purpose.is_handshake() => self.fail_step(conn, err, queue),
            Err(err) => {
                tracing::warn!(%conn, error = %err, "Unable to encrypt session frame");
                self.close_with(conn, "encryption failed");
            }
        }
    }

    fn on_decrypt_needed(&mut self, conn: ConnectionId, queue: &mut Queue) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        let Some(frame) = session.frame.as_mut() else {
            return;
        };
        let FrameData::Sealed(ciphertext) = &frame.data else {
            return;
        };

        let opened = match (&frame.sealing, session.cipher.as_mut()) {
            (Some(sealing), _) => decrypt_with_nonce(&sealing.key, &sealing.nonce, ciphertext)
                .map_err(Error::Crypto),
            (None, Some(cipher)) => cipher.decrypt_stream(ciphertext),
            (None, None) => Err(PairingError::NotVerified(conn.0).into()),
        };

        frame.data = match opened {
            Ok(plaintext) => FrameData::Plain(plaintext),
            Err(err) => {
                tracing::warn!(%conn, purpose = ?frame.purpose, error = %err, "Frame authentication failed");
                FrameData::Rejected
            }
        };
        queue.emit(Event::Decrypted(conn));
    }

    fn on_encrypted(&mut self, conn: ConnectionId, queue: &mut Queue) {
        let Some(frame) = self.sessions.get_mut(&conn).and_then(|s| s.frame.take()) else {
            return;
        };
        let FrameData::Sealed(ciphertext) = frame.data else {
            return;
        };

        match frame.purpose {
            FramePurpose::SetupM6 => self.send_setup_m6(conn, ciphertext, queue),
            FramePurpose::VerifyM2 => self.send_verify_m2(conn, ciphertext),
            FramePurpose::Outbound => self.outbox.push(Outbound::Frame {
                conn,
                bytes: ciphertext,
            }),
            other => tracing::trace!(%conn, purpose = ?other, "Ignoring unexpected encrypted frame"),
        }
        self.pump(conn, queue);
    }

    fn on_decrypted(&mut self, conn: ConnectionId, queue: &mut Queue) {
        let Some(frame) = self.sessions.get_mut(&conn).and_then(|s| s.frame.take()) else {
            return;
        };

        match frame.purpose {
            FramePurpose::SetupM5 => self.finish_setup_m5(conn, frame.data, queue),
            FramePurpose::VerifyM3 => self.finish_verify_m3(conn, frame.data, queue),
            FramePurpose::Inbound => match frame.data {
                FrameData::Plain(plaintext) => {
                    if let Some(session) = self.sessions.get_mut(&conn) {
                        if !plaintext.is_empty() {
                            session.inbound.push_back(plaintext);
                        }
                    }
                }
                _ => self.close_with(conn, "session frame failed authentication"),
            },
            other => tracing::trace!(%conn, purpose = ?other, "Ignoring unexpected decrypted frame"),
        }
        self.pump(conn, queue);
    }

    // ---- exponentiation ----

    pub(crate) fn submit_expmod(
        &mut self,
        conn: ConnectionId,
        stage: ExpModStage,
        request: hapd_crypto::expmod::ExpModRequest,
        queue: &mut Queue,
    ) -> Result<()> {
        let exchange = self.session_mut(conn)?.exchange;
        let target = ExpModTarget {
            conn,
            exchange,
            stage,
        };
        self.engine.submit(request, target, queue)?;
        Ok(())
    }
}

/// `{State, Error}` reply, State omitted when the request carried none.
fn error_tlv(state: Option<u8>, code: TlvError) -> Tlv8 {
    let tlv = Tlv8::insert(None, TlvType::Error, &[code as u8]);
    match state {
        Some(state) => Tlv8::insert(Some(tlv), TlvType::State, &[state]),
        None => tlv,
    }
}

/// Value of `tag`, which must be exactly `N` bytes long.
pub(crate) fn required<const N: usize>(tlv: &Tlv8, tag: TlvType) -> Result<[u8; N]> {
    let value = tlv
        .get(tag)
        .ok_or(PairingError::MissingTlv(tag as u8))?;
    let len = value.len();
    value.try_into().map_err(|_| {
        Error::Parse(ParseError::InvalidValue(format!(
            "{:?} is {} bytes, expected {}",
            tag, len, N
        )))
    })
}

/// One-byte TLV error code reported for `err`.
pub fn error_code(err: &Error) -> TlvError {
    match err {
        Error::Pairing(e) => match e {
            PairingError::Busy => TlvError::Busy,
            PairingError::MaxPeers => TlvError::MaxPeers,
            PairingError::Unavailable => TlvError::Unavailable,
            PairingError::SrpVerificationFailed
            | PairingError::InvalidPublicKey
            | PairingError::SignatureInvalid
            | PairingError::StateMismatch { .. }
            | PairingError::MissingTlv(_)
            | PairingError::UnknownPeer(_) => TlvError::Authentication,
            PairingError::AlreadyPaired
            | PairingError::InvalidState(_)
            | PairingError::UnknownConnection(_)
            | PairingError::NotVerified(_)
            | PairingError::Protocol(_) => TlvError::Unknown,
        },
        Error::Crypto(CryptoError::InvalidModulus(_)) => TlvError::Unknown,
        Error::Crypto(_) | Error::Parse(_) => TlvError::Authentication,
        Error::Storage(StorageError::Full(_)) => TlvError::MaxPeers,
        Error::Storage(_) | Error::Io(_) | Error::Config(_) => TlvError::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::{drive as run, responses};
    use crate::traits::{MockPairingStore, PeerRecord, PEER_ID_LEN};
    use hapd_crypto::keys::{SharedSecret, TrafficKeys};

    const CONN: ConnectionId = ConnectionId(1);

    fn config() -> AccessoryConfig {
        AccessoryConfig::default().with_chunked_math(false)
    }

    fn manager() -> PairingManager {
        let mut manager = PairingManager::new(config(), Box::new(MemoryStore::new())).unwrap();
        manager.generate_keypair();
        manager.connect(CONN);
        manager
    }

    fn state_only(step: u8) -> Vec<u8> {
        Tlv8::insert(None, TlvType::State, &[step]).export()
    }

    fn request(route: Route, body: Vec<u8>) -> Event {
        Event::RequestReceived { conn: CONN, route, body }
    }

    mod error_codes {
        use super::*;

        #[test]
        fn maps_every_family() {
            assert_eq!(error_code(&PairingError::Busy.into()), TlvError::Busy);
            assert_eq!(error_code(&PairingError::MaxPeers.into()), TlvError::MaxPeers);
            assert_eq!(error_code(&PairingError::Unavailable.into()), TlvError::Unavailable);
            assert_eq!(error_code(&PairingError::MissingTlv(3).into()), TlvError::Authentication);
            assert_eq!(error_code(&PairingError::AlreadyPaired.into()), TlvError::Unknown);
            assert_eq!(error_code(&CryptoError::AuthTagMismatch.into()), TlvError::Authentication);
            assert_eq!(
                error_code(&ParseError::MissingField("id").into()),
                TlvError::Authentication
            );
            assert_eq!(error_code(&StorageError::Full(4).into()), TlvError::MaxPeers);
            assert_eq!(
                error_code(&StorageError::Corrupt("x".into()).into()),
                TlvError::Unknown
            );
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn new_loads_existing_identity() {
            let mut store = MemoryStore::new();
            let identity = AccessoryIdentity::load_or_generate(&mut store, "F6:A4:35:E3:0B:07").unwrap();
            let manager = PairingManager::new(config(), Box::new(store)).unwrap();
            assert!(!manager.needs_keypair());
            assert_eq!(manager.identity().unwrap().public_key(), identity.public_key());
        }

        #[test]
        fn keypair_event_generates_identity_once() {
            let mut manager = PairingManager::new(config(), Box::new(MemoryStore::new())).unwrap();
            assert!(manager.needs_keypair());
            run(&mut manager, Event::KeypairNeeded);
            let public = manager.identity().unwrap().public_key();
            run(&mut manager, Event::KeypairNeeded);
            assert_eq!(manager.identity().unwrap().public_key(), public);
            assert!(manager.store().have_long_term_keys());
        }

        #[test]
        fn keypair_store_failure_leaves_identity_missing() {
            let mut store = MockPairingStore::new();
            store.expect_long_term_keys().returning(|| Ok(None));
            store
                .expect_set_long_term_keys()
                .returning(|_| Err(StorageError::Corrupt("read-only".into()).into()));
            let mut manager = PairingManager::new(config(), Box::new(store)).unwrap();

            manager.generate_keypair();
            assert!(manager.needs_keypair());
        }

        #[test]
        fn connect_is_idempotent_and_disconnect_releases_slot() {
            let mut manager = manager();
            manager.connect(CONN);
            assert_eq!(manager.session_count(), 1);

            run(&mut manager, request(Route::PairSetup, state_only(1)));
            assert_eq!(manager.pairing_owner(), Some(CONN));

            manager.disconnect(CONN);
            assert_eq!(manager.session_count(), 0);
            assert_eq!(manager.pairing_owner(), None);
            assert!(manager.outbox().is_empty());
        }
    }

    mod admission {
        use super::*;

        #[test]
        fn malformed_body_gets_unknown_without_state() {
            let mut manager = manager();
            run(&mut manager, request(Route::PairSetup, vec![0x06, 0x05, 0x01]));
            let reply = responses(&mut manager);
            assert_eq!(reply.len(), 1);
            assert_eq!(reply[0].error(), Some(TlvError::Unknown as u8));
            assert_eq!(reply[0].state(), None);
        }

        #[test]
        fn missing_state_gets_unknown() {
            let mut manager = manager();
            let body = Tlv8::insert(None, TlvType::Method, &[0]).export();
            run(&mut manager, request(Route::PairSetup, body));
            let reply = responses(&mut manager);
            assert_eq!(reply[0].error(), Some(TlvError::Unknown as u8));
            assert_eq!(reply[0].state(), None);
        }

        #[test]
        fn out_of_order_step_is_rejected_without_mutation() {
            let mut manager = manager();
            run(&mut manager, request(Route::PairSetup, state_only(5)));
            let reply = responses(&mut manager);
            assert_eq!(reply[0].state(), Some(6));
            assert_eq!(reply[0].error(), Some(TlvError::Authentication as u8));

            let session = manager.session(CONN).unwrap();
            assert!(!session.is_pairing);
            assert_eq!(session.current_step, 0);
        }

        #[test]
        fn unknown_step_is_unknown() {
            let mut manager = manager();
            run(&mut manager, request(Route::PairVerify, state_only(7)));
            let reply = responses(&mut manager);
            assert_eq!(reply[0].state(), Some(8));
            assert_eq!(reply[0].error(), Some(TlvError::Unknown as u8));
        }

        #[test]
        fn setup_without_identity_is_unavailable() {
            let mut manager = PairingManager::new(config(), Box::new(MemoryStore::new())).unwrap();
            manager.connect(CONN);
            run(&mut manager, request(Route::PairSetup, state_only(1)));
            let reply = responses(&mut manager);
            assert_eq!(reply[0].error(), Some(TlvError::Unavailable as u8));
        }

        #[test]
        fn setup_with_full_store_is_max_peers() {
            let mut manager = manager();
            manager.config.max_peers = 1;
            manager
                .store
                .add_peer(&PeerRecord::new([b'p'; PEER_ID_LEN], [1; 32]))
                .unwrap();
            run(&mut manager, request(Route::PairSetup, state_only(1)));
            let reply = responses(&mut manager);
            assert_eq!(reply[0].error(), Some(TlvError::MaxPeers as u8));
            assert_eq!(manager.pairing_owner(), None);
        }

        #[test]
        fn second_controller_is_busy() {
            let mut manager = manager();
            let other = ConnectionId(2);
            manager.connect(other);
            run(&mut manager, request(Route::PairSetup, state_only(1)));
            responses(&mut manager);

            run(
                &mut manager,
                Event::RequestReceived {
                    conn: other,
                    route: Route::PairSetup,
                    body: state_only(1),
                },
            );
            let reply = responses(&mut manager);
            assert_eq!(reply[0].state(), Some(2));
            assert_eq!(reply[0].error(), Some(TlvError::Busy as u8));
            assert!(manager.session(CONN).unwrap().is_pairing);
        }

        #[test]
        fn unknown_connection_is_rejected() {
            let mut manager = manager();
            run(
                &mut manager,
                Event::RequestReceived {
                    conn: ConnectionId(99),
                    route: Route::PairVerify,
                    body: state_only(1),
                },
            );
            let reply = responses(&mut manager);
            assert_eq!(reply[0].error(), Some(TlvError::Unknown as u8));
        }

        #[test]
        fn setup_on_paired_session_is_unknown() {
            let mut manager = manager();
            manager.sessions.get_mut(&CONN).unwrap().is_paired = true;
            run(&mut manager, request(Route::PairSetup, state_only(1)));
            let reply = responses(&mut manager);
            assert_eq!(reply[0].error(), Some(TlvError::Unknown as u8));
        }
    }

    mod frames {
        use super::*;

        fn secured_manager() -> (PairingManager, crate::cipher::SessionCipher) {
            let mut manager = manager();
            let keys = TrafficKeys::derive(&SharedSecret::new(vec![5; 32])).unwrap();
            manager.sessions.get_mut(&CONN).unwrap().install_keys(&keys);
            let controller = crate::cipher::SessionCipher::with_keys(
                *keys.controller_to_accessory.as_bytes(),
                *keys.accessory_to_controller.as_bytes(),
            );
            (manager, controller)
        }

        #[test]
        fn frames_require_verified_session() {
            let mut manager = manager();
            let err = manager.send_frame(CONN, b"hello".to_vec()).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::NotVerified(1))));
            let err = manager.receive_frame(ConnectionId(42), vec![1]).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::UnknownConnection(42))));
        }

        #[test]
        fn outbound_frames_are_sealed_in_order() {
            let (mut manager, mut controller) = secured_manager();
            let first = manager.send_frame(CONN, b"one".to_vec()).unwrap();
            assert_eq!(first, Some(Event::EncryptNeeded(CONN)));
            assert_eq!(manager.send_frame(CONN, b"two".to_vec()).unwrap(), None);

            run(&mut manager, Event::EncryptNeeded(CONN));
            let frames: Vec<Vec<u8>> = manager
                .outbox
                .drain()
                .into_iter()
                .map(|action| match action {
                    Outbound::Frame { bytes, .. } => bytes,
                    other => panic!("unexpected {:?}", other),
                })
                .collect();
            assert_eq!(frames.len(), 2);
            assert_eq!(controller.decrypt(&frames[0]).unwrap(), b"one");
            assert_eq!(controller.decrypt(&frames[1]).unwrap(), b"two");
        }

        #[test]
        fn inbound_frames_reach_application() {
            let (mut manager, mut controller) = secured_manager();
            let wire = controller.encrypt(b"GET /accessories HTTP/1.1\r\n\r\n").unwrap();
            let event = manager.receive_frame(CONN, wire).unwrap().unwrap();
            run(&mut manager, event);
            assert_eq!(manager.take_inbound(CONN), b"GET /accessories HTTP/1.1\r\n\r\n");
            assert!(manager.take_inbound(CONN).is_empty());
        }

        #[test]
        fn tampered_frame_closes_connection() {
            let (mut manager, mut controller) = secured_manager();
            let mut wire = controller.encrypt(b"secret").unwrap();
            let last = wire.len() - 1;
            wire[last] ^= 0xFF;

            let event = manager.receive_frame(CONN, wire).unwrap().unwrap();
            run(&mut manager, event);

            assert!(manager.take_inbound(CONN).is_empty());
            let actions = manager.outbox.drain();
            assert_eq!(actions, vec![Outbound::Close(CONN)]);
            let session = manager.session(CONN).unwrap();
            assert!(!session.is_secured());
            assert!(!session.is_paired);
        }

        #[test]
        fn remove_pairing_closes_verified_sessions() {
            let (mut manager, _) = secured_manager();
            let id = [b'c'; PEER_ID_LEN];
            manager.store.add_peer(&PeerRecord::new(id, [3; 32])).unwrap();
            manager.sessions.get_mut(&CONN).unwrap().peer_id = Some(id);

            assert!(manager.remove_pairing(&id).unwrap());
            assert_eq!(manager.outbox.drain(), vec![Outbound::Close(CONN)]);
            assert!(!manager.remove_pairing(&id).unwrap());
        }
    }
}
