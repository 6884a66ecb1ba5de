//! Per-connection pairing state.

use std::collections::VecDeque;

use hapd_crypto::keys::{SharedSecret, TrafficKeys};
use hapd_crypto::srp::SrpVerifier;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::SessionCipher;
use crate::event::{ConnectionId, Route};
use crate::traits::{PeerRecord, PEER_ID_LEN};

/// Transient SRP state of one pair-setup exchange.
pub struct SetupExchange {
    pub srp: SrpVerifier,
    /// `B` is derived and M2 may be sent.
    pub public_key_ready: bool,
    /// `K`, `M1` and `M2` are derived.
    pub proof_ready: bool,
    /// Controller record from M5, persisted once M6 is sealed.
    pub peer: Option<PeerRecord>,
}

impl SetupExchange {
    pub fn new(srp: SrpVerifier) -> Self {
        Self {
            srp,
            public_key_ready: false,
            proof_ready: false,
            peer: None,
        }
    }
}

/// Transient state of one pair-verify exchange.
#[derive(ZeroizeOnDrop)]
pub struct VerifyExchange {
    #[zeroize(skip)]
    pub accessory_public: [u8; 32],
    #[zeroize(skip)]
    pub peer_public: [u8; 32],
    #[zeroize(skip)]
    pub shared_secret: SharedSecret,
    pub handshake_key: [u8; 32],
    /// Controller identified by M3.
    #[zeroize(skip)]
    pub peer: Option<PeerRecord>,
}

/// What an in-flight AEAD operation is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePurpose {
    /// Controller sub-TLV of pair-setup M5.
    SetupM5,
    /// Accessory sub-TLV of pair-setup M6.
    SetupM6,
    /// Accessory sub-TLV of pair-verify M2.
    VerifyM2,
    /// Controller sub-TLV of pair-verify M3.
    VerifyM3,
    /// Session bytes received from the controller.
    Inbound,
    /// Session bytes queued for the controller.
    Outbound,
}

impl FramePurpose {
    pub fn is_handshake(self) -> bool {
        !matches!(self, FramePurpose::Inbound | FramePurpose::Outbound)
    }
}

/// Explicit key and nonce of a handshake message.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Sealing {
    pub key: [u8; 32],
    pub nonce: [u8; 12],
}

/// Contents of a frame; plaintext and ciphertext never coexist.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameData {
    Plain(Vec<u8>),
    Sealed(Vec<u8>),
    /// Authentication failed; nothing is released.
    Rejected,
}

/// One pending encrypt or decrypt.
pub struct CryptoFrame {
    pub purpose: FramePurpose,
    /// Handshake frames carry their own key and nonce; session frames use
    /// the session cipher.
    pub sealing: Option<Sealing>,
    pub data: FrameData,
}

impl CryptoFrame {
    pub fn handshake(purpose: FramePurpose, key: [u8; 32], nonce: [u8; 12], data: FrameData) -> Self {
        Self {
            purpose,
            sealing: Some(Sealing { key, nonce }),
            data,
        }
    }

    pub fn session(purpose: FramePurpose, data: FrameData) -> Self {
        Self {
            purpose,
            sealing: None,
            data,
        }
    }
}

impl std::fmt::Debug for CryptoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, len) = match &self.data {
            FrameData::Plain(bytes) => ("plain", bytes.len()),
            FrameData::Sealed(bytes) => ("sealed", bytes.len()),
            FrameData::Rejected => ("rejected", 0),
        };
        f.debug_struct("CryptoFrame")
            .field("purpose", &self.purpose)
            .field("data", &kind)
            .field("len", &len)
            .finish()
    }
}

/// State of one accepted connection.
pub struct PairSession {
    conn: ConnectionId,
    pub is_paired: bool,
    pub is_pairing: bool,
    pub is_verifying: bool,
    /// Next step number this session will send.
    pub current_step: u8,
    /// Bumped whenever an exchange starts or ends; stale exponentiation
    /// results carry an older value.
    pub exchange: u64,
    pub setup: Option<SetupExchange>,
    pub verify: Option<VerifyExchange>,
    /// The AEAD operation in flight, if any.
    pub frame: Option<CryptoFrame>,
    /// Session frames waiting for `frame` to complete.
    pub backlog: VecDeque<CryptoFrame>,
    pub cipher: Option<SessionCipher>,
    /// Decrypted session bytes not yet taken by the application.
    pub inbound: VecDeque<Vec<u8>>,
    /// Controller that last passed pair-verify.
    pub peer_id: Option<[u8; PEER_ID_LEN]>,
    /// State of the reply owed to the last admitted request.
    pub owed_reply: Option<u8>,
}

impl PairSession {
    pub fn new(conn: ConnectionId) -> Self {
        Self {
            conn,
            is_paired: false,
            is_pairing: false,
            is_verifying: false,
            current_step: 0,
            exchange: 0,
            setup: None,
            verify: None,
            frame: None,
            backlog: VecDeque::new(),
            cipher: None,
            inbound: VecDeque::new(),
            peer_id: None,
            owed_reply: None,
        }
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    /// Whether a request for `step` on `route` continues the running exchange.
    pub fn accepts_step(&self, route: Route, step: u8) -> bool {
        let running = match route {
            Route::PairSetup => self.is_pairing,
            Route::PairVerify => self.is_verifying,
        };
        running && step == self.current_step.wrapping_add(1)
    }

    /// Discard any exchange and enter `route` at M1.
    ///
    /// Work still pending for the previous request is dropped; the caller
    /// answers that request from `owed_reply` before restarting.
    pub fn restart(&mut self, route: Route) {
        self.drop_exchange();
        match route {
            Route::PairSetup => self.is_pairing = true,
            Route::PairVerify => self.is_verifying = true,
        }
        self.current_step = 2;
    }

    /// Record that step `step` was accepted.
    pub fn advance(&mut self, step: u8) {
        self.current_step = step.wrapping_add(1);
    }

    /// Leave the running exchange, keeping pairing status and keys.
    ///
    /// `current_step` keeps the last step reached.
    pub fn end_exchange(&mut self) {
        self.drop_exchange();
    }

    /// Promote verified traffic keys into the session.
    pub fn install_keys(&mut self, keys: &TrafficKeys) {
        self.cipher = Some(SessionCipher::new(keys));
        self.is_paired = true;
    }

    /// Drop keys and every queued byte after a fatal session error.
    pub fn poison(&mut self) {
        self.end_exchange();
        self.cipher = None;
        self.is_paired = false;
        self.backlog.clear();
        self.inbound.clear();
        self.owed_reply = None;
    }

    /// Session frames are flowing.
    pub fn is_secured(&self) -> bool {
        self.cipher.is_some()
    }

    fn drop_exchange(&mut self) {
        self.is_pairing = false;
        self.is_verifying = false;
        self.setup = None;
        self.verify = None;
        if self
            .frame
            .as_ref()
            .is_some_and(|frame| frame.purpose.is_handshake())
        {
            self.frame = None;
        }
        self.exchange += 1;
    }
}

impl std::fmt::Debug for PairSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairSession")
            .field("conn", &self.conn)
            .field("is_paired", &self.is_paired)
            .field("is_pairing", &self.is_pairing)
            .field("is_verifying", &self.is_verifying)
            .field("current_step", &self.current_step)
            .field("exchange", &self.exchange)
            .field("owed_reply", &self.owed_reply)
            .field("frame", &self.frame)
            .field("backlog", &self.backlog.len())
            .field("cipher", &self.cipher)
            .finish()
    }
}
