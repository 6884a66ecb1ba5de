//! Controller side of both handshakes, for exercising an accessory.
//!
//! Everything here panics on malformed input; it exists to drive tests.

use hapd_crypto::chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string, nonces};
use hapd_crypto::curve25519::EcdhKeyPair;
use hapd_crypto::ed25519::{self, IdentityKeyPair};
use hapd_crypto::hkdf::{self, Context};
use hapd_crypto::keys::{SharedSecret, TrafficKeys};
use hapd_crypto::srp::{SrpChallenge, SrpClient, SrpProof, PAIR_SETUP_USERNAME, SALT_LEN};
use hapd_crypto::tlv::{Tlv8, TlvType};

use crate::cipher::SessionCipher;
use crate::event::Event;
use crate::manager::{PairingManager, Queue};
use crate::outbox::Outbound;
use crate::traits::PEER_ID_LEN;

/// A controller with a stable pairing identity.
pub struct Controller {
    id: [u8; PEER_ID_LEN],
    keypair: IdentityKeyPair,
    setup_code: String,
    srp: Option<(SrpClient, SrpProof)>,
    ephemeral: Option<EcdhKeyPair>,
    /// Shared secret of the last verify exchange.
    verify: Option<[u8; 32]>,
    /// Accessory identifier and LTPK learned from M6.
    accessory: Option<(Vec<u8>, [u8; 32])>,
}

impl Controller {
    pub fn new(setup_code: &str) -> Self {
        let keypair = IdentityKeyPair::generate();
        let pk = keypair.public_key();
        let text = format!(
            "{}-{}-{}-{}-{}",
            hex::encode_upper(&pk[0..4]),
            hex::encode_upper(&pk[4..6]),
            hex::encode_upper(&pk[6..8]),
            hex::encode_upper(&pk[8..10]),
            hex::encode_upper(&pk[10..16]),
        );
        let mut id = [0u8; PEER_ID_LEN];
        id.copy_from_slice(text.as_bytes());
        Self {
            id,
            keypair,
            setup_code: setup_code.to_string(),
            srp: None,
            ephemeral: None,
            verify: None,
            accessory: None,
        }
    }

    pub fn id(&self) -> [u8; PEER_ID_LEN] {
        self.id
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    /// Accessory identifier and LTPK once setup completed.
    pub fn accessory(&self) -> Option<&(Vec<u8>, [u8; 32])> {
        self.accessory.as_ref()
    }

    /// Trust an accessory without running setup.
    pub fn trust(&mut self, accessory_id: &[u8], ltpk: [u8; 32]) {
        self.accessory = Some((accessory_id.to_vec(), ltpk));
    }

    pub fn setup_m1(&self) -> Vec<u8> {
        let tlv = Tlv8::insert(None, TlvType::Method, &[0]);
        Tlv8::insert(Some(tlv), TlvType::State, &[1]).export()
    }

    /// Answer M2 with the SRP public key and proof.
    pub fn setup_m3(&mut self, m2: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(m2).expect("M2 parses");
        assert_eq!(tlv.state(), Some(2), "M2 state");
        assert_eq!(tlv.error(), None, "M2 carries an error");
        let salt: [u8; SALT_LEN] = tlv.get_array(TlvType::Salt).expect("M2 salt");
        let server_public_key = tlv.get(TlvType::PublicKey).expect("M2 public key");

        let client = SrpClient::new(PAIR_SETUP_USERNAME, self.setup_code.as_bytes());
        let proof = client
            .process_challenge(&SrpChallenge {
                salt,
                server_public_key,
            })
            .expect("SRP challenge");

        let tlv = Tlv8::insert(None, TlvType::Proof, &proof.client_proof);
        let tlv = Tlv8::insert(Some(tlv), TlvType::PublicKey, &client.public_key());
        let m3 = Tlv8::insert(Some(tlv), TlvType::State, &[3]).export();
        self.srp = Some((client, proof));
        m3
    }

    /// Check the accessory proof and send the signed controller record.
    pub fn setup_m5(&mut self, m4: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(m4).expect("M4 parses");
        assert_eq!(tlv.state(), Some(4), "M4 state");
        assert_eq!(tlv.error(), None, "M4 carries an error");
        let (client, proof) = self.srp.as_ref().expect("M3 sent");
        let server_proof = tlv.get(TlvType::Proof).expect("M4 proof");
        assert!(client.verify_server_proof(&server_proof, &proof.expected_server_proof));

        let session_key = &proof.shared_secret;
        let encrypt_key = hkdf::derive(Context::SetupEncrypt, session_key).expect("hkdf");
        let controller_x = hkdf::derive(Context::ControllerSign, session_key).expect("hkdf");

        let mut message = controller_x.to_vec();
        message.extend_from_slice(&self.id);
        message.extend_from_slice(&self.keypair.public_key());
        let signature = self.keypair.sign(&message);

        let sub = Tlv8::insert(None, TlvType::Signature, &signature);
        let sub = Tlv8::insert(Some(sub), TlvType::PublicKey, &self.keypair.public_key());
        let sub = Tlv8::insert(Some(sub), TlvType::Identifier, &self.id).export();
        let sealed = encrypt_with_nonce(
            &encrypt_key,
            &nonce_from_string(nonces::PAIR_SETUP_M5),
            &sub,
        )
        .expect("seal M5");

        let tlv = Tlv8::insert(None, TlvType::EncryptedData, &sealed);
        Tlv8::insert(Some(tlv), TlvType::State, &[5]).export()
    }

    /// Open M6 and remember the accessory's identity.
    pub fn finish_setup(&mut self, m6: &[u8]) {
        let tlv = Tlv8::parse(m6).expect("M6 parses");
        assert_eq!(tlv.state(), Some(6), "M6 state");
        assert_eq!(tlv.error(), None, "M6 carries an error");
        let (_, proof) = self.srp.take().expect("M5 sent");
        let session_key = &proof.shared_secret;
        let encrypt_key = hkdf::derive(Context::SetupEncrypt, session_key).expect("hkdf");
        let accessory_x = hkdf::derive(Context::AccessorySign, session_key).expect("hkdf");

        let sealed = tlv.get(TlvType::EncryptedData).expect("M6 encrypted data");
        let plain = decrypt_with_nonce(
            &encrypt_key,
            &nonce_from_string(nonces::PAIR_SETUP_M6),
            &sealed,
        )
        .expect("open M6");
        let sub = Tlv8::parse(&plain).expect("M6 sub-TLV parses");
        let accessory_id = sub.get(TlvType::Identifier).expect("M6 identifier");
        let ltpk: [u8; 32] = sub.get_array(TlvType::PublicKey).expect("M6 public key");
        let signature: [u8; 64] = sub.get_array(TlvType::Signature).expect("M6 signature");

        let mut message = accessory_x.to_vec();
        message.extend_from_slice(&accessory_id);
        message.extend_from_slice(&ltpk);
        ed25519::verify(&ltpk, &message, &signature).expect("M6 signature verifies");
        self.accessory = Some((accessory_id, ltpk));
    }

    pub fn verify_m1(&mut self) -> Vec<u8> {
        let ephemeral = EcdhKeyPair::generate();
        let public = ephemeral.public_key();
        self.ephemeral = Some(ephemeral);
        let tlv = Tlv8::insert(None, TlvType::PublicKey, &public);
        Tlv8::insert(Some(tlv), TlvType::State, &[1]).export()
    }

    /// Check the accessory's signature and prove this controller's identity.
    pub fn verify_m3(&mut self, m2: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(m2).expect("M2 parses");
        assert_eq!(tlv.state(), Some(2), "M2 state");
        assert_eq!(tlv.error(), None, "M2 carries an error");
        let accessory_public: [u8; 32] = tlv.get_array(TlvType::PublicKey).expect("M2 public key");
        let sealed = tlv.get(TlvType::EncryptedData).expect("M2 encrypted data");

        let ephemeral = self.ephemeral.take().expect("M1 sent");
        let controller_public = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(&accessory_public).expect("ECDH");
        let key = hkdf::derive(Context::VerifyEncrypt, &shared).expect("hkdf");

        let plain = decrypt_with_nonce(&key, &nonce_from_string(nonces::PAIR_VERIFY_M2), &sealed)
            .expect("open M2");
        let sub = Tlv8::parse(&plain).expect("M2 sub-TLV parses");
        let accessory_id = sub.get(TlvType::Identifier).expect("M2 identifier");
        let signature: [u8; 64] = sub.get_array(TlvType::Signature).expect("M2 signature");

        let (known_id, ltpk) = self.accessory.as_ref().expect("accessory trusted");
        assert_eq!(&accessory_id, known_id, "accessory identifier changed");
        let mut message = accessory_public.to_vec();
        message.extend_from_slice(&accessory_id);
        message.extend_from_slice(&controller_public);
        ed25519::verify(ltpk, &message, &signature).expect("M2 signature verifies");

        let mut message = controller_public.to_vec();
        message.extend_from_slice(&self.id);
        message.extend_from_slice(&accessory_public);
        let signature = self.keypair.sign(&message);
        let sub = Tlv8::insert(None, TlvType::Signature, &signature);
        let sub = Tlv8::insert(Some(sub), TlvType::Identifier, &self.id).export();
        let sealed = encrypt_with_nonce(&key, &nonce_from_string(nonces::PAIR_VERIFY_M3), &sub)
            .expect("seal M3");

        self.verify = Some(shared);
        let tlv = Tlv8::insert(None, TlvType::EncryptedData, &sealed);
        Tlv8::insert(Some(tlv), TlvType::State, &[3]).export()
    }

    /// Accept M4 and return the controller end of the session channel.
    pub fn finish_verify(&mut self, m4: &[u8]) -> SessionCipher {
        let tlv = Tlv8::parse(m4).expect("M4 parses");
        assert_eq!(tlv.state(), Some(4), "M4 state");
        assert_eq!(tlv.error(), None, "M4 carries an error");
        let shared = self.verify.take().expect("M3 sent");
        let keys = TrafficKeys::derive(&SharedSecret::new(shared.to_vec())).expect("hkdf");
        SessionCipher::with_keys(
            *keys.controller_to_accessory.as_bytes(),
            *keys.accessory_to_controller.as_bytes(),
        )
    }
}

/// Feed `event` and everything it triggers through `manager`.
pub fn drive(manager: &mut PairingManager, event: Event) {
    let mut queue = Queue::default();
    queue.emit(event);
    while !queue.is_empty() {
        let batch: Vec<Event> = queue.iter().cloned().collect();
        queue = Queue::default();
        for event in batch {
            manager.handle_event(&event, &mut queue);
        }
    }
}

/// Drain queued handshake responses, parsed.
pub fn responses(manager: &mut PairingManager) -> Vec<Tlv8> {
    manager
        .outbox_mut()
        .drain()
        .into_iter()
        .filter_map(|action| match action {
            Outbound::Response { body, .. } => Some(Tlv8::parse(&body).expect("response parses")),
            _ => None,
        })
        .collect()
}

/// Drain the single queued response body.
pub fn single_response(manager: &mut PairingManager) -> Vec<u8> {
    let mut bodies: Vec<Vec<u8>> = manager
        .outbox_mut()
        .drain()
        .into_iter()
        .filter_map(|action| match action {
            Outbound::Response { body, .. } => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(bodies.len(), 1, "expected exactly one response");
    bodies.remove(0)
}
