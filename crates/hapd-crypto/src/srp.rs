//! SRP-6a for pair-setup.
//!
//! Uses the 3072-bit prime of RFC 5054, generator g=5 and SHA-512.
//!
//! [`SrpVerifier`] is the accessory side. Its three modular exponentiations
//! are handed out as [`ExpModRequest`]s so the caller decides whether they
//! run in one go or spread over scheduler ticks; every stage takes the result
//! of the previous request. [`SrpClient`] is the controller side.

use hapd_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::expmod::ExpModRequest;

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// Salt length used by pair-setup.
pub const SALT_LEN: usize = 16;

/// SRP username for pair-setup.
pub const PAIR_SETUP_USERNAME: &[u8] = b"Pair-Setup";

/// RFC 5054 3072-bit prime N.
const RFC5054_N_3072: [u8; N_BYTES] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2,
    0x21, 0x68, 0xc2, 0x34, 0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
    0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74, 0x02, 0x0b, 0xbe, 0xa6,
    0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d,
    0xf2, 0x5f, 0x14, 0x37, 0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
    0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6, 0xf4, 0x4c, 0x42, 0xe9,
    0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11,
    0x7c, 0x4b, 0x1f, 0xe6, 0x49, 0x28, 0x66, 0x51, 0xec, 0xe4, 0x5b, 0x3d,
    0xc2, 0x00, 0x7c, 0xb8, 0xa1, 0x63, 0xbf, 0x05, 0x98, 0xda, 0x48, 0x36,
    0x1c, 0x55, 0xd3, 0x9a, 0x69, 0x16, 0x3f, 0xa8, 0xfd, 0x24, 0xcf, 0x5f,
    0x83, 0x65, 0x5d, 0x23, 0xdc, 0xa3, 0xad, 0x96, 0x1c, 0x62, 0xf3, 0x56,
    0x20, 0x85, 0x52, 0xbb, 0x9e, 0xd5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6d,
    0x67, 0x0c, 0x35, 0x4e, 0x4a, 0xbc, 0x98, 0x04, 0xf1, 0x74, 0x6c, 0x08,
    0xca, 0x18, 0x21, 0x7c, 0x32, 0x90, 0x5e, 0x46, 0x2e, 0x36, 0xce, 0x3b,
    0xe3, 0x9e, 0x77, 0x2c, 0x18, 0x0e, 0x86, 0x03, 0x9b, 0x27, 0x83, 0xa2,
    0xec, 0x07, 0xa2, 0x8f, 0xb5, 0xc5, 0x5d, 0xf0, 0x6f, 0x4c, 0x52, 0xc9,
    0xde, 0x2b, 0xcb, 0xf6, 0x95, 0x58, 0x17, 0x18, 0x39, 0x95, 0x49, 0x7c,
    0xea, 0x95, 0x6a, 0xe5, 0x15, 0xd2, 0x26, 0x18, 0x98, 0xfa, 0x05, 0x10,
    0x15, 0x72, 0x8e, 0x5a, 0x8a, 0xaa, 0xc4, 0x2d, 0xad, 0x33, 0x17, 0x0d,
    0x04, 0x50, 0x7a, 0x33, 0xa8, 0x55, 0x21, 0xab, 0xdf, 0x1c, 0xba, 0x64,
    0xec, 0xfb, 0x85, 0x04, 0x58, 0xdb, 0xef, 0x0a, 0x8a, 0xea, 0x71, 0x57,
    0x5d, 0x06, 0x0c, 0x7d, 0xb3, 0x97, 0x0f, 0x85, 0xa6, 0xe1, 0xe4, 0xc7,
    0xab, 0xf5, 0xae, 0x8c, 0xdb, 0x09, 0x33, 0xd7, 0x1e, 0x8c, 0x94, 0xe0,
    0x4a, 0x25, 0x61, 0x9d, 0xce, 0xe3, 0xd2, 0x26, 0x1a, 0xd2, 0xee, 0x6b,
    0xf1, 0x2f, 0xfa, 0x06, 0xd9, 0x8a, 0x08, 0x64, 0xd8, 0x76, 0x02, 0x73,
    0x3e, 0xc8, 0x6a, 0x64, 0x52, 0x1f, 0x2b, 0x18, 0x17, 0x7b, 0x20, 0x0c,
    0xbb, 0xe1, 0x17, 0x57, 0x7a, 0x61, 0x5d, 0x6c, 0x77, 0x09, 0x88, 0xc0,
    0xba, 0xd9, 0x46, 0xe2, 0x08, 0xe2, 0x4f, 0xa0, 0x74, 0xe5, 0xab, 0x31,
    0x43, 0xdb, 0x5b, 0xfc, 0xe0, 0xfd, 0x10, 0x8e, 0x4b, 0x82, 0xd1, 0x20,
    0xa9, 0x3a, 0xd2, 0xca, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// SRP-6a parameters (3072-bit, RFC 5054).
#[derive(Debug, Clone)]
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g (always 5).
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        Self {
            n: BigUint::from_bytes_be(&RFC5054_N_3072),
            g: BigUint::from(5u32),
        }
    }
}

/// Accessory-side SRP state for one pair-setup exchange.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpVerifier {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    salt: [u8; SALT_LEN],
    private_key: Vec<u8>,
    #[zeroize(skip)]
    verifier: Option<BigUint>,
    #[zeroize(skip)]
    public_key: Option<BigUint>,
    #[zeroize(skip)]
    client_public_key: Option<BigUint>,
    client_proof: Vec<u8>,
    session_key: Vec<u8>,
    expected_client_proof: Vec<u8>,
    server_proof: Vec<u8>,
    authenticated: bool,
}

impl SrpVerifier {
    /// Start an exchange with a fresh random salt and private key.
    ///
    /// Returns the request for the verifier `v = g^x mod N`.
    pub fn new(identity: &[u8], password: &[u8]) -> (Self, ExpModRequest) {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut private_key = vec![0u8; 32];
        OsRng.fill_bytes(&mut private_key);
        Self::with_secrets(identity, password, salt, private_key)
    }

    /// Start an exchange with a fixed salt and private key `b`.
    pub fn with_secrets(
        identity: &[u8],
        password: &[u8],
        salt: [u8; SALT_LEN],
        private_key: Vec<u8>,
    ) -> (Self, ExpModRequest) {
        let params = SrpParams::default();
        let x = compute_x(&salt, identity, password);
        let request = ExpModRequest::new(params.g.clone(), x, params.n.clone());

        let verifier = Self {
            params,
            identity: identity.to_vec(),
            salt,
            private_key,
            verifier: None,
            public_key: None,
            client_public_key: None,
            client_proof: Vec::new(),
            session_key: Vec::new(),
            expected_client_proof: Vec::new(),
            server_proof: Vec::new(),
            authenticated: false,
        };
        (verifier, request)
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// Accept `v = g^x mod N`; returns the request for `g^b mod N`.
    pub fn set_verifier(&mut self, v: BigUint) -> ExpModRequest {
        self.verifier = Some(v);
        ExpModRequest::new(
            self.params.g.clone(),
            BigUint::from_bytes_be(&self.private_key),
            self.params.n.clone(),
        )
    }

    /// Accept `g^b mod N` and derive `B = (k*v + g^b) mod N`.
    ///
    /// Returns `B` padded to 384 bytes.
    pub fn set_public_term(&mut self, g_b: BigUint) -> Result<Vec<u8>, CryptoError> {
        let v = self
            .verifier
            .as_ref()
            .ok_or(CryptoError::SrpOrder("public key before verifier"))?;
        let k = compute_k(&self.params);
        let b_pub = ((&k * v) + g_b) % &self.params.n;
        let padded = pad_to_n(&b_pub);
        self.public_key = Some(b_pub);
        Ok(padded)
    }

    /// Public key `B` padded to 384 bytes, once derived.
    pub fn public_key(&self) -> Option<Vec<u8>> {
        self.public_key.as_ref().map(pad_to_n)
    }

    /// Accept the controller's `A` and proof.
    ///
    /// Returns the request for `v^u mod N`.
    pub fn begin_proof(
        &mut self,
        client_public_key: &[u8],
        client_proof: &[u8],
    ) -> Result<ExpModRequest, CryptoError> {
        let b_pub = self
            .public_key
            .as_ref()
            .ok_or(CryptoError::SrpOrder("proof before public key"))?;
        let v = self
            .verifier
            .as_ref()
            .ok_or(CryptoError::SrpOrder("proof before verifier"))?;

        let a_pub = BigUint::from_bytes_be(client_public_key);
        if &a_pub % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey(
                "client public key: A mod N = 0".to_string(),
            ));
        }

        let u = compute_u(&a_pub, b_pub, &self.params);
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("u = 0".to_string()));
        }

        let request = ExpModRequest::new(v.clone(), u, self.params.n.clone());
        self.client_public_key = Some(a_pub);
        self.client_proof = client_proof.to_vec();
        Ok(request)
    }

    /// Accept `v^u mod N`; returns the request for `S = (A * v^u)^b mod N`.
    pub fn set_verifier_power(&mut self, v_u: BigUint) -> Result<ExpModRequest, CryptoError> {
        let a_pub = self
            .client_public_key
            .as_ref()
            .ok_or(CryptoError::SrpOrder("verifier power before client key"))?;
        let base = (a_pub * v_u) % &self.params.n;
        Ok(ExpModRequest::new(
            base,
            BigUint::from_bytes_be(&self.private_key),
            self.params.n.clone(),
        ))
    }

    /// Accept the premaster secret `S` and derive `K`, `M1` and `M2`.
    pub fn set_premaster(&mut self, s: BigUint) -> Result<(), CryptoError> {
        let a_pub = self
            .client_public_key
            .as_ref()
            .ok_or(CryptoError::SrpOrder("premaster before client key"))?;
        let b_pub = self
            .public_key
            .as_ref()
            .ok_or(CryptoError::SrpOrder("premaster before public key"))?;

        let session_key = Sha512::digest(pad_to_n(&s)).to_vec();
        let m1 = compute_m1(
            &self.params,
            &self.identity,
            &self.salt,
            a_pub,
            b_pub,
            &session_key,
        );
        let m2 = compute_m2(a_pub, &m1, &session_key);

        self.session_key = session_key;
        self.expected_client_proof = m1;
        self.server_proof = m2;
        Ok(())
    }

    /// Compare the controller's proof with the expected `M1` in constant time.
    pub fn verify_client_proof(&mut self) -> bool {
        if self.expected_client_proof.is_empty() {
            return false;
        }
        self.authenticated = self
            .client_proof
            .ct_eq(&self.expected_client_proof)
            .into();
        self.authenticated
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Server proof `M2`, only after the controller proved itself.
    pub fn server_proof(&self) -> Option<&[u8]> {
        self.authenticated.then_some(self.server_proof.as_slice())
    }

    /// Session key `K`, only after the controller proved itself.
    pub fn session_key(&self) -> Option<&[u8]> {
        self.authenticated.then_some(self.session_key.as_slice())
    }

    /// Run every stage synchronously.
    pub fn run_to_public_key(&mut self, v_request: ExpModRequest) -> Result<Vec<u8>, CryptoError> {
        let v = v_request.compute()?;
        let g_b = self.set_verifier(v).compute()?;
        self.set_public_term(g_b)
    }
}

/// Controller-side SRP state machine.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server challenge containing salt and public key.
pub struct SrpChallenge {
    pub salt: [u8; SALT_LEN],
    pub server_public_key: Vec<u8>,
}

/// Result of processing a challenge.
pub struct SrpProof {
    pub client_proof: Vec<u8>,
    pub shared_secret: Vec<u8>,
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create new SRP client with identity and password.
    pub fn new(identity: &[u8], password: &[u8]) -> Self {
        let a = OsRng.gen_biguint(256);
        Self::with_private_key(identity, password, &a.to_bytes_be())
    }

    /// Create SRP client with a specific private key.
    pub fn with_private_key(identity: &[u8], password: &[u8], private_key: &[u8]) -> Self {
        let params = SrpParams::default();
        let a = BigUint::from_bytes_be(private_key);
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: private_key.to_vec(),
            public_key,
        }
    }

    /// Get client public key A (384 bytes for 3072-bit).
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process server's challenge and generate proof.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, CryptoError> {
        let b = BigUint::from_bytes_be(&challenge.server_public_key);

        if &b % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey(
                "server public key: B mod N = 0".to_string(),
            ));
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        let u = compute_u(&self.public_key, &b, &self.params);
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("u = 0".to_string()));
        }

        let x = compute_x(&challenge.salt, &self.identity, &self.password);
        let k = compute_k(&self.params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = self.params.g.modpow(&x, &self.params.n);
        let k_gx = (&k * &g_x) % &self.params.n;
        let base = if b >= k_gx {
            (&b - &k_gx) % &self.params.n
        } else {
            (&b + &self.params.n - &k_gx) % &self.params.n
        };
        let exponent = (&a + &u * &x) % (&self.params.n - BigUint::from(1u32));
        let s = base.modpow(&exponent, &self.params.n);

        let shared_secret = Sha512::digest(pad_to_n(&s)).to_vec();
        let client_proof = compute_m1(
            &self.params,
            &self.identity,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );
        let expected_server_proof = compute_m2(&self.public_key, &client_proof, &shared_secret);

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// Verify server's proof M2.
    pub fn verify_server_proof(&self, proof: &[u8], expected: &[u8]) -> bool {
        proof.ct_eq(expected).into()
    }
}

/// Compute M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
///
/// H(g) hashes the raw generator byte, not PAD(g).
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(pad_to_n(&params.n));
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xor_result = [0u8; 64];
    for (out, (n, g)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *out = n ^ g;
    }

    let h_i = Sha512::digest(identity);

    let mut hasher = Sha512::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Compute M2 = H(PAD(A) || M1 || K)
fn compute_m2(a: &BigUint, m1: &[u8], k: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(m1);
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Pad BigUint to N_BYTES with leading zeros.
pub fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// Compute k = SHA512(N || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute u = SHA512(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint, _params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &[u8] = b"816-32-958";

    /// Drive a verifier through every stage with one-shot exponentiation.
    fn run_exchange(
        verifier: &mut SrpVerifier,
        v_request: ExpModRequest,
        client: &SrpClient,
    ) -> (Vec<u8>, SrpProof) {
        let b_pub = verifier.run_to_public_key(v_request).unwrap();
        let proof = client
            .process_challenge(&SrpChallenge {
                salt: *verifier.salt(),
                server_public_key: b_pub.clone(),
            })
            .unwrap();

        let vu = verifier
            .begin_proof(&client.public_key(), &proof.client_proof)
            .unwrap()
            .compute()
            .unwrap();
        let s = verifier.set_verifier_power(vu).unwrap().compute().unwrap();
        verifier.set_premaster(s).unwrap();
        (b_pub, proof)
    }

    mod srp_params {
        use super::*;

        #[test]
        fn default_uses_3072_bit_prime() {
            let params = SrpParams::default();
            assert_eq!(params.n.bits(), 3072);
            assert_eq!(params.n.to_bytes_be().len(), 384);
        }

        #[test]
        fn generator_is_5() {
            assert_eq!(SrpParams::default().g, BigUint::from(5u32));
        }

        #[test]
        fn prime_matches_rfc5054_edges() {
            let n = SrpParams::default().n.to_bytes_be();
            assert_eq!(hex::encode(&n[..12]), "ffffffffffffffffc90fdaa2");
            assert_eq!(hex::encode(&n[372..]), "a93ad2caffffffffffffffff");
        }
    }

    mod verifier {
        use super::*;

        #[test]
        fn new_generates_random_salt_and_key() {
            let (v1, _) = SrpVerifier::new(PAIR_SETUP_USERNAME, CODE);
            let (v2, _) = SrpVerifier::new(PAIR_SETUP_USERNAME, CODE);
            assert_ne!(v1.salt(), v2.salt());
            assert_ne!(v1.private_key, v2.private_key);
            assert_eq!(v1.private_key.len(), 32);
        }

        #[test]
        fn verifier_request_is_g_to_the_x() {
            let salt = [0x42u8; SALT_LEN];
            let (_, request) =
                SrpVerifier::with_secrets(PAIR_SETUP_USERNAME, CODE, salt, vec![0x11; 32]);
            assert_eq!(request.base, BigUint::from(5u32));
            assert_eq!(request.exponent, compute_x(&salt, PAIR_SETUP_USERNAME, CODE));
        }

        #[test]
        fn public_key_is_384_bytes() {
            let (mut verifier, request) = SrpVerifier::new(PAIR_SETUP_USERNAME, CODE);
            let b_pub = verifier.run_to_public_key(request).unwrap();
            assert_eq!(b_pub.len(), N_BYTES);
            assert_eq!(verifier.public_key(), Some(b_pub));
        }

        #[test]
        fn stages_out_of_order_are_rejected() {
            let (mut verifier, _) = SrpVerifier::new(PAIR_SETUP_USERNAME, CODE);
            assert!(matches!(
                verifier.set_public_term(BigUint::from(2u32)),
                Err(CryptoError::SrpOrder(_))
            ));
            assert!(verifier.begin_proof(&[1u8; 384], &[0u8; 64]).is_err());
            assert!(verifier.set_verifier_power(BigUint::from(2u32)).is_err());
            assert!(verifier.set_premaster(BigUint::from(2u32)).is_err());
            assert!(!verifier.verify_client_proof());
        }

        #[test]
        fn rejects_client_key_multiple_of_n() {
            let (mut verifier, request) = SrpVerifier::new(PAIR_SETUP_USERNAME, CODE);
            verifier.run_to_public_key(request).unwrap();

            let n = pad_to_n(&SrpParams::default().n);
            let err = verifier.begin_proof(&n, &[0u8; 64]).unwrap_err();
            assert!(matches!(err, CryptoError::InvalidPublicKey(_)));
            assert!(verifier.begin_proof(&[0u8; 384], &[0u8; 64]).is_err());
        }

        #[test]
        fn secrets_hidden_until_authenticated() {
            let (mut verifier, request) = SrpVerifier::new(PAIR_SETUP_USERNAME, CODE);
            let client = SrpClient::new(PAIR_SETUP_USERNAME, CODE);
            run_exchange(&mut verifier, request, &client);

            assert!(verifier.session_key().is_none());
            assert!(verifier.server_proof().is_none());
            assert!(verifier.verify_client_proof());
            assert!(verifier.session_key().is_some());
        }
    }

    mod exchange {
        use super::*;

        #[test]
        fn matching_code_agrees_on_key_and_proofs() {
            let (mut verifier, request) = SrpVerifier::new(PAIR_SETUP_USERNAME, CODE);
            let client = SrpClient::new(PAIR_SETUP_USERNAME, CODE);
            let (_, proof) = run_exchange(&mut verifier, request, &client);

            assert!(verifier.verify_client_proof());
            assert_eq!(verifier.session_key().unwrap(), proof.shared_secret.as_slice());
            let m2 = verifier.server_proof().unwrap();
            assert!(client.verify_server_proof(m2, &proof.expected_server_proof));
        }

        #[test]
        fn wrong_code_fails_client_proof() {
            let (mut verifier, request) = SrpVerifier::new(PAIR_SETUP_USERNAME, CODE);
            let client = SrpClient::new(PAIR_SETUP_USERNAME, b"111-22-333");
            run_exchange(&mut verifier, request, &client);

            assert!(!verifier.verify_client_proof());
            assert!(!verifier.is_authenticated());
            assert!(verifier.session_key().is_none());
        }

        #[test]
        fn chunked_stages_match_one_shot() {
            let salt = [0x07u8; SALT_LEN];
            let b = vec![0x5Au8; 32];
            let (mut one_shot, r1) =
                SrpVerifier::with_secrets(PAIR_SETUP_USERNAME, CODE, salt, b.clone());
            let (mut chunked, r2) = SrpVerifier::with_secrets(PAIR_SETUP_USERNAME, CODE, salt, b);

            let expected = one_shot.run_to_public_key(r1).unwrap();
            let v = r2.into_job().unwrap().run();
            let g_b = chunked.set_verifier(v).into_job().unwrap().run();
            assert_eq!(chunked.set_public_term(g_b).unwrap(), expected);
        }
    }

    mod client {
        use super::*;

        #[test]
        fn public_key_is_deterministic_for_same_private() {
            let c1 = SrpClient::with_private_key(PAIR_SETUP_USERNAME, CODE, &[0x42; 32]);
            let c2 = SrpClient::with_private_key(PAIR_SETUP_USERNAME, CODE, &[0x42; 32]);
            assert_eq!(c1.public_key(), c2.public_key());
            assert_eq!(c1.public_key().len(), 384);
        }

        #[test]
        fn rejects_zero_server_public_key() {
            let client = SrpClient::new(PAIR_SETUP_USERNAME, CODE);
            let challenge = SrpChallenge {
                salt: [0u8; SALT_LEN],
                server_public_key: vec![0u8; 384],
            };
            assert!(client.process_challenge(&challenge).is_err());
        }

        #[test]
        fn proof_comparison() {
            let client = SrpClient::new(PAIR_SETUP_USERNAME, CODE);
            let expected = [0x42u8; 64];
            let mut wrong = expected;
            wrong[63] = 0;
            assert!(client.verify_server_proof(&expected, &expected));
            assert!(!client.verify_server_proof(&wrong, &expected));
        }
    }

    mod internal_functions {
        use super::*;

        #[test]
        fn compute_k_is_deterministic() {
            let params = SrpParams::default();
            assert_eq!(compute_k(&params), compute_k(&params));
        }

        #[test]
        fn compute_x_matches_prefixed_hash() {
            // x = H(salt || H("Pair-Setup:" || code))
            let salt = [0x01u8; SALT_LEN];
            let inner = Sha512::digest(b"Pair-Setup:816-32-958");
            let mut hasher = Sha512::new();
            hasher.update(salt);
            hasher.update(inner);
            let expected = BigUint::from_bytes_be(&hasher.finalize());
            assert_eq!(compute_x(&salt, PAIR_SETUP_USERNAME, CODE), expected);
        }

        #[test]
        fn pad_to_n_pads_correctly() {
            let padded = pad_to_n(&BigUint::from(255u32));
            assert_eq!(padded.len(), N_BYTES);
            assert!(padded[..N_BYTES - 1].iter().all(|&b| b == 0));
            assert_eq!(padded[N_BYTES - 1], 255);
        }
    }
}
