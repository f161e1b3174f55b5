use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants::{
    AUTH_REPLY_SIZE, CHALLENGE_SIZE, NONCE_SIZE, PROTOCOL_VERSION, PUBKEY_SIZE, SIGNATURE_SIZE,
};
use crate::error::IdentityError;
use crate::types::PublicKey;

/// A user's keypair. The public key is the user's identity.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    pub fn public_key(&self) -> PublicKey {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Build the handshake reply for a server challenge.
    pub fn answer(&self, nonce: &[u8; NONCE_SIZE]) -> AuthReply {
        AuthReply {
            public_key: self.public_key(),
            signature: self.sign(nonce).to_bytes(),
        }
    }
}

/// Verify a signature against a public key. Uses strict verification so
/// malleable or small-order signatures are refused.
pub fn verify_signature(
    pubkey_bytes: &PublicKey,
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    let signature = Signature::from_bytes(signature);
    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| IdentityError::BadSignature)
}

// ---------------------------------------------------------------------------
// Handshake messages
// ---------------------------------------------------------------------------

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Server → client: `version || nonce`.
pub fn encode_challenge(nonce: &[u8; NONCE_SIZE]) -> [u8; CHALLENGE_SIZE] {
    let mut out = [0u8; CHALLENGE_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..].copy_from_slice(nonce);
    out
}

pub fn parse_challenge(bytes: &[u8]) -> Result<[u8; NONCE_SIZE], IdentityError> {
    if bytes.len() != CHALLENGE_SIZE {
        return Err(IdentityError::Malformed {
            expected: CHALLENGE_SIZE,
            actual: bytes.len(),
        });
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(IdentityError::UnsupportedVersion(bytes[0]));
    }
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&bytes[1..]);
    Ok(nonce)
}

/// Client → server: `version || public_key || signature(nonce)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub public_key: PublicKey,
    pub signature: [u8; SIGNATURE_SIZE],
}

impl AuthReply {
    pub fn to_bytes(&self) -> [u8; AUTH_REPLY_SIZE] {
        let mut out = [0u8; AUTH_REPLY_SIZE];
        out[0] = PROTOCOL_VERSION;
        out[1..1 + PUBKEY_SIZE].copy_from_slice(&self.public_key);
        out[1 + PUBKEY_SIZE..].copy_from_slice(&self.signature);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != AUTH_REPLY_SIZE {
            return Err(IdentityError::Malformed {
                expected: AUTH_REPLY_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != PROTOCOL_VERSION {
            return Err(IdentityError::UnsupportedVersion(bytes[0]));
        }
        let mut public_key = [0u8; PUBKEY_SIZE];
        public_key.copy_from_slice(&bytes[1..1 + PUBKEY_SIZE]);
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&bytes[1 + PUBKEY_SIZE..]);
        Ok(Self {
            public_key,
            signature,
        })
    }

    /// Check the signature against the nonce the server issued.
    pub fn verify(&self, nonce: &[u8; NONCE_SIZE]) -> Result<(), IdentityError> {
        verify_signature(&self.public_key, nonce, &self.signature)
    }
}
