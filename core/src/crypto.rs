// Symmetric payload encryption: AES-128-CBC, PKCS#7, fresh IV per message
//
// One static key is shared by the whole mesh and the relay — any participant
// can decrypt any message. That is a protocol-level simplification every
// deployed node depends on; do not "upgrade" it without a wire version bump.
//
// Blob format: IV (16 bytes) || ciphertext.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Key length in bytes (AES-128)
pub const KEY_LEN: usize = 16;
/// Initialization vector length in bytes
pub const IV_LEN: usize = 16;
/// AES block length in bytes
pub const BLOCK_LEN: usize = 16;

/// Cipher errors — always values, never panics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Ciphertext blob too short: {0} bytes (need IV + one block)")]
    TooShort(usize),

    #[error("Ciphertext length {0} is not a whole number of blocks")]
    Misaligned(usize),

    #[error("Padding check failed — corrupt ciphertext or wrong key")]
    Padding,
}

/// The mesh-wide preshared key.
///
/// Derived from a configured passphrase by truncating or zero-padding its
/// bytes to exactly 16 — the derivation every existing node uses, kept for
/// interoperability. Key material zeroizes on drop; logs only ever see the
/// [`fingerprint`](PresharedKey::fingerprint).
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PresharedKey([u8; KEY_LEN]);

impl PresharedKey {
    /// Derive the key from a passphrase: UTF-8 bytes, zero-padded or
    /// truncated to 16.
    pub fn derive(passphrase: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        let bytes = passphrase.as_bytes();
        let n = bytes.len().min(KEY_LEN);
        key[..n].copy_from_slice(&bytes[..n]);
        PresharedKey(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        PresharedKey(bytes)
    }

    /// Short non-reversible identifier for logging and operator sanity
    /// checks ("are we on the same key?").
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PresharedKey({})", self.fingerprint())
    }
}

/// Message cipher bound to one preshared key.
#[derive(Clone)]
pub struct Cipher {
    key: PresharedKey,
}

impl Cipher {
    pub fn new(key: PresharedKey) -> Self {
        Cipher { key }
    }

    pub fn key_fingerprint(&self) -> String {
        self.key.fingerprint()
    }

    /// Encrypt a plaintext with a fresh random IV; returns IV || ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes128CbcEnc::new(&self.key.0.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        blob
    }

    /// Decrypt an IV-prefixed blob and strip padding.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
        if blob.len() < IV_LEN + BLOCK_LEN {
            return Err(CipherError::TooShort(blob.len()));
        }
        let (iv, ciphertext) = blob.split_at(IV_LEN);
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CipherError::Misaligned(ciphertext.len()));
        }

        let mut iv_arr = [0u8; IV_LEN];
        iv_arr.copy_from_slice(iv);

        Aes128CbcDec::new(&self.key.0.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::Padding)
    }
}
