//! Streaming AES-256-CBC stage.
//!
//! Key and IV are derived once per process from configured seeds: each is the
//! leading characters of `base64(SHA-512(seed))`. Every stored object shares
//! the same pair, so ciphertext written by earlier deployments stays readable.
//!
//! A [`CipherStage`] consumes chunks in arrival order and keeps the CBC chain
//! plus any partial block between calls. [`CipherStage::finalize`] emits the
//! closing block exactly once: PKCS#7 padding on encrypt, padding removal on
//! decrypt.

use aes::Aes256;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, generic_array::GenericArray};
use sha2::{Digest, Sha512};
use std::fmt;
use thiserror::Error;

pub const BLOCK_SIZE: usize = 16;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("cipher stage already finalized")]
    AlreadyFinalized,
    #[error("bad decrypt: ciphertext is truncated or not block aligned")]
    Truncated,
    #[error("bad decrypt: invalid padding")]
    BadPadding,
}

/// Process-wide key material. Read-only after construction.
#[derive(Clone)]
pub struct CipherKeys {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl CipherKeys {
    pub fn derive(key_seed: &str, iv_seed: &str) -> Self {
        Self {
            key: derive_material(key_seed),
            iv: derive_material(iv_seed),
        }
    }

    pub fn encryptor(&self) -> CipherStage {
        CipherStage::new(Direction::Encrypt(cbc::Encryptor::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&self.iv),
        )))
    }

    pub fn decryptor(&self) -> CipherStage {
        CipherStage::new(Direction::Decrypt(cbc::Decryptor::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&self.iv),
        )))
    }
}

impl fmt::Debug for CipherKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKeys")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

fn derive_material<const N: usize>(seed: &str) -> [u8; N] {
    let digest = Sha512::digest(seed.as_bytes());
    let encoded = general_purpose::STANDARD.encode(digest);
    let mut out = [0u8; N];
    out.copy_from_slice(&encoded.as_bytes()[..N]);
    out
}

enum Direction {
    Encrypt(cbc::Encryptor<Aes256>),
    Decrypt(cbc::Decryptor<Aes256>),
}

/// One direction of the block cipher over a single stream.
pub struct CipherStage {
    direction: Direction,
    pending: Vec<u8>,
    finalized: bool,
}

impl CipherStage {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            pending: Vec::with_capacity(BLOCK_SIZE),
            finalized: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Feed the next chunk. Returns whatever whole blocks are ready, which
    /// may be empty when the chunk does not complete a block.
    pub fn update(&mut self, input: &[u8]) -> Result<Bytes, CipherError> {
        if self.finalized {
            return Err(CipherError::AlreadyFinalized);
        }
        self.pending.extend_from_slice(input);

        let mut ready = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        // The last block may carry padding; decrypt keeps it until finalize.
        if matches!(self.direction, Direction::Decrypt(_)) && ready == self.pending.len() {
            ready = ready.saturating_sub(BLOCK_SIZE);
        }
        if ready == 0 {
            return Ok(Bytes::new());
        }

        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        self.apply(&mut out);
        Ok(Bytes::from(out))
    }

    /// Emit the closing block. Errors on a second call.
    pub fn finalize(&mut self) -> Result<Bytes, CipherError> {
        if self.finalized {
            return Err(CipherError::AlreadyFinalized);
        }
        self.finalized = true;

        let mut last = std::mem::take(&mut self.pending);
        match self.direction {
            Direction::Encrypt(_) => {
                let pad = BLOCK_SIZE - last.len();
                last.resize(BLOCK_SIZE, pad as u8);
                self.apply(&mut last);
                Ok(Bytes::from(last))
            }
            Direction::Decrypt(_) => {
                if last.len() != BLOCK_SIZE {
                    return Err(CipherError::Truncated);
                }
                self.apply(&mut last);
                let pad = last[BLOCK_SIZE - 1] as usize;
                if pad == 0
                    || pad > BLOCK_SIZE
                    || last[BLOCK_SIZE - pad..].iter().any(|&b| b as usize != pad)
                {
                    return Err(CipherError::BadPadding);
                }
                last.truncate(BLOCK_SIZE - pad);
                Ok(Bytes::from(last))
            }
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match &mut self.direction {
            Direction::Encrypt(enc) => {
                for block in buf.chunks_exact_mut(BLOCK_SIZE) {
                    enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
            Direction::Decrypt(dec) => {
                for block in buf.chunks_exact_mut(BLOCK_SIZE) {
                    dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
        }
    }
}
