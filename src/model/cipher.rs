//! Field-level protection for personal data at rest.
//!
//! Searchable identifiers (email, phone, position) are stored as a SHA-256
//! digest next to their encrypted value; everything else is only encrypted.
//! Encryption is AES-256-CBC with a fresh IV per value, stored as
//! `hex(iv):hex(ciphertext)`.

use std::fmt::{Debug, Formatter};

use aes::{
    cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes256,
};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const KEY_LENGTH: usize = 32;
pub const IV_LENGTH: usize = 16;

/// Deterministic lowercase hex SHA-256 of the given value.
pub fn hash_value(value: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(value.as_bytes()))
}

/// An encrypted field value as it sits in the database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sealed(String);

impl Sealed {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for Sealed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sealed(..)")
    }
}

/// Encrypts and decrypts individual fields with a single server key.
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; KEY_LENGTH],
}

impl FieldCipher {
    /// Build a cipher from a 64 character hex key.
    pub fn from_hex(key: &str) -> Result<Self> {
        let bytes = HEXLOWER_PERMISSIVE
            .decode(key.trim().as_bytes())
            .map_err(|e| Error::Cipher(format!("encryption key is not hex: {e}")))?;
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::Cipher(format!(
                "encryption key must be {KEY_LENGTH} bytes ({} hex characters)",
                KEY_LENGTH * 2
            ))
        })?;
        Ok(Self { key })
    }

    /// Encrypt a plaintext value under a fresh random IV.
    pub fn seal(&self, plain: &str) -> Sealed {
        let mut iv = [0_u8; IV_LENGTH];
        rand::thread_rng().fill(&mut iv);
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
        Sealed(format!(
            "{}:{}",
            HEXLOWER.encode(&iv),
            HEXLOWER.encode(&ciphertext)
        ))
    }

    /// Decrypt a value previously produced by [`FieldCipher::seal`].
    pub fn open(&self, sealed: &Sealed) -> Result<String> {
        let (iv_hex, ciphertext_hex) = sealed
            .0
            .split_once(':')
            .ok_or_else(|| Error::Cipher("sealed value has no IV separator".to_string()))?;
        let iv: [u8; IV_LENGTH] = HEXLOWER_PERMISSIVE
            .decode(iv_hex.as_bytes())
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Error::Cipher("sealed value has a malformed IV".to_string()))?;
        let ciphertext = HEXLOWER_PERMISSIVE
            .decode(ciphertext_hex.as_bytes())
            .map_err(|e| Error::Cipher(format!("sealed value is not hex: {e}")))?;
        let plain = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| Error::Cipher("bad padding, wrong key?".to_string()))?;
        String::from_utf8(plain).map_err(|_| Error::Cipher("plaintext is not UTF-8".to_string()))
    }

    /// Seal an optional value.
    pub fn seal_opt(&self, plain: Option<&str>) -> Option<Sealed> {
        plain.map(|p| self.seal(p))
    }

    /// Open an optional value.
    pub fn open_opt(&self, sealed: Option<&Sealed>) -> Result<Option<String>> {
        sealed.map(|s| self.open(s)).transpose()
    }
}

impl Debug for FieldCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FieldCipher(..)")
    }
}

/// Example data for tests.
#[cfg(test)]
pub mod examples {
    use super::*;

    pub const EXAMPLE_KEY: &str =
        "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    impl FieldCipher {
        pub fn example() -> Self {
            Self::from_hex(EXAMPLE_KEY).unwrap()
        }
    }
}
