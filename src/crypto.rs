//! Wrappers around the [sodiumoxide] primitives used by both coordinators.
//!
//! Every payload crossing the trust boundary between the model developer and the data owner is
//! serialized with [bincode] and sealed with an authenticated symmetric cipher
//! (`XSalsa20-Poly1305`) under a key shared out-of-band by the two parties. The sealed envelope
//! has the layout:
//!
//! ```text
//! +----------------+------------------------------------+
//! | nonce (24 B)   | MAC (16 B) || encrypted plaintext |
//! +----------------+------------------------------------+
//! ```
//!
//! # Examples
//! ```
//! # use sealed_eval::crypto::{self, SharedKey};
//! let key = SharedKey::generate();
//! let sealed = crypto::encrypt(&vec![1_u8, 2, 3], &key).unwrap();
//! let opened: Vec<u8> = crypto::decrypt(&sealed, &key).unwrap();
//! assert_eq!(opened, vec![1, 2, 3]);
//! ```
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/
//! [bincode]: https://docs.rs/bincode/

use std::fmt;

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use sodiumoxide::crypto::{hash::sha256, secretbox};
use thiserror::Error;

/// Number of additional bytes in an envelope compared to the serialized plaintext.
pub const SEALBYTES: usize = secretbox::NONCEBYTES + secretbox::MACBYTES;

/// Initializes the underlying crypto library.
///
/// Should be called once at startup, before any worker thread is spawned.
pub fn init() -> Result<(), CodecError> {
    sodiumoxide::init().map_err(|_| CodecError::Init)
}

#[derive(Clone, PartialEq, Eq)]
/// A symmetric key shared between the two parties.
///
/// When this goes out of scope, its contents will be zeroed out. The key never shows up in
/// `Debug` output.
pub struct SharedKey(secretbox::Key);

impl SharedKey {
    /// Length of the key in bytes.
    pub const LENGTH: usize = secretbox::KEYBYTES;

    /// Generates a new random key.
    pub fn generate() -> Self {
        Self(secretbox::gen_key())
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    /// Returns `None` if the length of the slice isn't [`SharedKey::LENGTH`].
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        secretbox::Key::from_slice(bytes).map(Self)
    }

    /// Decodes a key from its base64 representation. Both the standard and the URL-safe
    /// alphabets are accepted.
    pub fn from_base64(encoded: &str) -> Result<Self, InvalidKey> {
        let encoded = encoded.trim();
        let bytes = base64::decode(encoded)
            .or_else(|_| base64::decode_config(encoded, base64::URL_SAFE))
            .map_err(|_| InvalidKey::Encoding)?;
        Self::from_slice(&bytes).ok_or(InvalidKey::Length(bytes.len()))
    }

    /// Encodes the key as standard base64.
    pub fn to_base64(&self) -> String {
        base64::encode(&(self.0).0[..])
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
/// An error related to decoding a [`SharedKey`].
pub enum InvalidKey {
    #[error("the key is not valid base64")]
    Encoding,
    #[error("the key must be 32 bytes long, got {0}")]
    Length(usize),
}

#[derive(Debug, Error)]
/// Errors of the transport codec.
pub enum CodecError {
    #[error("the payload failed authentication: it was tampered with or sealed under another key")]
    Integrity,
    #[error("the payload is not valid structured data: {0}")]
    MalformedPayload(String),
    #[error("failed to serialize the payload: {0}")]
    Serialization(String),
    #[error("failed to initialize the crypto library")]
    Init,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Serializes `value` and seals it under `key`.
pub fn encrypt<T>(value: &T, key: &SharedKey) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    let plaintext = options()
        .serialize(value)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    let nonce = secretbox::gen_nonce();
    let ciphertext = secretbox::seal(&plaintext, &nonce, &key.0);

    let mut envelope = Vec::with_capacity(secretbox::NONCEBYTES + ciphertext.len());
    envelope.extend_from_slice(&nonce.0[..]);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Opens an envelope sealed by [`encrypt`] and deserializes its content.
///
/// # Errors
/// - [`CodecError::Integrity`] if the envelope was tampered with, truncated or sealed under a
///   different key.
/// - [`CodecError::MalformedPayload`] if the authentic plaintext is not a valid `T`.
pub fn decrypt<T>(envelope: &[u8], key: &SharedKey) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    if envelope.len() < SEALBYTES {
        return Err(CodecError::Integrity);
    }
    let (nonce, ciphertext) = envelope.split_at(secretbox::NONCEBYTES);
    // safe unwrap: the length is checked above
    let nonce = secretbox::Nonce::from_slice(nonce).unwrap();
    let plaintext =
        secretbox::open(ciphertext, &nonce, &key.0).map_err(|_| CodecError::Integrity)?;
    options()
        .deserialize(&plaintext)
        .map_err(|e| CodecError::MalformedPayload(e.to_string()))
}

/// Computes the `SHA256` digest of `m`.
pub fn sha256(m: &[u8]) -> [u8; sha256::DIGESTBYTES] {
    sha256::hash(m).0
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_roundtrip() {
        let key = SharedKey::generate();
        let mut value = BTreeMap::new();
        value.insert("config".to_string(), b"{\"num_labels\": 2}".to_vec());
        value.insert("model".to_string(), vec![0_u8; 1024]);

        let sealed = encrypt(&value, &key).unwrap();
        let opened: BTreeMap<String, Vec<u8>> = decrypt(&sealed, &key).unwrap();
        assert_eq!(opened, value);
    }

    #[test]
    fn test_nonces_differ() {
        let key = SharedKey::generate();
        let a = encrypt("same", &key).unwrap();
        let b = encrypt("same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampering_is_detected_at_every_position() {
        let key = SharedKey::generate();
        let sealed = encrypt(&(0.75_f64, "weighted".to_string()), &key).unwrap();

        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            match decrypt::<(f64, String)>(&tampered, &key) {
                Err(CodecError::Integrity) => {}
                other => panic!("byte {}: expected integrity error, got {:?}", i, other),
            }
        }
    }

    #[test]
    fn test_wrong_key() {
        let sealed = encrypt(&42_u64, &SharedKey::generate()).unwrap();
        assert!(matches!(
            decrypt::<u64>(&sealed, &SharedKey::generate()),
            Err(CodecError::Integrity)
        ));
    }

    #[test]
    fn test_truncated_envelope() {
        let key = SharedKey::generate();
        assert!(matches!(decrypt::<u64>(&[], &key), Err(CodecError::Integrity)));
        let sealed = encrypt(&42_u64, &key).unwrap();
        assert!(matches!(
            decrypt::<u64>(&sealed[..SEALBYTES - 1], &key),
            Err(CodecError::Integrity)
        ));
    }

    #[test]
    fn test_malformed_plaintext() {
        let key = SharedKey::generate();
        // an authentic envelope holding a single byte cannot decode into a `u64`
        let sealed = encrypt(&1_u8, &key).unwrap();
        assert!(matches!(
            decrypt::<u64>(&sealed, &key),
            Err(CodecError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_key_base64() {
        let key = SharedKey::generate();
        assert_eq!(SharedKey::from_base64(&key.to_base64()).unwrap(), key);

        let url_safe = base64::encode_config(&(key.0).0[..], base64::URL_SAFE);
        assert_eq!(SharedKey::from_base64(&url_safe).unwrap(), key);

        assert_eq!(
            SharedKey::from_base64("c2hvcnQ=").unwrap_err(),
            InvalidKey::Length(5)
        );
        assert_eq!(
            SharedKey::from_base64("not base64!").unwrap_err(),
            InvalidKey::Encoding
        );
    }

    #[test]
    fn test_key_is_redacted() {
        let key = SharedKey::generate();
        let debug = format!("{:?}", key);
        assert_eq!(debug, "SharedKey(<redacted>)");
        assert!(!debug.contains(&key.to_base64()));
    }
}
