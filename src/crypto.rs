//! Envelope encryption for stored seller API keys.
//!
//! Each record is encrypted under a per-record subkey derived with
//! HKDF-SHA256 from a versioned master key and a fresh random salt, then
//! sealed with ChaCha20-Poly1305. The key version recorded next to the
//! ciphertext selects the master key and the derivation scheme on decrypt:
//!
//! - version 0: legacy records, master key used directly (no KDF)
//! - version >= 1: HKDF per-record subkey
//!
//! Rotation is staged: the keyring may hold several versions at once, and a
//! record whose version is missing from the keyring fails closed instead of
//! decrypting to garbage.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::SecurityConfig;

pub const SALT_BYTES: usize = 16;
const NONCE_BYTES: usize = 12;
const INFO_RECORD_KEY_V1: &[u8] = b"kuzka:record-key:v1";
const INFO_SESSION_KEY: &[u8] = b"kuzka:session-mac:v1";

/// Cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Master key is not valid base64: {0}")]
    MasterKeyEncoding(String),

    #[error("Master key must decode to 32 bytes, got {0}")]
    MasterKeyLength(usize),

    #[error("No master key registered for key_version={0}")]
    UnknownVersion(i32),

    #[error("Stored salt is invalid")]
    InvalidSalt,

    #[error("Decryption failed - ciphertext tampered or wrong master key")]
    AuthFailure,

    #[error("Encryption failed")]
    EncryptFailure,
}

pub type CipherResult<T> = Result<T, CipherError>;

/// A 32-byte master key, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Parse a key from config. Accepts "base64:<urlsafe-b64>" or bare
    /// base64 (standard or urlsafe), decoding to exactly 32 bytes.
    pub fn parse(raw: &str) -> CipherResult<Self> {
        let encoded = raw.strip_prefix("base64:").unwrap_or(raw);
        let bytes = base64::engine::general_purpose::URL_SAFE
            .decode(encoded)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded))
            .or_else(|_| BASE64.decode(encoded))
            .map_err(|e| CipherError::MasterKeyEncoding(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CipherError::MasterKeyLength(bytes.len()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Versioned set of master keys. One version is current (used for new
/// records); the rest remain recognized for decryption only.
pub struct Keyring {
    current_version: i32,
    keys: HashMap<i32, MasterKey>,
}

impl Keyring {
    pub fn new(current_version: i32, current_key: MasterKey) -> Self {
        let mut keys = HashMap::new();
        keys.insert(current_version, current_key);
        Self {
            current_version,
            keys,
        }
    }

    /// Register an older key so records written under it stay readable.
    pub fn add_previous(&mut self, version: i32, key: MasterKey) {
        self.keys.insert(version, key);
    }

    pub fn current_version(&self) -> i32 {
        self.current_version
    }

    fn key_for(&self, version: i32) -> CipherResult<&MasterKey> {
        self.keys
            .get(&version)
            .ok_or(CipherError::UnknownVersion(version))
    }
}

/// An encrypted credential as persisted: base64 ciphertext (nonce-prefixed),
/// base64 salt, and the key version that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub salt: String,
    pub key_version: i32,
}

/// Encoding scheme behind a key version. Version 0 predates the KDF and used
/// the master key as the record key directly; everything newer derives a
/// per-record subkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    LegacyDirect,
    HkdfRecord,
}

impl Scheme {
    fn for_version(version: i32) -> Self {
        if version == 0 {
            Self::LegacyDirect
        } else {
            Self::HkdfRecord
        }
    }
}

/// Encrypts and decrypts seller API keys. Pure and stateless apart from the
/// injected keyring; safe to share across request handlers.
pub struct CredentialCipher {
    keyring: Keyring,
}

impl CredentialCipher {
    pub fn new(keyring: Keyring) -> Self {
        Self { keyring }
    }

    /// Build the cipher from the security section of the app config.
    pub fn from_config(security: &SecurityConfig) -> CipherResult<Self> {
        let current = MasterKey::parse(&security.master_key)?;
        let mut keyring = Keyring::new(security.key_version, current);
        for (version, raw) in &security.previous_keys {
            keyring.add_previous(*version, MasterKey::parse(raw)?);
        }
        Ok(Self::new(keyring))
    }

    /// Encrypt a plaintext secret under the current key version.
    pub fn encrypt(&self, plaintext: &str) -> CipherResult<EncryptedSecret> {
        let version = self.keyring.current_version();
        let master = self.keyring.key_for(version)?;

        let mut salt = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);

        let mut record_key = derive_record_key(master, &salt);
        let sealed = seal(&record_key, plaintext.as_bytes())?;
        record_key.zeroize();

        Ok(EncryptedSecret {
            ciphertext: BASE64.encode(sealed),
            salt: BASE64.encode(salt),
            key_version: version,
        })
    }

    /// Decrypt a stored record, dispatching on the scheme its key version
    /// tags it with.
    pub fn decrypt(&self, record: &EncryptedSecret) -> CipherResult<String> {
        let master = self.keyring.key_for(record.key_version)?;
        let sealed = BASE64
            .decode(&record.ciphertext)
            .map_err(|_| CipherError::AuthFailure)?;

        let plaintext = match Scheme::for_version(record.key_version) {
            Scheme::LegacyDirect => open(master.as_bytes(), &sealed)?,
            Scheme::HkdfRecord => {
                let salt = BASE64
                    .decode(&record.salt)
                    .map_err(|_| CipherError::InvalidSalt)?;
                if salt.len() < 8 {
                    return Err(CipherError::InvalidSalt);
                }
                let mut record_key = derive_record_key(master, &salt);
                let out = open(&record_key, &sealed);
                record_key.zeroize();
                out?
            }
        };

        String::from_utf8(plaintext).map_err(|_| CipherError::AuthFailure)
    }

    /// Derive the session-signing key from the current master key. Kept
    /// separate from record keys by the HKDF info string.
    pub fn session_key(&self) -> CipherResult<[u8; 32]> {
        let master = self.keyring.key_for(self.keyring.current_version())?;
        let hk = Hkdf::<Sha256>::new(None, master.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(INFO_SESSION_KEY, &mut key)
            .map_err(|_| CipherError::EncryptFailure)?;
        Ok(key)
    }
}

/// Derive a per-record ChaCha20-Poly1305 key via HKDF-SHA256.
fn derive_record_key(master: &MasterKey, salt: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), master.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(INFO_RECORD_KEY_V1, &mut key)
        .expect("32 bytes is a valid HKDF output length");
    key
}

/// Encrypt with a random nonce; output is nonce || ciphertext.
fn seal(key: &[u8; 32], plaintext: &[u8]) -> CipherResult<Vec<u8>> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| CipherError::EncryptFailure)?;

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CipherError::EncryptFailure)?;

    let mut out = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt nonce-prefixed ciphertext. Fails closed on any mismatch.
fn open(key: &[u8; 32], sealed: &[u8]) -> CipherResult<Vec<u8>> {
    if sealed.len() < NONCE_BYTES {
        return Err(CipherError::AuthFailure);
    }
    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| CipherError::AuthFailure)?;

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_BYTES);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CipherError::AuthFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_cipher() -> CredentialCipher {
        CredentialCipher::new(Keyring::new(1, MasterKey::from_bytes([7u8; 32])))
    }

    #[test]
    fn test_round_trip() {
        let cipher = test_cipher();
        let record = cipher.encrypt("SECRET123").unwrap();
        assert_eq!(record.key_version, 1);
        assert_eq!(cipher.decrypt(&record).unwrap(), "SECRET123");
    }

    #[test]
    fn test_salts_are_fresh_per_record() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails_auth() {
        let cipher = test_cipher();
        let record = cipher.encrypt("SECRET123").unwrap();

        let mut raw = BASE64.decode(&record.ciphertext).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = EncryptedSecret {
                ciphertext: BASE64.encode(&raw),
                ..record.clone()
            };
            assert!(matches!(
                cipher.decrypt(&tampered),
                Err(CipherError::AuthFailure)
            ));
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn test_tampered_salt_fails_auth() {
        let cipher = test_cipher();
        let record = cipher.encrypt("SECRET123").unwrap();

        let mut salt = BASE64.decode(&record.salt).unwrap();
        salt[0] ^= 0x01;
        let tampered = EncryptedSecret {
            salt: BASE64.encode(&salt),
            ..record.clone()
        };
        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(CipherError::AuthFailure)
        ));
    }

    #[test]
    fn test_wrong_master_key_fails_auth() {
        let cipher = test_cipher();
        let record = cipher.encrypt("SECRET123").unwrap();

        let other = CredentialCipher::new(Keyring::new(1, MasterKey::from_bytes([8u8; 32])));
        assert!(matches!(
            other.decrypt(&record),
            Err(CipherError::AuthFailure)
        ));
    }

    #[test]
    fn test_version_zero_legacy_fallback() {
        let master = [7u8; 32];
        // Legacy records were sealed with the master key directly.
        let sealed = seal(&master, b"legacy-secret").unwrap();
        let record = EncryptedSecret {
            ciphertext: BASE64.encode(sealed),
            salt: String::new(),
            key_version: 0,
        };

        let mut keyring = Keyring::new(1, MasterKey::from_bytes(master));
        keyring.add_previous(0, MasterKey::from_bytes(master));
        let cipher = CredentialCipher::new(keyring);

        assert_eq!(cipher.decrypt(&record).unwrap(), "legacy-secret");
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let cipher = test_cipher();
        let record = cipher.encrypt("SECRET123").unwrap();
        let future = EncryptedSecret {
            key_version: 9,
            ..record
        };
        assert!(matches!(
            cipher.decrypt(&future),
            Err(CipherError::UnknownVersion(9))
        ));
    }

    #[test]
    fn test_staged_rotation() {
        let old = CredentialCipher::new(Keyring::new(1, MasterKey::from_bytes([7u8; 32])));
        let record = old.encrypt("SECRET123").unwrap();

        // Rotated keyring that still recognizes version 1: decrypts fine.
        let mut keyring = Keyring::new(2, MasterKey::from_bytes([9u8; 32]));
        keyring.add_previous(1, MasterKey::from_bytes([7u8; 32]));
        let staged = CredentialCipher::new(keyring);
        assert_eq!(staged.decrypt(&record).unwrap(), "SECRET123");

        // New records go out under version 2.
        let fresh = staged.encrypt("NEWSECRET").unwrap();
        assert_eq!(fresh.key_version, 2);

        // A hard rotation reusing the version number but a new key: auth
        // failure, never garbage.
        let hard = CredentialCipher::new(Keyring::new(1, MasterKey::from_bytes([9u8; 32])));
        assert!(matches!(
            hard.decrypt(&record),
            Err(CipherError::AuthFailure)
        ));
    }

    #[test]
    fn test_master_key_parse_formats() {
        let b64 = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
        assert!(MasterKey::parse(b64).is_ok());
        assert!(MasterKey::parse(&format!("base64:{b64}")).is_ok());
        assert!(matches!(
            MasterKey::parse("base64:AAAA"),
            Err(CipherError::MasterKeyLength(3))
        ));
        assert!(matches!(
            MasterKey::parse("not base64 at all!!"),
            Err(CipherError::MasterKeyEncoding(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip(plaintext in ".{0,256}", key in any::<[u8; 32]>()) {
            let cipher = CredentialCipher::new(Keyring::new(1, MasterKey::from_bytes(key)));
            let record = cipher.encrypt(&plaintext).unwrap();
            prop_assert_eq!(cipher.decrypt(&record).unwrap(), plaintext);
        }

        #[test]
        fn prop_key_mismatch_fails(key_a in any::<[u8; 32]>(), key_b in any::<[u8; 32]>()) {
            prop_assume!(key_a != key_b);
            let a = CredentialCipher::new(Keyring::new(1, MasterKey::from_bytes(key_a)));
            let b = CredentialCipher::new(Keyring::new(1, MasterKey::from_bytes(key_b)));
            let record = a.encrypt("SECRET123").unwrap();
            prop_assert!(matches!(b.decrypt(&record), Err(CipherError::AuthFailure)));
        }
    }
}
