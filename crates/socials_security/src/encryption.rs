//! Symmetric encryption and password hashing for sensitive values.
//!
//! Ciphertexts are AES-256-GCM with a fresh 96-bit nonce per call, encoded
//! as URL-safe base64 of `nonce || ciphertext || tag`.

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, generic_array::GenericArray},
};
use base64::{Engine, engine::general_purpose::URL_SAFE};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use sha2::Sha256;
use socials_error::{SecurityError, SecurityErrorKind, SecurityResult};
use subtle::ConstantTimeEq;
use tracing::{debug, error, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// PBKDF2 rounds for key derivation and data hashing.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Salted PBKDF2 hash of a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct HashedData {
    /// Hex-encoded PBKDF2-HMAC-SHA256 output
    hash: String,
    /// Salt used for the hash
    salt: String,
}

/// Key derived from a password, with the salt needed to derive it again.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop, derive_getters::Getters)]
pub struct DerivedKey {
    /// URL-safe base64 key, accepted by [`EncryptionManager::from_base64_key`]
    key: String,
    /// Hex-encoded salt
    salt: String,
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .field("salt", &self.salt)
            .finish()
    }
}

fn encryption_error(reason: &str) -> SecurityError {
    SecurityError::new(SecurityErrorKind::Encryption(reason.to_string()))
}

fn decryption_error(reason: &str) -> SecurityError {
    SecurityError::new(SecurityErrorKind::Decryption(reason.to_string()))
}

/// Encrypts and decrypts with one key held for the manager's lifetime.
///
/// The key is zeroized on drop and never rotated.
pub struct EncryptionManager {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for EncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionManager")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl EncryptionManager {
    /// Create a manager with a freshly generated random key.
    pub fn new() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut key[..]);
        Self { key }
    }

    /// Generate a new random key as URL-safe base64.
    pub fn generate_key() -> String {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut key[..]);
        URL_SAFE.encode(&key[..])
    }

    /// Create a manager from a URL-safe base64 key of 32 bytes.
    pub fn from_base64_key(encoded: &str) -> SecurityResult<Self> {
        let decoded = Zeroizing::new(URL_SAFE.decode(encoded.trim()).map_err(|_| {
            SecurityError::new(SecurityErrorKind::Configuration(
                "Encryption key is not valid URL-safe base64".to_string(),
            ))
        })?);
        if decoded.len() != KEY_LEN {
            return Err(SecurityError::new(SecurityErrorKind::Configuration(
                format!("Encryption key must be {} bytes, got {}", KEY_LEN, decoded.len()),
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    /// Create a manager from a password and salt.
    pub fn from_password(password: &str, salt: &[u8]) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
        Self { key }
    }

    /// Derive a key from a password, generating a 16-byte salt if none is given.
    pub fn derive_key_from_password(password: &str, salt: Option<&[u8]>) -> DerivedKey {
        let salt = match salt {
            Some(salt) => salt.to_vec(),
            None => {
                let mut salt = vec![0u8; 16];
                rand::rng().fill_bytes(&mut salt);
                salt
            }
        };
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key[..]);
        DerivedKey {
            key: URL_SAFE.encode(&key[..]),
            salt: hex::encode(salt),
        }
    }

    fn cipher(&self) -> SecurityResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key[..])
            .map_err(|_| encryption_error("Invalid encryption key length"))
    }

    /// Encrypt a string.
    #[instrument(skip_all, fields(len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &str) -> SecurityResult<String> {
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let nonce_array = GenericArray::from_slice(&nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(nonce_array, plaintext.as_bytes())
            .map_err(|_| {
                error!("Encryption failed");
                encryption_error("Cipher rejected the input")
            })?;

        let mut combined = nonce;
        combined.extend_from_slice(&ciphertext);
        debug!("Encrypted value");
        Ok(URL_SAFE.encode(combined))
    }

    /// Decrypt a string produced by [`EncryptionManager::encrypt`].
    #[instrument(skip_all, fields(len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &str) -> SecurityResult<String> {
        let data = URL_SAFE
            .decode(ciphertext.trim())
            .map_err(|_| decryption_error("Ciphertext is not valid base64"))?;
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(decryption_error("Ciphertext is too short"));
        }

        let (nonce, body) = data.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher()?
                .decrypt(GenericArray::from_slice(nonce), body)
                .map_err(|_| {
                    error!("Decryption failed");
                    decryption_error("Wrong key or corrupted ciphertext")
                })?,
        );

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| decryption_error("Decrypted data is not valid UTF-8"))
    }

    /// Encrypt a JSON object.
    pub fn encrypt_dict(&self, data: &Map<String, Value>) -> SecurityResult<String> {
        self.encrypt_json(data)
    }

    /// Decrypt a JSON object produced by [`EncryptionManager::encrypt_dict`].
    pub fn decrypt_dict(&self, ciphertext: &str) -> SecurityResult<Map<String, Value>> {
        self.decrypt_json(ciphertext)
    }

    /// Serialize `value` to JSON and encrypt it.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> SecurityResult<String> {
        let json = Zeroizing::new(
            serde_json::to_string(value)
                .map_err(|e| encryption_error(&format!("Serialization failed: {}", e)))?,
        );
        self.encrypt(&json)
    }

    /// Decrypt and deserialize a value produced by [`EncryptionManager::encrypt_json`].
    pub fn decrypt_json<T: DeserializeOwned>(&self, ciphertext: &str) -> SecurityResult<T> {
        let json = Zeroizing::new(self.decrypt(ciphertext)?);
        serde_json::from_str(&json)
            .map_err(|_| decryption_error("Decrypted data is not the expected JSON shape"))
    }

    /// Hash `data` with PBKDF2-HMAC-SHA256, generating a salt if none is given.
    pub fn hash_data(data: &str, salt: Option<&str>) -> HashedData {
        let salt = salt.map(str::to_string).unwrap_or_else(|| {
            let mut bytes = [0u8; 16];
            rand::rng().fill_bytes(&mut bytes);
            hex::encode(bytes)
        });
        HashedData {
            hash: pbkdf2_hex(data, &salt),
            salt,
        }
    }

    /// Check `data` against a hash in constant time.
    pub fn verify_hash(data: &str, hash: &str, salt: &str) -> bool {
        let computed = pbkdf2_hex(data, salt);
        computed.as_bytes().ct_eq(hash.as_bytes()).into()
    }
}

impl Default for EncryptionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn pbkdf2_hex(data: &str, salt: &str) -> String {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(data.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut out);
    hex::encode(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let manager = EncryptionManager::new();
        let encoded = manager.encrypt("abc").unwrap();
        let raw = URL_SAFE.decode(&encoded).unwrap();
        assert_eq!(raw.len(), NONCE_LEN + 3 + TAG_LEN);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let manager = EncryptionManager::new();
        let mut raw = URL_SAFE.decode(manager.encrypt("secret").unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let err = manager.decrypt(&URL_SAFE.encode(raw)).unwrap_err();
        assert!(matches!(err.kind(), SecurityErrorKind::Decryption(_)));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn test_short_and_garbage_input_rejected() {
        let manager = EncryptionManager::new();
        assert!(manager.decrypt("not base64 !!").is_err());
        assert!(manager.decrypt(&URL_SAFE.encode([0u8; 10])).is_err());
    }

    #[test]
    fn test_base64_key_roundtrip() {
        let key = EncryptionManager::generate_key();
        let a = EncryptionManager::from_base64_key(&key).unwrap();
        let b = EncryptionManager::from_base64_key(&key).unwrap();
        let ciphertext = a.encrypt("shared").unwrap();
        assert_eq!(b.decrypt(&ciphertext).unwrap(), "shared");
        assert!(EncryptionManager::from_base64_key(&URL_SAFE.encode([1u8; 16])).is_err());
    }

    #[test]
    fn test_derived_key_is_reproducible() {
        let first = EncryptionManager::derive_key_from_password("hunter2", None);
        let salt = hex::decode(first.salt()).unwrap();
        let second = EncryptionManager::derive_key_from_password("hunter2", Some(&salt));
        assert_eq!(first.key(), second.key());

        let manager = EncryptionManager::from_password("hunter2", &salt);
        let from_key = EncryptionManager::from_base64_key(first.key()).unwrap();
        let ciphertext = manager.encrypt("same key").unwrap();
        assert_eq!(from_key.decrypt(&ciphertext).unwrap(), "same key");
    }

    #[test]
    fn test_hash_verify() {
        let hashed = EncryptionManager::hash_data("token", None);
        assert_eq!(hashed.salt().len(), 32);
        assert!(EncryptionManager::verify_hash("token", hashed.hash(), hashed.salt()));
        assert!(!EncryptionManager::verify_hash("tokem", hashed.hash(), hashed.salt()));
        assert!(!EncryptionManager::verify_hash("token", "abc", hashed.salt()));
    }
}
