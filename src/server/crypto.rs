use aes_gcm::aead::{self, Aead, AeadCore, KeyInit};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

use crate::{EncryptionAlgorithm, SealedPayload};

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

const CONTENT_KEY_INFO: &[u8] = b"klistra/content-key";
const VERIFIER_INFO: &[u8] = b"klistra/verifier";

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("payload failed authentication")]
    Authentication,
    #[error("malformed sealed payload: {0}")]
    Malformed(&'static str),
    #[error("random source unavailable: {0}")]
    Entropy(String),
    #[error("payload could not be sealed")]
    Seal,
}

/// Argon2id cost factors. Defaults follow the OWASP minimum for Argon2id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn validate(&self) -> Result<(), CryptoError> {
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> Result<Argon2<'static>, CryptoError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::Kdf(format!("invalid Argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Symmetric key for a paste's payloads. Wiped from memory on drop.
pub struct ContentKey([u8; KEY_LEN]);

impl ContentKey {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_LEN];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut decoded = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::Malformed("key is not base64"))?;
        if decoded.len() != KEY_LEN {
            decoded.zeroize();
            return Err(CryptoError::Malformed("key has wrong length"));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Output of credential derivation: the content key and a verifier that can
/// be stored without revealing it.
#[derive(Debug)]
pub struct DerivedKeys {
    pub key: ContentKey,
    pub verifier: String,
}

pub fn generate_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;
    Ok(salt)
}

pub fn encode_salt(salt: &[u8]) -> String {
    BASE64_STANDARD.encode(salt)
}

pub fn decode_salt(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64_STANDARD
        .decode(encoded)
        .map_err(|_| CryptoError::Malformed("salt is not base64"))
}

/// Stretches `credential` with Argon2id, then splits the result with HKDF
/// into independent content-key and verifier outputs.
///
/// This is deliberately slow; async callers should go through
/// [`derive_keys_blocking`].
pub fn derive_keys(
    credential: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<DerivedKeys, CryptoError> {
    let mut master = [0u8; KEY_LEN];
    params
        .argon2()?
        .hash_password_into(credential.as_bytes(), salt, &mut master)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;

    let hk = Hkdf::<Sha256>::new(None, &master);
    master.zeroize();

    let mut key = [0u8; KEY_LEN];
    let mut verifier = [0u8; KEY_LEN];
    hk.expand(CONTENT_KEY_INFO, &mut key)
        .and_then(|_| hk.expand(VERIFIER_INFO, &mut verifier))
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;

    Ok(DerivedKeys {
        key: ContentKey(key),
        verifier: hex::encode(verifier),
    })
}

pub async fn derive_keys_blocking(
    credential: String,
    salt: Vec<u8>,
    params: KdfParams,
) -> Result<DerivedKeys, CryptoError> {
    tokio::task::spawn_blocking(move || {
        let mut credential = credential;
        let derived = derive_keys(&credential, &salt, &params);
        credential.zeroize();
        derived
    })
    .await
    .map_err(|e| CryptoError::Kdf(format!("derivation task failed: {e}")))?
}

pub fn verifiers_match(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

pub fn encrypt(
    plaintext: &[u8],
    key: &ContentKey,
    algorithm: EncryptionAlgorithm,
) -> Result<SealedPayload, CryptoError> {
    let (nonce, ciphertext) = match algorithm {
        EncryptionAlgorithm::Aes256Gcm => seal::<Aes256Gcm>(key, plaintext)?,
        EncryptionAlgorithm::ChaCha20Poly1305 => seal::<ChaCha20Poly1305>(key, plaintext)?,
        EncryptionAlgorithm::XChaCha20Poly1305 => seal::<XChaCha20Poly1305>(key, plaintext)?,
    };

    Ok(SealedPayload {
        algorithm,
        nonce: BASE64_STANDARD.encode(nonce),
        ciphertext: BASE64_STANDARD.encode(ciphertext),
    })
}

pub fn decrypt(sealed: &SealedPayload, key: &ContentKey) -> Result<Vec<u8>, CryptoError> {
    let nonce = BASE64_STANDARD
        .decode(&sealed.nonce)
        .map_err(|_| CryptoError::Malformed("nonce is not base64"))?;
    let ciphertext = BASE64_STANDARD
        .decode(&sealed.ciphertext)
        .map_err(|_| CryptoError::Malformed("ciphertext is not base64"))?;

    match sealed.algorithm {
        EncryptionAlgorithm::Aes256Gcm => open::<Aes256Gcm>(key, &nonce, &ciphertext),
        EncryptionAlgorithm::ChaCha20Poly1305 => open::<ChaCha20Poly1305>(key, &nonce, &ciphertext),
        EncryptionAlgorithm::XChaCha20Poly1305 => {
            open::<XChaCha20Poly1305>(key, &nonce, &ciphertext)
        }
    }
}

pub fn decrypt_text(sealed: &SealedPayload, key: &ContentKey) -> Result<String, CryptoError> {
    let bytes = decrypt(sealed, key)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::Malformed("plaintext is not UTF-8"))
}

fn seal<C>(key: &ContentKey, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Seal)?;
    let mut nonce = aead::Nonce::<C>::default();
    fill_random(nonce.as_mut_slice())?;
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Seal)?;
    Ok((nonce.to_vec(), ciphertext))
}

fn open<C>(key: &ContentKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: Aead + AeadCore + KeyInit,
{
    if nonce.len() != aead::Nonce::<C>::default().len() {
        return Err(CryptoError::Malformed("nonce has wrong length"));
    }
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Authentication)?;
    cipher
        .decrypt(aead::Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

fn fill_random(dest: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(dest)
        .map_err(|e| CryptoError::Entropy(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    };

    #[test]
    fn derivation_is_deterministic_per_salt() {
        let a = derive_keys("pw1", b"0123456789abcdef", &FAST).unwrap();
        let b = derive_keys("pw1", b"0123456789abcdef", &FAST).unwrap();
        assert_eq!(a.key.to_base64(), b.key.to_base64());
        assert_eq!(a.verifier, b.verifier);
    }

    #[test]
    fn different_salts_give_different_keys() {
        let a = derive_keys("pw1", b"0123456789abcdef", &FAST).unwrap();
        let b = derive_keys("pw1", b"fedcba9876543210", &FAST).unwrap();
        assert_ne!(a.key.to_base64(), b.key.to_base64());
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn verifier_is_independent_of_content_key() {
        let derived = derive_keys("pw1", b"0123456789abcdef", &FAST).unwrap();
        let key_hex = hex::encode(derived.key.as_bytes());
        assert_ne!(derived.verifier, key_hex);
        assert_eq!(derived.verifier.len(), KEY_LEN * 2);
    }

    #[test]
    fn verifier_comparison_handles_length_mismatch() {
        assert!(verifiers_match("abcd", "abcd"));
        assert!(!verifiers_match("abcd", "abce"));
        assert!(!verifiers_match("abcd", "abcdef"));
    }

    #[test]
    fn rejects_invalid_kdf_params() {
        let params = KdfParams {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        assert!(matches!(params.validate(), Err(CryptoError::Kdf(_))));
    }

    #[test]
    fn wrong_key_fails_authentication_for_every_algorithm() {
        for algorithm in [
            EncryptionAlgorithm::Aes256Gcm,
            EncryptionAlgorithm::ChaCha20Poly1305,
            EncryptionAlgorithm::XChaCha20Poly1305,
        ] {
            let key = ContentKey::generate().unwrap();
            let other = ContentKey::generate().unwrap();
            let sealed = encrypt(b"payload", &key, algorithm).unwrap();

            assert_eq!(decrypt(&sealed, &key).unwrap(), b"payload");
            assert!(matches!(
                decrypt(&sealed, &other),
                Err(CryptoError::Authentication)
            ));
        }
    }

    #[test]
    fn nonce_length_matches_algorithm() {
        let key = ContentKey::generate().unwrap();
        let gcm = encrypt(b"x", &key, EncryptionAlgorithm::Aes256Gcm).unwrap();
        let xchacha = encrypt(b"x", &key, EncryptionAlgorithm::XChaCha20Poly1305).unwrap();
        assert_eq!(BASE64_STANDARD.decode(gcm.nonce).unwrap().len(), 12);
        assert_eq!(BASE64_STANDARD.decode(xchacha.nonce).unwrap().len(), 24);
    }

    #[test]
    fn truncated_nonce_is_malformed() {
        let key = ContentKey::generate().unwrap();
        let mut sealed = encrypt(b"x", &key, EncryptionAlgorithm::Aes256Gcm).unwrap();
        sealed.nonce = BASE64_STANDARD.encode([0u8; 4]);
        assert!(matches!(
            decrypt(&sealed, &key),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn key_material_round_trips_through_base64() {
        let key = ContentKey::generate().unwrap();
        let restored = ContentKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.as_bytes(), restored.as_bytes());
        assert!(ContentKey::from_base64("c2hvcnQ=").is_err());
    }
}
