//! Capability decisions for reading a paste.
//!
//! The decision depends only on the record's access mode, the token the
//! reader presented and the stored verifier. Decrypting the payload is a
//! separate step the caller performs once a grant is issued.

use super::crypto::{self, ContentKey, CryptoError, KdfParams};
use crate::{PasteAccess, PasteRecord};

#[derive(Debug)]
pub enum AccessDecision {
    /// Only metadata may be released.
    Denied,
    /// Payload may be decrypted with `key`; `disclose` says whether the key
    /// itself is handed back to the reader.
    Granted { key: ContentKey, disclose: bool },
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted { .. })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessController {
    kdf: KdfParams,
}

impl AccessController {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    /// Errors only on infrastructure failures (KDF misconfiguration, a
    /// corrupt stored key or salt); a wrong token is `Denied`, never an error.
    pub async fn authorize(
        &self,
        record: &PasteRecord,
        token: Option<&str>,
    ) -> Result<AccessDecision, CryptoError> {
        match &record.access {
            PasteAccess::Open { key } => Ok(AccessDecision::Granted {
                key: ContentKey::from_base64(key)?,
                disclose: true,
            }),
            PasteAccess::Credential { verifier } => {
                let token = match token {
                    Some(value) if !value.is_empty() => value,
                    _ => return Ok(AccessDecision::Denied),
                };

                let salt = crypto::decode_salt(&record.salt)?;
                let derived =
                    crypto::derive_keys_blocking(token.to_string(), salt, self.kdf).await?;

                if crypto::verifiers_match(verifier, &derived.verifier) {
                    Ok(AccessDecision::Granted {
                        key: derived.key,
                        disclose: false,
                    })
                } else {
                    Ok(AccessDecision::Denied)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    };

    fn record(access: PasteAccess, salt: &[u8]) -> PasteRecord {
        PasteRecord {
            id: "calm-owl-000000".into(),
            text: None,
            files: None,
            access,
            salt: crypto::encode_salt(salt),
            language: None,
            created_at: 0,
            expires_at: 60,
        }
    }

    fn protected(credential: &str) -> PasteRecord {
        let salt = b"0123456789abcdef";
        let derived = crypto::derive_keys(credential, salt, &FAST).unwrap();
        record(
            PasteAccess::Credential {
                verifier: derived.verifier,
            },
            salt,
        )
    }

    #[tokio::test]
    async fn protected_paste_requires_matching_token() {
        let controller = AccessController::new(FAST);
        let record = protected("pw1");

        let denied = controller.authorize(&record, Some("wrong")).await.unwrap();
        assert!(!denied.is_granted());

        let granted = controller.authorize(&record, Some("pw1")).await.unwrap();
        assert!(matches!(
            granted,
            AccessDecision::Granted {
                disclose: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_or_empty_token_is_denied() {
        let controller = AccessController::new(FAST);
        let record = protected("pw1");

        assert!(!controller.authorize(&record, None).await.unwrap().is_granted());
        assert!(!controller
            .authorize(&record, Some(""))
            .await
            .unwrap()
            .is_granted());
    }

    #[tokio::test]
    async fn open_paste_discloses_key_regardless_of_token() {
        let controller = AccessController::new(FAST);
        let key = ContentKey::generate().unwrap();
        let record = record(
            PasteAccess::Open {
                key: key.to_base64(),
            },
            b"0123456789abcdef",
        );

        for token in [None, Some("anything")] {
            let decision = controller.authorize(&record, token).await.unwrap();
            match decision {
                AccessDecision::Granted { key: granted, disclose } => {
                    assert!(disclose);
                    assert_eq!(granted.to_base64(), key.to_base64());
                }
                AccessDecision::Denied => panic!("open paste must be granted"),
            }
        }
    }

    #[tokio::test]
    async fn corrupt_open_key_is_an_error() {
        let controller = AccessController::new(FAST);
        let record = record(
            PasteAccess::Open {
                key: "not base64!".into(),
            },
            b"0123456789abcdef",
        );
        assert!(controller.authorize(&record, None).await.is_err());
    }
}
