//! The paste lifecycle: create, read and status over an injected store.

use thiserror::Error;

use super::access::{AccessController, AccessDecision};
use super::crypto::{self, ContentKey, CryptoError, KdfParams};
use super::ids::{IdError, IdGenerator};
use super::time::{format_timestamp, SharedClock};
use crate::config::{Config, ExpiryLimits};
use crate::{
    EncryptionAlgorithm, FileRef, PasteAccess, PasteRecord, SharedPasteStore, StoreError,
};

/// Fresh ids tried when `create` loses a race for the one it was given.
const CREATE_ATTEMPTS: usize = 3;
const MAX_LANGUAGE_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum PasteError {
    #[error("invalid paste request: {0}")]
    Validation(String),
    #[error("could not allocate a free paste id")]
    GenerationExhausted,
    #[error("random source unavailable: {0}")]
    Entropy(String),
    #[error("paste not found: {0}")]
    NotFound(String),
    #[error("paste cryptography failed: {0}")]
    Crypto(CryptoError),
    #[error("paste store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PasteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PasteError::NotFound(id),
            other => PasteError::Store(other),
        }
    }
}

impl From<CryptoError> for PasteError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Entropy(message) => PasteError::Entropy(message),
            other => PasteError::Crypto(other),
        }
    }
}

impl From<IdError> for PasteError {
    fn from(err: IdError) -> Self {
        match err {
            IdError::Entropy(err) => PasteError::Entropy(err.to_string()),
            IdError::Exhausted(_) => PasteError::GenerationExhausted,
            IdError::Store(err) => err.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewPaste {
    pub expiry_secs: u64,
    pub text: Option<String>,
    pub files: Vec<FileRef>,
    pub protected: bool,
    pub credential: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPaste {
    pub id: String,
    pub protected: bool,
    pub expires_at: i64,
    pub text: Option<String>,
    pub files: Vec<FileRef>,
    pub language: Option<String>,
    /// Base64 content key; only for unprotected pastes.
    pub key_material: Option<String>,
    /// Base64 salt; only for protected pastes.
    pub salt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteMetadata {
    pub id: String,
    pub protected: bool,
    pub expires_at: i64,
    pub language: Option<String>,
    pub salt: String,
}

impl From<&PasteRecord> for PasteMetadata {
    fn from(record: &PasteRecord) -> Self {
        Self {
            id: record.id.clone(),
            protected: record.is_protected(),
            expires_at: record.expires_at,
            language: record.language.clone(),
            salt: record.salt.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PasteContent {
    pub text: Option<String>,
    pub files: Vec<FileRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The reader is not entitled to the payload.
    MetadataOnly(PasteMetadata),
    Revealed {
        metadata: PasteMetadata,
        content: PasteContent,
        key_material: Option<String>,
    },
}

impl ReadOutcome {
    pub fn metadata(&self) -> &PasteMetadata {
        match self {
            ReadOutcome::MetadataOnly(metadata) | ReadOutcome::Revealed { metadata, .. } => {
                metadata
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteStatus {
    pub id: String,
    pub protected: bool,
}

/// Request fields after validation, ready for sealing.
struct ValidPaste {
    expiry_secs: i64,
    text: Option<String>,
    files: Vec<FileRef>,
    files_json: Option<String>,
    credential: Option<String>,
    language: Option<String>,
}

pub struct PasteService {
    store: SharedPasteStore,
    clock: SharedClock,
    ids: IdGenerator,
    access: AccessController,
    kdf: KdfParams,
    cipher: EncryptionAlgorithm,
    expiry: ExpiryLimits,
    max_payload_bytes: usize,
}

impl PasteService {
    pub fn new(store: SharedPasteStore, clock: SharedClock, config: &Config) -> Self {
        Self {
            store,
            clock,
            ids: IdGenerator::default(),
            access: AccessController::new(config.kdf),
            kdf: config.kdf,
            cipher: config.cipher,
            expiry: config.expiry,
            max_payload_bytes: config.max_payload_bytes,
        }
    }

    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn store(&self) -> &SharedPasteStore {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Cap on text plus serialized file references, in bytes.
    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    pub async fn create(&self, request: NewPaste) -> Result<CreatedPaste, PasteError> {
        let paste = self.validate(request)?;

        let salt = crypto::generate_salt()?;
        let encoded_salt = crypto::encode_salt(&salt);
        let (key, access) = match &paste.credential {
            Some(credential) => {
                let derived =
                    crypto::derive_keys_blocking(credential.clone(), salt.to_vec(), self.kdf)
                        .await?;
                let access = PasteAccess::Credential {
                    verifier: derived.verifier,
                };
                (derived.key, access)
            }
            None => {
                let key = ContentKey::generate()?;
                let access = PasteAccess::Open {
                    key: key.to_base64(),
                };
                (key, access)
            }
        };

        let sealed_text = paste
            .text
            .as_deref()
            .map(|text| crypto::encrypt(text.as_bytes(), &key, self.cipher))
            .transpose()?;
        let sealed_files = paste
            .files_json
            .as_deref()
            .map(|json| crypto::encrypt(json.as_bytes(), &key, self.cipher))
            .transpose()?;
        let protected = paste.credential.is_some();

        for attempt in 1..=CREATE_ATTEMPTS {
            let now = self.clock.now();
            let id = self.ids.allocate(self.store.as_ref(), now).await?;
            let record = PasteRecord {
                id: id.clone(),
                text: sealed_text.clone(),
                files: sealed_files.clone(),
                access: access.clone(),
                salt: encoded_salt.clone(),
                language: paste.language.clone(),
                created_at: now,
                expires_at: now + paste.expiry_secs,
            };
            let expires_at = record.expires_at;

            match self.store.create(record).await {
                Ok(()) => {
                    log::info!(
                        "created paste {id} (protected: {protected}, expires {})",
                        format_timestamp(expires_at)
                    );
                    return Ok(CreatedPaste {
                        id,
                        protected,
                        expires_at,
                        text: paste.text,
                        files: paste.files,
                        language: paste.language,
                        key_material: (!protected).then(|| key.to_base64()),
                        salt: protected.then_some(encoded_salt),
                    });
                }
                Err(StoreError::Conflict(id)) => {
                    log::warn!(
                        "paste id {id} was claimed concurrently (attempt {attempt}/{CREATE_ATTEMPTS})"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(PasteError::GenerationExhausted)
    }

    pub async fn read(&self, id: &str, token: Option<&str>) -> Result<ReadOutcome, PasteError> {
        let record = self.store.get(id, self.clock.now()).await?;
        let metadata = PasteMetadata::from(&record);

        let (key, disclose) = match self.access.authorize(&record, token).await {
            Ok(AccessDecision::Granted { key, disclose }) => (key, disclose),
            Ok(AccessDecision::Denied) => {
                log::debug!("paste {id} read without a matching token");
                return Ok(ReadOutcome::MetadataOnly(metadata));
            }
            Err(err @ (CryptoError::Malformed(_) | CryptoError::Authentication)) => {
                log::warn!("paste {id} has unusable key material: {err}");
                return Ok(ReadOutcome::MetadataOnly(metadata));
            }
            Err(err) => return Err(err.into()),
        };

        match open_content(&record, &key) {
            Ok(content) => Ok(ReadOutcome::Revealed {
                metadata,
                content,
                key_material: disclose.then(|| key.to_base64()),
            }),
            Err(err) => {
                log::warn!("paste {id} failed to decrypt after access was granted: {err}");
                Ok(ReadOutcome::MetadataOnly(metadata))
            }
        }
    }

    pub async fn status(&self, id: &str) -> Result<PasteStatus, PasteError> {
        let record = self.store.get(id, self.clock.now()).await?;
        Ok(PasteStatus {
            protected: record.is_protected(),
            id: record.id,
        })
    }

    fn validate(&self, request: NewPaste) -> Result<ValidPaste, PasteError> {
        let NewPaste {
            expiry_secs,
            text,
            files,
            protected,
            credential,
            language,
        } = request;

        if !self.expiry.contains(expiry_secs) {
            return Err(PasteError::Validation(format!(
                "expiry must be between {} and {} seconds",
                self.expiry.min_secs, self.expiry.max_secs
            )));
        }

        let text = text.filter(|text| !text.is_empty());
        if text.is_none() && files.is_empty() {
            return Err(PasteError::Validation(
                "paste needs text or at least one file".into(),
            ));
        }
        if files
            .iter()
            .any(|file| file.name.trim().is_empty() || file.url.trim().is_empty())
        {
            return Err(PasteError::Validation(
                "every file needs a name and a url".into(),
            ));
        }

        let credential = if protected {
            match credential {
                Some(credential) if !credential.is_empty() => Some(credential),
                _ => {
                    return Err(PasteError::Validation(
                        "protected pastes require a password".into(),
                    ))
                }
            }
        } else {
            None
        };

        let language = language
            .map(|language| language.trim().to_string())
            .filter(|language| !language.is_empty());
        if let Some(language) = &language {
            let well_formed = language.len() <= MAX_LANGUAGE_LEN
                && language
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "+-#._".contains(c));
            if !well_formed {
                return Err(PasteError::Validation(format!(
                    "language must be at most {MAX_LANGUAGE_LEN} characters of [A-Za-z0-9+-#._]"
                )));
            }
        }

        let files_json = if files.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&files)
                    .map_err(|e| PasteError::Validation(format!("unserializable files: {e}")))?,
            )
        };
        let payload_len = text.as_ref().map_or(0, String::len)
            + files_json.as_ref().map_or(0, String::len);
        if payload_len > self.max_payload_bytes {
            return Err(PasteError::Validation(format!(
                "payload exceeds {} bytes",
                self.max_payload_bytes
            )));
        }

        Ok(ValidPaste {
            expiry_secs: expiry_secs as i64,
            text,
            files,
            files_json,
            credential,
            language,
        })
    }
}

fn open_content(record: &PasteRecord, key: &ContentKey) -> Result<PasteContent, CryptoError> {
    let text = record
        .text
        .as_ref()
        .map(|sealed| crypto::decrypt_text(sealed, key))
        .transpose()?;
    let files = match &record.files {
        Some(sealed) => {
            let json = crypto::decrypt(sealed, key)?;
            serde_json::from_slice(&json)
                .map_err(|_| CryptoError::Malformed("file list is not valid JSON"))?
        }
        None => Vec::new(),
    };
    Ok(PasteContent { text, files })
}
