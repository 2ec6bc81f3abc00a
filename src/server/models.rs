use serde::{Deserialize, Serialize};

use super::service::{CreatedPaste, NewPaste, PasteStatus, ReadOutcome};
use crate::FileRef;

#[derive(Deserialize, Default, Debug)]
#[serde(default, rename_all = "camelCase")]
pub struct CreatePasteRequest {
    /// Lifetime in seconds.
    pub expiry: u64,
    pub paste_text: Option<String>,
    pub files: Vec<FileRef>,
    pub pass_protect: bool,
    pub pass: Option<String>,
    pub language: Option<String>,
}

impl From<CreatePasteRequest> for NewPaste {
    fn from(request: CreatePasteRequest) -> Self {
        NewPaste {
            expiry_secs: request.expiry,
            text: request.paste_text,
            files: request.files,
            protected: request.pass_protect,
            credential: request.pass,
            language: request.language,
        }
    }
}

/// Body for both create and read. Content fields are absent when the caller
/// may only see metadata.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PasteResponse {
    pub id: String,
    pub protected: bool,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paste_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl From<CreatedPaste> for PasteResponse {
    fn from(created: CreatedPaste) -> Self {
        PasteResponse {
            id: created.id,
            protected: created.protected,
            expires_at: created.expires_at,
            language: created.language,
            salt: created.salt,
            paste_text: created.text,
            files: created.files,
            key: created.key_material,
        }
    }
}

impl From<ReadOutcome> for PasteResponse {
    fn from(outcome: ReadOutcome) -> Self {
        match outcome {
            ReadOutcome::MetadataOnly(metadata) => PasteResponse {
                id: metadata.id,
                protected: metadata.protected,
                expires_at: metadata.expires_at,
                language: metadata.language,
                salt: Some(metadata.salt),
                ..Default::default()
            },
            ReadOutcome::Revealed {
                metadata,
                content,
                key_material,
            } => PasteResponse {
                id: metadata.id,
                protected: metadata.protected,
                expires_at: metadata.expires_at,
                language: metadata.language,
                salt: Some(metadata.salt),
                paste_text: content.text,
                files: content.files,
                key: key_material,
            },
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct StatusRequest {
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct StatusResponse {
    pub id: String,
    pub protected: bool,
}

impl From<PasteStatus> for StatusResponse {
    fn from(status: PasteStatus) -> Self {
        StatusResponse {
            id: status.id,
            protected: status.protected,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
