use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::server::crypto::KdfParams;
use crate::EncryptionAlgorithm;

pub const MIN_EXPIRY_SECS: u64 = 60;
pub const MAX_EXPIRY_SECS: u64 = 2_592_000;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
const DEFAULT_SQLITE_PATH: &str = "data/klistra.db";
const DEFAULT_REDIS_KEY_PREFIX: &str = "paste:";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} is required for the selected store")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite {
        path: PathBuf,
    },
    Redis {
        url: String,
        token: String,
        key_prefix: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryLimits {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl ExpiryLimits {
    pub fn contains(&self, secs: u64) -> bool {
        (self.min_secs..=self.max_secs).contains(&secs)
    }
}

impl Default for ExpiryLimits {
    fn default() -> Self {
        Self {
            min_secs: MIN_EXPIRY_SECS,
            max_secs: MAX_EXPIRY_SECS,
        }
    }
}

/// Process-wide settings, read once at startup and never mutated after.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub sweep_interval: Duration,
    pub kdf: KdfParams,
    pub expiry: ExpiryLimits,
    pub max_payload_bytes: usize,
    pub cipher: EncryptionAlgorithm,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            kdf: KdfParams::default(),
            expiry: ExpiryLimits::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            cipher: EncryptionAlgorithm::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let store = match lookup("KLISTRA_STORE")
            .map(|value| value.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("memory") => StoreBackend::Memory,
            Some("sqlite") => StoreBackend::Sqlite {
                path: lookup("KLISTRA_SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH)),
            },
            Some("redis") => StoreBackend::Redis {
                url: lookup("UPSTASH_REDIS_REST_URL")
                    .ok_or(ConfigError::Missing("UPSTASH_REDIS_REST_URL"))?,
                token: lookup("UPSTASH_REDIS_REST_TOKEN")
                    .ok_or(ConfigError::Missing("UPSTASH_REDIS_REST_TOKEN"))?,
                key_prefix: lookup("KLISTRA_REDIS_KEY_PREFIX")
                    .unwrap_or_else(|| DEFAULT_REDIS_KEY_PREFIX.to_string()),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "KLISTRA_STORE",
                    value: other.to_string(),
                    reason: "expected memory, sqlite or redis".into(),
                })
            }
        };

        let sweep_secs: u64 = parse_or(
            &lookup,
            "KLISTRA_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?;
        if sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "KLISTRA_SWEEP_INTERVAL_SECS",
                value: "0".into(),
                reason: "interval must be positive".into(),
            });
        }

        let kdf = KdfParams {
            memory_kib: parse_or(&lookup, "KLISTRA_KDF_MEMORY_KIB", defaults.kdf.memory_kib)?,
            iterations: parse_or(&lookup, "KLISTRA_KDF_ITERATIONS", defaults.kdf.iterations)?,
            parallelism: parse_or(&lookup, "KLISTRA_KDF_PARALLELISM", defaults.kdf.parallelism)?,
        };
        kdf.validate().map_err(|err| ConfigError::Invalid {
            key: "KLISTRA_KDF_*",
            value: format!("{kdf:?}"),
            reason: err.to_string(),
        })?;

        let cipher = match lookup("KLISTRA_CIPHER") {
            Some(value) => parse_cipher(&value)?,
            None => defaults.cipher,
        };

        Ok(Config {
            store,
            sweep_interval: Duration::from_secs(sweep_secs),
            kdf,
            expiry: defaults.expiry,
            max_payload_bytes: parse_or(
                &lookup,
                "KLISTRA_MAX_PAYLOAD_BYTES",
                defaults.max_payload_bytes,
            )?,
            cipher,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map_err(|err: T::Err| ConfigError::Invalid {
                    key,
                    value: value.clone(),
                    reason: err.to_string(),
                })
        }
        _ => Ok(default),
    }
}

pub fn parse_cipher(value: &str) -> Result<EncryptionAlgorithm, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "aes256_gcm" => Ok(EncryptionAlgorithm::Aes256Gcm),
        "chacha20_poly1305" => Ok(EncryptionAlgorithm::ChaCha20Poly1305),
        "xchacha20_poly1305" => Ok(EncryptionAlgorithm::XChaCha20Poly1305),
        other => Err(ConfigError::Invalid {
            key: "KLISTRA_CIPHER",
            value: other.to_string(),
            reason: "expected aes256_gcm, chacha20_poly1305 or xchacha20_poly1305".into(),
        }),
    }
}
