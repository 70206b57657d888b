// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! All configuration is loaded from environment variables at startup.
//! Missing required variables abort startup; everything else falls back to
//! the defaults listed below.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ADMIN_ADDRESS` | Admin account address | required |
//! | `ADMIN_PRIVATE_KEY` | Admin account private key (hex) | required |
//! | `ADMIN_KEY_INDEX` | Admin key index | `0` |
//! | `ADMIN_KEY_TYPE` | Admin key backend (`local`) | `local` |
//! | `ADMIN_PROPOSAL_KEY_COUNT` | Parallel proposal keys on the admin account | `1` |
//! | `ENCRYPTION_KEY` | 32-byte hex key for stored private keys | required |
//! | `ACCESS_API_HOST` | Chain access node base URL | required |
//! | `DATABASE_DSN` | Database file path | `wallet.db` |
//! | `HOST` / `PORT` | Server bind address | `0.0.0.0:3000` |
//! | `MAX_TPS` | Transaction send-rate ceiling | `10` |
//! | `WORKER_COUNT` / `WORKER_QUEUE_CAPACITY` | Job executor pool | `100` / `1000` |
//!
//! Durations accept either plain seconds (`"60"`) or a unit suffix
//! (`"500ms"`, `"10s"`, `"5m"`, `"1h"`).

use std::env;
use std::time::Duration;

use crate::chain::{HashAlgorithm, SignatureAlgorithm};
use crate::models::{Address, TokenKind};

/// Backend used by the idempotency middleware, when enabled upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStoreType {
    Local,
    Shared,
    Redis,
}

/// One entry of `ENABLED_TOKENS`, `Name:0xaddress[:ft|nft]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    pub name: String,
    pub address: Address,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // -- Feature flags --
    pub disable_raw_transactions: bool,
    pub disable_fungible_tokens: bool,
    pub disable_non_fungible_tokens: bool,
    pub disable_chain_events: bool,
    pub disable_idempotency_middleware: bool,
    pub idempotency_store_type: IdempotencyStoreType,
    pub idempotency_redis_url: Option<String>,

    // -- Admin account --
    pub admin_address: Address,
    pub admin_key_index: u32,
    pub admin_key_type: String,
    pub admin_private_key: String,
    pub admin_proposal_key_count: u16,

    // -- Key generation & encryption --
    pub default_key_type: String,
    pub default_key_index: u32,
    pub default_key_weight: i32,
    pub default_sign_algo: SignatureAlgorithm,
    pub default_hash_algo: HashAlgorithm,
    pub default_account_key_count: u32,
    pub encryption_key: String,
    pub encryption_key_type: String,

    // -- Database --
    pub database_dsn: String,
    pub database_type: String,
    pub database_version: Option<String>,

    // -- Server & chain --
    pub host: String,
    pub port: u16,
    pub server_request_timeout: Duration,
    pub access_api_host: String,
    pub chain_id: String,

    // -- Tokens & scripts --
    pub enabled_tokens: Vec<TokenSpec>,
    pub script_path_create_account: Option<String>,

    // -- Job pipeline --
    pub worker_queue_capacity: usize,
    pub worker_count: usize,
    pub job_status_webhook: Option<String>,
    pub job_status_webhook_timeout: Duration,
    pub max_tps: u32,
    pub max_job_error_count: u32,
    pub db_job_poll_interval: Duration,
    pub accepted_grace_period: Duration,
    pub reschedulable_grace_period: Duration,
    pub pause_duration: Duration,
    /// Upper bound for any single chain-facing call. Zero means no timeout.
    pub transaction_timeout: Duration,

    // -- Chain event listener --
    pub events_starting_height: u64,
    pub events_max_blocks: u64,
    pub events_interval: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            disable_raw_transactions: env_bool("DISABLE_RAWTX"),
            disable_fungible_tokens: env_bool("DISABLE_FT"),
            disable_non_fungible_tokens: env_bool("DISABLE_NFT"),
            disable_chain_events: env_bool("DISABLE_CHAIN_EVENTS"),
            disable_idempotency_middleware: env_bool("DISABLE_IDEMPOTENCY_MIDDLEWARE"),
            idempotency_store_type: parse_idempotency_store_type(
                "IDEMPOTENCY_MIDDLEWARE_DATABASE_TYPE",
            )?,
            idempotency_redis_url: env_opt("IDEMPOTENCY_MIDDLEWARE_REDIS_URL"),

            admin_address: parse_address("ADMIN_ADDRESS")?,
            admin_key_index: env_parse("ADMIN_KEY_INDEX", 0)?,
            admin_key_type: env_string("ADMIN_KEY_TYPE", "local"),
            admin_private_key: env_required("ADMIN_PRIVATE_KEY")?,
            admin_proposal_key_count: env_parse("ADMIN_PROPOSAL_KEY_COUNT", 1)?,

            default_key_type: env_string("DEFAULT_KEY_TYPE", "local"),
            default_key_index: env_parse("DEFAULT_KEY_INDEX", 0)?,
            default_key_weight: env_parse("DEFAULT_KEY_WEIGHT", -1)?,
            default_sign_algo: parse_sign_algo("DEFAULT_SIGN_ALGO")?,
            default_hash_algo: parse_hash_algo("DEFAULT_HASH_ALGO")?,
            default_account_key_count: env_parse("DEFAULT_ACCOUNT_KEY_COUNT", 1)?,
            encryption_key: env_required("ENCRYPTION_KEY")?,
            encryption_key_type: env_string("ENCRYPTION_KEY_TYPE", "local"),

            database_dsn: env_string("DATABASE_DSN", "wallet.db"),
            database_type: env_string("DATABASE_TYPE", "embedded"),
            database_version: env_opt("DATABASE_VERSION"),

            host: env_string("HOST", "0.0.0.0"),
            port: env_parse("PORT", 3000)?,
            server_request_timeout: env_duration("SERVER_REQUEST_TIMEOUT", Duration::from_secs(60))?,
            access_api_host: env_required("ACCESS_API_HOST")?,
            chain_id: env_string("CHAIN_ID", "local"),

            enabled_tokens: parse_enabled_tokens("ENABLED_TOKENS")?,
            script_path_create_account: env_opt("SCRIPT_PATH_CREATE_ACCOUNT"),

            worker_queue_capacity: env_parse("WORKER_QUEUE_CAPACITY", 1000)?,
            worker_count: env_parse("WORKER_COUNT", 100)?,
            job_status_webhook: env_opt("JOB_STATUS_WEBHOOK"),
            job_status_webhook_timeout: env_duration(
                "JOB_STATUS_WEBHOOK_TIMEOUT",
                Duration::from_secs(60),
            )?,
            max_tps: env_parse("MAX_TPS", 10)?,
            max_job_error_count: env_parse("MAX_JOB_ERROR_COUNT", 10)?,
            db_job_poll_interval: env_duration("DB_JOB_POLL_INTERVAL", Duration::from_secs(60))?,
            accepted_grace_period: env_duration("ACCEPTED_GRACE_PERIOD", Duration::from_secs(180))?,
            reschedulable_grace_period: env_duration(
                "RESCHEDULABLE_GRACE_PERIOD",
                Duration::from_secs(600),
            )?,
            pause_duration: env_duration("PAUSE_DURATION", Duration::from_secs(60))?,
            transaction_timeout: env_duration("TRANSACTION_TIMEOUT", Duration::ZERO)?,

            events_starting_height: env_parse("EVENTS_STARTING_HEIGHT", 0)?,
            events_max_blocks: env_parse("EVENTS_MAX_BLOCKS", 100)?,
            events_interval: env_duration("EVENTS_INTERVAL", Duration::from_secs(10))?,
        })
    }

    /// Effective key weight: a negative configured weight selects the
    /// chain's full signing threshold.
    pub fn effective_key_weight(&self) -> u32 {
        effective_key_weight(self.default_key_weight)
    }
}

fn effective_key_weight(configured: i32) -> u32 {
    if configured < 0 {
        crate::chain::FULL_KEY_WEIGHT
    } else {
        configured as u32
    }
}

fn env_opt(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_string(name: &'static str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    env_opt(name).ok_or(ConfigError::Missing(name))
}

fn env_bool(name: &'static str) -> bool {
    matches!(
        env_opt(name).as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("True")
    )
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn env_duration(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env_opt(name) {
        None => Ok(default),
        Some(raw) => parse_duration(&raw).ok_or_else(|| ConfigError::Invalid {
            name,
            reason: format!("not a duration: {raw}"),
        }),
    }
}

/// Parse `"500ms"`, `"10s"`, `"5m"`, `"1h"` or bare seconds.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

fn parse_address(name: &'static str) -> Result<Address, ConfigError> {
    let raw = env_required(name)?;
    raw.parse()
        .map_err(|e: crate::models::AddressError| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })
}

fn parse_sign_algo(name: &'static str) -> Result<SignatureAlgorithm, ConfigError> {
    match env_opt(name).as_deref() {
        None => Ok(SignatureAlgorithm::EcdsaP256),
        Some("ECDSA_P256") => Ok(SignatureAlgorithm::EcdsaP256),
        Some("ECDSA_secp256k1") => Ok(SignatureAlgorithm::EcdsaSecp256k1),
        Some(other) => Err(ConfigError::Invalid {
            name,
            reason: format!("unknown signature algorithm: {other}"),
        }),
    }
}

fn parse_hash_algo(name: &'static str) -> Result<HashAlgorithm, ConfigError> {
    match env_opt(name).as_deref() {
        None => Ok(HashAlgorithm::Sha3_256),
        Some("SHA3_256") => Ok(HashAlgorithm::Sha3_256),
        Some("SHA2_256") => Ok(HashAlgorithm::Sha2_256),
        Some(other) => Err(ConfigError::Invalid {
            name,
            reason: format!("unknown hash algorithm: {other}"),
        }),
    }
}

fn parse_idempotency_store_type(name: &'static str) -> Result<IdempotencyStoreType, ConfigError> {
    match env_opt(name).as_deref() {
        None | Some("local") => Ok(IdempotencyStoreType::Local),
        Some("shared") => Ok(IdempotencyStoreType::Shared),
        Some("redis") => Ok(IdempotencyStoreType::Redis),
        Some(other) => Err(ConfigError::Invalid {
            name,
            reason: format!("unknown idempotency store type: {other}"),
        }),
    }
}

/// Parse the `ENABLED_TOKENS` comma list. Entries are
/// `Name:0xaddress` or `Name:0xaddress:nft`.
fn parse_enabled_tokens(name: &'static str) -> Result<Vec<TokenSpec>, ConfigError> {
    let Some(raw) = env_opt(name) else {
        return Ok(Vec::new());
    };

    let mut specs = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.split(':');
        let (Some(token_name), Some(address)) = (parts.next(), parts.next()) else {
            return Err(ConfigError::Invalid {
                name,
                reason: format!("malformed token entry: {entry}"),
            });
        };
        if token_name.is_empty() {
            return Err(ConfigError::Invalid {
                name,
                reason: format!("malformed token entry: {entry}"),
            });
        }
        let kind = match parts.next() {
            None | Some("ft") => TokenKind::Fungible,
            Some("nft") => TokenKind::NonFungible,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("unknown token kind: {other}"),
                })
            }
        };
        let address: Address =
            address
                .parse()
                .map_err(|e: crate::models::AddressError| ConfigError::Invalid {
                    name,
                    reason: e.to_string(),
                })?;
        specs.push(TokenSpec {
            name: token_name.to_string(),
            address,
            kind,
        });
    }
    Ok(specs)
}
