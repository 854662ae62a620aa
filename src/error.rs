//! Error types for the evidence engine

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {reason}")]
    Storage { reason: String },

    #[error("Internal consistency violation: {reason}")]
    Internal { reason: String },
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Non-finite number at {path}")]
    NonFiniteNumber { path: String },

    #[error("Canonicalization failed: {reason}")]
    CanonicalizationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid run identifier: {reason}")]
    InvalidRunId { reason: String },

    #[error("Malformed payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("Invalid fetch target: {reason}")]
    InvalidTarget { reason: String },

    #[error("Target not allowlisted: {method} {host}{path}")]
    TargetNotAllowlisted {
        method: String,
        host: String,
        path: String,
    },

    #[error("No handler registered for {module}/{action}")]
    UnknownHandler { module: String, action: String },

    #[error("Unknown run: {run_id}")]
    UnknownRun { run_id: String },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient balance for {account} in {asset}: required {required}, available {available}")]
    InsufficientBalance {
        account: String,
        asset: String,
        required: u64,
        available: u64,
    },

    #[error("Balance overflow for {account} in {asset}")]
    BalanceOverflow { account: String, asset: String },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Run identifier already executed or in flight: {run_id}")]
    RunIdConflict { run_id: String },

    #[error("Rate limit exceeded for {account}, retry after {retry_after_ms}ms")]
    RateLimited { account: String, retry_after_ms: u64 },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("SSRF blocked: {reason}")]
    SsrfBlocked { reason: String },

    #[error("Upstream failure ({code}): {reason}")]
    Upstream { code: String, reason: String },

    #[error("Sealed secret rejected: {reason}")]
    SealedSecret { reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Treasury address is not configured")]
    MissingTreasury,

    #[error("Protocol fee for {module}/{action} must be greater than zero")]
    ZeroProtocolFee { module: String, action: String },

    #[error("No secret vault configured but a sealed secret was supplied")]
    MissingSecretVault,

    #[error("Invalid allowlist entry: {reason}")]
    InvalidAllowlist { reason: String },

    #[error("Handler already registered for {module}/{action}")]
    DuplicateHandler { module: String, action: String },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Structured error surface handed to callers.
///
/// Codes are stable identifiers; `message` and `details` never contain
/// stack traces, raw secrets, or other internal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl EngineError {
    /// Stable public code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Ledger(LedgerError::InsufficientBalance { .. }) => "INSUFFICIENT_BALANCE",
            EngineError::Ledger(_) => "LEDGER_ERROR",
            EngineError::Run(RunError::RunIdConflict { .. }) => "RUN_ID_CONFLICT",
            EngineError::Run(RunError::RateLimited { .. }) => "RATE_LIMITED",
            EngineError::Fetch(FetchError::SsrfBlocked { .. }) => "SSRF_BLOCKED",
            EngineError::Fetch(FetchError::SealedSecret { .. }) => "VALIDATION_ERROR",
            EngineError::Fetch(FetchError::Upstream { .. }) => "UPSTREAM_ERROR",
            EngineError::Configuration(_) => "CONFIGURATION_ERROR",
            EngineError::Storage { .. } => "STORAGE_ERROR",
            EngineError::Internal { .. } => "INTERNAL",
        }
    }

    /// Convert into the structured report surfaced to callers.
    pub fn report(&self) -> ErrorReport {
        let mut details = BTreeMap::new();
        match self {
            EngineError::Run(RunError::RunIdConflict { run_id }) => {
                details.insert("run_id".to_string(), run_id.clone());
            }
            EngineError::Run(RunError::RateLimited { retry_after_ms, .. }) => {
                details.insert("retry_after_ms".to_string(), retry_after_ms.to_string());
            }
            EngineError::Ledger(LedgerError::InsufficientBalance {
                asset,
                required,
                available,
                ..
            }) => {
                details.insert("asset".to_string(), asset.clone());
                details.insert("required".to_string(), required.to_string());
                details.insert("available".to_string(), available.to_string());
            }
            _ => {}
        }
        let message = match self {
            // Internal faults must not leak their reason to callers.
            EngineError::Internal { .. } => "internal error".to_string(),
            EngineError::Storage { .. } => "storage error".to_string(),
            other => other.to_string(),
        };
        ErrorReport {
            code: self.code().to_string(),
            message,
            details,
        }
    }
}
