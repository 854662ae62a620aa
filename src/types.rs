//! Core data types for the evidence engine

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Semantic version carried in the protocol anchor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Create a new version
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a `major.minor.patch` string
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Run identifier, validated against a bounded grammar.
///
/// Grammar: 1 to 64 bytes, first byte lowercase alphanumeric, remainder
/// lowercase alphanumeric, `-` or `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub const MAX_LEN: usize = 64;

    /// Validate and wrap a raw identifier
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() || raw.len() > Self::MAX_LEN {
            return Err(ValidationError::InvalidRunId {
                reason: format!("length must be 1..={} bytes", Self::MAX_LEN),
            });
        }
        let bytes = raw.as_bytes();
        if !(bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit()) {
            return Err(ValidationError::InvalidRunId {
                reason: "must start with a lowercase letter or digit".to_string(),
            });
        }
        if !bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'_')
        {
            return Err(ValidationError::InvalidRunId {
                reason: "only lowercase letters, digits, '-' and '_' are allowed".to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one balance record in the ledger arena
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub account_id: String,
    pub asset_id: String,
}

impl LedgerKey {
    pub fn new(account_id: impl Into<String>, asset_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            asset_id: asset_id.into(),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.asset_id)
    }
}

/// Signed balance change for one ledger key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDelta {
    pub key: LedgerKey,
    pub amount: i64,
}

impl LedgerDelta {
    pub fn credit(key: LedgerKey, amount: u64) -> Self {
        Self {
            key,
            amount: amount as i64,
        }
    }

    pub fn debit(key: LedgerKey, amount: u64) -> Self {
        Self {
            key,
            amount: -(amount as i64),
        }
    }
}

/// One recorded balance inside a pre-state snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub account_id: String,
    pub asset_id: String,
    pub balance: u64,
}

/// Balances referenced by a run, captured at execution time.
///
/// Entries are sorted by (account, asset) so the snapshot canonicalizes to
/// identical bytes regardless of capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub entries: Vec<BalanceRecord>,
}

impl StateSnapshot {
    pub fn from_entries(mut entries: Vec<BalanceRecord>) -> Self {
        entries.sort_by(|a, b| {
            (&a.account_id, &a.asset_id).cmp(&(&b.account_id, &b.asset_id))
        });
        Self { entries }
    }

    /// Balance for a key; absent keys read as zero
    pub fn balance(&self, key: &LedgerKey) -> u64 {
        self.entries
            .iter()
            .find(|e| e.account_id == key.account_id && e.asset_id == key.asset_id)
            .map(|e| e.balance)
            .unwrap_or(0)
    }
}

/// Fee amounts for one mutating action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub protocol_fee_total: u64,
    pub platform_fee_amount: u64,
}

impl FeeBreakdown {
    pub fn total(&self) -> u64 {
        self.protocol_fee_total + self.platform_fee_amount
    }

    /// Zero-fee breakdown used only for waived settlements
    pub fn waived() -> Self {
        Self {
            protocol_fee_total: 0,
            platform_fee_amount: 0,
        }
    }
}

/// Receipt material for one settled fee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLedgerEntry {
    pub module: String,
    pub action: String,
    pub protocol_fee_total: u64,
    pub platform_fee_amount: u64,
    pub total_paid: u64,
    pub fee_asset: String,
    pub treasury_address: String,
    pub run_id: RunId,
}

/// Code-baseline identity recorded into every bundle.
///
/// Contains no build timestamps or host metadata: identical code and
/// handler catalog produce an identical anchor on any machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAnchor {
    pub engine: String,
    pub version: Version,
    pub rules_digest: String,
}

/// The three ordered receipt hashes of a run: fee, effect, anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptHashes {
    pub fee_receipt_hash: String,
    pub tx_hash: String,
    pub block_hash: String,
}

impl ReceiptHashes {
    /// The fixed order: fee settlement, module effect, anchor
    pub fn ordered(&self) -> [&str; 3] {
        [&self.fee_receipt_hash, &self.tx_hash, &self.block_hash]
    }
}

/// Canonical recorded inputs of a run; replay derives everything from these
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInputs {
    pub seed: u64,
    pub run_id: RunId,
    pub account_id: String,
    pub wallet_address: String,
    pub module: String,
    pub action: String,
    pub payload: Value,
    pub pre_state: StateSnapshot,
}

/// Immutable proof record of one deterministic run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub protocol_anchor: ProtocolAnchor,
    pub inputs: RunInputs,
    pub outputs: Value,
    pub receipt_hashes: ReceiptHashes,
    pub state_hash: String,
    pub replay_ok: bool,
    pub stdout: String,
}

/// Hash-only witness of one guarded external fetch attempt.
///
/// Raw request/response bodies and raw secrets are never stored; only
/// digests, sizes, and flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardedFetchRecord {
    pub request_hash: String,
    pub response_hash: String,
    pub status: u16,
    pub response_bytes: u64,
    pub response_truncated: bool,
    pub sealed_secret_present: bool,
    pub upstream_ok: bool,
    pub error_code: Option<String>,
}

/// Mutation request consumed by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    pub seed: u64,
    pub run_id: String,
    pub account_id: String,
    pub wallet_address: String,
    pub module: String,
    pub action: String,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_accepts_bounded_grammar() {
        assert!(RunId::new("demo-1").is_ok());
        assert!(RunId::new("a").is_ok());
        assert!(RunId::new("run_2026_01").is_ok());
        assert!(RunId::new(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_run_id_rejects_bad_input() {
        assert!(RunId::new("").is_err());
        assert!(RunId::new(&"x".repeat(65)).is_err());
        assert!(RunId::new("Demo-1").is_err());
        assert!(RunId::new("-leading").is_err());
        assert!(RunId::new("has space").is_err());
        assert!(RunId::new("sémantic").is_err());
    }

    #[test]
    fn test_snapshot_sorts_entries() {
        let snapshot = StateSnapshot::from_entries(vec![
            BalanceRecord {
                account_id: "b".to_string(),
                asset_id: "NYXT".to_string(),
                balance: 2,
            },
            BalanceRecord {
                account_id: "a".to_string(),
                asset_id: "NYXT".to_string(),
                balance: 1,
            },
        ]);
        assert_eq!(snapshot.entries[0].account_id, "a");
        assert_eq!(snapshot.balance(&LedgerKey::new("b", "NYXT")), 2);
        assert_eq!(snapshot.balance(&LedgerKey::new("missing", "NYXT")), 0);
    }

    #[test]
    fn test_fee_breakdown_total_is_additive() {
        let fee = FeeBreakdown {
            protocol_fee_total: 10,
            platform_fee_amount: 3,
        };
        assert_eq!(fee.total(), 13);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(Version::parse("1.2"), None);
        assert_eq!(Version::parse("1.2.3.4"), None);
    }

    #[test]
    fn test_receipt_order_is_fee_effect_anchor() {
        let receipts = ReceiptHashes {
            fee_receipt_hash: "f".to_string(),
            tx_hash: "t".to_string(),
            block_hash: "b".to_string(),
        };
        assert_eq!(receipts.ordered(), ["f", "t", "b"]);
    }
}
