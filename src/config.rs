//! Engine configuration: treasury, fee schedule, rate limits, fetch policy

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::types::FeeBreakdown;

/// Full engine configuration.
///
/// `validate` runs at engine construction; a missing treasury address or a
/// zero protocol fee anywhere in the schedule is fatal for mutating paths,
/// never a silent no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub treasury_address: Option<String>,
    pub fee_asset: String,
    pub fee_schedule: FeeSchedule,
    pub rate_limit: RateLimitConfig,
    pub fetch: FetchPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            treasury_address: None,
            fee_asset: "NYXT".to_string(),
            fee_schedule: FeeSchedule::default(),
            rate_limit: RateLimitConfig::default(),
            fetch: FetchPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self.treasury_address.as_deref() {
            None => return Err(ConfigurationError::MissingTreasury),
            Some("") => return Err(ConfigurationError::MissingTreasury),
            Some(_) => {}
        }
        if self.fee_asset.is_empty() {
            return Err(ConfigurationError::Invalid {
                reason: "fee asset must not be empty".to_string(),
            });
        }
        self.fee_schedule.validate()?;
        self.fetch.validate()?;
        Ok(())
    }

    /// The validated treasury address; callers run `validate` first.
    pub fn treasury(&self) -> Result<&str, ConfigurationError> {
        self.treasury_address
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigurationError::MissingTreasury)
    }
}

/// Protocol/platform fee amounts per (module, action), with defaults.
///
/// Overrides are keyed `module/action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub default_protocol_fee: u64,
    pub default_platform_fee: u64,
    pub overrides: BTreeMap<String, FeeBreakdown>,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            default_protocol_fee: 10,
            default_platform_fee: 2,
            overrides: BTreeMap::new(),
        }
    }
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.default_protocol_fee == 0 {
            return Err(ConfigurationError::ZeroProtocolFee {
                module: "*".to_string(),
                action: "*".to_string(),
            });
        }
        for (key, fee) in &self.overrides {
            if fee.protocol_fee_total == 0 {
                let (module, action) = key.split_once('/').unwrap_or((key.as_str(), "*"));
                return Err(ConfigurationError::ZeroProtocolFee {
                    module: module.to_string(),
                    action: action.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fee breakdown for one action
    pub fn lookup(&self, module: &str, action: &str) -> FeeBreakdown {
        let key = format!("{}/{}", module, action);
        self.overrides.get(&key).copied().unwrap_or(FeeBreakdown {
            protocol_fee_total: self.default_protocol_fee,
            platform_fee_amount: self.default_platform_fee,
        })
    }
}

/// Per-account admission rate limit
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_runs: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_runs: 32,
            window_ms: 1_000,
        }
    }
}

/// One allowlisted destination for guarded fetches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub host: String,
    pub path_prefix: String,
    pub method: String,
}

/// Policy for the guarded external fetch subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPolicy {
    pub timeout_ms: u64,
    pub max_request_bytes: usize,
    pub max_response_bytes: usize,
    /// Whether a failed upstream attempt still settles the fetch fee.
    pub charge_fee_on_failure: bool,
    pub allowlist: Vec<AllowlistEntry>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_request_bytes: 64 * 1024,
            max_response_bytes: 256 * 1024,
            charge_fee_on_failure: true,
            allowlist: Vec::new(),
        }
    }
}

impl FetchPolicy {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for entry in &self.allowlist {
            if entry.host.is_empty() || entry.host.contains('/') {
                return Err(ConfigurationError::InvalidAllowlist {
                    reason: format!("bad host {:?}", entry.host),
                });
            }
            if !entry.path_prefix.starts_with('/') {
                return Err(ConfigurationError::InvalidAllowlist {
                    reason: format!("path prefix {:?} must start with '/'", entry.path_prefix),
                });
            }
            if entry.method != entry.method.to_ascii_uppercase() || entry.method.is_empty() {
                return Err(ConfigurationError::InvalidAllowlist {
                    reason: format!("method {:?} must be uppercase", entry.method),
                });
            }
        }
        if self.timeout_ms == 0 {
            return Err(ConfigurationError::Invalid {
                reason: "fetch timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Find the allowlist entry matching host, path, and method
    pub fn matching_entry(&self, host: &str, path: &str, method: &str) -> Option<&AllowlistEntry> {
        self.allowlist.iter().find(|e| {
            e.host.eq_ignore_ascii_case(host)
                && path.starts_with(&e.path_prefix)
                && e.method == method
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EngineConfig {
        EngineConfig {
            treasury_address: Some("nyx-treasury-000".to_string()),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_missing_treasury_is_fatal() {
        let config = EngineConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingTreasury)
        ));

        let config = EngineConfig {
            treasury_address: Some(String::new()),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingTreasury)
        ));
    }

    #[test]
    fn test_zero_protocol_fee_is_fatal() {
        let mut config = valid_config();
        config.fee_schedule.overrides.insert(
            "wallet/faucet".to_string(),
            FeeBreakdown {
                protocol_fee_total: 0,
                platform_fee_amount: 5,
            },
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::ZeroProtocolFee { .. })
        ));
    }

    #[test]
    fn test_schedule_lookup_prefers_override() {
        let mut schedule = FeeSchedule::default();
        schedule.overrides.insert(
            "net/guarded_fetch".to_string(),
            FeeBreakdown {
                protocol_fee_total: 25,
                platform_fee_amount: 0,
            },
        );
        assert_eq!(schedule.lookup("net", "guarded_fetch").protocol_fee_total, 25);
        assert_eq!(
            schedule.lookup("wallet", "faucet").protocol_fee_total,
            schedule.default_protocol_fee
        );
    }

    #[test]
    fn test_allowlist_matching() {
        let policy = FetchPolicy {
            allowlist: vec![AllowlistEntry {
                host: "api.example.org".to_string(),
                path_prefix: "/v1/rates".to_string(),
                method: "GET".to_string(),
            }],
            ..FetchPolicy::default()
        };
        assert!(policy
            .matching_entry("api.example.org", "/v1/rates/nyxt", "GET")
            .is_some());
        assert!(policy
            .matching_entry("API.EXAMPLE.ORG", "/v1/rates", "GET")
            .is_some());
        assert!(policy
            .matching_entry("api.example.org", "/v2/rates", "GET")
            .is_none());
        assert!(policy
            .matching_entry("api.example.org", "/v1/rates", "POST")
            .is_none());
        assert!(policy
            .matching_entry("other.example.org", "/v1/rates", "GET")
            .is_none());
    }

    #[test]
    fn test_allowlist_validation() {
        let policy = FetchPolicy {
            allowlist: vec![AllowlistEntry {
                host: "api.example.org".to_string(),
                path_prefix: "no-slash".to_string(),
                method: "GET".to_string(),
            }],
            ..FetchPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
