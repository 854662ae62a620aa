//! Guarded external fetch: SSRF-safe mediation of outbound HTTP calls
//!
//! Outbound calls run through a fixed gauntlet: URL shape checks (secure
//! scheme only, no literal IPs, no embedded credentials, no non-default
//! port), DNS resolution with private/loopback/link-local rejection and
//! address pinning (so a rebinding race cannot swap the target between
//! validation and connect), allowlist matching, a bounded no-redirect
//! request, and a response cap. What survives is reduced to a hash-only
//! witness: digests, status, size, and flags. Raw bodies and raw secrets
//! are never persisted.
//!
//! Failed attempts are recorded, not discarded: the audit trail must show
//! every validated call that was tried, including the ones that never made
//! it past validation.

use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use url::Url;

use crate::canonical;
use crate::config::FetchPolicy;
use crate::error::{ConfigurationError, EngineError, FetchError, ValidationError};
use crate::types::GuardedFetchRecord;

/// Module/action under which fetch witnesses enter the evidence chain
pub const FETCH_MODULE: &str = "net";
pub const FETCH_ACTION: &str = "guarded_fetch";

const HTTPS_DEFAULT_PORT: u16 = 443;

/// A caller-side encrypted secret destined for the upstream service.
///
/// The engine never sees plaintext except transiently during the call;
/// only a presence flag enters the evidence record.
#[derive(Clone)]
pub struct SealedSecret {
    ciphertext: Vec<u8>,
}

impl SealedSecret {
    pub fn new(ciphertext: Vec<u8>) -> Self {
        Self { ciphertext }
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecret")
            .field("len", &self.ciphertext.len())
            .finish()
    }
}

/// Decrypts sealed secrets for transient upstream use. Implementations
/// live with the caller's key infrastructure, not in this engine.
pub trait SecretVault: Send + Sync {
    fn unseal(&self, sealed: &SealedSecret) -> Result<Vec<u8>, FetchError>;
}

/// One guarded fetch request as submitted by a caller
#[derive(Debug, Clone)]
pub struct FetchRequestSpec {
    pub url: String,
    pub method: String,
    pub body: Vec<u8>,
    pub sealed_secret: Option<SealedSecret>,
}

/// A target that passed every pre-network check
#[derive(Debug, Clone)]
pub struct ValidatedTarget {
    pub url: Url,
    pub host: String,
    pub method: String,
    pub pinned: SocketAddr,
}

/// Wire-level request handed to the transport. The pinned address is the
/// one validated at resolution time; the transport must not re-resolve.
pub struct TransportRequest {
    pub url: Url,
    pub host: String,
    pub method: String,
    pub pinned: SocketAddr,
    pub body: Vec<u8>,
    pub bearer: Option<Vec<u8>>,
    pub timeout: Duration,
    /// Read at most this many bytes of response body.
    pub read_limit: usize,
}

pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Seam between validation/witnessing and the actual network I/O
pub trait FetchTransport: Send + Sync {
    fn execute(&self, request: TransportRequest) -> Result<TransportResponse, FetchError>;
}

/// Seam for hostname resolution, so the private-range check and the
/// address pin stay testable without live DNS
pub trait HostResolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, FetchError>;
}

/// Production resolver backed by the system stub resolver
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, FetchError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| FetchError::Upstream {
                code: "DNS".to_string(),
                reason: e.to_string(),
            })?
            .collect();
        Ok(addrs)
    }
}

/// Production transport: reqwest with redirects disabled, an explicit
/// timeout, and the hostname pinned to the validated address.
pub struct ReqwestTransport;

impl FetchTransport for ReqwestTransport {
    fn execute(&self, request: TransportRequest) -> Result<TransportResponse, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(request.timeout)
            .resolve(&request.host, request.pinned)
            .build()
            .map_err(|e| FetchError::Upstream {
                code: "CLIENT".to_string(),
                reason: e.to_string(),
            })?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            FetchError::Upstream {
                code: "CLIENT".to_string(),
                reason: format!("invalid method {:?}", request.method),
            }
        })?;
        let mut builder = client
            .request(method, request.url.as_str())
            .body(request.body);
        if let Some(secret) = request.bearer {
            let value = reqwest::header::HeaderValue::from_bytes(&secret).map_err(|_| {
                FetchError::SealedSecret {
                    reason: "unsealed secret is not a valid header value".to_string(),
                }
            })?;
            builder = builder.header(reqwest::header::AUTHORIZATION, value);
        }
        let response = builder.send().map_err(|e| FetchError::Upstream {
            code: if e.is_timeout() { "TIMEOUT" } else { "NETWORK" }.to_string(),
            reason: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        response
            .take(request.read_limit as u64)
            .read_to_end(&mut body)
            .map_err(|e| FetchError::Upstream {
                code: "NETWORK".to_string(),
                reason: e.to_string(),
            })?;
        Ok(TransportResponse { status, body })
    }
}

/// Audit entry for one attempted fetch. Wall-clock attempt times live here
/// and only here; the history is outside the evidence chain.
#[derive(Debug, Clone)]
pub struct FetchHistoryEntry {
    pub attempted_at: DateTime<Utc>,
    pub host: String,
    pub method: String,
    pub record: GuardedFetchRecord,
}

/// The guarded fetch subsystem: validation, execution, witnessing, history
pub struct GuardedFetch {
    policy: FetchPolicy,
    transport: Box<dyn FetchTransport>,
    resolver: Box<dyn HostResolver>,
    vault: Option<Arc<dyn SecretVault>>,
    history: Mutex<Vec<FetchHistoryEntry>>,
}

impl GuardedFetch {
    pub fn new(
        policy: FetchPolicy,
        transport: Box<dyn FetchTransport>,
        vault: Option<Arc<dyn SecretVault>>,
    ) -> Self {
        Self {
            policy,
            transport,
            resolver: Box::new(SystemResolver),
            vault,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Replace the resolver; tests pin hostnames to fixed addresses
    pub fn with_resolver(mut self, resolver: Box<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Read surface: every attempted fetch, oldest first
    pub fn history(&self) -> Vec<FetchHistoryEntry> {
        self.history.lock().clone()
    }

    /// Validate and execute one fetch attempt, reducing the result to a
    /// hash-only witness record.
    ///
    /// Validation and upstream failures come back as `Ok` records with
    /// `upstream_ok=false` and an error code; only operator faults
    /// (a sealed secret with no vault configured) are hard errors.
    pub fn attempt(&self, spec: &FetchRequestSpec) -> Result<GuardedFetchRecord, EngineError> {
        let request_hash = request_hash(&spec.method, &spec.url, &spec.body);
        let sealed_secret_present = spec.sealed_secret.is_some();
        if sealed_secret_present && self.vault.is_none() {
            return Err(ConfigurationError::MissingSecretVault.into());
        }

        if spec.body.len() > self.policy.max_request_bytes {
            return Ok(self.finish(
                spec,
                failed_record(request_hash, sealed_secret_present, "REQUEST_TOO_LARGE"),
            ));
        }

        let target = match self.validate_target(&spec.url, &spec.method) {
            Ok(target) => target,
            Err(code) => {
                tracing::warn!(url = %spec.url, code, "guarded fetch rejected");
                return Ok(self.finish(
                    spec,
                    failed_record(request_hash, sealed_secret_present, code),
                ));
            }
        };

        let bearer = match (&spec.sealed_secret, &self.vault) {
            (Some(sealed), Some(vault)) => Some(vault.unseal(sealed)?),
            (Some(_), None) => return Err(ConfigurationError::MissingSecretVault.into()),
            (None, _) => None,
        };

        let response = self.transport.execute(TransportRequest {
            url: target.url.clone(),
            host: target.host.clone(),
            method: target.method.clone(),
            pinned: target.pinned,
            body: spec.body.clone(),
            bearer,
            timeout: Duration::from_millis(self.policy.timeout_ms),
            read_limit: self.policy.max_response_bytes + 1,
        });

        let record = match response {
            Err(FetchError::Upstream { code, reason }) => {
                tracing::warn!(host = %target.host, code = %code, %reason, "guarded fetch upstream failure");
                failed_record(request_hash, sealed_secret_present, &code)
            }
            Err(other) => return Err(other.into()),
            Ok(response) if (300..400).contains(&response.status) => {
                // Following a redirect could bypass the allowlist; any 3xx
                // is terminal and its body is not retained.
                GuardedFetchRecord {
                    request_hash,
                    response_hash: canonical::digest(b""),
                    status: response.status,
                    response_bytes: 0,
                    response_truncated: false,
                    sealed_secret_present,
                    upstream_ok: false,
                    error_code: Some("REDIRECT_BLOCKED".to_string()),
                }
            }
            Ok(mut response) => {
                let response_truncated = response.body.len() > self.policy.max_response_bytes;
                response.body.truncate(self.policy.max_response_bytes);
                let upstream_ok = (200..300).contains(&response.status);
                GuardedFetchRecord {
                    request_hash,
                    // Hash over exactly the retained bytes.
                    response_hash: canonical::digest(&response.body),
                    status: response.status,
                    response_bytes: response.body.len() as u64,
                    response_truncated,
                    sealed_secret_present,
                    upstream_ok,
                    error_code: if upstream_ok {
                        None
                    } else {
                        Some("UPSTREAM_STATUS".to_string())
                    },
                }
            }
        };
        Ok(self.finish(spec, record))
    }

    fn finish(&self, spec: &FetchRequestSpec, record: GuardedFetchRecord) -> GuardedFetchRecord {
        let host = Url::parse(&spec.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        self.history.lock().push(FetchHistoryEntry {
            attempted_at: Utc::now(),
            host,
            method: spec.method.clone(),
            record: record.clone(),
        });
        record
    }

    /// Steps 1-3 of the guard: URL shape, resolution, allowlist.
    /// Returns the stable error code on rejection.
    fn validate_target(&self, raw_url: &str, method: &str) -> Result<ValidatedTarget, &'static str> {
        let url = Url::parse(raw_url).map_err(|_| "INVALID_TARGET")?;
        if url.scheme() != "https" {
            return Err("SSRF_BLOCKED");
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err("SSRF_BLOCKED");
        }
        if url.port().is_some() {
            return Err("SSRF_BLOCKED");
        }
        let host = match url.host() {
            Some(url::Host::Domain(domain)) => domain.to_string(),
            // Literal addresses sidestep allowlist hygiene entirely.
            Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_)) => return Err("SSRF_BLOCKED"),
            None => return Err("INVALID_TARGET"),
        };

        if self
            .policy
            .matching_entry(&host, url.path(), method)
            .is_none()
        {
            return Err("NOT_ALLOWLISTED");
        }

        let addrs = self
            .resolver
            .resolve(&host, HTTPS_DEFAULT_PORT)
            .map_err(|_| "DNS")?;
        if addrs.is_empty() {
            return Err("DNS");
        }
        // Every resolved address must be publicly routable; a single
        // private A record poisons the whole answer.
        if addrs.iter().any(|addr| is_forbidden_ip(&addr.ip())) {
            return Err("SSRF_BLOCKED");
        }

        Ok(ValidatedTarget {
            url,
            host,
            method: method.to_string(),
            pinned: addrs[0],
        })
    }
}

fn failed_record(
    request_hash: String,
    sealed_secret_present: bool,
    error_code: &str,
) -> GuardedFetchRecord {
    GuardedFetchRecord {
        request_hash,
        response_hash: canonical::digest(b""),
        status: 0,
        response_bytes: 0,
        response_truncated: false,
        sealed_secret_present,
        upstream_ok: false,
        error_code: Some(error_code.to_string()),
    }
}

/// Digest over the canonical byte content of exactly what is sent
pub fn request_hash(method: &str, url: &str, body: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(method.len() + url.len() + body.len() + 2);
    bytes.extend_from_slice(method.as_bytes());
    bytes.push(b'\n');
    bytes.extend_from_slice(url.as_bytes());
    bytes.push(b'\n');
    bytes.extend_from_slice(body);
    canonical::digest(&bytes)
}

/// Addresses that must never be fetched, regardless of allowlist
pub fn is_forbidden_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_ipv4(v4),
        IpAddr::V6(v6) => is_forbidden_ipv6(v6),
    }
}

fn is_forbidden_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        // Carrier-grade NAT, 100.64.0.0/10.
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // IETF protocol assignments, 192.0.0.0/24.
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
}

fn is_forbidden_ipv6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_forbidden_ipv4(&mapped);
    }
    let segments = ip.segments();
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // Unique-local, fc00::/7.
        || (segments[0] & 0xfe00) == 0xfc00
        // Link-local, fe80::/10.
        || (segments[0] & 0xffc0) == 0xfe80
}
