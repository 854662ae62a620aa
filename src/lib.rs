//! Deterministic Evidence & Replay Verification Engine
//!
//! Every state-mutating action processed through this engine produces a
//! byte-reproducible proof object: an [`EvidenceBundle`] that any third
//! party can replay from its recorded inputs alone and obtain an identical
//! result. The engine combines canonical hashing, transactional fee and
//! ledger enforcement, at-most-once execution per run identifier, and
//! SSRF-safe mediation of outbound fetches with hash-only witnessing.

pub mod canonical;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod export;
pub mod fees;
pub mod fetch;
pub mod handlers;
pub mod ledger;
pub mod registry;
pub mod replay;
pub mod store;
pub mod types;

// Re-export the embedding surface
pub use config::{AllowlistEntry, EngineConfig, FeeSchedule, FetchPolicy, RateLimitConfig};
pub use engine::{EvidenceEngine, EvidenceEngineBuilder, GuardedFetchRequest};
pub use error::{
    ConfigurationError, EngineError, ErrorReport, FetchError, LedgerError, RunError,
    SerializationError, ValidationError,
};
pub use executor::{DerivedRun, ModuleExecutor};
pub use export::ExportFile;
pub use fetch::{
    FetchHistoryEntry, FetchRequestSpec, FetchTransport, GuardedFetch, HostResolver,
    ReqwestTransport, SealedSecret, SecretVault, SystemResolver, TransportRequest,
    TransportResponse,
};
pub use ledger::{Ledger, LedgerTxn};
pub use registry::{ExecutionContext, HandlerOutcome, HandlerRegistry, ModuleHandler};
pub use replay::{FieldDiff, ReplayReport, ReplayVerifier, ReplayedRun};
pub use store::EvidenceStore;
pub use types::{
    BalanceRecord, EvidenceBundle, FeeBreakdown, FeeLedgerEntry, GuardedFetchRecord, LedgerDelta,
    LedgerKey, MutationRequest, ProtocolAnchor, ReceiptHashes, RunId, RunInputs, StateSnapshot,
    Version,
};
