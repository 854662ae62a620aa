//! Engine facade wiring every component behind one handle

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::canonical;
use crate::config::{AllowlistEntry, EngineConfig};
use crate::error::{EngineError, RunError};
use crate::executor::ModuleExecutor;
use crate::export::{self, ExportFile};
use crate::fees::FeeGate;
use crate::fetch::{
    FetchHistoryEntry, FetchRequestSpec, FetchTransport, GuardedFetch, HostResolver,
    ReqwestTransport, SealedSecret, SecretVault, FETCH_ACTION, FETCH_MODULE,
};
use crate::handlers::FetchWitnessHandler;
use crate::ledger::Ledger;
use crate::registry::{HandlerRegistry, ModuleHandler};
use crate::replay::{ReplayReport, ReplayVerifier};
use crate::store::EvidenceStore;
use crate::types::{
    EvidenceBundle, MutationRequest, ProtocolAnchor, RunId, Version,
};

/// One guarded fetch request, addressed to the evidence chain
#[derive(Debug, Clone)]
pub struct GuardedFetchRequest {
    pub seed: u64,
    pub run_id: String,
    pub account_id: String,
    pub wallet_address: String,
    pub url: String,
    pub method: String,
    pub body: Vec<u8>,
    pub sealed_secret: Option<SealedSecret>,
}

/// The deterministic evidence and replay verification engine.
///
/// Construction goes through [`EvidenceEngineBuilder`]; a configuration
/// that could ever produce a free mutation or an unroutable fee fails at
/// build time, not at first request.
pub struct EvidenceEngine {
    ledger: Arc<Ledger>,
    store: Arc<EvidenceStore>,
    executor: Arc<ModuleExecutor>,
    verifier: ReplayVerifier,
    fetch: GuardedFetch,
}

impl EvidenceEngine {
    pub fn builder() -> EvidenceEngineBuilder {
        EvidenceEngineBuilder::new()
    }

    /// Execute one mutation and return its finalized evidence bundle
    pub fn execute(&self, request: MutationRequest) -> Result<EvidenceBundle, EngineError> {
        self.executor.execute(request)
    }

    /// Replay a finalized run and diff it against the record
    pub fn replay(&self, run_id: &str) -> Result<ReplayReport, EngineError> {
        let run_id = RunId::new(run_id)?;
        self.verifier.verify(&run_id)
    }

    /// Replay every finalized run in parallel
    pub fn verify_all(&self) -> Result<Vec<ReplayReport>, EngineError> {
        self.verifier.verify_all()
    }

    /// Perform one guarded external fetch and wrap its hash-only witness
    /// into an evidence bundle via the executor and fee gate.
    pub fn guarded_fetch(
        &self,
        request: GuardedFetchRequest,
    ) -> Result<EvidenceBundle, EngineError> {
        // Reject a spent run identifier before spending network effort;
        // the executor still enforces this authoritatively.
        let run_id = RunId::new(&request.run_id)?;
        if self.store.contains(&run_id) {
            return Err(RunError::RunIdConflict {
                run_id: run_id.as_str().to_string(),
            }
            .into());
        }

        let record = self.fetch.attempt(&FetchRequestSpec {
            url: request.url,
            method: request.method,
            body: request.body,
            sealed_secret: request.sealed_secret,
        })?;

        let payload = serde_json::json!({
            "witness": canonical::to_canonical_value(&record)?,
        });
        self.executor.execute(MutationRequest {
            seed: request.seed,
            run_id: request.run_id,
            account_id: request.account_id,
            wallet_address: request.wallet_address,
            module: FETCH_MODULE.to_string(),
            action: FETCH_ACTION.to_string(),
            payload,
        })
    }

    /// Read surface: the configured fetch allowlist
    pub fn allowlist(&self) -> &[AllowlistEntry] {
        &self.fetch.policy().allowlist
    }

    /// Read surface: every attempted guarded fetch
    pub fn fetch_history(&self) -> Vec<FetchHistoryEntry> {
        self.fetch.history()
    }

    /// Load one finalized bundle
    pub fn load(&self, run_id: &str) -> Result<Option<EvidenceBundle>, EngineError> {
        Ok(self.store.load(&RunId::new(run_id)?))
    }

    /// Export one run as its fixed deterministic file set
    pub fn export_run(&self, run_id: &str) -> Result<Vec<ExportFile>, EngineError> {
        let run_id = RunId::new(run_id)?;
        let bundle = self
            .store
            .load(&run_id)
            .ok_or_else(|| crate::error::ValidationError::UnknownRun {
                run_id: run_id.as_str().to_string(),
            })?;
        export::bundle_files(&bundle)
    }

    /// Export every finalized run plus a manifest
    pub fn export_all(&self) -> Result<Vec<ExportFile>, EngineError> {
        let bundles: Vec<EvidenceBundle> = self
            .store
            .run_ids()
            .iter()
            .filter_map(|id| self.store.load(id))
            .collect();
        export::export_bundles(&bundles)
    }

    /// Export every finalized run into a directory tree
    pub fn export_all_to_dir(&self, root: &Path) -> Result<(), EngineError> {
        let files = self.export_all()?;
        export::write_to_dir(&files, root)
    }

    /// The ledger arena, for genesis funding and balance reads
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &EvidenceStore {
        &self.store
    }

    pub fn anchor(&self) -> &ProtocolAnchor {
        self.executor.anchor()
    }
}

/// Builder for [`EvidenceEngine`] with a fluent API
pub struct EvidenceEngineBuilder {
    config: EngineConfig,
    handlers: Vec<(String, String, Box<dyn ModuleHandler>)>,
    transport: Option<Box<dyn FetchTransport>>,
    resolver: Option<Box<dyn HostResolver>>,
    vault: Option<Arc<dyn SecretVault>>,
    store_root: Option<PathBuf>,
}

impl EvidenceEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            handlers: Vec::new(),
            transport: None,
            resolver: None,
            vault: None,
            store_root: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a business handler for one (module, action) pair
    pub fn with_handler(
        mut self,
        module: &str,
        action: &str,
        handler: Box<dyn ModuleHandler>,
    ) -> Self {
        self.handlers
            .push((module.to_string(), action.to_string(), handler));
        self
    }

    /// Override the fetch transport; defaults to reqwest
    pub fn with_transport(mut self, transport: Box<dyn FetchTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override hostname resolution; defaults to the system resolver
    pub fn with_resolver(mut self, resolver: Box<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Supply the vault that unseals caller-sealed secrets
    pub fn with_vault(mut self, vault: Arc<dyn SecretVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Persist finalized bundles under this directory
    pub fn with_store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store_root = Some(root.into());
        self
    }

    pub fn build(self) -> Result<EvidenceEngine, EngineError> {
        self.config.validate()?;
        let treasury = self.config.treasury()?.to_string();

        let mut registry = HandlerRegistry::new();
        registry.register(FETCH_MODULE, FETCH_ACTION, Box::new(FetchWitnessHandler))?;
        for (module, action, handler) in self.handlers {
            registry.register(&module, &action, handler)?;
        }
        let registry = Arc::new(registry);

        let anchor = ProtocolAnchor {
            engine: env!("CARGO_PKG_NAME").to_string(),
            version: Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(Version::new(0, 0, 0)),
            rules_digest: registry.catalog_digest(),
        };

        let fee_gate = Arc::new(FeeGate::new(
            self.config.fee_schedule.clone(),
            self.config.fee_asset.clone(),
            treasury,
        )?);
        let ledger = Arc::new(Ledger::new());
        let store = Arc::new(match self.store_root {
            Some(root) => EvidenceStore::with_root(root),
            None => EvidenceStore::new(),
        });

        let executor = Arc::new(ModuleExecutor::new(
            Arc::clone(&ledger),
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&fee_gate),
            anchor,
            self.config.rate_limit,
            self.config.fetch.charge_fee_on_failure,
        ));
        let verifier = ReplayVerifier::new(Arc::clone(&store), Arc::clone(&executor));
        let mut fetch = GuardedFetch::new(
            self.config.fetch.clone(),
            self.transport.unwrap_or_else(|| Box::new(ReqwestTransport)),
            self.vault,
        );
        if let Some(resolver) = self.resolver {
            fetch = fetch.with_resolver(resolver);
        }

        Ok(EvidenceEngine {
            ledger,
            store,
            executor,
            verifier,
            fetch,
        })
    }
}

impl Default for EvidenceEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;

    #[test]
    fn test_build_without_treasury_fails() {
        let result = EvidenceEngine::builder().build();
        assert!(matches!(
            result,
            Err(EngineError::Configuration(
                ConfigurationError::MissingTreasury
            ))
        ));
    }

    #[test]
    fn test_build_with_treasury_succeeds() {
        let config = EngineConfig {
            treasury_address: Some("nyx-treasury-000".to_string()),
            ..EngineConfig::default()
        };
        let engine = EvidenceEngine::builder().with_config(config).build().unwrap();
        assert_eq!(engine.anchor().engine, "nyx-evidence");
        // The fetch witness handler is always part of the catalog.
        assert!(engine.store().is_empty());
    }
}
