//! Immutable evidence store keyed by run identifier
//!
//! A run identifier can be finalized exactly once for the lifetime of the
//! store; collision is a hard error, never an overwrite. Bundles are never
//! mutated or deleted after finalize. With a root directory configured,
//! each finalize also writes the bundle's canonical file set to disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{EngineError, RunError};
use crate::export;
use crate::types::{EvidenceBundle, RunId};

#[derive(Default)]
pub struct EvidenceStore {
    bundles: RwLock<BTreeMap<String, EvidenceBundle>>,
    root: Option<PathBuf>,
}

impl EvidenceStore {
    /// In-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that additionally persists each finalized bundle under
    /// `root/<run_id>/` as its canonical file set
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            bundles: RwLock::new(BTreeMap::new()),
            root: Some(root.into()),
        }
    }

    /// Persist a finalized bundle. Global run_id uniqueness is enforced
    /// here regardless of what admission already checked.
    pub fn finalize(&self, bundle: EvidenceBundle) -> Result<(), EngineError> {
        let run_id = bundle.inputs.run_id.as_str().to_string();
        let mut bundles = self.bundles.write();
        if bundles.contains_key(&run_id) {
            return Err(RunError::RunIdConflict { run_id }.into());
        }
        if let Some(root) = &self.root {
            write_bundle_files(root, &bundle)?;
        }
        bundles.insert(run_id, bundle);
        Ok(())
    }

    pub fn contains(&self, run_id: &RunId) -> bool {
        self.bundles.read().contains_key(run_id.as_str())
    }

    pub fn load(&self, run_id: &RunId) -> Option<EvidenceBundle> {
        self.bundles.read().get(run_id.as_str()).cloned()
    }

    /// All finalized run identifiers, sorted
    pub fn run_ids(&self) -> Vec<RunId> {
        self.bundles
            .read()
            .values()
            .map(|b| b.inputs.run_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bundles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.read().is_empty()
    }
}

fn write_bundle_files(root: &Path, bundle: &EvidenceBundle) -> Result<(), EngineError> {
    let files = export::bundle_files(bundle)?;
    let dir = root.join(bundle.inputs.run_id.as_str());
    fs::create_dir_all(&dir).map_err(|e| EngineError::Storage {
        reason: format!("create {}: {}", dir.display(), e),
    })?;
    for file in files {
        let path = dir.join(&file.path);
        fs::write(&path, &file.bytes).map_err(|e| EngineError::Storage {
            reason: format!("write {}: {}", path.display(), e),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ProtocolAnchor, ReceiptHashes, RunInputs, StateSnapshot, Version,
    };
    use serde_json::json;

    fn bundle(run_id: &str) -> EvidenceBundle {
        EvidenceBundle {
            protocol_anchor: ProtocolAnchor {
                engine: "nyx-evidence".to_string(),
                version: Version::new(0, 1, 0),
                rules_digest: crate::canonical::digest(b"catalog"),
            },
            inputs: RunInputs {
                seed: 1,
                run_id: RunId::new(run_id).unwrap(),
                account_id: "acct-1".to_string(),
                wallet_address: "nyx-testnet-abc".to_string(),
                module: "wallet".to_string(),
                action: "faucet".to_string(),
                payload: json!({"amount": 10}),
                pre_state: StateSnapshot::default(),
            },
            outputs: json!({"credited": 10}),
            receipt_hashes: ReceiptHashes {
                fee_receipt_hash: crate::canonical::digest(b"fee"),
                tx_hash: crate::canonical::digest(b"tx"),
                block_hash: crate::canonical::digest(b"block"),
            },
            state_hash: crate::canonical::digest(b"state"),
            replay_ok: true,
            stdout: "credited 10\n".to_string(),
        }
    }

    #[test]
    fn test_finalize_then_load_round_trip() {
        let store = EvidenceStore::new();
        let original = bundle("run-1");
        store.finalize(original.clone()).unwrap();

        let loaded = store.load(&RunId::new("run-1").unwrap()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_duplicate_finalize_is_hard_error_not_overwrite() {
        let store = EvidenceStore::new();
        let first = bundle("run-1");
        store.finalize(first.clone()).unwrap();

        let mut second = bundle("run-1");
        second.outputs = json!({"credited": 999});
        let err = store.finalize(second).unwrap_err();
        assert_eq!(err.code(), "RUN_ID_CONFLICT");

        // Original bundle is untouched.
        let loaded = store.load(&RunId::new("run-1").unwrap()).unwrap();
        assert_eq!(loaded, first);
    }

    #[test]
    fn test_run_ids_are_sorted() {
        let store = EvidenceStore::new();
        store.finalize(bundle("zeta")).unwrap();
        store.finalize(bundle("alpha")).unwrap();
        let ids: Vec<String> = store
            .run_ids()
            .iter()
            .map(|r| r.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_root_persistence_writes_file_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::with_root(dir.path());
        store.finalize(bundle("run-1")).unwrap();

        for name in [
            "anchor.json",
            "inputs.json",
            "outputs.json",
            "receipts.json",
            "state_hash",
            "replay_ok",
            "stdout.log",
        ] {
            assert!(dir.path().join("run-1").join(name).exists(), "{name}");
        }
        let state_hash = fs::read_to_string(dir.path().join("run-1/state_hash")).unwrap();
        assert_eq!(state_hash, state_hash.trim_end());
    }
}
