//! Replay verification: re-derive a run from its recorded inputs and diff
//! against the stored bundle
//!
//! Replay is read-only. Handlers see only the pre-state snapshot recorded
//! into the bundle's inputs at execution time, so verification never reads
//! or writes live ledger state and can be invoked any number of times.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, ValidationError};
use crate::executor::ModuleExecutor;
use crate::store::EvidenceStore;
use crate::types::{EvidenceBundle, ReceiptHashes, RunId};

/// One mismatched field between the recorded and replayed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub recorded: String,
    pub replayed: String,
}

/// Proof material recomputed during replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayedRun {
    pub outputs: Value,
    pub receipt_hashes: ReceiptHashes,
    pub state_hash: String,
    pub stdout: String,
}

/// Result of verifying one run.
///
/// A mismatch is data, not an exception: `ok=false` comes with a diff
/// enumerating every divergent field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub run_id: RunId,
    pub ok: bool,
    pub recorded: EvidenceBundle,
    pub replayed: ReplayedRun,
    pub diff: Vec<FieldDiff>,
}

/// Verifies finalized bundles by re-execution
pub struct ReplayVerifier {
    store: Arc<EvidenceStore>,
    executor: Arc<ModuleExecutor>,
}

impl ReplayVerifier {
    pub fn new(store: Arc<EvidenceStore>, executor: Arc<ModuleExecutor>) -> Self {
        Self { store, executor }
    }

    /// Verify a single run
    pub fn verify(&self, run_id: &RunId) -> Result<ReplayReport, EngineError> {
        let recorded = self
            .store
            .load(run_id)
            .ok_or_else(|| ValidationError::UnknownRun {
                run_id: run_id.as_str().to_string(),
            })?;

        let derived = self.executor.derive(&recorded.inputs)?;
        let replayed = ReplayedRun {
            outputs: derived.outputs,
            receipt_hashes: derived.receipt_hashes,
            state_hash: derived.state_hash,
            stdout: derived.stdout,
        };

        let diff = diff_fields(&recorded, &replayed);
        let ok = diff.is_empty();
        if !ok {
            tracing::warn!(
                run_id = %run_id,
                mismatches = diff.len(),
                "replay mismatch"
            );
        }
        Ok(ReplayReport {
            run_id: run_id.clone(),
            ok,
            recorded,
            replayed,
            diff,
        })
    }

    /// Verify every finalized run in the store, in parallel
    pub fn verify_all(&self) -> Result<Vec<ReplayReport>, EngineError> {
        self.store
            .run_ids()
            .par_iter()
            .map(|run_id| self.verify(run_id))
            .collect()
    }
}

/// Enumerate every field where the replayed run diverges from the record
fn diff_fields(recorded: &EvidenceBundle, replayed: &ReplayedRun) -> Vec<FieldDiff> {
    let mut diff = Vec::new();
    let mut push = |field: &str, recorded: String, replayed: String| {
        if recorded != replayed {
            diff.push(FieldDiff {
                field: field.to_string(),
                recorded,
                replayed,
            });
        }
    };

    push(
        "outputs",
        recorded.outputs.to_string(),
        replayed.outputs.to_string(),
    );
    push(
        "receipt_hashes.fee_receipt_hash",
        recorded.receipt_hashes.fee_receipt_hash.clone(),
        replayed.receipt_hashes.fee_receipt_hash.clone(),
    );
    push(
        "receipt_hashes.tx_hash",
        recorded.receipt_hashes.tx_hash.clone(),
        replayed.receipt_hashes.tx_hash.clone(),
    );
    push(
        "receipt_hashes.block_hash",
        recorded.receipt_hashes.block_hash.clone(),
        replayed.receipt_hashes.block_hash.clone(),
    );
    push(
        "state_hash",
        recorded.state_hash.clone(),
        replayed.state_hash.clone(),
    );
    push(
        "stdout",
        recorded.stdout.clone(),
        replayed.stdout.clone(),
    );
    diff
}
