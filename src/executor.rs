//! Module executor: admission, transactional execution, receipt chain,
//! and finalize-time self-verification
//!
//! A run moves through a fixed pipeline: admission (identifier grammar,
//! rate limit, duplicate/in-flight checks), pre-state snapshot over the
//! handler's declared footprint, pure handler application, fee settlement
//! staged with the handler's deltas into one ledger transaction, receipt
//! hashing, a read-only self-replay, and only then persistence plus commit.
//! Any failure before commit leaves ledger and store untouched.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::canonical;
use crate::config::RateLimitConfig;
use crate::error::{EngineError, RunError, ValidationError};
use crate::fees::FeeGate;
use crate::fetch::{FETCH_ACTION, FETCH_MODULE};
use crate::ledger::Ledger;
use crate::registry::{ExecutionContext, HandlerRegistry};
use crate::store::EvidenceStore;
use crate::types::{
    EvidenceBundle, FeeBreakdown, FeeLedgerEntry, LedgerDelta, MutationRequest, ProtocolAnchor,
    ReceiptHashes, RunId, RunInputs,
};

/// Everything derivable from a run's recorded inputs alone.
///
/// Execution and replay both go through this derivation, which is what
/// makes a bundle a pure function of its inputs.
#[derive(Debug, Clone)]
pub struct DerivedRun {
    pub outputs: Value,
    pub deltas: Vec<LedgerDelta>,
    pub stdout: String,
    pub fee_entry: FeeLedgerEntry,
    pub receipt_hashes: ReceiptHashes,
    pub state_hash: String,
}

/// Windowed per-account admission limiter
struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<std::collections::BTreeMap<String, RateWindow>>,
}

struct RateWindow {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Default::default()),
        }
    }

    fn admit(&self, account: &str) -> Result<(), RunError> {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        let window = windows.entry(account.to_string()).or_insert(RateWindow {
            started: now,
            count: 0,
        });
        let elapsed_ms = now.duration_since(window.started).as_millis() as u64;
        if elapsed_ms >= self.config.window_ms {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.config.max_runs {
            let retry_after_ms = self.config.window_ms.saturating_sub(elapsed_ms).max(1);
            return Err(RunError::RateLimited {
                account: account.to_string(),
                retry_after_ms,
            });
        }
        window.count += 1;
        Ok(())
    }
}

/// Removes the run from the in-flight table on every exit path
struct InFlightGuard {
    table: Arc<Mutex<BTreeSet<String>>>,
    run_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.table.lock().remove(&self.run_id);
    }
}

/// Executes registered module actions with at-most-once semantics per run
pub struct ModuleExecutor {
    ledger: Arc<Ledger>,
    store: Arc<EvidenceStore>,
    registry: Arc<HandlerRegistry>,
    fee_gate: Arc<FeeGate>,
    anchor: ProtocolAnchor,
    charge_fetch_fee_on_failure: bool,
    rate_limiter: RateLimiter,
    in_flight: Arc<Mutex<BTreeSet<String>>>,
}

impl ModuleExecutor {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<EvidenceStore>,
        registry: Arc<HandlerRegistry>,
        fee_gate: Arc<FeeGate>,
        anchor: ProtocolAnchor,
        rate_limit: RateLimitConfig,
        charge_fetch_fee_on_failure: bool,
    ) -> Self {
        Self {
            ledger,
            store,
            registry,
            fee_gate,
            anchor,
            charge_fetch_fee_on_failure,
            rate_limiter: RateLimiter::new(rate_limit),
            in_flight: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn anchor(&self) -> &ProtocolAnchor {
        &self.anchor
    }

    /// Execute one mutation request end to end and persist its evidence
    pub fn execute(&self, request: MutationRequest) -> Result<EvidenceBundle, EngineError> {
        let run_id = RunId::new(&request.run_id)?;
        self.rate_limiter.admit(&request.account_id)?;

        // Admission: a finalized or in-flight run identifier is a conflict,
        // never an interleaved or double-applied execution.
        let _guard = {
            let mut table = self.in_flight.lock();
            if self.store.contains(&run_id) || !table.insert(run_id.as_str().to_string()) {
                return Err(RunError::RunIdConflict {
                    run_id: run_id.as_str().to_string(),
                }
                .into());
            }
            InFlightGuard {
                table: Arc::clone(&self.in_flight),
                run_id: run_id.as_str().to_string(),
            }
        };

        if !request.payload.is_object() {
            return Err(ValidationError::MalformedPayload {
                reason: "payload must be a structured map".to_string(),
            }
            .into());
        }
        let handler = self
            .registry
            .get(&request.module, &request.action)
            .ok_or_else(|| ValidationError::UnknownHandler {
                module: request.module.clone(),
                action: request.action.clone(),
            })?;
        let footprint = handler.footprint(&request.payload)?;

        // Single-writer boundary: the arena lock is held from snapshot
        // through commit, so the snapshot can never go stale mid-run.
        let mut txn = self.ledger.transaction();
        let pre_state = txn.snapshot(&footprint);

        let inputs = RunInputs {
            seed: request.seed,
            run_id: run_id.clone(),
            account_id: request.account_id.clone(),
            wallet_address: request.wallet_address.clone(),
            module: request.module.clone(),
            action: request.action.clone(),
            payload: request.payload.clone(),
            pre_state,
        };

        let derived = self.derive(&inputs)?;

        // Fee settlement precedes the module effect in both receipt order
        // and staging order.
        let breakdown = self.effective_fee(&inputs);
        self.fee_gate.settle(
            &mut txn,
            &inputs.wallet_address,
            &run_id,
            &inputs.module,
            &inputs.action,
            breakdown,
        )?;
        for delta in &derived.deltas {
            txn.stage_delta(delta)?;
        }

        // Finalize-time self-replay: re-derive everything from the
        // recorded inputs and require byte-identical proof material before
        // anything is persisted.
        let replayed = self.derive(&inputs)?;
        if replayed.receipt_hashes != derived.receipt_hashes
            || replayed.state_hash != derived.state_hash
            || replayed.outputs != derived.outputs
            || replayed.stdout != derived.stdout
        {
            return Err(EngineError::Internal {
                reason: format!("nondeterministic handler for run {}", run_id),
            });
        }

        let bundle = EvidenceBundle {
            protocol_anchor: self.anchor.clone(),
            inputs,
            outputs: derived.outputs,
            receipt_hashes: derived.receipt_hashes,
            state_hash: derived.state_hash,
            replay_ok: true,
            stdout: derived.stdout,
        };

        self.store.finalize(bundle.clone())?;
        txn.commit();

        tracing::info!(
            run_id = %run_id,
            module = %bundle.inputs.module,
            action = %bundle.inputs.action,
            state_hash = %bundle.state_hash,
            "run finalized"
        );
        Ok(bundle)
    }

    /// Derive outputs, deltas, and the full receipt chain from recorded
    /// inputs. Read-only: no ledger state is touched, which is what makes
    /// replay safe to invoke repeatedly.
    pub fn derive(&self, inputs: &RunInputs) -> Result<DerivedRun, EngineError> {
        let handler = self
            .registry
            .get(&inputs.module, &inputs.action)
            .ok_or_else(|| ValidationError::UnknownHandler {
                module: inputs.module.clone(),
                action: inputs.action.clone(),
            })?;

        let mut ctx = ExecutionContext::new(inputs.seed);
        let outcome = handler.apply(&mut ctx, &inputs.payload, &inputs.pre_state)?;
        let stdout = ctx.into_stdout();

        let breakdown = self.effective_fee(inputs);
        let fee_entry =
            self.fee_gate
                .entry_for(&inputs.run_id, &inputs.module, &inputs.action, breakdown);

        let fee_receipt_hash =
            canonical::canonical_digest(&canonical::to_canonical_value(&fee_entry)?)?;
        let tx_hash = canonical::canonical_digest(&json!({
            "run_id": &inputs.run_id,
            "module": &inputs.module,
            "action": &inputs.action,
            "outputs": &outcome.outputs,
            "deltas": &outcome.deltas,
        }))?;
        let block_hash = canonical::canonical_digest(&json!({
            "protocol_anchor": canonical::to_canonical_value(&self.anchor)?,
            "fee_receipt_hash": &fee_receipt_hash,
            "tx_hash": &tx_hash,
        }))?;
        let receipt_hashes = ReceiptHashes {
            fee_receipt_hash,
            tx_hash,
            block_hash,
        };
        let fingerprint = canonical::input_fingerprint(inputs)?;
        let state_hash = canonical::state_hash(&receipt_hashes, &fingerprint);

        Ok(DerivedRun {
            outputs: outcome.outputs,
            deltas: outcome.deltas,
            stdout,
            fee_entry,
            receipt_hashes,
            state_hash,
        })
    }

    /// The fee actually owed for a run. Guarded fetches whose upstream
    /// attempt failed are waived when policy says failed calls ride free;
    /// everything else pays the scheduled fee.
    fn effective_fee(&self, inputs: &RunInputs) -> FeeBreakdown {
        let scheduled =
            self.fee_gate
                .compute_fee(&inputs.module, &inputs.action, &inputs.payload);
        if inputs.module == FETCH_MODULE
            && inputs.action == FETCH_ACTION
            && !self.charge_fetch_fee_on_failure
        {
            let upstream_ok = inputs
                .payload
                .get("witness")
                .and_then(|w| w.get("upstream_ok"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !upstream_ok {
                return FeeBreakdown::waived();
            }
        }
        scheduled
    }
}
