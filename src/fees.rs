//! Fee computation and atomic settlement against the ledger

use serde_json::Value;

use crate::config::FeeSchedule;
use crate::error::{ConfigurationError, LedgerError};
use crate::ledger::LedgerTxn;
use crate::types::{FeeBreakdown, FeeLedgerEntry, LedgerKey, RunId};

/// Computes and enforces protocol/platform fees for mutating actions.
///
/// The protocol fee is always strictly positive for a mutating action; the
/// platform fee is additive on top and never substitutes for it. Settlement
/// is staged into the run's ledger transaction so the payer debit, treasury
/// credit, and module effect commit as one atomic unit.
#[derive(Debug)]
pub struct FeeGate {
    schedule: FeeSchedule,
    fee_asset: String,
    treasury_address: String,
}

impl FeeGate {
    /// Build a fee gate, rejecting configurations that could ever produce
    /// a free mutation or an unroutable settlement.
    pub fn new(
        schedule: FeeSchedule,
        fee_asset: String,
        treasury_address: String,
    ) -> Result<Self, ConfigurationError> {
        if treasury_address.is_empty() {
            return Err(ConfigurationError::MissingTreasury);
        }
        schedule.validate()?;
        Ok(Self {
            schedule,
            fee_asset,
            treasury_address,
        })
    }

    pub fn fee_asset(&self) -> &str {
        &self.fee_asset
    }

    pub fn treasury_address(&self) -> &str {
        &self.treasury_address
    }

    /// Fee breakdown for one action. The payload parameter is part of the
    /// contract for schedules that scale fees by payload size; the current
    /// schedule is flat per (module, action).
    pub fn compute_fee(&self, module: &str, action: &str, _payload: &Value) -> FeeBreakdown {
        self.schedule.lookup(module, action)
    }

    /// Stage the payer debit and treasury credit for this run's fee.
    ///
    /// The payer balance is checked before any module effect is staged;
    /// insufficient funds leaves the transaction untouched.
    pub fn settle(
        &self,
        txn: &mut LedgerTxn<'_>,
        payer: &str,
        run_id: &RunId,
        module: &str,
        action: &str,
        breakdown: FeeBreakdown,
    ) -> Result<FeeLedgerEntry, LedgerError> {
        let total = breakdown.total();
        if total > 0 {
            let payer_key = LedgerKey::new(payer, self.fee_asset.clone());
            let treasury_key = LedgerKey::new(self.treasury_address.clone(), self.fee_asset.clone());
            txn.stage_debit(&payer_key, total)?;
            txn.stage_credit(&treasury_key, total)?;
        }
        tracing::debug!(
            run_id = %run_id,
            module,
            action,
            protocol_fee = breakdown.protocol_fee_total,
            platform_fee = breakdown.platform_fee_amount,
            "fee settled"
        );
        Ok(FeeLedgerEntry {
            module: module.to_string(),
            action: action.to_string(),
            protocol_fee_total: breakdown.protocol_fee_total,
            platform_fee_amount: breakdown.platform_fee_amount,
            total_paid: total,
            fee_asset: self.fee_asset.clone(),
            treasury_address: self.treasury_address.clone(),
            run_id: run_id.clone(),
        })
    }

    /// Rebuild the fee entry for a run without touching any ledger state.
    /// Replay uses this to recompute the fee receipt from recorded inputs.
    pub fn entry_for(
        &self,
        run_id: &RunId,
        module: &str,
        action: &str,
        breakdown: FeeBreakdown,
    ) -> FeeLedgerEntry {
        FeeLedgerEntry {
            module: module.to_string(),
            action: action.to_string(),
            protocol_fee_total: breakdown.protocol_fee_total,
            platform_fee_amount: breakdown.platform_fee_amount,
            total_paid: breakdown.total(),
            fee_asset: self.fee_asset.clone(),
            treasury_address: self.treasury_address.clone(),
            run_id: run_id.clone(),
        }
    }
}
