//! Reference module handlers
//!
//! The wallet module is the worked example for the execution pipeline:
//! `faucet` credits an address, `transfer` moves balance between two.
//! `FetchWitnessHandler` is the internal handler that carries guarded
//! fetch witnesses into the evidence chain. Real deployments register
//! their own business catalogs alongside these.

use serde_json::{json, Value};

use crate::error::{EngineError, LedgerError, ValidationError};
use crate::registry::{ExecutionContext, HandlerOutcome, ModuleHandler};
use crate::types::{LedgerDelta, LedgerKey, StateSnapshot};

fn str_field<'a>(payload: &'a Value, name: &str) -> Result<&'a str, ValidationError> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::MalformedPayload {
            reason: format!("missing or empty string field {:?}", name),
        })
}

fn u64_field(payload: &Value, name: &str) -> Result<u64, ValidationError> {
    payload
        .get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| ValidationError::MalformedPayload {
            reason: format!("missing or non-integer field {:?}", name),
        })
}

/// `wallet/faucet`: credit an address with test funds
pub struct WalletFaucet;

impl ModuleHandler for WalletFaucet {
    fn footprint(&self, payload: &Value) -> Result<Vec<LedgerKey>, ValidationError> {
        let address = str_field(payload, "address")?;
        let asset_id = str_field(payload, "asset_id")?;
        Ok(vec![LedgerKey::new(address, asset_id)])
    }

    fn apply(
        &self,
        ctx: &mut ExecutionContext,
        payload: &Value,
        pre_state: &StateSnapshot,
    ) -> Result<HandlerOutcome, EngineError> {
        let address = str_field(payload, "address")?;
        let asset_id = str_field(payload, "asset_id")?;
        let amount = u64_field(payload, "amount")?;
        if amount == 0 {
            return Err(ValidationError::MalformedPayload {
                reason: "faucet amount must be positive".to_string(),
            }
            .into());
        }

        let key = LedgerKey::new(address, asset_id);
        let balance_before = pre_state.balance(&key);
        let balance_after = balance_before
            .checked_add(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow {
                account: address.to_string(),
                asset: asset_id.to_string(),
            })?;

        ctx.emit(format!("faucet: credited {amount} {asset_id} to {address}"));
        Ok(HandlerOutcome {
            outputs: json!({
                "address": address,
                "asset_id": asset_id,
                "credited": amount,
                "balance_after": balance_after,
            }),
            deltas: vec![LedgerDelta::credit(key, amount)],
        })
    }
}

/// `wallet/transfer`: move balance between two addresses
pub struct WalletTransfer;

impl ModuleHandler for WalletTransfer {
    fn footprint(&self, payload: &Value) -> Result<Vec<LedgerKey>, ValidationError> {
        let from = str_field(payload, "from")?;
        let to = str_field(payload, "to")?;
        let asset_id = str_field(payload, "asset_id")?;
        Ok(vec![
            LedgerKey::new(from, asset_id),
            LedgerKey::new(to, asset_id),
        ])
    }

    fn apply(
        &self,
        ctx: &mut ExecutionContext,
        payload: &Value,
        pre_state: &StateSnapshot,
    ) -> Result<HandlerOutcome, EngineError> {
        let from = str_field(payload, "from")?;
        let to = str_field(payload, "to")?;
        let asset_id = str_field(payload, "asset_id")?;
        let amount = u64_field(payload, "amount")?;
        if from == to {
            return Err(ValidationError::MalformedPayload {
                reason: "transfer endpoints must differ".to_string(),
            }
            .into());
        }
        if amount == 0 {
            return Err(ValidationError::MalformedPayload {
                reason: "transfer amount must be positive".to_string(),
            }
            .into());
        }

        let from_key = LedgerKey::new(from, asset_id);
        let to_key = LedgerKey::new(to, asset_id);
        let available = pre_state.balance(&from_key);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from.to_string(),
                asset: asset_id.to_string(),
                required: amount,
                available,
            }
            .into());
        }
        let to_balance_after = pre_state
            .balance(&to_key)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow {
                account: to.to_string(),
                asset: asset_id.to_string(),
            })?;

        ctx.emit(format!("transfer: {amount} {asset_id} {from} -> {to}"));
        Ok(HandlerOutcome {
            outputs: json!({
                "from": from,
                "to": to,
                "asset_id": asset_id,
                "amount": amount,
                "from_balance_after": available - amount,
                "to_balance_after": to_balance_after,
            }),
            deltas: vec![
                LedgerDelta::debit(from_key, amount),
                LedgerDelta::credit(to_key, amount),
            ],
        })
    }
}

/// `net/guarded_fetch`: carries a fetch witness into the evidence chain.
/// The payload's witness is already hash-only; the handler echoes it as
/// the module output and touches no balances beyond the fee.
pub struct FetchWitnessHandler;

impl ModuleHandler for FetchWitnessHandler {
    fn footprint(&self, _payload: &Value) -> Result<Vec<LedgerKey>, ValidationError> {
        Ok(vec![])
    }

    fn apply(
        &self,
        ctx: &mut ExecutionContext,
        payload: &Value,
        _pre_state: &StateSnapshot,
    ) -> Result<HandlerOutcome, EngineError> {
        let witness = payload
            .get("witness")
            .filter(|w| w.is_object())
            .ok_or_else(|| ValidationError::MalformedPayload {
                reason: "missing witness object".to_string(),
            })?;
        let status = witness.get("status").and_then(Value::as_u64).unwrap_or(0);
        let upstream_ok = witness
            .get("upstream_ok")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        ctx.emit(format!(
            "guarded_fetch: status={status} upstream_ok={upstream_ok}"
        ));
        Ok(HandlerOutcome {
            outputs: witness.clone(),
            deltas: vec![],
        })
    }
}
