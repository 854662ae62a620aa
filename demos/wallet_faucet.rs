//! Wallet faucet walkthrough: execute a run, inspect its evidence, replay
//! it, and export the deterministic file set.
//!
//! Run with: cargo run --example wallet_faucet

use nyx_evidence::handlers::{WalletFaucet, WalletTransfer};
use nyx_evidence::{EngineConfig, EvidenceEngine, LedgerKey, MutationRequest};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = EngineConfig {
        treasury_address: Some("nyx-treasury-000".to_string()),
        ..EngineConfig::default()
    };
    let engine = EvidenceEngine::builder()
        .with_config(config)
        .with_handler("wallet", "faucet", Box::new(WalletFaucet))
        .with_handler("wallet", "transfer", Box::new(WalletTransfer))
        .build()?;

    // Fund the requester so it can pay the protocol fee.
    let payer = LedgerKey::new("nyx-testnet-abc", "NYXT");
    engine.ledger().seed_balance(payer.clone(), 500);

    println!("== executing wallet/faucet (run_id=demo-1, seed=123)");
    let bundle = engine.execute(MutationRequest {
        seed: 123,
        run_id: "demo-1".to_string(),
        account_id: "acct-demo".to_string(),
        wallet_address: "nyx-testnet-abc".to_string(),
        module: "wallet".to_string(),
        action: "faucet".to_string(),
        payload: json!({
            "address": "nyx-testnet-abc",
            "amount": 1000,
            "asset_id": "NYXT",
        }),
    })?;

    println!("state_hash   : {}", bundle.state_hash);
    println!("fee receipt  : {}", bundle.receipt_hashes.fee_receipt_hash);
    println!("tx receipt   : {}", bundle.receipt_hashes.tx_hash);
    println!("block receipt: {}", bundle.receipt_hashes.block_hash);
    println!("balance now  : {}", engine.ledger().balance(&payer));
    println!(
        "treasury now : {}",
        engine
            .ledger()
            .balance(&LedgerKey::new("nyx-treasury-000", "NYXT"))
    );
    print!("{}", bundle.stdout);

    println!("\n== replaying demo-1");
    let report = engine.replay("demo-1")?;
    println!("replay ok    : {} (diff entries: {})", report.ok, report.diff.len());

    println!("\n== duplicate run_id is rejected");
    let conflict = engine.execute(MutationRequest {
        seed: 123,
        run_id: "demo-1".to_string(),
        account_id: "acct-demo".to_string(),
        wallet_address: "nyx-testnet-abc".to_string(),
        module: "wallet".to_string(),
        action: "faucet".to_string(),
        payload: json!({
            "address": "nyx-testnet-abc",
            "amount": 999999,
            "asset_id": "NYXT",
        }),
    });
    match conflict {
        Err(err) => println!("rejected     : {:?}", err.report()),
        Ok(_) => unreachable!("duplicate run_id must never finalize"),
    }

    println!("\n== deterministic export");
    for file in engine.export_run("demo-1")? {
        println!("{:>14}  {} bytes", file.path, file.bytes.len());
    }

    Ok(())
}
