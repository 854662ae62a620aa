//! Deterministic export packaging across engines and filesystems

use nyx_evidence::handlers::WalletFaucet;
use nyx_evidence::{EngineConfig, EvidenceEngine, LedgerKey, MutationRequest};
use serde_json::json;

fn engine() -> EvidenceEngine {
    let config = EngineConfig {
        treasury_address: Some("nyx-treasury-000".to_string()),
        ..EngineConfig::default()
    };
    let engine = EvidenceEngine::builder()
        .with_config(config)
        .with_handler("wallet", "faucet", Box::new(WalletFaucet))
        .build()
        .unwrap();
    engine
        .ledger()
        .seed_balance(LedgerKey::new("nyx-testnet-abc", "NYXT"), 100_000);
    engine
}

fn faucet(engine: &EvidenceEngine, run_id: &str, seed: u64) {
    engine
        .execute(MutationRequest {
            seed,
            run_id: run_id.to_string(),
            account_id: "acct-demo".to_string(),
            wallet_address: "nyx-testnet-abc".to_string(),
            module: "wallet".to_string(),
            action: "faucet".to_string(),
            payload: json!({
                "address": "nyx-testnet-abc",
                "amount": 100,
                "asset_id": "NYXT",
            }),
        })
        .unwrap();
}

#[test]
fn test_export_twice_is_byte_identical() {
    let engine = engine();
    faucet(&engine, "exp-b", 1);
    faucet(&engine, "exp-a", 2);

    let first = engine.export_all().unwrap();
    let second = engine.export_all().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_independent_engines_export_identical_bytes() {
    // Two engines, same logical history: every exported byte matches.
    let build = || {
        let engine = engine();
        faucet(&engine, "exp-1", 11);
        faucet(&engine, "exp-2", 12);
        engine.export_all().unwrap()
    };
    assert_eq!(build(), build());
}

#[test]
fn test_export_file_set_shape() {
    let engine = engine();
    faucet(&engine, "exp-1", 1);

    let files = engine.export_run("exp-1").unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "anchor.json",
            "inputs.json",
            "outputs.json",
            "receipts.json",
            "state_hash",
            "replay_ok",
            "stdout.log"
        ]
    );

    let replay_ok = files.iter().find(|f| f.path == "replay_ok").unwrap();
    assert_eq!(replay_ok.bytes, b"true");
}

#[test]
fn test_structured_files_are_sorted_key_compact_utf8() {
    let engine = engine();
    faucet(&engine, "exp-1", 1);

    for file in engine.export_run("exp-1").unwrap() {
        if !file.path.ends_with(".json") {
            continue;
        }
        let text = std::str::from_utf8(&file.bytes).unwrap();
        // Compact: serde's pretty separators never appear.
        assert!(!text.contains(": "), "{} not compact", file.path);
        assert!(!text.contains('\n'), "{} not compact", file.path);
        // Re-canonicalizing canonical bytes is the identity.
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        let again = nyx_evidence::canonical::canonicalize(&value).unwrap();
        assert_eq!(again, file.bytes, "{} not canonical", file.path);
    }
}

#[test]
fn test_receipts_array_is_fee_tx_block_ordered() {
    let engine = engine();
    faucet(&engine, "exp-1", 1);
    let bundle = engine.load("exp-1").unwrap().unwrap();

    let files = engine.export_run("exp-1").unwrap();
    let receipts = files.iter().find(|f| f.path == "receipts.json").unwrap();
    let parsed: Vec<String> = serde_json::from_slice(&receipts.bytes).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0], bundle.receipt_hashes.fee_receipt_hash);
    assert_eq!(parsed[1], bundle.receipt_hashes.tx_hash);
    assert_eq!(parsed[2], bundle.receipt_hashes.block_hash);
}

#[test]
fn test_export_writes_tree_to_disk() {
    let engine = engine();
    faucet(&engine, "exp-a", 1);
    faucet(&engine, "exp-b", 2);

    let dir = tempfile::tempdir().unwrap();
    engine.export_all_to_dir(dir.path()).unwrap();

    assert!(dir.path().join("exp-a/state_hash").exists());
    assert!(dir.path().join("exp-b/receipts.json").exists());
    assert!(dir.path().join("manifest.json").exists());

    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["runs"].as_object().unwrap().len(), 2);

    // On-disk bytes match the in-memory export exactly.
    for file in engine.export_all().unwrap() {
        let on_disk = std::fs::read(dir.path().join(&file.path)).unwrap();
        assert_eq!(on_disk, file.bytes, "{}", file.path);
    }
}

#[test]
fn test_store_root_persistence_matches_export() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        treasury_address: Some("nyx-treasury-000".to_string()),
        ..EngineConfig::default()
    };
    let engine = EvidenceEngine::builder()
        .with_config(config)
        .with_handler("wallet", "faucet", Box::new(WalletFaucet))
        .with_store_root(dir.path())
        .build()
        .unwrap();
    engine
        .ledger()
        .seed_balance(LedgerKey::new("nyx-testnet-abc", "NYXT"), 1_000);
    faucet(&engine, "persist-1", 5);

    for file in engine.export_run("persist-1").unwrap() {
        let on_disk = std::fs::read(dir.path().join("persist-1").join(&file.path)).unwrap();
        assert_eq!(on_disk, file.bytes, "{}", file.path);
    }
}
