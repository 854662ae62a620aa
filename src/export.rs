//! Deterministic export packaging for evidence bundles
//!
//! A bundle exports to a fixed file set; a store exports to one directory
//! per run plus a manifest. Byte-identical input produces byte-identical
//! output on any machine: canonical JSON everywhere, sorted iteration, no
//! timestamps.

use std::fs;
use std::path::Path;

use serde_json::json;

use crate::canonical;
use crate::error::EngineError;
use crate::types::EvidenceBundle;

/// One file of an export, path relative to the export root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// The fixed file set for a single bundle.
///
/// `state_hash` and `replay_ok` are raw text with no trailing whitespace;
/// `stdout.log` is the raw capture; everything else is canonical JSON.
pub fn bundle_files(bundle: &EvidenceBundle) -> Result<Vec<ExportFile>, EngineError> {
    let anchor = canonical::canonicalize(&canonical::to_canonical_value(&bundle.protocol_anchor)?)?;
    let inputs = canonical::canonicalize(&canonical::to_canonical_value(&bundle.inputs)?)?;
    let outputs = canonical::canonicalize(&bundle.outputs)?;
    let receipts = canonical::canonicalize(&json!([
        bundle.receipt_hashes.fee_receipt_hash,
        bundle.receipt_hashes.tx_hash,
        bundle.receipt_hashes.block_hash,
    ]))?;

    Ok(vec![
        ExportFile {
            path: "anchor.json".to_string(),
            bytes: anchor,
        },
        ExportFile {
            path: "inputs.json".to_string(),
            bytes: inputs,
        },
        ExportFile {
            path: "outputs.json".to_string(),
            bytes: outputs,
        },
        ExportFile {
            path: "receipts.json".to_string(),
            bytes: receipts,
        },
        ExportFile {
            path: "state_hash".to_string(),
            bytes: bundle.state_hash.as_bytes().to_vec(),
        },
        ExportFile {
            path: "replay_ok".to_string(),
            bytes: if bundle.replay_ok { b"true".to_vec() } else { b"false".to_vec() },
        },
        ExportFile {
            path: "stdout.log".to_string(),
            bytes: bundle.stdout.as_bytes().to_vec(),
        },
    ])
}

/// Package one or many bundles into a flat, deterministic file list.
///
/// Bundles are emitted in run_id order under `<run_id>/`, followed by a
/// manifest mapping each run to its state hash.
pub fn export_bundles(bundles: &[EvidenceBundle]) -> Result<Vec<ExportFile>, EngineError> {
    let mut sorted: Vec<&EvidenceBundle> = bundles.iter().collect();
    sorted.sort_by(|a, b| a.inputs.run_id.cmp(&b.inputs.run_id));

    let mut files = Vec::new();
    let mut manifest = serde_json::Map::new();
    for bundle in sorted {
        let run_id = bundle.inputs.run_id.as_str();
        for file in bundle_files(bundle)? {
            files.push(ExportFile {
                path: format!("{}/{}", run_id, file.path),
                bytes: file.bytes,
            });
        }
        manifest.insert(
            run_id.to_string(),
            serde_json::Value::String(bundle.state_hash.clone()),
        );
    }
    files.push(ExportFile {
        path: "manifest.json".to_string(),
        bytes: canonical::canonicalize(&json!({ "runs": manifest }))?,
    });
    Ok(files)
}

/// Write an export file list under a root directory
pub fn write_to_dir(files: &[ExportFile], root: &Path) -> Result<(), EngineError> {
    for file in files {
        let path = root.join(&file.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::Storage {
                reason: format!("create {}: {}", parent.display(), e),
            })?;
        }
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
        ProtocolAnchor, ReceiptHashes, RunId, RunInputs, StateSnapshot, Version,
    };
    use serde_json::json;

    fn bundle(run_id: &str) -> EvidenceBundle {
        EvidenceBundle {
            protocol_anchor: ProtocolAnchor {
                engine: "nyx-evidence".to_string(),
                version: Version::new(0, 1, 0),
                rules_digest: canonical::digest(b"catalog"),
            },
            inputs: RunInputs {
                seed: 9,
                run_id: RunId::new(run_id).unwrap(),
                account_id: "acct-1".to_string(),
                wallet_address: "nyx-testnet-abc".to_string(),
                module: "wallet".to_string(),
                action: "faucet".to_string(),
                payload: json!({"b": 2, "a": 1}),
                pre_state: StateSnapshot::default(),
            },
            outputs: json!({"credited": 10}),
            receipt_hashes: ReceiptHashes {
                fee_receipt_hash: canonical::digest(b"fee"),
                tx_hash: canonical::digest(b"tx"),
                block_hash: canonical::digest(b"block"),
            },
            state_hash: canonical::digest(b"state"),
            replay_ok: true,
            stdout: "line\n".to_string(),
        }
    }

    #[test]
    fn test_fixed_file_set() {
        let files = bundle_files(&bundle("run-1")).unwrap();
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
    }

    #[test]
    fn test_export_is_byte_identical_across_calls() {
        let bundles = vec![bundle("beta"), bundle("alpha")];
        let first = export_bundles(&bundles).unwrap();
        let second = export_bundles(&bundles).unwrap();
        assert_eq!(first, second);
        // Input order does not leak into output order.
        let reversed = export_bundles(&[bundle("alpha"), bundle("beta")]).unwrap();
        assert_eq!(first, reversed);
    }

    #[test]
    fn test_receipts_file_is_ordered_array() {
        let b = bundle("run-1");
        let files = bundle_files(&b).unwrap();
        let receipts = files.iter().find(|f| f.path == "receipts.json").unwrap();
        let parsed: Vec<String> = serde_json::from_slice(&receipts.bytes).unwrap();
        assert_eq!(
            parsed,
            vec![
                b.receipt_hashes.fee_receipt_hash.clone(),
                b.receipt_hashes.tx_hash.clone(),
                b.receipt_hashes.block_hash.clone(),
            ]
        );
    }

    #[test]
    fn test_state_hash_file_has_no_trailing_whitespace() {
        let files = bundle_files(&bundle("run-1")).unwrap();
        let state = files.iter().find(|f| f.path == "state_hash").unwrap();
        let text = String::from_utf8(state.bytes.clone()).unwrap();
        assert_eq!(text, text.trim_end());
        assert_eq!(text.len(), 64);
    }

    #[test]
    fn test_manifest_lists_sorted_runs() {
        let files = export_bundles(&[bundle("zeta"), bundle("alpha")]).unwrap();
        let manifest = files.iter().find(|f| f.path == "manifest.json").unwrap();
        let text = String::from_utf8(manifest.bytes.clone()).unwrap();
        let alpha_at = text.find("alpha").unwrap();
        let zeta_at = text.find("zeta").unwrap();
        assert!(alpha_at < zeta_at);
    }

    #[test]
    fn test_write_to_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = export_bundles(&[bundle("run-1")]).unwrap();
        write_to_dir(&files, dir.path()).unwrap();
        for file in &files {
            let on_disk = std::fs::read(dir.path().join(&file.path)).unwrap();
            assert_eq!(on_disk, file.bytes);
        }
    }
}
