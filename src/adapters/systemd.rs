//! systemd signed-policy JSON adapter (`systemd` target, §6).
//!
//! The sealed-secret container is shared with [`super::tpm2key`] (the
//! same ASN.1 TPM 2.0 Key File); this module covers only the signed-
//! policy side: a JSON document keyed by algorithm name, each value an
//! array of `{pcrs, pkfp, pol, sig}` entries. Unsealing through this
//! target is not implemented (§4.J) — systemd itself drives the unseal
//! at boot via `systemd-cryptsetup`, not this crate.

use std::collections::BTreeMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub pcrs: Vec<u32>,
    pub pkfp: String,
    pub pol: String,
    pub sig: String,
}

/// Top-level document: algorithm name → bank entries.
pub type Document = BTreeMap<String, Vec<Entry>>;

pub fn load(path: &Path) -> Result<Document> {
    if !path.exists() {
        return Ok(Document::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save(path: &Path, doc: &Document) -> Result<()> {
    let content = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// PCR indices set in `mask`, starting from bit 0.
///
/// The original C source's `sdb_policy_entry_set_pcr_mask` started this
/// loop at `pcr_index = 1`, silently dropping PCR 0 from every entry it
/// wrote (§9, Open Question b). Treated as a bug: this iterates from 0.
pub fn pcr_mask_to_indices(mask: u32) -> Vec<u32> {
    (0..32).filter(|i| mask & (1 << i) != 0).collect()
}

/// Inserts or updates the entry for `(algo_name, pol)` in the document at
/// `path`, matching on the policy digest's exact hex so re-running a
/// `sign` with the same policy digest and key is idempotent rather than
/// appending a duplicate row.
pub fn upsert(
    path: &Path,
    algo_name: &str,
    pcr_mask: u32,
    fingerprint: &[u8],
    policy_digest: &[u8],
    signature: &[u8],
) -> Result<()> {
    let mut doc = load(path)?;
    let bank = doc.entry(algo_name.to_string()).or_default();

    let pol_hex = hex::encode(policy_digest);
    let entry = Entry {
        pcrs: pcr_mask_to_indices(pcr_mask),
        pkfp: hex::encode(fingerprint),
        pol: pol_hex.clone(),
        sig: BASE64.encode(signature),
    };

    match bank.iter_mut().find(|e| e.pol == pol_hex) {
        Some(existing) => *existing = entry,
        None => bank.push(entry),
    }

    save(path, &doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn pcr_mask_includes_bit_zero() {
        assert_eq!(pcr_mask_to_indices(0b1011), vec![0, 1, 3]);
    }

    #[test]
    fn upsert_of_same_policy_twice_is_idempotent() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{}").unwrap();

        upsert(file.path(), "sha256", 0x201, b"fp", b"pol-digest", b"sig-a").unwrap();
        upsert(file.path(), "sha256", 0x201, b"fp", b"pol-digest", b"sig-b").unwrap();

        let doc = load(file.path()).unwrap();
        let bank = &doc["sha256"];
        assert_eq!(bank.len(), 1);
        assert_eq!(bank[0].sig, BASE64.encode(b"sig-b"));
    }

    #[test]
    fn upsert_of_distinct_policies_appends() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{}").unwrap();

        upsert(file.path(), "sha256", 0x201, b"fp", b"pol-a", b"sig-a").unwrap();
        upsert(file.path(), "sha256", 0x201, b"fp", b"pol-b", b"sig-b").unwrap();

        let doc = load(file.path()).unwrap();
        assert_eq!(doc["sha256"].len(), 2);
    }
}
