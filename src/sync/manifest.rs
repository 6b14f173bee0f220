use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::fsx;

/// Name of the sync manifest inside the scratch directory.
pub const MANIFEST_FILE: &str = ".tf-manifest.json";

/// One mirrored file, keyed in the manifest by its slash-separated relative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub mod_unix_nano: i64,
    pub size: u64,
}

/// Read the manifest at `path`. A missing or unparsable manifest is treated as
/// empty so the next sync recopies everything.
pub fn read_manifest(path: &Path) -> BTreeMap<String, ManifestEntry> {
    let Ok(bytes) = fs::read(path) else {
        return BTreeMap::new();
    };
    serde_json::from_slice(&bytes).unwrap_or_default()
}

/// Write the manifest atomically (temp file + rename, 0600).
pub fn write_manifest(path: &Path, entries: &BTreeMap<String, ManifestEntry>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(entries)?;
    fsx::write_atomic(path, &bytes)
}
