use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::fsx;

/// The local Terraform state as a raw JSON document. Unknown fields survive a
/// load/store round trip untouched; only `version`, `serial`, `outputs` and
/// `resources` are interpreted.
pub struct StateDocument {
    path: PathBuf,
    doc: Map<String, Value>,
    original: Vec<u8>,
}

/// Create a minimal local state file if one does not exist: version 4,
/// serial 1, a fresh lineage UUID, empty outputs and resources. The directory
/// is created 0700 and the file 0600. An existing file is left untouched.
pub fn ensure_initialized(state_path: &Path) -> Result<()> {
    if state_path.as_os_str().is_empty() {
        anyhow::bail!("state path is empty");
    }
    if let Ok(meta) = fs::metadata(state_path) {
        if meta.is_file() {
            return Ok(());
        }
    }
    let mut doc = Map::new();
    doc.insert("version".to_string(), Value::from(4));
    doc.insert("serial".to_string(), Value::from(1));
    doc.insert(
        "lineage".to_string(),
        Value::String(uuid::Uuid::new_v4().to_string()),
    );
    doc.insert("outputs".to_string(), Value::Object(Map::new()));
    doc.insert("resources".to_string(), Value::Array(Vec::new()));
    let bytes = serde_json::to_vec(&Value::Object(doc))?;
    fsx::write_atomic(state_path, &bytes).context("write initial state")
}

impl StateDocument {
    /// Load the state file, remembering its serialized bytes so an unchanged
    /// document can skip the write entirely.
    pub fn load(state_path: &Path) -> Result<Self> {
        let original = fs::read(state_path)
            .with_context(|| format!("read state {}", state_path.display()))?;
        let value: Value = serde_json::from_slice(&original).context("parse state")?;
        let mut doc = match value {
            Value::Object(map) => map,
            _ => anyhow::bail!("state root is not a JSON object"),
        };
        if !doc.get("outputs").map(Value::is_object).unwrap_or(false) {
            doc.insert("outputs".to_string(), Value::Object(Map::new()));
        }
        if !doc.get("resources").map(Value::is_array).unwrap_or(false) {
            doc.insert("resources".to_string(), Value::Array(Vec::new()));
        }
        Ok(Self {
            path: state_path.to_path_buf(),
            doc,
            original,
        })
    }

    pub fn resources_mut(&mut self) -> &mut Vec<Value> {
        match self.doc.get_mut("resources") {
            Some(Value::Array(items)) => items,
            _ => unreachable!("resources normalized on load"),
        }
    }

    /// Bump the serial, reserialize and write atomically, then fan the new
    /// bytes out to every persistent-evaluator snapshot bound to this path.
    /// `changed` comes from the merge pass; when false, or when the serialized
    /// state would equal the bytes originally read, nothing is written and the
    /// serial is left alone.
    pub fn write_if_changed(mut self, changed: bool) -> Result<bool> {
        if !changed {
            return Ok(false);
        }
        self.normalize_version();
        self.bump_serial();
        let bytes = serde_json::to_vec(&Value::Object(self.doc.clone()))?;
        if bytes == self.original {
            return Ok(false);
        }
        fsx::write_atomic(&self.path, &bytes).context("write state")?;
        crate::eval::persistent::update_snapshots(&self.path, &bytes);
        Ok(true)
    }

    fn normalize_version(&mut self) {
        let needs_default = match self.doc.get("version") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) == 0.0,
            _ => true,
        };
        if needs_default {
            self.doc.insert("version".to_string(), Value::from(4));
        }
    }

    fn bump_serial(&mut self) {
        let next = match self.doc.get("serial").and_then(Value::as_f64) {
            Some(s) if s > 0.0 => s as i64 + 1,
            _ => 1,
        };
        self.doc.insert("serial".to_string(), Value::from(next));
    }
}
