use std::collections::BTreeSet;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::process::Command;

use crate::index::SymbolIndex;

/// Best-effort enrichment of the index with attribute names from provider
/// schemas: runs `terraform providers schema -json` in the scratch workspace
/// and merges attribute keys by resource/data-source type. Failures leave the
/// config-derived attributes in place.
pub async fn enrich_from_provider_schemas(work_dir: &Path, index: &mut SymbolIndex) -> Result<()> {
    let output = Command::new("terraform")
        .args(["providers", "schema", "-json"])
        .current_dir(work_dir)
        .env("TF_IN_AUTOMATION", "1")
        .env("PAGER", "")
        .stderr(Stdio::null())
        .output()
        .await
        .context("spawn terraform providers schema")?;
    if !output.status.success() {
        anyhow::bail!("terraform providers schema exited with {}", output.status);
    }
    let doc: Value = serde_json::from_slice(&output.stdout).context("parse provider schemas")?;
    let Some(providers) = doc.get("provider_schemas").and_then(Value::as_object) else {
        return Ok(());
    };
    for schema in providers.values() {
        if let Some(resources) = schema.get("resource_schemas").and_then(Value::as_object) {
            for (rtype, rschema) in resources {
                merge_block_attrs(&mut index.resource_attrs, rtype, rschema);
            }
        }
        if let Some(data) = schema.get("data_source_schemas").and_then(Value::as_object) {
            for (dtype, dschema) in data {
                merge_block_attrs(&mut index.data_attrs, dtype, dschema);
            }
        }
    }
    Ok(())
}

fn merge_block_attrs(
    attrs: &mut std::collections::BTreeMap<String, Vec<String>>,
    type_name: &str,
    schema: &Value,
) {
    let Some(block) = schema.get("block") else {
        return;
    };
    let mut merged: BTreeSet<String> = attrs
        .get(type_name)
        .map(|v| v.iter().cloned().collect())
        .unwrap_or_default();
    if let Some(block_attrs) = block.get("attributes").and_then(Value::as_object) {
        merged.extend(block_attrs.keys().cloned());
    }
    if let Some(block_types) = block.get("block_types").and_then(Value::as_object) {
        merged.extend(block_types.keys().cloned());
    }
    if !merged.is_empty() {
        attrs.insert(type_name.to_string(), merged.into_iter().collect());
    }
}
