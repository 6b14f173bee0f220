use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::fsx;

const FUNCTIONS_FILE: &str = "functions.json";
const FUNCTIONS_URL: &str = "https://developer.hashicorp.com/terraform/language/functions";

static FUNCTION_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/terraform/language/functions/([a-z0-9_]+)").unwrap());

/// Guarantee a cached JSON array of Terraform function names exists under the
/// scratch directory, fetching the documentation index once when missing.
pub async fn ensure_functions_cached(scratch_dir: &Path) -> Result<()> {
    if scratch_dir.as_os_str().is_empty() {
        anyhow::bail!("scratch dir is empty");
    }
    fsx::ensure_dir(scratch_dir)?;
    let cache_path = scratch_dir.join(FUNCTIONS_FILE);
    if cache_path.is_file() {
        return Ok(());
    }
    let names = fetch_function_names().await?;
    let bytes = serde_json::to_vec(&names)?;
    fsx::write_atomic(&cache_path, &bytes)
}

/// Read the cached function list. Names are normalized to lowercase, unique
/// and sorted; a missing or malformed cache yields an empty list.
pub fn load_functions(scratch_dir: &Path) -> Vec<String> {
    let cache_path = scratch_dir.join(FUNCTIONS_FILE);
    let Ok(bytes) = fs::read(&cache_path) else {
        return Vec::new();
    };
    let Ok(names) = serde_json::from_slice::<Vec<String>>(&bytes) else {
        return Vec::new();
    };
    let set: BTreeSet<String> = names
        .into_iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    set.into_iter().collect()
}

async fn fetch_function_names() -> Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent("terraflow/console")
        .build()
        .context("build http client")?;
    let resp = client
        .get(FUNCTIONS_URL)
        .send()
        .await
        .context("fetch functions index")?;
    if !resp.status().is_success() {
        anyhow::bail!("unexpected status {} fetching functions", resp.status());
    }
    let body = resp.text().await.context("read functions index")?;
    let set: BTreeSet<String> = FUNCTION_LINK
        .captures_iter(&body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if set.is_empty() {
        anyhow::bail!("no function names found");
    }
    Ok(set.into_iter().collect())
}
