use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use tokio::process::Command;

use crate::fsx;

/// Content-addressed cache key for a module source string.
pub fn fingerprint(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Local filesystem paths (`./`, `../`, absolute, `file://`) resolve without
/// fetching.
pub fn is_local_path(source: &str) -> bool {
    source.starts_with("./")
        || source.starts_with("../")
        || source.starts_with('/')
        || source.starts_with("file://")
}

/// Registry-shaped addresses are covered by `.terraform/modules` and are not
/// fetched here.
pub fn is_registry_address(source: &str) -> bool {
    if source.starts_with("registry.terraform.io/") {
        return true;
    }
    !source.contains("://") && source.matches('/').count() == 2
}

/// Directory of a previously fetched remote source, if present in the cache.
pub fn cached_dir(source: &str, cache_dir: &Path) -> Option<PathBuf> {
    let s = source.trim();
    if s.is_empty() || is_local_path(s) || is_registry_address(s) {
        return None;
    }
    let dest = cache_dir.join(fingerprint(s));
    dest.is_dir().then_some(dest)
}

/// Resolve a module source to a local directory. Local paths are returned
/// absolute; registry addresses return `None` (the caller relies on
/// `.terraform/modules`); URL/VCS sources are downloaded into
/// `cache_dir/<sha1(source)>/` via a temporary directory renamed into place,
/// so a partially fetched module is never observed.
pub async fn resolve_or_fetch(source: &str, cache_dir: &Path) -> Result<Option<PathBuf>> {
    let s = source.trim();
    if s.is_empty() {
        anyhow::bail!("empty module source");
    }
    if is_local_path(s) {
        let path = PathBuf::from(s.trim_start_matches("file://"));
        let abs = path
            .canonicalize()
            .with_context(|| format!("local module path not found: {}", path.display()))?;
        if !abs.is_dir() {
            anyhow::bail!("local module path is not a directory: {}", abs.display());
        }
        return Ok(Some(abs));
    }
    if is_registry_address(s) {
        return Ok(None);
    }
    fsx::ensure_dir(cache_dir).context("create module cache dir")?;
    let dest = cache_dir.join(fingerprint(s));
    if dest.is_dir() {
        return Ok(Some(dest));
    }
    let tmp = cache_dir.join(format!("modfetch-{}", fsx::unix_nanos()));
    fsx::ensure_dir(&tmp)?;
    let fetched = fetch_into(s, &tmp).await;
    match fetched {
        Ok(()) => {
            fs::rename(&tmp, &dest).context("cache move")?;
            Ok(Some(dest))
        }
        Err(err) => {
            let _ = fs::remove_dir_all(&tmp);
            Err(err).context("fetch module source")
        }
    }
}

async fn fetch_into(source: &str, dest: &Path) -> Result<()> {
    if let Some(git_url) = git_url(source) {
        return git_clone(&git_url, dest).await;
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        return http_fetch(source, dest).await;
    }
    anyhow::bail!("unsupported module source: {source}")
}

/// Recognized VCS forms: an explicit `git::` prefix, a `.git` suffix, or a
/// well-known git host.
fn git_url(source: &str) -> Option<String> {
    let stripped = source.strip_prefix("git::").unwrap_or(source);
    let explicit = source.starts_with("git::");
    let url = stripped.split('?').next().unwrap_or(stripped);
    if explicit
        || url.ends_with(".git")
        || url.starts_with("git@")
        || url.starts_with("github.com/")
        || url.starts_with("gitlab.com/")
    {
        Some(url.to_string())
    } else {
        None
    }
}

async fn git_clone(url: &str, dest: &Path) -> Result<()> {
    let status = Command::new("git")
        .args(["clone", "--depth", "1", url])
        .arg(dest)
        .env("PAGER", "")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .context("spawn git clone")?;
    if !status.success() {
        anyhow::bail!("git clone {url} exited with {status}");
    }
    Ok(())
}

async fn http_fetch(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent("terraflow/console")
        .build()
        .context("build http client")?;
    let resp = client.get(url).send().await.context("fetch module")?;
    if !resp.status().is_success() {
        anyhow::bail!("unexpected status {} fetching {url}", resp.status());
    }
    let name = url
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("module.tf");
    let bytes = resp.bytes().await.context("read module body")?;
    fsx::write_atomic(&dest.join(name), &bytes)
}
