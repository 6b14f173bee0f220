use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use walkdir::WalkDir;

use crate::fsx;
use crate::sync::manifest::{read_manifest, write_manifest, ManifestEntry, MANIFEST_FILE};

/// Directories that are never mirrored into the scratch workspace.
const SKIP_DIRS: [&str; 2] = [".terraform", ".terraflow"];

/// Result of a scratch sync. `changed_tf_paths` lists the scratch-side paths of
/// every `.tf` file that was copied or removed, so the refresher can run a
/// targeted state patch on exactly those files.
#[derive(Debug, Default, Clone)]
pub struct SyncOutcome {
    pub changed: bool,
    pub changed_tf: bool,
    pub changed_tf_paths: Vec<PathBuf>,
}

/// Whether `path` is a file the synchronizer tracks: `.tf`, `.tfvars`, or
/// `.tf.json`, by extension (case-insensitive).
pub fn is_tracked_file(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };
    name.ends_with(".tf") || name.ends_with(".tfvars") || name.ends_with(".tf.json")
}

/// Whether the file at `path` declares a backend. Such files are never
/// mirrored: the scratch workspace evaluates against its own local state.
pub fn has_backend_block(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(src) => src.contains("backend \""),
        Err(_) => false,
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| SKIP_DIRS.contains(&n))
            .unwrap_or(false)
}

/// Incrementally mirror Terraform-relevant files from `src_dir` into
/// `scratch_dir`. Copies `.tf`, `.tfvars` and `.tf.json` files, skips
/// `.terraform/` and `.terraflow/` trees, and omits any file declaring a
/// backend. A manifest of `(mtime, size)` pairs avoids rewriting unchanged
/// files; files that disappeared from the source are removed from the mirror.
pub fn sync_to_scratch(src_dir: &Path, scratch_dir: &Path) -> Result<SyncOutcome> {
    fsx::ensure_dir(scratch_dir).context("make scratch")?;
    let manifest_path = scratch_dir.join(MANIFEST_FILE);
    let old_manifest = read_manifest(&manifest_path);
    let mut new_manifest: BTreeMap<String, ManifestEntry> = BTreeMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut outcome = SyncOutcome::default();

    for entry in WalkDir::new(src_dir)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_tracked_file(path) {
            continue;
        }
        let is_tf = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("tf"))
            .unwrap_or(false);
        if is_tf && has_backend_block(path) {
            continue;
        }
        let rel = match path.strip_prefix(src_dir) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let rel_key = slash_path(rel);
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let new_entry = ManifestEntry {
            mod_unix_nano: fsx::mod_unix_nanos(&meta),
            size: meta.len(),
        };
        seen.insert(rel_key.clone());
        new_manifest.insert(rel_key.clone(), new_entry);
        if old_manifest.get(&rel_key) == Some(&new_entry) {
            continue;
        }
        let dst = scratch_dir.join(rel);
        fsx::copy_file_atomic(path, &dst)
            .with_context(|| format!("mirror {}", path.display()))?;
        outcome.changed = true;
        if is_tf {
            outcome.changed_tf = true;
            outcome.changed_tf_paths.push(dst);
        }
    }

    // Any manifest entry not seen this pass corresponds to a deleted source file.
    for rel_key in old_manifest.keys() {
        if seen.contains(rel_key) {
            continue;
        }
        let dst = scratch_dir.join(Path::new(&rel_key.replace('/', std::path::MAIN_SEPARATOR_STR)));
        match fs::remove_file(&dst) {
            Ok(()) => {
                outcome.changed = true;
                if rel_key.ends_with(".tf") {
                    outcome.changed_tf = true;
                    outcome.changed_tf_paths.push(dst);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => {
                // Leave the stale mirror in place; the next sync retries.
            }
        }
    }

    write_manifest(&manifest_path, &new_manifest).context("write manifest")?;
    Ok(outcome)
}

fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Mirror the project's `.terraform/` directory into the scratch workspace so
/// provider plugins and the modules cache resolve there, excluding any
/// `terraform.tfstate` inside it. Hydrates the provider lock file and the
/// modules cache with one-off terraform invocations when missing.
pub async fn mirror_provider_dir(root: &Path, scratch_dir: &Path) -> Result<()> {
    let src = root.join(".terraform");
    let Ok(meta) = fs::metadata(&src) else {
        return Ok(());
    };
    if !meta.is_dir() {
        return Ok(());
    }
    let dst = scratch_dir.join(".terraform");
    if dst.exists() {
        fs::remove_dir_all(&dst).context("remove existing scratch .terraform")?;
    }
    fsx::ensure_dir(&dst).context("create scratch .terraform")?;
    for entry in WalkDir::new(&src) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let rel = match entry.path().strip_prefix(&src) {
            Ok(r) if !r.as_os_str().is_empty() => r.to_path_buf(),
            _ => continue,
        };
        let out = dst.join(&rel);
        if entry.file_type().is_dir() {
            fsx::ensure_dir(&out)?;
        } else if entry.file_name() != "terraform.tfstate" {
            fsx::copy_file_atomic(entry.path(), &out)?;
        }
    }
    let _ = fs::remove_file(dst.join("terraform.tfstate"));

    // Generate the provider lock file once if the scratch copy is missing.
    if !scratch_dir.join(".terraform.lock.hcl").exists() {
        run_quiet(
            scratch_dir,
            &["providers", "lock", "-fs-mirror", ".terraform/providers"],
        )
        .await
        .context("terraform providers lock")?;
    }
    // Hydrate the modules cache with a modules-only init when absent.
    if !dst.join("modules").exists() {
        run_quiet(
            scratch_dir,
            &["init", "-get", "-backend=false", "-input=false", "-no-color"],
        )
        .await
        .context("terraform init (modules only)")?;
    }
    Ok(())
}

/// Run `terraform init` in `work_dir`, forwarding partial backend configuration
/// values as repeated `-backend-config` flags. Values may be KEY=VALUE pairs or
/// paths to `*.tfbackend` files, matching Terraform's own semantics.
pub async fn init_with_backend_config(work_dir: &Path, backend_configs: &[String]) -> Result<()> {
    let mut args: Vec<String> = vec![
        "init".to_string(),
        "-input=false".to_string(),
        "-no-color".to_string(),
    ];
    for bc in backend_configs {
        let bc = bc.trim();
        if bc.is_empty() {
            continue;
        }
        args.push(format!("-backend-config={bc}"));
    }
    let status = Command::new("terraform")
        .args(&args)
        .current_dir(work_dir)
        .env("TF_IN_AUTOMATION", "1")
        .env("PAGER", "")
        .status()
        .await
        .context("spawn terraform init")?;
    if !status.success() {
        anyhow::bail!("terraform init exited with {status}");
    }
    Ok(())
}

async fn run_quiet(work_dir: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("terraform")
        .args(args)
        .current_dir(work_dir)
        .env("TF_IN_AUTOMATION", "1")
        .env("PAGER", "")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        anyhow::bail!("terraform {:?} exited with {status}", args);
    }
    Ok(())
}
