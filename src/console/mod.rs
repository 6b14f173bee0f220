use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::eval;
use crate::fsx;
use crate::index;
use crate::repl::{self, Printer, ReplOptions};
use crate::repl::helper::SharedIndex;
use crate::state;
use crate::sync;
use crate::watch;

const WARMUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for `terraflow console`.
#[derive(Debug, Default, Clone)]
pub struct ConsoleOptions {
    pub var_files: Vec<String>,
    pub backend_configs: Vec<String>,
    pub pull_remote_state: bool,
}

/// Start the live console: prepare the scratch workspace, hydrate state and
/// the symbol index, spawn the watcher/refresher pipeline and hand the
/// foreground to the REPL. Optional subsystems that fail log a warning and
/// the console continues with partial data.
pub async fn run(opts: ConsoleOptions) -> Result<()> {
    let root = std::env::current_dir().context("get working dir")?;
    let scratch = root.join(".terraflow");
    let state_path = scratch.join("terraform.tfstate");
    let module_cache = scratch.join("modules");

    tracing::info!("starting terraflow console (TAB completion, history; auto-refresh on .tf/.tfvars)");

    if !opts.backend_configs.is_empty() {
        if let Err(err) = sync::init_with_backend_config(&root, &opts.backend_configs).await {
            tracing::warn!(error = %err, "init with backend config failed");
        }
    }
    if opts.pull_remote_state {
        if let Err(err) = pull_remote_state(&root, &state_path).await {
            tracing::warn!(error = %err, "unable to pull remote state");
        }
    }
    if let Err(err) = sync::sync_to_scratch(&root, &scratch) {
        tracing::warn!(error = %err, "sync to scratch failed");
    }
    if let Err(err) = sync::mirror_provider_dir(&root, &scratch).await {
        tracing::warn!(error = %err, "provider mirror failed");
    }
    if let Err(err) = index::functions::ensure_functions_cached(&scratch).await {
        tracing::warn!(error = %err, "unable to cache function names");
    }

    let var_files = normalize_var_files(&scratch, &opts.var_files);

    match state::ensure_initialized(&state_path) {
        Err(err) => tracing::warn!(error = %err, "ensure local state failed"),
        Ok(()) => {
            // Hydrate non-literal attribute values before the first prompt.
            if let Err(err) =
                state::patch_evaluated_fast(&scratch, &scratch, &state_path, &var_files).await
            {
                tracing::warn!(error = %err, "evaluated state patch failed");
            }
        }
    }

    fetch_remote_modules(&root, &module_cache).await;
    let shared: SharedIndex = Arc::new(RwLock::new(Arc::new(
        build_index(&root, &scratch, &module_cache).await,
    )));

    let (refresh_tx, refresh_rx) = mpsc::channel::<()>(1);
    let _watch_handle = match watch::spawn_event_watcher(
        &root,
        watch::DEFAULT_DEBOUNCE,
        refresh_tx.clone(),
    ) {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "event watcher unavailable, polling instead");
            watch::spawn_poll_watcher(
                &root,
                watch::DEFAULT_POLL_INTERVAL,
                watch::DEFAULT_DEBOUNCE,
                refresh_tx.clone(),
            );
            None
        }
    };
    drop(refresh_tx);

    // Prime the persistent evaluator so the first real expression is fast.
    {
        let scratch = scratch.clone();
        let state_path = state_path.clone();
        let var_files = var_files.clone();
        tokio::spawn(async move {
            let pe = eval::persistent::get_or_start(&scratch, &state_path, &var_files);
            let _ = pe.evaluate_json("1", WARMUP_TIMEOUT).await;
        });
    }

    let (printer_tx, printer_rx) = std_mpsc::channel::<Printer>();
    let refresher = tokio::spawn(refresher_loop(
        root.clone(),
        scratch.clone(),
        state_path.clone(),
        var_files.clone(),
        module_cache.clone(),
        Arc::clone(&shared),
        refresh_rx,
        printer_rx,
    ));

    let handle = tokio::runtime::Handle::current();
    let repl_opts = ReplOptions {
        scratch_dir: scratch.clone(),
        state_path: state_path.clone(),
        var_files: var_files.clone(),
        index: shared,
    };
    let result = tokio::task::spawn_blocking(move || repl::run(handle, repl_opts, printer_tx))
        .await
        .context("repl task")?;

    refresher.abort();
    eval::persistent::reset_all().await;
    result
}

async fn build_index(root: &Path, scratch: &Path, module_cache: &Path) -> index::SymbolIndex {
    let (mut idx, errors) = index::build_symbol_index(root, Some(module_cache));
    for err in errors {
        tracing::debug!(error = %err, "symbol index");
    }
    idx.functions = index::functions::load_functions(scratch);
    if let Err(err) = index::schema::enrich_from_provider_schemas(scratch, &mut idx).await {
        tracing::debug!(error = %err, "provider schema enrichment unavailable");
    }
    idx
}

async fn fetch_remote_modules(root: &Path, module_cache: &Path) {
    for (name, source) in index::module_sources(root) {
        if let Err(err) = index::modfetch::resolve_or_fetch(&source, module_cache).await {
            tracing::debug!(module = %name, error = %err, "module fetch failed");
        }
    }
}

/// One iteration per watcher tick: sync the scratch mirror, patch literal
/// state synchronously, then evaluated state (targeted at the changed files
/// when `.tf` files changed, a full evaluated pass for var-file-only edits),
/// rebuild the symbol index when `.tf` files changed, and only then notify
/// the REPL.
#[allow(clippy::too_many_arguments)]
async fn refresher_loop(
    root: PathBuf,
    scratch: PathBuf,
    state_path: PathBuf,
    var_files: Vec<String>,
    module_cache: PathBuf,
    shared: SharedIndex,
    mut refresh_rx: mpsc::Receiver<()>,
    printer_rx: std_mpsc::Receiver<Printer>,
) {
    let mut printer: Option<Printer> = None;
    while refresh_rx.recv().await.is_some() {
        if printer.is_none() {
            if let Ok(p) = printer_rx.try_recv() {
                printer = Some(p);
            }
        }
        let outcome = match sync::sync_to_scratch(&root, &scratch) {
            Ok(o) => o,
            Err(err) => {
                // Fall through to the next refresh signal.
                tracing::warn!(error = %err, "sync to scratch failed");
                continue;
            }
        };
        if !outcome.changed {
            continue;
        }
        if let Err(err) = state::patch_literals(&scratch, &state_path) {
            tracing::warn!(error = %err, "literal state patch failed");
        }
        if outcome.changed_tf {
            if let Err(err) = state::patch_targeted_exact_by_files(
                &scratch,
                &state_path,
                &var_files,
                &outcome.changed_tf_paths,
            )
            .await
            {
                tracing::warn!(error = %err, "targeted state patch failed");
            }
            fetch_remote_modules(&root, &module_cache).await;
            let (mut idx, _) = index::build_symbol_index(&root, Some(&module_cache));
            idx.functions = index::functions::load_functions(&scratch);
            if let Ok(mut guard) = shared.write() {
                *guard = Arc::new(idx);
            }
        } else if let Err(err) =
            state::patch_evaluated_fast(&scratch, &scratch, &state_path, &var_files).await
        {
            tracing::warn!(error = %err, "evaluated state patch failed");
        }
        if let Some(p) = printer.as_mut() {
            let _ = p.print("\x1b[2m[refresh] configuration reloaded\x1b[0m".to_string());
        }
    }
}

/// Pull remote state once: initialize the project so the backend is
/// configured, run `state pull`, and write the result atomically into the
/// scratch state file (dir 0700, file 0600).
async fn pull_remote_state(work_dir: &Path, state_path: &Path) -> Result<()> {
    let dir = state_path.parent().context("state path has no parent")?;
    fsx::ensure_dir(dir).context("create state dir")?;
    let status = Command::new("terraform")
        .args(["init", "-input=false"])
        .current_dir(work_dir)
        .env("TF_IN_AUTOMATION", "1")
        .env("PAGER", "")
        .status()
        .await
        .context("spawn terraform init")?;
    if !status.success() {
        anyhow::bail!("terraform init exited with {status}");
    }
    let output = Command::new("terraform")
        .args(["state", "pull", "-no-color"])
        .current_dir(work_dir)
        .env("TF_IN_AUTOMATION", "1")
        .env("PAGER", "")
        .output()
        .await
        .context("spawn terraform state pull")?;
    if !output.status.success() {
        anyhow::bail!("terraform state pull exited with {}", output.status);
    }
    fsx::write_atomic(state_path, &output.stdout).context("finalize state")
}

/// Resolve var-file paths for use from the scratch directory: absolute paths
/// pass through, relative paths prefer the scratch copy when present and fall
/// back to the original.
pub fn normalize_var_files(scratch_dir: &Path, var_files: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(var_files.len());
    for vf in var_files {
        let vf = vf.trim();
        if vf.is_empty() {
            continue;
        }
        if Path::new(vf).is_absolute() {
            out.push(vf.to_string());
            continue;
        }
        let scratch_copy = scratch_dir.join(vf);
        if scratch_copy.exists() {
            out.push(scratch_copy.to_string_lossy().to_string());
        } else {
            out.push(vf.to_string());
        }
    }
    out
}
