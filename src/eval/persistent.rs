use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

/// Snapshot file consumed by a long-lived evaluator, kept next to the real
/// state so fan-out writes stay on the same filesystem.
pub const SNAPSHOT_FILE: &str = ".tfstate-eval-snapshot.json";

type Waiters = Arc<StdMutex<HashMap<String, oneshot::Sender<String>>>>;

/// One long-lived `terraform console` subprocess multiplexed by correlation
/// id. Expressions are wrapped as `jsonencode({__id=..., __val=(expr)})` so
/// responses can be routed back to their caller regardless of interleaving.
pub struct PersistentEvaluator {
    work_dir: PathBuf,
    real_state: PathBuf,
    var_files: Vec<String>,
    snapshot: StdMutex<Option<PathBuf>>,
    proc: Mutex<Option<Running>>,
    waiters: Waiters,
    closed: Arc<AtomicBool>,
}

struct Running {
    stdin: ChildStdin,
    child: Child,
}

static POOL: Lazy<DashMap<String, Arc<PersistentEvaluator>>> = Lazy::new(DashMap::new);

fn pool_key(work_dir: &Path, state_path: &Path, var_files: &[String]) -> String {
    let mut sorted = var_files.to_vec();
    sorted.sort();
    format!(
        "{}|{}|{}",
        work_dir.display(),
        state_path.display(),
        sorted.join(",")
    )
}

/// Fetch the pool entry for `(work_dir, state_path, var_files)`, creating a
/// fresh evaluator when none exists or the previous one has exited.
pub fn get_or_start(
    work_dir: &Path,
    state_path: &Path,
    var_files: &[String],
) -> Arc<PersistentEvaluator> {
    let key = pool_key(work_dir, state_path, var_files);
    if let Some(existing) = POOL.get(&key) {
        if !existing.closed.load(Ordering::Relaxed) {
            return Arc::clone(&existing);
        }
    }
    let pe = Arc::new(PersistentEvaluator {
        work_dir: work_dir.to_path_buf(),
        real_state: state_path.to_path_buf(),
        var_files: var_files.to_vec(),
        snapshot: StdMutex::new(None),
        proc: Mutex::new(None),
        waiters: Arc::new(StdMutex::new(HashMap::new())),
        closed: Arc::new(AtomicBool::new(false)),
    });
    POOL.insert(key, Arc::clone(&pe));
    pe
}

impl PersistentEvaluator {
    async fn ensure_started(&self, guard: &mut Option<Running>) -> Result<()> {
        if guard.is_some() {
            return Ok(());
        }
        let mut args: Vec<String> = vec!["console".to_string(), "-no-color".to_string()];
        // Evaluate against a snapshot so the live state file is never locked.
        if self.real_state.is_file() {
            if let Some(dir) = self.real_state.parent() {
                let snap = dir.join(SNAPSHOT_FILE);
                if crate::fsx::copy_file_atomic(&self.real_state, &snap).is_ok() {
                    args.push("-state".to_string());
                    args.push(snap.to_string_lossy().to_string());
                    if let Ok(mut s) = self.snapshot.lock() {
                        *s = Some(snap);
                    }
                }
            }
        }
        for vf in &self.var_files {
            if vf.trim().is_empty() {
                continue;
            }
            args.push("-var-file".to_string());
            args.push(vf.clone());
        }
        let mut child = Command::new("terraform")
            .args(&args)
            .current_dir(&self.work_dir)
            .env("TF_IN_AUTOMATION", "1")
            .env("PAGER", "")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawn persistent terraform console")?;
        let stdin = child.stdin.take().context("console stdin unavailable")?;
        let stdout = child.stdout.take().context("console stdout unavailable")?;
        tokio::spawn(read_loop(
            stdout,
            Arc::clone(&self.waiters),
            Arc::clone(&self.closed),
        ));
        *guard = Some(Running { stdin, child });
        Ok(())
    }

    /// Evaluate an expression and decode the `__val` payload. `None` covers
    /// every failure mode: the caller falls back to a short-lived console. A
    /// timeout only unregisters the waiter; the subprocess keeps running.
    pub async fn evaluate_json(&self, expr: &str, timeout: Duration) -> Option<Value> {
        let expr = expr.trim();
        if expr.is_empty() || self.closed.load(Ordering::Relaxed) {
            return None;
        }
        let id = uuid::Uuid::new_v4().to_string();
        let line = format!("jsonencode({{__id=\"{id}\", __val=({expr})}})\n");

        let (tx, rx) = oneshot::channel();
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.insert(id.clone(), tx);
        } else {
            return None;
        }

        // Writes are serialized by the process lock; the reader routes
        // responses by id, so concurrent callers never cross-route.
        let write_ok = {
            let mut guard = self.proc.lock().await;
            match self.ensure_started(&mut guard).await {
                Ok(()) => match guard.as_mut() {
                    Some(running) => running.stdin.write_all(line.as_bytes()).await.is_ok(),
                    None => false,
                },
                Err(err) => {
                    tracing::debug!(error = %err, "persistent evaluator start failed");
                    false
                }
            }
        };
        if !write_ok {
            self.remove_waiter(&id);
            return None;
        }

        let resp = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp,
            _ => {
                self.remove_waiter(&id);
                return None;
            }
        };
        if resp.trim().is_empty() {
            return None;
        }
        let parsed: Value = serde_json::from_str(&resp).ok()?;
        parsed.get("__val").cloned()
    }

    fn remove_waiter(&self, id: &str) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(id);
        }
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let mut guard = self.proc.lock().await;
        if let Some(mut running) = guard.take() {
            let _ = running.stdin.shutdown().await;
            let _ = running.child.start_kill();
            let _ = running.child.wait().await;
        }
        if let Ok(mut waiters) = self.waiters.lock() {
            for (_, tx) in waiters.drain() {
                let _ = tx.send(String::new());
            }
        }
    }
}

/// Classify one console stdout line: whitespace is trimmed, empty and prompt
/// lines are skipped, and only JSON objects carrying an `__id` are routable.
/// Everything else (banners, warnings, partial output) is ignored.
pub fn parse_console_line(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line == ">" {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let id = value.get("__id")?.as_str()?;
    if id.is_empty() {
        return None;
    }
    Some((id.to_string(), line.to_string()))
}

async fn read_loop(stdout: ChildStdout, waiters: Waiters, closed: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(raw)) = lines.next_line().await {
        let Some((id, line)) = parse_console_line(&raw) else {
            continue;
        };
        let sender = waiters.lock().ok().and_then(|mut w| w.remove(&id));
        if let Some(tx) = sender {
            let _ = tx.send(line);
        }
    }
    // Process exited: fail every outstanding waiter with an empty response.
    closed.store(true, Ordering::Relaxed);
    if let Ok(mut w) = waiters.lock() {
        for (_, tx) in w.drain() {
            let _ = tx.send(String::new());
        }
    }
}

/// Tear down the evaluator for one pool key so the next use restarts it.
pub async fn reset(work_dir: &Path, state_path: &Path, var_files: &[String]) {
    let key = pool_key(work_dir, state_path, var_files);
    if let Some((_, pe)) = POOL.remove(&key) {
        pe.close().await;
    }
}

/// Shut down every evaluator in the pool.
pub async fn reset_all() {
    let keys: Vec<String> = POOL.iter().map(|e| e.key().clone()).collect();
    for key in keys {
        if let Some((_, pe)) = POOL.remove(&key) {
            pe.close().await;
        }
    }
}

/// Overwrite the snapshot of every evaluator bound to `real_state` with the
/// freshly written state bytes, atomically, so running consoles pick up the
/// change without a restart.
pub fn update_snapshots(real_state: &Path, bytes: &[u8]) {
    for entry in POOL.iter() {
        let pe = entry.value();
        if pe.closed.load(Ordering::Relaxed) || pe.real_state != real_state {
            continue;
        }
        if let Some(snap) = pe.snapshot_path() {
            if let Err(err) = crate::fsx::write_atomic(&snap, bytes) {
                tracing::debug!(error = %err, "snapshot refresh failed");
            }
        }
    }
}
