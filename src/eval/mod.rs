pub mod fast;
pub mod funcs;
pub mod persistent;
pub mod session;

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::fsx;

/// Evaluate an HCL expression in the project's console context and decode the
/// result as JSON. Three paths, in order: the in-process fast path (variables,
/// locals, pure functions), the persistent multiplexed console, and a
/// short-lived `terraform console` against a read-only state snapshot.
/// `None` means the expression is not resolvable right now.
pub async fn eval_json(
    work_dir: &Path,
    state_path: &Path,
    var_files: &[String],
    expr: &str,
    timeout: Duration,
) -> Option<Value> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }
    if let Some(v) = fast::try_eval_in_process(work_dir, var_files, expr) {
        return Some(v);
    }
    let pe = persistent::get_or_start(work_dir, state_path, var_files);
    if let Some(v) = pe.evaluate_json(expr, timeout).await {
        return Some(v);
    }
    eval_json_oneshot(work_dir, state_path, var_files, expr, timeout).await
}

/// Last-resort evaluation: snapshot the state, run a fresh console with the
/// expression wrapped in `jsonencode`, and parse stdout.
async fn eval_json_oneshot(
    work_dir: &Path,
    state_path: &Path,
    var_files: &[String],
    expr: &str,
    timeout: Duration,
) -> Option<Value> {
    let line = format!("jsonencode({expr})");
    // Copy the state so the evaluation never contends with our writer.
    let mut snap = state_path.to_path_buf();
    let mut cleanup = None;
    if state_path.is_file() {
        if let Some(dir) = state_path.parent() {
            let tmp = dir.join(format!(".tfstate-eval-{}", fsx::unix_nanos()));
            if fsx::copy_file_atomic(state_path, &tmp).is_ok() {
                snap = tmp.clone();
                cleanup = Some(tmp);
            }
        }
    }
    let session = session::ConsoleSession::new(work_dir, Some(&snap), var_files);
    let result = session.evaluate(&line, timeout).await;
    if let Some(tmp) = cleanup {
        let _ = fs::remove_file(tmp);
    }
    let (stdout, _stderr) = result.ok()?;
    let out = stdout.trim();
    if out.is_empty() {
        return None;
    }
    serde_json::from_str(out).ok()
}
