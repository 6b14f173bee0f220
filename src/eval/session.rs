use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A short-lived `terraform console` invocation bound to a working directory,
/// an optional read-only state snapshot and a set of var-files. Each
/// evaluation spawns a fresh process, writes one line to stdin and collects
/// both output streams.
pub struct ConsoleSession {
    work_dir: PathBuf,
    state_path: Option<PathBuf>,
    var_files: Vec<String>,
}

impl ConsoleSession {
    pub fn new(work_dir: &Path, state_path: Option<&Path>, var_files: &[String]) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            state_path: state_path.map(Path::to_path_buf),
            var_files: var_files.to_vec(),
        }
    }

    /// Evaluate one line and return `(stdout, stderr)` verbatim. A non-zero
    /// exit that still produced output counts as successful delivery so
    /// Terraform's own diagnostics reach the user unchanged; a timeout is an
    /// error and kills the process.
    pub async fn evaluate(&self, line: &str, timeout: Duration) -> Result<(String, String)> {
        let mut args: Vec<String> = vec!["console".to_string(), "-no-color".to_string()];
        if let Some(sp) = &self.state_path {
            if sp.is_file() {
                args.push("-state".to_string());
                args.push(sp.to_string_lossy().to_string());
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
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawn terraform console")?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{line}\n").as_bytes())
                .await
                .context("write expression")?;
            // Dropping stdin sends EOF so the console evaluates and exits.
        }
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.context("collect console output")?,
            Err(_) => anyhow::bail!("terraform console evaluation timed out"),
        };
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() && stdout.is_empty() && stderr.is_empty() {
            anyhow::bail!("terraform console exited with {}", output.status);
        }
        Ok((stdout, stderr))
    }
}
