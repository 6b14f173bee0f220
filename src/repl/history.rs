use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Persistent REPL history: one executed command per line, LF-terminated,
/// appended on submit. Multi-line input is normalized to a single line before
/// it reaches this store.
pub struct History {
    path: PathBuf,
    entries: Vec<String>,
}

impl History {
    /// Load existing history; a missing file is an empty history.
    pub fn load(path: &Path) -> Self {
        let entries = fs::read_to_string(path)
            .map(|src| {
                src.split('\n')
                    .map(|l| l.trim_end_matches('\r'))
                    .filter(|l| !l.trim().is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Record an executed command, skipping consecutive duplicates, and
    /// append it to the history file.
    pub fn record(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() || self.entries.last().map(String::as_str) == Some(line) {
            return Ok(());
        }
        self.entries.push(line.to_string());
        if let Some(dir) = self.path.parent() {
            crate::fsx::ensure_dir(dir)?;
        }
        let existed = self.path.exists();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open history {}", self.path.display()))?;
        if !existed {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
            }
        }
        writeln!(file, "{line}").context("append history")?;
        Ok(())
    }
}
