use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::sync::is_tracked_file;

/// Default quiet period between a detected change and the emitted signal.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(75);
/// Default scan interval for the polling implementation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Keeps the OS watcher registration alive; dropping it stops event delivery
/// and lets the forwarding task wind down.
pub struct EventWatcherHandle {
    _watcher: RecommendedWatcher,
}

fn in_skipped_tree(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some(".terraform") | Some(".terraflow")
        )
    })
}

fn event_is_tracked(event: &notify::Event) -> bool {
    event
        .paths
        .iter()
        .any(|p| is_tracked_file(p) && !in_skipped_tree(p))
}

/// Subscribe to filesystem events under `root` and forward a debounced signal
/// whenever a tracked file changes. The signal channel is single-slot and
/// non-blocking: signals arriving while one is pending are dropped, so rapid
/// edit bursts coalesce. The task stops when the receiver side closes.
pub fn spawn_event_watcher(
    root: &Path,
    debounce: Duration,
    tx: mpsc::Sender<()>,
) -> Result<EventWatcherHandle> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Event>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(err) => tracing::warn!(error = %err, "watch error"),
        }
    })
    .context("create filesystem watcher")?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .context("register watch root")?;

    tokio::spawn(async move {
        let mut pending = false;
        loop {
            let step = tokio::time::timeout(debounce, event_rx.recv()).await;
            match step {
                Ok(Some(event)) => {
                    if event_is_tracked(&event) {
                        pending = true;
                    }
                }
                Ok(None) => return,
                Err(_) => {
                    // Quiet period elapsed.
                    if pending {
                        if let Err(mpsc::error::TrySendError::Closed(())) = tx.try_send(()) {
                            return;
                        }
                        pending = false;
                    }
                }
            }
        }
    });

    Ok(EventWatcherHandle { _watcher: watcher })
}

fn scan_tracked(root: &Path) -> HashMap<PathBuf, (i64, u64)> {
    let mut seen = HashMap::new();
    for entry in WalkDir::new(root).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && matches!(
                e.file_name().to_str(),
                Some(".terraform") | Some(".terraflow")
            ))
    }) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() || !is_tracked_file(entry.path()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        seen.insert(
            entry.path().to_path_buf(),
            (crate::fsx::mod_unix_nanos(&meta), meta.len()),
        );
    }
    seen
}

/// Polling fallback with the same output contract as the event-driven
/// watcher: scans tracked files on a fixed interval, compares against the
/// last-seen map, and emits one debounced signal per burst of changes.
pub fn spawn_poll_watcher(
    root: &Path,
    interval: Duration,
    debounce: Duration,
    tx: mpsc::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let root = root.to_path_buf();
    tokio::spawn(async move {
        let mut last_seen = scan_tracked(&root);
        let mut pending_since: Option<tokio::time::Instant> = None;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.is_closed() {
                return;
            }
            let current = scan_tracked(&root);
            if current != last_seen {
                last_seen = current;
                pending_since.get_or_insert_with(tokio::time::Instant::now);
            }
            if let Some(since) = pending_since {
                if since.elapsed() >= debounce {
                    if let Err(mpsc::error::TrySendError::Closed(())) = tx.try_send(()) {
                        return;
                    }
                    pending_since = None;
                }
            }
        }
    })
}
