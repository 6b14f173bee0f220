use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

use terraflow::watch::spawn_poll_watcher;

const INTERVAL: Duration = Duration::from_millis(25);
const DEBOUNCE: Duration = Duration::from_millis(50);

async fn expect_signal(rx: &mut mpsc::Receiver<()>) {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no refresh signal within deadline")
        .expect("watcher channel closed");
}

#[tokio::test]
async fn test_poll_watcher_signals_on_tracked_change() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("main.tf"), "locals { a = 1 }\n").unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    spawn_poll_watcher(root.path(), INTERVAL, DEBOUNCE, tx);

    // Let the watcher take its baseline scan before mutating.
    tokio::time::sleep(INTERVAL * 3).await;
    fs::write(root.path().join("main.tf"), "locals { a = 2, b = 3 }\n").unwrap();
    expect_signal(&mut rx).await;
}

#[tokio::test]
async fn test_poll_watcher_coalesces_rapid_edits() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("main.tf"), "locals { a = 0 }\n").unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    spawn_poll_watcher(root.path(), INTERVAL, DEBOUNCE, tx);
    tokio::time::sleep(INTERVAL * 3).await;

    // A burst of edits inside one debounce window coalesces: the single-slot
    // channel holds at most one pending signal.
    for i in 1..=10 {
        fs::write(
            root.path().join("main.tf"),
            format!("locals {{ a = {i} }}\n{}", "#".repeat(i)),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    expect_signal(&mut rx).await;

    // Drain whatever the tail of the burst produced, then confirm silence.
    tokio::time::sleep(DEBOUNCE * 4).await;
    while rx.try_recv().is_ok() {}
    tokio::time::sleep(DEBOUNCE * 4).await;
    assert!(
        rx.try_recv().is_err(),
        "watcher kept signalling without changes"
    );
}

#[tokio::test]
async fn test_poll_watcher_ignores_untracked_and_internal_files() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("main.tf"), "locals { a = 1 }\n").unwrap();
    fs::create_dir_all(root.path().join(".terraflow")).unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    spawn_poll_watcher(root.path(), INTERVAL, DEBOUNCE, tx);
    tokio::time::sleep(INTERVAL * 3).await;

    fs::write(root.path().join("notes.txt"), "irrelevant").unwrap();
    fs::write(root.path().join(".terraflow").join("x.tf"), "locals { b = 2 }\n").unwrap();
    tokio::time::sleep(DEBOUNCE * 4).await;
    assert!(rx.try_recv().is_err(), "untracked change produced a signal");
}

#[tokio::test]
async fn test_poll_watcher_stops_when_receiver_drops() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("main.tf"), "locals { a = 1 }\n").unwrap();
    let (tx, rx) = mpsc::channel(1);
    let handle = spawn_poll_watcher(root.path(), INTERVAL, DEBOUNCE, tx);
    drop(rx);
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("watcher did not terminate after receiver closed")
        .unwrap();
}

#[tokio::test]
async fn test_poll_watcher_detects_deletions() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("main.tf"), "locals { a = 1 }\n").unwrap();
    fs::write(root.path().join("extra.tf"), "locals { b = 2 }\n").unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    spawn_poll_watcher(root.path(), INTERVAL, DEBOUNCE, tx);
    tokio::time::sleep(INTERVAL * 3).await;

    fs::remove_file(root.path().join("extra.tf")).unwrap();
    expect_signal(&mut rx).await;
}
