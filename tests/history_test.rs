use std::fs;

use tempfile::TempDir;
use terraflow::repl::history::History;

#[test]
fn test_history_appends_one_line_per_command() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".terraflow_history");
    let mut history = History::load(&path);
    history.record("var.a").unwrap();
    history.record("upper(\"x\")").unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "var.a\nupper(\"x\")\n");
}

#[test]
fn test_history_skips_consecutive_duplicates_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".terraflow_history");
    let mut history = History::load(&path);
    history.record("var.a").unwrap();
    history.record("var.a").unwrap();
    history.record("var.b").unwrap();
    history.record("var.a").unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "var.a\nvar.b\nvar.a\n");
}

#[test]
fn test_history_reloads_existing_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".terraflow_history");
    fs::write(&path, "first\nsecond\r\n\n").unwrap();

    let history = History::load(&path);
    assert_eq!(history.entries(), ["first", "second"]);

    // Deduplication considers the reloaded tail.
    let mut history = history;
    history.record("second").unwrap();
    history.record("third").unwrap();
    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "first\nsecond\r\n\nthird\n");
}

#[test]
fn test_blank_lines_never_recorded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".terraflow_history");
    let mut history = History::load(&path);
    history.record("   ").unwrap();
    assert!(!path.exists());
}
