use std::fs;

use tempfile::TempDir;
use terraflow::sync::{self, read_manifest, MANIFEST_FILE};

fn write(dir: &TempDir, rel: &str, content: &str) {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_sync_copies_tracked_files_and_is_idempotent() {
    let root = TempDir::new().unwrap();
    write(&root, "main.tf", "resource \"null_resource\" \"ex\" {}\n");
    write(&root, "vars.tfvars", "some_var = \"x\"\n");
    write(&root, "extra.tf.json", "{}\n");
    write(&root, "notes.txt", "ignored\n");
    let scratch = root.path().join(".terraflow");

    let first = sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert!(first.changed);
    assert!(first.changed_tf);
    assert!(scratch.join("main.tf").is_file());
    assert!(scratch.join("vars.tfvars").is_file());
    assert!(scratch.join("extra.tf.json").is_file());
    assert!(!scratch.join("notes.txt").exists());

    // No source changes: second sync reports nothing and rewrites nothing.
    let manifest_before = fs::read(scratch.join(MANIFEST_FILE)).unwrap();
    let second = sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert!(!second.changed);
    assert!(!second.changed_tf);
    let manifest_after = fs::read(scratch.join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest_before, manifest_after);
}

#[test]
fn test_sync_manifest_matches_mirrored_set() {
    let root = TempDir::new().unwrap();
    write(&root, "main.tf", "locals { a = 1 }\n");
    write(&root, "sub/child.tf", "locals { b = 2 }\n");
    let scratch = root.path().join(".terraflow");

    sync::sync_to_scratch(root.path(), &scratch).unwrap();
    let manifest = read_manifest(&scratch.join(MANIFEST_FILE));
    let mut keys: Vec<&String> = manifest.keys().collect();
    keys.sort();
    assert_eq!(keys, ["main.tf", "sub/child.tf"]);
    assert!(scratch.join("sub").join("child.tf").is_file());
}

#[test]
fn test_sync_removes_deleted_files() {
    let root = TempDir::new().unwrap();
    write(&root, "main.tf", "locals { a = 1 }\n");
    write(&root, "old.tf", "locals { b = 2 }\n");
    let scratch = root.path().join(".terraflow");
    sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert!(scratch.join("old.tf").is_file());

    fs::remove_file(root.path().join("old.tf")).unwrap();
    let outcome = sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert!(outcome.changed);
    assert!(outcome.changed_tf);
    assert!(!scratch.join("old.tf").exists());

    let again = sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert!(!again.changed);
    assert!(!again.changed_tf);
}

#[test]
fn test_sync_skips_backend_files_and_internal_dirs() {
    let root = TempDir::new().unwrap();
    write(
        &root,
        "backend.tf",
        "terraform {\n  backend \"local\" {\n    path = \"x\"\n  }\n}\n",
    );
    write(&root, "main.tf", "locals { a = 1 }\n");
    write(&root, ".terraform/modules/mod.tf", "locals { hidden = 1 }\n");
    let scratch = root.path().join(".terraflow");

    let outcome = sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert!(outcome.changed);
    assert!(!scratch.join("backend.tf").exists());
    assert!(!scratch.join(".terraform").join("modules").join("mod.tf").exists());

    // A backend file never triggers a rebuild on later syncs either.
    let again = sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert!(!again.changed);
}

#[test]
fn test_tfvars_change_sets_changed_without_changed_tf() {
    let root = TempDir::new().unwrap();
    write(&root, "main.tf", "locals { a = 1 }\n");
    write(&root, "vars.tfvars", "some_var = \"x\"\n");
    let scratch = root.path().join(".terraflow");
    sync::sync_to_scratch(root.path(), &scratch).unwrap();

    write(&root, "vars.tfvars", "some_var = \"a longer value\"\n");
    let outcome = sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert!(outcome.changed);
    assert!(!outcome.changed_tf);
    assert!(outcome.changed_tf_paths.is_empty());
}

#[test]
fn test_changed_tf_paths_point_into_scratch() {
    let root = TempDir::new().unwrap();
    write(&root, "main.tf", "locals { a = 1 }\n");
    let scratch = root.path().join(".terraflow");
    let outcome = sync::sync_to_scratch(root.path(), &scratch).unwrap();
    assert_eq!(outcome.changed_tf_paths, vec![scratch.join("main.tf")]);
}
