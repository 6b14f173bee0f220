use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;
use terraflow::scan;
use terraflow::state::{
    self, deep_equal_jsonish, provider_address_for_type, sanitize_value,
};

fn read_state(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

fn serial(state: &Value) -> i64 {
    state["serial"].as_i64().unwrap()
}

fn resources(state: &Value) -> &Vec<Value> {
    state["resources"].as_array().unwrap()
}

#[test]
fn test_ensure_initialized_creates_minimal_state_once() {
    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join(".terraflow").join("terraform.tfstate");
    state::ensure_initialized(&state_path).unwrap();

    let st = read_state(&state_path);
    assert_eq!(st["version"], json!(4));
    assert_eq!(st["serial"], json!(1));
    assert!(st["lineage"].as_str().map(|l| !l.is_empty()).unwrap_or(false));
    assert!(st["outputs"].is_object());
    assert_eq!(resources(&st).len(), 0);

    // A second call must leave the file (and its lineage) untouched.
    let before = fs::read(&state_path).unwrap();
    state::ensure_initialized(&state_path).unwrap();
    assert_eq!(before, fs::read(&state_path).unwrap());
}

#[test]
fn test_patch_literals_adds_root_and_child_module_resources() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("main.tf"),
        "module \"child\" { source = \"./child\" }\nresource \"null_resource\" \"root_ex\" {\n  triggers = { a = \"x\" }\n}\n",
    )
    .unwrap();
    fs::create_dir_all(root.path().join("child")).unwrap();
    fs::write(
        root.path().join("child").join("main.tf"),
        "resource \"null_resource\" \"child_ex\" {\n  triggers = { b = \"y\" }\n}\n",
    )
    .unwrap();

    let state_path = root.path().join(".terraflow").join("terraform.tfstate");
    state::patch_literals(root.path(), &state_path).unwrap();

    let st = read_state(&state_path);
    let res = resources(&st);
    assert_eq!(res.len(), 2);
    let mut found_root = false;
    let mut found_child = false;
    for r in res {
        assert_eq!(r["mode"], json!("managed"));
        let provider = r["provider"].as_str().unwrap();
        assert!(
            provider.starts_with("provider[\"registry.terraform.io/hashicorp/null"),
            "unexpected provider {provider}"
        );
        match r["name"].as_str().unwrap() {
            "root_ex" => {
                assert!(r.get("module").is_none());
                assert_eq!(r["instances"][0]["attributes"]["triggers"]["a"], json!("x"));
                found_root = true;
            }
            "child_ex" => {
                assert_eq!(r["module"], json!("module.child"));
                assert_eq!(r["instances"][0]["attributes"]["triggers"]["b"], json!("y"));
                found_child = true;
            }
            other => panic!("unexpected resource {other}"),
        }
    }
    assert!(found_root && found_child);
}

#[test]
fn test_patch_literals_updates_only_changed_resource_and_bumps_serial() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("main.tf"),
        "module \"child\" { source = \"./child\" }\nresource \"null_resource\" \"root_ex\" {\n  triggers = { a = \"x\" }\n}\n",
    )
    .unwrap();
    fs::create_dir_all(root.path().join("child")).unwrap();
    fs::write(
        root.path().join("child").join("main.tf"),
        "resource \"null_resource\" \"child_ex\" {\n  triggers = { b = \"y\" }\n}\n",
    )
    .unwrap();

    let state_path = root.path().join(".terraflow").join("terraform.tfstate");
    state::patch_literals(root.path(), &state_path).unwrap();
    let before = read_state(&state_path);

    scan::reset_parse_cache();
    fs::write(
        root.path().join("main.tf"),
        "module \"child\" { source = \"./child\" }\nresource \"null_resource\" \"root_ex\" {\n  triggers = { a = \"z\" }\n}\n",
    )
    .unwrap();
    state::patch_literals(root.path(), &state_path).unwrap();
    let after = read_state(&state_path);

    assert!(serial(&after) > serial(&before));
    for r in resources(&after) {
        match r["name"].as_str().unwrap() {
            "root_ex" => {
                assert_eq!(r["instances"][0]["attributes"]["triggers"]["a"], json!("z"))
            }
            "child_ex" => {
                assert_eq!(r["instances"][0]["attributes"]["triggers"]["b"], json!("y"))
            }
            other => panic!("unexpected resource {other}"),
        }
    }
}

#[test]
fn test_patch_literals_without_changes_keeps_serial_and_bytes() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("main.tf"),
        "resource \"null_resource\" \"ex\" {\n  triggers = { a = \"x\" }\n}\n",
    )
    .unwrap();
    let state_path = root.path().join(".terraflow").join("terraform.tfstate");
    state::patch_literals(root.path(), &state_path).unwrap();
    let bytes_before = fs::read(&state_path).unwrap();

    state::patch_literals(root.path(), &state_path).unwrap();
    let bytes_after = fs::read(&state_path).unwrap();
    assert_eq!(bytes_before, bytes_after);
}

#[test]
fn test_patch_fills_missing_provider_on_existing_resource() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("main.tf"),
        "resource \"null_resource\" \"ex\" {\n  triggers = { a = \"x\" }\n}\n",
    )
    .unwrap();
    let state_path = root.path().join(".terraflow").join("terraform.tfstate");
    // Pre-seed a state whose resource has no provider field.
    fs::create_dir_all(state_path.parent().unwrap()).unwrap();
    fs::write(
        &state_path,
        serde_json::to_vec(&json!({
            "version": 4,
            "serial": 3,
            "lineage": "fixed",
            "outputs": {},
            "resources": [{
                "mode": "managed",
                "type": "null_resource",
                "name": "ex",
                "instances": [{"attributes": {}, "schema_version": 0}]
            }]
        }))
        .unwrap(),
    )
    .unwrap();

    state::patch_literals(root.path(), &state_path).unwrap();
    let st = read_state(&state_path);
    for r in resources(&st) {
        let provider = r["provider"].as_str().unwrap();
        assert!(!provider.is_empty());
    }
}

#[test]
fn test_sanitize_value_expands_stringified_json_and_is_idempotent() {
    let cases = vec![
        json!("{\"a\": 1, \"b\": [true, null]}"),
        json!("\"quoted\""),
        json!("  plain text  "),
        json!(["[1, 2]", "x"]),
        json!({"nested": "{\"k\": \"v\"}"}),
        json!(42.5),
        json!(null),
    ];
    for case in cases {
        let once = sanitize_value(case.clone());
        let twice = sanitize_value(once.clone());
        assert_eq!(once, twice, "sanitize not idempotent for {case}");
    }

    let v = sanitize_value(json!("{\"a\": 1}"));
    assert_eq!(v, json!({"a": 1}));
    let v = sanitize_value(json!("\"hello\""));
    assert_eq!(v, json!("hello"));
    let v = sanitize_value(json!("not json {"));
    assert_eq!(v, json!("not json {"));
}

#[test]
fn test_deep_equal_jsonish_numeric_representations() {
    assert!(deep_equal_jsonish(&json!(1), &json!(1.0)));
    assert!(deep_equal_jsonish(&json!([1, "a"]), &json!([1.0, "a"])));
    assert!(deep_equal_jsonish(&json!(null), &json!(null)));
    assert!(!deep_equal_jsonish(&json!(null), &json!("null")));
    assert!(!deep_equal_jsonish(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    assert!(deep_equal_jsonish(
        &json!({"a": {"b": 2}}),
        &json!({"a": {"b": 2.0}})
    ));
}

#[test]
fn test_provider_address_for_type() {
    assert_eq!(
        provider_address_for_type("azurerm_kubernetes_cluster"),
        "provider[\"registry.terraform.io/hashicorp/azurerm\"]"
    );
    assert_eq!(
        provider_address_for_type("null_resource"),
        "provider[\"registry.terraform.io/hashicorp/null\"]"
    );
    assert_eq!(
        provider_address_for_type("noclue"),
        "provider[\"registry.terraform.io/hashicorp/noclue\"]"
    );
}

#[test]
fn test_nested_blocks_collected_as_literal_groups() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("main.tf"),
        "resource \"aws_security_group\" \"sg\" {\n  name = \"web\"\n  ingress {\n    from_port = 80\n    to_port = 80\n  }\n  ingress {\n    from_port = 443\n    to_port = 443\n  }\n}\n",
    )
    .unwrap();
    let state_path = root.path().join(".terraflow").join("terraform.tfstate");
    state::patch_literals(root.path(), &state_path).unwrap();

    let st = read_state(&state_path);
    let attrs = &resources(&st)[0]["instances"][0]["attributes"];
    assert_eq!(attrs["name"], json!("web"));
    let ingress = attrs["ingress"].as_array().unwrap();
    assert_eq!(ingress.len(), 2);
    assert_eq!(ingress[0]["from_port"], json!(80.0));
}
