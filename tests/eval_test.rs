use std::fs;

use serde_json::json;
use tempfile::TempDir;
use terraflow::eval::fast::{try_eval_in_process, FastEvalData};
use terraflow::eval::persistent::parse_console_line;
use terraflow::scan;

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

#[test]
fn test_variable_default_resolution() {
    let dir = project(&[(
        "main.tf",
        "variable \"some_var\" {\n  default = \"initial\"\n}\n",
    )]);
    let v = try_eval_in_process(dir.path(), &[], "var.some_var").unwrap();
    assert_eq!(v, json!("initial"));
}

#[test]
fn test_var_file_overrides_default() {
    let dir = project(&[
        ("main.tf", "variable \"some_var\" {\n  default = \"initial\"\n}\n"),
        ("override.tfvars", "some_var = \"changed\"\n"),
    ]);
    let vf = dir
        .path()
        .join("override.tfvars")
        .to_string_lossy()
        .to_string();
    let v = try_eval_in_process(dir.path(), &[vf], "var.some_var").unwrap();
    assert_eq!(v, json!("changed"));
}

#[test]
fn test_pure_function_calls() {
    let dir = project(&[("main.tf", "variable \"unused\" {\n  default = 1\n}\n")]);
    let cases = vec![
        ("upper(\"hello world\")", json!("HELLO WORLD")),
        ("lower(\"ABC\")", json!("abc")),
        ("join(\"-\", [\"a\", \"b\"])", json!("a-b")),
        ("replace(\"a.b.c\", \".\", \"/\")", json!("a/b/c")),
        ("coalesce(\"\", \"fallback\")", json!("fallback")),
        ("format(\"%s=%d\", \"n\", 4)", json!("n=4")),
        ("concat([1], [2, 3])", json!([1.0, 2.0, 3.0])),
    ];
    for (expr, want) in cases {
        let got = try_eval_in_process(dir.path(), &[], expr)
            .unwrap_or_else(|| panic!("{expr} did not evaluate"));
        assert_eq!(got, want, "{expr}");
    }
}

#[test]
fn test_locals_fixed_point_resolution() {
    let dir = project(&[(
        "main.tf",
        concat!(
            "variable \"base\" {\n  default = \"svc\"\n}\n",
            "locals {\n  name = upper(var.base)\n  tagged = \"${local.name}\"\n  doubled = join(\"-\", [local.tagged, local.name])\n}\n",
        ),
    )]);
    let data = FastEvalData::load(dir.path(), &[]);
    assert_eq!(data.eval("local.name"), Some(json!("SVC")));
    assert_eq!(data.eval("local.doubled"), Some(json!("SVC-SVC")));
}

#[test]
fn test_unknown_references_fall_back() {
    let dir = project(&[("main.tf", "variable \"known\" {\n  default = 1\n}\n")]);
    assert!(try_eval_in_process(dir.path(), &[], "var.missing").is_none());
    assert!(try_eval_in_process(dir.path(), &[], "null_resource.x.id").is_none());
    assert!(try_eval_in_process(dir.path(), &[], "nonexistent_func(1)").is_none());
    assert!(try_eval_in_process(dir.path(), &[], "").is_none());
    assert!(try_eval_in_process(dir.path(), &[], "var.known +").is_none());
}

#[test]
fn test_type_errors_fail_the_fast_path() {
    let dir = project(&[("main.tf", "variable \"n\" {\n  default = 5\n}\n")]);
    assert!(try_eval_in_process(dir.path(), &[], "upper([var.n])").is_none());
    assert!(try_eval_in_process(dir.path(), &[], "join(\"-\", [1, 2])").is_none());
}

#[test]
fn test_const_value_accepts_only_literals() {
    assert_eq!(scan::const_value("\"x\""), Some(json!("x")));
    assert_eq!(scan::const_value("[1, 2]"), Some(json!([1.0, 2.0])));
    assert_eq!(
        scan::const_value("{ a = true }"),
        Some(json!({"a": true}))
    );
    assert!(scan::const_value("var.x").is_none());
    assert!(scan::const_value("upper(\"x\")").is_none());
    assert!(scan::const_value("\"${var.x}\"").is_none());
}

#[test]
fn test_console_line_routing_by_id() {
    // Only JSON lines carrying __id route; banners and prompts never do.
    assert!(parse_console_line("").is_none());
    assert!(parse_console_line("  > ").is_none());
    assert!(parse_console_line("Warning: something").is_none());
    assert!(parse_console_line("{\"no_id\": 1}").is_none());

    let (id, line) = parse_console_line("  {\"__id\":\"abc\",\"__val\":42}  ").unwrap();
    assert_eq!(id, "abc");
    let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["__val"], json!(42));

    // Two interleaved responses carry distinct ids and never cross-route.
    let (id1, _) = parse_console_line("{\"__id\":\"first\",\"__val\":1}").unwrap();
    let (id2, _) = parse_console_line("{\"__id\":\"second\",\"__val\":2}").unwrap();
    assert_ne!(id1, id2);
}
