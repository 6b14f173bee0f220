use std::fs;

use tempfile::TempDir;
use terraflow::index::{build_symbol_index, functions};

#[test]
fn test_build_symbol_index_collects_all_categories() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("main.tf"),
        concat!(
            "variable \"some_var\" {\n  default = \"initial\"\n}\n",
            "output \"some_var_upper\" {\n  value = upper(var.some_var)\n}\n",
            "locals {\n  greeting = \"hi\"\n  count_of = 3\n}\n",
            "module \"network\" {\n  source = \"./network\"\n}\n",
            "resource \"aws_s3_bucket\" \"app\" {\n  bucket = \"b\"\n  tags = { env = \"dev\" }\n}\n",
            "data \"aws_iam_policy\" \"readonly\" {\n  arn = \"x\"\n}\n",
        ),
    )
    .unwrap();
    fs::create_dir_all(root.path().join("network")).unwrap();
    fs::write(
        root.path().join("network").join("main.tf"),
        "variable \"cidr\" {\n  default = \"10.0.0.0/16\"\n}\nresource \"aws_vpc\" \"this\" {\n  cidr_block = var.cidr\n}\n",
    )
    .unwrap();

    let (idx, errors) = build_symbol_index(root.path(), None);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(idx.variables, vec!["cidr", "some_var"]);
    assert_eq!(idx.outputs, vec!["some_var_upper"]);
    assert_eq!(idx.locals, vec!["count_of", "greeting"]);
    assert_eq!(idx.modules, vec!["network"]);
    assert_eq!(idx.resources["aws_s3_bucket"], vec!["app"]);
    assert_eq!(idx.resources["aws_vpc"], vec!["this"]);
    assert_eq!(idx.data_sources["aws_iam_policy"], vec!["readonly"]);
    assert_eq!(idx.resource_attrs["aws_s3_bucket"], vec!["bucket", "tags"]);
    assert_eq!(idx.data_attrs["aws_iam_policy"], vec!["arn"]);
}

#[test]
fn test_build_symbol_index_is_deterministic() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("a.tf"),
        "variable \"zeta\" {}\nvariable \"alpha\" {}\n",
    )
    .unwrap();
    fs::write(
        root.path().join("b.tf"),
        "variable \"mid\" {}\nresource \"null_resource\" \"b\" {}\nresource \"null_resource\" \"a\" {}\n",
    )
    .unwrap();

    let (first, _) = build_symbol_index(root.path(), None);
    let (second, _) = build_symbol_index(root.path(), None);
    assert_eq!(first.variables, second.variables);
    assert_eq!(first.variables, vec!["alpha", "mid", "zeta"]);
    assert_eq!(first.resources["null_resource"], vec!["a", "b"]);
}

#[test]
fn test_unparsable_file_is_skipped_with_error() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("good.tf"), "variable \"ok\" {}\n").unwrap();
    fs::write(root.path().join("bad.tf"), "resource \"x\" {{{{\n").unwrap();

    let (idx, errors) = build_symbol_index(root.path(), None);
    assert_eq!(idx.variables, vec!["ok"]);
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_functions_cache_roundtrip_and_normalization() {
    let scratch = TempDir::new().unwrap();
    // Missing cache yields an empty list.
    assert!(functions::load_functions(scratch.path()).is_empty());

    fs::write(
        scratch.path().join("functions.json"),
        serde_json::to_vec(&vec!["Upper", "lower", "LOWER", " join ", ""]).unwrap(),
    )
    .unwrap();
    let names = functions::load_functions(scratch.path());
    assert_eq!(names, vec!["join", "lower", "upper"]);

    // Malformed cache degrades to empty.
    fs::write(scratch.path().join("functions.json"), b"{not json").unwrap();
    assert!(functions::load_functions(scratch.path()).is_empty());
}

#[test]
fn test_module_cache_fingerprint_is_stable() {
    use terraflow::index::modfetch::fingerprint;
    let a = fingerprint("git::https://example.com/mod.git");
    let b = fingerprint("git::https://example.com/mod.git");
    assert_eq!(a, b);
    assert_eq!(a.len(), 40);
    assert_ne!(a, fingerprint("git::https://example.com/other.git"));
}

#[test]
fn test_registry_and_local_source_classification() {
    use terraflow::index::modfetch::{is_local_path, is_registry_address};
    assert!(is_local_path("./modules/net"));
    assert!(is_local_path("../shared"));
    assert!(is_local_path("/abs/path"));
    assert!(!is_local_path("terraform-aws-modules/vpc/aws"));
    assert!(is_registry_address("terraform-aws-modules/vpc/aws"));
    assert!(is_registry_address("registry.terraform.io/ns/name/provider"));
    assert!(!is_registry_address("git::https://example.com/mod.git"));
}
