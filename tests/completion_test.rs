use terraflow::complete::candidates;
use terraflow::index::SymbolIndex;

fn index_with(
    variables: &[&str],
    locals: &[&str],
    resources: &[(&str, &[&str])],
    data: &[(&str, &[&str])],
) -> SymbolIndex {
    let mut idx = SymbolIndex {
        variables: variables.iter().map(|s| s.to_string()).collect(),
        locals: locals.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    for (t, names) in resources {
        idx.resources
            .insert(t.to_string(), names.iter().map(|s| s.to_string()).collect());
    }
    for (t, names) in data {
        idx.data_sources
            .insert(t.to_string(), names.iter().map(|s| s.to_string()).collect());
    }
    idx
}

#[test]
fn test_variable_completion_replaces_exact_token() {
    let idx = index_with(&["some_var", "other"], &[], &[], &[]);
    let line = "var.so";
    let (cands, start, end) = candidates(&idx, line, line.len());
    assert_eq!(start, 0);
    assert_eq!(end, line.len());
    assert_eq!(&line[start..end], "var.so");
    assert_eq!(cands, vec!["var.some_var"]);
}

#[test]
fn test_bare_keyword_behaves_like_dotted_prefix() {
    let idx = index_with(&["some_var", "other"], &[], &[], &[]);
    let (cands, _, _) = candidates(&idx, "var", 3);
    assert_eq!(cands, vec!["var.other", "var.some_var"]);
}

#[test]
fn test_starters_offered_only_for_populated_categories() {
    let idx = index_with(&["some_var", "other"], &["x"], &[], &[]);
    let (cands, start, end) = candidates(&idx, "v", 1);
    assert_eq!((start, end), (0, 1));
    // var is populated and matches the prefix; every other category either
    // does not match "v" or is empty.
    assert_eq!(cands, vec!["var."]);

    let (cands, _, _) = candidates(&idx, "l", 1);
    assert_eq!(cands, vec!["local."]);

    // data/module/output are empty, so nothing is offered.
    let (cands, _, _) = candidates(&idx, "d", 1);
    assert!(cands.is_empty());
}

#[test]
fn test_starter_prefix_match_is_case_insensitive() {
    let idx = index_with(&["some_var"], &[], &[], &[]);
    let (cands, _, _) = candidates(&idx, "VA", 2);
    assert_eq!(cands, vec!["var."]);
}

#[test]
fn test_data_source_two_level_completion() {
    let idx = index_with(&[], &[], &[], &[("aws_ami", &["ubuntu", "debian"])]);
    let (cands, _, _) = candidates(&idx, "data.aws_a", 10);
    assert_eq!(cands, vec!["data.aws_ami"]);

    let line = "data.aws_ami.u";
    let (cands, start, end) = candidates(&idx, line, line.len());
    assert_eq!(&line[start..end], line);
    assert_eq!(cands, vec!["data.aws_ami.ubuntu"]);
}

#[test]
fn test_resource_type_name_and_attribute_completion() {
    let mut idx = index_with(
        &[],
        &[],
        &[("null_resource", &["ex", "extra"])],
        &[],
    );
    idx.resource_attrs.insert(
        "null_resource".to_string(),
        vec!["triggers".to_string(), "provisioner_count".to_string()],
    );

    let (cands, _, _) = candidates(&idx, "null_res", 8);
    assert_eq!(cands, vec!["null_resource"]);

    let (cands, _, _) = candidates(&idx, "null_resource.e", 15);
    assert_eq!(cands, vec!["null_resource.ex", "null_resource.extra"]);

    let line = "null_resource.ex.tr";
    let (cands, start, end) = candidates(&idx, line, line.len());
    assert_eq!(&line[start..end], line);
    assert_eq!(cands, vec!["null_resource.ex.triggers"]);
}

#[test]
fn test_token_boundaries_inside_expression() {
    let idx = index_with(&["some_var"], &[], &[], &[]);
    let line = "upper(var.so)";
    // Cursor just before the closing paren.
    let (cands, start, end) = candidates(&idx, line, 12);
    assert_eq!(&line[start..end], "var.so");
    assert_eq!(cands, vec!["var.some_var"]);
}

#[test]
fn test_function_names_complete_on_bare_prefix() {
    let mut idx = index_with(&[], &[], &[], &[]);
    idx.functions = vec!["upper".to_string(), "urlencode".to_string()];
    let (cands, _, _) = candidates(&idx, "up", 2);
    assert_eq!(cands, vec!["upper"]);
}

#[test]
fn test_candidates_are_sorted() {
    let idx = index_with(&["zeta", "alpha", "mid"], &[], &[], &[]);
    let (cands, _, _) = candidates(&idx, "var.", 4);
    assert_eq!(cands, vec!["var.alpha", "var.mid", "var.zeta"]);
}
