use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use hcl::eval::{Context as EvalContext, Evaluate};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;

/// A managed resource discovered in configuration, with attribute values that
/// are either literals or the result of expression evaluation.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfig {
    /// Module call names in order from the root module (empty for root).
    pub module_path: Vec<String>,
    pub resource_type: String,
    pub name: String,
    pub attrs: HashMap<String, Value>,
}

/// Per-resource scan output separating constant attributes from raw expression
/// source text pending external evaluation.
#[derive(Debug, Clone, Default)]
pub struct ScanResInfo {
    pub module_path: Vec<String>,
    pub resource_type: String,
    pub name: String,
    pub literals: HashMap<String, Value>,
    pub exprs: HashMap<String, String>,
}

/// Meta-arguments are never stored as resource attributes.
pub fn is_meta_arg(key: &str) -> bool {
    matches!(
        key,
        "provider" | "depends_on" | "lifecycle" | "count" | "for_each" | "provisioner" | "connection"
    )
}

// ─── Cached HCL parsing ──────────────────────────────────────────────────────

/// A parsed `.tf` file. The span-preserving body lets attribute expressions
/// be quoted back verbatim for console evaluation.
pub struct ParsedFile {
    pub mod_nanos: i64,
    pub body: hcl_edit::structure::Body,
}

static PARSE_CACHE: Lazy<Mutex<HashMap<PathBuf, Arc<ParsedFile>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Parse `path`, reusing the cache entry when the modification time is
/// unchanged. Returns `None` for unreadable or syntactically invalid files.
pub fn parsed_file(path: &Path) -> Option<Arc<ParsedFile>> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    let mod_nanos = crate::fsx::mod_unix_nanos(&meta);
    if let Ok(cache) = PARSE_CACHE.lock() {
        if let Some(entry) = cache.get(path) {
            if entry.mod_nanos == mod_nanos {
                return Some(Arc::clone(entry));
            }
        }
    }
    let src = fs::read_to_string(path).ok()?;
    let body = hcl_edit::parser::parse_body(&src).ok()?;
    let entry = Arc::new(ParsedFile { mod_nanos, body });
    if let Ok(mut cache) = PARSE_CACHE.lock() {
        cache.insert(path.to_path_buf(), Arc::clone(&entry));
    }
    Some(entry)
}

/// Drop all cached parses. Intended for tests.
pub fn reset_parse_cache() {
    if let Ok(mut cache) = PARSE_CACHE.lock() {
        cache.clear();
    }
}

// ─── Constant evaluation ─────────────────────────────────────────────────────

/// Parse a standalone HCL expression from source text.
pub fn parse_expression(src: &str) -> Option<hcl::Expression> {
    let body: hcl::Body = hcl::from_str(&format!("__expr = {src}\n")).ok()?;
    for structure in body.into_inner() {
        if let hcl::Structure::Attribute(attr) = structure {
            return Some(attr.expr);
        }
    }
    None
}

/// Evaluate expression source purely from literals: no variables, no
/// functions. References and calls fail, signalling "not constant".
pub fn const_value(src: &str) -> Option<Value> {
    let expr = parse_expression(src)?;
    let ctx = EvalContext::new();
    let value = expr.evaluate(&ctx).ok()?;
    Some(hcl_value_to_json(value))
}

/// Convert an evaluated HCL value into its JSON representation.
pub fn hcl_value_to_json(value: hcl::Value) -> Value {
    match value {
        hcl::Value::Null => Value::Null,
        hcl::Value::Bool(b) => Value::Bool(b),
        hcl::Value::Number(n) => match n.as_f64() {
            Some(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            None => Value::Null,
        },
        hcl::Value::String(s) => Value::String(s),
        hcl::Value::Array(items) => {
            Value::Array(items.into_iter().map(hcl_value_to_json).collect())
        }
        hcl::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k, hcl_value_to_json(v));
            }
            Value::Object(out)
        }
    }
}

/// Raw source text of an attribute expression, trimmed of surrounding trivia.
/// `jsonencode(X)` is unwrapped to `X`: the sanitizer would expand the encoded
/// string again anyway, and the inner expression evaluates faster.
pub fn expr_source(attr: &hcl_edit::structure::Attribute) -> String {
    let raw = attr.value.to_string();
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix("jsonencode(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

// ─── Module resolution ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ModulesManifest {
    #[serde(rename = "Modules", default)]
    modules: Vec<ModulesManifestEntry>,
}

#[derive(Deserialize)]
struct ModulesManifestEntry {
    #[serde(rename = "Key", default)]
    key: String,
    #[serde(rename = "Dir", default)]
    dir: String,
}

/// Module keys from `.terraform/modules/modules.json`, mapped to absolute
/// directories. Keys use the manifest's dotted form with the `root` prefix
/// stripped, so the root module is `""` and a nested call is `child.grand`.
fn manifest_module_dirs(root: &Path) -> Option<BTreeMap<String, PathBuf>> {
    let idx_path = root.join(".terraform").join("modules").join("modules.json");
    let bytes = fs::read(&idx_path).ok()?;
    let manifest: ModulesManifest = serde_json::from_slice(&bytes).ok()?;
    let mut out = BTreeMap::new();
    out.insert(String::new(), root.to_path_buf());
    for entry in manifest.modules {
        if entry.key.trim().is_empty() || entry.dir.trim().is_empty() {
            continue;
        }
        if !entry.key.starts_with("root") {
            continue;
        }
        let key = entry
            .key
            .trim_start_matches("root")
            .trim_start_matches('.')
            .to_string();
        let dir = if Path::new(&entry.dir).is_absolute() {
            PathBuf::from(&entry.dir)
        } else {
            root.join(&entry.dir)
        };
        if dir.is_dir() {
            out.insert(key, dir);
        }
    }
    if out.len() > 1 {
        Some(out)
    } else {
        None
    }
}

fn split_module_key(key: &str) -> Vec<String> {
    key.split('.')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// `.tf` files directly inside `dir`, sorted for deterministic output.
pub fn tf_files_in_dir(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|e| e.eq_ignore_ascii_case("tf"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Local module call sources declared in `dir`: `(call_name, source)` for
/// every `module` block whose `source` is a constant string.
fn local_module_calls(dir: &Path) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for file in tf_files_in_dir(dir) {
        let Some(parsed) = parsed_file(&file) else {
            continue;
        };
        for structure in parsed.body.iter() {
            let Some(block) = structure.as_block() else {
                continue;
            };
            if block.ident.value().as_str() != "module" || block.labels.is_empty() {
                continue;
            }
            let name = block.labels[0].as_str().to_string();
            for inner in block.body.iter() {
                if let Some(attr) = inner.as_attribute() {
                    if attr.key.value().as_str() == "source" {
                        if let Some(Value::String(src)) = const_value(&expr_source(attr)) {
                            out.push((name.clone(), src));
                        }
                    }
                }
            }
        }
    }
    out
}

/// Resolve every module directory reachable from `root`: the external modules
/// manifest when present (covers registry modules), otherwise recursion into
/// module calls with relative-path sources. Returns `(module_path, dir)`
/// pairs, root first.
pub fn module_dirs(root: &Path) -> Vec<(Vec<String>, PathBuf)> {
    let abs = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf());
    if let Some(map) = manifest_module_dirs(&abs) {
        return map
            .into_iter()
            .map(|(key, dir)| (split_module_key(&key), dir))
            .collect();
    }
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    walk_local_modules(&abs, Vec::new(), &mut visited, &mut out);
    out
}

fn walk_local_modules(
    dir: &Path,
    module_path: Vec<String>,
    visited: &mut HashSet<PathBuf>,
    out: &mut Vec<(Vec<String>, PathBuf)>,
) {
    let abs = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if !visited.insert(abs.clone()) {
        return;
    }
    out.push((module_path.clone(), abs.clone()));
    for (name, source) in local_module_calls(&abs) {
        let src = source.trim();
        let is_local = src.starts_with("./") || src.starts_with("../") || Path::new(src).is_absolute();
        if !is_local {
            continue;
        }
        let next = if Path::new(src).is_absolute() {
            PathBuf::from(src)
        } else {
            abs.join(src)
        };
        if next.is_dir() {
            let mut child_path = module_path.clone();
            child_path.push(name);
            walk_local_modules(&next, child_path, visited, out);
        }
    }
}

// ─── Resource scanning ───────────────────────────────────────────────────────

/// Collect literal attributes and nested blocks from a resource body.
/// Attributes keep only constant expressions; nested blocks are grouped by
/// type into arrays of objects with labels injected as `name` when absent.
/// `dynamic` blocks are skipped: they cannot resolve without evaluation.
pub fn extract_literals(body: &hcl_edit::structure::Body) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for structure in body.iter() {
        if let Some(attr) = structure.as_attribute() {
            let key = attr.key.value().as_str();
            if is_meta_arg(key) {
                continue;
            }
            if let Some(v) = const_value(&expr_source(attr)) {
                out.insert(key.to_string(), v);
            }
        } else if let Some(block) = structure.as_block() {
            let ident = block.ident.value().as_str();
            if ident.is_empty() || ident == "dynamic" {
                continue;
            }
            let mut nested: serde_json::Map<String, Value> = extract_literals(&block.body)
                .into_iter()
                .collect();
            if let Some(label) = block.labels.first() {
                nested
                    .entry("name".to_string())
                    .or_insert_with(|| Value::String(label.as_str().to_string()));
            }
            groups
                .entry(ident.to_string())
                .or_default()
                .push(Value::Object(nested));
        }
    }
    for (k, v) in groups {
        out.insert(k, Value::Array(v));
    }
    out
}

/// Scan one resource block into literal attributes plus raw expression text
/// for everything else.
fn scan_resource_block(
    block: &hcl_edit::structure::Block,
    module_path: &[String],
) -> Option<ScanResInfo> {
    if block.ident.value().as_str() != "resource" || block.labels.len() < 2 {
        return None;
    }
    let mut info = ScanResInfo {
        module_path: module_path.to_vec(),
        resource_type: block.labels[0].as_str().to_string(),
        name: block.labels[1].as_str().to_string(),
        ..Default::default()
    };
    for structure in block.body.iter() {
        let Some(attr) = structure.as_attribute() else {
            continue;
        };
        let key = attr.key.value().as_str();
        if is_meta_arg(key) {
            continue;
        }
        let src = expr_source(attr);
        match const_value(&src) {
            Some(v) => {
                info.literals.insert(key.to_string(), v);
            }
            None => {
                info.exprs.insert(key.to_string(), src);
            }
        }
    }
    Some(info)
}

/// Scan the `.tf` files directly inside `dir` for resource blocks.
pub fn scan_module_dir(dir: &Path, module_path: &[String]) -> Vec<ScanResInfo> {
    let mut out = Vec::new();
    for file in tf_files_in_dir(dir) {
        let Some(parsed) = parsed_file(&file) else {
            continue;
        };
        for structure in parsed.body.iter() {
            if let Some(block) = structure.as_block() {
                if let Some(info) = scan_resource_block(block, module_path) {
                    out.push(info);
                }
            }
        }
    }
    out
}

/// Scan resource blocks in one specific file, regardless of module layout.
pub fn scan_file(path: &Path) -> Vec<ScanResInfo> {
    let Some(parsed) = parsed_file(path) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for structure in parsed.body.iter() {
        if let Some(block) = structure.as_block() {
            if let Some(info) = scan_resource_block(block, &[]) {
                out.push(info);
            }
        }
    }
    out
}

/// Walk the root module and nested modules, returning managed resources with
/// literal attributes (including nested block groups). Never evaluates.
pub fn build_resource_configs(root: &Path) -> Result<Vec<ResourceConfig>> {
    let mut out = Vec::new();
    for (module_path, dir) in module_dirs(root) {
        for file in tf_files_in_dir(&dir) {
            let Some(parsed) = parsed_file(&file) else {
                continue;
            };
            for structure in parsed.body.iter() {
                let Some(block) = structure.as_block() else {
                    continue;
                };
                if block.ident.value().as_str() != "resource" || block.labels.len() < 2 {
                    continue;
                }
                out.push(ResourceConfig {
                    module_path: module_path.clone(),
                    resource_type: block.labels[0].as_str().to_string(),
                    name: block.labels[1].as_str().to_string(),
                    attrs: extract_literals(&block.body),
                });
            }
        }
    }
    if out.is_empty() && !root.exists() {
        anyhow::bail!("configuration root {} does not exist", root.display());
    }
    Ok(out)
}

/// Walk all modules and collect per-resource literal and expression sets for
/// batched evaluation.
pub fn collect_expressions(root: &Path) -> Result<Vec<ScanResInfo>> {
    let mut out = Vec::new();
    for (module_path, dir) in module_dirs(root) {
        out.extend(scan_module_dir(&dir, &module_path));
    }
    Ok(out)
}

/// Variable defaults declared by `.tf` files directly in `dir`.
pub fn variable_defaults(dir: &Path) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    for file in tf_files_in_dir(dir) {
        let Some(parsed) = parsed_file(&file) else {
            continue;
        };
        for structure in parsed.body.iter() {
            let Some(block) = structure.as_block() else {
                continue;
            };
            if block.ident.value().as_str() != "variable" || block.labels.is_empty() {
                continue;
            }
            let name = block.labels[0].as_str().to_string();
            for inner in block.body.iter() {
                if let Some(attr) = inner.as_attribute() {
                    if attr.key.value().as_str() == "default" {
                        if let Some(v) = const_value(&expr_source(attr)) {
                            out.insert(name.clone(), v);
                        }
                    }
                }
            }
        }
    }
    out
}

/// Raw expression text of every `locals` entry under `dir`, recursively,
/// skipping `.terraform/` and `.terraflow/` trees.
pub fn local_expressions(dir: &Path) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && matches!(e.file_name().to_str(), Some(".terraform") | Some(".terraflow")))
    }) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("tf"))
            .unwrap_or(false)
        {
            continue;
        }
        let Some(parsed) = parsed_file(path) else {
            continue;
        };
        for structure in parsed.body.iter() {
            let Some(block) = structure.as_block() else {
                continue;
            };
            if block.ident.value().as_str() != "locals" {
                continue;
            }
            for inner in block.body.iter() {
                if let Some(attr) = inner.as_attribute() {
                    out.insert(attr.key.value().as_str().to_string(), expr_source(attr));
                }
            }
        }
    }
    out
}

/// Attribute values from a `.tfvars` file parsed as HCL attributes; only
/// constant values are taken.
pub fn tfvars_values(path: &Path) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    let Ok(src) = fs::read_to_string(path) else {
        return out;
    };
    let Ok(body) = hcl_edit::parser::parse_body(&src) else {
        return out;
    };
    for structure in body.iter() {
        if let Some(attr) = structure.as_attribute() {
            if let Some(v) = const_value(&expr_source(attr)) {
                out.insert(attr.key.value().as_str().to_string(), v);
            }
        }
    }
    out
}

/// A string uniquely identifying the var-file inputs: each file's path, mtime
/// and size concatenated. A change to any var-file changes the stamp and so
/// invalidates memoized evaluation results keyed by it.
pub fn vars_stamp(var_files: &[String]) -> String {
    let mut out = String::new();
    for vf in var_files {
        let Ok(meta) = fs::metadata(vf) else { continue };
        out.push_str(vf);
        out.push('|');
        out.push_str(&crate::fsx::mod_unix_nanos(&meta).to_string());
        out.push('|');
        out.push_str(&meta.len().to_string());
        out.push(';');
    }
    out
}
