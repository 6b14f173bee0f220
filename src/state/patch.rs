use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::eval;
use crate::eval::fast::FastEvalData;
use crate::scan::{self, ResourceConfig, ScanResInfo};
use crate::state::addr::{module_path_to_string, provider_address_for_type, resource_key};
use crate::state::document::{ensure_initialized, StateDocument};
use crate::state::sanitize::{deep_equal_jsonish, sanitize_value};

const GLOBAL_BATCH_TIMEOUT: Duration = Duration::from_secs(3);
const MODULE_BATCH_TIMEOUT: Duration = Duration::from_secs(10);
const ATTR_FALLBACK_TIMEOUT: Duration = Duration::from_secs(5);
const TARGETED_CONSOLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Targeted patching runs at most this many files concurrently.
const TARGETED_WORKERS: usize = 3;

// Targeted patching mutates the state file attribute-by-attribute from a
// worker pool; writes are serialized so none are lost.
static STATE_WRITE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

// Memoized evaluation results keyed by (work_dir, vars_stamp, type, name,
// attr, expression source). A var-file edit changes the stamp and naturally
// invalidates every entry derived from it.
static EVAL_MEMO: Lazy<DashMap<String, Value>> = Lazy::new(DashMap::new);

/// Drop all memoized targeted-evaluation results. Intended for tests.
pub fn reset_eval_memo() {
    EVAL_MEMO.clear();
}

/// Merge resource configurations into the state document. Existing resources
/// get their `provider` filled when absent and only actually-different
/// attribute values rewritten; missing resources are appended as managed
/// entries with a single instance. Returns whether anything changed.
pub fn merge_configs(doc: &mut StateDocument, cfgs: &[ResourceConfig]) -> bool {
    let resources = doc.resources_mut();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, res) in resources.iter().enumerate() {
        let Some(obj) = res.as_object() else { continue };
        if obj.get("mode").and_then(Value::as_str) != Some("managed") {
            continue;
        }
        let rtype = obj.get("type").and_then(Value::as_str).unwrap_or("");
        let name = obj.get("name").and_then(Value::as_str).unwrap_or("");
        let module = obj.get("module").and_then(Value::as_str).unwrap_or("");
        index.insert(resource_key(module, rtype, name), i);
    }

    let mut changed = false;
    for rc in cfgs {
        let module = module_path_to_string(&rc.module_path);
        let key = resource_key(&module, &rc.resource_type, &rc.name);
        if let Some(&i) = index.get(&key) {
            let Some(obj) = resources[i].as_object_mut() else {
                continue;
            };
            if !obj.contains_key("provider") {
                obj.insert(
                    "provider".to_string(),
                    Value::String(provider_address_for_type(&rc.resource_type)),
                );
                changed = true;
            }
            changed |= merge_into_instances(obj, &rc.attrs);
            continue;
        }
        resources.push(new_resource_entry(rc, &module));
        index.insert(key, resources.len() - 1);
        changed = true;
    }
    changed
}

fn new_resource_entry(rc: &ResourceConfig, module: &str) -> Value {
    let mut obj = Map::new();
    obj.insert("mode".to_string(), Value::String("managed".to_string()));
    obj.insert("type".to_string(), Value::String(rc.resource_type.clone()));
    obj.insert("name".to_string(), Value::String(rc.name.clone()));
    obj.insert(
        "provider".to_string(),
        Value::String(provider_address_for_type(&rc.resource_type)),
    );
    obj.insert(
        "instances".to_string(),
        Value::Array(vec![new_instance(&rc.attrs)]),
    );
    if !module.is_empty() {
        obj.insert("module".to_string(), Value::String(module.to_string()));
    }
    Value::Object(obj)
}

fn new_instance(attrs: &HashMap<String, Value>) -> Value {
    let mut sanitized = Map::new();
    for (k, v) in attrs {
        sanitized.insert(k.clone(), sanitize_value(v.clone()));
    }
    let mut inst = Map::new();
    inst.insert("attributes".to_string(), Value::Object(sanitized));
    inst.insert("schema_version".to_string(), Value::from(0));
    Value::Object(inst)
}

/// Update every instance of an existing resource with the given attributes,
/// creating one instance when the list is empty.
fn merge_into_instances(obj: &mut Map<String, Value>, attrs: &HashMap<String, Value>) -> bool {
    let instances = match obj.get_mut("instances") {
        Some(Value::Array(items)) => items,
        _ => {
            obj.insert("instances".to_string(), Value::Array(Vec::new()));
            match obj.get_mut("instances") {
                Some(Value::Array(items)) => items,
                _ => return false,
            }
        }
    };
    if instances.is_empty() {
        instances.push(new_instance(attrs));
        return true;
    }
    let mut changed = false;
    for inst in instances.iter_mut() {
        let Some(inst_obj) = inst.as_object_mut() else {
            continue;
        };
        if !inst_obj
            .get("attributes")
            .map(Value::is_object)
            .unwrap_or(false)
        {
            inst_obj.insert("attributes".to_string(), Value::Object(Map::new()));
        }
        let Some(Value::Object(attr_map)) = inst_obj.get_mut("attributes") else {
            continue;
        };
        for (k, v) in attrs {
            let nv = sanitize_value(v.clone());
            match attr_map.get(k) {
                Some(ov) if deep_equal_jsonish(ov, &nv) => {}
                _ => {
                    attr_map.insert(k.clone(), nv);
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Merge only constant attributes discovered in configuration into the state.
/// Spawns no subprocess and is suitable for near-instant refreshes.
pub fn patch_literals(root: &Path, state_path: &Path) -> Result<()> {
    ensure_initialized(state_path)?;
    let cfgs = scan::build_resource_configs(root).context("scan config")?;
    let mut doc = StateDocument::load(state_path)?;
    let changed = merge_configs(&mut doc, &cfgs);
    doc.write_if_changed(changed)?;
    Ok(())
}

fn batch_key(info: &ScanResInfo) -> String {
    format!(
        "{}|{}.{}",
        module_path_to_string(&info.module_path),
        info.resource_type,
        info.name
    )
}

/// One HCL list literal covering every non-literal attribute of every scanned
/// resource, shaped `[{ k = "mod|type.name", v = { attr = (expr) } }, ...]`.
/// A list avoids invalid object keys (quoted, dotted) in HCL constructors.
fn global_batch_expr(infos: &[ScanResInfo]) -> String {
    let mut out = String::with_capacity(256 * infos.len());
    out.push('[');
    let mut first_res = true;
    for info in infos {
        if info.exprs.is_empty() {
            continue;
        }
        if !first_res {
            out.push(',');
        }
        first_res = false;
        out.push_str("{ k = \"");
        out.push_str(&batch_key(info));
        out.push_str("\", v = {");
        let mut keys: Vec<&String> = info.exprs.keys().collect();
        keys.sort();
        for (i, k) in keys.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(k);
            out.push_str(" = (");
            out.push_str(&info.exprs[*k]);
            out.push(')');
        }
        out.push_str("} }");
    }
    out.push(']');
    out
}

fn module_batch_expr(infos: &[&ScanResInfo]) -> String {
    let mut out = String::with_capacity(128 * infos.len());
    out.push('{');
    let mut first_res = true;
    for info in infos {
        if info.exprs.is_empty() {
            continue;
        }
        if !first_res {
            out.push(',');
        }
        first_res = false;
        out.push('"');
        out.push_str(&info.resource_type);
        out.push('.');
        out.push_str(&info.name);
        out.push_str("\" = {");
        let mut keys: Vec<&String> = info.exprs.keys().collect();
        keys.sort();
        for (i, k) in keys.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(k);
            out.push_str(" = (");
            out.push_str(&info.exprs[*k]);
            out.push(')');
        }
        out.push('}');
    }
    out.push('}');
    out
}

/// Evaluate non-literal resource attributes and merge them into the state.
/// Tries a single global batched evaluation through the persistent console
/// first, falls back to per-module batches, and finally to per-attribute
/// evaluation for anything still missing.
pub async fn patch_evaluated_fast(
    root: &Path,
    work_dir: &Path,
    state_path: &Path,
    var_files: &[String],
) -> Result<()> {
    ensure_initialized(state_path)?;
    let infos = scan::collect_expressions(root).context("scan config")?;
    let total_exprs: usize = infos.iter().map(|i| i.exprs.len()).sum();

    let mut evaluated: HashMap<String, Map<String, Value>> = HashMap::new();
    if total_exprs > 0 {
        let batch = global_batch_expr(&infos);
        if let Some(Value::Array(items)) =
            eval::eval_json(work_dir, state_path, var_files, &batch, GLOBAL_BATCH_TIMEOUT).await
        {
            for item in items {
                let Some(obj) = item.as_object() else { continue };
                let Some(key) = obj.get("k").and_then(Value::as_str) else {
                    continue;
                };
                if let Some(Value::Object(vals)) = obj.get("v") {
                    evaluated.insert(key.to_string(), vals.clone());
                }
            }
        }
        if evaluated.is_empty() {
            evaluated =
                eval_per_module(&infos, work_dir, state_path, var_files).await;
        }
    }

    let mut cfgs = Vec::with_capacity(infos.len());
    for info in &infos {
        let mut attrs: HashMap<String, Value> = info.literals.clone();
        if let Some(vals) = evaluated.get(&batch_key(info)) {
            for (k, v) in vals {
                attrs.insert(k.clone(), v.clone());
            }
        }
        // Per-attribute fallback for anything the batches missed.
        let mut missing: Vec<(&String, &String)> = info
            .exprs
            .iter()
            .filter(|(k, _)| !attrs.contains_key(*k))
            .collect();
        missing.sort_by(|a, b| a.0.cmp(b.0));
        for (k, expr) in missing {
            if let Some(v) =
                eval::eval_json(work_dir, state_path, var_files, expr, ATTR_FALLBACK_TIMEOUT).await
            {
                attrs.insert(k.clone(), v);
            }
        }
        cfgs.push(ResourceConfig {
            module_path: info.module_path.clone(),
            resource_type: info.resource_type.clone(),
            name: info.name.clone(),
            attrs,
        });
    }

    let mut doc = StateDocument::load(state_path)?;
    let changed = merge_configs(&mut doc, &cfgs);
    doc.write_if_changed(changed)?;
    Ok(())
}

async fn eval_per_module(
    infos: &[ScanResInfo],
    work_dir: &Path,
    state_path: &Path,
    var_files: &[String],
) -> HashMap<String, Map<String, Value>> {
    let mut groups: HashMap<String, Vec<&ScanResInfo>> = HashMap::new();
    for info in infos {
        if !info.exprs.is_empty() {
            groups
                .entry(module_path_to_string(&info.module_path))
                .or_default()
                .push(info);
        }
    }
    let mut out = HashMap::new();
    for (module, group) in groups {
        let batch = module_batch_expr(&group);
        let Some(Value::Object(result)) =
            eval::eval_json(work_dir, state_path, var_files, &batch, MODULE_BATCH_TIMEOUT).await
        else {
            continue;
        };
        for info in group {
            let short = format!("{}.{}", info.resource_type, info.name);
            if let Some(Value::Object(vals)) = result.get(&short) {
                out.insert(
                    format!("{}|{}", module, short),
                    vals.clone(),
                );
            }
        }
    }
    out
}

/// Patch exactly the resources declared in the given files, attribute by
/// attribute, with bounded parallelism. Evaluation prefers the prebuilt
/// in-process context, then memoized results, then the external console.
pub async fn patch_targeted_exact_by_files(
    work_dir: &Path,
    state_path: &Path,
    var_files: &[String],
    files: &[PathBuf],
) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    ensure_initialized(state_path)?;
    let data = Arc::new(FastEvalData::load(work_dir, var_files));
    let stamp = Arc::new(scan::vars_stamp(var_files));
    let semaphore = Arc::new(Semaphore::new(TARGETED_WORKERS));
    let mut handles = Vec::new();

    for file in files {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let file = file.clone();
        let data = Arc::clone(&data);
        let stamp = Arc::clone(&stamp);
        let work_dir = work_dir.to_path_buf();
        let state_path = state_path.to_path_buf();
        let var_files = var_files.to_vec();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            for info in scan::scan_file(&file) {
                let mut keys: Vec<&String> = info
                    .literals
                    .keys()
                    .chain(info.exprs.keys())
                    .collect();
                keys.sort();
                keys.dedup();
                for attr in keys {
                    let value = if let Some(lit) = info.literals.get(attr) {
                        Some(lit.clone())
                    } else if let Some(expr) = info.exprs.get(attr) {
                        eval_memoized(
                            &data,
                            &stamp,
                            &work_dir,
                            &state_path,
                            &var_files,
                            &info.resource_type,
                            &info.name,
                            attr,
                            expr,
                        )
                        .await
                    } else {
                        None
                    };
                    if let Some(value) = value {
                        let _ = patch_attr_write(
                            &state_path,
                            &info.resource_type,
                            &info.name,
                            attr,
                            value,
                        );
                    }
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn eval_memoized(
    data: &FastEvalData,
    stamp: &str,
    work_dir: &Path,
    state_path: &Path,
    var_files: &[String],
    rtype: &str,
    rname: &str,
    attr: &str,
    expr: &str,
) -> Option<Value> {
    let key = format!(
        "{}|{}|{}|{}|{}|{}",
        work_dir.display(),
        stamp,
        rtype,
        rname,
        attr,
        expr
    );
    if let Some(cached) = EVAL_MEMO.get(&key) {
        return Some(cached.clone());
    }
    let value = match data.eval(expr) {
        Some(v) => Some(v),
        None => {
            eval::eval_json(work_dir, state_path, var_files, expr, TARGETED_CONSOLE_TIMEOUT).await
        }
    };
    if let Some(ref v) = value {
        EVAL_MEMO.insert(key, v.clone());
    }
    value
}

/// Read-modify-write of a single attribute on a single resource, matched by
/// type and name. Serialized process-wide so concurrent workers never lose an
/// update.
fn patch_attr_write(
    state_path: &Path,
    rtype: &str,
    rname: &str,
    attr: &str,
    value: Value,
) -> Result<()> {
    let _guard = STATE_WRITE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut doc = StateDocument::load(state_path)?;
    let resources = doc.resources_mut();
    let nv = sanitize_value(value);
    let mut changed = false;
    let mut found = false;
    for res in resources.iter_mut() {
        let Some(obj) = res.as_object_mut() else { continue };
        if obj.get("mode").and_then(Value::as_str) != Some("managed")
            || obj.get("type").and_then(Value::as_str) != Some(rtype)
            || obj.get("name").and_then(Value::as_str) != Some(rname)
        {
            continue;
        }
        found = true;
        if !obj.contains_key("provider") {
            obj.insert(
                "provider".to_string(),
                Value::String(provider_address_for_type(rtype)),
            );
            changed = true;
        }
        let mut single = HashMap::new();
        single.insert(attr.to_string(), nv.clone());
        changed |= merge_into_instances(obj, &single);
        break;
    }
    if !found {
        let mut attrs = HashMap::new();
        attrs.insert(attr.to_string(), nv);
        let rc = ResourceConfig {
            module_path: Vec::new(),
            resource_type: rtype.to_string(),
            name: rname.to_string(),
            attrs,
        };
        resources.push(new_resource_entry(&rc, ""));
        changed = true;
    }
    doc.write_if_changed(changed)?;
    Ok(())
}
