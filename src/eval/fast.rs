use std::collections::HashMap;
use std::path::Path;

use hcl::eval::{Context, Evaluate};
use serde_json::Value;

use crate::eval::funcs;
use crate::scan;

/// Variable and local values resolved once per refresh batch and reused for
/// every in-process evaluation in that batch.
pub struct FastEvalData {
    vars: HashMap<String, Value>,
    locals: HashMap<String, Value>,
}

impl FastEvalData {
    /// Build the evaluation inputs for a module directory: `var.*` from the
    /// module's variable defaults overlaid with every var-file (last write
    /// wins in list order), `local.*` by fixed-point iteration over all
    /// `locals` blocks with already-resolved locals visible to later rounds.
    pub fn load(work_dir: &Path, var_files: &[String]) -> Self {
        let mut vars = scan::variable_defaults(work_dir);
        for vf in var_files {
            if vf.trim().is_empty() {
                continue;
            }
            for (k, v) in scan::tfvars_values(Path::new(vf)) {
                vars.insert(k, v);
            }
        }
        let local_exprs = scan::local_expressions(work_dir);
        let mut locals: HashMap<String, Value> = HashMap::new();
        // Bounded rounds keep cyclic locals from looping forever.
        for _ in 0..4 {
            let mut progressed = false;
            let mut names: Vec<&String> = local_exprs.keys().collect();
            names.sort();
            for name in names {
                if locals.contains_key(name) {
                    continue;
                }
                if let Some(v) = eval_with(&vars, &locals, &local_exprs[name]) {
                    locals.insert(name.clone(), v);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        Self { vars, locals }
    }

    /// Evaluate one expression against this batch context. `None` means the
    /// expression needs the external console.
    pub fn eval(&self, expr: &str) -> Option<Value> {
        eval_with(&self.vars, &self.locals, expr)
    }
}

/// Evaluate an expression in-process with a best-effort subset of Terraform
/// semantics: `var.*`, `local.*` and the fixed function set. Returns `None`
/// on any parse error, unknown reference or unsupported function so the
/// caller can fall back to the external console. Spawns no subprocess.
pub fn try_eval_in_process(work_dir: &Path, var_files: &[String], expr: &str) -> Option<Value> {
    if expr.trim().is_empty() {
        return None;
    }
    FastEvalData::load(work_dir, var_files).eval(expr)
}

fn eval_with(
    vars: &HashMap<String, Value>,
    locals: &HashMap<String, Value>,
    expr: &str,
) -> Option<Value> {
    let parsed = scan::parse_expression(expr)?;
    let mut ctx = Context::new();
    ctx.declare_var("var", json_map_to_hcl(vars));
    ctx.declare_var("local", json_map_to_hcl(locals));
    funcs::declare(&mut ctx);
    let value = parsed.evaluate(&ctx).ok()?;
    Some(scan::hcl_value_to_json(value))
}

fn json_map_to_hcl(map: &HashMap<String, Value>) -> hcl::Value {
    let mut out = hcl::Map::new();
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for k in keys {
        out.insert(k.clone(), json_to_hcl_value(&map[k]));
    }
    hcl::Value::Object(out)
}

fn json_to_hcl_value(value: &Value) -> hcl::Value {
    match value {
        Value::Null => hcl::Value::Null,
        Value::Bool(b) => hcl::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                hcl::Value::from(i)
            } else if let Some(f) = n.as_f64() {
                hcl::Value::from(f)
            } else {
                hcl::Value::Null
            }
        }
        Value::String(s) => hcl::Value::from(s.clone()),
        Value::Array(items) => hcl::Value::Array(items.iter().map(json_to_hcl_value).collect()),
        Value::Object(map) => {
            let mut out = hcl::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), json_to_hcl_value(v));
            }
            hcl::Value::Object(out)
        }
    }
}
