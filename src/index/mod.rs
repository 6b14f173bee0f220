pub mod functions;
pub mod modfetch;
pub mod schema;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::anyhow;

use crate::scan;

/// Discovered Terraform symbols powering completion. All lists are
/// deduplicated and sorted; the index is an immutable snapshot replaced
/// wholesale on rebuild.
#[derive(Debug, Default, Clone)]
pub struct SymbolIndex {
    pub variables: Vec<String>,
    pub locals: Vec<String>,
    pub modules: Vec<String>,
    pub outputs: Vec<String>,
    /// Managed resource names by type.
    pub resources: BTreeMap<String, Vec<String>>,
    /// Data source names by type.
    pub data_sources: BTreeMap<String, Vec<String>>,
    /// Attribute keys seen in config per resource type, optionally enriched
    /// from provider schemas.
    pub resource_attrs: BTreeMap<String, Vec<String>>,
    /// Attribute keys per data source type.
    pub data_attrs: BTreeMap<String, Vec<String>>,
    /// Known Terraform function names (lowercase).
    pub functions: Vec<String>,
}

#[derive(Default)]
struct IndexBuilder {
    variables: BTreeSet<String>,
    locals: BTreeSet<String>,
    modules: BTreeSet<String>,
    outputs: BTreeSet<String>,
    resources: BTreeMap<String, BTreeSet<String>>,
    data_sources: BTreeMap<String, BTreeSet<String>>,
    resource_attrs: BTreeMap<String, BTreeSet<String>>,
    data_attrs: BTreeMap<String, BTreeSet<String>>,
}

impl IndexBuilder {
    fn finish(self) -> SymbolIndex {
        fn flatten(map: BTreeMap<String, BTreeSet<String>>) -> BTreeMap<String, Vec<String>> {
            map.into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect()
        }
        SymbolIndex {
            variables: self.variables.into_iter().collect(),
            locals: self.locals.into_iter().collect(),
            modules: self.modules.into_iter().collect(),
            outputs: self.outputs.into_iter().collect(),
            resources: flatten(self.resources),
            data_sources: flatten(self.data_sources),
            resource_attrs: flatten(self.resource_attrs),
            data_attrs: flatten(self.data_attrs),
            functions: Vec::new(),
        }
    }
}

/// Walk the module tree rooted at `root` and build the completion index.
/// Nested modules come from the external modules manifest when present,
/// otherwise from local module-call recursion; previously fetched remote
/// sources under `module_cache` are indexed too. Files that fail to parse are
/// skipped and reported in the error list; the index itself is always
/// returned.
pub fn build_symbol_index(
    root: &Path,
    module_cache: Option<&Path>,
) -> (SymbolIndex, Vec<anyhow::Error>) {
    let mut builder = IndexBuilder::default();
    let mut errors = Vec::new();

    let mut dirs: Vec<PathBuf> = scan::module_dirs(root).into_iter().map(|(_, d)| d).collect();
    if let Some(cache) = module_cache {
        for (_, source) in module_sources(root) {
            if let Some(dir) = modfetch::cached_dir(&source, cache) {
                dirs.push(dir);
            }
        }
    }
    for dir in dirs {
        index_module_dir(&dir, &mut builder, &mut errors);
    }
    (builder.finish(), errors)
}

/// Module call `(name, source)` pairs declared anywhere in the module tree.
pub fn module_sources(root: &Path) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (_, dir) in scan::module_dirs(root) {
        for file in scan::tf_files_in_dir(&dir) {
            let Some(parsed) = scan::parsed_file(&file) else {
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
                            if let Some(serde_json::Value::String(src)) =
                                scan::const_value(&scan::expr_source(attr))
                            {
                                out.push((name.clone(), src));
                            }
                        }
                    }
                }
            }
        }
    }
    out
}

fn index_module_dir(dir: &Path, builder: &mut IndexBuilder, errors: &mut Vec<anyhow::Error>) {
    for file in scan::tf_files_in_dir(dir) {
        let Some(parsed) = scan::parsed_file(&file) else {
            errors.push(anyhow!("skipping unparsable file {}", file.display()));
            continue;
        };
        for structure in parsed.body.iter() {
            let Some(block) = structure.as_block() else {
                continue;
            };
            let labels: Vec<&str> = block.labels.iter().map(|l| l.as_str()).collect();
            match block.ident.value().as_str() {
                "variable" if !labels.is_empty() => {
                    builder.variables.insert(labels[0].to_string());
                }
                "output" if !labels.is_empty() => {
                    builder.outputs.insert(labels[0].to_string());
                }
                "module" if !labels.is_empty() => {
                    builder.modules.insert(labels[0].to_string());
                }
                "locals" => {
                    for inner in block.body.iter() {
                        if let Some(attr) = inner.as_attribute() {
                            builder.locals.insert(attr.key.value().as_str().to_string());
                        }
                    }
                }
                "resource" if labels.len() >= 2 => {
                    builder
                        .resources
                        .entry(labels[0].to_string())
                        .or_default()
                        .insert(labels[1].to_string());
                    collect_attr_keys(
                        &block.body,
                        builder.resource_attrs.entry(labels[0].to_string()).or_default(),
                    );
                }
                "data" if labels.len() >= 2 => {
                    builder
                        .data_sources
                        .entry(labels[0].to_string())
                        .or_default()
                        .insert(labels[1].to_string());
                    collect_attr_keys(
                        &block.body,
                        builder.data_attrs.entry(labels[0].to_string()).or_default(),
                    );
                }
                _ => {}
            }
        }
    }
}

fn collect_attr_keys(body: &hcl_edit::structure::Body, out: &mut BTreeSet<String>) {
    for structure in body.iter() {
        if let Some(attr) = structure.as_attribute() {
            let key = attr.key.value().as_str();
            if !scan::is_meta_arg(key) {
                out.insert(key.to_string());
            }
        } else if let Some(block) = structure.as_block() {
            let ident = block.ident.value().as_str();
            if !ident.is_empty() && !scan::is_meta_arg(ident) {
                out.insert(ident.to_string());
            }
        }
    }
}
