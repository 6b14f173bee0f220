use crate::index::SymbolIndex;

/// Category starters offered when completing a bare identifier. A starter is
/// only suggested when its symbol list is non-empty.
const STARTERS: [&str; 5] = ["var.", "local.", "module.", "data.", "output."];

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':' | b'/')
}

/// Compute completion candidates for `line` with the cursor at byte index
/// `cursor`. Returns the candidates plus the byte range `[start, end)` of the
/// token they replace. Candidates are sorted lexicographically; the engine
/// never reorders by recency.
pub fn candidates(index: &SymbolIndex, line: &str, cursor: usize) -> (Vec<String>, usize, usize) {
    let bytes = line.as_bytes();
    let cursor = cursor.min(bytes.len());
    let mut start = cursor;
    while start > 0 && is_token_byte(bytes[start - 1]) {
        start -= 1;
    }
    let mut end = cursor;
    while end < bytes.len() && is_token_byte(bytes[end]) {
        end += 1;
    }
    let mut token = line[start..end].trim().to_string();

    // Bare category keywords behave as if the user had typed the dot.
    if matches!(
        token.to_lowercase().as_str(),
        "var" | "local" | "module" | "output" | "data"
    ) {
        token.push('.');
    }
    let lower = token.to_lowercase();

    let mut out = Vec::new();
    if lower.starts_with("var.") {
        push_prefixed(&mut out, "var.", &index.variables, &token["var.".len()..]);
    } else if lower.starts_with("local.") {
        push_prefixed(&mut out, "local.", &index.locals, &token["local.".len()..]);
    } else if lower.starts_with("module.") {
        push_prefixed(&mut out, "module.", &index.modules, &token["module.".len()..]);
    } else if lower.starts_with("output.") {
        push_prefixed(&mut out, "output.", &index.outputs, &token["output.".len()..]);
    } else if lower.starts_with("data.") {
        complete_data(index, &token["data.".len()..], &mut out);
    } else {
        complete_resource(index, &token, &lower, &mut out);
    }

    out.sort();
    out.dedup();
    (out, start, end)
}

fn push_prefixed(out: &mut Vec<String>, starter: &str, items: &[String], prefix: &str) {
    for item in items {
        if item.starts_with(prefix) {
            out.push(format!("{starter}{item}"));
        }
    }
}

/// Two-level completion for data sources: before the second dot complete the
/// type, after it complete names under that type.
fn complete_data(index: &SymbolIndex, rest: &str, out: &mut Vec<String>) {
    match rest.split_once('.') {
        None => {
            for dtype in index.data_sources.keys() {
                if dtype.starts_with(rest) {
                    out.push(format!("data.{dtype}"));
                }
            }
        }
        Some((dtype, name_prefix)) => {
            if let Some(names) = index.data_sources.get(dtype) {
                for n in names {
                    if n.starts_with(name_prefix) {
                        out.push(format!("data.{dtype}.{n}"));
                    }
                }
            }
        }
    }
}

/// Resource completion: `<type>`, `<type>.<name>`, then attribute keys for
/// three or more segments. Bare prefixes additionally offer known function
/// names and the category starters for non-empty categories, matched
/// case-insensitively.
fn complete_resource(index: &SymbolIndex, token: &str, lower: &str, out: &mut Vec<String>) {
    let Some(dot) = token.find('.') else {
        for rtype in index.resources.keys() {
            if rtype.starts_with(token) {
                out.push(rtype.clone());
            }
        }
        for func in &index.functions {
            if func.starts_with(lower) {
                out.push(func.clone());
            }
        }
        let category_filled = [
            !index.variables.is_empty(),
            !index.locals.is_empty(),
            !index.modules.is_empty(),
            !index.data_sources.is_empty(),
            !index.outputs.is_empty(),
        ];
        for (starter, filled) in STARTERS.iter().zip(category_filled) {
            if filled && starter.starts_with(lower) {
                out.push(starter.to_string());
            }
        }
        return;
    };

    let rtype = &token[..dot];
    let rest = &token[dot + 1..];
    match rest.split_once('.') {
        None => {
            if let Some(names) = index.resources.get(rtype) {
                for n in names {
                    if n.starts_with(rest) {
                        out.push(format!("{rtype}.{n}"));
                    }
                }
            }
        }
        Some(_) => {
            // Three or more segments: complete attribute keys of the type,
            // replacing only the final segment.
            let Some(attrs) = index.resource_attrs.get(rtype) else {
                return;
            };
            let last_dot = token.rfind('.').unwrap_or(dot);
            let base = &token[..last_dot];
            let attr_prefix = &token[last_dot + 1..];
            for a in attrs {
                if a.starts_with(attr_prefix) {
                    out.push(format!("{base}.{a}"));
                }
            }
        }
    }
}
