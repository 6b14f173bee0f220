use serde_json::Value;

/// Recursively normalize a value before storing it in state. Strings that
/// survive a whitespace trim and one level of unquoting and then parse as JSON
/// are expanded into the parsed form, so stringified JSON never masquerades as
/// a scalar. Idempotent: sanitizing a sanitized value is a no-op.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let mut s = s.trim().to_string();
            if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
                if let Ok(unquoted) = serde_json::from_str::<String>(&s) {
                    s = unquoted;
                }
            }
            if looks_like_json(&s) {
                if let Ok(parsed) = serde_json::from_str::<Value>(&s) {
                    return sanitize_value(parsed);
                }
            }
            Value::String(s)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

fn looks_like_json(s: &str) -> bool {
    matches!(
        s.as_bytes().first(),
        Some(b'{' | b'[' | b'"' | b't' | b'f' | b'n' | b'-' | b'0'..=b'9')
    )
}

/// Deep equality over JSON-like values with numbers compared across
/// integer/float representations. `null` equals only `null`; sequences and
/// maps recurse elementwise.
pub fn deep_equal_jsonish(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal_jsonish(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, v)| ym.get(k).map(|w| deep_equal_jsonish(v, w)).unwrap_or(false))
        }
        _ => false,
    }
}
