//! Bracket-notation query strings (`filters[col][]=v`, `with[]=x`) decoded into nested JSON.

use serde_json::{Map, Value};

/// Parse a raw query string into a JSON object.
///
/// `a=1` sets a key, `a[b]=1` nests, `a[]=1` appends to an array. A repeated
/// plain key keeps the last value.
pub fn parse_query(raw: &str) -> Value {
    let mut root = Value::Object(Map::new());
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let path = split_key(&key);
        if path.is_empty() {
            continue;
        }
        assign(&mut root, &path, Value::String(value.into_owned()));
    }
    root
}

fn split_key(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return if key.is_empty() { Vec::new() } else { vec![key.to_string()] };
    };

    let head = &key[..open];
    if head.is_empty() {
        return Vec::new();
    }

    let mut path = vec![head.to_string()];
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            break;
        };
        path.push(stripped[..close].to_string());
        rest = &stripped[close + 1..];
    }
    path
}

fn assign(target: &mut Value, path: &[String], value: Value) {
    let (segment, rest) = match path.split_first() {
        Some(split) => split,
        None => return,
    };

    if segment.is_empty() {
        if !target.is_array() {
            *target = Value::Array(Vec::new());
        }
        if let Value::Array(items) = target {
            if rest.is_empty() {
                items.push(value);
            } else {
                let mut child = Value::Null;
                assign(&mut child, rest, value);
                items.push(child);
            }
        }
        return;
    }

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        if rest.is_empty() {
            map.insert(segment.clone(), value);
        } else {
            let child = map.entry(segment.clone()).or_insert(Value::Null);
            assign(child, rest, value);
        }
    }
}

/// Top-level string parameter.
pub fn string_param<'a>(query: &'a Value, key: &str) -> Option<&'a str> {
    query.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

/// A parameter given either as a list (`with[]=a`) or a single comma-free value.
pub fn list_param(query: &Value, key: &str) -> Vec<String> {
    match query.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => vec![single.clone()],
        Some(Value::Object(map)) => map
            .values()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
