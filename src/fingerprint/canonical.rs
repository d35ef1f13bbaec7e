// src/fingerprint/canonical.rs

//! Canonical text rendering of step parameters.
//!
//! Table keys are emitted in sorted order and every scalar carries a type
//! tag, so two parameter tables that are equal as data always render to the
//! same string regardless of how they were written in the manifest.

use std::collections::BTreeMap;

use toml::Value;

pub fn canonical_params(params: &toml::Table) -> String {
    let sorted: BTreeMap<&String, &Value> = params.iter().collect();
    render_table(sorted)
}

pub fn canonical_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("s{}", quote(s)),
        Value::Integer(i) => format!("i{i}"),
        // `{:?}` keeps a trailing `.0` and round-trips exactly.
        Value::Float(f) if f.is_nan() => "fNaN".to_string(),
        Value::Float(f) => format!("f{f:?}"),
        Value::Boolean(b) => format!("b{b}"),
        Value::Datetime(dt) => format!("d{}", quote(&dt.to_string())),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_value).collect();
            format!("[{}]", items.join(","))
        }
        Value::Table(table) => render_table(table.iter().collect()),
    }
}

fn render_table(entries: BTreeMap<&String, &Value>) -> String {
    let items: Vec<String> = entries
        .into_iter()
        .map(|(k, v)| format!("{}:{}", quote(k), canonical_value(v)))
        .collect();
    format!("{{{}}}", items.join(","))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
