//! Extraction of `name: value` observation samples from target output.

use crate::{
    config::{ObservationSpec, ObservationType},
    observation::{Samples, Value},
};

/// Scan raw output for the configured observations.
///
/// Every line is checked against every declared name: the first occurrence
/// of `name:` yields the next whitespace-delimited token, coerced by the
/// declared type. Coercion failures drop the single value; repeated hits
/// across lines append in emission order.
pub fn extract_samples(output: &[u8], specs: &[ObservationSpec]) -> Samples {
    let mut samples = Samples::new();
    for line in output.split(|&byte| byte == b'\n') {
        let line = line.trim_ascii();
        for spec in specs {
            let pattern = format!("{}:", spec.name);
            let Some(index) = find_subslice(line, pattern.as_bytes()) else {
                continue;
            };
            let rest = &line[index + pattern.len()..];
            let Some(token) = first_token(rest) else {
                continue;
            };
            if let Some(value) = coerce(token, spec.value_type) {
                samples.entry(spec.name.clone()).or_default().push(value);
            }
        }
    }
    samples
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn first_token(rest: &[u8]) -> Option<&[u8]> {
    let rest = rest.trim_ascii_start();
    if rest.is_empty() {
        return None;
    }
    let end = rest
        .iter()
        .position(|byte| byte.is_ascii_whitespace())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn coerce(token: &[u8], value_type: ObservationType) -> Option<Value> {
    match value_type {
        ObservationType::Int => {
            let text = std::str::from_utf8(token).ok()?;
            text.parse::<i64>().ok().map(Value::Int)
        }
        ObservationType::Float => {
            let text = std::str::from_utf8(token).ok()?;
            text.parse::<f64>().ok().map(Value::Float)
        }
        ObservationType::Bool => {
            let text = std::str::from_utf8(token).ok()?;
            if let Ok(number) = text.parse::<i64>() {
                return Some(Value::Int(number));
            }
            match text.to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(Value::Int(1)),
                "false" | "no" => Some(Value::Int(0)),
                _ => None,
            }
        }
        ObservationType::String => match std::str::from_utf8(token) {
            Ok(text) => Some(Value::Str(text.to_owned())),
            // Observations stay byte-clean when the target emits raw data.
            Err(_) => Some(Value::Bytes(token.to_vec())),
        },
    }
}
