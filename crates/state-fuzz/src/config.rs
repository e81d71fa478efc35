//! Run configuration consumed by the harness and the fuzzing loop.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::state::StateSpecItem;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config document")]
    Parse(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub target: TargetConfig,
    pub fuzzer: FuzzerConfig,
    pub coverage_plateau_timeout_seconds: f64,
}

impl RunConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(ConfigError::Parse)
    }

    pub fn per_run_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fuzzer.per_run_timeout)
    }

    pub fn coverage_plateau_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.coverage_plateau_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub binary_path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Exit code that counts as a crash, e.g. for targets with their own
    /// fault handler.
    #[serde(default)]
    pub crash_exit_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FuzzerConfig {
    /// Seconds per target run.
    pub per_run_timeout: f64,
    #[serde(default)]
    pub execution_values: Vec<ObservationSpec>,
    #[serde(default)]
    pub execution_state: Vec<StateSpecItem>,
    #[serde(default)]
    pub mutation_context: Vec<StateSpecItem>,
    /// Escape-encoded seed inputs, decoded to bytes at this boundary.
    #[serde(default)]
    pub seed_inputs: Vec<String>,
}

impl FuzzerConfig {
    pub fn decoded_seed_inputs(&self) -> Vec<Vec<u8>> {
        self.seed_inputs
            .iter()
            .map(|seed| unescape_bytes(seed))
            .collect()
    }
}

/// One declared observation: the harness scans target output for
/// `<name>: <value>` and coerces the value to this type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObservationSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: ObservationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    Int,
    Float,
    Bool,
    #[default]
    String,
}

/// Decode the escape syntax of seed inputs into raw bytes.
///
/// Supports `\n`, `\t`, `\r`, `\0`, `\\`, `\'`, `\"` and `\xNN`; an
/// unrecognized escape is kept literally. Characters outside the escape
/// syntax pass through as their UTF-8 bytes. This is the only place where
/// text turns into fuzzing bytes.
pub fn unescape_bytes(text: &str) -> Vec<u8> {
    let chars: Vec<char> = text.chars().collect();
    let mut bytes = Vec::with_capacity(text.len());
    let mut pos = 0;
    while pos < chars.len() {
        let ch = chars[pos];
        if ch != '\\' {
            push_char(&mut bytes, ch);
            pos += 1;
            continue;
        }
        match chars.get(pos + 1).copied() {
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('0') => bytes.push(0),
            Some('\\') => bytes.push(b'\\'),
            Some('\'') => bytes.push(b'\''),
            Some('"') => bytes.push(b'"'),
            Some('x') => {
                let high = chars.get(pos + 2).and_then(|c| c.to_digit(16));
                let low = chars.get(pos + 3).and_then(|c| c.to_digit(16));
                match high.zip(low) {
                    Some((high, low)) => {
                        bytes.push((high * 16 + low) as u8);
                        pos += 4;
                        continue;
                    }
                    // Malformed \x escape stays literal.
                    None => bytes.extend_from_slice(b"\\x"),
                }
            }
            Some(other) => {
                bytes.push(b'\\');
                push_char(&mut bytes, other);
            }
            None => {
                bytes.push(b'\\');
                pos += 1;
                continue;
            }
        }
        pos += 2;
    }
    bytes
}

fn push_char(bytes: &mut Vec<u8>, ch: char) {
    let mut buffer = [0u8; 4];
    bytes.extend_from_slice(ch.encode_utf8(&mut buffer).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(b"hello".to_vec(), unescape_bytes("hello"));
    }

    #[test]
    fn standard_escapes() {
        assert_eq!(b"a\nb\tc\0d\\e".to_vec(), unescape_bytes("a\\nb\\tc\\0d\\\\e"));
    }

    #[test]
    fn hex_escapes() {
        assert_eq!(vec![0x41, 0xff, 0x00], unescape_bytes("\\x41\\xff\\x00"));
    }

    #[test]
    fn malformed_hex_escape_stays_literal() {
        assert_eq!(b"\\xg1".to_vec(), unescape_bytes("\\xg1"));
        assert_eq!(b"\\x".to_vec(), unescape_bytes("\\x"));
    }

    #[test]
    fn unknown_escape_stays_literal() {
        assert_eq!(b"\\q".to_vec(), unescape_bytes("\\q"));
    }

    #[test]
    fn trailing_backslash_is_kept() {
        assert_eq!(b"ab\\".to_vec(), unescape_bytes("ab\\"));
    }

    #[test]
    fn full_config_deserializes() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "target": {"binary_path": "/opt/target", "args": ["--stdin"]},
                "fuzzer": {
                    "per_run_timeout": 1.5,
                    "execution_values": [
                        {"name": "phase", "type": "string"},
                        {"name": "count", "type": "int"},
                        {"name": "ok", "type": "bool"}
                    ],
                    "execution_state": [
                        {"type": "value", "name": "phase"},
                        {"type": "sum", "name": "count"},
                        {"type": "predicate", "expr": "count > 3"},
                        {"type": "counter", "expr": "ok"},
                        {"type": "set", "name": "phase"}
                    ],
                    "mutation_context": [{"type": "value", "name": "count"}],
                    "seed_inputs": ["GET /\\n", "\\x00\\x01"]
                },
                "coverage_plateau_timeout_seconds": 30
            }"#,
        )
        .unwrap();

        assert_eq!(5, config.fuzzer.execution_state.len());
        assert_eq!(
            ObservationType::Bool,
            config.fuzzer.execution_values[2].value_type
        );
        assert_eq!(
            vec![b"GET /\n".to_vec(), vec![0x00, 0x01]],
            config.fuzzer.decoded_seed_inputs()
        );
        assert_eq!(Duration::from_secs_f64(1.5), config.per_run_timeout());
        assert_eq!(
            Duration::from_secs(30),
            config.coverage_plateau_timeout()
        );
    }

    #[test]
    fn observation_type_defaults_to_string() {
        let spec: ObservationSpec = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(ObservationType::String, spec.value_type);
    }
}
