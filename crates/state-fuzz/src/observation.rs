use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use indexmap::IndexMap;
use serde::Serialize;

/// Observation samples of one execution, keyed by name in emission order.
pub type Samples = IndexMap<String, Vec<Value>>;

/// Name → value environment, e.g. the latest observation per name.
pub type Env = IndexMap<String, Value>;

/// A single observed value.
///
/// Booleans are represented as integers, opaque data as bytes. `Seq` only
/// appears as the canonicalized form of `set` state items.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
}

impl Value {
    /// Truthiness: zero and empty values are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(v) => !v.is_empty(),
            Value::Bytes(v) => !v.is_empty(),
            Value::Seq(v) => !v.is_empty(),
        }
    }

    /// Integer coercion used by `sum` state items. `None` marks a value that
    /// cannot be summed; the caller skips it.
    pub fn coerce_to_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Str(v) => v.trim().parse().ok(),
            Value::Bytes(v) => std::str::from_utf8(v).ok()?.trim().parse().ok(),
            Value::Seq(_) => None,
        }
    }

    /// Canonical form used inside `set` state items: bytes and integers
    /// unchanged, everything else through its string rendering.
    pub fn canonical_for_set(&self) -> Value {
        match self {
            Value::Int(_) | Value::Bytes(_) => self.clone(),
            Value::Str(_) => self.clone(),
            other => Value::Str(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Int(_) => 0,
            Value::Float(_) => 1,
            Value::Str(_) => 2,
            Value::Bytes(_) => 3,
            Value::Seq(_) => 4,
        }
    }
}

/// Total order: by variant, then within the variant. Floats use the IEEE
/// total order so that `Eq`/`Hash`/`Ord` agree.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Seq(a), Value::Seq(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Str(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Seq(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{}", v.escape_ascii()),
            Value::Seq(values) => {
                write!(f, "(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Latest observation per name, preserving name emission order.
pub fn latest_values(samples: &Samples) -> Env {
    samples
        .iter()
        .filter_map(|(name, values)| Some((name.clone(), values.last()?.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Bytes(vec![0]).is_truthy());
    }

    #[test]
    fn int_coercion() {
        assert_eq!(Some(7), Value::Int(7).coerce_to_int());
        assert_eq!(Some(3), Value::Float(3.9).coerce_to_int());
        assert_eq!(Some(-2), Value::Str(" -2 ".into()).coerce_to_int());
        assert_eq!(None, Value::Str("seven".into()).coerce_to_int());
    }

    #[test]
    fn ordering_is_total_across_variants() {
        let mut values = vec![
            Value::Str("b".into()),
            Value::Int(2),
            Value::Float(1.5),
            Value::Int(1),
        ];
        values.sort();
        assert_eq!(
            vec![
                Value::Int(1),
                Value::Int(2),
                Value::Float(1.5),
                Value::Str("b".into()),
            ],
            values
        );
    }

    #[test]
    fn latest_takes_last_sample() {
        let mut samples = Samples::new();
        samples.insert("x".into(), vec![Value::Int(1), Value::Int(5)]);
        samples.insert("y".into(), vec![]);
        let latest = latest_values(&samples);
        assert_eq!(Some(&Value::Int(5)), latest.get("x"));
        assert!(!latest.contains_key("y"));
    }
}
