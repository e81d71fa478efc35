//! Declarative projection of per-run observations into a structured state.
//!
//! A [`StateSpecItem`] list describes how to fold the observation samples of
//! one execution into a [`StateDict`]; [`canonicalize`](projector::canonicalize)
//! flattens that dict into the order-preserving [`StateTuple`] used as the
//! corpus-novelty key.

mod projector;

use std::fmt;

use derive_more::derive::Deref;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use projector::{canonicalize, project};

use crate::observation::Value;

/// One item of an `execution_state` or `mutation_context` spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StateSpecItem {
    /// The last observed value of `name`.
    Value { name: String },
    /// The integer sum over all observed values of `name`.
    Sum { name: String },
    /// 0/1 result of `expr` over the latest-values environment.
    Predicate { expr: String },
    /// Number of sample steps at which `expr` holds.
    Counter { expr: String },
    /// The sorted set of unique observed values of `name`.
    Set { name: String },
}

impl StateSpecItem {
    /// The display key this item contributes to the state dict.
    pub fn key(&self) -> &str {
        match self {
            StateSpecItem::Value { name }
            | StateSpecItem::Sum { name }
            | StateSpecItem::Set { name } => name,
            StateSpecItem::Predicate { expr } | StateSpecItem::Counter { expr } => expr,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            StateSpecItem::Value { .. } => "value",
            StateSpecItem::Sum { .. } => "sum",
            StateSpecItem::Predicate { .. } => "predicate",
            StateSpecItem::Counter { .. } => "count",
            StateSpecItem::Set { .. } => "set",
        }
    }

    /// The label under which this item appears in the state tuple. Keeping
    /// the kind in the label prevents collisions between items of different
    /// kinds that share a name.
    pub fn label(&self) -> String {
        format!("{} ({})", self.key(), self.kind())
    }
}

/// Display key → computed value, in spec declaration order.
pub type StateDict = IndexMap<String, Value>;

/// Canonical flattening of a state dict: labelled pairs in spec order.
///
/// Two tuples compare equal exactly when the underlying dicts agree on the
/// present keys, independent of map iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deref)]
pub struct StateTuple(Vec<(String, Value)>);

impl StateTuple {
    pub fn entries(&self) -> &[(String, Value)] {
        &self.0
    }
}

impl FromIterator<(String, Value)> for StateTuple {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for StateTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (label, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{label} = {value}")?;
        }
        Ok(())
    }
}
