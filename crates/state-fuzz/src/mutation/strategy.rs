use std::{fs, path::Path};

use libafl_bolts::rands::Rand;
use serde::Deserialize;

use super::{LoadError, operators::OperatorRegistry};
use crate::{predicate::Predicate, state::StateDict};

#[derive(Debug, Deserialize)]
struct RawStrategy {
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    operators: Vec<(String, f64)>,
}

/// One weighted entry of a rule's operator menu.
#[derive(Debug, Clone)]
pub struct WeightedOperator {
    pub name: String,
    pub weight: f64,
}

/// A validated rule: optional condition plus a weighted operator menu.
#[derive(Debug, Clone)]
pub struct Rule {
    label: String,
    condition: Option<Predicate>,
    operators: Vec<WeightedOperator>,
    total_weight: f64,
}

impl Rule {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn condition(&self) -> Option<&Predicate> {
        self.condition.as_ref()
    }

    pub fn operators(&self) -> &[WeightedOperator] {
        &self.operators
    }

    /// An absent condition always matches; an erroring one never does.
    pub fn matches(&self, context: &StateDict) -> bool {
        self.condition
            .as_ref()
            .is_none_or(|condition| condition.holds(context))
    }

    /// Weighted sample over the operator menu.
    pub fn sample_operator<R: Rand>(&self, rand: &mut R) -> &WeightedOperator {
        let mut target = rand.next_float() * self.total_weight;
        for operator in &self.operators {
            if target < operator.weight {
                return operator;
            }
            target -= operator.weight;
        }
        // Floating-point round-off can walk past the end.
        self.operators.last().expect("validated as non-empty")
    }
}

/// An ordered rule list. Rule order is part of the semantics: selection is
/// first-match.
#[derive(Debug, Clone)]
pub struct Strategy {
    rules: Vec<Rule>,
}

impl Strategy {
    pub fn from_file(path: &Path, registry: &OperatorRegistry) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::StrategyNotFound {
                path: path.to_owned(),
            });
        }
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&text, registry)
    }

    pub fn from_json(text: &str, registry: &OperatorRegistry) -> Result<Self, LoadError> {
        let raw: RawStrategy = serde_json::from_str(text).map_err(LoadError::Parse)?;
        Self::compile(raw, registry)
    }

    fn compile(raw: RawStrategy, registry: &OperatorRegistry) -> Result<Self, LoadError> {
        if raw.rules.is_empty() {
            return Err(LoadError::NoRules);
        }
        let rules = raw
            .rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| compile_rule(index, rule, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// First rule whose condition is absent or holds for the context.
    pub fn select(&self, context: &StateDict) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(context))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

fn compile_rule(index: usize, raw: RawRule, registry: &OperatorRegistry) -> Result<Rule, LoadError> {
    let label = raw.name.unwrap_or_else(|| format!("rule #{index}"));
    if raw.operators.is_empty() {
        return Err(LoadError::EmptyOperators { rule: label });
    }
    let mut operators = Vec::with_capacity(raw.operators.len());
    for (name, weight) in raw.operators {
        if !registry.contains(&name) {
            return Err(LoadError::UnknownOperator {
                rule: label.clone(),
                operator: name,
            });
        }
        if !(weight > 0.0 && weight.is_finite()) {
            return Err(LoadError::InvalidWeight {
                rule: label.clone(),
                operator: name,
                weight,
            });
        }
        operators.push(WeightedOperator { name, weight });
    }
    let condition = raw
        .condition
        .map(|condition| {
            Predicate::parse(&condition).map_err(|source| LoadError::Condition {
                rule: label.clone(),
                source,
            })
        })
        .transpose()?;
    let total_weight = operators.iter().map(|operator| operator.weight).sum();
    Ok(Rule {
        label,
        condition,
        operators,
        total_weight,
    })
}
