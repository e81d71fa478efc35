//! Rule-based, state-aware mutation of byte inputs.
//!
//! The engine binds a statically-linked [`OperatorRegistry`] to a strategy
//! document, picks the first rule whose condition holds for the current
//! mutation context, weight-samples an operator from that rule, and
//! deduplicates results through a bounded digest history.

mod history;
mod operators;
mod strategy;

use std::{
    io,
    path::{Path, PathBuf},
};

use libafl_bolts::rands::StdRand;
use thiserror::Error;

pub use history::{Digest, MAX_HISTORY_SIZE, MutationHistory, digest_of};
pub use operators::{OperatorError, OperatorFn, OperatorRegistry};
pub use strategy::{Rule, Strategy, WeightedOperator};

use crate::{predicate::ParseError, state::StateDict};

pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Startup-time failures. All of these abort before any mutation happens.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no operators loaded")]
    NoOperators,
    #[error("strategy file not found: {}", path.display())]
    StrategyNotFound { path: PathBuf },
    #[error("reading strategy file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed strategy document")]
    Parse(#[source] serde_json::Error),
    #[error("strategy defines no rules")]
    NoRules,
    #[error("rule '{rule}' has an empty operator list")]
    EmptyOperators { rule: String },
    #[error("rule '{rule}' references unknown operator '{operator}'")]
    UnknownOperator { rule: String, operator: String },
    #[error("rule '{rule}' gives operator '{operator}' a non-positive weight ({weight})")]
    InvalidWeight {
        rule: String,
        operator: String,
        weight: f64,
    },
    #[error("rule '{rule}' has a malformed condition")]
    Condition {
        rule: String,
        #[source]
        source: ParseError,
    },
}

/// Failures of a single mutation call.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("no rule matches mutation context: {context:?}")]
    NoRuleMatches { context: StateDict },
    #[error("operator '{operator}' failed")]
    OperatorFailed {
        operator: String,
        #[source]
        source: OperatorError,
    },
}

#[derive(Debug)]
pub struct MutationEngine {
    operators: OperatorRegistry,
    strategy: Strategy,
    strategy_path: PathBuf,
    history: MutationHistory,
    max_retries: usize,
    rand: StdRand,
}

impl MutationEngine {
    /// Load and validate the strategy against the operator registry.
    pub fn load(
        operators: OperatorRegistry,
        strategy_path: impl Into<PathBuf>,
        rand: StdRand,
    ) -> Result<Self, LoadError> {
        let strategy_path = strategy_path.into();
        if operators.is_empty() {
            return Err(LoadError::NoOperators);
        }
        let strategy = Strategy::from_file(&strategy_path, &operators)?;
        Ok(Self {
            operators,
            strategy,
            strategy_path,
            history: MutationHistory::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            rand,
        })
    }

    /// Re-read the strategy from disk. Validation happens on a fresh
    /// strategy value, so a failed reload leaves the engine unchanged.
    pub fn reload(&mut self) -> Result<(), LoadError> {
        let strategy = Strategy::from_file(&self.strategy_path, &self.operators)?;
        self.strategy = strategy;
        Ok(())
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn strategy_path(&self) -> &Path {
        &self.strategy_path
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    /// First-match rule selection for a context.
    pub fn select_rule(&self, context: &StateDict) -> Result<&Rule, MutationError> {
        self.strategy
            .select(context)
            .ok_or_else(|| MutationError::NoRuleMatches {
                context: context.clone(),
            })
    }

    /// Produce up to `count` mutations of `data`.
    ///
    /// Each mutation re-runs rule selection, weight-samples an operator and
    /// retries duplicate results up to the retry bound; a still-colliding
    /// final attempt is emitted anyway so the batch never shrinks.
    pub fn mutate(
        &mut self,
        data: &[u8],
        context: &StateDict,
        count: usize,
    ) -> Result<Vec<(Vec<u8>, String)>, MutationError> {
        let mut mutations = Vec::with_capacity(count);
        for _ in 0..count {
            let rule = self
                .strategy
                .select(context)
                .ok_or_else(|| MutationError::NoRuleMatches {
                    context: context.clone(),
                })?;
            let operator_name = rule.sample_operator(&mut self.rand).name.clone();
            let operator = self
                .operators
                .get(&operator_name)
                .expect("strategy was validated against the registry");

            let mut attempt = Vec::new();
            for _ in 0..self.max_retries {
                attempt = operator(&mut self.rand, data, context).map_err(|source| {
                    MutationError::OperatorFailed {
                        operator: operator_name.clone(),
                        source,
                    }
                })?;
                if self.history.observe(digest_of(&attempt)) {
                    break;
                }
            }
            mutations.push((attempt, operator_name));
        }
        Ok(mutations)
    }

    pub fn history(&self) -> &MutationHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use libafl_bolts::rands::StdRand;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::observation::Value;

    fn constant_same(
        _rand: &mut StdRand,
        _data: &[u8],
        _ctx: &StateDict,
    ) -> Result<Vec<u8>, OperatorError> {
        Ok(b"same".to_vec())
    }

    fn always_fails(
        _rand: &mut StdRand,
        _data: &[u8],
        _ctx: &StateDict,
    ) -> Result<Vec<u8>, OperatorError> {
        Err(OperatorError("broken".into()))
    }

    fn echo_context(
        _rand: &mut StdRand,
        data: &[u8],
        ctx: &StateDict,
    ) -> Result<Vec<u8>, OperatorError> {
        let mut out = data.to_vec();
        if let Some(Value::Int(n)) = ctx.get("n") {
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Ok(out)
    }

    fn strategy_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn engine_with(registry: OperatorRegistry, strategy: &str) -> MutationEngine {
        let file = strategy_file(strategy);
        let engine =
            MutationEngine::load(registry, file.path(), StdRand::with_seed(99)).unwrap();
        // The strategy is parsed eagerly; the path is only read again by
        // reload(), which these engines do not call.
        drop(file);
        engine
    }

    fn context(pairs: &[(&str, i64)]) -> StateDict {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), Value::Int(*value)))
            .collect()
    }

    #[test]
    fn empty_registry_is_a_load_error() {
        let file = strategy_file(r#"{"rules": [{"operators": [["x", 1]]}]}"#);
        let result = MutationEngine::load(
            OperatorRegistry::empty(),
            file.path(),
            StdRand::with_seed(0),
        );
        assert!(matches!(result, Err(LoadError::NoOperators)));
    }

    #[test]
    fn missing_strategy_file_is_a_load_error() {
        let result = MutationEngine::load(
            OperatorRegistry::builtin(),
            "/nonexistent/strategy.json",
            StdRand::with_seed(0),
        );
        assert!(matches!(result, Err(LoadError::StrategyNotFound { .. })));
    }

    #[test]
    fn duplicate_results_are_retried_then_emitted() {
        let mut registry = OperatorRegistry::empty();
        registry.register("same", constant_same);
        let mut engine = engine_with(registry, r#"{"rules": [{"operators": [["same", 1]]}]}"#);

        let mutations = engine.mutate(b"x", &StateDict::new(), 3).unwrap();
        assert_eq!(3, mutations.len());
        let distinct: std::collections::HashSet<_> =
            mutations.iter().map(|(bytes, _)| bytes.clone()).collect();
        assert_eq!(1, distinct.len());
        assert_eq!(b"same".to_vec(), mutations[0].0);
    }

    #[test]
    fn batch_outputs_have_distinct_digests_when_possible() {
        let mut engine = engine_with(
            OperatorRegistry::builtin(),
            r#"{"rules": [{"operators": [["insert_random_bytes", 1]]}]}"#,
        );
        let mutations = engine
            .mutate(b"seed input", &StateDict::new(), 16)
            .unwrap();
        let distinct: std::collections::HashSet<_> =
            mutations.iter().map(|(bytes, _)| digest_of(bytes)).collect();
        assert_eq!(16, distinct.len());
    }

    #[test]
    fn no_matching_rule_is_an_error() {
        let mut engine = engine_with(
            OperatorRegistry::builtin(),
            r#"{"rules": [{"condition": "n == 0", "operators": [["bit_flip", 1]]}]}"#,
        );
        let result = engine.mutate(b"x", &context(&[("n", 1)]), 1);
        assert!(matches!(result, Err(MutationError::NoRuleMatches { .. })));
    }

    #[test]
    fn operator_failure_is_surfaced_with_its_name() {
        let mut registry = OperatorRegistry::empty();
        registry.register("broken", always_fails);
        let mut engine = engine_with(registry, r#"{"rules": [{"operators": [["broken", 1]]}]}"#);
        let result = engine.mutate(b"x", &StateDict::new(), 1);
        assert!(matches!(
            result,
            Err(MutationError::OperatorFailed { operator, .. }) if operator == "broken"
        ));
    }

    #[test]
    fn operators_see_the_mutation_context() {
        let mut registry = OperatorRegistry::empty();
        registry.register("echo_context", echo_context);
        let mut engine = engine_with(
            registry,
            r#"{"rules": [{"operators": [["echo_context", 1]]}]}"#,
        );
        let mutations = engine.mutate(b"in:", &context(&[("n", 7)]), 1).unwrap();
        assert_eq!(b"in:7".to_vec(), mutations[0].0);
    }

    #[test]
    fn context_steers_rule_selection() {
        let mut registry = OperatorRegistry::empty();
        registry.register("same", constant_same);
        registry.register("echo_context", echo_context);
        let mut engine = engine_with(
            registry,
            r#"{"rules": [
                {"name": "stuck", "condition": "n == 0", "operators": [["same", 1]]},
                {"name": "progress", "operators": [["echo_context", 1]]}
            ]}"#,
        );
        let (_, op) = engine
            .mutate(b"x", &context(&[("n", 0)]), 1)
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!("same", op);
        let (_, op) = engine
            .mutate(b"x", &context(&[("n", 3)]), 1)
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!("echo_context", op);
    }

    #[test]
    fn failed_reload_keeps_the_previous_strategy() {
        let mut file = strategy_file(r#"{"rules": [{"name": "good", "operators": [["bit_flip", 1]]}]}"#);
        let mut engine =
            MutationEngine::load(OperatorRegistry::builtin(), file.path(), StdRand::with_seed(5))
                .unwrap();

        // Clobber the file with garbage; reload must fail and change nothing.
        file.as_file_mut().set_len(0).unwrap();
        file.write_all(b"{ not json").unwrap();
        file.flush().unwrap();
        assert!(engine.reload().is_err());
        assert_eq!("good", engine.strategy().rules()[0].label());
        assert!(engine.mutate(b"x", &StateDict::new(), 1).is_ok());
    }

    #[test]
    fn successful_reload_swaps_the_strategy() {
        let mut file = strategy_file(r#"{"rules": [{"name": "old", "operators": [["bit_flip", 1]]}]}"#);
        let mut engine =
            MutationEngine::load(OperatorRegistry::builtin(), file.path(), StdRand::with_seed(5))
                .unwrap();

        file.as_file_mut().set_len(0).unwrap();
        use std::io::Seek;
        file.as_file_mut().rewind().unwrap();
        file.write_all(br#"{"rules": [{"name": "new", "operators": [["swap_bytes", 2]]}]}"#)
            .unwrap();
        file.flush().unwrap();
        engine.reload().unwrap();
        assert_eq!("new", engine.strategy().rules()[0].label());
    }
}
