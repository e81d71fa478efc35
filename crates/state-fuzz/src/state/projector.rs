use itertools::Itertools;
use tracing::debug;

use super::{StateDict, StateSpecItem, StateTuple};
use crate::{
    observation::{Env, Samples, Value},
    predicate::Predicate,
};

/// Compute the state dict for one execution.
///
/// `samples` holds every observation in emission order, `latest` the last
/// value per name. `value` and `sum` items are omitted for unobserved names;
/// `predicate`, `counter` and `set` items always contribute a key. Predicate
/// parse or evaluation failures count as false so a malformed run never
/// aborts the fuzzer.
pub fn project(spec: &[StateSpecItem], samples: &Samples, latest: &Env, verbose: bool) -> StateDict {
    let mut dict = StateDict::new();
    for item in spec {
        match item {
            StateSpecItem::Value { name } => {
                if let Some(value) = latest.get(name) {
                    dict.insert(name.clone(), value.clone());
                }
            }
            StateSpecItem::Sum { name } => {
                if let Some(values) = samples.get(name) {
                    // Uncoercible samples are skipped, not fatal.
                    let total: i64 = values.iter().filter_map(Value::coerce_to_int).sum();
                    dict.insert(name.clone(), Value::Int(total));
                }
            }
            StateSpecItem::Predicate { expr } => {
                let fired = match Predicate::parse(expr) {
                    Ok(predicate) => predicate.holds(latest),
                    Err(error) => {
                        debug!(expr, %error, "predicate item does not parse");
                        false
                    }
                };
                if verbose {
                    debug!(expr, env = ?latest, fired, "predicate evaluated");
                }
                dict.insert(expr.clone(), Value::Int(i64::from(fired)));
            }
            StateSpecItem::Counter { expr } => {
                let count = match Predicate::parse(expr) {
                    Ok(predicate) => count_steps(&predicate, samples),
                    Err(error) => {
                        debug!(expr, %error, "counter item does not parse");
                        0
                    }
                };
                if verbose {
                    debug!(expr, count, "counter evaluated");
                }
                dict.insert(expr.clone(), Value::Int(count));
            }
            StateSpecItem::Set { name } => {
                let unique: Vec<Value> = samples
                    .get(name)
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                    .iter()
                    .map(Value::canonical_for_set)
                    .sorted()
                    .dedup()
                    .collect();
                if verbose {
                    debug!(name, values = ?unique, "set computed");
                }
                dict.insert(name.clone(), Value::Seq(unique));
            }
        }
    }
    dict
}

/// Walk step indices up to the longest sample list; each step environment
/// contains only the names whose sample list covers that index.
fn count_steps(predicate: &Predicate, samples: &Samples) -> i64 {
    let max_len = samples.values().map(Vec::len).max().unwrap_or(0);
    (0..max_len)
        .filter(|&step| {
            let env: Env = samples
                .iter()
                .filter_map(|(name, values)| Some((name.clone(), values.get(step)?.clone())))
                .collect();
            predicate.holds(&env)
        })
        .count() as i64
}

/// Flatten a state dict into the canonical labelled tuple. Spec items whose
/// key is missing from the dict are silently skipped, which keeps sparse
/// states comparable.
pub fn canonicalize(spec: &[StateSpecItem], dict: &StateDict) -> StateTuple {
    spec.iter()
        .filter_map(|item| Some((item.label(), dict.get(item.key())?.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(pairs: &[(&str, &[Value])]) -> Samples {
        pairs
            .iter()
            .map(|(name, values)| (name.to_string(), values.to_vec()))
            .collect()
    }

    fn latest(samples: &Samples) -> Env {
        crate::observation::latest_values(samples)
    }

    #[test]
    fn value_takes_latest_and_omits_absent() {
        let samples = samples(&[("x", &[Value::Int(1), Value::Int(42)])]);
        let spec = [
            StateSpecItem::Value { name: "x".into() },
            StateSpecItem::Value { name: "y".into() },
        ];
        let dict = project(&spec, &samples, &latest(&samples), false);
        assert_eq!(Some(&Value::Int(42)), dict.get("x"));
        assert!(!dict.contains_key("y"));

        let tuple = canonicalize(&spec, &dict);
        assert_eq!(&[("x (value)".to_string(), Value::Int(42))], tuple.entries());
    }

    #[test]
    fn sum_skips_uncoercible_values() {
        let samples = samples(&[(
            "n",
            &[
                Value::Int(1),
                Value::Str("junk".into()),
                Value::Str("2".into()),
            ],
        )]);
        let spec = [StateSpecItem::Sum { name: "n".into() }];
        let dict = project(&spec, &samples, &latest(&samples), false);
        assert_eq!(Some(&Value::Int(3)), dict.get("n"));
    }

    #[test]
    fn sum_is_omitted_for_unobserved_name() {
        let spec = [StateSpecItem::Sum { name: "n".into() }];
        let dict = project(&spec, &Samples::new(), &Env::new(), false);
        assert!(dict.is_empty());
    }

    #[test]
    fn set_canonicalization() {
        let samples = samples(&[(
            "e",
            &[Value::Int(3), Value::Int(1), Value::Int(2), Value::Int(1)],
        )]);
        let spec = [StateSpecItem::Set { name: "e".into() }];
        let dict = project(&spec, &samples, &latest(&samples), false);
        let expected = Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(Some(&expected), dict.get("e"));

        let tuple = canonicalize(&spec, &dict);
        assert_eq!(&[("e (set)".to_string(), expected)], tuple.entries());
    }

    #[test]
    fn set_stringifies_non_scalar_values() {
        let samples = samples(&[("v", &[Value::Float(1.5), Value::Str("a".into())])]);
        let spec = [StateSpecItem::Set { name: "v".into() }];
        let dict = project(&spec, &samples, &latest(&samples), false);
        assert_eq!(
            Some(&Value::Seq(vec![
                Value::Str("1.5".into()),
                Value::Str("a".into()),
            ])),
            dict.get("v")
        );
    }

    #[test]
    fn counter_walks_step_environments() {
        let samples = samples(&[
            ("a", &[Value::Int(1), Value::Int(0), Value::Int(1)]),
            ("b", &[Value::Int(0), Value::Int(0), Value::Int(1)]),
        ]);
        let spec = [StateSpecItem::Counter {
            expr: "a and b".into(),
        }];
        let dict = project(&spec, &samples, &latest(&samples), false);
        assert_eq!(Some(&Value::Int(1)), dict.get("a and b"));

        let tuple = canonicalize(&spec, &dict);
        assert_eq!(
            &[("a and b (count)".to_string(), Value::Int(1))],
            tuple.entries()
        );
    }

    #[test]
    fn counter_with_ragged_sample_lists() {
        // The second step only sees `a`; `b` defaults to zero inside eval.
        let samples = samples(&[
            ("a", &[Value::Int(1), Value::Int(1)]),
            ("b", &[Value::Int(1)]),
        ]);
        let spec = [StateSpecItem::Counter {
            expr: "a and b".into(),
        }];
        let dict = project(&spec, &samples, &latest(&samples), false);
        assert_eq!(Some(&Value::Int(1)), dict.get("a and b"));
    }

    #[test]
    fn predicate_yields_zero_or_one() {
        let samples = samples(&[("x", &[Value::Int(5)])]);
        let spec = [StateSpecItem::Predicate {
            expr: "x > 3".into(),
        }];
        let dict = project(&spec, &samples, &latest(&samples), false);
        assert_eq!(Some(&Value::Int(1)), dict.get("x > 3"));
    }

    #[test]
    fn predicate_and_counter_present_on_empty_run() {
        let spec = [
            StateSpecItem::Predicate {
                expr: "x > 3".into(),
            },
            StateSpecItem::Counter { expr: "x".into() },
        ];
        let dict = project(&spec, &Samples::new(), &Env::new(), false);
        assert_eq!(Some(&Value::Int(0)), dict.get("x > 3"));
        assert_eq!(Some(&Value::Int(0)), dict.get("x"));
    }

    #[test]
    fn malformed_predicate_counts_as_false() {
        let spec = [StateSpecItem::Predicate {
            expr: "x >".into(),
        }];
        let dict = project(&spec, &Samples::new(), &Env::new(), false);
        assert_eq!(Some(&Value::Int(0)), dict.get("x >"));
    }

    #[test]
    fn canonicalize_is_deterministic() {
        let samples = samples(&[
            ("x", &[Value::Int(1), Value::Int(2)]),
            ("e", &[Value::Int(9), Value::Int(7)]),
        ]);
        let spec = [
            StateSpecItem::Value { name: "x".into() },
            StateSpecItem::Sum { name: "x".into() },
            StateSpecItem::Set { name: "e".into() },
        ];
        let first = canonicalize(&spec, &project(&spec, &samples, &latest(&samples), false));
        let second = canonicalize(&spec, &project(&spec, &samples, &latest(&samples), false));
        assert_eq!(first, second);
    }

    #[test]
    fn missing_keys_are_skipped_in_the_tuple() {
        let spec = [
            StateSpecItem::Value { name: "gone".into() },
            StateSpecItem::Value { name: "x".into() },
        ];
        let samples = samples(&[("x", &[Value::Int(1)])]);
        let tuple = canonicalize(&spec, &project(&spec, &samples, &latest(&samples), false));
        assert_eq!(1, tuple.len());
        assert_eq!("x (value)", tuple.entries()[0].0);
    }
}
