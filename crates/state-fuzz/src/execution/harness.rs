//! One-input execution pipeline: run, observe, project.

use std::time::Duration;

use tracing::{debug, warn};

use super::{ExecutionOutcome, ExecutionResult, Executor};
use crate::{
    config::RunConfig,
    observation::latest_values,
    state::{canonicalize, project},
};

/// Run one input through the executor and project its observations.
///
/// Total by design: executor failures become a `CRASH` result with empty
/// state and mutation context, so the fuzzing loop never aborts on a
/// misbehaving target.
pub fn run_input<E>(
    executor: &mut E,
    input: &[u8],
    config: &RunConfig,
    verbose: bool,
) -> ExecutionResult
where
    E: Executor + ?Sized,
{
    let raw = match executor.run(input, config) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(%error, input_len = input.len(), "executor failed, recording a crash");
            return ExecutionResult {
                input_data: input.to_vec(),
                outcome: ExecutionOutcome::Crash,
                execution_time: Duration::ZERO,
                crash_info: Some(error.to_string()),
                ..ExecutionResult::default()
            };
        }
    };

    let samples = super::stdout::extract_samples(&raw.stdout, &config.fuzzer.execution_values);
    if verbose {
        debug!(?samples, "observation samples");
    }
    let latest = latest_values(&samples);

    let state_dict = project(&config.fuzzer.execution_state, &samples, &latest, verbose);
    let execution_state = canonicalize(&config.fuzzer.execution_state, &state_dict);
    let mutation_context = project(&config.fuzzer.mutation_context, &samples, &latest, verbose);

    ExecutionResult {
        input_data: input.to_vec(),
        outcome: raw.outcome,
        execution_time: raw.execution_time,
        crash_info: raw.crash_info,
        coverage: raw.coverage,
        execution_state,
        mutation_context,
        stdout: raw.stdout,
    }
}
