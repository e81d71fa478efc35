//! Running inputs through an executor and turning each run's observations
//! into a structured execution state.

pub mod harness;
pub mod stdout;
pub mod subprocess;

use std::{io, time::Duration};

use ahash::HashSet;
use derive_more::derive::Display;
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::RunConfig,
    state::{StateDict, StateTuple},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    #[default]
    #[display("NORMAL")]
    Normal,
    #[display("CRASH")]
    Crash,
    #[display("TIMEOUT")]
    Timeout,
}

/// Coverage artifacts an instrumented executor may attach to a run. A plain
/// subprocess backend leaves all of them empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoverageObservations {
    pub edge_bitmap: Option<Vec<u8>>,
    pub branch_taken_bitmap: Option<Vec<u8>>,
    pub branch_fallthrough_bitmap: Option<Vec<u8>>,
    pub instr_addresses: Option<HashSet<u64>>,
    pub total_instructions: u64,
    pub pathlen_blocks: u64,
    pub call_depth: u64,
}

/// What an executor reports for one run, before state projection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawExecutionResult {
    pub outcome: ExecutionOutcome,
    pub execution_time: Duration,
    pub crash_info: Option<String>,
    pub stdout: Vec<u8>,
    pub coverage: CoverageObservations,
}

/// A run extended with the projected execution state and mutation context.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub input_data: Vec<u8>,
    pub outcome: ExecutionOutcome,
    pub execution_time: Duration,
    pub crash_info: Option<String>,
    pub coverage: CoverageObservations,
    pub execution_state: StateTuple,
    pub mutation_context: StateDict,
    pub stdout: Vec<u8>,
}

impl ExecutionResult {
    pub fn is_crash(&self) -> bool {
        self.outcome == ExecutionOutcome::Crash
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("spawning target process")]
    Spawn(#[source] io::Error),
    #[error("sending input to target stdin")]
    Stdin(#[source] io::Error),
    #[error("capturing target output")]
    Capture(#[source] io::Error),
    #[error("waiting for target")]
    Wait(#[source] io::Error),
    #[error("killing timed-out target")]
    Kill(#[source] nix::Error),
    #[error("{0}")]
    Backend(String),
}

/// The execution capability the harness consumes. Implementations run one
/// input and report outcome, timing, stdout and whatever coverage artifacts
/// they can produce.
pub trait Executor {
    fn run(
        &mut self,
        input: &[u8],
        config: &RunConfig,
    ) -> Result<RawExecutionResult, ExecutorError>;
}
