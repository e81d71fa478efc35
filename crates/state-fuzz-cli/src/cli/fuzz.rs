use std::{
    fmt::Write as _,
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use ahash::{HashSet, HashSetExt};
use anyhow::Context;
use libafl_bolts::rands::StdRand;
use state_fuzz::{
    config::RunConfig,
    corpus::CorpusStatTracker,
    execution::{ExecutionResult, harness::run_input, subprocess::SubprocessExecutor},
    mutation::{MutationEngine, OperatorRegistry, digest_of},
    state::{StateDict, StateTuple},
};
use tracing::{debug, info, warn};

const STATS_INTERVAL: u64 = 100;

#[derive(Debug, clap::Parser)]
pub struct FuzzCommand {
    /// Run configuration (JSON).
    #[clap(long, short)]
    config: PathBuf,

    /// Mutation strategy (JSON).
    #[clap(long, short)]
    strategy: PathBuf,

    /// Coverage bitmap size expected from instrumented executors.
    #[clap(long, default_value_t = 65536)]
    map_size: usize,

    /// Mutations per scheduled corpus entry.
    #[clap(long, default_value_t = 16)]
    batch_size: usize,

    /// Stop after this many executions.
    #[clap(long)]
    iterations: Option<u64>,

    /// Directory crashing inputs are written to.
    #[clap(long, default_value = "crashes")]
    crashes_dir: PathBuf,

    /// Log projected observation values per run.
    #[clap(long)]
    show_execution_values: bool,
}

/// One scheduled input together with the mutation context of the run that
/// produced it.
#[derive(Debug)]
struct CorpusEntry {
    input: Vec<u8>,
    mutation_context: StateDict,
}

impl FuzzCommand {
    pub fn run(self, global_options: super::GlobalOptions) -> anyhow::Result<()> {
        let config = RunConfig::from_json_file(&self.config).context("Loading run config")?;
        let seed = global_options.random_seed();
        let mut engine = MutationEngine::load(
            OperatorRegistry::builtin(),
            &self.strategy,
            StdRand::with_seed(seed),
        )
        .context("Loading mutation strategy")?;
        let mut executor = SubprocessExecutor::default();
        let mut tracker = CorpusStatTracker::new(self.map_size, config.coverage_plateau_timeout());
        fs::create_dir_all(&self.crashes_dir).context("Creating crashes directory")?;

        let stop = Arc::new(AtomicBool::new(false));
        {
            let stop = stop.clone();
            ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
                .context("Installing Ctrl-C handler")?;
        }

        info!(
            seed,
            target = %config.target.binary_path.display(),
            rules = engine.strategy().rules().len(),
            "fuzzer starting"
        );

        let mut corpus: Vec<CorpusEntry> = Vec::new();
        let mut seen_states: HashSet<StateTuple> = HashSet::new();
        let mut executions: u64 = 0;
        let mut crashes: u64 = 0;

        let mut seeds = config.fuzzer.decoded_seed_inputs();
        if seeds.is_empty() {
            seeds.push(Vec::new());
        }
        for seed_input in seeds {
            let result = run_input(
                &mut executor,
                &seed_input,
                &config,
                self.show_execution_values,
            );
            executions += 1;
            tracker.add_sample(&result);
            if result.is_crash() {
                crashes += 1;
                self.persist_crash(&result)?;
            }
            seen_states.insert(result.execution_state.clone());
            info!(state = %result.execution_state, "seed executed");
            corpus.push(CorpusEntry {
                input: result.input_data,
                mutation_context: result.mutation_context,
            });
        }

        let mut next_entry = 0usize;
        let mut plateau_reported = false;
        'fuzzing: while !stop.load(Ordering::SeqCst) {
            if self.iterations.is_some_and(|limit| executions >= limit) {
                break;
            }

            let entry = &corpus[next_entry % corpus.len()];
            next_entry = next_entry.wrapping_add(1);
            let batch = engine
                .mutate(&entry.input, &entry.mutation_context, self.batch_size)
                .context("Mutating input")?;

            for (input, operator) in batch {
                if stop.load(Ordering::SeqCst)
                    || self.iterations.is_some_and(|limit| executions >= limit)
                {
                    break 'fuzzing;
                }
                let result = run_input(&mut executor, &input, &config, self.show_execution_values);
                executions += 1;
                let new_edges = tracker.add_sample(&result);
                if result.is_crash() {
                    crashes += 1;
                    warn!(operator, "crashing input found");
                    self.persist_crash(&result)?;
                }
                let novel_state = seen_states.insert(result.execution_state.clone());
                if novel_state || new_edges {
                    debug!(
                        operator,
                        state = %result.execution_state,
                        new_edges,
                        "admitting corpus entry"
                    );
                    corpus.push(CorpusEntry {
                        input: result.input_data,
                        mutation_context: result.mutation_context,
                    });
                }
                if executions % STATS_INTERVAL == 0 {
                    report_progress(&tracker, executions, crashes, corpus.len());
                }
            }

            if tracker.is_coverage_plateau() {
                if !plateau_reported {
                    warn!("coverage plateau reached, mutation keeps running on known states");
                    plateau_reported = true;
                }
            } else {
                plateau_reported = false;
            }
        }

        info!(executions, crashes, corpus = corpus.len(), "fuzzer stopping");
        if tracker.num_samples() > 0 {
            let stats = tracker.get_result();
            info!(
                total_edges = stats.total_edges,
                total_branch_sites = stats.total_branch_sites,
                unique_instructions = stats.total_unique_instructions,
                avg_pathlen_blocks = stats.avg_pathlen_blocks,
                max_pathlen_blocks = stats.max_pathlen_blocks,
                avg_calldepth = stats.avg_calldepth,
                max_calldepth = stats.max_calldepth,
                "final corpus stats"
            );
        }
        Ok(())
    }

    fn persist_crash(&self, result: &ExecutionResult) -> anyhow::Result<()> {
        let digest = digest_of(&result.input_data);
        let mut name = String::from("crash_");
        for byte in digest {
            write!(name, "{byte:02x}").expect("writing to a String cannot fail");
        }
        let path = self.crashes_dir.join(name);
        if !path.exists() {
            fs::write(&path, &result.input_data)
                .with_context(|| format!("Writing crash input {}", path.display()))?;
            info!(
                path = %path.display(),
                info = result.crash_info.as_deref().unwrap_or("unknown"),
                "crash persisted"
            );
        }
        Ok(())
    }
}

fn report_progress(tracker: &CorpusStatTracker, executions: u64, crashes: u64, corpus: usize) {
    let stats = tracker.get_result();
    info!(
        executions,
        crashes,
        corpus,
        total_edges = stats.total_edges,
        total_branch_sites = stats.total_branch_sites,
        unique_instructions = stats.total_unique_instructions,
        cumulative_exec_time = ?tracker.cumulative_execution_time(),
        "progress"
    );
}
