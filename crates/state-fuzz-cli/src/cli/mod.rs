mod check;
mod fuzz;
mod run_one;

use anyhow::Context;
use check::CheckCommand;
use fuzz::FuzzCommand;
use run_one::RunOneCommand;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, clap::Parser)]
#[command(version, about, styles = clap::builder::Styles::styled())]
pub struct Cli {
    #[clap(flatten)]
    global_options: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub(super) fn run(self) -> anyhow::Result<()> {
        setup_logger(&self.global_options).context("Setting up logger")?;
        match self.command {
            Command::Fuzz(cmd) => cmd.run(self.global_options),
            Command::RunOne(cmd) => cmd.run(self.global_options),
            Command::Check(cmd) => cmd.run(self.global_options),
        }
    }
}

#[derive(Debug, clap::Parser)]
struct GlobalOptions {
    #[clap(long, default_value = "info")]
    default_log_level: LevelFilter,

    /// RNG seed; defaults to the wall clock.
    #[clap(long)]
    random_seed: Option<u64>,
}

impl GlobalOptions {
    pub fn random_seed(&self) -> u64 {
        self.random_seed.unwrap_or_else(libafl_bolts::current_nanos)
    }
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the execution-state-guided fuzzing loop.
    Fuzz(Box<FuzzCommand>),
    /// Execute a single escape-encoded input and print its observations.
    RunOne(RunOneCommand),
    /// Validate config and strategy without fuzzing.
    Check(CheckCommand),
}

fn setup_logger(global_opts: &GlobalOptions) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_timer(fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_owned())))
        .with(
            EnvFilter::builder()
                .with_default_directive(global_opts.default_log_level.into())
                .from_env()
                .context("Constructing log filter from env.")?,
        )
        .init();

    Ok(())
}
