use std::path::PathBuf;

use anyhow::Context;
use itertools::Itertools;
use libafl_bolts::rands::StdRand;
use state_fuzz::{
    config::RunConfig,
    mutation::{MutationEngine, OperatorRegistry},
};

#[derive(Debug, clap::Parser)]
pub struct CheckCommand {
    /// Run configuration (JSON).
    #[clap(long, short)]
    config: PathBuf,

    /// Mutation strategy (JSON).
    #[clap(long, short)]
    strategy: PathBuf,
}

impl CheckCommand {
    pub fn run(self, global_options: super::GlobalOptions) -> anyhow::Result<()> {
        let config = RunConfig::from_json_file(&self.config).context("Loading run config")?;
        let engine = MutationEngine::load(
            OperatorRegistry::builtin(),
            &self.strategy,
            StdRand::with_seed(global_options.random_seed()),
        )
        .context("Loading mutation strategy")?;

        println!("target: {}", config.target.binary_path.display());
        println!(
            "observations: {}",
            config
                .fuzzer
                .execution_values
                .iter()
                .map(|spec| spec.name.as_str())
                .join(", ")
        );
        println!(
            "execution_state items: {}, mutation_context items: {}",
            config.fuzzer.execution_state.len(),
            config.fuzzer.mutation_context.len()
        );
        println!("seed inputs: {}", config.fuzzer.seed_inputs.len());
        println!("operators loaded: {}", engine.operators().len());
        for rule in engine.strategy().rules() {
            let condition = rule
                .condition()
                .map_or_else(|| "<always>".to_owned(), |c| c.source().to_owned());
            let menu = rule
                .operators()
                .iter()
                .map(|op| format!("{} ({})", op.name, op.weight))
                .join(", ");
            println!("rule '{}': when {condition} use {menu}", rule.label());
        }
        println!("ok");
        Ok(())
    }
}
