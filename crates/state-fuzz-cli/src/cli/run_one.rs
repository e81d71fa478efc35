use std::path::PathBuf;

use anyhow::Context;
use state_fuzz::{
    config::{RunConfig, unescape_bytes},
    execution::{harness::run_input, stdout::extract_samples, subprocess::SubprocessExecutor},
};

#[derive(Debug, clap::Parser)]
pub struct RunOneCommand {
    /// Run configuration (JSON).
    #[clap(long, short)]
    config: PathBuf,

    /// Escape-encoded input to execute once.
    input: String,

    /// Log projected observation values.
    #[clap(long)]
    show_execution_values: bool,
}

impl RunOneCommand {
    pub fn run(self, _global_options: super::GlobalOptions) -> anyhow::Result<()> {
        let config = RunConfig::from_json_file(&self.config).context("Loading run config")?;
        let input = unescape_bytes(&self.input);
        let mut executor = SubprocessExecutor::default();
        let result = run_input(&mut executor, &input, &config, self.show_execution_values);

        println!("outcome: {}", result.outcome);
        println!(
            "execution_time: {:.6}s",
            result.execution_time.as_secs_f64()
        );
        if let Some(info) = &result.crash_info {
            println!("crash_info: {info}");
        }
        let samples = extract_samples(&result.stdout, &config.fuzzer.execution_values);
        println!(
            "observations: {}",
            serde_json::to_string(&samples).context("Serializing observation samples")?
        );
        println!("execution_state: ({})", result.execution_state);
        println!(
            "mutation_context: {}",
            serde_json::to_string(&result.mutation_context)
                .context("Serializing mutation context")?
        );
        println!("stdout ({} bytes):", result.stdout.len());
        println!("{}", String::from_utf8_lossy(&result.stdout));
        Ok(())
    }
}
