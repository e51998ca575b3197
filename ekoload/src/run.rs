use std::sync::Arc;

use anyhow::Context as _;
use ekoload_core::{Scenario, StatsSink, Vars, compile, run_phases};
use ekoload_metrics::Metrics;
use tracing::info;

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::processors;
use crate::run_error::RunError;
use crate::script::{self, Overrides};

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let text = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("failed to read script: {}", args.script.display()))
        .map_err(RunError::InvalidInput)?;
    let doc = script::parse(&text).map_err(RunError::InvalidInput)?;

    let overrides = overrides(&args);
    let config = doc
        .scenario_config(&overrides)
        .map_err(RunError::InvalidInput)?;
    let phases = doc.phases(&overrides).map_err(RunError::InvalidInput)?;
    let flow = doc.flow().map_err(RunError::ScriptError)?;

    let registry = processors::builtin();
    let missing = processors::missing(&registry, &doc.config.processor);
    if !missing.is_empty() {
        return Err(RunError::ScriptError(anyhow::anyhow!(
            "config.processor lists unregistered processors: {}",
            missing.join(", ")
        )));
    }
    let flow = compile(&flow, &registry, &config.think)
        .map_err(|e| RunError::from_core("failed to compile flow", e))?;

    out.print_header(&args.script, &config, &phases);

    let metrics = Arc::new(Metrics::default());
    let scenario = Scenario::new(config, flow, Arc::new(StatsSink::new(metrics.clone())))
        .map_err(|e| RunError::from_core("failed to set up scenario", e))?;

    info!(phases = phases.len(), "run start");
    let summary = run_phases(Arc::new(scenario), &phases, Vars::new()).await;
    info!(
        launched = summary.launched,
        failed = summary.failed,
        "run finished"
    );

    out.print_summary(&summary, &metrics.summarize())
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_summary(&summary))
}

fn overrides(args: &RunArgs) -> Overrides {
    Overrides {
        target: args.target.clone(),
        token_url: args.token_url.clone(),
        token: args.token.clone(),
        duration: args.duration,
        arrivals: args.arrivals,
        username: args.username.clone(),
        password: args.password.clone(),
        reuse_connection: args.reuse_connection,
    }
}
