use std::path::Path;

use ekoload_core::{Phase, RunSummary, ScenarioConfig};
use ekoload_metrics::MetricsSummary;

use crate::cli::OutputFormat;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, script_path: &Path, config: &ScenarioConfig, phases: &[Phase]);
    fn print_summary(&self, summary: &RunSummary, metrics: &MetricsSummary) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Human => Box::new(human::HumanOutput),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
