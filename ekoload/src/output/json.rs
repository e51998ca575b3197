use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use ekoload_core::{Phase, RunSummary, ScenarioConfig};
use ekoload_metrics::MetricsSummary;
use serde::Serialize;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _script_path: &Path, _config: &ScenarioConfig, _phases: &[Phase]) {}

    fn print_summary(&self, summary: &RunSummary, metrics: &MetricsSummary) -> anyhow::Result<()> {
        let line = serde_json::to_string(&build_summary(summary, metrics))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonSummary<'a> {
    pub kind: &'static str,
    pub elapsed_secs: f64,
    pub sessions: JsonSessions<'a>,
    pub metrics: &'a MetricsSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonSessions<'a> {
    pub launched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub failures: &'a BTreeMap<String, u64>,
}

pub(crate) fn build_summary<'a>(
    summary: &'a RunSummary,
    metrics: &'a MetricsSummary,
) -> JsonSummary<'a> {
    JsonSummary {
        kind: "summary",
        elapsed_secs: summary.elapsed.as_secs_f64(),
        sessions: JsonSessions {
            launched: summary.launched,
            succeeded: summary.succeeded,
            failed: summary.failed,
            failures: &summary.failures,
        },
        metrics,
    }
}
