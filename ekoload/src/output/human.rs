use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use ekoload_core::{Arrivals, Phase, RunSummary, ScenarioConfig, TokenSource};
use ekoload_metrics::{CounterKind, MetricsSummary};

use super::OutputFormatter;

pub(crate) struct HumanOutput;

impl OutputFormatter for HumanOutput {
    fn print_header(&self, script_path: &Path, config: &ScenarioConfig, phases: &[Phase]) {
        let auth = match &config.token {
            TokenSource::Endpoint(url) => format!("token endpoint {url}"),
            TokenSource::Static(_) => "static token".to_string(),
        };
        println!("script: {}", script_path.display());
        println!(
            "target: {}/{} ({auth}{})",
            config.target.trim_end_matches('/'),
            config.version,
            if config.reuse_connection {
                ", shared connection"
            } else {
                ""
            }
        );
        for (i, p) in phases.iter().enumerate() {
            println!("phase {i}: {}", describe_phase(p));
        }
        println!();
    }

    fn print_summary(&self, summary: &RunSummary, metrics: &MetricsSummary) -> anyhow::Result<()> {
        print!("{}", render(summary, metrics));
        Ok(())
    }
}

fn describe_phase(p: &Phase) -> String {
    let arrivals = match p.arrivals {
        Arrivals::Count(n) => format!("{n} sessions"),
        Arrivals::Rate(r) => format!("{r}/s"),
    };
    format!("{arrivals} over {}", format_duration(p.duration))
}

pub(crate) fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms >= 1000 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        format!("{ms}ms")
    }
}

fn format_micros(v: Option<f64>) -> String {
    match v {
        Some(us) if us >= 1000.0 => format!("{:.2}ms", us / 1000.0),
        Some(us) => format!("{us:.0}us"),
        None => "-".to_string(),
    }
}

pub(crate) fn render(summary: &RunSummary, metrics: &MetricsSummary) -> String {
    let mut out = String::new();
    out.push_str("summary\n");

    let rows = [
        ("elapsed", format_duration(summary.elapsed)),
        ("sessions launched", summary.launched.to_string()),
        ("sessions succeeded", summary.succeeded.to_string()),
        ("sessions failed", summary.failed.to_string()),
        ("requests", metrics.counter(CounterKind::Requests).to_string()),
        ("frames sent", metrics.counter(CounterKind::Responses).to_string()),
        ("errors", metrics.counter(CounterKind::Errors).to_string()),
    ];
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (k, v) in rows {
        writeln!(&mut out, "  {k:<width$}  {v}").ok();
    }

    let l = &metrics.latency_us;
    if l.count > 0 {
        writeln!(
            &mut out,
            "  {:<width$}  p50={} p90={} p95={} p99={} max={} mean={}",
            "send latency",
            format_micros(l.p50),
            format_micros(l.p90),
            format_micros(l.p95),
            format_micros(l.p99),
            format_micros(l.max),
            format_micros(l.mean),
        )
        .ok();
    }

    if !metrics.errors.is_empty() {
        out.push_str("errors by kind\n");
        let mut errors: Vec<_> = metrics.errors.iter().collect();
        errors.sort_by(|(a_kind, a), (b_kind, b)| b.cmp(a).then_with(|| a_kind.cmp(b_kind)));
        for (kind, count) in errors {
            writeln!(&mut out, "  {kind}: {count}").ok();
        }
    }

    if !summary.failures.is_empty() {
        out.push_str("failed sessions by kind\n");
        for (kind, count) in &summary.failures {
            writeln!(&mut out, "  {kind}: {count}").ok();
        }
    }

    out
}
