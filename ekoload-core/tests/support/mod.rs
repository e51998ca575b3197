#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ekoload_core::{
    Scenario, ScenarioConfig, StatsSink, StepSpec, ThinkDefaults, TokenSource, Vars, compile,
};
use ekoload_metrics::Metrics;
use ekoload_testserver::TestServer;
use serde_json::Value;

pub fn vars(v: Value) -> Vars {
    match v {
        Value::Object(m) => m,
        other => panic!("expected object, got {other}"),
    }
}

/// Config pointing at the test server's websocket and token endpoints.
pub fn config_for(server: &TestServer, username: &str) -> ScenarioConfig {
    let mut config = ScenarioConfig::new(server.ws_url(), TokenSource::Endpoint(server.token_url()));
    config
        .variables
        .insert("username".into(), Value::String(username.into()));
    config.variables.insert("password".into(), "pw".into());
    config
}

pub struct Harness {
    pub scenario: Arc<Scenario>,
    pub metrics: Arc<Metrics>,
}

pub fn scenario(config: ScenarioConfig, flow: &[StepSpec]) -> anyhow::Result<Harness> {
    let flow = compile(flow, &Default::default(), &ThinkDefaults::default())?;
    let metrics = Arc::new(Metrics::default());
    let scenario = Scenario::new(config, flow, Arc::new(StatsSink::new(metrics.clone())))?;
    Ok(Harness {
        scenario: Arc::new(scenario),
        metrics,
    })
}

/// Polls until `cond` holds; the server observes frames and closes asynchronously.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) -> anyhow::Result<()> {
    for _ in 0..200 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    anyhow::bail!("timed out waiting for {what}")
}
