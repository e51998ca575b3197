//! Arrival phases: launch sessions on a schedule and wait for them all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::Vars;
use crate::context::SessionContext;
use crate::session::{Scenario, SessionFailure};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arrivals {
    /// This many sessions, spread evenly over the phase.
    Count(u64),
    /// Sessions per second.
    Rate(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phase {
    pub duration: Duration,
    pub arrivals: Arrivals,
}

impl Phase {
    /// Number of sessions the phase launches.
    pub fn total(&self) -> u64 {
        match self.arrivals {
            Arrivals::Count(n) => n,
            Arrivals::Rate(rate) if rate.is_finite() && rate > 0.0 => {
                (rate * self.duration.as_secs_f64()).round() as u64
            }
            Arrivals::Rate(_) => 0,
        }
    }

    /// Gap between consecutive launches; `None` when nothing launches.
    pub fn spacing(&self) -> Option<Duration> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let spacing = match self.arrivals {
            Arrivals::Count(n) => self.duration.div_f64(n as f64),
            Arrivals::Rate(rate) => {
                Duration::try_from_secs_f64(1.0 / rate).unwrap_or(self.duration)
            }
        };
        Some(spacing)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub launched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Failed sessions by error kind.
    pub failures: BTreeMap<String, u64>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Runs every phase in order, then waits for in-flight sessions and closes the shared
/// connection. Each session starts from `seed`.
pub async fn run_phases(scenario: Arc<Scenario>, phases: &[Phase], seed: Vars) -> RunSummary {
    let started = Instant::now();
    let mut sessions = JoinSet::new();
    let mut summary = RunSummary::default();

    for (index, phase) in phases.iter().enumerate() {
        let phase_start = Instant::now();
        let total = phase.total();
        info!(phase = index, sessions = total, duration = ?phase.duration, "phase start");

        if let Some(spacing) = phase.spacing() {
            // A zero-length phase launches everything at once.
            let mut ticks = (!spacing.is_zero()).then(|| {
                let mut ticks = tokio::time::interval(spacing);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Burst);
                ticks
            });

            for _ in 0..total {
                if let Some(ticks) = ticks.as_mut() {
                    ticks.tick().await;
                }
                let scenario = scenario.clone();
                let seed = seed.clone();
                sessions.spawn(async move { scenario.run_session(seed).await });
                summary.launched += 1;

                while let Some(done) = sessions.try_join_next() {
                    tally(&mut summary, done);
                }
            }
        }

        tokio::time::sleep_until(phase_start + phase.duration).await;
        debug!(phase = index, launched = summary.launched, "phase end");
    }

    while let Some(done) = sessions.join_next().await {
        tally(&mut summary, done);
    }
    scenario.shutdown().await;

    summary.elapsed = started.elapsed();
    summary
}

type SessionOutcome = Result<SessionContext, SessionFailure>;

fn tally(summary: &mut RunSummary, done: Result<SessionOutcome, JoinError>) {
    match done {
        Ok(Ok(_)) => summary.succeeded += 1,
        Ok(Err(failure)) => {
            summary.failed += 1;
            *summary
                .failures
                .entry(failure.error.kind().to_string())
                .or_default() += 1;
        }
        Err(err) => {
            warn!(error = %err, "session task did not complete");
            summary.failed += 1;
            *summary.failures.entry("panic".to_string()).or_default() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::compiler::compile;
    use crate::config::{ScenarioConfig, ThinkDefaults, TokenSource};
    use crate::flow::{CallSpec, StepSpec};
    use crate::processor::Processors;
    use crate::testing::{FakeAuthenticator, FakeConnector, RecordingSink};

    fn scenario(auth: FakeAuthenticator, connector: Arc<FakeConnector>) -> Arc<Scenario> {
        let flow = compile(
            &[StepSpec::Call(CallSpec::new("ping", json!({})))],
            &Processors::new(),
            &ThinkDefaults::default(),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let config = ScenarioConfig::new("ws://svc", TokenSource::Endpoint("http://auth".into()));
        Arc::new(Scenario::with_parts(
            config,
            flow,
            Arc::new(auth),
            connector,
            Arc::new(RecordingSink::default()),
        ))
    }

    #[test]
    fn phase_totals_and_spacing() {
        let count = Phase {
            duration: Duration::from_secs(10),
            arrivals: Arrivals::Count(20),
        };
        assert_eq!(count.total(), 20);
        assert_eq!(count.spacing(), Some(Duration::from_millis(500)));

        let rate = Phase {
            duration: Duration::from_secs(5),
            arrivals: Arrivals::Rate(2.0),
        };
        assert_eq!(rate.total(), 10);
        assert_eq!(rate.spacing(), Some(Duration::from_millis(500)));

        let idle = Phase {
            duration: Duration::from_secs(1),
            arrivals: Arrivals::Count(0),
        };
        assert_eq!(idle.spacing(), None);
        assert_eq!(
            Phase {
                arrivals: Arrivals::Rate(f64::NAN),
                ..idle
            }
            .total(),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn launches_every_arrival_across_phases() {
        let connector = Arc::new(FakeConnector::default());
        let phases = [
            Phase {
                duration: Duration::from_secs(2),
                arrivals: Arrivals::Count(4),
            },
            Phase {
                duration: Duration::from_secs(1),
                arrivals: Arrivals::Count(0),
            },
            Phase {
                duration: Duration::from_secs(2),
                arrivals: Arrivals::Rate(3.0),
            },
        ];

        let summary = run_phases(
            scenario(FakeAuthenticator::default(), connector.clone()),
            &phases,
            Vars::new(),
        )
        .await;

        assert_eq!(summary.launched, 10);
        assert_eq!(summary.succeeded, 10);
        assert!(summary.all_succeeded());
        assert!(summary.elapsed >= Duration::from_secs(5));
        assert_eq!(connector.opened().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_tallied_by_kind() {
        let summary = run_phases(
            scenario(FakeAuthenticator::denying(), Arc::new(FakeConnector::default())),
            &[Phase {
                duration: Duration::from_secs(1),
                arrivals: Arrivals::Count(3),
            }],
            Vars::new(),
        )
        .await;

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.failures.get("auth_token_missing"), Some(&3));
    }

    #[tokio::test]
    async fn zero_length_phase_launches_at_once() {
        let connector = Arc::new(FakeConnector::default());
        let summary = run_phases(
            scenario(FakeAuthenticator::default(), connector.clone()),
            &[Phase {
                duration: Duration::ZERO,
                arrivals: Arrivals::Count(5),
            }],
            Vars::new(),
        )
        .await;

        assert_eq!(summary.succeeded, 5);
        assert_eq!(connector.opened().len(), 5);
    }
}
