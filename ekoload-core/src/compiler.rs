//! Flow compilation and step execution.
//!
//! A flow is compiled once per scenario into a [`CompiledFlow`]; every session then runs the
//! same compiled steps against its own [`SessionContext`]. Compiled steps hold no session
//! state.
//!
//! Steps report their own failures to the event sink at the point of failure, so a failure
//! propagated out of a loop body is not reported again by the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use rand::Rng as _;
use serde_json::Value;
use tracing::debug;

use crate::config::ThinkDefaults;
use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::flow::{
    self, CallSpec, Collection, LOOP_ELEMENT, LoopBound, LoopSpec, StepSpec, ThinkSpec,
};
use crate::processor::{Processor, Processors};
use crate::{frame, params, template};

#[derive(Debug)]
pub struct CompiledFlow {
    steps: Vec<CompiledStep>,
    pending_requests: u64,
}

impl CompiledFlow {
    pub fn pending_requests(&self) -> u64 {
        self.pending_requests
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order; the first failure stops the flow.
    pub async fn run(&self, ctx: &mut SessionContext, events: &dyn EventSink) -> Result<()> {
        run_steps(&self.steps, ctx, events).await
    }
}

/// Compiles a flow. Processor names are resolved here; an unregistered name is an error.
pub fn compile(
    flow: &[StepSpec],
    processors: &Processors,
    think: &ThinkDefaults,
) -> Result<CompiledFlow> {
    let steps = compile_steps(flow, processors, think)?;
    Ok(CompiledFlow {
        steps,
        pending_requests: flow::pending_requests(flow),
    })
}

fn compile_steps(
    flow: &[StepSpec],
    processors: &Processors,
    think: &ThinkDefaults,
) -> Result<Vec<CompiledStep>> {
    flow.iter()
        .map(|spec| compile_step(spec, processors, think))
        .collect()
}

fn compile_step(
    spec: &StepSpec,
    processors: &Processors,
    think: &ThinkDefaults,
) -> Result<CompiledStep> {
    match spec {
        StepSpec::Call(call) => compile_call(call, processors).map(CompiledStep::Call),
        StepSpec::Think(duration) => compile_think(duration, think).map(CompiledStep::Think),
        StepSpec::Loop(spec) => compile_loop(spec, processors, think).map(CompiledStep::Loop),
    }
}

fn compile_call(spec: &CallSpec, processors: &Processors) -> Result<CallStep> {
    let processor = match &spec.processor {
        Some(name) => Some(
            processors
                .get(name)
                .ok_or_else(|| Error::UnknownProcessor(name.clone()))?,
        ),
        None => None,
    };

    Ok(CallStep {
        rpc: spec.rpc.clone().filter(|m| !m.is_empty()),
        params: spec.params.clone(),
        processor,
    })
}

fn compile_think(duration: &ThinkSpec, defaults: &ThinkDefaults) -> Result<ThinkStep> {
    if let ThinkSpec::Seconds(secs) = duration
        && Duration::try_from_secs_f64(*secs).is_err()
    {
        return Err(Error::InvalidFlow(format!(
            "think duration must be a non-negative number of seconds in range, got {secs}"
        )));
    }

    let jitter = match defaults.jitter {
        Some(j) if j.is_finite() && j > 0.0 => Some((j / 100.0).min(1.0)),
        _ => None,
    };

    Ok(ThinkStep {
        duration: duration.clone(),
        jitter,
    })
}

fn compile_loop(
    spec: &LoopSpec,
    processors: &Processors,
    think: &ThinkDefaults,
) -> Result<LoopStep> {
    if spec.body.is_empty() && spec.bound == LoopBound::Unbounded {
        return Err(Error::InvalidFlow(
            "a loop without `count` or `over` needs at least one step".to_string(),
        ));
    }

    Ok(LoopStep {
        bound: spec.bound.clone(),
        loop_value: spec.loop_value.clone(),
        body: compile_steps(&spec.body, processors, think)?,
    })
}

async fn run_steps(
    steps: &[CompiledStep],
    ctx: &mut SessionContext,
    events: &dyn EventSink,
) -> Result<()> {
    for step in steps {
        step.run(ctx, events).await?;
    }
    Ok(())
}

fn fail(events: &dyn EventSink, err: Error) -> Result<()> {
    events.emit(Event::error(&err));
    Err(err)
}

#[derive(Debug)]
enum CompiledStep {
    Call(CallStep),
    Think(ThinkStep),
    Loop(LoopStep),
}

impl CompiledStep {
    fn run<'a>(
        &'a self,
        ctx: &'a mut SessionContext,
        events: &'a dyn EventSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self {
                Self::Call(step) => step.run(ctx, events).await,
                Self::Think(step) => step.run(ctx, events).await,
                Self::Loop(step) => step.run(ctx, events).await,
            }
        })
    }
}

struct CallStep {
    rpc: Option<String>,
    params: Option<Value>,
    processor: Option<Arc<dyn Processor>>,
}

impl CallStep {
    async fn run(&self, ctx: &mut SessionContext, events: &dyn EventSink) -> Result<()> {
        events.emit(Event::Request);
        let started = Instant::now();

        if let Some(processor) = &self.processor
            && let Err(err) = processor.process(ctx, events).await
        {
            return fail(events, err);
        }

        let (Some(rpc), Some(params)) = (&self.rpc, &self.params) else {
            return fail(
                events,
                Error::InvalidStepSpec("call step needs both `send.rpc` and `send.params`".into()),
            );
        };

        let method = template::render_string(rpc, &ctx.vars);
        let params = params::resolve(params, &ctx.vars);
        let frame = frame::encode_call(&ctx.session_id, &method, params);

        let Some(conn) = ctx.connection() else {
            return fail(events, Error::Send("session has no connection".into()));
        };

        debug!(session_id = %ctx.session_id, %frame, "ws send");
        if let Err(err) = conn.get().send(frame).await {
            return fail(events, err);
        }

        events.emit(Event::Response {
            latency: started.elapsed(),
            status_code: 0,
            session_id: ctx.session_id.clone(),
        });
        ctx.success_count += 1;
        Ok(())
    }
}

impl std::fmt::Debug for CallStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallStep")
            .field("rpc", &self.rpc)
            .field("params", &self.params)
            .field("processor", &self.processor.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct ThinkStep {
    duration: ThinkSpec,
    /// Fraction in `(0, 1]`.
    jitter: Option<f64>,
}

impl ThinkStep {
    async fn run(&self, ctx: &mut SessionContext, events: &dyn EventSink) -> Result<()> {
        let secs = match &self.duration {
            ThinkSpec::Seconds(secs) => *secs,
            ThinkSpec::Template(raw) => {
                let rendered = template::render(&Value::String(raw.clone()), &ctx.vars);
                match seconds_of(&rendered) {
                    Some(secs) => secs,
                    None => {
                        return fail(
                            events,
                            Error::InvalidStepSpec(format!(
                                "think `{raw}` does not resolve to a non-negative number"
                            )),
                        );
                    }
                }
            }
        };

        let Some(pause) = self.jittered(secs) else {
            return fail(
                events,
                Error::InvalidStepSpec(format!("think of {secs}s is out of range")),
            );
        };
        tokio::time::sleep(pause).await;
        Ok(())
    }

    /// `None` when the pause does not fit in a [`Duration`].
    fn jittered(&self, secs: f64) -> Option<Duration> {
        let secs = match self.jitter {
            Some(j) if secs > 0.0 => {
                let spread = secs * j;
                rand::rng().random_range((secs - spread)..=(secs + spread))
            }
            _ => secs,
        };
        Duration::try_from_secs_f64(secs.max(0.0)).ok()
    }
}

fn seconds_of(value: &Value) -> Option<f64> {
    let secs = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

#[derive(Debug)]
struct LoopStep {
    bound: LoopBound,
    loop_value: String,
    body: Vec<CompiledStep>,
}

impl LoopStep {
    async fn run(&self, ctx: &mut SessionContext, events: &dyn EventSink) -> Result<()> {
        match &self.bound {
            LoopBound::Fixed(count) => {
                for i in 0..*count {
                    ctx.vars.insert(self.loop_value.clone(), Value::from(i));
                    run_steps(&self.body, ctx, events).await?;
                }
            }
            LoopBound::Unbounded => {
                for i in 0u64.. {
                    ctx.vars.insert(self.loop_value.clone(), Value::from(i));
                    run_steps(&self.body, ctx, events).await?;
                    tokio::task::yield_now().await;
                }
            }
            LoopBound::OverCollection(collection) => {
                let items = match collection {
                    Collection::Items(items) => items.clone(),
                    Collection::Var(name) => match template::lookup(&ctx.vars, name) {
                        Some(Value::Array(items)) => items.clone(),
                        _ => {
                            return fail(
                                events,
                                Error::InvalidStepSpec(format!(
                                    "loop `over` variable `{name}` is not an array"
                                )),
                            );
                        }
                    },
                };

                for item in items {
                    ctx.vars.insert(LOOP_ELEMENT.to_string(), item.clone());
                    ctx.vars.insert(self.loop_value.clone(), item);
                    run_steps(&self.body, ctx, events).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Vars;
    use crate::context::SessionConnection;
    use crate::error::ErrorKind;
    use crate::flow::DEFAULT_LOOP_VALUE;
    use crate::processor::FnProcessor;
    use crate::testing::{RecordingConnection, RecordingSink};

    fn session(conn: &Arc<RecordingConnection>, vars: Value) -> SessionContext {
        let vars = match vars {
            Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        };
        let mut ctx = SessionContext::with_id("s1", vars);
        ctx.attach(SessionConnection::Owned(conn.clone()));
        ctx
    }

    fn compile_ok(flow: &[StepSpec]) -> CompiledFlow {
        compile(flow, &Processors::new(), &ThinkDefaults::default())
            .unwrap_or_else(|e| panic!("compile failed: {e}"))
    }

    #[tokio::test]
    async fn call_writes_exact_frame() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({ "room": "lobby" }));
        let sink = RecordingSink::default();

        let flow = compile_ok(&[StepSpec::Call(CallSpec::new(
            "join",
            json!({ "room": "${room}" }),
        ))]);
        flow.run(&mut ctx, &sink)
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            conn.frames(),
            vec![r#"41|{"id":"s1","m":"join","p":{"room":"lobby"}}"#.to_string()]
        );
        assert_eq!(ctx.success_count, 1);
        assert_eq!(sink.count(|e| matches!(e, Event::Request)), 1);
        assert_eq!(
            sink.count(|e| matches!(e, Event::Response { status_code: 0, .. })),
            1
        );
    }

    #[tokio::test]
    async fn fixed_loop_binds_iteration_index() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({}));

        let body = vec![StepSpec::Call(CallSpec::new(
            "ping",
            json!({ "i": format!("${{{DEFAULT_LOOP_VALUE}}}") }),
        ))];
        let flow = compile_ok(&[StepSpec::Loop(LoopSpec::new(LoopBound::Fixed(3), body))]);
        flow.run(&mut ctx, &RecordingSink::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let frames = conn.frames();
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(
                frame,
                &format!(r#"41|{{"id":"s1","m":"ping","p":{{"i":{i}}}}}"#)
            );
        }
        assert_eq!(ctx.vars.get(DEFAULT_LOOP_VALUE), Some(&json!(2)));
    }

    #[tokio::test]
    async fn collection_loop_binds_element_under_both_names() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({ "rooms": ["a", "b"] }));

        let mut spec = LoopSpec::new(
            LoopBound::OverCollection(Collection::Var("rooms".into())),
            vec![StepSpec::Call(CallSpec::new(
                "join",
                json!({ "room": "${room}", "same": "${$loopElement}" }),
            ))],
        );
        spec.loop_value = "room".into();

        compile_ok(&[StepSpec::Loop(spec)])
            .run(&mut ctx, &RecordingSink::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            conn.frames(),
            vec![
                r#"41|{"id":"s1","m":"join","p":{"room":"a","same":"a"}}"#.to_string(),
                r#"41|{"id":"s1","m":"join","p":{"room":"b","same":"b"}}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn loop_over_non_array_fails_the_session() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({ "rooms": "nope" }));
        let sink = RecordingSink::default();

        let flow = compile_ok(&[StepSpec::Loop(LoopSpec::new(
            LoopBound::OverCollection(Collection::Var("rooms".into())),
            vec![StepSpec::Call(CallSpec::new("join", json!({})))],
        ))]);
        let err = flow.run(&mut ctx, &sink).await.err();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidStepSpec));
        assert!(conn.frames().is_empty());
        assert_eq!(sink.error_kinds(), vec![ErrorKind::InvalidStepSpec]);
    }

    #[tokio::test]
    async fn missing_rpc_never_writes_and_reports_once() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({}));
        let sink = RecordingSink::default();

        let incomplete = CallSpec {
            params: Some(json!({})),
            ..CallSpec::default()
        };
        let flow = compile_ok(&[
            StepSpec::Loop(LoopSpec::new(
                LoopBound::Fixed(2),
                vec![StepSpec::Call(incomplete)],
            )),
            StepSpec::Call(CallSpec::new("never", json!({}))),
        ]);
        let err = flow.run(&mut ctx, &sink).await.err();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidStepSpec));
        assert!(conn.frames().is_empty());
        assert_eq!(sink.error_kinds(), vec![ErrorKind::InvalidStepSpec]);
        assert_eq!(ctx.success_count, 0);
    }

    #[tokio::test]
    async fn send_failure_stops_the_flow() {
        let conn = Arc::new(RecordingConnection::failing());
        let mut ctx = session(&conn, json!({}));
        let sink = RecordingSink::default();

        let flow = compile_ok(&[
            StepSpec::Call(CallSpec::new("a", json!({}))),
            StepSpec::Call(CallSpec::new("b", json!({}))),
        ]);
        let err = flow.run(&mut ctx, &sink).await.err();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Send));
        assert_eq!(sink.count(|e| matches!(e, Event::Request)), 1);
        assert_eq!(sink.error_kinds(), vec![ErrorKind::Send]);
    }

    #[tokio::test]
    async fn processor_runs_before_the_frame_is_built() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({}));

        let processors = Processors::new().with(
            "stamp",
            FnProcessor(|vars: &mut Vars| -> Result<()> {
                vars.insert("nonce".into(), json!(7));
                Ok(())
            }),
        );
        let flow = compile(
            &[StepSpec::Call(
                CallSpec::new("stamp", json!({ "n": "${nonce}" })).with_processor("stamp"),
            )],
            &processors,
            &ThinkDefaults::default(),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        flow.run(&mut ctx, &RecordingSink::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            conn.frames(),
            vec![r#"41|{"id":"s1","m":"stamp","p":{"n":7}}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn processor_failure_fails_the_step() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({}));
        let sink = RecordingSink::default();

        let processors = Processors::new().with(
            "boom",
            FnProcessor(|_: &mut Vars| -> Result<()> { Err(Error::processor("boom")) }),
        );
        let flow = compile(
            &[StepSpec::Call(CallSpec::new("x", json!({})).with_processor("boom"))],
            &processors,
            &ThinkDefaults::default(),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let err = flow.run(&mut ctx, &sink).await.err();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Processor));
        assert!(conn.frames().is_empty());
        assert_eq!(sink.error_kinds(), vec![ErrorKind::Processor]);
    }

    #[test]
    fn unknown_processor_is_rejected_at_compile_time() {
        let flow = [StepSpec::Loop(LoopSpec::new(
            LoopBound::Fixed(1),
            vec![StepSpec::Call(CallSpec::new("x", json!({})).with_processor("nope"))],
        ))];
        let err = compile(&flow, &Processors::new(), &ThinkDefaults::default()).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::UnknownProcessor));
    }

    #[test]
    fn rejects_malformed_flows() {
        let think = ThinkDefaults::default();
        let none = Processors::new();

        let empty_forever = [StepSpec::Loop(LoopSpec::new(LoopBound::Unbounded, vec![]))];
        assert_eq!(
            compile(&empty_forever, &none, &think).err().map(|e| e.kind()),
            Some(ErrorKind::InvalidFlow)
        );

        for secs in [-1.0, f64::NAN, f64::INFINITY, 1e30] {
            let flow = [StepSpec::Think(ThinkSpec::Seconds(secs))];
            assert_eq!(
                compile(&flow, &none, &think).err().map(|e| e.kind()),
                Some(ErrorKind::InvalidFlow)
            );
        }
    }

    #[test]
    fn pending_requests_ignores_top_level_pauses() {
        let flow = compile_ok(&[
            StepSpec::Call(CallSpec::new("a", json!({}))),
            StepSpec::Think(ThinkSpec::Seconds(0.0)),
            StepSpec::Loop(LoopSpec::new(
                LoopBound::Fixed(5),
                vec![StepSpec::Call(CallSpec::new("b", json!({})))],
            )),
        ]);
        assert_eq!(flow.pending_requests(), 2);
        assert_eq!(flow.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn think_sleeps_for_template_duration() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({ "pause": "2.5" }));

        let flow = compile_ok(&[StepSpec::Think(ThinkSpec::Template("${pause}".into()))]);
        let started = tokio::time::Instant::now();
        flow.run(&mut ctx, &RecordingSink::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2600), "{elapsed:?}");
    }

    #[tokio::test]
    async fn unresolvable_think_is_a_step_error() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({}));
        let sink = RecordingSink::default();

        let flow = compile_ok(&[StepSpec::Think(ThinkSpec::Template("${pause}".into()))]);
        let err = flow.run(&mut ctx, &sink).await.err();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidStepSpec));
        assert_eq!(sink.error_kinds(), vec![ErrorKind::InvalidStepSpec]);
    }

    #[tokio::test]
    async fn oversized_think_template_is_a_step_error() {
        let conn = Arc::new(RecordingConnection::default());
        let mut ctx = session(&conn, json!({ "pause": 1e300 }));
        let sink = RecordingSink::default();

        let flow = compile_ok(&[StepSpec::Think(ThinkSpec::Template("${pause}".into()))]);
        let err = flow.run(&mut ctx, &sink).await.err();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidStepSpec));
        assert_eq!(sink.error_kinds(), vec![ErrorKind::InvalidStepSpec]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let step = compile_think(&ThinkSpec::Seconds(1.0), &ThinkDefaults { jitter: Some(20.0) })
            .unwrap_or_else(|e| panic!("{e}"));
        for _ in 0..200 {
            let d = step.jittered(1.0).unwrap_or_else(|| panic!("in range"));
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200), "{d:?}");
        }
        assert_eq!(step.jittered(0.0), Some(Duration::ZERO));
    }
}
