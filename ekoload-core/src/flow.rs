//! Declarative flow model: what a session does, before compilation.

use serde_json::Value;

/// Loop variable used when a loop does not name one.
pub const DEFAULT_LOOP_VALUE: &str = "$loopCount";
/// Bound to the current element while iterating over a collection.
pub const LOOP_ELEMENT: &str = "$loopElement";

#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    Call(CallSpec),
    Think(ThinkSpec),
    Loop(LoopSpec),
}

impl StepSpec {
    pub fn is_think(&self) -> bool {
        matches!(self, Self::Think(_))
    }
}

/// A remote call. `rpc` and `params` are optional here because a step that lacks them is
/// reported when it runs, not when the flow is loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSpec {
    pub rpc: Option<String>,
    pub params: Option<Value>,
    /// Name of a registered processor to run before the frame is sent.
    pub processor: Option<String>,
}

impl CallSpec {
    pub fn new(rpc: impl Into<String>, params: Value) -> Self {
        Self {
            rpc: Some(rpc.into()),
            params: Some(params),
            processor: None,
        }
    }

    #[must_use]
    pub fn with_processor(mut self, name: impl Into<String>) -> Self {
        self.processor = Some(name.into());
        self
    }
}

/// Pause length, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub enum ThinkSpec {
    Seconds(f64),
    /// Rendered against session variables when the step runs, e.g. `"${pause}"`.
    Template(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSpec {
    pub bound: LoopBound,
    pub loop_value: String,
    pub body: Vec<StepSpec>,
}

impl LoopSpec {
    pub fn new(bound: LoopBound, body: Vec<StepSpec>) -> Self {
        Self {
            bound,
            loop_value: DEFAULT_LOOP_VALUE.to_string(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopBound {
    Fixed(u64),
    OverCollection(Collection),
    /// Repeats until a step fails.
    Unbounded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    Items(Vec<Value>),
    /// Name of a session variable holding an array, read when the loop starts.
    Var(String),
}

/// Number of top-level steps that are not pauses.
pub fn pending_requests(flow: &[StepSpec]) -> u64 {
    flow.iter().filter(|s| !s.is_think()).count() as u64
}
