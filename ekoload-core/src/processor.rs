//! Named callbacks a call step can run before its frame is sent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Vars;
use crate::context::SessionContext;
use crate::error::Result;
use crate::events::EventSink;

#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: &mut SessionContext, events: &dyn EventSink) -> Result<()>;
}

/// Adapts a synchronous closure over session variables.
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(&mut Vars) -> Result<()> + Send + Sync,
{
    async fn process(&self, ctx: &mut SessionContext, _events: &dyn EventSink) -> Result<()> {
        (self.0)(&mut ctx.vars)
    }
}

/// The processors a flow may reference, by name.
#[derive(Clone, Default)]
pub struct Processors {
    inner: HashMap<String, Arc<dyn Processor>>,
}

impl Processors {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, processor: impl Processor + 'static) -> Self {
        self.register(name, processor);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, processor: impl Processor + 'static) {
        self.inner.insert(name.into(), Arc::new(processor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.inner.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Processors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Processors").field("names", &names).finish()
    }
}
