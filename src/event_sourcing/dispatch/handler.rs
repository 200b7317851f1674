use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::event_sourcing::core::Envelope;

// ============================================================================
// Event Handlers
// ============================================================================

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Identity used in logs and failure reports
    fn name(&self) -> &str;

    /// Topics this handler wants when subscribed via `subscribe_handler`.
    /// Wildcard patterns such as "order.*" are allowed.
    fn event_types(&self) -> Vec<String>;

    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()>;
}

type HandlerFn = dyn for<'a> Fn(&'a Envelope) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync;

/// Closure-backed handler.
pub struct FnHandler {
    name: String,
    event_types: Vec<String>,
    f: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F>(name: impl Into<String>, event_types: &[&str], f: F) -> Self
    where
        F: for<'a> Fn(&'a Envelope) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            event_types: event_types.iter().map(|t| t.to_string()).collect(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl EventHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn event_types(&self) -> Vec<String> {
        self.event_types.clone()
    }

    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
        (self.f)(envelope).await
    }
}
