//! Event handlers and their registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::event::PipelineEvent;

/// A handler failure. Detail goes to the log, never to the caller.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Handler observed cancellation")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Business logic for one or more event types.
///
/// Handlers should watch `cancel`; the pipeline stops waiting for them once
/// it fires but does not abort them.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &PipelineEvent, cancel: CancellationToken)
        -> Result<(), HandlerError>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Handlers keyed by event type, in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.handlers.entry(event_type.into()).or_default().push(handler);
        self
    }

    pub fn resolve(&self, event_type: &str) -> &[Arc<dyn EventHandler>] {
        self.handlers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Registered event types.
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run every handler for the event in order; the first error stops the chain.
    pub async fn dispatch(
        &self,
        event: &PipelineEvent,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let handlers = self.resolve(&event.event_type);
        if handlers.is_empty() {
            debug!(event_type = %event.event_type, "No handler registered");
            return Ok(());
        }

        for handler in handlers {
            debug!(handler = handler.name(), "Dispatching event");
            handler.handle(event, cancel.clone()).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut counts: Vec<_> = self
            .handlers
            .iter()
            .map(|(event_type, list)| (event_type.as_str(), list.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}
