//! Pipeline orchestration.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::decrypt::{DecryptError, EventDecoder};
use super::event::PipelineEvent;
use super::handler::HandlerRegistry;
use super::outcome::{Disposition, PipelineOutcome};
use crate::admission::{AdmissionError, AdmissionGate};
use crate::dedup::EventDeduplicator;
use crate::settings::RuntimeSettings;

/// Runs inbound events from raw bytes to a reported outcome.
///
/// Once an event id passes the dedup check it stays marked, whatever happens
/// afterwards. A slow or failing handler therefore cannot cause the platform's
/// redeliveries to pile up behind it.
#[derive(Clone)]
pub struct EventPipeline {
    decoder: Arc<dyn EventDecoder>,
    events: Arc<EventDeduplicator>,
    gate: Arc<AdmissionGate>,
    handlers: Arc<HandlerRegistry>,
    settings: watch::Receiver<RuntimeSettings>,
}

impl EventPipeline {
    pub fn new(
        decoder: Arc<dyn EventDecoder>,
        events: Arc<EventDeduplicator>,
        gate: Arc<AdmissionGate>,
        handlers: Arc<HandlerRegistry>,
        settings: watch::Receiver<RuntimeSettings>,
    ) -> Self {
        Self {
            decoder,
            events,
            gate,
            handlers,
            settings,
        }
    }

    /// Decode `raw` and run it through the pipeline.
    #[tracing::instrument(
        skip_all,
        fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
    )]
    pub async fn process(&self, raw: &[u8], cancel: &CancellationToken) -> PipelineOutcome {
        let event = match self.decoder.decode(raw, cancel).await {
            Ok(event) => event,
            Err(DecryptError::Cancelled) => {
                return PipelineOutcome::new(Disposition::Cancelled, None);
            }
            Err(e) => {
                warn!(error = %e, "Event decoding failed");
                return PipelineOutcome::new(Disposition::DecryptFailed, None);
            }
        };

        let span = tracing::Span::current();
        span.record("event_id", event.event_id.as_str());
        span.record("event_type", event.event_type.as_str());

        self.process_event(event, cancel).await
    }

    /// Run an already decoded event.
    pub async fn process_event(
        &self,
        event: PipelineEvent,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let event_id = event.event_id.clone();
        let disposition = self.run(event, cancel).await;
        match disposition {
            Disposition::Completed => debug!(%event_id, "Event processed"),
            Disposition::Duplicate => debug!(%event_id, "Duplicate event skipped"),
            other => warn!(%event_id, disposition = ?other, "Event not processed"),
        }
        PipelineOutcome::new(disposition, Some(event_id))
    }

    async fn run(&self, event: PipelineEvent, cancel: &CancellationToken) -> Disposition {
        if self.events.try_mark_as_processed(&event.event_id) {
            return Disposition::Duplicate;
        }

        let (handler_timeout, admission_timeout) = {
            let settings = self.settings.borrow();
            (settings.handler_timeout, settings.admission_timeout)
        };

        let admitted = match admission_timeout {
            Some(timeout) => self.gate.acquire_within(timeout, cancel).await,
            None => self.gate.acquire(cancel).await,
        };
        let lease = match admitted {
            Ok(lease) => lease,
            Err(AdmissionError::TimedOut(waited)) => {
                warn!(waited_ms = waited.as_millis() as u64, "No admission slot freed up");
                return Disposition::AdmissionTimeout;
            }
            Err(AdmissionError::Cancelled | AdmissionError::Closed) => {
                return Disposition::Cancelled;
            }
        };

        // Fires on outer cancellation directly, and below once the handler
        // budget runs out.
        let deadline = cancel.child_token();
        let mut dispatch = tokio::spawn({
            let handlers = Arc::clone(&self.handlers);
            let deadline = deadline.clone();
            async move { handlers.dispatch(&event, deadline).await }
        });

        let disposition = tokio::select! {
            biased;
            () = cancel.cancelled() => Disposition::Cancelled,
            finished = tokio::time::timeout(handler_timeout, &mut dispatch) => match finished {
                Ok(Ok(Ok(()))) => Disposition::Completed,
                Ok(Ok(Err(e))) => {
                    error!(error = %e, "Event handler failed");
                    Disposition::Faulted
                }
                Ok(Err(join_error)) => {
                    error!(error = %join_error, "Event handler panicked");
                    Disposition::Faulted
                }
                Err(_) => Disposition::TimedOut,
            },
        };

        if !dispatch.is_finished() {
            debug!("Abandoning handler still running past its deadline");
        }
        deadline.cancel();
        lease.release();
        disposition
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn events(&self) -> &EventDeduplicator {
        &self.events
    }
}

impl std::fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPipeline")
            .field("gate", &self.gate)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}
