//! Push-frame intake.
//!
//! Frames from the platform's streaming transport carry a sequence id. Each
//! id is checked against the [`SequenceDeduplicator`] before the payload goes
//! through the [`EventPipeline`]; a redelivered frame never reaches it.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::dedup::SequenceDeduplicator;
use crate::pipeline::{Disposition, EventPipeline, PipelineOutcome};

/// Frames buffered between the transport and the intake.
pub const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// One sequence-numbered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFrame {
    pub seq_id: u64,
    pub payload: Bytes,
}

impl PushFrame {
    pub fn new(seq_id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq_id,
            payload: payload.into(),
        }
    }
}

/// Sequence dedup in front of the event pipeline.
#[derive(Debug)]
pub struct PushFrameIntake {
    sequences: Arc<SequenceDeduplicator>,
    pipeline: EventPipeline,
}

impl PushFrameIntake {
    pub fn new(sequences: Arc<SequenceDeduplicator>, pipeline: EventPipeline) -> Self {
        Self {
            sequences,
            pipeline,
        }
    }

    /// Process one frame.
    pub async fn accept(&self, frame: PushFrame, cancel: &CancellationToken) -> PipelineOutcome {
        if self.sequences.try_mark_as_processed(frame.seq_id) {
            debug!(seq_id = frame.seq_id, "Duplicate push frame skipped");
            return PipelineOutcome::new(Disposition::Duplicate, None);
        }
        let outcome = self.pipeline.process(&frame.payload, cancel).await;
        if !outcome.success {
            warn!(seq_id = frame.seq_id, disposition = ?outcome.disposition, "Push frame not processed");
        }
        outcome
    }

    /// Highest sequence id still inside the dedup window.
    pub fn max_processed_seq_id(&self) -> u64 {
        self.sequences.max_processed_seq_id()
    }

    pub fn sequences(&self) -> &SequenceDeduplicator {
        &self.sequences
    }

    /// Drain `frames`, one task per frame, until the channel closes or
    /// `shutdown` fires, then wait for frames already in flight.
    ///
    /// At most `max_in_flight` frame tasks exist at once; beyond that the
    /// intake stops reading and the channel applies backpressure.
    pub fn spawn(
        self: Arc<Self>,
        mut frames: mpsc::Receiver<PushFrame>,
        max_in_flight: usize,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let slots = Arc::new(Semaphore::new(max_in_flight.max(1)));
        tokio::spawn(async move {
            info!(max_in_flight, "Push-frame intake started");
            let in_flight = TaskTracker::new();
            loop {
                let slot = tokio::select! {
                    () = shutdown.cancelled() => break,
                    slot = Arc::clone(&slots).acquire_owned() => match slot {
                        Ok(slot) => slot,
                        Err(_) => break,
                    },
                };
                let frame = tokio::select! {
                    () = shutdown.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                let intake = Arc::clone(&self);
                let cancel = shutdown.child_token();
                in_flight.spawn(async move {
                    intake.accept(frame, &cancel).await;
                    drop(slot);
                });
            }
            in_flight.close();
            in_flight.wait().await;
            info!("Push-frame intake stopped");
        })
    }
}
