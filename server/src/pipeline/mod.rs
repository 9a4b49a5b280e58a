//! Event Pipeline
//!
//! Decode, deduplicate, admit, dispatch, report. Every inbound event ends in
//! exactly one [`PipelineOutcome`]; nothing a handler does escapes
//! [`EventPipeline::process`].

pub mod decrypt;
pub mod engine;
pub mod event;
pub mod handler;
pub mod outcome;

pub use decrypt::{AesGcmDecoder, DecryptError, EventDecoder, PlainJsonDecoder};
pub use engine::EventPipeline;
pub use event::PipelineEvent;
pub use handler::{EventHandler, HandlerError, HandlerRegistry};
pub use outcome::{Disposition, PipelineOutcome};
