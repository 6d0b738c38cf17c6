//! Batch submission, polling and reconciliation against the Horde.
//!
//! [`session::GeneratorSession`] plans a request into jobs and hands the
//! queue to [`engine::BatchEngine`], which talks to the service through
//! [`horde_api::GenerationService`] and stores results through a
//! [`sink::ResultSink`].

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod queue;
mod reconcile;
pub mod session;
pub mod sink;
pub mod video;

pub use config::HordeConfig;
pub use engine::{BatchEngine, BatchOutcome, BatchReport, EngineSettings};
pub use error::EngineError;
pub use events::{EngineEvent, EventBus};
pub use queue::{EntryState, QueueEntry};
pub use session::GeneratorSession;
pub use sink::{CollectingSink, ResultSink, SinkError};
pub use video::{VideoOutcome, VideoRunner};
