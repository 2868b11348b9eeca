//! Job-pipeline orchestration: envelopes, the step transition table, the
//! dispatcher that runs one step and enqueues the next, and the worker pool.

pub mod context;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod retry;
pub mod runner;
pub mod stages;
pub mod transitions;

pub use context::JobContext;
pub use dispatcher::{Dispatched, Dispatcher};
pub use envelope::{Envelope, EnvelopeError, Step};
pub use error::PipelineError;
pub use runner::{Runner, RunnerConfig, RunnerHandle, ShutdownReport};
pub use transitions::TransitionTable;
