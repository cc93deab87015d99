//! Concurrent command executor for Aegis.
//!
//! Runs argv vectors under resource caps (CPU time, address space, file
//! size) with bounded, streamed output capture, FIFO queueing behind
//! global and per-session slots, cancellation with a SIGTERM→SIGKILL
//! grace period, and wall-clock deadlines.  Terminal transitions flush
//! output artifacts to a session-scoped directory.
//!
//! ## Modules
//!
//! - [`executor`] -- the engine: submit, snapshot, subscribe, cancel.
//! - [`execution`] -- execution types, events, and the status machine.
//! - [`capture`] -- bounded per-stream output buffers.
//! - [`parsers`] -- best-effort tool-output parsers.
//! - [`error`] -- executor API errors.

pub mod capture;
pub mod error;
pub mod execution;
pub mod executor;
pub mod parsers;

pub use capture::CaptureBuffer;
pub use error::{ExecError, Result};
pub use execution::{
    ExecEvent, ExecFailure, ExecStatus, ExecutionMode, ExecutionSnapshot, ResourceCaps,
    SpawnRequest, StreamKind,
};
pub use executor::{Executor, ExecutorConfig};
pub use parsers::{OutputParser, ParserRegistry};
