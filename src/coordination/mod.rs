//! Coordination of interop request finalization
//!
//! The finalizer:
//! 1. Accepts requests into one FIFO queue per destination chain
//! 2. Runs one serial runner per destination rollup
//! 3. Walks each request through source finality, gateway aggregation and
//!    target root ingestion before broadcasting it
//! 4. Records every transition for status queries and crash recovery

pub mod engine;
pub mod machine;
pub mod queue;
pub mod request;
pub mod runner;

pub use engine::FinalizerService;
pub use request::{InteropRequest, RequestSnapshot, RequestStatus};
