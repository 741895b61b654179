//! State management with PostgreSQL persistence
//!
//! Handles:
//! - Interop request persistence keyed by source transaction hash
//! - Recovery of unfinished requests after a restart
//! - Request statistics

mod manager;

pub use manager::{RequestStats, StateManager};
