//! Stepweave Core: a resumable, multi-step workflow engine.
//!
//! A session is one versioned JSON document. The engine decides which step
//! runs next from that document alone, dispatches the step's worker unit,
//! and waits for an explicit hand-back before resolving again.
//!
//! ```text
//!                ┌──────────── Coordinator ────────────┐
//!  InputSource ─►│ AWAITING_RESOLUTION ──► DISPATCHED  │
//!                │        ▲    StepResolver     │      │
//!                │        └──── hand-back ◄─────┘      │
//!                └───────────────┬─────────────────────┘
//!                                │ StepContext::write (CAS)
//!                          StateStore ◄── Validator ◄── Catalog
//! ```
//!
//! The crate has no UI; the `stepweave` CLI and the replay module are the
//! two bundled drivers.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestration;
pub mod replay;
pub mod resolver;
pub mod state;
pub mod store;
pub mod units;
pub mod validation;
pub mod workflow;

// Convenience re-exports
pub use config::EngineConfig;
pub use db::Database;
pub use error::{EngineError, ValidationError};
pub use models::state::WorkflowState;
pub use models::step::NextStep;
pub use orchestration::{Coordinator, HandBack, StepContext, WorkerRegistry, WorkerUnit};
pub use resolver::StepResolver;
pub use state::{EngineState, EngineStateInner};
pub use store::{MemoryStateStore, Mutation, SqliteStateStore, StateStore};
pub use validation::Validator;
pub use workflow::{StaticCatalog, WorkflowSchema};
