//! Exactly-once coordination for operations keyed by
//! `(principal, method, idempotency key)`.
//!
//! [`Workflow`] turns the compare-and-swap results of a [`Store`] into a
//! [`Decision`]. Ownership of a record is proven by its lease token
//! (`updated_at`), never by in-process state.

pub mod fingerprint;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod workflow;

pub use fingerprint::{fingerprint_bytes, request_fingerprint};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::{Reservation, Store};
pub use workflow::{Decision, DecisionKind, Workflow, WorkflowConfig};
