//! Incremental indexing: the backend contract, the shared document store,
//! the coordinator that fans calls out to every backend, and the built-in
//! term index backend.

mod backend;
mod coordinator;
mod store;
mod term;

#[cfg(test)]
pub(crate) mod __tests__;

pub use backend::{IndexBackend, LifecyclePhase, MAX_API_INDEXDOC};
pub use coordinator::IncrementalIndexCoordinator;
pub use store::DocumentStore;
pub use term::{TermHit, TermIndex, tokenize};
