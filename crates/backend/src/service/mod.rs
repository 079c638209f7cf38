//! Per-collection services.
//!
//! - [`task`] - turns API documents into coordinator mutations
//! - [`search`] - keyword search and document retrieval behind the RPC gateway

pub mod search;
pub mod task;

pub use search::{IndexSearchService, SearchService};
pub use task::{InPlaceOp, IndexTaskError, IndexTaskService};
