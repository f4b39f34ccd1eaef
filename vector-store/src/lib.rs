//! Thin query client for the remote vector database.
//!
//! Supports the three operations the retrieval pipeline needs: schema
//! existence, nearest-neighbour search with a structured filter, and
//! group-by aggregation (member listing and per-field statistics). All
//! traffic goes through an [`HttpTransport`](ragbridge_bridge::HttpTransport).

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod query;

pub use client::{EXISTS_KEY, MEMBERS_KEY, STATS_TAG, VectorStoreClient, stats_key};
pub use config::VectorStoreConfig;
pub use error::{Result, VectorStoreError};
pub use filter::{FilterOperator, FilterValue, SearchFilter};
pub use query::{GroupCount, MemberSummary, SearchResult};
