//! # scigraph-rs
//!
//! Builds a deduplicated, typed knowledge graph of scientific entities
//! (papers, methods, concepts, metrics, datasets, authors) from research
//! papers.
//!
//! ## Architecture
//!
//! - **Extraction**: an LLM proposes candidate entities and relations per paper
//! - **Validation**: candidates that would break a graph invariant are rejected one by one
//! - **Identity resolution**: names fold to canonical `(name, type)` keys; each key is one node
//! - **Atomic writes**: one transaction per paper, insert-if-absent at the Store boundary

pub mod edges;
pub mod errors;
pub mod nodes;
pub mod types;

pub mod driver;
pub mod llm_client;

pub mod documents;
pub mod extract;
pub mod normalize;
pub mod prompts;
pub mod query;
pub mod resolve;
pub mod validate;
pub mod writer;

pub mod pipeline;
pub mod utils;

pub use errors::{Result, ScigraphError};
pub use pipeline::{Pipeline, RunSummary};
pub use types::ScigraphConfig;
