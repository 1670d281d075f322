//! Prompt templates for LLM interactions.
//!
//! Prompts are Rust string literals so they ship inside the binary.

pub mod extract_graph;
