//! Shared utilities.
//!
//! Includes:
//! - String normalization helpers (whitespace, name folding, NUL scrubbing)
//! - LLM response helpers (JSON extraction from fenced output)
//! - Retry policy shared by extraction and commit

pub mod retry;
pub mod text;

pub use retry::RetryPolicy;
pub use text::{extract_json_from_response, fold_name, normalize_whitespace, scrub_text};
