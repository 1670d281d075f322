//! Process configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::edges::RelationPolicy;
use crate::errors::{Result, ScigraphError};
use crate::normalize::{AliasTable, Normalizer};
use crate::utils::RetryPolicy;

/// `DATABASE_URL` value selecting the in-process store.
pub const MEMORY_STORE_URL: &str = "memory";

/// Central configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScigraphConfig {
    /// PostgreSQL URL, or `memory`.
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Needed only by commands that call the model.
    pub openai_api_key: Option<String>,

    pub model_name: String,

    /// Directory of extracted paper texts to ingest.
    pub papers_dir: PathBuf,

    /// JSON alias table; no synonym folding when absent.
    pub synonyms_path: Option<PathBuf>,

    #[validate(range(min = 1))]
    pub max_concurrency: usize,

    pub extraction_max_retries: usize,

    pub commit_max_retries: usize,

    /// Relation labels admitted on top of the built-in ones.
    pub extra_relation_types: Vec<String>,
}

impl Default for ScigraphConfig {
    fn default() -> Self {
        Self {
            database_url: MEMORY_STORE_URL.to_string(),
            openai_api_key: None,
            model_name: "gpt-4o".to_string(),
            papers_dir: PathBuf::from("./papers"),
            synonyms_path: None,
            max_concurrency: 4,
            extraction_max_retries: 3,
            commit_max_retries: 3,
            extra_relation_types: Vec::new(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            ScigraphError::Validation(format!("{name} must be a non-negative integer, got '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ScigraphConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` first (non-fatal if `.env` is absent).
    /// `DATABASE_URL` is required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let database_url = non_empty_var("DATABASE_URL")
            .ok_or_else(|| ScigraphError::Validation("DATABASE_URL is required".to_string()))?;

        let config = Self {
            database_url,
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            model_name: non_empty_var("MODEL_NAME").unwrap_or(defaults.model_name),
            papers_dir: non_empty_var("PAPERS_DIR").map(PathBuf::from).unwrap_or(defaults.papers_dir),
            synonyms_path: non_empty_var("SYNONYMS_PATH").map(PathBuf::from),
            max_concurrency: parse_var("MAX_CONCURRENCY", defaults.max_concurrency)?,
            extraction_max_retries: parse_var("EXTRACTION_MAX_RETRIES", defaults.extraction_max_retries)?,
            commit_max_retries: parse_var("COMMIT_MAX_RETRIES", defaults.commit_max_retries)?,
            extra_relation_types: non_empty_var("EXTRA_RELATION_TYPES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        config
            .validate()
            .map_err(|e| ScigraphError::Validation(e.to_string()))?;

        Ok(config)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.eq_ignore_ascii_case(MEMORY_STORE_URL)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| ScigraphError::Validation("OPENAI_API_KEY is required".to_string()))
    }

    pub fn relation_policy(&self) -> RelationPolicy {
        RelationPolicy::default().with_extra(&self.extra_relation_types)
    }

    /// Build the normalizer, loading the alias table once.
    pub fn normalizer(&self) -> Result<Normalizer> {
        let table = match &self.synonyms_path {
            Some(path) => AliasTable::from_path(path)?,
            None => AliasTable::default(),
        };
        Ok(Normalizer::new(Arc::new(table)))
    }

    pub fn ingestion(&self) -> IngestionConfig {
        IngestionConfig {
            max_concurrency: self.max_concurrency,
            extraction_retry: RetryPolicy::default().with_max_retries(self.extraction_max_retries),
            commit_retry: RetryPolicy::default().with_max_retries(self.commit_max_retries),
        }
    }
}

/// Pipeline tuning derived from [`ScigraphConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionConfig {
    pub max_concurrency: usize,
    pub extraction_retry: RetryPolicy,
    pub commit_retry: RetryPolicy,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        ScigraphConfig::default().ingestion()
    }
}
