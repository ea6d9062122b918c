//! Error types for evac-rules

use evac_graph::GraphError;
use std::path::PathBuf;
use thiserror::Error;

/// Rule loading and application errors
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Cannot read rule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse rule file: {0}")]
    Parse(String),

    #[error("Invalid rule for event '{event}': {reason}")]
    InvalidRule { event: String, reason: String },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Lock poisoned")]
    Lock,
}

impl RulesError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RulesError::Graph(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Result type for rule operations
pub type RulesResult<T> = Result<T, RulesError>;
