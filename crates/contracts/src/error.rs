//! Layered error definitions
//!
//! Categorized by source: config / preparation / resolution / load / stats

use thiserror::Error;

use crate::ItemId;

/// Unified collaborator error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Dependency Preparation Errors =====
    /// Bulk dependency preparation failed
    #[error("dependency preparation failed for {count} items starting at {first:?}: {message}")]
    Prepare {
        first: Option<ItemId>,
        count: usize,
        message: String,
    },

    // ===== Item Resolution Errors =====
    /// Work item could not be materialized
    #[error("failed to resolve item {item_id}: {message}")]
    Resolve { item_id: ItemId, message: String },

    // ===== Load Errors =====
    /// Saturation indicator could not be evaluated
    #[error("saturation check '{indicator}' failed: {message}")]
    Saturation { indicator: String, message: String },

    // ===== Stats Errors =====
    /// Aggregate count query failed
    #[error("queue count query failed: {message}")]
    CountQuery { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create dependency preparation error for a batch
    pub fn prepare(batch: &[ItemId], message: impl Into<String>) -> Self {
        Self::Prepare {
            first: batch.first().copied(),
            count: batch.len(),
            message: message.into(),
        }
    }

    /// Create item resolution error
    pub fn resolve(item_id: ItemId, message: impl Into<String>) -> Self {
        Self::Resolve {
            item_id,
            message: message.into(),
        }
    }

    /// Create saturation check error
    pub fn saturation(indicator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Saturation {
            indicator: indicator.into(),
            message: message.into(),
        }
    }

    /// Create count query error
    pub fn count_query(message: impl Into<String>) -> Self {
        Self::CountQuery {
            message: message.into(),
        }
    }
}
