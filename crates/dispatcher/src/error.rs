//! Dispatch error types
//!
//! The variant is decided once at the failure site; callers match on it
//! instead of unwrapping nested causes.

use contracts::{ContractError, ItemId};
use thiserror::Error;

/// Why a publish run was aborted or an item was skipped
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Bulk dependency preparation failed
    #[error("dependency prefetch failed")]
    PrepareFailed(#[source] ContractError),

    /// Saturation check failed while applying backpressure
    #[error("backpressure check failed")]
    BackpressureFailed(#[source] ContractError),

    /// A single item could not be resolved into a renderable object
    #[error("item {item_id} could not be resolved")]
    ResolutionFailed {
        item_id: ItemId,
        #[source]
        source: ContractError,
    },

    /// Abort requested by a worker or the orchestrator
    #[error("publish run aborted: {message}")]
    Unknown { message: String },
}

impl DispatchError {
    /// Create an abort cause without a typed source
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrepareFailed(_) => "prepare_failed",
            Self::BackpressureFailed(_) => "backpressure_failed",
            Self::ResolutionFailed { .. } => "resolution_failed",
            Self::Unknown { .. } => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_reachable_through_source_only() {
        let err = DispatchError::PrepareFailed(ContractError::prepare(
            &[ItemId(1), ItemId(2)],
            "connection reset",
        ));
        let text = err.to_string();
        assert_eq!(text, "dependency prefetch failed");

        let source = std::error::Error::source(&err).expect("source kept");
        assert!(source.to_string().contains("connection reset"));
        assert_eq!(err.kind(), "prepare_failed");
    }

    #[test]
    fn test_backpressure_message_excludes_source() {
        let err = DispatchError::BackpressureFailed(ContractError::saturation("writers", "gone"));
        assert_eq!(err.to_string(), "backpressure check failed");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_resolution_failed_names_item() {
        let err = DispatchError::ResolutionFailed {
            item_id: ItemId(99),
            source: ContractError::resolve(ItemId(99), "page deleted"),
        };
        assert!(err.to_string().contains("item 99"));
        assert_eq!(DispatchError::unknown("x").kind(), "unknown");
    }
}
