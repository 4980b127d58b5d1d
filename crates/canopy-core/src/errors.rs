//! Error taxonomy for canopy operations
//!
//! One error type shared by every crate. Recursive passes accumulate these
//! into result values rather than unwinding across node boundaries; only
//! structural misuse is returned eagerly.

use crate::identifiers::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single validation failure reported by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Node that produced the failure
    pub node: NodeId,
    /// Field or child key the failure refers to, if any
    pub field: Option<String>,
    /// Human-readable description
    pub message: String,
}

impl ValidationError {
    /// Create a validation failure for `node`.
    pub fn new(node: NodeId, message: impl Into<String>) -> Self {
        Self {
            node,
            field: None,
            message: message.into(),
        }
    }

    /// Attach the field the failure refers to.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} ({field}): {}", self.node, self.message),
            None => write!(f, "{}: {}", self.node, self.message),
        }
    }
}

/// Unified error type for all canopy operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum CanopyError {
    /// The tree was used in a way it does not support
    #[error("Structural error: {message}")]
    Structural {
        /// Error message describing the misuse
        message: String,
    },

    /// A response did not have the expected shape
    #[error("Malformed response: {message}")]
    ResourceFormat {
        /// Error message describing the malformed shape
        message: String,
    },

    /// One or more nodes failed validation
    #[error("Validation failed with {} error(s)", errors.len())]
    Validation {
        /// Collected failures, in tree order
        errors: Vec<ValidationError>,
    },

    /// Fetch or submit failed in the transport layer
    #[error("Transport error: {message}")]
    Transport {
        /// Error message reported by the transport
        message: String,
    },

    /// An operation reached a node after it was destroyed
    #[error("Node {node} has been destroyed")]
    Destroyed {
        /// The destroyed node
        node: NodeId,
    },

    /// Internal invariant violation
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl CanopyError {
    /// Create a structural error
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }

    /// Create a resource format error
    pub fn resource_format(message: impl Into<String>) -> Self {
        Self::ResourceFormat {
            message: message.into(),
        }
    }

    /// Create a validation error from collected failures
    pub fn validation(errors: Vec<ValidationError>) -> Self {
        Self::Validation { errors }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Only transport failures are worth retrying unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Validation failures, if this is a validation error.
    #[must_use]
    pub fn validation_errors(&self) -> Option<&[ValidationError]> {
        match self {
            Self::Validation { errors } => Some(errors),
            _ => None,
        }
    }

    /// Short stable category name for log fields.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Structural { .. } => "structural",
            Self::ResourceFormat { .. } => "resource_format",
            Self::Validation { .. } => "validation",
            Self::Transport { .. } => "transport",
            Self::Destroyed { .. } => "destroyed",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<serde_json::Error> for CanopyError {
    fn from(err: serde_json::Error) -> Self {
        Self::resource_format(err.to_string())
    }
}

impl From<toml::de::Error> for CanopyError {
    fn from(err: toml::de::Error) -> Self {
        Self::structural(format!("invalid configuration: {err}"))
    }
}

impl From<std::io::Error> for CanopyError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(CanopyError::transport("timeout").is_retryable());
        assert!(!CanopyError::structural("no target").is_retryable());
        assert!(!CanopyError::validation(vec![]).is_retryable());
    }

    #[test]
    fn test_validation_errors_accessor() {
        let node = NodeId::new();
        let err = CanopyError::validation(vec![ValidationError::new(node, "required")]);
        let errors = err.validation_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].node, node);
        assert!(CanopyError::internal("x").validation_errors().is_none());
    }

    #[test]
    fn test_display_messages() {
        let err = CanopyError::structural("expected exactly one mount target, found 0");
        assert_eq!(
            err.to_string(),
            "Structural error: expected exactly one mount target, found 0"
        );
        let err = CanopyError::validation(vec![
            ValidationError::new(NodeId::new(), "a"),
            ValidationError::new(NodeId::new(), "b").with_field("name"),
        ]);
        assert_eq!(err.to_string(), "Validation failed with 2 error(s)");
    }

    #[test]
    fn test_json_error_maps_to_resource_format() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CanopyError = json_err.into();
        assert_eq!(err.category(), "resource_format");
    }
}
