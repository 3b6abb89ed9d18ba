// src/error.rs
//! Unified error handling for HD-EMG motor unit analysis
//!
//! Every failure surfaced by this crate is a precondition failure detected
//! before heavy computation starts. Errors carry an [`ErrorContext`] naming
//! the component and operation that rejected the input so that callers (and
//! the GUI layer translating them into readable messages) can tell where the
//! problem was found.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Unified error type for the entire crate
#[derive(Debug, Clone, Error)]
pub enum EmgError {
    /// Grid shape does not fit the signal, or an invalid custom order
    #[error("[SHAPE] {reason} (expected: {expected}, got: {actual}) ({})", .context.operation)]
    ShapeMismatch {
        reason: String,
        expected: String,
        actual: String,
        context: ErrorContext,
    },

    /// Matrix code absent from the catalog or without a sorting layout
    #[error("[ELECTRODE] Unsupported electrode code '{code}' ({})", .context.operation)]
    UnsupportedElectrodeCode {
        code: String,
        context: ErrorContext,
    },

    /// STA or tracking requested on a motor unit without firings
    #[error("[MU] Motor unit {mu_index} has no firings ({})", .context.operation)]
    EmptyMotorUnit {
        mu_index: usize,
        context: ErrorContext,
    },

    /// Out-of-range parameter or incompatible inputs
    #[error("[CONFIG] Invalid configuration in {}: {reason} ({})", .context.component, .context.operation)]
    InvalidConfiguration {
        reason: String,
        context: ErrorContext,
    },

    /// Malformed input data
    #[error("[DATA] Invalid {data_type}: {reason} ({})", .context.operation)]
    InvalidData {
        data_type: String,
        reason: String,
        context: ErrorContext,
    },
}

/// Error context for debugging and analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub additional_info: HashMap<String, String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            file: None,
            line: None,
            additional_info: HashMap::new(),
        }
    }

    /// Create error context with file and line information
    pub fn with_location(component: &str, operation: &str, file: &'static str, line: u32) -> Self {
        let mut context = Self::new(component, operation);
        context.file = Some(file.to_string());
        context.line = Some(line);
        context
    }

    /// Add additional information to the context
    pub fn add_info<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.additional_info.insert(key.into(), value.into());
        self
    }
}

/// Macro for creating error context with file and line info
#[macro_export]
macro_rules! error_context {
    ($component:expr, $operation:expr) => {
        $crate::error::ErrorContext::with_location($component, $operation, file!(), line!())
    };
}

impl EmgError {
    /// Context attached to this error
    pub fn context(&self) -> &ErrorContext {
        match self {
            EmgError::ShapeMismatch { context, .. }
            | EmgError::UnsupportedElectrodeCode { context, .. }
            | EmgError::EmptyMotorUnit { context, .. }
            | EmgError::InvalidConfiguration { context, .. }
            | EmgError::InvalidData { context, .. } => context,
        }
    }

    /// Short stable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            EmgError::ShapeMismatch { .. } => "ShapeMismatch",
            EmgError::UnsupportedElectrodeCode { .. } => "UnsupportedElectrodeCode",
            EmgError::EmptyMotorUnit { .. } => "EmptyMotorUnit",
            EmgError::InvalidConfiguration { .. } => "InvalidConfiguration",
            EmgError::InvalidData { .. } => "InvalidData",
        }
    }
}

/// Result type alias for EMG operations
pub type EmgResult<T> = Result<T, EmgError>;

/// Error builder for convenient error construction
pub struct EmgErrorBuilder {
    component: String,
    operation: String,
}

impl EmgErrorBuilder {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
        }
    }

    fn context(&self) -> ErrorContext {
        ErrorContext::new(&self.component, &self.operation)
    }

    pub fn shape_mismatch(
        self,
        reason: &str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> EmgError {
        EmgError::ShapeMismatch {
            reason: reason.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            context: self.context(),
        }
    }

    pub fn unsupported_code(self, code: &str) -> EmgError {
        EmgError::UnsupportedElectrodeCode {
            code: code.to_string(),
            context: self.context(),
        }
    }

    pub fn empty_motor_unit(self, mu_index: usize) -> EmgError {
        EmgError::EmptyMotorUnit {
            mu_index,
            context: self.context(),
        }
    }

    pub fn configuration(self, reason: &str) -> EmgError {
        EmgError::InvalidConfiguration {
            reason: reason.to_string(),
            context: self.context(),
        }
    }

    pub fn invalid_data(self, data_type: &str, reason: &str) -> EmgError {
        EmgError::InvalidData {
            data_type: data_type.to_string(),
            reason: reason.to_string(),
            context: self.context(),
        }
    }
}
