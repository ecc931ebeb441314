//! # Error Types
//!
//! Domain-specific error types for makhzan-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  makhzan-core errors (this file)                                        │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  makhzan-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  makhzan-store errors                                                  │
//! │  └── StoreError       - Mutation API failures (wraps both)             │
//! │                                                                         │
//! │  makhzan-sync errors                                                   │
//! │  └── SyncError        - Transport/protocol/queue failures              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → StoreError → caller               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (product code, id, etc.)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations or domain logic failures.
/// They should be caught and translated to user-friendly messages.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    ///
    /// ## When This Occurs
    /// - Product ID doesn't exist locally
    /// - Product was deleted on another device and the delete already synced
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Issue (outbound invoice) cannot be found.
    #[error("Issue not found: {0}")]
    IssueNotFound(String),

    /// Return document cannot be found.
    #[error("Return not found: {0}")]
    ReturnNotFound(String),

    /// The document is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Editing the lines of an issue that is already delivered
    /// - Approving a return that was rejected
    #[error("{entity} {id} is {status}, cannot perform operation")]
    InvalidStatus {
        entity: &'static str,
        id: String,
        status: String,
    },

    /// A ledger quantity or price is invalid (negative or non-finite).
    #[error("Invalid {field} for ledger operation: {value}")]
    InvalidLedgerInput { field: &'static str, value: f64 },

    /// A document number does not match the `PREFIX` + 4-digit-tail shape.
    #[error("Invalid document number: {0}")]
    InvalidDocumentNumber(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when user input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid date, malformed number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., duplicate product code or item number).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidStatus {
            entity: "Issue",
            id: "abc".to_string(),
            status: "delivered".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Issue abc is delivered, cannot perform operation"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Duplicate {
            field: "productCode".to_string(),
            value: "P-100".to_string(),
        };
        assert_eq!(err.to_string(), "productCode 'P-100' already exists");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "productName".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
