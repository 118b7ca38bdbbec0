//! Domain error taxonomy.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (quantity checks, lifecycle
/// violations, reconciliation guards). Infrastructure concerns (storage,
/// publication) live in their own error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Requested quantity exceeds the product's total remaining stock.
    ///
    /// Distinct from [`DomainError::InsufficientSerialUnits`]: the caller's
    /// remediation is to receive more stock.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Enough quantity exists, but too few serial units are identifiable as
    /// in stock.
    ///
    /// The remediation here is reconciling the serial registry, not
    /// receiving more stock, so this is surfaced separately.
    #[error("insufficient serial units: requested {requested}, available {available}")]
    InsufficientSerialUnits { requested: i64, available: i64 },

    /// A non-positive (or otherwise nonsensical) quantity was requested.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Attempt to mutate an order/count that reached a terminal status.
    #[error("already finalized: {0}")]
    AlreadyFinalized(String),

    /// A reconciliation side effect was already produced for this source.
    #[error("duplicate reconciliation: {0}")]
    DuplicateReconciliation(String),

    /// An unknown product/lot/line/order was referenced.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn insufficient_serials(requested: i64, available: i64) -> Self {
        Self::InsufficientSerialUnits {
            requested,
            available,
        }
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn already_finalized(msg: impl Into<String>) -> Self {
        Self::AlreadyFinalized(msg.into())
    }

    pub fn duplicate_reconciliation(msg: impl Into<String>) -> Self {
        Self::DuplicateReconciliation(msg.into())
    }

    pub fn reference_not_found(msg: impl Into<String>) -> Self {
        Self::ReferenceNotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
