use bigdecimal::BigDecimal;
use thiserror::Error;

/// Terminal-side error taxonomy. Every failure a transaction can surface
/// maps to one of these kinds, and the retry policy is a pure function of
/// the kind (see [`TerminalError::is_retryable`]).
#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Protocol mismatch: expected {expected}, got {received}")]
    ProtocolMismatch { expected: String, received: String },

    #[error("Missing approval code in approved response")]
    MissingApprovalCode,

    #[error("Invalid approval code in response: {0}")]
    InvalidApprovalCode(String),

    #[error("Server error: HTTP {0}")]
    Server(u16),

    #[error("Connection error: {0}")]
    Transport(String),

    #[error("Transaction amount {amount} exceeds offline limit of {limit}")]
    OfflineLimitExceeded { amount: BigDecimal, limit: BigDecimal },

    #[error("Protocol {0} requires online processing")]
    OfflineUnsupported(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TerminalError {
    /// Response code carried on the transaction when this error becomes a
    /// terminal outcome. Codes are stable across the wire contract: E-codes
    /// end in ERROR, D-codes in DECLINED.
    pub fn response_code(&self) -> &'static str {
        match self {
            TerminalError::Validation(_) => "E4001",
            TerminalError::ProtocolMismatch { .. } => "E3001",
            TerminalError::InvalidApprovalCode(_) => "E3002",
            TerminalError::MissingApprovalCode => "E3003",
            TerminalError::Server(_) => "E2002",
            TerminalError::Transport(_) => "E2003",
            TerminalError::OfflineLimitExceeded { .. } => "D2001",
            TerminalError::OfflineUnsupported(_) => "E1001",
            TerminalError::Storage(_) => "E5001",
            TerminalError::Internal(_) => "E9999",
        }
    }

    /// Whether the online path may retry after this error. Only a reachable
    /// server returning a non-success status or a transport-level failure
    /// qualifies; everything else is immediately terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TerminalError::Server(_) | TerminalError::Transport(_)
        )
    }

    /// Transport failures are the only kind that may fall back to offline
    /// approval once retries are exhausted.
    pub fn is_transport(&self) -> bool {
        matches!(self, TerminalError::Transport(_))
    }
}
