//! Per-protocol approval-code rules and authorization-response handling.

use rand::Rng;

use crate::domain::{Transaction, TransactionStatus, TransactionType};
use crate::error::TerminalError;
use crate::gateway::AuthorizationResponse;
use crate::protocol::{MessageType, Protocol, ProtocolFamily};

const OFFLINE_PREFIX: &str = "OF";
const ALNUM_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Encodes one protocol's approval-code rules and drives the transaction
/// state machine from authorization responses.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolHandler {
    protocol: Protocol,
}

impl ProtocolHandler {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Generates an approval code. Offline codes are only defined for
    /// offline-capable protocols and carry the fixed "OF" prefix followed
    /// by random digits; online codes use the family alphabet at the full
    /// declared length.
    ///
    /// Codes come from a non-cryptographic RNG and are shape-valid only;
    /// global uniqueness is not guaranteed.
    pub fn generate_approval_code(&self, offline: bool) -> Result<String, TerminalError> {
        let length = self.protocol.approval_code_length();

        if offline {
            if !self.protocol.offline_capable() {
                return Err(TerminalError::OfflineUnsupported(
                    self.protocol.name().to_string(),
                ));
            }
            let digits = random_digits(length - OFFLINE_PREFIX.len());
            return Ok(format!("{OFFLINE_PREFIX}{digits}"));
        }

        Ok(match self.protocol.family() {
            ProtocolFamily::Numeric => random_digits(length),
            ProtocolFamily::Alphanumeric => random_alphanumeric(length),
        })
    }

    /// Pure shape check: exact declared length, then either the offline
    /// form ("OF" + digits, offline-capable protocols only) or the family
    /// alphabet.
    pub fn validate_approval_code(&self, approval_code: &str) -> bool {
        if approval_code.len() != self.protocol.approval_code_length() {
            return false;
        }

        if let Some(rest) = approval_code.strip_prefix(OFFLINE_PREFIX) {
            if self.protocol.offline_capable() {
                return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit());
            }
            // Online-only protocols never carry locally-issued codes; fall
            // through to the family shape.
        }

        match self.protocol.family() {
            ProtocolFamily::Numeric => approval_code.chars().all(|c| c.is_ascii_digit()),
            ProtocolFamily::Alphanumeric => {
                approval_code.chars().all(|c| c.is_ascii_alphanumeric())
            }
        }
    }

    /// Message-type code for a transaction intent; with `is_response` the
    /// result passes through the request→response mapping.
    pub fn message_type_for(
        transaction_type: TransactionType,
        is_response: bool,
    ) -> MessageType {
        let request = match transaction_type {
            TransactionType::Sale | TransactionType::Refund | TransactionType::Void => {
                MessageType::FinancialRequest
            }
            TransactionType::PreAuth | TransactionType::BalanceInquiry => {
                MessageType::AuthorizationRequest
            }
            TransactionType::PreAuthCompletion => MessageType::FinancialAdvice,
        };

        if is_response {
            request.response()
        } else {
            request
        }
    }

    /// Interprets an authorization response, moving the transaction forward
    /// to its outcome. Never moves the state machine backward.
    pub fn parse_response(
        &self,
        response: &AuthorizationResponse,
        transaction: &mut Transaction,
    ) -> Result<(), TerminalError> {
        if let Some(protocol) = response.protocol.as_deref() {
            if protocol != self.protocol.name() {
                let err = TerminalError::ProtocolMismatch {
                    expected: self.protocol.name().to_string(),
                    received: protocol.to_string(),
                };
                tracing::warn!("{err}");
                transaction.update_status_with(
                    TransactionStatus::Error,
                    err.response_code(),
                    &err.to_string(),
                )?;
                return Ok(());
            }
        }

        if !response.approved {
            transaction.update_status_with(
                TransactionStatus::Declined,
                response.response_code.as_deref().unwrap_or("D0001"),
                response
                    .response_message
                    .as_deref()
                    .unwrap_or("Transaction declined"),
            )?;
            return Ok(());
        }

        match response.approval_code.as_deref() {
            Some(code) if self.validate_approval_code(code) => {
                transaction.set_approval_code(code)?;
            }
            Some(code) => {
                let err = TerminalError::InvalidApprovalCode(code.to_string());
                tracing::warn!("{err}");
                transaction.update_status_with(
                    TransactionStatus::Error,
                    err.response_code(),
                    &err.to_string(),
                )?;
            }
            None => {
                let err = TerminalError::MissingApprovalCode;
                transaction.update_status_with(
                    TransactionStatus::Error,
                    err.response_code(),
                    &err.to_string(),
                )?;
            }
        }

        Ok(())
    }
}

fn random_digits(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

fn random_alphanumeric(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(ALNUM_ALPHABET[rng.gen_range(0..ALNUM_ALPHABET.len())]))
        .collect()
}
