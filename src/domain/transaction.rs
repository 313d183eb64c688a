//! Transaction domain entity.
//! One value per payment attempt, carrying its own status state machine.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TerminalError;
use crate::protocol::{MessageType, Protocol};

/// Transaction types supported by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Sale,
    Refund,
    Void,
    PreAuth,
    PreAuthCompletion,
    BalanceInquiry,
}

/// Card presentment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CardSwipe,
    CardDip,
    CardNfc,
    ManualEntry,
}

/// Supported settlement currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Btc,
    Eth,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = TerminalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "BTC" => Ok(Currency::Btc),
            "ETH" => Ok(Currency::Eth),
            other => Err(TerminalError::Validation(format!(
                "Unsupported currency: {other}"
            ))),
        }
    }
}

/// Transaction status state machine.
///
/// INITIALIZED is the only start state, PROCESSING the only intermediate
/// one; the remaining six are terminal. Transitions only move forward; the
/// single exception is the APPROVED → OFFLINE_APPROVED reclassification
/// performed by the offline path after a local approval code is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Initialized,
    Processing,
    Approved,
    OfflineApproved,
    Declined,
    Error,
    Timeout,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TransactionStatus::Initialized | TransactionStatus::Processing
        )
    }

    fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match (self, next) {
            (TransactionStatus::Initialized, TransactionStatus::Processing) => true,
            (TransactionStatus::Initialized, s) if s.is_terminal() => true,
            (TransactionStatus::Processing, s) if s.is_terminal() => true,
            (TransactionStatus::Approved, TransactionStatus::OfflineApproved) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Initialized => "INITIALIZED",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Approved => "APPROVED",
            TransactionStatus::OfflineApproved => "OFFLINE_APPROVED",
            TransactionStatus::Declined => "DECLINED",
            TransactionStatus::Error => "ERROR",
            TransactionStatus::Timeout => "TIMEOUT",
            TransactionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Construction parameters for [`Transaction::new`].
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub amount: BigDecimal,
    pub currency: Currency,
    pub transaction_type: TransactionType,
    pub payment_method: PaymentMethod,
    pub protocol: Protocol,
    pub merchant_id: String,
    pub terminal_id: String,
    pub is_online: bool,
    pub batch_number: String,
}

/// One payment attempt. Identity and construction-time attributes are
/// immutable; status, approval code and message type are mutated only
/// through the guarded setters below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    transaction_id: Uuid,
    timestamp: DateTime<Utc>,
    amount: BigDecimal,
    currency: Currency,
    transaction_type: TransactionType,
    payment_method: PaymentMethod,
    protocol: Protocol,
    merchant_id: String,
    terminal_id: String,
    is_online: bool,
    status: TransactionStatus,
    approval_code: Option<String>,
    response_code: Option<String>,
    response_message: Option<String>,
    #[serde(rename = "message_type_code")]
    message_type: Option<MessageType>,
    trace_number: String,
    batch_number: String,
    card_data: Option<serde_json::Value>,
}

impl Transaction {
    pub fn new(params: NewTransaction) -> Result<Self, TerminalError> {
        if params.amount <= BigDecimal::from(0) {
            return Err(TerminalError::Validation(format!(
                "Transaction amount must be positive, got {}",
                params.amount
            )));
        }

        let tx = Self {
            transaction_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            amount: params.amount,
            currency: params.currency,
            transaction_type: params.transaction_type,
            payment_method: params.payment_method,
            protocol: params.protocol,
            merchant_id: params.merchant_id,
            terminal_id: params.terminal_id,
            is_online: params.is_online,
            status: TransactionStatus::Initialized,
            approval_code: None,
            response_code: None,
            response_message: None,
            message_type: None,
            trace_number: next_trace_number(),
            batch_number: params.batch_number,
            card_data: None,
        };

        tracing::info!(
            transaction_id = %tx.transaction_id,
            trace_number = %tx.trace_number,
            "Transaction initialized: {:?} for {} {}",
            tx.transaction_type,
            tx.amount,
            tx.currency,
        );

        Ok(tx)
    }

    pub fn id(&self) -> Uuid {
        self.transaction_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn amount(&self) -> &BigDecimal {
        &self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn approval_code(&self) -> Option<&str> {
        self.approval_code.as_deref()
    }

    pub fn response_code(&self) -> Option<&str> {
        self.response_code.as_deref()
    }

    pub fn response_message(&self) -> Option<&str> {
        self.response_message.as_deref()
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type
    }

    pub fn trace_number(&self) -> &str {
        &self.trace_number
    }

    pub fn batch_number(&self) -> &str {
        &self.batch_number
    }

    pub fn card_data(&self) -> Option<&serde_json::Value> {
        self.card_data.as_ref()
    }

    /// Opaque card payload, settable once.
    pub fn set_card_data(&mut self, card_data: serde_json::Value) -> Result<(), TerminalError> {
        if self.card_data.is_some() {
            return Err(TerminalError::Validation(
                "Card data already set for this transaction".to_string(),
            ));
        }
        self.card_data = Some(card_data);
        tracing::debug!(transaction_id = %self.transaction_id, "Card data set");
        Ok(())
    }

    /// Assigns the message-type code. The closed [`MessageType`] enumeration
    /// is the registry, so any value passed here is registry-valid.
    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.message_type = Some(message_type);
        tracing::debug!(
            transaction_id = %self.transaction_id,
            "Message type set to {}",
            message_type.code(),
        );
    }

    /// Moves the status forward. Rejects any transition the state machine
    /// does not permit, leaving the transaction untouched.
    pub fn update_status(&mut self, status: TransactionStatus) -> Result<(), TerminalError> {
        if !self.status.can_transition_to(status) {
            return Err(TerminalError::Validation(format!(
                "Invalid status transition {} -> {}",
                self.status, status
            )));
        }
        self.status = status;
        tracing::info!(
            transaction_id = %self.transaction_id,
            "Transaction status updated to {status}",
        );
        Ok(())
    }

    /// Moves the status forward to a terminal outcome, recording the
    /// response code/message pair the caller will see.
    pub fn update_status_with(
        &mut self,
        status: TransactionStatus,
        response_code: &str,
        response_message: &str,
    ) -> Result<(), TerminalError> {
        self.update_status(status)?;
        self.response_code = Some(response_code.to_string());
        self.response_message = Some(response_message.to_string());
        Ok(())
    }

    /// Assigns an approval code, forcing the status to APPROVED. Fails if
    /// the code length does not exactly match the protocol's declared
    /// length, or if the transaction already reached a terminal state;
    /// neither failure mutates the transaction.
    pub fn set_approval_code(&mut self, approval_code: &str) -> Result<(), TerminalError> {
        if self.status.is_terminal() {
            return Err(TerminalError::Validation(format!(
                "Cannot set approval code in terminal state {}",
                self.status
            )));
        }
        let expected = self.protocol.approval_code_length();
        if approval_code.len() != expected {
            return Err(TerminalError::Validation(format!(
                "Invalid approval code length: expected {expected}, got {}",
                approval_code.len()
            )));
        }
        self.approval_code = Some(approval_code.to_string());
        self.status = TransactionStatus::Approved;
        tracing::info!(
            transaction_id = %self.transaction_id,
            "Approval code {approval_code} set, transaction APPROVED",
        );
        Ok(())
    }

    /// Replaces the approval code with a server-assigned one during offline
    /// synchronization. Length is still enforced; status is left alone.
    pub fn override_approval_code(&mut self, approval_code: &str) -> Result<(), TerminalError> {
        let expected = self.protocol.approval_code_length();
        if approval_code.len() != expected {
            return Err(TerminalError::Validation(format!(
                "Invalid approval code length: expected {expected}, got {}",
                approval_code.len()
            )));
        }
        self.approval_code = Some(approval_code.to_string());
        Ok(())
    }
}

/// Six-digit trace number, unique per construction call within the process.
/// Seeded from the clock so consecutive runs do not restart at zero, then
/// incremented atomically; wraps at the field width.
fn next_trace_number() -> String {
    static COUNTER: OnceLock<AtomicU64> = OnceLock::new();
    let counter =
        COUNTER.get_or_init(|| AtomicU64::new(Utc::now().timestamp_millis() as u64));
    format!("{:06}", counter.fetch_add(1, Ordering::Relaxed) % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;

    fn sale(amount: BigDecimal, protocol: Protocol) -> NewTransaction {
        NewTransaction {
            amount,
            currency: Currency::Usd,
            transaction_type: TransactionType::Sale,
            payment_method: PaymentMethod::CardNfc,
            protocol,
            merchant_id: "MERCH001".to_string(),
            terminal_id: "TERM001".to_string(),
            is_online: true,
            batch_number: "001".to_string(),
        }
    }

    #[test]
    fn test_new_transaction_starts_initialized() {
        let tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x1)).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Initialized);
        assert_eq!(tx.trace_number().len(), 6);
        assert!(tx.trace_number().chars().all(|c| c.is_ascii_digit()));
        assert!(!tx.id().is_nil());
        assert!(tx.approval_code().is_none());
    }

    #[test]
    fn test_trace_numbers_are_unique() {
        let a = Transaction::new(sale(BigDecimal::from(1), Protocol::Pos101x1)).unwrap();
        let b = Transaction::new(sale(BigDecimal::from(1), Protocol::Pos101x1)).unwrap();
        assert_ne!(a.trace_number(), b.trace_number());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let result = Transaction::new(sale(BigDecimal::from(0), Protocol::Pos101x1));
        assert!(matches!(result, Err(TerminalError::Validation(_))));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let result = Transaction::new(sale(BigDecimal::from(-5), Protocol::Pos101x1));
        assert!(matches!(result, Err(TerminalError::Validation(_))));
    }

    #[test]
    fn test_approval_code_length_enforced() {
        let mut tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x1)).unwrap();
        let result = tx.set_approval_code("12345");
        assert!(matches!(result, Err(TerminalError::Validation(_))));
        assert_eq!(tx.status(), TransactionStatus::Initialized);
        assert!(tx.approval_code().is_none());
    }

    #[test]
    fn test_approval_code_forces_approved() {
        let mut tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x1)).unwrap();
        tx.set_approval_code("1234").unwrap();
        assert_eq!(tx.status(), TransactionStatus::Approved);
        assert_eq!(tx.approval_code(), Some("1234"));
    }

    #[test]
    fn test_approval_code_rejected_in_terminal_state() {
        let mut tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x1)).unwrap();
        tx.update_status_with(TransactionStatus::Declined, "D0001", "declined")
            .unwrap();
        assert!(tx.set_approval_code("1234").is_err());
        assert_eq!(tx.status(), TransactionStatus::Declined);
    }

    #[test]
    fn test_forward_only_transitions() {
        let mut tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x1)).unwrap();
        tx.update_status(TransactionStatus::Processing).unwrap();
        assert!(tx.update_status(TransactionStatus::Initialized).is_err());
        tx.update_status(TransactionStatus::Error).unwrap();
        // Terminal states are final.
        assert!(tx.update_status(TransactionStatus::Processing).is_err());
        assert!(tx.update_status(TransactionStatus::Approved).is_err());
    }

    #[test]
    fn test_timeout_and_cancelled_are_terminal_outcomes() {
        for status in [TransactionStatus::Timeout, TransactionStatus::Cancelled] {
            let mut tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x1)).unwrap();
            tx.update_status(TransactionStatus::Processing).unwrap();
            tx.update_status(status).unwrap();
            assert!(status.is_terminal());
            // Final, like every other terminal state.
            assert!(tx.update_status(TransactionStatus::Processing).is_err());
            assert!(tx.update_status(TransactionStatus::Approved).is_err());
        }
    }

    #[test]
    fn test_offline_reclassification_edge() {
        let mut tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x8)).unwrap();
        tx.set_approval_code("OF12").unwrap();
        assert_eq!(tx.status(), TransactionStatus::Approved);
        tx.update_status(TransactionStatus::OfflineApproved).unwrap();
        assert_eq!(tx.status(), TransactionStatus::OfflineApproved);
        // The edge only runs one way.
        assert!(tx.update_status(TransactionStatus::Approved).is_err());
    }

    #[test]
    fn test_card_data_settable_once() {
        let mut tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x1)).unwrap();
        tx.set_card_data(serde_json::json!({"pan_token": "tok_123"}))
            .unwrap();
        let result = tx.set_card_data(serde_json::json!({"pan_token": "tok_456"}));
        assert!(result.is_err());
        assert_eq!(
            tx.card_data().unwrap()["pan_token"],
            serde_json::json!("tok_123")
        );
    }

    #[test]
    fn test_serde_round_trip_is_lossless() {
        let mut tx =
            Transaction::new(sale("42.50".parse().unwrap(), Protocol::Pos201x3)).unwrap();
        tx.set_message_type(MessageType::FinancialRequest);
        tx.set_card_data(serde_json::json!({"entry": "nfc"})).unwrap();
        tx.set_approval_code("OF1234").unwrap();
        tx.update_status(TransactionStatus::OfflineApproved).unwrap();

        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_wire_field_names() {
        let mut tx = Transaction::new(sale(BigDecimal::from(50), Protocol::Pos101x1)).unwrap();
        tx.set_message_type(MessageType::AuthorizationRequest);
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["message_type_code"], serde_json::json!("0100"));
        assert_eq!(value["status"], serde_json::json!("INITIALIZED"));
        assert_eq!(value["currency"], serde_json::json!("USD"));
        assert_eq!(
            value["protocol"],
            serde_json::json!("POS Terminal -101.1 (4-digit approval)")
        );
    }
}
