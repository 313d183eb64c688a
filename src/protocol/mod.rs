//! Protocol registry and message-type enumeration.
//!
//! Both tables are closed enums resolved at construction time, so the
//! processing hot path never sees an unknown protocol or message-type key.

pub mod handler;

pub use handler::ProtocolHandler;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TerminalError;

/// Static definition of one protocol variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDefinition {
    pub name: &'static str,
    pub approval_code_length: usize,
    pub supports_online: bool,
}

/// Approval-code alphabet family, split on the protocol series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    /// 101.x series: numeric approval codes.
    Numeric,
    /// 201.x series: uppercase alphanumeric approval codes.
    Alphanumeric,
}

/// Supported protocol variants. Serialized as the full registry name, which
/// is what the authorization server exchanges on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "POS Terminal -101.1 (4-digit approval)")]
    Pos101x1,
    #[serde(rename = "POS Terminal -101.4 (6-digit approval)")]
    Pos101x4,
    #[serde(rename = "POS Terminal -101.6 (Pre-authorization)")]
    Pos101x6,
    #[serde(rename = "POS Terminal -101.7 (4-digit approval)")]
    Pos101x7,
    #[serde(rename = "POS Terminal -101.8 (PIN-LESS transaction)")]
    Pos101x8,
    #[serde(rename = "POS Terminal -201.1 (6-digit approval)")]
    Pos201x1,
    #[serde(rename = "POS Terminal -201.3 (6-digit approval)")]
    Pos201x3,
    #[serde(rename = "POS Terminal -201.5 (6-digit approval)")]
    Pos201x5,
}

impl Protocol {
    pub const ALL: [Protocol; 8] = [
        Protocol::Pos101x1,
        Protocol::Pos101x4,
        Protocol::Pos101x6,
        Protocol::Pos101x7,
        Protocol::Pos101x8,
        Protocol::Pos201x1,
        Protocol::Pos201x3,
        Protocol::Pos201x5,
    ];

    /// Registry entry for this variant.
    pub fn definition(&self) -> &'static ProtocolDefinition {
        match self {
            Protocol::Pos101x1 => &ProtocolDefinition {
                name: "POS Terminal -101.1 (4-digit approval)",
                approval_code_length: 4,
                supports_online: true,
            },
            Protocol::Pos101x4 => &ProtocolDefinition {
                name: "POS Terminal -101.4 (6-digit approval)",
                approval_code_length: 6,
                supports_online: true,
            },
            Protocol::Pos101x6 => &ProtocolDefinition {
                name: "POS Terminal -101.6 (Pre-authorization)",
                approval_code_length: 6,
                supports_online: true,
            },
            Protocol::Pos101x7 => &ProtocolDefinition {
                name: "POS Terminal -101.7 (4-digit approval)",
                approval_code_length: 4,
                supports_online: true,
            },
            Protocol::Pos101x8 => &ProtocolDefinition {
                name: "POS Terminal -101.8 (PIN-LESS transaction)",
                approval_code_length: 4,
                supports_online: false,
            },
            Protocol::Pos201x1 => &ProtocolDefinition {
                name: "POS Terminal -201.1 (6-digit approval)",
                approval_code_length: 6,
                supports_online: true,
            },
            Protocol::Pos201x3 => &ProtocolDefinition {
                name: "POS Terminal -201.3 (6-digit approval)",
                approval_code_length: 6,
                supports_online: false,
            },
            Protocol::Pos201x5 => &ProtocolDefinition {
                name: "POS Terminal -201.5 (6-digit approval)",
                approval_code_length: 6,
                supports_online: false,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.definition().name
    }

    pub fn approval_code_length(&self) -> usize {
        self.definition().approval_code_length
    }

    pub fn supports_online(&self) -> bool {
        self.definition().supports_online
    }

    /// A protocol not flagged for online settlement is the one eligible for
    /// local approval without server contact.
    pub fn offline_capable(&self) -> bool {
        !self.supports_online()
    }

    pub fn family(&self) -> ProtocolFamily {
        match self {
            Protocol::Pos101x1
            | Protocol::Pos101x4
            | Protocol::Pos101x6
            | Protocol::Pos101x7
            | Protocol::Pos101x8 => ProtocolFamily::Numeric,
            Protocol::Pos201x1 | Protocol::Pos201x3 | Protocol::Pos201x5 => {
                ProtocolFamily::Alphanumeric
            }
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = TerminalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .iter()
            .find(|p| p.name() == s)
            .copied()
            .ok_or_else(|| TerminalError::Validation(format!("Invalid protocol: {s}")))
    }
}

/// Message Type Indicator codes carried on transaction exchanges.
/// Serialized as the 4-character code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "0100")]
    AuthorizationRequest,
    #[serde(rename = "0110")]
    AuthorizationResponse,
    #[serde(rename = "0200")]
    FinancialRequest,
    #[serde(rename = "0210")]
    FinancialResponse,
    #[serde(rename = "0220")]
    FinancialAdvice,
    #[serde(rename = "0230")]
    FinancialAdviceResponse,
    #[serde(rename = "0500")]
    ReversalRequest,
    #[serde(rename = "0510")]
    ReversalResponse,
}

impl MessageType {
    pub fn code(&self) -> &'static str {
        match self {
            MessageType::AuthorizationRequest => "0100",
            MessageType::AuthorizationResponse => "0110",
            MessageType::FinancialRequest => "0200",
            MessageType::FinancialResponse => "0210",
            MessageType::FinancialAdvice => "0220",
            MessageType::FinancialAdviceResponse => "0230",
            MessageType::ReversalRequest => "0500",
            MessageType::ReversalResponse => "0510",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MessageType::AuthorizationRequest => "Authorization Request",
            MessageType::AuthorizationResponse => "Authorization Response",
            MessageType::FinancialRequest => "Financial Transaction Request",
            MessageType::FinancialResponse => "Financial Transaction Response",
            MessageType::FinancialAdvice => "Financial Transaction Advice",
            MessageType::FinancialAdviceResponse => "Financial Transaction Advice Response",
            MessageType::ReversalRequest => "Reversal Request",
            MessageType::ReversalResponse => "Reversal Response",
        }
    }

    pub fn from_code(code: &str) -> Option<MessageType> {
        match code {
            "0100" => Some(MessageType::AuthorizationRequest),
            "0110" => Some(MessageType::AuthorizationResponse),
            "0200" => Some(MessageType::FinancialRequest),
            "0210" => Some(MessageType::FinancialResponse),
            "0220" => Some(MessageType::FinancialAdvice),
            "0230" => Some(MessageType::FinancialAdviceResponse),
            "0500" => Some(MessageType::ReversalRequest),
            "0510" => Some(MessageType::ReversalResponse),
            _ => None,
        }
    }

    /// Request → response mapping; codes with no mapping echo themselves.
    pub fn response(&self) -> MessageType {
        match self {
            MessageType::AuthorizationRequest => MessageType::AuthorizationResponse,
            MessageType::FinancialRequest => MessageType::FinancialResponse,
            MessageType::FinancialAdvice => MessageType::FinancialAdviceResponse,
            MessageType::ReversalRequest => MessageType::ReversalResponse,
            other => *other,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
