pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod services;
pub mod store;

pub use config::TerminalConfig;
pub use domain::{
    Currency, NewTransaction, PaymentMethod, Transaction, TransactionStatus, TransactionType,
};
pub use error::TerminalError;
pub use protocol::{MessageType, Protocol, ProtocolHandler};
pub use services::{NotificationDispatcher, NotificationObserver, TransactionProcessor};
pub use store::{MemoryStore, MtiNotification, TerminalStore};
