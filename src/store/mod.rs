//! Persistence collaborator contract.
//!
//! The core never owns durable storage; it talks to this trait. The
//! in-memory implementation backs the demo binary and tests and provides
//! read-your-writes behavior within a process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::Transaction;
use crate::error::TerminalError;
use crate::protocol::MessageType;

/// One message-type event awaiting delivery to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtiNotification {
    pub id: Uuid,
    pub message_type: MessageType,
    pub transaction_id: Uuid,
    /// Serialized notification record (JSON).
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
}

#[async_trait]
pub trait TerminalStore: Send + Sync {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), TerminalError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, TerminalError>;

    async fn add_notification(&self, notification: MtiNotification) -> Result<(), TerminalError>;

    /// Unprocessed notifications in admission order.
    async fn pending_notifications(&self) -> Result<Vec<MtiNotification>, TerminalError>;

    async fn mark_notification_processed(&self, id: Uuid) -> Result<(), TerminalError>;
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    transactions: RwLock<HashMap<Uuid, Transaction>>,
    notifications: RwLock<Vec<MtiNotification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TerminalStore for MemoryStore {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), TerminalError> {
        self.transactions
            .write()
            .await
            .insert(transaction.id(), transaction.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, TerminalError> {
        Ok(self.transactions.read().await.get(&id).cloned())
    }

    async fn add_notification(&self, notification: MtiNotification) -> Result<(), TerminalError> {
        self.notifications.write().await.push(notification);
        Ok(())
    }

    async fn pending_notifications(&self) -> Result<Vec<MtiNotification>, TerminalError> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| !n.processed)
            .cloned()
            .collect())
    }

    async fn mark_notification_processed(&self, id: Uuid) -> Result<(), TerminalError> {
        let mut notifications = self.notifications.write().await;
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.processed = true;
                Ok(())
            }
            None => Err(TerminalError::Storage(format!(
                "Notification {id} not found"
            ))),
        }
    }
}
