//! Message-type notification dispatch.
//!
//! Every processed transaction leaves a notification record keyed by its
//! wire message type. A background loop periodically collects unprocessed
//! records and delivers them, as a batch, to every registered observer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::error::TerminalError;
use crate::protocol::MessageType;
use crate::store::{MtiNotification, TerminalStore};

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Receives batches of pending notifications. A failing observer never
/// blocks delivery to the others.
#[async_trait]
pub trait NotificationObserver: Send + Sync {
    async fn on_batch(&self, batch: &[MtiNotification]) -> anyhow::Result<()>;
}

pub struct NotificationDispatcher {
    store: Arc<dyn TerminalStore>,
    observers: RwLock<Vec<Arc<dyn NotificationObserver>>>,
    poll_interval: Duration,
    error_backoff: Duration,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn TerminalStore>,
        poll_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            observers: RwLock::new(Vec::new()),
            poll_interval,
            error_backoff,
            shutdown,
            worker: Mutex::new(None),
        }
    }

    pub async fn add_observer(&self, observer: Arc<dyn NotificationObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Records a notification for a transaction. The message type is a
    /// closed enum, so only registry codes can ever be recorded; `extra`
    /// fields are merged into the serialized record.
    pub async fn create_notification(
        &self,
        message_type: MessageType,
        transaction_id: Uuid,
        extra: Option<serde_json::Value>,
    ) -> Result<(), TerminalError> {
        let mut record = serde_json::json!({
            "message_type_code": message_type.code(),
            "description": message_type.description(),
            "transaction_id": transaction_id,
        });
        if let Some(serde_json::Value::Object(extra)) = extra {
            if let Some(object) = record.as_object_mut() {
                object.extend(extra);
            }
        }

        let notification = MtiNotification {
            id: Uuid::new_v4(),
            message_type,
            transaction_id,
            message: record.to_string(),
            created_at: Utc::now(),
            processed: false,
        };
        self.store.add_notification(notification).await?;
        tracing::info!(
            "Notification {} created for transaction {transaction_id}",
            message_type.code(),
        );
        Ok(())
    }

    /// Starts the polling loop. Idempotent while the loop is alive.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.worker.lock().await;
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            tracing::warn!("Notification dispatch loop is already running");
            return;
        }
        let dispatcher = Arc::clone(self);
        *slot = Some(tokio::spawn(dispatcher.poll_loop()));
        tracing::info!("Notification dispatch loop started");
    }

    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Notification dispatch loop did not stop within the shutdown bound");
            }
        }
        tracing::info!("Notification dispatcher stopped");
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.deliver_pending().await {
                Ok(()) => self.poll_interval,
                Err(err) => {
                    tracing::error!("Notification dispatch failed: {err}");
                    self.error_backoff
                }
            };
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Notification dispatch loop stopped");
    }

    /// One delivery pass: fetch pending records, hand the batch to every
    /// observer, then mark everything in the batch processed. Observer
    /// failures are logged and do not keep the batch pending.
    pub async fn deliver_pending(&self) -> Result<(), TerminalError> {
        let pending = self.store.pending_notifications().await?;
        if pending.is_empty() {
            return Ok(());
        }
        tracing::info!("Delivering {} pending notification(s)", pending.len());

        let observers = self.observers.read().await.clone();
        for observer in &observers {
            if let Err(err) = observer.on_batch(&pending).await {
                tracing::error!("Error in notification observer: {err}");
            }
        }

        for notification in &pending {
            self.store.mark_notification_processed(notification.id).await?;
        }
        Ok(())
    }
}
