//! The orchestration engine: routes transactions online or offline, tracks
//! connectivity through heartbeats, retries transient failures and
//! reconciles locally-approved transactions once connectivity returns.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::config::TerminalConfig;
use crate::domain::{NewTransaction, Transaction, TransactionStatus, TransactionType};
use crate::error::TerminalError;
use crate::gateway::{
    AuthorizationRequest, GatewayClient, GatewayError, HeartbeatRequest, OfflineSyncRequest,
};
use crate::protocol::ProtocolHandler;
use crate::services::notifications::NotificationDispatcher;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Processor-level status, orthogonal to (but correlated with) the
/// connectivity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessorStatus {
    Idle,
    Processing,
    Error,
    Offline,
}

/// Shared processor state. Written by the heartbeat loop and the processing
/// path only; always accessed through the owning lock.
#[derive(Debug, Clone)]
pub struct ProcessorState {
    pub is_online: bool,
    pub status: ProcessorStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Point-in-time terminal snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalStatus {
    pub merchant_id: String,
    pub terminal_id: String,
    pub online_status: &'static str,
    pub processor_status: ProcessorStatus,
    pub offline_queue_size: usize,
    pub timestamp: DateTime<Utc>,
}

/// Transaction processor for one terminal instance.
///
/// Cheap to clone via the shared inner; background loops (heartbeat,
/// offline sync) are supervised tasks stopped by [`shutdown`].
///
/// [`shutdown`]: TransactionProcessor::shutdown
#[derive(Clone)]
pub struct TransactionProcessor {
    inner: Arc<Inner>,
}

struct Inner {
    config: TerminalConfig,
    gateway: GatewayClient,
    state: RwLock<ProcessorState>,
    offline_queue: Mutex<VecDeque<Transaction>>,
    history: RwLock<Vec<Transaction>>,
    notifications: Option<Arc<NotificationDispatcher>>,
    shutdown: watch::Sender<bool>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionProcessor {
    pub fn new(config: TerminalConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_notifications(
        config: TerminalConfig,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self::build(config, Some(dispatcher))
    }

    fn build(config: TerminalConfig, notifications: Option<Arc<NotificationDispatcher>>) -> Self {
        let gateway = GatewayClient::new(config.server_url.clone(), config.request_timeout);
        let (shutdown, _) = watch::channel(false);

        tracing::info!(
            "Transaction processor initialized for merchant {}, terminal {}",
            config.merchant_id,
            config.terminal_id,
        );

        Self {
            inner: Arc::new(Inner {
                config,
                gateway,
                state: RwLock::new(ProcessorState {
                    is_online: true,
                    status: ProcessorStatus::Idle,
                    last_heartbeat: None,
                }),
                offline_queue: Mutex::new(VecDeque::new()),
                history: RwLock::new(Vec::new()),
                notifications,
                shutdown,
                heartbeat_task: Mutex::new(None),
                sync_task: Mutex::new(None),
            }),
        }
    }

    /// Starts the heartbeat loop. Idempotent while the loop is alive.
    pub async fn start(&self) {
        let mut slot = self.inner.heartbeat_task.lock().await;
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            tracing::warn!("Heartbeat loop is already running");
            return;
        }
        let inner = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(inner.heartbeat_loop()));
        tracing::info!("Heartbeat monitoring started");
    }

    /// Processes a transaction online or offline based on current
    /// connectivity and the transaction's requirements. Always returns the
    /// transaction in a terminal state; failures surface as status plus a
    /// response code/message pair, never as an error.
    pub async fn process(&self, mut transaction: Transaction) -> Transaction {
        self.inner.state.write().await.status = ProcessorStatus::Processing;
        tracing::info!(transaction_id = %transaction.id(), "Processing transaction");

        transaction.set_message_type(ProtocolHandler::message_type_for(
            transaction.transaction_type(),
            false,
        ));

        let can_offline = transaction.protocol().offline_capable();
        let online_now = self.inner.state.read().await.is_online;
        let route_online = online_now && (transaction.is_online() || !can_offline);

        let outcome = if route_online {
            tracing::info!(transaction_id = %transaction.id(), "Routing ONLINE");
            self.inner.process_online(&mut transaction).await
        } else if can_offline {
            tracing::info!(transaction_id = %transaction.id(), "Routing OFFLINE");
            self.inner.process_offline(&mut transaction).await
        } else {
            tracing::warn!(
                transaction_id = %transaction.id(),
                "Transaction requires online processing but terminal is offline",
            );
            transaction.update_status_with(
                TransactionStatus::Error,
                "E1001",
                "Transaction requires online processing but terminal is offline",
            )
        };

        if let Err(err) = outcome {
            tracing::error!("Error processing transaction: {err}");
            if !transaction.status().is_terminal() {
                if let Err(update_err) = transaction.update_status_with(
                    TransactionStatus::Error,
                    err.response_code(),
                    &err.to_string(),
                ) {
                    tracing::error!("Could not record processing failure: {update_err}");
                }
            }
        }

        {
            let mut state = self.inner.state.write().await;
            state.status = if state.is_online {
                ProcessorStatus::Idle
            } else {
                ProcessorStatus::Offline
            };
        }

        self.inner.history.write().await.push(transaction.clone());

        if let (Some(dispatcher), Some(message_type)) =
            (&self.inner.notifications, transaction.message_type())
        {
            let extra = serde_json::json!({ "status": transaction.status().to_string() });
            if let Err(err) = dispatcher
                .create_notification(message_type, transaction.id(), Some(extra))
                .await
            {
                tracing::error!("Failed to record message-type notification: {err}");
            }
        }

        transaction
    }

    /// Voids a previously approved transaction by routing a new VOID
    /// transaction through [`process`]. Returns `None` if the original is
    /// unknown or not in an approved state.
    ///
    /// [`process`]: TransactionProcessor::process
    pub async fn void(&self, original_transaction_id: Uuid) -> Option<Transaction> {
        let original = {
            let history = self.inner.history.read().await;
            history
                .iter()
                .find(|t| t.id() == original_transaction_id)
                .cloned()
        };

        let Some(original) = original else {
            tracing::warn!("Cannot void: transaction {original_transaction_id} not found");
            return None;
        };

        if !matches!(
            original.status(),
            TransactionStatus::Approved | TransactionStatus::OfflineApproved
        ) {
            tracing::warn!(
                "Cannot void: transaction {original_transaction_id} is not in approved status"
            );
            return None;
        }

        let is_online = self.inner.state.read().await.is_online;
        let mut void_tx = match Transaction::new(NewTransaction {
            amount: original.amount().clone(),
            currency: original.currency(),
            transaction_type: TransactionType::Void,
            payment_method: original.payment_method(),
            protocol: original.protocol(),
            merchant_id: self.inner.config.merchant_id.clone(),
            terminal_id: self.inner.config.terminal_id.clone(),
            is_online,
            batch_number: self.inner.config.batch_number.clone(),
        }) {
            Ok(tx) => tx,
            Err(err) => {
                tracing::error!("Cannot void {original_transaction_id}: {err}");
                return None;
            }
        };

        if let Some(card_data) = original.card_data() {
            if let Err(err) = void_tx.set_card_data(card_data.clone()) {
                tracing::warn!("Could not carry card data onto void: {err}");
            }
        }

        Some(self.process(void_tx).await)
    }

    /// Signals all background loops to stop and waits (bounded) for them.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down transaction processor");
        self.inner.shutdown.send_replace(true);

        for slot in [&self.inner.heartbeat_task, &self.inner.sync_task] {
            let handle = slot.lock().await.take();
            if let Some(handle) = handle {
                if timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await.is_err() {
                    tracing::warn!("Background task did not stop within the shutdown bound");
                }
            }
        }
        tracing::info!("Transaction processor shutdown complete");
    }

    pub async fn state(&self) -> ProcessorState {
        self.inner.state.read().await.clone()
    }

    pub async fn is_online(&self) -> bool {
        self.inner.state.read().await.is_online
    }

    /// Connectivity override. Normally connectivity is driven by the
    /// heartbeat loop; operators (and tests) can force it.
    pub async fn set_online(&self, online: bool) {
        let mut state = self.inner.state.write().await;
        state.is_online = online;
        state.status = if online {
            ProcessorStatus::Idle
        } else {
            ProcessorStatus::Offline
        };
    }

    pub async fn offline_queue_size(&self) -> usize {
        self.inner.offline_queue.lock().await.len()
    }

    pub async fn offline_queue_snapshot(&self) -> Vec<Transaction> {
        self.inner.offline_queue.lock().await.iter().cloned().collect()
    }

    pub async fn transaction_history(&self) -> Vec<Transaction> {
        self.inner.history.read().await.clone()
    }

    pub async fn terminal_status(&self) -> TerminalStatus {
        let state = self.inner.state.read().await.clone();
        TerminalStatus {
            merchant_id: self.inner.config.merchant_id.clone(),
            terminal_id: self.inner.config.terminal_id.clone(),
            online_status: if state.is_online { "ONLINE" } else { "OFFLINE" },
            processor_status: state.status,
            offline_queue_size: self.offline_queue_size().await,
            timestamp: Utc::now(),
        }
    }
}

impl Inner {
    async fn process_online(
        self: &Arc<Self>,
        transaction: &mut Transaction,
    ) -> Result<(), TerminalError> {
        let message_type =
            ProtocolHandler::message_type_for(transaction.transaction_type(), false);
        transaction.update_status(TransactionStatus::Processing)?;

        let handler = ProtocolHandler::new(transaction.protocol());
        let request = AuthorizationRequest {
            message_type_code: message_type,
            transaction: transaction.clone(),
            terminal_id: self.config.terminal_id.clone(),
            merchant_id: self.config.merchant_id.clone(),
            timestamp: Utc::now(),
        };

        let mut retries = 0u32;
        loop {
            let err: TerminalError = match self.gateway.authorize(&request).await {
                Ok(response) => return handler.parse_response(&response, transaction),
                Err(err) => err.into(),
            };
            tracing::warn!("Authorization attempt failed: {err}");

            if err.is_retryable() && retries < self.config.max_retries {
                retries += 1;
                tracing::info!(
                    "Retrying transaction {} (attempt {retries}/{})",
                    transaction.id(),
                    self.config.max_retries,
                );
                sleep(self.config.retry_delay).await;
                continue;
            }

            // Only connectivity failures may fall back to a local approval;
            // a reachable server keeps the final say.
            if err.is_transport() {
                if transaction.protocol().offline_capable() {
                    tracing::info!(
                        "Falling back to offline processing for transaction {}",
                        transaction.id(),
                    );
                    return self.process_offline(transaction).await;
                }
                transaction.update_status_with(
                    TransactionStatus::Error,
                    err.response_code(),
                    &err.to_string(),
                )?;
                self.mark_offline().await;
                return Ok(());
            }

            return transaction.update_status_with(
                TransactionStatus::Error,
                err.response_code(),
                &err.to_string(),
            );
        }
    }

    async fn process_offline(
        self: &Arc<Self>,
        transaction: &mut Transaction,
    ) -> Result<(), TerminalError> {
        // Ceiling is inclusive: exactly the limit is still approvable.
        if transaction.amount() > &self.config.offline_limit {
            let err = TerminalError::OfflineLimitExceeded {
                amount: transaction.amount().clone(),
                limit: self.config.offline_limit.clone(),
            };
            transaction.update_status_with(
                TransactionStatus::Declined,
                err.response_code(),
                &err.to_string(),
            )?;
            return Ok(());
        }

        let handler = ProtocolHandler::new(transaction.protocol());
        let code = handler.generate_approval_code(true)?;
        transaction.set_approval_code(&code)?;
        transaction.update_status(TransactionStatus::OfflineApproved)?;

        self.offline_queue.lock().await.push_back(transaction.clone());
        tracing::info!(
            "Transaction {} approved offline with code {code}",
            transaction.id(),
        );

        self.ensure_sync_task().await;
        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.send_heartbeat().await {
                Ok(()) => self.config.heartbeat_interval,
                Err(err) => {
                    tracing::warn!("Heartbeat failed: {err}");
                    self.mark_offline().await;
                    self.config.heartbeat_retry_interval
                }
            };
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Heartbeat loop stopped");
    }

    async fn send_heartbeat(self: &Arc<Self>) -> Result<(), GatewayError> {
        let request =
            HeartbeatRequest::new(&self.config.terminal_id, &self.config.merchant_id);
        self.gateway.heartbeat(&request).await?;

        let was_offline = {
            let mut state = self.state.write().await;
            let was_offline = state.status == ProcessorStatus::Offline;
            state.is_online = true;
            state.last_heartbeat = Some(Utc::now());
            if was_offline {
                state.status = ProcessorStatus::Idle;
            }
            was_offline
        };

        if was_offline {
            tracing::info!("Terminal is back online");
            self.ensure_sync_task().await;
        }
        Ok(())
    }

    async fn mark_offline(&self) {
        let mut state = self.state.write().await;
        if state.is_online {
            state.is_online = false;
            state.status = ProcessorStatus::Offline;
            tracing::warn!("Terminal is now in OFFLINE mode");
        }
    }

    async fn ensure_sync_task(self: &Arc<Self>) {
        let mut slot = self.sync_task.lock().await;
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let inner = Arc::clone(self);
        *slot = Some(tokio::spawn(inner.sync_loop()));
        tracing::info!("Offline synchronization loop started");
    }

    async fn sync_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.drain_offline_queue().await;
            tokio::select! {
                _ = sleep(self.config.sync_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Offline sync loop stopped");
    }

    /// One pass over the queue, bounded by the number of entries admitted
    /// before the pass so a failing entry re-enqueued at the tail waits for
    /// the next tick instead of spinning.
    async fn drain_offline_queue(self: &Arc<Self>) {
        let batch = self.offline_queue.lock().await.len();
        for _ in 0..batch {
            if !self.state.read().await.is_online {
                break;
            }
            let Some(transaction) = self.offline_queue.lock().await.pop_front() else {
                break;
            };
            let id = transaction.id();
            tracing::info!("Attempting to sync offline transaction {id}");
            match self.sync_offline_transaction(transaction).await {
                Ok(synced) => {
                    tracing::info!("Successfully synced offline transaction {id}");
                    self.record_synced(&synced).await;
                }
                Err((transaction, err)) => {
                    tracing::warn!("Failed to sync offline transaction {id}, requeuing: {err}");
                    self.offline_queue.lock().await.push_back(transaction);
                }
            }
        }
    }

    /// Folds a synced transaction back into the history log, so a
    /// server-assigned approval code is visible to later lookups.
    async fn record_synced(&self, synced: &Transaction) {
        let mut history = self.history.write().await;
        if let Some(entry) = history.iter_mut().find(|t| t.id() == synced.id()) {
            *entry = synced.clone();
        }
    }

    async fn sync_offline_transaction(
        &self,
        mut transaction: Transaction,
    ) -> Result<Transaction, (Transaction, TerminalError)> {
        let request = OfflineSyncRequest {
            transaction: transaction.clone(),
            terminal_id: self.config.terminal_id.clone(),
            merchant_id: self.config.merchant_id.clone(),
            sync_timestamp: Utc::now(),
        };

        match self.gateway.sync_offline(&request).await {
            Ok(response) if response.is_success() => {
                if let Some(code) = response.server_approval_code.as_deref() {
                    if let Err(err) = transaction.override_approval_code(code) {
                        tracing::warn!("Ignoring server approval code override: {err}");
                    }
                }
                Ok(transaction)
            }
            Ok(response) => {
                let reason = response
                    .message
                    .unwrap_or_else(|| "Server rejected offline transaction".to_string());
                Err((transaction, TerminalError::Internal(reason)))
            }
            Err(err) => Err((transaction, err.into())),
        }
    }
}
