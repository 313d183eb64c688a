use std::sync::Arc;

use bigdecimal::BigDecimal;
use clap::Parser;
use tracing_subscriber::prelude::*;

use basalt_terminal::config::TerminalConfig;
use basalt_terminal::domain::{Currency, NewTransaction, PaymentMethod, Transaction, TransactionType};
use basalt_terminal::protocol::Protocol;
use basalt_terminal::services::{NotificationDispatcher, TransactionProcessor};
use basalt_terminal::store::MemoryStore;

/// Runs one transaction through the terminal core and prints the outcome.
#[derive(Parser)]
#[command(name = "basalt-terminal")]
#[command(about = "POS terminal transaction core", long_about = None)]
struct Cli {
    /// Merchant identifier (falls back to TERMINAL_MERCHANT_ID)
    #[arg(long)]
    merchant_id: Option<String>,

    /// Terminal identifier (falls back to TERMINAL_ID)
    #[arg(long)]
    terminal_id: Option<String>,

    /// Gateway base URL (falls back to TERMINAL_SERVER_URL)
    #[arg(long)]
    server_url: Option<String>,

    /// Transaction amount
    #[arg(long, default_value = "25.00")]
    amount: BigDecimal,

    /// Transaction currency (USD, EUR, GBP, BTC, ETH)
    #[arg(long, default_value = "USD")]
    currency: Currency,

    /// Protocol registry name, e.g. "POS Terminal -101.4 (6-digit approval)"
    #[arg(long, default_value = "POS Terminal -101.1 (4-digit approval)")]
    protocol: Protocol,

    /// Route the transaction offline when the protocol allows it
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match TerminalConfig::from_env() {
        Ok(config) => config,
        Err(_) => TerminalConfig::new("MERCH001", "TERM001", "http://localhost:5000"),
    };
    if let Some(merchant_id) = cli.merchant_id {
        config.merchant_id = merchant_id;
    }
    if let Some(terminal_id) = cli.terminal_id {
        config.terminal_id = terminal_id;
    }
    if let Some(server_url) = cli.server_url {
        config.server_url = server_url;
    }

    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store,
        config.notification_poll_interval,
        config.notification_error_backoff,
    ));
    dispatcher.start().await;

    let processor =
        TransactionProcessor::with_notifications(config.clone(), Arc::clone(&dispatcher));
    processor.start().await;

    let transaction = Transaction::new(NewTransaction {
        amount: cli.amount,
        currency: cli.currency,
        transaction_type: TransactionType::Sale,
        payment_method: PaymentMethod::CardDip,
        protocol: cli.protocol,
        merchant_id: config.merchant_id.clone(),
        terminal_id: config.terminal_id.clone(),
        is_online: !cli.offline,
        batch_number: config.batch_number.clone(),
    })?;

    let result = processor.process(transaction).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    let status = processor.terminal_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    processor.shutdown().await;
    dispatcher.shutdown().await;
    Ok(())
}
