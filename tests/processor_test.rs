//! End-to-end processing scenarios against a mock authorization server.

use std::time::Duration;

use bigdecimal::BigDecimal;

use basalt_terminal::config::TerminalConfig;
use basalt_terminal::domain::{
    Currency, NewTransaction, PaymentMethod, Transaction, TransactionStatus, TransactionType,
};
use basalt_terminal::protocol::{MessageType, Protocol};
use basalt_terminal::services::TransactionProcessor;

fn test_config(url: &str) -> TerminalConfig {
    let mut config = TerminalConfig::new("MERCH001", "TERM001", url);
    config.request_timeout = Duration::from_secs(2);
    config.max_retries = 1;
    config.retry_delay = Duration::from_millis(10);
    config.heartbeat_interval = Duration::from_millis(20);
    config.heartbeat_retry_interval = Duration::from_millis(20);
    config.sync_interval = Duration::from_millis(20);
    config
}

fn sale(protocol: Protocol, amount: &str, is_online: bool) -> Transaction {
    Transaction::new(NewTransaction {
        amount: amount.parse().unwrap(),
        currency: Currency::Usd,
        transaction_type: TransactionType::Sale,
        payment_method: PaymentMethod::CardDip,
        protocol,
        merchant_id: "MERCH001".to_string(),
        terminal_id: "TERM001".to_string(),
        is_online,
        batch_number: "001".to_string(),
    })
    .unwrap()
}

fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn online_sale_is_approved() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/process")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"approved": true, "approval_code": "1234"}"#)
        .create_async()
        .await;

    let processor = TransactionProcessor::new(test_config(&server.url()));
    let result = processor.process(sale(Protocol::Pos101x1, "50.00", true)).await;

    assert_eq!(result.status(), TransactionStatus::Approved);
    assert_eq!(result.approval_code(), Some("1234"));
    assert!(result.response_code().is_none());
    assert_eq!(result.message_type(), Some(MessageType::FinancialRequest));
    assert_eq!(processor.offline_queue_size().await, 0);

    let history = processor.transaction_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id(), result.id());
}

#[tokio::test]
async fn online_decline_carries_server_reason() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/process")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"approved": false, "response_code": "D0051", "response_message": "Insufficient funds"}"#,
        )
        .create_async()
        .await;

    let processor = TransactionProcessor::new(test_config(&server.url()));
    let result = processor.process(sale(Protocol::Pos101x1, "50.00", true)).await;

    assert_eq!(result.status(), TransactionStatus::Declined);
    assert_eq!(result.response_code(), Some("D0051"));
    assert_eq!(result.response_message(), Some("Insufficient funds"));
}

#[tokio::test]
async fn server_errors_are_retried_then_surfaced() {
    let mut server = mockito::Server::new_async().await;
    // max_retries = 1, so the initial attempt plus one retry.
    let mock = server
        .mock("POST", "/process")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let processor = TransactionProcessor::new(test_config(&server.url()));
    let result = processor.process(sale(Protocol::Pos101x1, "50.00", true)).await;

    mock.assert_async().await;
    assert_eq!(result.status(), TransactionStatus::Error);
    assert_eq!(result.response_code(), Some("E2002"));
    // Server errors never mint offline approvals.
    assert_eq!(processor.offline_queue_size().await, 0);
    assert!(processor.is_online().await);
}

#[tokio::test]
async fn malformed_response_body_is_internal_error_without_retry() {
    let mut server = mockito::Server::new_async().await;
    // A body that fails to decode is not a retryable failure: one attempt.
    let mock = server
        .mock("POST", "/process")
        .with_status(200)
        .with_body("not json")
        .expect(1)
        .create_async()
        .await;

    let processor = TransactionProcessor::new(test_config(&server.url()));
    let result = processor.process(sale(Protocol::Pos101x1, "50.00", true)).await;

    mock.assert_async().await;
    assert_eq!(result.status(), TransactionStatus::Error);
    assert_eq!(result.response_code(), Some("E9999"));
    assert!(processor.is_online().await);
}

#[tokio::test]
async fn transport_failure_falls_back_to_offline_for_capable_protocol() {
    let processor = TransactionProcessor::new(test_config(&closed_port_url()));
    let result = processor.process(sale(Protocol::Pos101x8, "50.00", true)).await;

    assert_eq!(result.status(), TransactionStatus::OfflineApproved);
    let code = result.approval_code().unwrap();
    assert!(code.starts_with("OF"));
    assert_eq!(code.len(), Protocol::Pos101x8.approval_code_length());

    // The sync loop is live against an unreachable server, so the entry may
    // transiently be out of the queue mid-attempt; it always comes back.
    let mut queued = false;
    for _ in 0..100 {
        if processor
            .offline_queue_snapshot()
            .await
            .iter()
            .any(|t| t.id() == result.id())
        {
            queued = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(queued);
    processor.shutdown().await;
}

#[tokio::test]
async fn transport_failure_on_online_only_protocol_is_an_error() {
    let processor = TransactionProcessor::new(test_config(&closed_port_url()));
    let result = processor.process(sale(Protocol::Pos101x1, "50.00", true)).await;

    assert_eq!(result.status(), TransactionStatus::Error);
    assert_eq!(result.response_code(), Some("E2003"));
    assert_eq!(processor.offline_queue_size().await, 0);
    // Exhausted connection attempts flip the terminal offline.
    assert!(!processor.is_online().await);
}

#[tokio::test]
async fn offline_request_is_approved_locally() {
    let processor = TransactionProcessor::new(test_config(&closed_port_url()));
    // Keep the terminal offline so the sync loop leaves the queue alone.
    processor.set_online(false).await;
    let result = processor.process(sale(Protocol::Pos201x3, "50.00", false)).await;

    assert_eq!(result.status(), TransactionStatus::OfflineApproved);
    assert!(result.approval_code().unwrap().starts_with("OF"));
    assert_eq!(processor.offline_queue_size().await, 1);
    processor.shutdown().await;
}

#[tokio::test]
async fn offline_ceiling_is_inclusive() {
    let processor = TransactionProcessor::new(test_config(&closed_port_url()));
    processor.set_online(false).await;

    let at_limit = processor
        .process(sale(Protocol::Pos201x3, "1000.00", false))
        .await;
    assert_eq!(at_limit.status(), TransactionStatus::OfflineApproved);

    let above = processor
        .process(sale(Protocol::Pos201x3, "1000.01", false))
        .await;
    assert_eq!(above.status(), TransactionStatus::Declined);
    assert_eq!(above.response_code(), Some("D2001"));
    assert!(above.approval_code().is_none());

    // Only the approved transaction was queued.
    assert_eq!(processor.offline_queue_size().await, 1);
    processor.shutdown().await;
}

#[tokio::test]
async fn offline_terminal_rejects_online_only_protocol() {
    let processor = TransactionProcessor::new(test_config(&closed_port_url()));
    processor.set_online(false).await;

    let result = processor.process(sale(Protocol::Pos101x1, "50.00", true)).await;
    assert_eq!(result.status(), TransactionStatus::Error);
    assert_eq!(result.response_code(), Some("E1001"));
    assert_eq!(processor.offline_queue_size().await, 0);
}

#[tokio::test]
async fn offline_terminal_routes_capable_protocol_locally() {
    let processor = TransactionProcessor::new(test_config(&closed_port_url()));
    processor.set_online(false).await;

    // The transaction asked for online processing, but the terminal is
    // offline and the protocol allows local approval.
    let result = processor.process(sale(Protocol::Pos101x8, "50.00", true)).await;
    assert_eq!(result.status(), TransactionStatus::OfflineApproved);
    assert_eq!(processor.offline_queue_size().await, 1);
    processor.shutdown().await;
}

#[tokio::test]
async fn void_of_approved_transaction_goes_through() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/process")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"approved": true, "approval_code": "1234"}"#)
        .expect(2)
        .create_async()
        .await;

    let processor = TransactionProcessor::new(test_config(&server.url()));
    let original = processor.process(sale(Protocol::Pos101x1, "50.00", true)).await;
    assert_eq!(original.status(), TransactionStatus::Approved);

    let void = processor.void(original.id()).await.unwrap();
    assert_eq!(void.transaction_type(), TransactionType::Void);
    assert_eq!(void.status(), TransactionStatus::Approved);
    assert_eq!(void.amount(), original.amount());
    assert_ne!(void.id(), original.id());
    assert_eq!(processor.transaction_history().await.len(), 2);
}

#[tokio::test]
async fn void_of_declined_transaction_is_refused() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/process")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"approved": false}"#)
        .create_async()
        .await;

    let processor = TransactionProcessor::new(test_config(&server.url()));
    let declined = processor.process(sale(Protocol::Pos101x1, "50.00", true)).await;
    assert_eq!(declined.status(), TransactionStatus::Declined);

    assert!(processor.void(declined.id()).await.is_none());
    assert_eq!(processor.transaction_history().await.len(), 1);
}

#[tokio::test]
async fn rejects_non_positive_amounts() {
    let result = Transaction::new(NewTransaction {
        amount: BigDecimal::from(0),
        currency: Currency::Usd,
        transaction_type: TransactionType::Sale,
        payment_method: PaymentMethod::CardDip,
        protocol: Protocol::Pos101x1,
        merchant_id: "MERCH001".to_string(),
        terminal_id: "TERM001".to_string(),
        is_online: true,
        batch_number: "001".to_string(),
    });
    assert!(result.is_err());
}
