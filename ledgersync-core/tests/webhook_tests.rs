//! Webhook dispatcher tests
//!
//! Full dispatch path: raw body in, acknowledgment out, with the ledger and
//! integration rows checked in DuckDB afterwards.
//!
//! Run with: cargo test --test webhook_tests -- --nocapture

mod common;

use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;

use common::*;
use ledgersync_core::domain::{AckStatus, IntegrationStatus};
use ledgersync_core::ports::{IntegrationStore, LedgerStore, PageCursor, SyncEventLog};

fn transactions_webhook(code: &str, link_id: &str, data: serde_json::Value) -> Vec<u8> {
    webhook("TRANSACTIONS", code, link_id, data)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_new_transactions_with_ids_creates_entries() {
    let h = harness();
    let integration = connect(&h, "L1").await;
    h.source.set_transactions(vec![
        outflow("t1", 1000, "EUR", date(2024, 4, 1)),
        outflow("t2", 2000, "EUR", date(2024, 4, 2)),
        outflow("t3", 3000, "EUR", date(2024, 4, 3)),
    ]);

    let body = transactions_webhook(
        "new_transactions_available",
        "L1",
        json!({ "new_transactions": 2, "transaction_ids": ["t1", "t2"] }),
    );
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;

    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::Processed);
    assert_eq!(ack.body.webhook_code.as_deref(), Some("new_transactions_available"));
    assert_eq!(ack.body.webhook_id.as_deref(), Some("wh-new_transactions_available"));

    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 2);
    assert!(h.ctx.repository.find_by_external_id("t3").await.unwrap().is_none());
    let t2 = h.ctx.repository.find_by_external_id("t2").await.unwrap().unwrap();
    assert_eq!(t2.amount, Decimal::new(2000, 2));
    assert_eq!(t2.currency, "EUR");

    let stored = h.ctx.repository.get(integration.id).await.unwrap().unwrap();
    assert_eq!(stored.transactions_count, integration.transactions_count + 2);
    assert!(stored.last_sync_at.is_some());
    assert_eq!(stored.status, IntegrationStatus::Connected);

    assert!(matches!(h.source.last_call(), Some(PageCursor::Ids(ids)) if ids == vec!["t1", "t2"]));
}

#[tokio::test]
async fn test_identical_redelivery_updates_in_place() {
    let h = harness();
    let integration = connect(&h, "L1").await;
    h.source.set_transactions(vec![
        outflow("t1", 1000, "EUR", date(2024, 4, 1)),
        outflow("t2", 2000, "EUR", date(2024, 4, 2)),
    ]);
    let body = transactions_webhook(
        "new_transactions_available",
        "L1",
        json!({ "transaction_ids": ["t1", "t2"] }),
    );

    h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(ack.status_code, 202);

    let events = h.ctx.repository.recent(Some(integration.id), 10).await.unwrap();
    assert_eq!(events.len(), 2);
    // newest first
    assert_eq!(events[0].counts.created, 0);
    assert_eq!(events[0].counts.updated, 2);

    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 2);
    let stored = h.ctx.repository.get(integration.id).await.unwrap().unwrap();
    assert_eq!(stored.transactions_count, 2);
}

#[tokio::test]
async fn test_reordered_update_and_create_do_not_duplicate() {
    let h = harness();
    connect(&h, "L1").await;
    h.source.set_transactions(vec![
        outflow("t1", 1000, "EUR", date(2024, 4, 1)),
        outflow("t2", 2500, "EUR", date(2024, 4, 2)),
    ]);

    // the update arrives before the creation notice
    let updated = transactions_webhook(
        "transactions_updated",
        "L1",
        json!({ "transaction_ids": ["t2"] }),
    );
    let created = transactions_webhook(
        "new_transactions_available",
        "L1",
        json!({ "transaction_ids": ["t1", "t2"] }),
    );
    h.ctx.webhook_dispatcher.dispatch(&updated, None).await;
    h.ctx.webhook_dispatcher.dispatch(&created, None).await;
    h.ctx.webhook_dispatcher.dispatch(&updated, None).await;

    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 2);
    let t2 = h.ctx.repository.find_by_external_id("t2").await.unwrap().unwrap();
    assert_eq!(t2.amount, Decimal::new(2500, 2));
}

#[tokio::test]
async fn test_transactions_updated_changes_amount() {
    let h = harness();
    connect(&h, "L1").await;
    h.source
        .set_transactions(vec![outflow("t1", 1000, "EUR", date(2024, 4, 1))]);
    let body = transactions_webhook(
        "transactions_updated",
        "L1",
        json!({ "transaction_ids": ["t1"] }),
    );
    h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    let before = h.ctx.repository.find_by_external_id("t1").await.unwrap().unwrap();

    h.source
        .set_transactions(vec![outflow("t1", 1500, "EUR", date(2024, 4, 1))]);
    h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    let after = h.ctx.repository.find_by_external_id("t1").await.unwrap().unwrap();

    assert_eq!(before.id, after.id);
    assert_eq!(after.amount, Decimal::new(1500, 2));
    assert_eq!(after.amounts["EUR"], Decimal::new(1500, 2));
}

#[tokio::test]
async fn test_historical_update_fetches_reported_range() {
    let h = harness();
    let integration = connect(&h, "L1").await;
    h.source.set_transactions(vec![
        outflow("old", 1000, "EUR", date(2023, 12, 31)),
        outflow("t1", 1000, "EUR", date(2024, 1, 10)),
        outflow("t2", 1000, "EUR", date(2024, 1, 20)),
        outflow("t3", 1000, "EUR", date(2024, 1, 30)),
    ]);

    let body = transactions_webhook(
        "historical_update",
        "L1",
        json!({ "date_from": "2024-01-01", "date_to": "2024-01-31" }),
    );
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(ack.body.status, AckStatus::Processed);

    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 3);
    assert!(h.ctx.repository.find_by_external_id("old").await.unwrap().is_none());
    let stored = h.ctx.repository.get(integration.id).await.unwrap().unwrap();
    assert!(stored.last_successful_sync_at.is_some());
    // two pages of two
    assert_eq!(h.source.call_count(), 2);
}

#[tokio::test]
async fn test_new_transactions_without_ids_refetches_everything() {
    let h = harness();
    connect(&h, "L1").await;
    h.source.set_transactions(vec![
        outflow("t1", 1000, "EUR", date(2024, 4, 1)),
        outflow("t2", 1000, "EUR", date(2024, 4, 2)),
    ]);
    let body = transactions_webhook(
        "new_transactions_available",
        "L1",
        json!({ "new_transactions": 2 }),
    );
    h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 2);
    assert!(matches!(
        h.source.last_call(),
        Some(PageCursor::Start {
            date_from: None,
            date_to: None
        })
    ));
}

#[tokio::test]
async fn test_zero_new_transactions_is_no_work() {
    let h = harness();
    connect(&h, "L1").await;
    let body = transactions_webhook(
        "new_transactions_available",
        "L1",
        json!({ "new_transactions": 0 }),
    );
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::Processed);
    assert_eq!(h.source.call_count(), 0);
}

// ============================================================================
// Acknowledgment edge cases
// ============================================================================

#[tokio::test]
async fn test_unknown_link_is_acknowledged_without_writes() {
    let h = harness();
    connect(&h, "L1").await;
    h.source
        .set_transactions(vec![outflow("t1", 1000, "EUR", date(2024, 4, 1))]);

    let body = transactions_webhook(
        "new_transactions_available",
        "nobody",
        json!({ "transaction_ids": ["t1"] }),
    );
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;

    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::NotFound);
    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 0);
    assert_eq!(h.source.call_count(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let h = harness();
    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(br#"{"request_id": "req-77", "webhook_code": "#, None)
        .await;
    assert_eq!(ack.status_code, 400);
    assert_eq!(ack.body.status, AckStatus::Invalid);
    assert_eq!(ack.body.request_id.as_deref(), Some("req-77"));
}

#[tokio::test]
async fn test_parseable_body_with_odd_ids_is_acknowledged() {
    let h = harness();
    connect(&h, "L1").await;
    h.source
        .set_transactions(vec![outflow("t1", 1000, "EUR", date(2024, 4, 1))]);

    let body = json!({
        "webhook_id": null,
        "webhook_type": "TRANSACTIONS",
        "webhook_code": "transactions_updated",
        "link_id": "L1",
        "data": { "transaction_ids": ["t1"] }
    });
    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(body.to_string().as_bytes(), None)
        .await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::Processed);
    assert_eq!(ack.body.webhook_id, None);
    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 1);

    let body = json!({
        "webhook_id": 123,
        "webhook_type": "TRANSACTIONS",
        "webhook_code": "transactions_updated",
        "link_id": "L1",
        "data": { "transaction_ids": ["t1"] }
    });
    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(body.to_string().as_bytes(), None)
        .await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.webhook_id.as_deref(), Some("123"));
    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 1);

    // valid JSON with no usable link still gets a 202
    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(br#"{"webhook_type": "TRANSACTIONS", "link_id": null}"#, None)
        .await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::NotFound);
}

#[tokio::test]
async fn test_other_families_and_codes_are_ignored() {
    let h = harness();
    connect(&h, "L1").await;

    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(&webhook("ACCOUNTS", "historical_update", "L1", json!({})), None)
        .await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::Ignored);

    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(&transactions_webhook("something_new", "L1", json!({})), None)
        .await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::Ignored);
    assert_eq!(h.source.call_count(), 0);
}

#[tokio::test]
async fn test_handler_failure_still_acknowledged() {
    let h = harness();
    let integration = connect(&h, "L1").await;
    h.source.fail_with(Some(503));

    let body = transactions_webhook("historical_update", "L1", json!({}));
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(ack.status_code, 202);

    let stored = h.ctx.repository.get(integration.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntegrationStatus::Error);
    assert!(stored.error_message.is_some());

    // a sync on an ERROR integration is rejected, and still acknowledged
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::Error);
}

// ============================================================================
// Deletion and consent
// ============================================================================

#[tokio::test]
async fn test_deleted_transactions_are_only_audited() {
    let h = harness();
    let integration = connect(&h, "L1").await;
    h.source
        .set_transactions(vec![outflow("t1", 1000, "EUR", date(2024, 4, 1))]);
    h.ctx
        .webhook_dispatcher
        .dispatch(
            &transactions_webhook(
                "new_transactions_available",
                "L1",
                json!({ "transaction_ids": ["t1"] }),
            ),
            None,
        )
        .await;

    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(
            &transactions_webhook(
                "transactions_deleted",
                "L1",
                json!({ "transaction_ids": ["t1", "t9"] }),
            ),
            None,
        )
        .await;
    assert_eq!(ack.body.status, AckStatus::Processed);
    assert!(ack.body.reason.as_deref().unwrap().contains("1 known"));

    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 1);
    let events = h.ctx.repository.recent(Some(integration.id), 10).await.unwrap();
    assert_eq!(events[0].scope, "audit");
    assert_eq!(events[0].trigger, "transactions_deleted");
}

#[tokio::test]
async fn test_consent_expired_marks_integration() {
    let h = harness();
    let integration = connect(&h, "L1").await;

    let body = webhook(
        "CONSENT",
        "consent_expired",
        "L1",
        json!({
            "institution": "erebor_mx_retail",
            "consent_id": "c-42",
            "expiration_date": "2024-05-01T00:00:00Z"
        }),
    );
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::Processed);

    let stored = h.ctx.repository.get(integration.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntegrationStatus::Expired);
    let message = stored.error_message.unwrap();
    assert!(message.contains("erebor_mx_retail"));
    assert!(message.contains("c-42"));
    assert_eq!(
        stored.consent_expiry_date.unwrap().to_rfc3339(),
        "2024-05-01T00:00:00+00:00"
    );
    assert_eq!(h.source.call_count(), 0);
}

// ============================================================================
// Verification and background mode
// ============================================================================

#[tokio::test]
async fn test_shared_token_verification() {
    let mut config = test_config();
    config.webhooks.shared_token = Some("hook-secret".to_string());
    let h = harness_with(config, false);
    connect(&h, "L1").await;
    let body = transactions_webhook("new_transactions_available", "L1", json!({ "new_transactions": 0 }));

    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(ack.status_code, 401);

    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(&body, Some("Bearer wrong"))
        .await;
    assert_eq!(ack.status_code, 401);

    let ack = h
        .ctx
        .webhook_dispatcher
        .dispatch(&body, Some("Bearer hook-secret"))
        .await;
    assert_eq!(ack.status_code, 202);
}

#[tokio::test]
async fn test_background_processing_acknowledges_first() {
    let mut config = test_config();
    config.webhooks.process_in_background = true;
    let h = harness_with(config, false);
    let integration = connect(&h, "L1").await;
    h.source
        .set_transactions(vec![outflow("t1", 1000, "EUR", date(2024, 4, 1))]);

    let body = transactions_webhook(
        "new_transactions_available",
        "L1",
        json!({ "transaction_ids": ["t1"] }),
    );
    let ack = h.ctx.webhook_dispatcher.dispatch(&body, None).await;
    assert_eq!(ack.status_code, 202);
    assert_eq!(ack.body.status, AckStatus::Accepted);

    let mut synced = false;
    for _ in 0..100 {
        let stored = h.ctx.repository.get(integration.id).await.unwrap().unwrap();
        if stored.transactions_count == 1 && stored.status == IntegrationStatus::Connected {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(synced, "background sync did not finish");
}

#[tokio::test]
async fn test_inline_dispatcher_ignores_background_setting() {
    let mut config = test_config();
    config.webhooks.process_in_background = true;
    let h = harness_with(config, false);
    connect(&h, "L1").await;
    h.source
        .set_transactions(vec![outflow("t1", 1000, "EUR", date(2024, 4, 1))]);

    let body = transactions_webhook(
        "new_transactions_available",
        "L1",
        json!({ "transaction_ids": ["t1"] }),
    );
    let ack = h.ctx.webhook_dispatcher.inline().dispatch(&body, None).await;
    assert_eq!(ack.body.status, AckStatus::Processed);
    assert_eq!(h.ctx.repository.count_entries(None).await.unwrap(), 1);
}
