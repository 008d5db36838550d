//! Inbound aggregator webhooks and their acknowledgment

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::result::{Error, Result};

/// Raw webhook body as posted by the aggregator
///
/// Header fields are read leniently: a null, missing or numeric value never
/// makes a well-formed JSON body unparseable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub webhook_id: String,
    pub webhook_type: String,
    pub webhook_code: String,
    pub link_id: String,
    pub request_id: Option<String>,
    pub external_id: Option<String>,
    pub data: JsonValue,
}

static REQUEST_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""request_id"\s*:\s*"([^"]*)""#).unwrap());

impl WebhookEnvelope {
    /// Parse a webhook body
    ///
    /// Only text that is not JSON fails, with `MalformedWebhook` carrying
    /// whatever request id could be scraped from it. Any JSON value yields
    /// an envelope; fields of the wrong shape come out empty.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut value: JsonValue =
            serde_json::from_slice(body).map_err(|e| Error::MalformedWebhook {
                message: e.to_string(),
                request_id: scrape_request_id(body),
            })?;

        let field = |key: &str| lenient_string(value.get(key));
        let envelope = Self {
            webhook_id: field("webhook_id").unwrap_or_default(),
            webhook_type: field("webhook_type").unwrap_or_default(),
            webhook_code: field("webhook_code").unwrap_or_default(),
            link_id: field("link_id").unwrap_or_default(),
            request_id: field("request_id"),
            external_id: field("external_id"),
            data: JsonValue::Null,
        };
        Ok(Self {
            data: value
                .get_mut("data")
                .map(JsonValue::take)
                .unwrap_or(JsonValue::Null),
            ..envelope
        })
    }

    /// Decode the code-specific payload
    pub fn event(&self) -> WebhookEvent {
        WebhookEvent::from_parts(&self.webhook_code, &self.data)
    }

    pub fn in_family(&self, families: &[String]) -> bool {
        families
            .iter()
            .any(|f| f.eq_ignore_ascii_case(self.webhook_type.trim()))
    }
}

/// Strings are trimmed; numbers and booleans keep their JSON text
fn lenient_string(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scrape_request_id(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    REQUEST_ID_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}

/// Closed set of webhook events the engine reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Initial backfill finished on the aggregator side
    HistoricalUpdate {
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    },
    NewTransactionsAvailable {
        new_transactions: Option<u64>,
        transaction_ids: Vec<String>,
    },
    TransactionsUpdated {
        transaction_ids: Vec<String>,
    },
    TransactionsDeleted {
        transaction_ids: Vec<String>,
    },
    ConsentExpired {
        institution: Option<String>,
        consent_id: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Code outside the handled set
    Unsupported(String),
}

impl WebhookEvent {
    pub fn from_parts(code: &str, data: &JsonValue) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "historical_update" => WebhookEvent::HistoricalUpdate {
                date_from: date_field(data, &["date_from", "first_transaction_date"]),
                date_to: date_field(data, &["date_to", "last_transaction_date"]),
            },
            "new_transactions_available" => WebhookEvent::NewTransactionsAvailable {
                new_transactions: data.get("new_transactions").and_then(JsonValue::as_u64),
                transaction_ids: id_list(data, &["transaction_ids", "new_transaction_ids"]),
            },
            "transactions_updated" => WebhookEvent::TransactionsUpdated {
                transaction_ids: id_list(data, &["transaction_ids", "updated_transactions"]),
            },
            "transactions_deleted" => WebhookEvent::TransactionsDeleted {
                transaction_ids: id_list(data, &["transaction_ids", "deleted_transactions"]),
            },
            "consent_expired" => WebhookEvent::ConsentExpired {
                institution: string_field(data, &["institution", "institution_name"]),
                consent_id: string_field(data, &["consent_id", "consent"]),
                expires_at: timestamp_field(data, &["expiration_date", "expires_at"]),
            },
            _ => WebhookEvent::Unsupported(code.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            WebhookEvent::HistoricalUpdate { .. } => "historical_update",
            WebhookEvent::NewTransactionsAvailable { .. } => "new_transactions_available",
            WebhookEvent::TransactionsUpdated { .. } => "transactions_updated",
            WebhookEvent::TransactionsDeleted { .. } => "transactions_deleted",
            WebhookEvent::ConsentExpired { .. } => "consent_expired",
            WebhookEvent::Unsupported(code) => code,
        }
    }
}

fn first<'a>(data: &'a JsonValue, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|k| data.get(*k))
        .find(|v| !v.is_null())
}

fn string_field(data: &JsonValue, keys: &[&str]) -> Option<String> {
    first(data, keys).and_then(|v| match v {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Ids come as an array of strings; anything else in the array is dropped
fn id_list(data: &JsonValue, keys: &[&str]) -> Vec<String> {
    match first(data, keys) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn date_field(data: &JsonValue, keys: &[&str]) -> Option<NaiveDate> {
    let raw = string_field(data, keys)?;
    let day = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn timestamp_field(data: &JsonValue, keys: &[&str]) -> Option<DateTime<Utc>> {
    let raw = string_field(data, keys)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// Acknowledgment status reported back to the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Processed,
    /// Handed to a background task
    Accepted,
    Ignored,
    NotFound,
    /// Handler failed; the failure is reflected in integration state
    Error,
    Invalid,
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckBody {
    pub status: AckStatus,
    pub webhook_id: Option<String>,
    pub webhook_type: Option<String>,
    pub webhook_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// HTTP-style acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub status_code: u16,
    pub body: AckBody,
}

impl WebhookAck {
    /// 202 for a routed webhook, whatever happened downstream
    pub fn acknowledged(
        envelope: &WebhookEnvelope,
        status: AckStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            status_code: 202,
            body: AckBody {
                status,
                webhook_id: non_empty(&envelope.webhook_id),
                webhook_type: non_empty(&envelope.webhook_type),
                webhook_code: non_empty(&envelope.webhook_code),
                request_id: envelope.request_id.clone(),
                reason,
            },
        }
    }

    /// 400 for an unparseable body
    pub fn malformed(request_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            status_code: 400,
            body: AckBody {
                status: AckStatus::Invalid,
                webhook_id: None,
                webhook_type: None,
                webhook_code: None,
                request_id,
                reason: Some(reason.into()),
            },
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status_code: 401,
            body: AckBody {
                status: AckStatus::Unauthorized,
                webhook_id: None,
                webhook_type: None,
                webhook_code: None,
                request_id: None,
                reason: None,
            },
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_envelope() {
        let body = json!({
            "webhook_id": "w1",
            "webhook_type": "TRANSACTIONS",
            "webhook_code": "new_transactions_available",
            "link_id": "L1",
            "request_id": "r1",
            "external_id": null,
            "data": {"new_transactions": 2, "transaction_ids": ["t1", "t2"]}
        });
        let envelope = WebhookEnvelope::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.link_id, "L1");
        assert_eq!(
            envelope.event(),
            WebhookEvent::NewTransactionsAvailable {
                new_transactions: Some(2),
                transaction_ids: vec!["t1".into(), "t2".into()],
            }
        );
    }

    #[test]
    fn test_malformed_body_keeps_request_id() {
        let err = WebhookEnvelope::parse(br#"{"request_id": "abc-1", "webhook_id": "#).unwrap_err();
        match err {
            Error::MalformedWebhook { request_id, .. } => {
                assert_eq!(request_id.as_deref(), Some("abc-1"))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = WebhookEnvelope::parse(b"not json at all").unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedWebhook {
                request_id: None,
                ..
            }
        ));
    }

    #[test]
    fn test_odd_header_values_still_parse() {
        let envelope = WebhookEnvelope::parse(
            br#"{"webhook_id": null, "webhook_type": "TRANSACTIONS", "webhook_code": "transactions_updated", "link_id": 42, "request_id": 7}"#,
        )
        .unwrap();
        assert_eq!(envelope.webhook_id, "");
        assert_eq!(envelope.link_id, "42");
        assert_eq!(envelope.request_id.as_deref(), Some("7"));
        assert_eq!(envelope.data, JsonValue::Null);

        let envelope = WebhookEnvelope::parse(b"[1, 2, 3]").unwrap();
        assert_eq!(envelope.webhook_type, "");
        assert!(envelope.request_id.is_none());
    }

    #[test]
    fn test_event_decoding() {
        let event = WebhookEvent::from_parts(
            "HISTORICAL_UPDATE",
            &json!({"date_from": "2024-01-01", "date_to": "2024-03-31T00:00:00Z"}),
        );
        assert_eq!(
            event,
            WebhookEvent::HistoricalUpdate {
                date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
                date_to: NaiveDate::from_ymd_opt(2024, 3, 31),
            }
        );

        let event = WebhookEvent::from_parts(
            "consent_expired",
            &json!({"institution": "erebor_br", "consent_id": "c-9", "expiration_date": "2024-05-01"}),
        );
        match event {
            WebhookEvent::ConsentExpired {
                institution,
                consent_id,
                expires_at,
            } => {
                assert_eq!(institution.as_deref(), Some("erebor_br"));
                assert_eq!(consent_id.as_deref(), Some("c-9"));
                assert!(expires_at.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(
            WebhookEvent::from_parts("accounts_updated", &JsonValue::Null),
            WebhookEvent::Unsupported("accounts_updated".into())
        );
    }

    #[test]
    fn test_missing_ids_are_empty() {
        let event = WebhookEvent::from_parts("transactions_updated", &json!({"transaction_ids": "t1"}));
        assert_eq!(
            event,
            WebhookEvent::TransactionsUpdated {
                transaction_ids: vec![]
            }
        );
    }

    #[test]
    fn test_family_match_is_case_insensitive() {
        let envelope = WebhookEnvelope {
            webhook_type: "transactions".into(),
            ..Default::default()
        };
        assert!(envelope.in_family(&["TRANSACTIONS".to_string()]));
        assert!(!envelope.in_family(&["ACCOUNTS".to_string()]));
    }

    #[test]
    fn test_ack_shapes() {
        let envelope = WebhookEnvelope {
            webhook_id: "w1".into(),
            webhook_type: "TRANSACTIONS".into(),
            webhook_code: "transactions_deleted".into(),
            ..Default::default()
        };
        let ack = WebhookAck::acknowledged(&envelope, AckStatus::Processed, None);
        assert_eq!(ack.status_code, 202);
        let json = serde_json::to_value(&ack.body).unwrap();
        assert_eq!(json["status"], "processed");
        assert_eq!(json["webhook_code"], "transactions_deleted");
        assert!(json.get("reason").is_none());

        assert_eq!(WebhookAck::malformed(None, "bad").status_code, 400);
    }
}
