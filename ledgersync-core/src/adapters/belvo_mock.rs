//! Mock Belvo API server for testing
//!
//! Simulates the paginated transactions listing of the real Belvo API:
//! - GET /api/transactions/?link=..&page=N&page_size=M returns
//!   { count: N, next: <url|null>, results: [...] }
//! - `id__in=a,b` returns one record per requested id

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{Duration, NaiveDate};
use serde_json::{json, Value as JsonValue};

/// Mock Belvo server for testing
pub struct MockBelvoServer {
    port: u16,
    running: Arc<AtomicBool>,
    requests: Arc<AtomicUsize>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

/// Configuration for mock data generation
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Number of transactions in the listing
    pub num_transactions: usize,
    /// Always hand out a `next` link
    pub endless: bool,
    /// Status code to fail with
    pub fail_status: Option<u16>,
    /// Fail only the first N requests with `fail_status` (0 fails all)
    pub fail_first: usize,
    /// Retry-After seconds sent with a 429
    pub retry_after: Option<u64>,
    /// Malformed records appended to the first page
    pub invalid_records: usize,
    /// Delay in milliseconds before responding
    pub delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            num_transactions: 25,
            endless: false,
            fail_status: None,
            fail_first: 0,
            retry_after: None,
            invalid_records: 0,
            delay_ms: 0,
        }
    }
}

impl MockBelvoServer {
    /// Start a new mock server on a random available port
    pub fn start(config: MockConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let requests = Arc::new(AtomicUsize::new(0));
        let running_clone = running.clone();
        let requests_clone = requests.clone();
        let base_url = format!("http://127.0.0.1:{}", port);

        listener.set_nonblocking(true)?;

        let thread_handle = thread::spawn(move || {
            while running_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let cfg = config.clone();
                        let base = base_url.clone();
                        let seen = requests_clone.fetch_add(1, Ordering::SeqCst);
                        thread::spawn(move || {
                            handle_connection(stream, &cfg, &base, seen);
                        });
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(std::time::Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            port,
            running,
            requests,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Number of requests received so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockBelvoServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_connection(mut stream: TcpStream, config: &MockConfig, base_url: &str, seen: usize) {
    // the accepted socket inherits non-blocking mode on some platforms
    let _ = stream.set_nonblocking(false);
    let mut buffer = [0; 8192];

    let Ok(n) = stream.read(&mut buffer) else {
        return;
    };
    let request = String::from_utf8_lossy(&buffer[..n]);

    if config.delay_ms > 0 {
        thread::sleep(std::time::Duration::from_millis(config.delay_ms));
    }

    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();
    if parts.len() < 2 {
        send_response(&mut stream, 400, "Bad Request", &[], r#"{"detail": "Invalid request"}"#);
        return;
    }
    let (method, target) = (parts[0], parts[1]);

    if !request.to_lowercase().contains("authorization: basic ") {
        send_response(&mut stream, 401, "Unauthorized", &[], r#"{"detail": "Missing credentials"}"#);
        return;
    }

    if let Some(status) = config.fail_status {
        if config.fail_first == 0 || seen < config.fail_first {
            let mut headers = Vec::new();
            if status == 429 {
                if let Some(secs) = config.retry_after {
                    headers.push(("Retry-After".to_string(), secs.to_string()));
                }
            }
            send_response(&mut stream, status, "Error", &headers, r#"{"detail": "Simulated failure"}"#);
            return;
        }
    }

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if method != "GET" || path != "/api/transactions/" {
        send_response(&mut stream, 404, "Not Found", &[], r#"{"detail": "Not found"}"#);
        return;
    }

    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let link = params.get("link").cloned().unwrap_or_default();
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
    let page_size: usize = params
        .get("page_size")
        .and_then(|p| p.parse().ok())
        .unwrap_or(100)
        .max(1);

    let body = if let Some(ids) = params.get("id__in") {
        let results: Vec<JsonValue> = ids
            .split(',')
            .filter(|id| !id.is_empty())
            .enumerate()
            .map(|(i, id)| mock_transaction(id, i))
            .collect();
        json!({ "count": results.len(), "next": null, "results": results })
    } else {
        let start = (page - 1) * page_size;
        let end = if config.endless {
            start + page_size
        } else {
            (start + page_size).min(config.num_transactions)
        };
        let mut results: Vec<JsonValue> = (start..end)
            .map(|i| mock_transaction(&format!("tx-{:05}", i + 1), i))
            .collect();
        if page == 1 {
            results.extend((0..config.invalid_records).map(mock_invalid_record));
        }
        let has_more = config.endless || end < config.num_transactions;
        let next = has_more.then(|| {
            format!(
                "{}/api/transactions/?link={}&page={}&page_size={}",
                base_url,
                link,
                page + 1,
                page_size
            )
        });
        json!({ "count": config.num_transactions, "next": next, "results": results })
    };

    send_response(&mut stream, 200, "OK", &[], &body.to_string());
}

fn send_response(
    stream: &mut TcpStream,
    status: u16,
    status_text: &str,
    headers: &[(String, String)],
    body: &str,
) {
    let extra: String = headers
        .iter()
        .map(|(name, value)| format!("{}: {}\r\n", name, value))
        .collect();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        extra,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn mock_transaction(id: &str, index: usize) -> JsonValue {
    let merchants = [
        ("OXXO", "Food & Groceries", "Convenience stores", 45.20),
        ("UBER TRIP", "Transport & Travel", "Taxi", 12.50),
        ("NETFLIX.COM", "Subscriptions & Memberships", "Streaming", 9.99),
        ("CFE LUZ", "Bills & Utilities", "Electricity", 80.00),
        ("NOMINA ACME", "Income & Payments", "Salary", 3500.00),
    ];
    let (merchant, category, subcategory, amount) = merchants[index % merchants.len()];
    let flow = if index % merchants.len() == 4 { "INFLOW" } else { "OUTFLOW" };
    let base = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap_or_default();
    let date = base - Duration::days((index % 60) as i64);

    json!({
        "id": id,
        "account": { "id": format!("acc-{}", index % 2 + 1), "category": "CHECKING_ACCOUNT" },
        "amount": amount,
        "currency": "MXN",
        "value_date": date.format("%Y-%m-%d").to_string(),
        "description": merchant,
        "category": category,
        "subcategory": subcategory,
        "merchant": { "name": merchant },
        "type": flow,
        "status": "PROCESSED"
    })
}

fn mock_invalid_record(index: usize) -> JsonValue {
    match index % 3 {
        0 => json!({ "id": format!("bad-{}", index), "currency": "MXN", "value_date": "2024-03-01", "type": "OUTFLOW" }),
        1 => json!({ "id": format!("bad-{}", index), "amount": 10.0, "currency": "MXN", "value_date": "not-a-date", "type": "OUTFLOW" }),
        _ => json!({ "amount": 10.0, "currency": "MXN", "value_date": "2024-03-01", "type": "INFLOW" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::belvo::BelvoClient;
    use crate::config::ProviderSettings;
    use crate::domain::result::Error;
    use crate::ports::{PageCursor, TransactionSource};

    fn client_for(server: &MockBelvoServer, page_size: u32) -> BelvoClient {
        BelvoClient::new(&ProviderSettings {
            base_url: server.base_url(),
            secret_id: Some("secret-id".to_string()),
            secret_password: Some("secret-password".to_string()),
            page_size,
            max_retries: 2,
            retry_backoff_ms: 10,
            request_timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    fn start() -> PageCursor {
        PageCursor::Start {
            date_from: None,
            date_to: None,
        }
    }

    #[tokio::test]
    async fn test_pages_follow_next_links() {
        let server = MockBelvoServer::start(MockConfig {
            num_transactions: 25,
            ..Default::default()
        })
        .unwrap();
        let client = client_for(&server, 10);

        let first = client.fetch_page("link-1", &start()).await.unwrap();
        assert_eq!(first.transactions.len(), 10);
        let next = first.next.expect("second page");

        let second = client
            .fetch_page("link-1", &PageCursor::Next(next))
            .await
            .unwrap();
        assert_eq!(second.transactions[0].id, "tx-00011");

        let third = client
            .fetch_page("link-1", &PageCursor::Next(second.next.unwrap()))
            .await
            .unwrap();
        assert_eq!(third.transactions.len(), 5);
        assert!(third.next.is_none());
    }

    #[tokio::test]
    async fn test_invalid_records_are_counted() {
        let server = MockBelvoServer::start(MockConfig {
            num_transactions: 4,
            invalid_records: 3,
            ..Default::default()
        })
        .unwrap();
        let client = client_for(&server, 100);

        let page = client.fetch_page("link-1", &start()).await.unwrap();
        assert_eq!(page.transactions.len(), 4);
        assert_eq!(page.invalid, 3);
    }

    #[tokio::test]
    async fn test_id_lookup() {
        let server = MockBelvoServer::start(MockConfig::default()).unwrap();
        let client = client_for(&server, 100);

        let ids = vec!["abc".to_string(), "def".to_string()];
        let page = client
            .fetch_page("link-1", &PageCursor::Ids(ids))
            .await
            .unwrap();
        let got: Vec<&str> = page.transactions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(got, vec!["abc", "def"]);
    }

    #[tokio::test]
    async fn test_rate_limit_reports_retry_after() {
        let server = MockBelvoServer::start(MockConfig {
            fail_status: Some(429),
            retry_after: Some(30),
            ..Default::default()
        })
        .unwrap();
        let client = client_for(&server, 100);

        let err = client.fetch_page("link-1", &start()).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { retry_after: Some(30) }));
        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockBelvoServer::start(MockConfig {
            fail_status: Some(503),
            fail_first: 2,
            num_transactions: 3,
            ..Default::default()
        })
        .unwrap();
        let client = client_for(&server, 100);

        let page = client.fetch_page("link-1", &start()).await.unwrap();
        assert_eq!(page.transactions.len(), 3);
        assert_eq!(server.requests(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockBelvoServer::start(MockConfig {
            fail_status: Some(401),
            ..Default::default()
        })
        .unwrap();
        let client = client_for(&server, 100);

        let err = client.fetch_page("link-1", &start()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProviderUnavailable {
                status: Some(401),
                ..
            }
        ));
        assert!(err.to_string().contains("authentication"));
        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let server = MockBelvoServer::start(MockConfig::default()).unwrap();
        let client = BelvoClient::new(&ProviderSettings {
            base_url: server.base_url(),
            ..Default::default()
        })
        .unwrap();

        let err = client.fetch_page("link-1", &start()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(server.requests(), 0);
    }
}
