//! Failure reporters.

use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use codepair_core::{ClientId, FailureReporter};

pub const REPORT_LOG_HEADER: &str = "X-KeyExchange-Log";
pub const REPORT_CID_HEADER: &str = "X-KeyExchange-Cid";

const MAX_LOG_HEADER_LEN: usize = 256;

/// Writes reports to the log. Used when reporting is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report(&self, code: i32, message: &str) {
        warn!(code, detail = message, "Pairing failed");
    }
}

/// Posts reports to `{base}/report` in the background.
pub struct HttpReporter {
    url: String,
    client_id: ClientId,
    http: Client,
}

impl HttpReporter {
    pub fn new(base_url: &str, client_id: ClientId) -> Self {
        Self {
            url: format!("{}/report", base_url.trim_end_matches('/')),
            client_id,
            http: Client::new(),
        }
    }
}

/// Header values must be visible ASCII.
fn header_safe(message: &str) -> String {
    message
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .take(MAX_LOG_HEADER_LEN)
        .collect()
}

impl FailureReporter for HttpReporter {
    fn report(&self, code: i32, message: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(code, detail = message, "No runtime to deliver failure report");
            return;
        };
        let request = self
            .http
            .post(&self.url)
            .header(REPORT_LOG_HEADER, header_safe(message))
            .header(REPORT_CID_HEADER, self.client_id.as_str())
            .json(&json!({
                "code": code,
                "message": message,
                "reportedAt": Utc::now().to_rfc3339(),
            }));
        let url = self.url.clone();
        runtime.spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => debug!(%url, code, "Failure report delivered"),
                Err(e) => warn!(%url, code, "Failure report not delivered: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values_are_sanitized() {
        assert_eq!(header_safe("timeout after 3 polls"), "timeout after 3 polls");
        assert_eq!(header_safe("line\nbreak"), "line?break");
        assert_eq!(header_safe(&"x".repeat(1000)).len(), MAX_LOG_HEADER_LEN);
    }

    #[test]
    fn report_url_joins_base() {
        let reporter = HttpReporter::new("https://relay.example.net/", ClientId::from("c1"));
        assert_eq!(reporter.url, "https://relay.example.net/report");
    }

    #[test]
    fn http_reporter_without_runtime_does_not_panic() {
        let reporter = HttpReporter::new("http://127.0.0.1:9", ClientId::from("c1"));
        reporter.report(5, "timeout");
    }
}
