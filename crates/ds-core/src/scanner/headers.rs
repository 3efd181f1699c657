//! HTTP response-header hardening probe.
//!
//! Fetches `https://<domain>/` and records the presence and values of the
//! security headers that matter for a first-pass posture check: HSTS, CSP,
//! X-Frame-Options, and X-Content-Type-Options.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::env::ScanEnv;
use crate::scanner::{Options, ProbeError, Scanner};

const USER_AGENT: &str = concat!("ds-core/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CHECKED_HEADERS: &[(&str, &str)] = &[
    ("strict-transport-security", "hsts"),
    ("content-security-policy", "csp"),
    ("x-frame-options", "x_frame_options"),
    ("x-content-type-options", "x_content_type_options"),
];

pub struct Headers {
    client: Client,
}

impl Headers {
    pub fn new() -> Self {
        // Client construction only fails on malformed builder input, which
        // this builder cannot produce.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Headers { client }
    }
}

impl Default for Headers {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract one header's value, tolerating non-UTF-8 bytes.
fn header_value(headers: &HeaderMap, name: &str) -> Value {
    match headers.get(name) {
        Some(value) => match value.to_str() {
            Ok(s) => json!(s),
            Err(_) => json!("[invalid utf-8]"),
        },
        None => Value::Null,
    }
}

impl Scanner for Headers {
    fn name(&self) -> &'static str {
        "headers"
    }

    fn headers(&self) -> Vec<String> {
        vec![
            "Status Code".into(),
            "HSTS".into(),
            "CSP".into(),
            "X-Frame-Options".into(),
            "X-Content-Type-Options".into(),
        ]
    }

    fn scan(&self, domain: &str, _env: &ScanEnv, _options: &Options) -> Result<Value, ProbeError> {
        let url = format!("https://{domain}/");
        debug!(url, "fetching response headers");

        let response = self.client.get(&url).send()?;
        let status = response.status().as_u16();
        let headers = response.headers();

        let mut payload = serde_json::Map::new();
        payload.insert("status_code".into(), json!(status));
        for (wire_name, key) in CHECKED_HEADERS {
            payload.insert((*key).into(), header_value(headers, wire_name));
        }
        info!(domain, status, "headers scan finished");
        Ok(Value::Object(payload))
    }

    fn to_rows(&self, payload: &Value) -> Vec<Vec<Value>> {
        vec![vec![
            payload.get("status_code").cloned().unwrap_or(Value::Null),
            payload.get("hsts").cloned().unwrap_or(Value::Null),
            payload.get("csp").cloned().unwrap_or(Value::Null),
            payload.get("x_frame_options").cloned().unwrap_or(Value::Null),
            payload
                .get("x_content_type_options")
                .cloned()
                .unwrap_or(Value::Null),
        ]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_follow_declared_headers() {
        let scanner = Headers::new();
        let payload = json!({
            "status_code": 200,
            "hsts": "max-age=31536000",
            "csp": null,
            "x_frame_options": "DENY",
            "x_content_type_options": "nosniff",
        });
        let rows = scanner.to_rows(&payload);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), scanner.headers().len());
        assert_eq!(rows[0][0], json!(200));
        assert_eq!(rows[0][2], Value::Null);
    }

    #[test]
    fn missing_payload_fields_become_null_cells() {
        let scanner = Headers::new();
        let rows = scanner.to_rows(&json!({"status_code": 301}));
        assert_eq!(rows[0][1], Value::Null);
    }
}
