//! TLS reachability and leaf-certificate posture probe.
//!
//! Performs a TLS handshake against port 443 and decodes the leaf
//! certificate: subject, issuer, validity window, and days until expiry.
//! Handshake failures are part of the result, not probe errors, so an
//! unreachable or misconfigured host still produces a row.

use std::net::TcpStream;
use std::time::Duration;

use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use serde_json::{json, Value};
use tracing::debug;
use x509_parser::prelude::*;

use crate::env::ScanEnv;
use crate::scanner::{Options, ProbeError, Scanner};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TLS_PORT: u16 = 443;

pub struct Tls;

fn asn1_to_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

/// Decode the leaf certificate into the payload fields.
fn certificate_fields(der: &[u8]) -> Result<Value, ProbeError> {
    let (_, cert) =
        parse_x509_certificate(der).map_err(|e| ProbeError::Tls(format!("x509 parse: {e}")))?;
    let validity = cert.validity();
    let not_before = asn1_to_utc(&validity.not_before);
    let not_after = asn1_to_utc(&validity.not_after);
    let now = Utc::now();
    Ok(json!({
        "reachable": true,
        "valid": now > not_before && now < not_after,
        "subject": cert.subject().to_string(),
        "issuer": cert.issuer().to_string(),
        "not_before": not_before.to_rfc3339(),
        "not_after": not_after.to_rfc3339(),
        "days_until_expiry": not_after.signed_duration_since(now).num_days(),
    }))
}

/// A handshake-level failure, reported inside the payload.
fn unreachable(error: String) -> Value {
    json!({ "reachable": false, "valid": false, "error": error })
}

impl Scanner for Tls {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn headers(&self) -> Vec<String> {
        vec![
            "Reachable".into(),
            "Valid".into(),
            "Subject".into(),
            "Issuer".into(),
            "Not Before".into(),
            "Not After".into(),
            "Days Until Expiry".into(),
            "Error".into(),
        ]
    }

    fn scan(&self, domain: &str, _env: &ScanEnv, _options: &Options) -> Result<Value, ProbeError> {
        debug!(domain, port = TLS_PORT, "tls handshake");
        let connector = TlsConnector::new().map_err(|e| ProbeError::Tls(e.to_string()))?;

        let addr = (domain, TLS_PORT);
        let stream = match std::net::ToSocketAddrs::to_socket_addrs(&addr)
            .ok()
            .and_then(|mut addrs| addrs.next())
        {
            Some(sock_addr) => match TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT) {
                Ok(s) => s,
                Err(e) => return Ok(unreachable(format!("tcp connect: {e}"))),
            },
            None => return Ok(unreachable("dns resolution failed".into())),
        };

        let tls = match connector.connect(domain, stream) {
            Ok(s) => s,
            Err(e) => return Ok(unreachable(format!("tls handshake: {e}"))),
        };

        let der = match tls.peer_certificate() {
            Ok(Some(cert)) => cert
                .to_der()
                .map_err(|e| ProbeError::Tls(format!("der encode: {e}")))?,
            Ok(None) => return Ok(unreachable("server presented no certificate".into())),
            Err(e) => return Ok(unreachable(format!("peer certificate: {e}"))),
        };

        certificate_fields(&der)
    }

    fn to_rows(&self, payload: &Value) -> Vec<Vec<Value>> {
        let field = |key: &str| payload.get(key).cloned().unwrap_or(Value::Null);
        vec![vec![
            field("reachable"),
            field("valid"),
            field("subject"),
            field("issuer"),
            field("not_before"),
            field("not_after"),
            field("days_until_expiry"),
            field("error"),
        ]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_payload_fills_error_column() {
        let scanner = Tls;
        let payload = unreachable("tcp connect: refused".into());
        let rows = scanner.to_rows(&payload);
        assert_eq!(rows[0].len(), scanner.headers().len());
        assert_eq!(rows[0][0], json!(false));
        assert_eq!(rows[0][7], json!("tcp connect: refused"));
    }

    #[test]
    fn reachable_payload_has_empty_error_cell() {
        let scanner = Tls;
        let payload = json!({
            "reachable": true,
            "valid": true,
            "subject": "CN=example.com",
            "issuer": "CN=Example CA",
            "not_before": "2026-01-01T00:00:00+00:00",
            "not_after": "2026-12-31T00:00:00+00:00",
            "days_until_expiry": 120,
        });
        let rows = scanner.to_rows(&payload);
        assert_eq!(rows[0][2], json!("CN=example.com"));
        assert_eq!(rows[0][7], Value::Null);
    }
}
