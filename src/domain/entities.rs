//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the broadcaster domain:
//! the targets a service resolves to, the requests fanned out to them and
//! the composite result assembled from their answers.

use crate::domain::errors::DispatchError;
use crate::domain::value_objects::TargetScheme;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

/// A host-reachable address of one service member (IP or `host:port`).
///
/// Opaque to the cache; only the aggregator interprets it when it builds
/// the outbound URL.
///
/// Ordered numerically when the address is an IP (with or without a port),
/// IP addresses first, then names in string order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TargetAddress(String);

impl TargetAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the URL authority used to reach this target.
    ///
    /// An address that already carries a port is used as-is. Bare IPv6
    /// literals are bracketed. The port is left out when it is the scheme
    /// default.
    pub fn authority(&self, port: u16, scheme: TargetScheme) -> String {
        let addr = self.0.as_str();

        if addr.parse::<SocketAddr>().is_ok() {
            return addr.to_string();
        }

        let host = if addr.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]", addr)
        } else if addr.contains(':') {
            // host:port with a DNS name
            return addr.to_string();
        } else {
            addr.to_string()
        };

        if port == scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, port)
        }
    }
}

impl TargetAddress {
    fn sort_key(&self) -> (Option<(IpAddr, u16)>, &str) {
        let addr = self.0.as_str();
        let ip = match addr.parse::<SocketAddr>() {
            Ok(sock) => Some((sock.ip(), sock.port())),
            Err(_) => addr.parse::<IpAddr>().ok().map(|ip| (ip, 0)),
        };
        (ip, addr)
    }
}

impl Ord for TargetAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        let (ip_a, raw_a) = self.sort_key();
        let (ip_b, raw_b) = other.sort_key();
        match (ip_a, ip_b) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| raw_a.cmp(raw_b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => raw_a.cmp(raw_b),
        }
    }
}

impl PartialOrd for TargetAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TargetAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Ordered, immutable set of targets produced by one resolution cycle.
///
/// Cloning is cheap and shares the underlying list; a refresh always
/// builds a new set instead of mutating the old one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet(Arc<[TargetAddress]>);

impl TargetSet {
    pub fn new(targets: Vec<TargetAddress>) -> Self {
        Self(targets.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TargetAddress> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[TargetAddress] {
        &self.0
    }

    /// True when both handles point at the same resolved list.
    pub fn same_resolution(&self, other: &TargetSet) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Vec<TargetAddress>> for TargetSet {
    fn from(targets: Vec<TargetAddress>) -> Self {
        Self::new(targets)
    }
}

impl<'a> IntoIterator for &'a TargetSet {
    type Item = &'a TargetAddress;
    type IntoIter = std::slice::Iter<'a, TargetAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Namespace/name pair identifying the service whose members are targeted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Header list preserving order and repeated names.
pub type HeaderList = Vec<(String, Vec<u8>)>;

/// Transport-neutral view of a request received by the front end.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    /// Path plus optional `?query`, exactly as received.
    pub path_and_query: String,
    pub headers: HeaderList,
    /// Fully buffered body, replayed to every target.
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, path_and_query: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path_and_query: path_and_query.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// One copy of the inbound request, addressed to a single target.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub target: TargetAddress,
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    pub body: Bytes,
}

/// What a target answered, whatever the status code.
#[derive(Debug, Clone)]
pub struct TargetResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Value carried by a per-target outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeValue {
    /// Body decoded as JSON.
    Json(serde_json::Value),
    /// Body that is not JSON, carried verbatim.
    Raw(Bytes),
    /// Description of a transport failure.
    Error(String),
}

impl OutcomeValue {
    /// Decode a response body, falling back to the raw bytes.
    pub fn decode(body: Bytes) -> Self {
        match serde_json::from_slice(&body) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Raw(body),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

// Raw bodies render as standard base64, the form Go clients decode into []byte.
impl Serialize for OutcomeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Json(value) => value.serialize(serializer),
            Self::Raw(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            Self::Error(message) => serializer.serialize_str(message),
        }
    }
}

/// Outcome of one target for one broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct PerTargetOutcome {
    /// HTTP status, absent when the call failed at the transport level.
    #[serde(rename = "Status")]
    pub status: Option<u16>,
    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "Host")]
    pub host: TargetAddress,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Value")]
    pub value: OutcomeValue,
}

impl PerTargetOutcome {
    pub fn from_response(request: &OutboundRequest, response: TargetResponse) -> Self {
        Self {
            status: Some(response.status),
            method: request.method.clone(),
            host: request.target.clone(),
            url: request.url.clone(),
            value: OutcomeValue::decode(response.body),
        }
    }

    pub fn from_error(request: &OutboundRequest, err: &DispatchError) -> Self {
        Self {
            status: None,
            method: request.method.clone(),
            host: request.target.clone(),
            url: request.url.clone(),
            value: OutcomeValue::Error(err.to_string()),
        }
    }
}

/// Composite result of one broadcast, one outcome per dispatched target.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateResult {
    #[serde(rename = "Result")]
    pub result: Vec<PerTargetOutcome>,
}

impl AggregateResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.result.len()
    }

    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PerTargetOutcome> {
        self.result.iter()
    }

    /// Number of outcomes that failed at the transport level.
    pub fn failures(&self) -> usize {
        self.result.iter().filter(|o| o.status.is_none()).count()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn outbound(target: &str) -> OutboundRequest {
        OutboundRequest {
            target: TargetAddress::from(target),
            method: "GET".to_string(),
            url: format!("http://{}:8080/status", target),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_authority_appends_port() {
        let addr = TargetAddress::from("10.0.0.1");
        assert_eq!(addr.authority(8080, TargetScheme::Http), "10.0.0.1:8080");
    }

    #[test]
    fn test_authority_omits_default_port() {
        let addr = TargetAddress::from("10.0.0.1");
        assert_eq!(addr.authority(80, TargetScheme::Http), "10.0.0.1");
        assert_eq!(addr.authority(443, TargetScheme::Https), "10.0.0.1");
        assert_eq!(addr.authority(80, TargetScheme::Https), "10.0.0.1:80");
    }

    #[test]
    fn test_authority_keeps_explicit_port() {
        assert_eq!(
            TargetAddress::from("10.0.0.1:9000").authority(8080, TargetScheme::Http),
            "10.0.0.1:9000"
        );
        assert_eq!(
            TargetAddress::from("api.internal:9000").authority(8080, TargetScheme::Http),
            "api.internal:9000"
        );
        assert_eq!(
            TargetAddress::from("[fd00::1]:9000").authority(8080, TargetScheme::Http),
            "[fd00::1]:9000"
        );
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        let addr = TargetAddress::from("fd00::1");
        assert_eq!(addr.authority(8080, TargetScheme::Http), "[fd00::1]:8080");
        assert_eq!(addr.authority(80, TargetScheme::Http), "[fd00::1]");
    }

    #[test]
    fn test_addresses_order_numerically() {
        let mut addrs: Vec<TargetAddress> = [
            "api.internal",
            "10.0.0.10",
            "10.0.0.2:9000",
            "10.0.0.2",
            "fd00::1",
            "10.0.0.1",
        ]
        .into_iter()
        .map(TargetAddress::from)
        .collect();
        addrs.sort();
        let sorted: Vec<&str> = addrs.iter().map(|a| a.as_str()).collect();
        assert_eq!(
            sorted,
            vec!["10.0.0.1", "10.0.0.2", "10.0.0.2:9000", "10.0.0.10", "fd00::1", "api.internal"]
        );
    }

    #[test]
    fn test_target_set_shares_resolution() {
        let set = TargetSet::new(vec!["10.0.0.1".into(), "10.0.0.2".into()]);
        let copy = set.clone();
        assert!(set.same_resolution(&copy));
        assert_eq!(copy.len(), 2);

        let rebuilt = TargetSet::new(vec!["10.0.0.1".into(), "10.0.0.2".into()]);
        assert_eq!(set, rebuilt);
        assert!(!set.same_resolution(&rebuilt));
    }

    #[test]
    fn test_decode_json_body() {
        let value = OutcomeValue::decode(Bytes::from_static(br#"{"ok":true}"#));
        assert_eq!(value, OutcomeValue::Json(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_decode_plain_text_keeps_bytes() {
        let value = OutcomeValue::decode(Bytes::from_static(b"pong"));
        assert_eq!(value, OutcomeValue::Raw(Bytes::from_static(b"pong")));
        assert_eq!(serde_json::to_value(&value).unwrap(), serde_json::json!("cG9uZw=="));
    }

    #[test]
    fn test_text_body_with_newline_serializes_as_base64() {
        let value = OutcomeValue::decode(Bytes::from_static(b"OK\n"));
        assert_eq!(serde_json::to_string(&value).unwrap(), r#""T0sK""#);
    }

    #[test]
    fn test_binary_body_serializes_as_base64() {
        let value = OutcomeValue::Raw(Bytes::from_static(&[0xff, 0x00, 0x01]));
        assert_eq!(serde_json::to_value(&value).unwrap(), serde_json::json!("/wAB"));
    }

    #[test]
    fn test_empty_body_serializes_as_empty_string() {
        let value = OutcomeValue::decode(Bytes::new());
        assert_eq!(value, OutcomeValue::Raw(Bytes::new()));
        assert_eq!(serde_json::to_value(&value).unwrap(), serde_json::json!(""));
    }

    #[test]
    fn test_outcome_field_names() {
        let request = outbound("10.0.0.1");
        let outcome = PerTargetOutcome::from_response(
            &request,
            TargetResponse {
                status: 200,
                body: Bytes::from_static(b"[1,2]"),
            },
        );
        let json = serde_json::to_value(AggregateResult {
            result: vec![outcome],
        })
        .unwrap();

        assert_eq!(json["Result"][0]["Status"], 200);
        assert_eq!(json["Result"][0]["Method"], "GET");
        assert_eq!(json["Result"][0]["Host"], "10.0.0.1");
        assert_eq!(json["Result"][0]["URL"], "http://10.0.0.1:8080/status");
        assert_eq!(json["Result"][0]["Value"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_error_outcome_has_no_status() {
        let request = outbound("10.0.0.2");
        let outcome =
            PerTargetOutcome::from_error(&request, &DispatchError::Transport("refused".into()));
        assert!(outcome.status.is_none());
        assert!(outcome.value.is_error());

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json["Status"].is_null());
        assert_eq!(json["Value"], "refused");
    }

    #[test]
    fn test_aggregate_failures() {
        let ok = PerTargetOutcome::from_response(
            &outbound("10.0.0.1"),
            TargetResponse {
                status: 500,
                body: Bytes::new(),
            },
        );
        let failed =
            PerTargetOutcome::from_error(&outbound("10.0.0.2"), &DispatchError::Transport("x".into()));
        let result = AggregateResult {
            result: vec![ok, failed],
        };
        assert_eq!(result.len(), 2);
        assert_eq!(result.failures(), 1);
        assert!(AggregateResult::empty().is_empty());
    }
}
