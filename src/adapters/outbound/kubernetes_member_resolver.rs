//! Kubernetes Member Resolver
//!
//! Implements MemberResolver on top of the Kubernetes Endpoints API.
//! Inside a cluster it authenticates with the pod's service account; outside
//! it uses the current kubeconfig context or any API URL, e.g. a local
//! `kubectl proxy`.

use crate::domain::entities::{ServiceRef, TargetAddress};
use crate::domain::errors::ResolveError;
use crate::domain::ports::MemberResolver;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory where Kubernetes mounts the service account credentials.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Endpoints object, reduced to the fields used for member selection.
#[derive(Debug, Deserialize)]
struct Endpoints {
    subsets: Option<Vec<EndpointSubset>>,
}

#[derive(Debug, Deserialize)]
struct EndpointSubset {
    addresses: Option<Vec<EndpointAddress>>,
    ports: Option<Vec<EndpointPort>>,
}

#[derive(Debug, Deserialize)]
struct EndpointAddress {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct EndpointPort {
    port: u16,
}

/// Configuration for the Kubernetes API connection.
#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    /// Base URL of the API server (e.g., "https://10.96.0.1:443")
    pub api_url: String,
    /// Bearer token file, re-read on every call
    pub token_path: Option<PathBuf>,
    /// PEM bundle trusted for the API server certificate
    pub ca_path: Option<PathBuf>,
    /// Static bearer token, takes precedence over `token_path`
    pub token: Option<String>,
    /// Inline PEM bundle trusted for the API server certificate
    pub ca_pem: Option<Vec<u8>>,
    /// Client certificate and key, PEM encoded
    pub identity_pem: Option<Vec<u8>>,
    /// Skip verification of the API server certificate
    pub accept_invalid_certs: bool,
    /// Port the broadcast targets listen on; selects the endpoint subsets
    pub target_port: u16,
    /// Timeout for each API request
    pub request_timeout: Duration,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            api_url: "https://kubernetes.default.svc".to_string(),
            token_path: Some(Path::new(SERVICE_ACCOUNT_DIR).join("token")),
            ca_path: Some(Path::new(SERVICE_ACCOUNT_DIR).join("ca.crt")),
            token: None,
            ca_pem: None,
            identity_pem: None,
            accept_invalid_certs: false,
            target_port: 8080,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl KubernetesConfig {
    /// API URL advertised to pods through the service environment variables.
    pub fn in_cluster_api_url() -> Option<String> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        if host.contains(':') {
            Some(format!("https://[{}]:{}", host, port))
        } else {
            Some(format!("https://{}:{}", host, port))
        }
    }
}

/// Member resolver backed by the Kubernetes Endpoints API.
pub struct KubernetesMemberResolver {
    config: KubernetesConfig,
    client: reqwest::Client,
}

impl KubernetesMemberResolver {
    /// Create a resolver, trusting the configured CA bundle if it exists.
    pub fn new(config: KubernetesConfig) -> Result<Self, ResolveError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ResolveError::Config(format!("cluster CA: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &config.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| ResolveError::Config(format!("client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        if let Some(ca_path) = config.ca_path.as_deref().filter(|p| p.exists()) {
            let pem = std::fs::read(ca_path)
                .map_err(|e| ResolveError::Config(format!("{}: {}", ca_path.display(), e)))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ResolveError::Config(format!("{}: {}", ca_path.display(), e)))?;
            builder = builder.add_root_certificate(cert);
            tracing::debug!("trusting cluster CA from {}", ca_path.display());
        }

        let client = builder
            .build()
            .map_err(|e| ResolveError::Config(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn endpoints_url(&self, service: &ServiceRef) -> String {
        format!(
            "{}/api/v1/namespaces/{}/endpoints/{}",
            self.config.api_url.trim_end_matches('/'),
            service.namespace,
            service.name
        )
    }

    async fn bearer_token(&self) -> Result<Option<String>, ResolveError> {
        if let Some(token) = &self.config.token {
            return Ok(Some(token.clone()));
        }
        let Some(path) = self.config.token_path.as_deref() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let token = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ResolveError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Some(token.trim().to_string()))
    }

    /// Pick the ready addresses of the subsets exposing the target port.
    ///
    /// Falls back to every subset when none lists that port.
    fn select_members(endpoints: Endpoints, target_port: u16) -> Vec<TargetAddress> {
        let subsets = endpoints.subsets.unwrap_or_default();

        let exposes_port = |subset: &EndpointSubset| {
            subset
                .ports
                .as_ref()
                .map(|ports| ports.iter().any(|p| p.port == target_port))
                .unwrap_or(false)
        };
        let any_match = subsets.iter().any(exposes_port);

        let mut seen = HashSet::new();
        subsets
            .into_iter()
            .filter(|subset| !any_match || exposes_port(subset))
            .flat_map(|subset| subset.addresses.unwrap_or_default())
            .filter(|address| seen.insert(address.ip.clone()))
            .map(|address| TargetAddress::new(address.ip))
            .collect()
    }
}

#[async_trait]
impl MemberResolver for KubernetesMemberResolver {
    async fn resolve_members(
        &self,
        service: &ServiceRef,
    ) -> Result<Vec<TargetAddress>, ResolveError> {
        let url = self.endpoints_url(service);
        let mut request = self.client.get(&url).header("accept", "application/json");
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ResolveError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound {
                namespace: service.namespace.clone(),
                name: service.name.clone(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolveError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let endpoints: Endpoints = response
            .json()
            .await
            .map_err(|e| ResolveError::Decode(e.to_string()))?;

        let members = Self::select_members(endpoints, self.config.target_port);
        tracing::debug!("endpoints {} -> {:?}", service, members);
        Ok(members)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};

    // Tests below mutate process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoints(json: serde_json::Value) -> Endpoints {
        serde_json::from_value(json).unwrap()
    }

    fn ips(members: &[TargetAddress]) -> Vec<&str> {
        members.iter().map(|m| m.as_str()).collect()
    }

    fn resolver_for(server: &MockServer, token_path: Option<PathBuf>) -> KubernetesMemberResolver {
        KubernetesMemberResolver::new(KubernetesConfig {
            api_url: server.uri(),
            token_path,
            ca_path: None,
            target_port: 8080,
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_select_members_single_subset() {
        let eps = endpoints(serde_json::json!({
            "subsets": [{
                "addresses": [{"ip": "10.0.0.1"}, {"ip": "10.0.0.2"}],
                "ports": [{"port": 8080, "protocol": "TCP"}]
            }]
        }));
        let members = KubernetesMemberResolver::select_members(eps, 8080);
        assert_eq!(ips(&members), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_select_members_filters_by_port() {
        let eps = endpoints(serde_json::json!({
            "subsets": [
                {"addresses": [{"ip": "10.0.0.1"}], "ports": [{"port": 9090}]},
                {"addresses": [{"ip": "10.0.0.2"}], "ports": [{"port": 8080}]},
                {"addresses": [{"ip": "10.0.0.3"}], "ports": [{"name": "http", "port": 8080}]}
            ]
        }));
        let members = KubernetesMemberResolver::select_members(eps, 8080);
        assert_eq!(ips(&members), vec!["10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_select_members_falls_back_to_all_subsets() {
        let eps = endpoints(serde_json::json!({
            "subsets": [
                {"addresses": [{"ip": "10.0.0.1"}], "ports": [{"port": 9090}]},
                {"addresses": [{"ip": "10.0.0.2"}]}
            ]
        }));
        let members = KubernetesMemberResolver::select_members(eps, 8080);
        assert_eq!(ips(&members), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_select_members_dedupes_and_ignores_not_ready() {
        let eps = endpoints(serde_json::json!({
            "subsets": [
                {
                    "addresses": [{"ip": "10.0.0.1"}],
                    "notReadyAddresses": [{"ip": "10.0.0.9"}],
                    "ports": [{"port": 8080}]
                },
                {"addresses": [{"ip": "10.0.0.1"}], "ports": [{"port": 8080}]}
            ]
        }));
        let members = KubernetesMemberResolver::select_members(eps, 8080);
        assert_eq!(ips(&members), vec!["10.0.0.1"]);
    }

    #[test]
    fn test_select_members_without_subsets() {
        assert!(KubernetesMemberResolver::select_members(endpoints(serde_json::json!({})), 8080).is_empty());
        assert!(
            KubernetesMemberResolver::select_members(endpoints(serde_json::json!({"subsets": null})), 8080)
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_resolve_members_from_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/prod/endpoints/cache"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "Endpoints",
                "metadata": {"name": "cache", "namespace": "prod"},
                "subsets": [{
                    "addresses": [{"ip": "10.1.0.4"}, {"ip": "10.1.0.5"}],
                    "ports": [{"port": 8080}]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver_for(&server, None);
        let members = resolver
            .resolve_members(&ServiceRef::new("prod", "cache"))
            .await
            .unwrap();
        assert_eq!(ips(&members), vec!["10.1.0.4", "10.1.0.5"]);
    }

    #[tokio::test]
    async fn test_resolve_members_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/endpoints/api"))
            .and(header("authorization", "Bearer s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "s3cr3t\n").unwrap();

        let resolver = resolver_for(&server, Some(token_path));
        let members = resolver
            .resolve_members(&ServiceRef::new("default", "api"))
            .await
            .unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_members_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = resolver_for(&server, None)
            .resolve_members(&ServiceRef::new("default", "missing"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::NotFound {
                namespace: "default".to_string(),
                name: "missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_members_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = resolver_for(&server, None)
            .resolve_members(&ServiceRef::new("default", "api"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Status {
                status: 403,
                body: "forbidden".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_members_bad_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = resolver_for(&server, None)
            .resolve_members(&ServiceRef::new("default", "api"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Decode(_)));
    }

    #[tokio::test]
    async fn test_resolve_members_unreachable_api() {
        let resolver = KubernetesMemberResolver::new(KubernetesConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            token_path: None,
            ca_path: None,
            ..Default::default()
        })
        .unwrap();

        let err = resolver
            .resolve_members(&ServiceRef::new("default", "api"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Request(_)));
    }

    #[test]
    fn test_missing_ca_file_is_skipped() {
        let resolver = KubernetesMemberResolver::new(KubernetesConfig {
            ca_path: Some(PathBuf::from("/nonexistent/ca.crt")),
            ..Default::default()
        });
        assert!(resolver.is_ok());
    }

    #[test]
    fn test_endpoints_url() {
        let resolver = KubernetesMemberResolver::new(KubernetesConfig {
            api_url: "http://127.0.0.1:8001/".to_string(),
            ca_path: None,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            resolver.endpoints_url(&ServiceRef::new("ns", "svc")),
            "http://127.0.0.1:8001/api/v1/namespaces/ns/endpoints/svc"
        );
    }

    #[tokio::test]
    async fn test_resolve_members_through_kubeconfig() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/endpoints/api"))
            .and(header("authorization", "Bearer from-kubeconfig"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "subsets": [{"addresses": [{"ip": "10.2.0.1"}], "ports": [{"port": 8080}]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let kubeconfig = dir.path().join("config");
        std::fs::write(
            &kubeconfig,
            format!(
                "current-context: local\n\
                 clusters:\n- name: local\n  cluster:\n    server: {}\n\
                 contexts:\n- name: local\n  context:\n    cluster: local\n    user: me\n\
                 users:\n- name: me\n  user:\n    token: from-kubeconfig\n",
                server.uri()
            ),
        )
        .unwrap();

        let config = KubernetesConfig::from_kubeconfig(&kubeconfig, 8080).unwrap();
        let members = KubernetesMemberResolver::new(config)
            .unwrap()
            .resolve_members(&ServiceRef::new("default", "api"))
            .await
            .unwrap();
        assert_eq!(ips(&members), vec!["10.2.0.1"]);
    }

    #[tokio::test]
    async fn test_static_token_wins_over_token_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer inline"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "from-file").unwrap();

        let resolver = KubernetesMemberResolver::new(KubernetesConfig {
            api_url: server.uri(),
            token_path: Some(token_path),
            ca_path: None,
            token: Some("inline".to_string()),
            ..Default::default()
        })
        .unwrap();
        resolver
            .resolve_members(&ServiceRef::new("default", "api"))
            .await
            .unwrap();
    }

    #[test]
    fn test_in_cluster_api_url() {
        let _guard = ENV_LOCK.lock().unwrap();

        std::env::remove_var("KUBERNETES_SERVICE_HOST");
        std::env::remove_var("KUBERNETES_SERVICE_PORT");
        assert_eq!(KubernetesConfig::in_cluster_api_url(), None);

        std::env::set_var("KUBERNETES_SERVICE_HOST", "10.96.0.1");
        assert_eq!(
            KubernetesConfig::in_cluster_api_url().as_deref(),
            Some("https://10.96.0.1:443")
        );

        std::env::set_var("KUBERNETES_SERVICE_PORT", "6443");
        assert_eq!(
            KubernetesConfig::in_cluster_api_url().as_deref(),
            Some("https://10.96.0.1:6443")
        );

        std::env::set_var("KUBERNETES_SERVICE_HOST", "fd00:10:96::1");
        assert_eq!(
            KubernetesConfig::in_cluster_api_url().as_deref(),
            Some("https://[fd00:10:96::1]:6443")
        );

        std::env::remove_var("KUBERNETES_SERVICE_HOST");
        std::env::remove_var("KUBERNETES_SERVICE_PORT");
    }
}
