//! Kubeconfig loading
//!
//! Reads the current context of a kubeconfig file so the broadcaster can
//! reach the API server from outside a cluster.

use super::kubernetes_member_resolver::KubernetesConfig;
use crate::domain::errors::ResolveError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: String,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: String,
    certificate_authority: Option<PathBuf>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct User {
    token: Option<String>,
    token_file: Option<PathBuf>,
    client_certificate: Option<PathBuf>,
    client_certificate_data: Option<String>,
    client_key: Option<PathBuf>,
    client_key_data: Option<String>,
}

/// Kubeconfig used when no API URL is configured: the first entry of
/// `$KUBECONFIG`, else `$HOME/.kube/config`.
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Some(first) = std::env::var_os("KUBECONFIG")
        .as_deref()
        .and_then(|v| std::env::split_paths(v).find(|p| !p.as_os_str().is_empty()))
    {
        return Some(first);
    }
    std::env::var_os("HOME").map(|home| Path::new(&home).join(".kube").join("config"))
}

fn config_err(path: &Path, e: impl std::fmt::Display) -> ResolveError {
    ResolveError::Config(format!("{}: {}", path.display(), e))
}

impl KubernetesConfig {
    /// Build an API connection from the current context of a kubeconfig file.
    ///
    /// Relative file references are resolved against the kubeconfig's directory.
    pub fn from_kubeconfig(path: &Path, target_port: u16) -> Result<Self, ResolveError> {
        let raw = std::fs::read_to_string(path).map_err(|e| config_err(path, e))?;
        let kubeconfig: Kubeconfig = serde_yaml::from_str(&raw).map_err(|e| config_err(path, e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        if kubeconfig.current_context.is_empty() {
            return Err(config_err(path, "no current-context set"));
        }
        let context = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == kubeconfig.current_context)
            .map(|c| &c.context)
            .ok_or_else(|| config_err(path, format!("context {:?} not found", kubeconfig.current_context)))?;
        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| config_err(path, format!("cluster {:?} not found", context.cluster)))?;
        let anonymous = User::default();
        let user = match &context.user {
            Some(name) => kubeconfig
                .users
                .iter()
                .find(|u| &u.name == name)
                .map(|u| &u.user)
                .ok_or_else(|| config_err(path, format!("user {:?} not found", name)))?,
            None => &anonymous,
        };

        let ca_pem = embedded_or_file(
            base,
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
        )?;
        let cert_pem = embedded_or_file(
            base,
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
        )?;
        let key_pem = embedded_or_file(base, user.client_key_data.as_deref(), user.client_key.as_deref())?;
        let identity_pem = match (cert_pem, key_pem) {
            (Some(mut cert), Some(key)) => {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => return Err(config_err(path, "client certificate and key must be set together")),
        };

        tracing::debug!(
            "kubeconfig {} context {} -> {}",
            path.display(),
            kubeconfig.current_context,
            cluster.server
        );

        Ok(Self {
            api_url: cluster.server.clone(),
            token_path: user.token_file.as_ref().map(|p| base.join(p)),
            ca_path: None,
            token: user.token.clone(),
            ca_pem,
            identity_pem,
            accept_invalid_certs: cluster.insecure_skip_tls_verify,
            target_port,
            ..Default::default()
        })
    }
}

fn embedded_or_file(
    base: &Path,
    data: Option<&str>,
    file: Option<&Path>,
) -> Result<Option<Vec<u8>>, ResolveError> {
    if let Some(data) = data {
        let decoded = STANDARD
            .decode(data.trim())
            .map_err(|e| ResolveError::Config(format!("invalid base64 in kubeconfig: {}", e)))?;
        return Ok(Some(decoded));
    }
    match file {
        Some(file) => {
            let path = base.join(file);
            std::fs::read(&path).map(Some).map_err(|e| config_err(&path, e))
        }
        None => Ok(None),
    }
}
