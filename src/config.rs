use crate::domain::errors::ConfigError;
use crate::domain::value_objects::TargetScheme;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Broadcast target
    pub target_service: String,
    pub target_namespace: String,
    pub target_port: u16,
    pub target_scheme: String,

    // Front end
    pub listen_port: u16,
    pub max_body_bytes: usize,
    pub debug: bool,

    // Target cache
    pub refresh_interval_secs: u64,
    pub retry_backoff_ms: u64,

    // Fan-out
    pub target_timeout_ms: u64,
    pub max_concurrency: usize,
    pub target_insecure_tls: bool,

    // Member resolution
    pub static_targets: Option<String>,
    pub kube_api_url: Option<String>,
    pub kube_token_path: String,
    pub kube_ca_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_service: String::new(),
            target_namespace: "default".to_string(),
            target_port: 8080,
            target_scheme: "http".to_string(),
            listen_port: 8080,
            max_body_bytes: 10 * 1024 * 1024,
            debug: false,
            refresh_interval_secs: 10,
            retry_backoff_ms: 1000,
            target_timeout_ms: 10_000,
            max_concurrency: 0,
            target_insecure_tls: false,
            static_targets: None,
            kube_api_url: None,
            kube_token_path: "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string(),
            kube_ca_path: "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".to_string(),
        }
    }
}

impl Config {
    /// Address the front end binds to.
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.listen_port)
    }

    pub fn scheme(&self) -> Result<TargetScheme, ConfigError> {
        TargetScheme::parse(&self.target_scheme)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_service.trim().is_empty() && self.static_targets.is_none() {
            return Err(ConfigError::MissingTargetService);
        }
        if self.target_port == 0 {
            return Err(ConfigError::InvalidTargetPort);
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::InvalidRefreshInterval);
        }
        self.scheme()?;
        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

pub fn load_config() -> anyhow::Result<Config> {
    let defaults = Config::default();

    let target_service = env_or("TARGET_SERVICE", "");
    let target_namespace = env_or("TARGET_NAMESPACE", &defaults.target_namespace);

    let target_port = env_or("TARGET_PORT", "8080").parse().unwrap_or(defaults.target_port);

    let target_scheme = env_or("TARGET_SCHEME", &defaults.target_scheme);

    let listen_port = env_or("LISTEN_PORT", "8080").parse().unwrap_or(defaults.listen_port);

    let max_body_bytes = env_or("MAX_BODY_BYTES", "10485760")
        .parse()
        .unwrap_or(defaults.max_body_bytes);

    let debug = std::env::var("DEBUG").is_ok();

    let refresh_interval_secs = env_or("REFRESH_INTERVAL_SECS", "10")
        .parse()
        .unwrap_or(defaults.refresh_interval_secs);

    let retry_backoff_ms = env_or("RETRY_BACKOFF_MS", "1000")
        .parse()
        .unwrap_or(defaults.retry_backoff_ms);

    let target_timeout_ms = env_or("TARGET_TIMEOUT_MS", "10000")
        .parse()
        .unwrap_or(defaults.target_timeout_ms);

    let max_concurrency = env_or("MAX_CONCURRENCY", "0")
        .parse()
        .unwrap_or(defaults.max_concurrency);

    let target_insecure_tls = env_flag("TARGET_INSECURE_TLS");

    let static_targets = std::env::var("STATIC_TARGETS").ok().filter(|v| !v.is_empty());
    let kube_api_url = std::env::var("KUBE_API_URL").ok().filter(|v| !v.is_empty());
    let kube_token_path = env_or("KUBE_TOKEN_PATH", &defaults.kube_token_path);
    let kube_ca_path = env_or("KUBE_CA_PATH", &defaults.kube_ca_path);

    Ok(Config {
        target_service,
        target_namespace,
        target_port,
        target_scheme,
        listen_port,
        max_body_bytes,
        debug,
        refresh_interval_secs,
        retry_backoff_ms,
        target_timeout_ms,
        max_concurrency,
        target_insecure_tls,
        static_targets,
        kube_api_url,
        kube_token_path,
        kube_ca_path,
    })
}
