//! pod-broadcaster - fan-out gateway for horizontally scaled services
//!
//! This is the composition root that wires together all the components.

use pod_broadcaster::adapters::inbound::HttpServer;
use pod_broadcaster::adapters::outbound::{
    default_kubeconfig_path, KubernetesConfig, KubernetesMemberResolver, ReqwestTargetClient,
    StaticMemberResolver,
};
use pod_broadcaster::config::Config;
use pod_broadcaster::infrastructure::shutdown_signal;
use pod_broadcaster::{
    load_config, BroadcastConfig, BroadcastService, CacheConfig, MemberResolver, ServiceRef,
    TargetCache,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    cfg.validate()?;
    let scheme = cfg.scheme()?;

    tracing::info!(
        "starting pod-broadcaster {} target={}/{} port={} scheme={} listen={}",
        env!("CARGO_PKG_VERSION"),
        cfg.target_namespace,
        cfg.target_service,
        cfg.target_port,
        scheme,
        cfg.listen_addr()
    );

    // ===== COMPOSITION ROOT =====

    // 1. Member resolver (static list or Kubernetes Endpoints API)
    let resolver: Arc<dyn MemberResolver> = match &cfg.static_targets {
        Some(list) => {
            tracing::info!("using static targets: {}", list);
            Arc::new(StaticMemberResolver::from_list(list))
        }
        None => {
            let config = kubernetes_config(&cfg)?;
            tracing::info!("resolving members via Kubernetes API at {}", config.api_url);
            Arc::new(KubernetesMemberResolver::new(config)?)
        }
    };

    // 2. Target cache actor
    let cache = TargetCache::spawn(
        resolver,
        ServiceRef::new(&cfg.target_namespace, &cfg.target_service),
        CacheConfig {
            refresh_interval: Duration::from_secs(cfg.refresh_interval_secs),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        },
    );

    // 3. Fan-out aggregator
    let client = Arc::new(ReqwestTargetClient::new(cfg.target_insecure_tls)?);
    let service = Arc::new(BroadcastService::new(
        cache,
        client,
        BroadcastConfig {
            target_port: cfg.target_port,
            scheme,
            target_timeout: match cfg.target_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            max_concurrency: cfg.max_concurrency,
        },
    ));

    // 4. Front end
    let server = HttpServer::new(cfg.listen_addr(), service, cfg.max_body_bytes);
    server.run(shutdown_signal()).await?;

    tracing::info!("exiting");
    Ok(())
}

/// API connection: `KUBE_API_URL`, then the in-cluster service account,
/// then the current kubeconfig context.
fn kubernetes_config(cfg: &Config) -> anyhow::Result<KubernetesConfig> {
    let api_url = cfg
        .kube_api_url
        .clone()
        .or_else(KubernetesConfig::in_cluster_api_url);

    if let Some(api_url) = api_url {
        return Ok(KubernetesConfig {
            api_url,
            token_path: Some(PathBuf::from(&cfg.kube_token_path)),
            ca_path: Some(PathBuf::from(&cfg.kube_ca_path)),
            target_port: cfg.target_port,
            ..Default::default()
        });
    }

    match default_kubeconfig_path().filter(|p| p.exists()) {
        Some(path) => {
            tracing::info!("not in a cluster, using kubeconfig {}", path.display());
            Ok(KubernetesConfig::from_kubeconfig(&path, cfg.target_port)?)
        }
        None => anyhow::bail!(
            "KUBE_API_URL is not set, no in-cluster API was found and no kubeconfig exists"
        ),
    }
}
