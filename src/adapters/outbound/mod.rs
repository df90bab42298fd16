mod kubeconfig;
mod kubernetes_member_resolver;
mod reqwest_target_client;
mod static_member_resolver;

pub use kubeconfig::default_kubeconfig_path;
pub use kubernetes_member_resolver::{KubernetesConfig, KubernetesMemberResolver, SERVICE_ACCOUNT_DIR};
pub use reqwest_target_client::ReqwestTargetClient;
pub use static_member_resolver::StaticMemberResolver;
