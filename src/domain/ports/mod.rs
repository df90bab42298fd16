mod member_resolver;
mod target_client;

pub use member_resolver::MemberResolver;
pub use target_client::TargetClient;
