pub mod loader;
pub mod schema;

pub use loader::{find_config_path, load_config, resolve_path, save_config};
pub use schema::{
    AgentDefaults, AgentSpec, AgentsConfig, Config, GatewayConfig, HistoryConfig,
    PersistenceConfig, ProviderConfig, ProvidersConfig, SchedulerConfig, RESERVED_SENDERS,
};
