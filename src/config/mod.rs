pub mod settings;

pub use settings::{
    CorsConfig, HostedLlmConfig, LlmConfig, ProviderKind, SelfHostedLlmConfig, ServerConfig,
    SessionConfig, Settings, StoreConfig,
};
