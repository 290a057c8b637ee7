pub mod chat_service;
pub mod llm_service;
pub mod metrics_service;
pub mod session_service;

pub use chat_service::ChatService;
pub use llm_service::LlmService;
pub use metrics_service::MetricsService;
pub use session_service::SessionService;
