use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{HostedLlmConfig, LlmConfig, ProviderKind, SelfHostedLlmConfig};
use crate::models::chat::{ChatMessage, Role};
use crate::utils::error::ApiError;

/// Context messages forwarded to the hosted completion API.
const HOSTED_CONTEXT_MESSAGES: usize = 10;
/// Context turns flattened into the self-hosted prompt.
const SELF_HOSTED_CONTEXT_MESSAGES: usize = 5;
/// Artificial mock latency range, milliseconds.
const MOCK_DELAY_MS: std::ops::RangeInclusive<u64> = 300..=1500;

/// A capability that turns a conversation into a reply string.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn generate(&self, context: &[ChatMessage]) -> Result<String, ApiError>;
}

/// Build the provider HTTP client with its call timeout. A builder failure
/// substitutes a default client, which has no timeout, so it is logged
/// rather than swallowed.
fn http_client(timeout_seconds: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .unwrap_or_else(|e| {
            warn!(
                "Failed to build HTTP client with {}s timeout, using default client without one: {}",
                timeout_seconds, e
            );
            Client::new()
        })
}

// ===== Hosted provider (OpenAI-compatible chat completions) =====

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

pub struct HostedProvider {
    client: Client,
    config: HostedLlmConfig,
}

impl HostedProvider {
    pub fn new(config: HostedLlmConfig) -> Self {
        Self {
            client: http_client(config.timeout_seconds),
            config,
        }
    }
}

#[async_trait]
impl ChatProvider for HostedProvider {
    async fn generate(&self, context: &[ChatMessage]) -> Result<String, ApiError> {
        let mut messages = vec![WireMessage {
            role: "system",
            content: self.config.system_prompt.clone(),
        }];

        let tail = context.len().saturating_sub(HOSTED_CONTEXT_MESSAGES);
        for msg in &context[tail..] {
            messages.push(WireMessage {
                role: msg.role.as_str(),
                content: msg.content.clone(),
            });
        }

        debug!("Hosted completion request with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: 0.7,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to call completion API: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::LlmError(format!(
                "Completion API error: {status} - {body}"
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to parse completion: {e}")))?;

        let reply = completion
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| ApiError::LlmError("No choices returned from completion".to_string()))?;

        if reply.is_empty() {
            return Ok(empty_reply_filler(context));
        }
        Ok(reply)
    }
}

// ===== Self-hosted provider (Ollama-style generate endpoint) =====

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct SelfHostedProvider {
    client: Client,
    config: SelfHostedLlmConfig,
}

impl SelfHostedProvider {
    pub fn new(config: SelfHostedLlmConfig) -> Self {
        Self {
            client: http_client(config.timeout_seconds),
            config,
        }
    }

    /// Flatten the last few turns into a single role-labeled prompt.
    fn build_prompt(context: &[ChatMessage]) -> String {
        let mut prompt =
            String::from("You are a helpful AI assistant. Be friendly and informative.\n\n");

        let tail = context.len().saturating_sub(SELF_HOSTED_CONTEXT_MESSAGES);
        for msg in &context[tail..] {
            let label = match msg.role {
                Role::User => "Human",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{label}: {}\n", msg.content));
        }

        prompt.push_str("Assistant:");
        prompt
    }
}

#[async_trait]
impl ChatProvider for SelfHostedProvider {
    async fn generate(&self, context: &[ChatMessage]) -> Result<String, ApiError> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: Self::build_prompt(context),
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                top_p: 0.9,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to call generate endpoint: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::LlmError(format!(
                "Generate endpoint error: {}",
                response.status()
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to parse generation: {e}")))?;

        let reply = generated.response.trim().to_string();
        if reply.is_empty() {
            return Ok(empty_reply_filler(context));
        }
        Ok(reply)
    }
}

fn empty_reply_filler(context: &[ChatMessage]) -> String {
    let message = context.last().map(|m| m.content.as_str()).unwrap_or("");
    format!(
        "I received your message about '{message}', but I'm having trouble putting a \
         response together. Could you try rephrasing it?"
    )
}

// ===== Mock provider =====

/// Keyword-triggered canned replies, one category per row.
pub const CANNED_REPLIES: &[(&[&str], &[&str])] = &[
    (
        &["hello", "hi"],
        &[
            "Hello! I'm your AI assistant. How can I help you today?",
            "Hi there! What can I assist you with?",
            "Hello! I'm here to help. What would you like to know?",
        ],
    ),
    (
        &["help"],
        &[
            "I can help you with:\n• Answering questions\n• Providing explanations\n• Technical support\n• General conversation\n\nWhat would you like assistance with?",
            "I'm here to assist! I can answer questions, explain concepts, help with problems, and have conversations. What do you need help with?",
            "I can help with various tasks including answering questions, providing information, and offering support. How can I assist you today?",
        ],
    ),
    (
        &["what can you do", "capabilities"],
        &[
            "My capabilities include:\n• Knowledge Q&A\n• Technical explanations\n• Problem-solving assistance\n• Support and guidance\n• Interactive conversations\n\nFeel free to ask me anything!",
            "I can assist with many things! I can answer questions, explain concepts, help solve problems, provide technical support, and engage in meaningful conversations. What interests you?",
        ],
    ),
    (
        &["support"],
        &[
            "I'm here to provide technical support! Please describe the issue you're experiencing, and I'll do my best to help you resolve it.",
            "Technical support is one of my specialties. What problem are you facing? Please provide as much detail as possible.",
            "I'd be happy to help with technical support. What specific issue can I assist you with today?",
        ],
    ),
    (
        &["problem"],
        &[
            "I'm sorry to hear you're having a problem. Can you describe what's happening in more detail? I'll help you troubleshoot the issue.",
            "Let's work together to solve this problem. Please tell me more about what you're experiencing.",
            "I'm here to help resolve your problem. What specific issue are you encountering?",
        ],
    ),
    (
        &["order"],
        &[
            "I can help you with order-related questions! Are you looking to:\n• Track an existing order\n• Place a new order\n• Modify an order\n• Report an issue with an order\n\nPlease let me know what you need.",
            "For order assistance, I can help you track shipments, check order status, or address any concerns. What specific help do you need with your order?",
            "I'm here to help with your order! Whether you need to track a package, check status, or resolve an issue, I can assist. What do you need?",
        ],
    ),
    (
        &["refund"],
        &[
            "I can help you with refund requests. To process a refund, I'll need:\n• Your order number\n• Reason for the refund\n• Any relevant details\n\nRefunds are typically processed within 3-5 business days. What's your order number?",
            "For refund assistance, please provide your order details and the reason for the refund request. I'll guide you through the process.",
            "I can help process your refund request. Please share your order information and let me know why you'd like a refund.",
        ],
    ),
    (
        &["thank"],
        &[
            "You're very welcome! I'm glad I could help. Is there anything else you'd like to know?",
            "Happy to help! Feel free to ask if you have any other questions.",
            "You're welcome! I'm here whenever you need assistance.",
        ],
    ),
];

/// Fallback replies; `{message}` is replaced with the user's text.
pub const DEFAULT_REPLIES: &[&str] = &[
    "That's an interesting question about '{message}'. While I don't have a specific answer for that right now, I'm here to help with various topics. Could you provide more context or ask about something else?",
    "I understand you're asking about '{message}'. I'd be happy to help! Could you provide a bit more detail about what specifically you'd like to know?",
    "Thanks for your question about '{message}'. To give you the best answer, could you tell me more about what you're looking for?",
    "I'm not sure I fully understand your question, but I'm here to help! Could you rephrase it or provide more details?",
];

/// Deterministic-by-category, randomized-by-choice reply generator with an
/// artificial delay emulating inference latency.
pub struct MockProvider;

impl MockProvider {
    /// Pick a canned reply for the message: first matching keyword category
    /// wins, otherwise one of the default replies echoing the message.
    pub fn pick_reply(message: &str) -> String {
        let lower = message.to_lowercase();
        let mut rng = rand::rng();

        for (keywords, replies) in CANNED_REPLIES {
            if keywords.iter().any(|k| lower.contains(k)) {
                return replies
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or("How can I help you today?")
                    .to_string();
            }
        }

        DEFAULT_REPLIES
            .choose(&mut rng)
            .copied()
            .unwrap_or("How can I help you today?")
            .replace("{message}", message)
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn generate(&self, context: &[ChatMessage]) -> Result<String, ApiError> {
        let message = context.last().map(|m| m.content.as_str()).unwrap_or("");
        let reply = Self::pick_reply(message);

        // The rng handle is not Send, so sample the delay before awaiting.
        let delay_ms = rand::rng().random_range(MOCK_DELAY_MS);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        Ok(reply)
    }
}

// ===== Provider selector =====

/// Dispatches to the configured provider, falling back to the mock for any
/// single failed call. The caller never sees a provider-transport error.
pub struct LlmService {
    provider: Arc<dyn ChatProvider>,
    mock: MockProvider,
}

impl LlmService {
    pub fn new(config: &LlmConfig) -> Self {
        let kind = match config.provider {
            ProviderKind::Hosted if config.hosted.api_key.is_empty() => {
                warn!("Hosted provider selected but no API key configured, using mock");
                ProviderKind::Mock
            }
            kind => kind,
        };

        let provider: Arc<dyn ChatProvider> = match kind {
            ProviderKind::Hosted => Arc::new(HostedProvider::new(config.hosted.clone())),
            ProviderKind::SelfHosted => {
                Arc::new(SelfHostedProvider::new(config.self_hosted.clone()))
            }
            ProviderKind::Mock => Arc::new(MockProvider),
        };

        info!("LLM provider: {}", kind.as_str());
        Self {
            provider,
            mock: MockProvider,
        }
    }

    /// Construct around an explicit provider. Test seam.
    pub fn with_provider(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            mock: MockProvider,
        }
    }

    /// Produce a reply for the conversation. Infallible from the caller's
    /// point of view: a failed provider call degrades to a mock reply.
    pub async fn generate_reply(&self, context: &[ChatMessage]) -> String {
        match self.provider.generate(context).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Provider call failed, falling back to mock: {}", e);
                self.mock
                    .generate(context)
                    .await
                    .unwrap_or_else(|_| empty_reply_filler(context))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_message(content: &str) -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: Role::User,
            content: content.to_string(),
        }]
    }

    fn greeting_replies() -> &'static [&'static str] {
        CANNED_REPLIES
            .iter()
            .find(|(keywords, _)| keywords.contains(&"hello"))
            .map(|(_, replies)| *replies)
            .unwrap()
    }

    #[test]
    fn test_greeting_maps_to_greeting_category() {
        for _ in 0..20 {
            let reply = MockProvider::pick_reply("Hello there");
            assert!(greeting_replies().contains(&reply.as_str()));
        }
    }

    #[test]
    fn test_first_matching_category_wins() {
        // Message contains both "order" and "refund"; the order row is
        // scanned first. Matching is case-insensitive.
        let order_replies: Vec<&str> = CANNED_REPLIES
            .iter()
            .find(|(keywords, _)| keywords.contains(&"order"))
            .map(|(_, replies)| replies.to_vec())
            .unwrap();
        for _ in 0..10 {
            let reply = MockProvider::pick_reply("I need a REFUND for my Order");
            assert!(order_replies.contains(&reply.as_str()));
        }
    }

    #[test]
    fn test_unmatched_message_echoes_input() {
        // Loop past the one default reply that does not echo.
        let echoed = (0..50).any(|_| {
            MockProvider::pick_reply("quantum flux capacitors").contains("quantum flux capacitors")
        });
        assert!(echoed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_provider_replies_after_delay() {
        let reply = MockProvider
            .generate(&user_message("hello"))
            .await
            .unwrap();
        assert!(greeting_replies().contains(&reply.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_provider_falls_back_to_mock() {
        let mut failing = MockChatProvider::new();
        failing
            .expect_generate()
            .returning(|_| Err(ApiError::LlmError("connection timed out".to_string())));

        let llm = LlmService::with_provider(Arc::new(failing));
        let reply = llm.generate_reply(&user_message("hello")).await;
        assert!(greeting_replies().contains(&reply.as_str()));
    }

    #[tokio::test]
    async fn test_healthy_provider_reply_passes_through() {
        let mut provider = MockChatProvider::new();
        provider
            .expect_generate()
            .returning(|_| Ok("All good.".to_string()));

        let llm = LlmService::with_provider(Arc::new(provider));
        assert_eq!(llm.generate_reply(&user_message("status?")).await, "All good.");
    }

    #[test]
    fn test_providers_build_clients_with_configured_timeouts() {
        // Both live providers go through the shared client constructor;
        // zero and default timeouts must both produce a working client.
        let _ = http_client(0);
        let _ = HostedProvider::new(HostedLlmConfig::default());
        let _ = SelfHostedProvider::new(SelfHostedLlmConfig::default());
    }

    #[test]
    fn test_self_hosted_prompt_keeps_last_five_turns() {
        let context: Vec<ChatMessage> = (0..8)
            .map(|i| ChatMessage {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("turn {i}"),
            })
            .collect();

        let prompt = SelfHostedProvider::build_prompt(&context);
        assert!(!prompt.contains("turn 2"));
        assert!(prompt.contains("Human: turn 4"));
        assert!(prompt.contains("Assistant: turn 7"));
        assert!(prompt.ends_with("Assistant:"));
    }
}
