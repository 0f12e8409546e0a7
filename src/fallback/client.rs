//! Code generation capability
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::{error::GenerationError, settings::ClientSettings};

/// Conversation role
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Black box generation capability: given a conversation,
/// returns the generated source text.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, conversation: &[ChatMessage]) -> Result<String, GenerationError>;
}

/// Chat completion request body
#[derive(Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

/// Chat completion response body
#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Azure OpenAI chat completion client
pub struct AzureOpenAiClient {
    endpoint: String,
    api_key: String,
    settings: ClientSettings,
}

impl AzureOpenAiClient {
    /// Builds a new client. Returns None when no endpoint is configured.
    pub fn new(settings: &ClientSettings) -> Option<Self> {
        let endpoint = settings.endpoint.as_ref()?;

        Some(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            settings: settings.clone(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.settings.model, self.settings.api_version
        )
    }
}

impl CodeGenerator for AzureOpenAiClient {
    fn generate(&self, conversation: &[ChatMessage]) -> Result<String, GenerationError> {
        // blocking clients must not be dropped on async threads
        let client = reqwest::blocking::Client::builder()
            .timeout(self.settings.timeout)
            .build()
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        let body = CompletionRequest {
            messages: conversation,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        debug!(
            "{} - requesting completion ({} turns)",
            self.settings.model,
            conversation.len()
        );

        let response = client
            .post(self.url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    GenerationError::Unavailable(self.endpoint.clone())
                } else if e.is_timeout() {
                    GenerationError::Http {
                        status: 408,
                        body: format!(
                            "request timed out after {}s",
                            self.settings.timeout.as_secs()
                        ),
                    }
                } else {
                    GenerationError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        match status {
            401 | 403 => return Err(GenerationError::Unauthorized(status)),
            429 => return Err(GenerationError::RateLimited),
            _ => {},
        }

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::Http { status, body });
        }

        let parsed: CompletionResponse = response
            .json()
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Malformed("empty completion".to_string()))?;

        trace!("{} - completion: {}", self.settings.model, content);
        Ok(content)
    }
}

/// Stands in when no capability is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct Disabled;

impl CodeGenerator for Disabled {
    fn generate(&self, _: &[ChatMessage]) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable(
            "no code generation endpoint configured".to_string(),
        ))
    }
}

/// Bounds the number of concurrent generation requests,
/// the [Semaphore] being shared by every worker.
pub struct Throttled<G: CodeGenerator> {
    inner: G,
    semaphore: Arc<Semaphore>,
}

impl<G: CodeGenerator> Throttled<G> {
    pub fn new(inner: G, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    fn acquire(&self) -> Result<SemaphorePermit<'_>, GenerationError> {
        let closed = |_| GenerationError::Unavailable("generation throttle closed".to_string());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.semaphore.acquire()).map_err(closed),
            Err(_) => loop {
                match self.semaphore.try_acquire() {
                    Ok(permit) => return Ok(permit),
                    Err(tokio::sync::TryAcquireError::Closed) => {
                        return Err(GenerationError::Unavailable(
                            "generation throttle closed".to_string(),
                        ));
                    },
                    Err(tokio::sync::TryAcquireError::NoPermits) => {
                        std::thread::sleep(Duration::from_millis(10));
                    },
                }
            },
        }
    }
}

impl<G: CodeGenerator> CodeGenerator for Throttled<G> {
    fn generate(&self, conversation: &[ChatMessage]) -> Result<String, GenerationError> {
        let _permit = self.acquire()?;
        self.inner.generate(conversation)
    }
}

/// Replays a predefined list of replies, then keeps on replaying the last one.
/// Records every conversation it was presented.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    last: Mutex<Option<String>>,
    conversations: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one reply
    pub fn reply(self, content: &str) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(content.to_string()));
        }
        self
    }

    /// Appends one failure
    pub fn fail(self, error: GenerationError) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error));
        }
        self
    }

    /// Number of requests served so far
    pub fn requests(&self) -> usize {
        self.conversations.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Conversation presented on the nth request
    pub fn conversation(&self, nth: usize) -> Option<Vec<ChatMessage>> {
        self.conversations.lock().ok()?.get(nth).cloned()
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(&self, conversation: &[ChatMessage]) -> Result<String, GenerationError> {
        if let Ok(mut conversations) = self.conversations.lock() {
            conversations.push(conversation.to_vec());
        }

        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());

        match next {
            Some(Ok(content)) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = Some(content.clone());
                }
                Ok(content)
            },
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .ok()
                .and_then(|last| last.clone())
                .ok_or_else(|| GenerationError::Unavailable("script exhausted".to_string())),
        }
    }
}
