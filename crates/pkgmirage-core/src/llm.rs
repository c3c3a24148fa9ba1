//! Generative-model seam.
//!
//! [`Completer`] is the single call shape every component uses. A
//! [`Conversation`] is an immutable message history: each round of a
//! multi-turn exchange produces a new value instead of mutating a shared
//! list.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{MirageError, MirageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Ordered chat history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system: &str) -> Self {
        Self {
            messages: vec![Message {
                role: Role::System,
                content: system.to_string(),
            }],
        }
    }

    fn with(&self, role: Role, content: &str) -> Self {
        let mut messages = self.messages.clone();
        messages.push(Message {
            role,
            content: content.to_string(),
        });
        Self { messages }
    }

    pub fn with_user(&self, content: &str) -> Self {
        self.with(Role::User, content)
    }

    pub fn with_assistant(&self, content: &str) -> Self {
        self.with(Role::Assistant, content)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Content of the most recent user message.
    pub fn last_user(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Sampling parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionParams {
    pub const fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

/// Name suggestions: some variety, short output.
pub const NAME_GENERATION: CompletionParams = CompletionParams::new(0.6, 1000);
/// Fabricated metadata batches.
pub const METADATA_SYNTHESIS: CompletionParams = CompletionParams::new(0.7, 4000);
/// Structured-text repair: deterministic.
pub const JSON_REPAIR: CompletionParams = CompletionParams::new(0.0, 4000);
/// Long-form README drafting.
pub const README_DRAFT: CompletionParams = CompletionParams::new(0.5, 4000);

/// A text-in, text-out generative model.
///
/// No structure is enforced on the response; callers impose it by parsing.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Whether calls can succeed at all. A disabled completer always errors.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        params: CompletionParams,
    ) -> MirageResult<String>;

    /// One system prompt plus one user prompt.
    async fn complete_once(
        &self,
        system: &str,
        user: &str,
        params: CompletionParams,
    ) -> MirageResult<String> {
        let conversation = Conversation::new(system).with_user(user);
        self.complete(&conversation, params).await
    }
}

/// Used when no provider is configured.
pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn complete(
        &self,
        _conversation: &Conversation,
        _params: CompletionParams,
    ) -> MirageResult<String> {
        Err(MirageError::Generation(
            "generative provider is disabled".to_string(),
        ))
    }
}
