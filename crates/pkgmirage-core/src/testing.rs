//! In-memory doubles for the [`Completer`] and [`NameSource`] seams.
//!
//! Used by unit and integration tests. No network, no clocks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{MirageError, MirageResult};
use crate::existence::NameSource;
use crate::llm::{Completer, CompletionParams, Conversation};

/// Replays queued responses in order, then falls back.
///
/// Every call is recorded so tests can assert on prompts and call counts.
pub struct ScriptedCompleter {
    script: Mutex<VecDeque<MirageResult<String>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<(Conversation, CompletionParams)>>,
}

impl ScriptedCompleter {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the same text for every call.
    pub fn repeating(text: &str) -> Self {
        Self::new(Vec::<String>::new()).with_fallback(text)
    }

    /// Response used once the script is exhausted. Without one, calls fail.
    pub fn with_fallback(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    /// Queue a failing call at the end of the script.
    pub fn then_fail(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(MirageError::Generation(message.to_string())));
        self
    }

    /// Queue a successful call at the end of the script.
    pub fn then(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Last user message of every call, in call order.
    pub fn user_prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.last_user().unwrap_or_default().to_string())
            .collect()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn params(&self) -> Vec<CompletionParams> {
        self.calls.lock().unwrap().iter().map(|(_, p)| *p).collect()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        params: CompletionParams,
    ) -> MirageResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((conversation.clone(), params));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => self.fallback.clone().ok_or_else(|| {
                MirageError::Generation("scripted completer exhausted".to_string())
            }),
        }
    }
}

/// Name source backed by a fixed list, or a fixed failure.
pub struct StaticNameSource {
    names: Option<Vec<String>>,
    fetches: AtomicUsize,
}

impl StaticNameSource {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: Some(names.into_iter().map(Into::into).collect()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Every fetch fails with [`MirageError::ExistenceSource`].
    pub fn failing() -> Self {
        Self {
            names: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameSource for StaticNameSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn fetch_all(&self) -> MirageResult<Vec<String>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.names
            .clone()
            .ok_or_else(|| MirageError::ExistenceSource("static source offline".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::NAME_GENERATION;

    #[tokio::test]
    async fn scripted_replays_then_falls_back() {
        let c = ScriptedCompleter::new(["one"]).then_fail("boom").with_fallback("again");
        assert_eq!(c.complete_once("s", "u1", NAME_GENERATION).await.unwrap(), "one");
        assert!(c.complete_once("s", "u2", NAME_GENERATION).await.is_err());
        assert_eq!(c.complete_once("s", "u3", NAME_GENERATION).await.unwrap(), "again");
        assert_eq!(c.call_count(), 3);
        assert_eq!(c.user_prompts(), vec!["u1", "u2", "u3"]);
    }

    #[tokio::test]
    async fn scripted_without_fallback_fails_when_exhausted() {
        let c = ScriptedCompleter::new(Vec::<String>::new());
        assert!(c.complete_once("s", "u", NAME_GENERATION).await.is_err());
    }

    #[tokio::test]
    async fn static_source_counts_fetches() {
        let ok = StaticNameSource::new(["a", "b"]);
        assert_eq!(ok.fetch_all().await.unwrap().len(), 2);
        assert_eq!(ok.fetch_count(), 1);

        let bad = StaticNameSource::failing();
        assert!(bad.fetch_all().await.is_err());
        assert_eq!(bad.fetch_count(), 1);
    }
}
