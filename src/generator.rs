//! Iterative candidate-name generation.
//!
//! Each round asks the model for the names still missing, listing every
//! accepted name as one to avoid. The loop ends when `limit` names are
//! accepted, after `max_rounds` rounds, or on the first failed call.

use std::collections::HashSet;
use std::sync::Arc;

use pkgmirage_core::llm::{Completer, Conversation, NAME_GENERATION};
use pkgmirage_core::query::clean_candidate;

const SYSTEM_PROMPT: &str = "You are a helpful assistant expert in Python packages. \
Your task is to suggest relevant PyPI package names based on a query. \
Return only a plain text list, with one package name per line.";

pub struct CandidateGenerator {
    completer: Arc<dyn Completer>,
    max_rounds: usize,
}

impl CandidateGenerator {
    pub fn new(completer: Arc<dyn Completer>, max_rounds: usize) -> Self {
        Self {
            completer,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Unique cleaned names in first-seen order, at most `limit`.
    pub async fn generate(&self, query: &str, limit: usize) -> Vec<String> {
        let mut accepted: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut conversation = Conversation::new(SYSTEM_PROMPT);

        for round in 1..=self.max_rounds {
            if accepted.len() >= limit {
                break;
            }
            let needed = limit - accepted.len();
            let asked = conversation.with_user(&round_prompt(query, needed, &seen));

            tracing::debug!(round, needed, "requesting candidate names");
            let content = match self.completer.complete(&asked, NAME_GENERATION).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(round, error = %e, "name generation failed, keeping partial list");
                    break;
                }
            };

            let before = accepted.len();
            for line in content.trim().lines() {
                let Some(name) = clean_candidate(line) else {
                    continue;
                };
                if seen.insert(name.clone()) {
                    accepted.push(name);
                    if accepted.len() >= limit {
                        break;
                    }
                }
            }
            tracing::debug!(round, new = accepted.len() - before, total = accepted.len(), "round done");

            conversation = asked.with_assistant(&content);
        }

        accepted
    }
}

fn round_prompt(query: &str, needed: usize, seen: &HashSet<String>) -> String {
    let mut prompt = format!(
        "Based on the query \"{}\", suggest {} relevant Python package names.",
        query, needed
    );
    if !seen.is_empty() {
        let mut avoid: Vec<&str> = seen.iter().map(String::as_str).collect();
        avoid.sort_unstable();
        prompt.push_str(
            "\n\nAvoid suggesting the following packages that have already been found: ",
        );
        prompt.push_str(&avoid.join(", "));
    }
    prompt.push_str("\n\nReturn only the package names, one per line.");
    prompt
}
