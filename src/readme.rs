//! Markdown README drafting with the document tier in front.

use pkgmirage_core::llm::{Completer, README_DRAFT};
use pkgmirage_core::models::ReadmeRequest;
use pkgmirage_core::repair::{classify, Envelope};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cache::DocumentCache;

const SYSTEM_PROMPT: &str = "You are a senior Python maintainer and technical writer. \
Return ONLY a complete, well-structured Markdown README. \
No JSON, no YAML, no HTML wrappers, no code fences around the entire document.";

const GUIDELINES: &[&str] = &[
    "Start with an H1 title and an optional one-line tagline.",
    "Use short, descriptive badges if appropriate (e.g., shields.io).",
    "Provide a clear project description focusing on real capabilities.",
    "List key features in bullet points.",
    "Add a quickstart section that shows an immediate, minimal example.",
    "Include usage examples with copy-pasteable code blocks.",
    "Document configuration options succinctly in bullets or a simple table.",
    "Explain how to run tests and where to file issues.",
    "Keep sections concise and scannable; avoid marketing fluff.",
    "Use fenced code blocks for commands and Python snippets only.",
    "Include links (Homepage, Repository, Documentation) in a dedicated section.",
    "Close with License and Contributing notes.",
    "Avoid suggesting `pip install <package>`; PyPI already shows that prominently.",
    "Prefer practical examples over long prose; assume intermediate Python users.",
];

const PINNED_RULES: &[&str] = &[
    "Return ONLY a Markdown document (no JSON/YAML wrappers).",
    "Do NOT say `pip install <package>` anywhere in the document.",
    "Avoid telling users to `pip install` in any form; assume PyPI page covers installation.",
    "Keep code blocks minimal and runnable.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadmeSource {
    Cached,
    Generated,
    /// The model call failed. Not cached.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readme {
    pub markdown: String,
    pub source: ReadmeSource,
}

pub async fn generate(
    completer: &dyn Completer,
    documents: &DocumentCache,
    request: &ReadmeRequest,
) -> Readme {
    match documents.get(request).await {
        Ok(Some(markdown)) => {
            return Readme {
                markdown,
                source: ReadmeSource::Cached,
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "document tier unavailable"),
    }

    let content = match completer
        .complete_once(SYSTEM_PROMPT, &prompt(request), README_DRAFT)
        .await
    {
        Ok(c) if !c.trim().is_empty() => c,
        Ok(_) => return fallback(request, "empty response"),
        Err(e) => return fallback(request, &e.to_string()),
    };

    let markdown = format!("{}\n", unwrap_document(&content).trim_end());

    if let Err(e) = documents.put(request, &markdown).await {
        tracing::warn!(package = %request.name, error = %e, "could not cache README");
    }
    Readme {
        markdown,
        source: ReadmeSource::Generated,
    }
}

/// Drop a fence that wraps the whole document. A README that merely opens
/// or closes with a code block is left alone.
fn unwrap_document(content: &str) -> &str {
    let trimmed = content.trim();
    match classify(trimmed) {
        Envelope::Fenced { lang, body }
            if trimmed.ends_with("```")
                && lang.map_or(true, |l| {
                    l.eq_ignore_ascii_case("markdown") || l.eq_ignore_ascii_case("md")
                }) =>
        {
            body.trim()
        }
        _ => trimmed,
    }
}

fn fallback(request: &ReadmeRequest, reason: &str) -> Readme {
    tracing::warn!(package = %request.name, reason, "README generation failed");
    Readme {
        markdown: format!(
            "# {}\n\n{}\n\n> README generation failed. Please try again.\n",
            request.name,
            request.summary.as_deref().unwrap_or("")
        ),
        source: ReadmeSource::Fallback,
    }
}

/// Pick between 6 and 12 guidelines, varied per request but stable for
/// the same request.
fn sampled_guidelines(request: &ReadmeRequest) -> Vec<&'static str> {
    let digest = Sha256::digest(request.name.as_bytes());
    let count = 6 + (digest[0] as usize % 7);
    let start = digest[1] as usize % GUIDELINES.len();
    (0..count)
        .map(|i| GUIDELINES[(start + i) % GUIDELINES.len()])
        .collect()
}

fn prompt(request: &ReadmeRequest) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let mut meta = vec![
        format!("**Name:** {}", request.name),
        format!("**Summary:** {}", opt(&request.summary)),
        format!("**Description:** {}", opt(&request.description)),
        format!("**Homepage:** {}", opt(&request.homepage)),
        format!("**Repository:** {}", opt(&request.repo_url)),
        format!("**Documentation:** {}", opt(&request.documentation_url)),
        format!("**License:** {}", opt(&request.license)),
        format!("**Requires Python:** {}", opt(&request.python_requires)),
    ];
    if let Some(features) = &request.features {
        meta.push(format!("**Features:** {}", features.join("; ")));
    }
    if let Some(snippets) = &request.usage_snippets {
        for s in snippets {
            meta.push(format!("**Usage snippet:**\n```python\n{}\n```", s));
        }
    }

    format!(
        "Create a high-quality README.md in **pure Markdown** for the project below.\n\n\
         ### Project Metadata\n\n{}\n\n\
         Follow these guidelines (varied each time):\n{}\n\n\
         Always enforce these rules:\n{}\n\n\
         Return only the README content.",
        meta.join("\n"),
        bullets(&sampled_guidelines(request)),
        bullets(PINNED_RULES),
    )
}

fn bullets(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| format!("- {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}
