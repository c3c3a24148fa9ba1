//! Non-model stages of structured-text repair.
//!
//! Model output that should be JSON arrives in one of three shapes, decided
//! once by [`classify`]:
//!
//! | Envelope | Example |
//! |----------|---------|
//! | [`Envelope::Fenced`] | a Markdown code fence with an opening and closing marker |
//! | [`Envelope::Malformed`] | an opening fence whose closing marker never arrived |
//! | [`Envelope::Unfenced`] | bare text |
//!
//! [`parse_strict`] is stage 1 and [`complete_truncated`] is stage 2. The
//! model-assisted stage 3 lives in the `pkgmirage` crate because it needs a
//! [`Completer`](crate::llm::Completer) and an audit sink.

use serde_json::Value;

const FENCE: &str = "```";

/// Upper bound on cut-back attempts in [`complete_truncated`].
const MAX_COMPLETION_ATTEMPTS: usize = 64;

/// How the raw text is wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope<'a> {
    Fenced {
        lang: Option<&'a str>,
        body: &'a str,
    },
    /// Opening fence without a closing one, typically a truncated response.
    Malformed {
        lang: Option<&'a str>,
        body: &'a str,
    },
    Unfenced(&'a str),
}

impl<'a> Envelope<'a> {
    /// The text inside the envelope, trimmed.
    pub fn body(&self) -> &'a str {
        match self {
            Envelope::Fenced { body, .. } => body.trim(),
            Envelope::Malformed { body, .. } => body.trim(),
            Envelope::Unfenced(body) => body.trim(),
        }
    }

    pub fn lang(&self) -> Option<&'a str> {
        match self {
            Envelope::Fenced { lang, .. } | Envelope::Malformed { lang, .. } => *lang,
            Envelope::Unfenced(_) => None,
        }
    }
}

/// Classify raw model output by its wrapper.
pub fn classify(raw: &str) -> Envelope<'_> {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix(FENCE) else {
        return Envelope::Unfenced(trimmed);
    };

    let tag_len = after_open
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+'))
        .unwrap_or(after_open.len());
    let lang = Some(&after_open[..tag_len]).filter(|t| !t.is_empty());
    let rest = &after_open[tag_len..];

    match rest.rfind(FENCE) {
        Some(close) => Envelope::Fenced {
            lang,
            body: &rest[..close],
        },
        None => Envelope::Malformed { lang, body: rest },
    }
}

/// Stage 1: strict parse of the envelope body.
pub fn parse_strict(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(text)
}

/// Result of scanning a JSON prefix.
struct Scan {
    /// Unclosed `{` / `[` in order of opening.
    stack: Vec<char>,
    in_string: bool,
    /// A backslash was the last character inside a string.
    dangling_escape: bool,
    /// The top-level value closed and more non-whitespace followed.
    trailing_content: bool,
    /// Byte offsets where the text can be cut and re-closed.
    cut_points: Vec<usize>,
}

fn scan(text: &str) -> Scan {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut closed_top = false;
    let mut trailing_content = false;
    let mut cut_points = Vec::new();

    for (i, c) in text.char_indices() {
        if closed_top && !c.is_whitespace() {
            trailing_content = true;
            break;
        }
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                stack.push(c);
                cut_points.push(i + 1);
            }
            '}' | ']' => {
                stack.pop();
                if stack.is_empty() {
                    closed_top = true;
                }
            }
            ',' => cut_points.push(i),
            _ => {}
        }
    }

    Scan {
        stack,
        in_string,
        dangling_escape: in_string && escape,
        trailing_content,
        cut_points,
    }
}

/// Close an unterminated prefix: finish an open string, drop a trailing
/// comma, fill a dangling key separator, then close brackets in reverse.
fn close_prefix(prefix: &str) -> String {
    let state = scan(prefix);
    let mut out = prefix.to_string();

    if state.in_string {
        if state.dangling_escape {
            out.pop();
        }
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
    if out.ends_with(':') {
        out.push_str("null");
    }

    for open in state.stack.iter().rev() {
        out.push(if *open == '{' { '}' } else { ']' });
    }
    out
}

/// Stage 2: heuristic completion of truncated JSON.
///
/// Only applies when the text ends inside an open structure. First tries
/// closing the full text; if that does not parse, cuts back to earlier
/// element boundaries (commas and just after an opening bracket) and
/// closes again. Returns the completed text that parses, or `None`.
pub fn complete_truncated(text: &str) -> Option<String> {
    let text = text.trim();
    let state = scan(text);
    if state.trailing_content || (state.stack.is_empty() && !state.in_string) {
        return None;
    }

    let full = close_prefix(text);
    if parse_strict(&full).is_ok() {
        return Some(full);
    }

    state
        .cut_points
        .iter()
        .rev()
        .take(MAX_COMPLETION_ATTEMPTS)
        .map(|&cut| close_prefix(&text[..cut]))
        .find(|candidate| parse_strict(candidate).is_ok())
}
