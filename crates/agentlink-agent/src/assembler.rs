//! Turning one turn's fragments into a single response.
//!
//! Visible text fragments are joined with newlines into the body; reasoning
//! fragments are kept, in order, as a separate list. A body that looks like
//! a JSON object (first non-blank char `{`, last `}`) is parsed into a
//! structured payload; if parsing fails the raw text is kept.
//!
//! The object check is shallow: `{a} and {b}` is tried as JSON and falls
//! back to text, while a JSON object followed by a trailing sentence is
//! never tried at all.

use serde_json::Value;

use crate::classifier::ClassifiedFragment;

/// What a turn with no content renders as.
pub const NO_RESPONSE_TEXT: &str = "No response received";

/// Why a body that looked structured was kept as text.
#[derive(Debug, thiserror::Error)]
enum AssemblyError {
    #[error("body looks like a JSON object but does not parse: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// The payload of an assembled response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// The body parsed as a JSON object.
    Structured(Value),
    /// Plain text body. Empty only when reasoning is present.
    Text(String),
    /// Nothing was classified during the turn.
    NoResponse,
}

/// The outcome of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledResponse {
    reasoning: Option<Vec<String>>,
    payload: ResponsePayload,
}

impl AssembledResponse {
    /// Reasoning fragments in arrival order, or `None` if there were none.
    pub fn reasoning(&self) -> Option<&[String]> {
        self.reasoning.as_deref()
    }

    pub fn payload(&self) -> &ResponsePayload {
        &self.payload
    }

    /// Whether the payload is a parsed JSON object.
    pub fn is_structured(&self) -> bool {
        matches!(self.payload, ResponsePayload::Structured(_))
    }

    /// Whether the turn produced nothing at all.
    pub fn is_empty(&self) -> bool {
        matches!(self.payload, ResponsePayload::NoResponse)
    }

    /// The payload as text: the body, pretty JSON, or the no-response text.
    pub fn body_text(&self) -> String {
        match &self.payload {
            ResponsePayload::Structured(value) => format!("{value:#}"),
            ResponsePayload::Text(text) => text.clone(),
            ResponsePayload::NoResponse => NO_RESPONSE_TEXT.to_string(),
        }
    }

    /// Reasoning lines, a blank line, then the body.
    pub fn render(&self) -> String {
        let body = self.body_text();
        match &self.reasoning {
            None => body,
            Some(lines) if body.is_empty() => lines.join("\n"),
            Some(lines) => format!("{}\n\n{body}", lines.join("\n")),
        }
    }

    pub fn into_parts(self) -> (Option<Vec<String>>, ResponsePayload) {
        (self.reasoning, self.payload)
    }
}

/// Accumulates fragments for one turn.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    reasoning: Vec<String>,
    visible: Vec<String>,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a complete fragment sequence.
    pub fn assemble<I>(fragments: I) -> AssembledResponse
    where
        I: IntoIterator<Item = ClassifiedFragment>,
    {
        let mut assembler = Self::new();
        assembler.extend(fragments);
        assembler.finish()
    }

    pub fn push(&mut self, fragment: ClassifiedFragment) {
        match fragment {
            ClassifiedFragment::Reasoning(text) => self.reasoning.push(text),
            ClassifiedFragment::VisibleText(text) => self.visible.push(text),
            ClassifiedFragment::Suppressed | ClassifiedFragment::Unclassified => {}
        }
    }

    pub fn extend<I>(&mut self, fragments: I)
    where
        I: IntoIterator<Item = ClassifiedFragment>,
    {
        for fragment in fragments {
            self.push(fragment);
        }
    }

    /// Produce the response for everything pushed so far.
    pub fn finish(self) -> AssembledResponse {
        let reasoning = (!self.reasoning.is_empty()).then_some(self.reasoning);

        let payload = if self.visible.is_empty() {
            if reasoning.is_some() {
                ResponsePayload::Text(String::new())
            } else {
                ResponsePayload::NoResponse
            }
        } else {
            let body = self.visible.join("\n");
            if looks_structured(&body) {
                match parse_structured(&body) {
                    Ok(value) => ResponsePayload::Structured(value),
                    Err(e) => {
                        tracing::debug!(error = %e, "falling back to text body");
                        ResponsePayload::Text(body)
                    }
                }
            } else {
                ResponsePayload::Text(body)
            }
        };

        AssembledResponse { reasoning, payload }
    }
}

fn looks_structured(body: &str) -> bool {
    let trimmed = body.trim();
    trimmed.starts_with('{') && trimmed.ends_with('}')
}

fn parse_structured(body: &str) -> Result<Value, AssemblyError> {
    Ok(serde_json::from_str(body.trim())?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
