//! The activity wire model and its classified view.
//!
//! [`RawActivity`] mirrors the JSON records the agent emits: every field is
//! optional and loosely typed. [`ActivityView`] is the closed set of
//! categories the classifier matches on, borrowing from the raw record.
//!
//! Presence follows the agent's conventions: empty strings, empty objects
//! and arrays, `null`, `false`, and `0` all count as absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role the agent uses on its own outgoing activities.
pub const AGENT_ROLE: &str = "bot";

/// The sender or recipient of an activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelAccount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The conversation an activity belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationAccount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// One event record as received from the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActivity {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
}

impl RawActivity {
    /// A message activity, as sent by the caller.
    pub fn user_message(text: impl Into<String>, conversation_id: &str) -> Self {
        Self {
            kind: Some("message".to_string()),
            text: Some(text.into()),
            conversation: Some(ConversationAccount {
                id: Some(conversation_id.to_string()),
            }),
            ..Self::default()
        }
    }

    /// The conversation id this activity reports, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation
            .as_ref()
            .and_then(|c| present(c.id.as_deref()))
    }

    /// Sender role, if present.
    pub fn role(&self) -> Option<&str> {
        self.from.as_ref().and_then(|f| present(f.role.as_deref()))
    }

    /// Borrow the activity as its classified category.
    pub fn view(&self) -> ActivityView<'_> {
        let text = present(self.text.as_deref());
        let name = present(self.name.as_deref());
        let value = self.value.as_ref().filter(|v| truthy(v));

        match self.kind.as_deref() {
            Some("typing") => ActivityView::Typing,
            Some("trace") => ActivityView::Trace { text, name, value },
            Some("message") => ActivityView::Message {
                text,
                role: self.role(),
            },
            kind => ActivityView::Other(OtherActivity {
                kind,
                name,
                value,
                channel_data: self.channel_data.as_ref().filter(|v| truthy(v)),
                entities: self
                    .entities
                    .as_deref()
                    .filter(|e| !e.is_empty())
                    .unwrap_or(&[]),
            }),
        }
    }
}

/// An activity narrowed to the fields its category uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivityView<'a> {
    /// Typing indicator.
    Typing,
    /// Diagnostic trace emitted while the agent works.
    Trace {
        text: Option<&'a str>,
        name: Option<&'a str>,
        value: Option<&'a Value>,
    },
    /// A chat message.
    Message {
        text: Option<&'a str>,
        role: Option<&'a str>,
    },
    /// Events, invokes, and anything else.
    Other(OtherActivity<'a>),
}

/// Fields of an activity outside the well-known categories.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OtherActivity<'a> {
    pub kind: Option<&'a str>,
    pub name: Option<&'a str>,
    pub value: Option<&'a Value>,
    pub channel_data: Option<&'a Value>,
    pub entities: &'a [Value],
}

/// `Some(s)` only for non-empty strings.
pub fn present(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Whether a JSON value counts as present.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a JSON value for inclusion in a reasoning line: strings as-is,
/// everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
