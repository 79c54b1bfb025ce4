//! Activity classification.
//!
//! [`ActivityClassifier::classify`] maps one activity to zero or more
//! [`ClassifiedFragment`]s. Categories are matched in priority order:
//!
//! 1. `typing`: a single [`ClassifiedFragment::Suppressed`].
//! 2. `trace`: reasoning from text, then name, then value.
//! 3. `message`: the text as visible output when the agent (or nobody)
//!    sent it. Echoes of the caller's own messages are dropped.
//! 4. anything else: every rule in [`EXTRACTION_RULES`] runs independently
//!    and each match yields one reasoning fragment.
//!
//! Classification is pure: the same activity always yields the same
//! fragments and nothing is remembered between calls.

use aho_corasick::AhoCorasick;
use serde_json::Value;

use crate::activity::{AGENT_ROLE, ActivityView, OtherActivity, RawActivity, display_value};

/// Substrings (matched ASCII case-insensitively) that mark reasoning
/// content in names and entity types.
pub const REASONING_MARKERS: &[&str] = &["thinking", "reasoning"];

/// Payload keys carrying reasoning, with the label each is shown under.
pub const REASONING_KEYS: &[(&str, &str)] = &[
    ("thinking", "Thinking"),
    ("reasoning", "Reasoning"),
    ("explanation", "Explanation"),
];

/// The classifier's output for one activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedFragment {
    /// Typing indicators and other no-ops.
    Suppressed,
    /// Internal reasoning surfaced by the agent.
    Reasoning(String),
    /// Text meant for the user.
    VisibleText(String),
    /// Not produced by the built-in rules; ignored by assembly.
    Unclassified,
}

/// One auditable rule for activities outside the known categories.
pub struct ExtractionRule {
    /// Which part of the activity the rule inspects.
    pub source: &'static str,
    extract: fn(&Markers, &OtherActivity<'_>, &mut Vec<String>),
}

/// Rules applied, in order, to every activity outside the known categories.
pub const EXTRACTION_RULES: &[ExtractionRule] = &[
    ExtractionRule {
        source: "name",
        extract: extract_name,
    },
    ExtractionRule {
        source: "channelData",
        extract: extract_channel_data,
    },
    ExtractionRule {
        source: "value",
        extract: extract_value,
    },
    ExtractionRule {
        source: "entities",
        extract: extract_entities,
    },
];

fn extract_name(markers: &Markers, activity: &OtherActivity<'_>, out: &mut Vec<String>) {
    if let Some(name) = activity.name.filter(|n| markers.matches(n)) {
        out.push(format!("[{name}]"));
    }
}

fn extract_channel_data(_: &Markers, activity: &OtherActivity<'_>, out: &mut Vec<String>) {
    extract_keyed(activity.channel_data, out);
}

fn extract_value(_: &Markers, activity: &OtherActivity<'_>, out: &mut Vec<String>) {
    extract_keyed(activity.value, out);
}

fn extract_keyed(payload: Option<&Value>, out: &mut Vec<String>) {
    let Some(Value::Object(map)) = payload else {
        return;
    };
    for (key, label) in REASONING_KEYS {
        if let Some(v) = map.get(*key) {
            out.push(format!("[{label}] {}", display_value(v)));
        }
    }
}

fn extract_entities(markers: &Markers, activity: &OtherActivity<'_>, out: &mut Vec<String>) {
    for entity in activity.entities {
        let is_reasoning = entity
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| markers.matches(t));
        if is_reasoning {
            out.push(format!("[Entity Thinking] {entity}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Marker matching
// ---------------------------------------------------------------------------

struct Markers {
    automaton: Option<AhoCorasick>,
}

impl Markers {
    fn new() -> Self {
        let automaton = match AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(REASONING_MARKERS)
        {
            Ok(ac) => Some(ac),
            Err(e) => {
                tracing::error!(error = %e, "failed to build reasoning marker automaton");
                None
            }
        };
        Self { automaton }
    }

    fn matches(&self, haystack: &str) -> bool {
        match &self.automaton {
            Some(ac) => ac.is_match(haystack),
            None => {
                let lowered = haystack.to_ascii_lowercase();
                REASONING_MARKERS.iter().any(|m| lowered.contains(m))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Maps raw activities to fragments.
pub struct ActivityClassifier {
    markers: Markers,
}

impl Default for ActivityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClassifier {
    pub fn new() -> Self {
        Self {
            markers: Markers::new(),
        }
    }

    /// Classify one activity.
    pub fn classify(&self, activity: &RawActivity) -> Vec<ClassifiedFragment> {
        match activity.view() {
            ActivityView::Typing => vec![ClassifiedFragment::Suppressed],

            ActivityView::Trace { text, name, value } => {
                let mut fragments = Vec::with_capacity(3);
                if let Some(text) = text {
                    fragments.push(ClassifiedFragment::Reasoning(text.to_string()));
                }
                if let Some(name) = name {
                    fragments.push(ClassifiedFragment::Reasoning(format!("[Trace: {name}]")));
                }
                if let Some(value) = value {
                    fragments.push(ClassifiedFragment::Reasoning(format!(
                        "[Trace Data] {}",
                        display_value(value)
                    )));
                }
                fragments
            }

            ActivityView::Message { text, role } => match (text, role) {
                (Some(text), None) => vec![ClassifiedFragment::VisibleText(text.to_string())],
                (Some(text), Some(role)) if role == AGENT_ROLE => {
                    vec![ClassifiedFragment::VisibleText(text.to_string())]
                }
                _ => Vec::new(),
            },

            ActivityView::Other(other) => {
                let mut lines = Vec::new();
                for rule in EXTRACTION_RULES {
                    let before = lines.len();
                    (rule.extract)(&self.markers, &other, &mut lines);
                    if lines.len() > before {
                        tracing::trace!(
                            kind = other.kind.unwrap_or("<none>"),
                            source = rule.source,
                            matches = lines.len() - before,
                            "reasoning extracted"
                        );
                    }
                }
                lines.into_iter().map(ClassifiedFragment::Reasoning).collect()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use super::ClassifiedFragment::{Reasoning, Suppressed, VisibleText};

    fn classify(value: Value) -> Vec<ClassifiedFragment> {
        let activity: RawActivity = serde_json::from_value(value).unwrap();
        ActivityClassifier::new().classify(&activity)
    }

    fn r(s: &str) -> ClassifiedFragment {
        Reasoning(s.to_string())
    }

    #[test]
    fn typing_is_suppressed_regardless_of_payload() {
        let payloads = [
            json!({"type": "typing"}),
            json!({"type": "typing", "text": "ignored", "name": "thinking"}),
            json!({"type": "typing", "channelData": {"thinking": "x"}, "from": {"role": "bot"}}),
        ];
        for payload in payloads {
            assert_eq!(classify(payload), vec![Suppressed]);
        }
    }

    #[test]
    fn trace_yields_text_name_value_in_order() {
        let fragments = classify(json!({
            "type": "trace",
            "text": "looking up",
            "name": "KnowledgeSearch",
            "value": {"hits": 3}
        }));
        assert_eq!(
            fragments,
            vec![
                r("looking up"),
                r("[Trace: KnowledgeSearch]"),
                r(r#"[Trace Data] {"hits":3}"#),
            ]
        );
    }

    #[test]
    fn trace_fields_fire_independently() {
        assert_eq!(classify(json!({"type": "trace", "name": "Step"})), vec![r("[Trace: Step]")]);
        assert_eq!(
            classify(json!({"type": "trace", "value": "raw"})),
            vec![r("[Trace Data] raw")]
        );
        assert!(classify(json!({"type": "trace", "value": 0})).is_empty());
    }

    #[test]
    fn agent_message_is_visible() {
        assert_eq!(
            classify(json!({"type": "message", "text": "Hello!", "from": {"role": "bot"}})),
            vec![VisibleText("Hello!".to_string())]
        );
        assert_eq!(
            classify(json!({"type": "message", "text": "No role"})),
            vec![VisibleText("No role".to_string())]
        );
    }

    #[test]
    fn caller_echo_and_empty_message_are_dropped() {
        assert!(classify(json!({"type": "message", "text": "mine", "from": {"role": "user"}})).is_empty());
        assert!(classify(json!({"type": "message", "text": "", "from": {"role": "bot"}})).is_empty());
        assert!(classify(json!({"type": "message", "from": {"role": "bot"}})).is_empty());
    }

    #[test]
    fn other_rules_fire_independently() {
        let fragments = classify(json!({
            "type": "event",
            "name": "DynamicPlanReasoning",
            "channelData": {"thinking": "step 1", "reasoning": "because"},
            "value": {"explanation": "the user asked", "unrelated": true},
            "entities": [
                {"text": "e1", "type": "ThinkingEntity"},
                {"type": "mention"},
                {"type": "reasoningTrace"}
            ]
        }));
        assert_eq!(
            fragments,
            vec![
                r("[DynamicPlanReasoning]"),
                r("[Thinking] step 1"),
                r("[Reasoning] because"),
                r("[Explanation] the user asked"),
                r(r#"[Entity Thinking] {"text":"e1","type":"ThinkingEntity"}"#),
                r(r#"[Entity Thinking] {"type":"reasoningTrace"}"#),
            ]
        );
    }

    #[test]
    fn name_match_is_case_insensitive() {
        assert_eq!(classify(json!({"type": "event", "name": "THINKING"})), vec![r("[THINKING]")]);
        assert!(classify(json!({"type": "event", "name": "startConversation"})).is_empty());
    }

    #[test]
    fn non_object_payloads_are_not_scanned() {
        assert!(classify(json!({"type": "event", "value": "thinking"})).is_empty());
        assert!(classify(json!({"type": "event", "channelData": ["thinking"]})).is_empty());
    }

    #[test]
    fn unknown_category_without_matches_is_silent() {
        assert!(classify(json!({"type": "endOfConversation"})).is_empty());
        assert!(classify(json!({})).is_empty());
    }

    #[test]
    fn at_most_one_visible_text_per_activity() {
        let cases = [
            json!({"type": "message", "text": "a", "name": "thinking", "channelData": {"thinking": "x"}}),
            json!({"type": "event", "text": "b", "name": "reasoning"}),
            json!({"type": "trace", "text": "c"}),
        ];
        for case in cases {
            let visible = classify(case)
                .iter()
                .filter(|f| matches!(f, VisibleText(_)))
                .count();
            assert!(visible <= 1);
        }
    }

    #[test]
    fn classification_is_deterministic() {
        let activity: RawActivity = serde_json::from_value(json!({
            "type": "event",
            "name": "reasoning",
            "value": {"thinking": "x"}
        }))
        .unwrap();
        let classifier = ActivityClassifier::new();
        assert_eq!(classifier.classify(&activity), classifier.classify(&activity));
    }

    #[test]
    fn rule_table_order() {
        let sources: Vec<&str> = EXTRACTION_RULES.iter().map(|r| r.source).collect();
        assert_eq!(sources, ["name", "channelData", "value", "entities"]);
    }
}
