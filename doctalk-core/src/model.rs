//! Shared data models for Doctalk.
//!
//! This module contains the wire types exchanged with the answer
//! service and the data carried through a streaming turn.

use serde::{Deserialize, Serialize};

/// Per-turn options submitted with a chat turn request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnOptions {
    /// Whether the answer should carry inline citations
    #[serde(default = "default_citations_enabled")]
    pub citations_enabled: bool,

    /// Prefer the faster, lower-latency model
    #[serde(default)]
    pub fast_mode: bool,
}

fn default_citations_enabled() -> bool {
    true
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            citations_enabled: default_citations_enabled(),
            fast_mode: false,
        }
    }
}

/// Request body for one chat turn. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    pub organization_id: String,

    /// Absent when the turn should open a new conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    pub message: String,

    #[serde(default)]
    pub options: TurnOptions,
}

impl ChatTurnRequest {
    pub fn new(organization_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            conversation_id: None,
            message: message.into(),
            options: TurnOptions::default(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_options(mut self, options: TurnOptions) -> Self {
        self.options = options;
        self
    }
}

/// A source reference produced by the answer service.
///
/// Identity is `(document_id, chunk_index)`; `score` and the display
/// fields are not part of identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub document_id: String,
    pub chunk_index: u32,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Citation {
    /// Identity key for deduplication
    pub fn identity(&self) -> (&str, u32) {
        (&self.document_id, self.chunk_index)
    }
}

/// Token counters reported by the service for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnUsage {
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub model: String,
}

/// One event on the answer stream.
///
/// The wire format is one `data: `-prefixed line per event, each
/// carrying a JSON object with a `type` discriminator. Exactly one
/// terminal event (`done` or `error`) ends a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Incremental answer text, appended in arrival order
    Token { text: String },

    /// Full citation list for the turn; replaces any earlier list
    Citations { items: Vec<Citation> },

    /// Billing/telemetry counters; replaces any earlier snapshot
    #[serde(rename_all = "camelCase")]
    Usage {
        tokens_in: u32,
        tokens_out: u32,
        model: String,
    },

    /// Terminal success; carries the conversation id when the turn
    /// opened a new conversation
    #[serde(rename_all = "camelCase")]
    Done {
        #[serde(default)]
        conversation_id: Option<String>,
    },

    /// Terminal failure
    Error { message: String },
}

impl StreamEvent {
    /// Whether this event ends the turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = ChatTurnRequest::new("org-1", "What does the Q3 report say?")
            .with_conversation("conv-9");
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""organizationId":"org-1""#));
        assert!(json.contains(r#""conversationId":"conv-9""#));
        assert!(json.contains(r#""citationsEnabled":true"#));
    }

    #[test]
    fn test_request_omits_absent_conversation() {
        let req = ChatTurnRequest::new("org-1", "hello");
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("conversationId"));
    }

    #[test]
    fn test_stream_event_round_trip() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"token","text":"Hello"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Token {
                text: "Hello".to_string()
            }
        );

        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"usage","tokensIn":12,"tokensOut":48,"model":"qa-large"}"#,
        )
        .unwrap();
        assert!(matches!(event, StreamEvent::Usage { tokens_out: 48, .. }));

        let event: StreamEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Done {
                conversation_id: None
            }
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let parsed = serde_json::from_str::<StreamEvent>(r#"{"type":"ping"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_citation_identity() {
        let citation: Citation = serde_json::from_str(
            r#"{"documentId":"q3-report","chunkIndex":6,"score":0.92,"page":4}"#,
        )
        .unwrap();
        assert_eq!(citation.identity(), ("q3-report", 6));
        assert_eq!(citation.page, Some(4));
        assert_eq!(citation.section, None);
    }
}
