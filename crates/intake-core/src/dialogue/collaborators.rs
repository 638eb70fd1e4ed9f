//! Outbound message intents and the collaborator seams the engine talks through.

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Most options a discrete-choice prompt can carry.
pub const MAX_BUTTONS: usize = 3;
/// Most rows a scrollable list prompt can carry.
pub const MAX_LIST_ROWS: usize = 10;

/// One selectable option: a stable id the client echoes back, and its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub title: String,
}

impl Choice {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// A message the engine wants delivered. Transports decide how to render each kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        choices: Vec<Choice>,
    },
    List {
        body: String,
        /// Label of the button that opens the list.
        button: String,
        rows: Vec<Choice>,
    },
    Document {
        url: String,
        filename: String,
        caption: String,
    },
}

impl Outbound {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// Extra choices past [`MAX_BUTTONS`] are dropped.
    pub fn buttons(body: impl Into<String>, mut choices: Vec<Choice>) -> Self {
        choices.truncate(MAX_BUTTONS);
        Self::Buttons {
            body: body.into(),
            choices,
        }
    }

    /// Extra rows past [`MAX_LIST_ROWS`] are dropped.
    pub fn list(body: impl Into<String>, button: impl Into<String>, mut rows: Vec<Choice>) -> Self {
        rows.truncate(MAX_LIST_ROWS);
        Self::List {
            body: body.into(),
            button: button.into(),
            rows,
        }
    }

    /// Main text of the intent (caption for documents).
    pub fn body(&self) -> &str {
        match self {
            Self::Text { body } | Self::Buttons { body, .. } | Self::List { body, .. } => body,
            Self::Document { caption, .. } => caption,
        }
    }
}

/// Answers free-text support questions.
#[async_trait]
pub trait SupportDesk: Send + Sync {
    /// Never fails: implementations fall back to a canned reply.
    async fn answer(&self, question: &str) -> String;
}

/// Builds a downloadable document link for a booking.
pub trait DocumentRenderer: Send + Sync {
    /// `None` when no renderer is configured.
    fn document_url_for(&self, record_id: &str) -> Option<String>;
}

/// Fire-and-forget delivery of outbound intents.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, to: &str, message: &Outbound) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_cap_options() {
        let many: Vec<Choice> = (1..=12).map(|i| Choice::new(format!("c{}", i), format!("{}", i))).collect();
        match Outbound::buttons("pick", many.clone()) {
            Outbound::Buttons { choices, .. } => assert_eq!(choices.len(), MAX_BUTTONS),
            other => panic!("unexpected {:?}", other),
        }
        match Outbound::list("pick", "Open", many) {
            Outbound::List { rows, .. } => assert_eq!(rows.len(), MAX_LIST_ROWS),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(Outbound::text("hello")).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["body"], "hello");
    }
}
