//! Agent cards - discoverable agent metadata.
//!
//! Every agent serves its card at a well-known path. Callers fetch it once and
//! address the agent through it; the card never changes after it is built.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Path every agent serves its card under, relative to its base URL.
pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

/// Capability tag advertised by agents that support streaming responses.
pub const CAP_STREAMING: &str = "streaming";

/// Immutable metadata describing one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCard {
    /// Human-readable agent name.
    pub name: String,
    /// What the agent does.
    #[serde(default)]
    pub description: String,
    /// Base URL the agent is reachable at.
    pub url: String,
    /// Capability tags, e.g. [`CAP_STREAMING`].
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl AgentCard {
    /// Build a card with no capabilities.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            url: url.into(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.insert(tag.into());
        self
    }

    /// Whether the agent advertises a capability tag.
    pub fn supports(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }

    /// Full URL of the card document for this agent.
    pub fn card_url(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), AGENT_CARD_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_capabilities() {
        let card = AgentCard::new("architect", "http://localhost:8000")
            .with_description("Creates implementation plans")
            .with_capability(CAP_STREAMING);

        assert!(card.supports(CAP_STREAMING));
        assert!(!card.supports("tools"));
    }

    #[test]
    fn test_card_url_normalizes_trailing_slash() {
        let card = AgentCard::new("a", "http://localhost:8000/");
        assert_eq!(
            card.card_url(),
            "http://localhost:8000/.well-known/agent-card.json"
        );
    }

    #[test]
    fn test_card_roundtrip() {
        let card = AgentCard::new("reviewer", "http://localhost:8002")
            .with_capability(CAP_STREAMING);

        let json = serde_json::to_string(&card).unwrap();
        let parsed: AgentCard = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, card);
    }

    #[test]
    fn test_card_minimal_document() {
        // Cards from older peers may omit optional fields
        let parsed: AgentCard =
            serde_json::from_str(r#"{"name":"a","url":"http://localhost:1"}"#).unwrap();
        assert!(parsed.capabilities.is_empty());
        assert!(parsed.description.is_empty());
    }
}
