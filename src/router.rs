//! Delegation routing - logical delegate names to agent cards.
//!
//! An agent that calls other agents addresses them by role ("architect",
//! "reviewer") rather than by transport details. The mapping is configured at
//! startup and read-only afterwards, so concurrent lookups from in-flight
//! requests need no locking.

use std::collections::HashMap;

use crate::card::AgentCard;
use crate::error::Error;

/// Maps logical delegate names to agent cards.
///
/// Each name resolves to exactly one card. Built once via [`RouterBuilder`]
/// and shared by `Arc` between requests.
#[derive(Debug, Clone, Default)]
pub struct DelegationRouter {
    entries: HashMap<String, AgentCard>,
}

impl DelegationRouter {
    /// Start building a router.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// An empty router, for agents with no delegates.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve a logical delegate name to its card.
    pub fn resolve_delegate(&self, logical_name: &str) -> Result<&AgentCard, Error> {
        self.entries
            .get(logical_name)
            .ok_or_else(|| Error::UnknownDelegate(logical_name.to_string()))
    }

    /// Registered delegate names, in no particular order.
    pub fn delegate_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`DelegationRouter`].
#[derive(Debug, Default)]
pub struct RouterBuilder {
    entries: HashMap<String, AgentCard>,
}

impl RouterBuilder {
    /// Register a delegate. A repeated name replaces the earlier entry.
    pub fn delegate(mut self, logical_name: impl Into<String>, card: AgentCard) -> Self {
        self.entries.insert(logical_name.into(), card);
        self
    }

    pub fn build(self) -> DelegationRouter {
        DelegationRouter {
            entries: self.entries,
        }
    }
}
