//! Per-node event history
//!
//! A node's history records the most recent occurrence of each event kind.
//! Writing an event replaces any earlier event of the same kind, so the
//! history never grows beyond one entry per kind and queries are always
//! "most recent for kind".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::Agent;

/// The kinds of events recorded on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Provisioned,
    Readied,
    Reserved,
    Activated,
    /// The node made a config request (ready nodes only)
    Requested,
    /// The node is positively observed down (active nodes only)
    Down,
    Failed,
    Deactivated,
    Parked,
    Dirtied,
}

/// A single history event: what happened, who did it, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub agent: Agent,
    pub at: DateTime<Utc>,
    /// Human-readable diagnostic attached to the transition, if any
    pub detail: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, agent: Agent, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            agent,
            at,
            detail: None,
        }
    }

    pub fn with_detail(
        kind: EventKind,
        agent: Agent,
        at: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            agent,
            at,
            detail: Some(detail.into()),
        }
    }
}

/// An ordered sequence of events, at most one per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    events: Vec<Event>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent event of the given kind, if any.
    pub fn event(&self, kind: EventKind) -> Option<&Event> {
        self.events.iter().find(|e| e.kind == kind)
    }

    pub fn has(&self, kind: EventKind) -> bool {
        self.event(kind).is_some()
    }

    /// Returns this history with `event` recorded, replacing any earlier
    /// event of the same kind.
    pub fn with(mut self, event: Event) -> Self {
        self.events.retain(|e| e.kind != event.kind);
        self.events.push(event);
        self
    }

    /// Returns this history without any event of the given kind.
    pub fn without(mut self, kind: EventKind) -> Self {
        self.events.retain(|e| e.kind != kind);
        self
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_event_replaces_same_kind() {
        let history = History::new()
            .with(Event::new(EventKind::Readied, Agent::System, at(10)))
            .with(Event::new(EventKind::Requested, Agent::System, at(20)))
            .with(Event::new(EventKind::Requested, Agent::System, at(30)));

        assert_eq!(history.events().len(), 2);
        assert_eq!(history.event(EventKind::Requested).unwrap().at, at(30));
        assert_eq!(history.event(EventKind::Readied).unwrap().at, at(10));
    }

    #[test]
    fn test_without_removes_only_named_kind() {
        let history = History::new()
            .with(Event::new(EventKind::Down, Agent::System, at(5)))
            .with(Event::new(EventKind::Readied, Agent::System, at(1)))
            .without(EventKind::Down);

        assert!(!history.has(EventKind::Down));
        assert!(history.has(EventKind::Readied));
    }

    #[test]
    fn test_detail_is_preserved() {
        let history = History::new().with(Event::with_detail(
            EventKind::Failed,
            Agent::System,
            at(7),
            "Node has hardware failure",
        ));

        assert_eq!(
            history.event(EventKind::Failed).unwrap().detail.as_deref(),
            Some("Node has hardware failure")
        );
    }
}
