//! Change events delivered to the event consumer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::meta::{Api, AppliedPlugins, Bind, Cluster, Plugin, Proxy, Routing, Server, Status};

/// Which kind of object an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Cluster,
    Server,
    Bind,
    Api,
    Routing,
    Proxy,
    Plugin,
    AppliedPlugins,
    /// Locally synthesized server health transition.
    StatusChanged,
    /// A source this build does not know; logged and ignored.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventSource::Cluster => "cluster",
            EventSource::Server => "server",
            EventSource::Bind => "bind",
            EventSource::Api => "api",
            EventSource::Routing => "routing",
            EventSource::Proxy => "proxy",
            EventSource::Plugin => "plugin",
            EventSource::AppliedPlugins => "applied_plugins",
            EventSource::StatusChanged => "status_changed",
            EventSource::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    New,
    Update,
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::New => "new",
            EventType::Update => "update",
            EventType::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Typed payload of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Cluster(Cluster),
    Server(Server),
    Bind(Bind),
    Api(Api),
    Routing(Routing),
    Proxy(Proxy),
    Plugin(Plugin),
    AppliedPlugins(AppliedPlugins),
    StatusChanged { server_id: u64, status: Status },
}

/// One change to routing state.
///
/// Deletes carry the numeric identity in `key` and no value, except Bind
/// deletes, which carry the full Bind so it can be matched exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub source: EventSource,
    pub kind: EventType,
    pub key: String,
    pub value: Option<EventValue>,
}

impl Event {
    pub fn new(source: EventSource, kind: EventType, key: impl Into<String>, value: EventValue) -> Self {
        Self {
            source,
            kind,
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn delete(source: EventSource, key: impl Into<String>) -> Self {
        Self {
            source,
            kind: EventType::Delete,
            key: key.into(),
            value: None,
        }
    }

    pub fn delete_bind(bind: Bind) -> Self {
        Self::new(EventSource::Bind, EventType::Delete, bind.key(), EventValue::Bind(bind))
    }

    pub fn status_changed(server_id: u64, status: Status) -> Self {
        Self::new(
            EventSource::StatusChanged,
            EventType::Update,
            server_id.to_string(),
            EventValue::StatusChanged { server_id, status },
        )
    }

    /// Numeric identity carried in the key, if it parses.
    pub fn id(&self) -> Option<u64> {
        self.key.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_source_deserializes() {
        #[derive(Deserialize)]
        struct Wire {
            source: EventSource,
        }
        let wire: Wire = toml::from_str(r#"source = "gateway_v9_thing""#).unwrap();
        assert_eq!(wire.source, EventSource::Unknown);

        let wire: Wire = toml::from_str(r#"source = "applied_plugins""#).unwrap();
        assert_eq!(wire.source, EventSource::AppliedPlugins);
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(Event::delete(EventSource::Api, "42").id(), Some(42));
        assert_eq!(Event::delete(EventSource::Api, "abc").id(), None);
        assert_eq!(Event::status_changed(7, Status::Down).id(), Some(7));
    }
}
