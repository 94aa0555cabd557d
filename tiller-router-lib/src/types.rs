use serde::{Deserialize, Serialize};

/// A route row as persisted in the route store.
///
/// The logical key is the lowercased `domain`; `id` is derived from it with
/// [`route_id`] so that repeated upserts of the same domain collide on the
/// same row. TLS material is carried as PEM strings until the route table
/// parses it, at which point the strings are cleared from the in-memory
/// record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub id: String,

    /// Exact domain or wildcard form `*.suffix`.
    pub domain: String,

    /// Discovery service name whose live members form the backend pool.
    pub service: String,

    /// Enables cookie session affinity.
    #[serde(default)]
    pub sticky: bool,

    /// PEM certificate chain, if the route terminates TLS.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_cert: String,

    /// PEM private key, if the route terminates TLS.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_key: String,
}

impl Route {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Route {
            domain: domain.into(),
            service: service.into(),
            ..Default::default()
        }
    }
}

/// Derives the canonical route id for a domain.
pub fn route_id(domain: &str) -> String {
    format!("{:x}", md5::compute(domain.as_bytes()))
}

/// Kind of a route-change event published on the watch manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Set,
    Remove,
}

/// A route-change event. `Set` carries the route's domain so external
/// viewers see domains changing; `Remove` carries the route id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEvent {
    pub event: EventKind,
    pub id: String,
}

impl RouteEvent {
    pub fn set(id: impl Into<String>) -> Self {
        RouteEvent { event: EventKind::Set, id: id.into() }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        RouteEvent { event: EventKind::Remove, id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_id_is_md5_hex_of_domain() {
        let id = route_id("example.test");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, route_id("example.test"));
        assert_ne!(id, route_id("other.test"));
    }

    #[test]
    fn event_serializes_with_lowercase_kind() {
        let json = serde_json::to_string(&RouteEvent::set("example.test")).unwrap();
        assert_eq!(json, r#"{"event":"set","id":"example.test"}"#);
    }
}
