//! Inbound event → cache invalidation dispatch table
//!
//! Every server push names an entity that changed. Instead of one hand-written
//! handler per event, the router holds a declarative table mapping the event
//! name to the cache keys that must be refetched:
//!
//! ```text
//! "caseUpdated" {id: "case-42"} ──▶ [cases]
//!                               ──▶ [case, case-42]
//! ```
//!
//! Templates reference payload fields with `{field}` segments. Unknown events
//! are ignored, not errors.

use crate::core::cache::{CacheInvalidator, QueryKey};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// One segment of a cache key template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    /// Fixed text
    Literal(String),
    /// Value of a payload field
    Field(String),
}

/// Cache key template, e.g. `["case", "{id}"]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct KeyTemplate {
    segments: Vec<KeySegment>,
}

impl From<Vec<String>> for KeyTemplate {
    fn from(raw: Vec<String>) -> Self {
        let segments = raw
            .into_iter()
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(field) if !field.is_empty() => KeySegment::Field(field.to_string()),
                _ => KeySegment::Literal(s),
            })
            .collect();
        Self { segments }
    }
}

impl From<KeyTemplate> for Vec<String> {
    fn from(template: KeyTemplate) -> Self {
        template
            .segments
            .into_iter()
            .map(|s| match s {
                KeySegment::Literal(text) => text,
                KeySegment::Field(field) => format!("{{{}}}", field),
            })
            .collect()
    }
}

impl KeyTemplate {
    /// Parse a template from string segments
    pub fn parse<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from(segments.into_iter().map(Into::into).collect::<Vec<String>>())
    }

    /// Render the key for a payload
    ///
    /// Returns `None` when a referenced field is missing or not a scalar.
    pub fn render(&self, payload: &Value) -> Option<QueryKey> {
        let mut rendered = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                KeySegment::Literal(text) => rendered.push(text.clone()),
                KeySegment::Field(field) => match payload.get(field)? {
                    Value::String(s) if !s.is_empty() => rendered.push(s.clone()),
                    Value::Number(n) => rendered.push(n.to_string()),
                    _ => return None,
                },
            }
        }
        Some(QueryKey::new(rendered))
    }
}

/// Event name → key templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTable {
    routes: IndexMap<String, Vec<KeyTemplate>>,
}

impl RouteTable {
    /// Empty table
    pub fn empty() -> Self {
        Self {
            routes: IndexMap::new(),
        }
    }

    /// Register (or replace) the keys for an event
    pub fn insert(&mut self, event: impl Into<String>, templates: Vec<KeyTemplate>) {
        self.routes.insert(event.into(), templates);
    }

    pub fn get(&self, event: &str) -> Option<&[KeyTemplate]> {
        self.routes.get(event).map(Vec::as_slice)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.routes.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Keys an event invalidates for a given payload
    pub fn keys_for(&self, event: &str, payload: &Value) -> Vec<QueryKey> {
        self.routes
            .get(event)
            .map(|templates| templates.iter().filter_map(|t| t.render(payload)).collect())
            .unwrap_or_default()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        let t = |segments: &[&str]| KeyTemplate::parse(segments.iter().copied());
        let mut table = Self::empty();

        table.insert("caseUpdated", vec![t(&["cases"]), t(&["case", "{id}"])]);
        table.insert("newCase", vec![t(&["cases"]), t(&["dashboard"])]);
        table.insert(
            "caseDeleted",
            vec![t(&["cases"]), t(&["case", "{id}"]), t(&["dashboard"])],
        );
        table.insert(
            "caseStatusChanged",
            vec![t(&["cases"]), t(&["case", "{id}"]), t(&["dashboard"])],
        );
        table.insert("caseAssigned", vec![t(&["cases"]), t(&["case", "{id}"])]);

        table.insert("userCreated", vec![t(&["users"])]);
        for event in ["userUpdated", "userDeleted", "userRoleChanged", "userStatusChanged"] {
            table.insert(event, vec![t(&["users"]), t(&["user", "{id}"])]);
        }

        table.insert("adminNotice", vec![t(&["admin", "notices"])]);
        table.insert("systemNotification", vec![t(&["notifications"])]);
        table
    }
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub dispatched: u64,
    pub ignored: u64,
}

/// Routes inbound events to cache invalidations
pub struct EventRouter {
    table: RwLock<RouteTable>,
    cache: Arc<dyn CacheInvalidator>,
    dispatched: AtomicU64,
    ignored: AtomicU64,
}

impl EventRouter {
    pub fn new(table: RouteTable, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self {
            table: RwLock::new(table),
            cache,
            dispatched: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
        }
    }

    /// Register a route, replacing any existing entry for the same event
    pub fn register(&self, event: impl Into<String>, templates: Vec<KeyTemplate>) {
        if let Ok(mut table) = self.table.write() {
            table.insert(event, templates);
        }
    }

    /// Whether an event name has a route
    pub fn handles(&self, event: &str) -> bool {
        self.table.read().map(|t| t.contains(event)).unwrap_or(false)
    }

    /// Snapshot of registered event names
    pub fn event_names(&self) -> Vec<String> {
        self.table
            .read()
            .map(|t| t.event_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Invalidate every key associated with an event
    ///
    /// Returns the keys that were invalidated (empty for unknown events).
    pub fn dispatch(&self, event: &str, payload: &Value) -> Vec<QueryKey> {
        let keys = match self.table.read() {
            Ok(table) if table.contains(event) => table.keys_for(event, payload),
            Ok(_) => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(event = event, "No route for inbound event, ignoring");
                return Vec::new();
            }
            Err(_) => return Vec::new(),
        };

        for key in &keys {
            self.cache.invalidate(key);
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(event = event, keys = keys.len(), "Invalidated cache keys");
        keys
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}
