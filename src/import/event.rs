//! Write events produced by the parser and applied by the executor.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::storage::EntityRef;

/// Which records one scan of a file yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Pass 1: entity records only.
    EntitiesOnly,
    /// Pass 2: connections and dictionaries, after every entity exists.
    ConnectionsAndDictionaries,
}

impl ParseMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EntitiesOnly => "entities",
            Self::ConnectionsAndDictionaries => "connections",
        }
    }
}

/// One mutation derived from a source file.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEvent {
    /// Create an entity. `uuid` is `None` when the record's metadata did not
    /// carry a usable identifier; applying it records an entity failure.
    Entity {
        uuid: Option<Uuid>,
        entity_type: String,
        properties: Map<String, Value>,
    },
    /// Create the named edge `source -[relation]-> target`.
    Connection {
        source: EntityRef,
        relation: String,
        target: Uuid,
    },
    /// Merge `entries` into the dictionary `name` of `owner`.
    Dictionary {
        owner: Uuid,
        name: String,
        entries: Map<String, Value>,
    },
}

/// Liveness signal raised while a file is being applied.
pub trait Heartbeat: Sync {
    fn beat(&self);
}

impl<F> Heartbeat for F
where
    F: Fn() + Sync,
{
    fn beat(&self) {
        self();
    }
}
