//! Streaming two-pass parser for import files.
//!
//! An import file is a JSON array of records:
//!
//! ```json
//! [
//!   {
//!     "Metadata": {"uuid": "...", "type": "user", "name": "..."},
//!     "connections": {"likes": ["<uuid>", "..."]},
//!     "dictionaries": {"prefs": {"theme": "dark"}}
//!   }
//! ]
//! ```
//!
//! The file is read incrementally by a serde visitor running on its own
//! thread, which pushes events into a bounded channel. Only one record is
//! held in memory at a time, and the channel bound keeps the parser from
//! running far ahead of the consumer. Dropping the [`EventStream`] stops
//! the scan.
//!
//! Every call to [`EntityParser::events`] rescans from the start; resume
//! relies on the file yielding events in the same order each time.

use std::cell::Cell;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::import::event::{ParseMode, WriteEvent};
use crate::import::naming::singularize;
use crate::storage::EntityRef;

const CHANNEL_CAPACITY: usize = 64;

const CONSUMER_GONE: &str = "event consumer went away";

/// Produces write events from one local import file.
#[derive(Debug, Clone)]
pub struct EntityParser {
    path: PathBuf,
    default_type: String,
}

impl EntityParser {
    /// Parser for a file of the given collection. Records without an
    /// explicit type get the collection's singular form.
    #[must_use]
    pub fn new(path: &Path, collection: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            default_type: singularize(collection),
        }
    }

    /// Start a scan in the given mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the parser thread
    /// cannot be started.
    pub fn events(&self, mode: ParseMode) -> Result<EventStream> {
        let file = File::open(&self.path)?;
        let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let default_type = self.default_type.clone();
        let path = self.path.clone();

        let handle = std::thread::Builder::new()
            .name(format!("hoist-parse-{}", mode.as_str()))
            .spawn(move || scan(file, mode, &default_type, &tx, &path))?;

        Ok(EventStream {
            rx: Some(rx),
            handle: Some(handle),
        })
    }
}

/// Lazy sequence of events from one scan.
///
/// Ends after the top-level array closes. A structural error is delivered
/// as a final `Err(Error::Parse)`.
pub struct EventStream {
    rx: Option<Receiver<Result<WriteEvent>>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for EventStream {
    type Item = Result<WriteEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.rx.as_ref()?.recv().ok();
        if item.is_some() {
            return item;
        }
        self.rx = None;
        match self.handle.take().map(JoinHandle::join) {
            Some(Err(_)) => Some(Err(Error::Other("parser thread panicked".into()))),
            _ => None,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // Disconnect first so a blocked producer fails its next send.
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Parser thread panicked");
            }
        }
    }
}

fn scan(
    file: File,
    mode: ParseMode,
    default_type: &str,
    tx: &Sender<Result<WriteEvent>>,
    path: &Path,
) {
    let ctx = ScanContext {
        mode,
        default_type,
        tx,
        gone: Cell::new(false),
    };
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(file));
    match FileSeed(&ctx).deserialize(&mut de) {
        Ok(()) => debug!(path = %path.display(), mode = mode.as_str(), "Finished scanning file"),
        Err(_) if ctx.gone.get() => {
            debug!(path = %path.display(), "Scan abandoned by consumer");
        }
        Err(e) => {
            // The consumer may already be gone; nothing left to report to.
            let _ = tx.send(Err(Error::Parse(e.to_string())));
        }
    }
}

struct ScanContext<'a> {
    mode: ParseMode,
    default_type: &'a str,
    tx: &'a Sender<Result<WriteEvent>>,
    gone: Cell<bool>,
}

impl ScanContext<'_> {
    fn emit<E: de::Error>(&self, event: WriteEvent) -> std::result::Result<(), E> {
        if self.tx.send(Ok(event)).is_err() {
            self.gone.set(true);
            return Err(E::custom(CONSUMER_GONE));
        }
        Ok(())
    }
}

/// The top-level array.
struct FileSeed<'c, 'a>(&'c ScanContext<'a>);

impl<'de> DeserializeSeed<'de> for FileSeed<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for FileSeed<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON array of entity records")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while seq.next_element_seed(RecordSeed(self.0))?.is_some() {}
        Ok(())
    }
}

/// One element of the array.
struct RecordSeed<'c, 'a>(&'c ScanContext<'a>);

impl<'de> DeserializeSeed<'de> for RecordSeed<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

/// Only the identifier of `Metadata` matters in pass 2.
#[derive(Deserialize)]
struct MetadataId {
    #[serde(default)]
    uuid: Option<Value>,
}

impl<'de> Visitor<'de> for RecordSeed<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an entity record object")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let ctx = self.0;
        // None: no Metadata seen. Some(None): Metadata without a usable uuid.
        let mut owner: Option<Option<Uuid>> = None;
        let mut connections: Option<Map<String, Value>> = None;
        let mut dictionaries: Option<Map<String, Value>> = None;

        while let Some(key) = map.next_key::<String>()? {
            match (key.as_str(), ctx.mode) {
                ("Metadata", ParseMode::EntitiesOnly) => {
                    let metadata: Map<String, Value> = map.next_value()?;
                    ctx.emit::<A::Error>(entity_event(metadata, ctx.default_type))?;
                }
                ("Metadata", ParseMode::ConnectionsAndDictionaries) => {
                    let id: MetadataId = map.next_value()?;
                    owner = Some(id.uuid.as_ref().and_then(uuid_value));
                }
                ("connections", ParseMode::ConnectionsAndDictionaries) => {
                    connections = Some(map.next_value()?);
                }
                ("dictionaries", ParseMode::ConnectionsAndDictionaries) => {
                    dictionaries = Some(map.next_value()?);
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        let Some(Some(owner)) = owner else {
            return Ok(());
        };

        for (relation, targets) in connections.unwrap_or_default() {
            let Value::Array(targets) = targets else {
                return Err(de::Error::custom(format!(
                    "connections '{relation}' of {owner} must be an array of uuids"
                )));
            };
            for target in &targets {
                let target = uuid_value(target).ok_or_else(|| {
                    <A::Error as de::Error>::custom(format!(
                        "connection '{relation}' of {owner} has an invalid target {target}"
                    ))
                })?;
                ctx.emit::<A::Error>(WriteEvent::Connection {
                    source: EntityRef::untyped(owner),
                    relation: relation.clone(),
                    target,
                })?;
            }
        }

        for (name, entries) in dictionaries.unwrap_or_default() {
            let Value::Object(entries) = entries else {
                return Err(de::Error::custom(format!(
                    "dictionary '{name}' of {owner} must be an object"
                )));
            };
            ctx.emit::<A::Error>(WriteEvent::Dictionary {
                owner,
                name,
                entries,
            })?;
        }
        Ok(())
    }
}

fn uuid_value(value: &Value) -> Option<Uuid> {
    value.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

fn entity_event(mut metadata: Map<String, Value>, default_type: &str) -> WriteEvent {
    let uuid = metadata.remove("uuid").as_ref().and_then(uuid_value);
    let entity_type = match metadata.remove("type") {
        Some(Value::String(t)) if !t.trim().is_empty() => t,
        _ => default_type.to_string(),
    };
    WriteEvent::Entity {
        uuid,
        entity_type,
        properties: metadata,
    }
}
