//! Concurrent application of write events.
//!
//! The calling thread pulls events from the parser and feeds a bounded
//! channel drained by a scoped worker pool, the same producer/worker shape
//! the backup pipeline uses. The channel bound is the backpressure: the
//! producer only pulls another event when a slot frees up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::import::event::{Heartbeat, ParseMode, WriteEvent};
use crate::import::tracker::ProgressTracker;
use crate::storage::{Entity, EntityRef, EntityStore};

/// Outcome of one pass over a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Events handed to the worker pool.
    pub dispatched: u64,
    /// Events passed over because an earlier attempt already counted them.
    pub skipped: u64,
    /// The failure policy halted intake before the stream ended.
    pub stopped_early: bool,
}

/// Applies one file's events to the entity store.
pub struct WriteEventExecutor<'a> {
    store: &'a dyn EntityStore,
    application_id: Uuid,
    file_name: &'a str,
    workers: usize,
    heartbeat_interval: u64,
}

impl<'a> WriteEventExecutor<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn EntityStore,
        application_id: Uuid,
        file_name: &'a str,
        workers: usize,
        heartbeat_interval: u64,
    ) -> Self {
        Self {
            store,
            application_id,
            file_name,
            workers: workers.max(1),
            heartbeat_interval: heartbeat_interval.max(1),
        }
    }

    /// Run one pass to completion.
    ///
    /// Entity events (pass 1) or connection events (pass 2) already counted
    /// by `tracker` are skipped. Intake stops once the tracker's stop
    /// condition for the pass holds; events already dispatched still finish.
    ///
    /// # Errors
    ///
    /// Returns the stream's error (usually `Error::Parse`) after draining the
    /// events dispatched before it. Nothing is persisted for it here.
    pub fn run_pass<I>(
        &self,
        events: I,
        mode: ParseMode,
        tracker: &ProgressTracker<'_>,
        heartbeat: &dyn Heartbeat,
    ) -> Result<PassStats>
    where
        I: IntoIterator<Item = Result<WriteEvent>>,
    {
        let mut to_skip = match mode {
            ParseMode::EntitiesOnly => tracker.total_entities(),
            ParseMode::ConnectionsAndDictionaries => tracker.total_connections(),
        };
        let processed = AtomicU64::new(0);
        let (tx, rx) = crossbeam_channel::bounded::<WriteEvent>(self.workers * 2);

        let (stats, outcome) = thread::scope(|s| {
            for _ in 0..self.workers {
                let rx = rx.clone();
                let processed = &processed;
                s.spawn(move || {
                    for event in rx {
                        self.apply(event, tracker);
                        let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                        if done % self.heartbeat_interval == 0 {
                            heartbeat.beat();
                        }
                    }
                });
            }
            drop(rx);

            let mut stats = PassStats::default();
            let mut outcome = Ok(());
            for item in events {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                };
                if stop_requested(mode, tracker) {
                    stats.stopped_early = true;
                    break;
                }
                let counted = matches!(
                    (&event, mode),
                    (WriteEvent::Entity { .. }, ParseMode::EntitiesOnly)
                        | (WriteEvent::Connection { .. }, ParseMode::ConnectionsAndDictionaries)
                );
                if counted && to_skip > 0 {
                    to_skip -= 1;
                    stats.skipped += 1;
                    continue;
                }
                if tx.send(event).is_err() {
                    break;
                }
                stats.dispatched += 1;
            }
            drop(tx);
            (stats, outcome)
        });

        debug!(
            file = self.file_name,
            pass = mode.as_str(),
            dispatched = stats.dispatched,
            skipped = stats.skipped,
            stopped_early = stats.stopped_early,
            "Pass complete"
        );
        outcome.map(|()| stats)
    }

    fn apply(&self, event: WriteEvent, tracker: &ProgressTracker<'_>) {
        let recorded = match event {
            WriteEvent::Entity {
                uuid: Some(uuid),
                entity_type,
                properties,
            } => {
                let entity = Entity {
                    uuid,
                    entity_type,
                    properties,
                };
                match self.store.create_entity(self.application_id, &entity) {
                    Ok(()) => {
                        tracker.entity_written();
                        Ok(())
                    }
                    Err(e) => tracker.entity_failed(&self.from_file(&e)),
                }
            }
            WriteEvent::Entity { uuid: None, .. } => tracker.entity_failed(&self.from_file(
                &Error::EntityWrite("Entity metadata is missing a valid uuid".into()),
            )),
            WriteEvent::Connection {
                source,
                relation,
                target,
            } => match self.connect(&source, &relation, target) {
                Ok(()) => {
                    tracker.connection_written();
                    Ok(())
                }
                Err(e) => tracker.connection_failed(&self.from_file(&e)),
            },
            WriteEvent::Dictionary {
                owner,
                name,
                entries,
            } => {
                if let Err(e) =
                    self.store
                        .merge_dictionary(self.application_id, owner, &name, &entries)
                {
                    tracker.dictionary_failed(&self.from_file(&e));
                }
                Ok(())
            }
        };

        if let Err(e) = recorded.and_then(|()| tracker.maybe_flush().map(|_| ())) {
            warn!(file = self.file_name, error = %e, "Failed to record import progress");
        }
    }

    /// Create an edge, looking up the source's type if the event lacks it.
    fn connect(&self, source: &EntityRef, relation: &str, target: Uuid) -> Result<()> {
        let source = match &source.entity_type {
            Some(_) => source.clone(),
            None => {
                let entity = self
                    .store
                    .get_entity(self.application_id, source.uuid)?
                    .ok_or_else(|| {
                        Error::EntityWrite(format!("Source entity {} does not exist", source.uuid))
                    })?;
                EntityRef {
                    uuid: source.uuid,
                    entity_type: Some(entity.entity_type),
                }
            }
        };
        self.store
            .create_connection(self.application_id, &source, relation, target)
    }

    fn from_file(&self, err: &Error) -> String {
        format!("{err} From file: {}", self.file_name)
    }
}

fn stop_requested(mode: ParseMode, tracker: &ProgressTracker<'_>) -> bool {
    match mode {
        ParseMode::EntitiesOnly => tracker.should_stop_processing_entities(),
        ParseMode::ConnectionsAndDictionaries => tracker.should_stop_processing_connections(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::import::testing::{JournalingStore, RecordingStore};
    use crate::model::{FileTask, JobState};
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;

    const FILE: &str = "acme/shop.users.1.json";

    fn task() -> FileTask {
        let mut task = FileTask::new(Uuid::new_v4(), FILE, Uuid::new_v4(), "users");
        task.state = JobState::Started;
        task
    }

    fn entity(uuid: Uuid) -> Result<WriteEvent> {
        Ok(WriteEvent::Entity {
            uuid: Some(uuid),
            entity_type: "user".into(),
            properties: Map::new(),
        })
    }

    fn like(source: Uuid, target: Uuid) -> Result<WriteEvent> {
        Ok(WriteEvent::Connection {
            source: EntityRef::untyped(source),
            relation: "likes".into(),
            target,
        })
    }

    #[test]
    fn test_entities_then_connections() {
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        let store = JournalingStore::new([]);
        let progress = RecordingStore::default();
        let task = task();
        let app = task.application_id;
        let tracker = ProgressTracker::new(&progress, task, 100, FailurePolicy::FailFast);
        let executor = WriteEventExecutor::new(&store, app, FILE, 4, 50);

        executor
            .run_pass(ids.iter().map(|id| entity(*id)), ParseMode::EntitiesOnly, &tracker, &|| {})
            .unwrap();
        executor
            .run_pass(
                vec![like(ids[0], ids[1]), like(ids[1], ids[0])],
                ParseMode::ConnectionsAndDictionaries,
                &tracker,
                &|| {},
            )
            .unwrap();

        let journal = store.journal();
        let first_connection = journal.iter().position(|e| e.starts_with("connection")).unwrap();
        assert_eq!(first_connection, 10);
        assert_eq!(tracker.entities_written(), 10);
        assert_eq!(tracker.connections_written(), 2);
        assert_eq!(
            store.inner().connections_from(app, ids[0]).unwrap(),
            vec![("likes".to_string(), ids[1])]
        );
    }

    #[test]
    fn test_failure_stops_intake() {
        let ids: Vec<Uuid> = (0..200).map(|_| Uuid::new_v4()).collect();
        let store = JournalingStore::new([ids[0]]);
        let progress = RecordingStore::default();
        let task = task();
        let app = task.application_id;
        let tracker = ProgressTracker::new(&progress, task, 1000, FailurePolicy::FailFast);
        let executor = WriteEventExecutor::new(&store, app, FILE, 1, 50);

        let stats = executor
            .run_pass(ids.iter().map(|id| entity(*id)), ParseMode::EntitiesOnly, &tracker, &|| {})
            .unwrap();

        assert!(stats.stopped_early);
        assert!(stats.dispatched < 200);
        assert_eq!(tracker.entities_failed(), 1);
        let failures = progress.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].message,
            format!("Rejected entity {} From file: {FILE}", ids[0])
        );
    }

    #[test]
    fn test_resume_skips_counted_events() {
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        let store = JournalingStore::new([]);
        let progress = RecordingStore::default();
        let mut task = task();
        task.entities_imported = 6;
        let app = task.application_id;
        let tracker = ProgressTracker::new(&progress, task, 100, FailurePolicy::FailFast);
        let executor = WriteEventExecutor::new(&store, app, FILE, 2, 50);

        let stats = executor
            .run_pass(ids.iter().map(|id| entity(*id)), ParseMode::EntitiesOnly, &tracker, &|| {})
            .unwrap();

        assert_eq!(stats.skipped, 6);
        assert_eq!(stats.dispatched, 4);
        assert_eq!(tracker.entities_written(), 10);
        let mut written: Vec<String> = store.journal();
        written.sort();
        let mut expected: Vec<String> = ids[6..].iter().map(|id| format!("entity {id}")).collect();
        expected.sort();
        assert_eq!(written, expected);
    }

    #[test]
    fn test_heartbeat_cadence() {
        let ids: Vec<Uuid> = (0..120).map(|_| Uuid::new_v4()).collect();
        let store = JournalingStore::new([]);
        let progress = RecordingStore::default();
        let task = task();
        let app = task.application_id;
        let tracker = ProgressTracker::new(&progress, task, 1000, FailurePolicy::FailFast);
        let executor = WriteEventExecutor::new(&store, app, FILE, 3, 50);
        let beats = AtomicUsize::new(0);

        executor
            .run_pass(
                ids.iter().map(|id| entity(*id)),
                ParseMode::EntitiesOnly,
                &tracker,
                &|| {
                    beats.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        assert_eq!(beats.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stream_error_drains_and_returns() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let store = JournalingStore::new([]);
        let progress = RecordingStore::default();
        let task = task();
        let app = task.application_id;
        let tracker = ProgressTracker::new(&progress, task, 100, FailurePolicy::FailFast);
        let executor = WriteEventExecutor::new(&store, app, FILE, 2, 50);

        let mut events: Vec<Result<WriteEvent>> = ids.iter().map(|id| entity(*id)).collect();
        events.push(Err(Error::Parse("EOF while parsing a list".into())));
        events.push(entity(Uuid::new_v4()));

        let err = executor
            .run_pass(events, ParseMode::EntitiesOnly, &tracker, &|| {})
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(tracker.entities_written(), 3);
    }

    #[test]
    fn test_connection_to_unknown_source_fails() {
        let store = JournalingStore::new([]);
        let progress = RecordingStore::default();
        let task = task();
        let app = task.application_id;
        let tracker = ProgressTracker::new(&progress, task, 100, FailurePolicy::FailFast);
        let executor = WriteEventExecutor::new(&store, app, FILE, 1, 50);

        executor
            .run_pass(
                vec![like(Uuid::new_v4(), Uuid::new_v4())],
                ParseMode::ConnectionsAndDictionaries,
                &tracker,
                &|| {},
            )
            .unwrap();

        assert_eq!(tracker.connections_failed(), 1);
        assert!(progress.failures()[0].message.contains("does not exist"));
        assert_eq!(progress.failures()[0].kind, crate::model::FailureKind::Connection);
    }

    #[test]
    fn test_dictionary_failure_is_not_counted() {
        let store = JournalingStore::new([]);
        let progress = RecordingStore::default();
        let task = task();
        let app = task.application_id;
        let tracker = ProgressTracker::new(&progress, task, 100, FailurePolicy::FailFast);
        let executor = WriteEventExecutor::new(&store, app, FILE, 1, 50);

        executor
            .run_pass(
                vec![Ok(WriteEvent::Dictionary {
                    owner: Uuid::new_v4(),
                    name: "prefs".into(),
                    entries: Map::new(),
                })],
                ParseMode::ConnectionsAndDictionaries,
                &tracker,
                &|| {},
            )
            .unwrap();

        assert_eq!(tracker.connections_failed(), 0);
        assert!(!tracker.should_stop_processing_connections());
        assert_eq!(tracker.complete().unwrap(), JobState::Finished);
        assert!(progress.saves()[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("From file:"));
    }
}
