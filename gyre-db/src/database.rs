//! The serialized database operation pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gyre_oplog::{EncodedEntry, Identity, Keystore, Log};
use gyre_store::Storage;
use gyre_sync::{PubSub, Sync};

use crate::{Error, Operation, Result};

/// Capacity of the events channel. Senders drop with a warning when full;
/// events are best-effort and consumers must not rely on seeing every one.
const EVENT_CAP: usize = 256;

/// Capacity of the task queue. When full, callers block until the worker
/// catches up.
const ACTION_CAP: usize = 64;

/// Notifications emitted by a database instance.
#[derive(Debug, Clone)]
pub enum Event {
    /// An entry was appended locally or joined from a peer.
    Entry(EncodedEntry),
    /// The database was dropped (all entries cleared).
    Drop,
}

enum Action {
    AddOperation {
        payload: String,
        reply: oneshot::Sender<Result<EncodedEntry>>,
    },
    ApplyEntry {
        bytes: Bytes,
    },
    Clear {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// A replicated database instance.
///
/// Owns a [`Log`], a [`Sync`] instance on the log's topic, and a bounded
/// task queue drained by a dedicated worker thread. Every mutation — local
/// writes and entries received from peers alike — goes through that single
/// worker, so no further locking is needed across log, sync, and events,
/// and the order of [`Event`]s matches the order tasks entered the queue.
#[derive(Debug)]
pub struct Database {
    address: String,
    name: String,
    log: Arc<Log>,
    sync: Arc<Sync>,
    actions: flume::Sender<Action>,
    events_rx: flume::Receiver<Event>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
    listener_cancel: CancellationToken,
}

impl Database {
    /// Open a database on log `address`, gossiping as `peer_id`.
    ///
    /// `entry_storage` and `keystore` default to in-memory instances. Must
    /// be called from within a tokio runtime: sync and the listener task are
    /// spawned on it.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        address: &str,
        name: &str,
        identity: Identity,
        entry_storage: Option<Arc<dyn Storage>>,
        keystore: Option<Keystore>,
        peer_id: &str,
        pubsub: Arc<dyn PubSub>,
    ) -> Result<Database> {
        if address.is_empty() {
            return Err(Error::InvalidArgument("address is required".into()));
        }

        let log = Arc::new(Log::new(address, identity, entry_storage, keystore)?);
        let sync = Arc::new(Sync::new(peer_id, pubsub, log.clone()));
        sync.start()?;

        let (actions_tx, actions_rx) = flume::bounded(ACTION_CAP);
        let (events_tx, events_rx) = flume::bounded(EVENT_CAP);

        let worker = {
            let log = log.clone();
            let sync = sync.clone();
            thread::spawn(move || run_worker(log, sync, events_tx, actions_rx))
        };

        let listener_cancel = CancellationToken::new();
        let listener = {
            let synced = sync.synced();
            let actions = actions_tx.clone();
            let cancel = listener_cancel.clone();
            tokio::spawn(async move {
                loop {
                    let synced_entry = tokio::select! {
                        _ = cancel.cancelled() => break,
                        msg = synced.recv_async() => match msg {
                            Ok(msg) => msg,
                            Err(_) => break,
                        },
                    };
                    let bytes = synced_entry.entry.bytes().clone();
                    if actions
                        .send_async(Action::ApplyEntry { bytes })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        Ok(Database {
            address: address.to_owned(),
            name: name.to_owned(),
            log,
            sync,
            actions: actions_tx,
            events_rx,
            worker: Mutex::new(Some(worker)),
            listener: Mutex::new(Some(listener)),
            listener_cancel,
        })
    }

    /// The log address shared by all replicas of this database.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Caller-chosen database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity signing local writes.
    pub fn identity(&self) -> &Identity {
        self.log.identity()
    }

    /// The underlying log.
    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    /// The sync instance on this log's topic.
    pub fn sync(&self) -> &Arc<Sync> {
        &self.sync
    }

    /// Receiver for database events.
    ///
    /// The channel is bounded and drops when full. Clones of the receiver
    /// compete for events; hand out one receiver per consumer stream.
    pub fn events(&self) -> flume::Receiver<Event> {
        self.events_rx.clone()
    }

    /// Append an operation to the log and broadcast it to peers.
    ///
    /// Blocks (asynchronously) until the worker has processed the task, and
    /// returns the hash of the new entry.
    pub async fn add_operation(&self, op: &Operation) -> Result<String> {
        let payload = op.to_payload()?;
        let (reply, rx) = oneshot::channel();
        self.actions
            .send_async(Action::AddOperation { payload, reply })
            .await
            .map_err(|_| Error::Closed)?;
        let entry = rx.await.map_err(|_| Error::Closed)??;
        Ok(entry.hash().to_owned())
    }

    /// Enqueue canonical entry bytes received from a peer for application.
    ///
    /// The worker decodes the bytes, checks the log id, and joins the entry;
    /// failures are logged, not returned.
    pub async fn apply_operation(&self, bytes: Bytes) -> Result<()> {
        self.actions
            .send_async(Action::ApplyEntry { bytes })
            .await
            .map_err(|_| Error::Closed)
    }

    /// Clear all entries and emit a [`Event::Drop`].
    pub async fn drop_all(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.actions
            .send_async(Action::Clear { reply })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Shut down the pipeline: stop the worker after it finishes queued
    /// tasks, stop sync, and close the log. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Ok(());
        };

        let _ = self.actions.send_async(Action::Shutdown).await;
        if tokio::task::spawn_blocking(move || worker.join())
            .await
            .map(|joined| joined.is_err())
            .unwrap_or(true)
        {
            warn!("database worker did not shut down cleanly");
        }

        self.listener_cancel.cancel();
        self.sync.stop().await?;
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        self.log.close()?;
        debug!("database {} closed", self.address);
        Ok(())
    }
}

fn run_worker(
    log: Arc<Log>,
    sync: Arc<Sync>,
    events: flume::Sender<Event>,
    actions: flume::Receiver<Action>,
) {
    while let Ok(action) = actions.recv() {
        match action {
            Action::AddOperation { payload, reply } => {
                let result = append_and_broadcast(&log, &sync, &payload);
                if let Ok(entry) = &result {
                    emit(&events, Event::Entry(entry.clone()));
                }
                let _ = reply.send(result);
            }
            Action::ApplyEntry { bytes } => apply_entry(&log, &events, &bytes),
            Action::Clear { reply } => {
                let result = log.clear().map_err(Error::from);
                if result.is_ok() {
                    emit(&events, Event::Drop);
                }
                let _ = reply.send(result);
            }
            Action::Shutdown => break,
        }
    }
}

fn append_and_broadcast(log: &Log, sync: &Sync, payload: &str) -> Result<EncodedEntry> {
    let entry = log.append(payload)?;
    sync.broadcast(&entry)?;
    Ok(entry)
}

fn apply_entry(log: &Log, events: &flume::Sender<Event>, bytes: &Bytes) {
    let entry = match EncodedEntry::decode(bytes) {
        Ok(entry) => entry,
        Err(err) => {
            warn!("apply: failed to decode entry: {err}");
            return;
        }
    };
    if entry.id != log.id() {
        warn!(
            "apply: entry id '{}' does not match log id '{}'",
            entry.id,
            log.id()
        );
        return;
    }
    let mut processed = HashSet::new();
    match log.join_entry(&entry, &mut processed) {
        Ok(()) => emit(events, Event::Entry(entry)),
        Err(err) => warn!("apply: failed to join entry {}: {err}", entry.hash()),
    }
}

fn emit(events: &flume::Sender<Event>, event: Event) {
    if events.try_send(event).is_err() {
        warn!("events channel full, dropping event");
    }
}
