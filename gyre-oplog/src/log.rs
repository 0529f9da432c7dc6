//! The append-only log.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use gyre_store::{MemoryStore, Storage, StoreError};

use crate::{EncodedEntry, Entry, Error, Identity, Keystore, LamportClock, Result};

/// A single-writer view of a replicated append-only log.
///
/// Entries live in a [`Storage`] keyed by content hash. Local writes go
/// through [`Log::append`]; remote entries arrive through
/// [`Log::join_entry`] and are deduplicated by hash. `head` tracks the entry
/// with the greatest clock seen so far (hash as tiebreaker), which may have
/// been written locally or merged from a peer.
///
/// A single read/write lock protects the clock, the head, and entry-store
/// writes, so local appends and merges are linearizable.
#[derive(Debug)]
pub struct Log {
    id: String,
    identity: Identity,
    keystore: Keystore,
    entries: Arc<dyn Storage>,
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    clock: LamportClock,
    head: Option<EncodedEntry>,
}

impl Log {
    /// Create a log named `id` owned by `identity`.
    ///
    /// `entry_storage` and `keystore` default to fresh in-memory instances.
    /// A signing key for `identity.id` is created in the keystore if one
    /// does not exist yet.
    pub fn new(
        id: &str,
        identity: Identity,
        entry_storage: Option<Arc<dyn Storage>>,
        keystore: Option<Keystore>,
    ) -> Result<Log> {
        if id.is_empty() {
            return Err(Error::InvalidArgument("log id is required".into()));
        }
        identity.verify()?;

        let entries = entry_storage.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let keystore = keystore.unwrap_or_else(Keystore::memory);
        if !keystore.has_key(&identity.id) {
            keystore.create_key(&identity.id)?;
        }

        let clock = LamportClock::new(identity.id.clone(), 0);
        Ok(Log {
            id: id.to_owned(),
            identity,
            keystore,
            entries,
            state: RwLock::new(State { clock, head: None }),
        })
    }

    /// The log id shared by all entries of this log.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The identity that signs local appends.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Snapshot of the writer clock.
    pub fn clock(&self) -> LamportClock {
        self.state.read().clock.clone()
    }

    /// Append a new entry carrying `payload`.
    ///
    /// Ticks the writer clock, links the entry to the current head, signs
    /// and stores it, and makes it the new head. On failure neither the
    /// clock nor the head change.
    pub fn append(&self, payload: &str) -> Result<EncodedEntry> {
        if payload.is_empty() {
            return Err(Error::InvalidArgument("payload is required".into()));
        }

        let mut state = self.state.write();
        let clock = state.clock.tick();
        let next = state
            .head
            .as_ref()
            .map(|head| vec![head.hash().to_owned()])
            .unwrap_or_default();

        let entry = Entry::create(
            &self.keystore,
            &self.identity,
            &self.id,
            payload,
            clock.clone(),
            next,
            Vec::new(),
        )?;
        self.entries.put(entry.hash(), entry.bytes().clone())?;

        state.clock = clock;
        state.head = Some(entry.clone());
        Ok(entry)
    }

    /// Load the entry stored under `hash`.
    ///
    /// Distinguishes a missing entry ([`Error::NotFound`] via the store), a
    /// malformed record ([`Error::Codec`]), and a forged record
    /// ([`Error::InvalidSignature`]).
    pub fn get(&self, hash: &str) -> Result<EncodedEntry> {
        let _state = self.state.read();
        self.get_inner(hash)
    }

    /// All entries, sorted ascending by clock with hash as tiebreaker.
    ///
    /// Entries that fail to decode or verify are skipped with a warning.
    pub fn values(&self) -> Result<Vec<EncodedEntry>> {
        let _state = self.state.read();
        let mut entries = Vec::new();
        for (hash, bytes) in self.entries.iter()? {
            let entry = match EncodedEntry::decode(&bytes) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping undecodable entry {hash}: {err}");
                    continue;
                }
            };
            if let Err(err) = entry.verify() {
                warn!("skipping entry with invalid signature {hash}: {err}");
                continue;
            }
            entries.push(entry);
        }
        entries.sort_by(|a, b| a.clock.cmp(&b.clock).then_with(|| a.hash().cmp(b.hash())));
        Ok(entries)
    }

    /// Depth-first traversal along `next` references.
    ///
    /// Starts at `start` (or the head when `None`). `should_stop` is applied
    /// after an entry has been collected; returning `true` ends the
    /// traversal. A visited set makes the walk cycle-safe; entries with
    /// invalid signatures and unresolvable references are skipped with a
    /// warning.
    pub fn traverse(
        &self,
        start: Option<&str>,
        mut should_stop: impl FnMut(&EncodedEntry) -> bool,
    ) -> Result<Vec<EncodedEntry>> {
        let state = self.state.read();

        let mut stack = match start {
            Some(hash) => vec![self.get_inner(hash)?],
            None => match &state.head {
                Some(head) => vec![head.clone()],
                None => {
                    return Err(Error::NotFound("no starting point for traversal".into()));
                }
            },
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut traversed = Vec::new();

        while let Some(entry) = stack.pop() {
            if visited.contains(entry.hash()) {
                continue;
            }
            if let Err(err) = entry.verify() {
                warn!("skipping entry with invalid signature {}: {err}", entry.hash());
                continue;
            }
            visited.insert(entry.hash().to_owned());

            let stop = should_stop(&entry);
            let next = entry.next.clone();
            traversed.push(entry);
            if stop {
                break;
            }

            for hash in &next {
                match self.get_inner(hash) {
                    Ok(next_entry) => stack.push(next_entry),
                    Err(err) => warn!("failed to load next entry {hash}: {err}"),
                }
            }
        }

        Ok(traversed)
    }

    /// Merge a single remote entry into the log.
    ///
    /// The entry must belong to this log and carry a valid signature.
    /// `processed` deduplicates across a batch of joins; entries already in
    /// it are ignored. The head moves if the entry's `(clock, hash)` exceeds
    /// the current head's.
    pub fn join_entry(
        &self,
        entry: &EncodedEntry,
        processed: &mut HashSet<String>,
    ) -> Result<()> {
        if entry.id != self.id {
            return Err(Error::InvalidArgument(format!(
                "entry id '{}' does not match log id '{}'",
                entry.id, self.id
            )));
        }
        if !entry.entry().is_valid() {
            return Err(Error::InvalidArgument(format!(
                "malformed entry {}",
                entry.hash()
            )));
        }
        entry.verify()?;

        let mut state = self.state.write();
        let mut stack = vec![entry.clone()];
        while let Some(current) = stack.pop() {
            if !processed.insert(current.hash().to_owned()) {
                continue;
            }
            self.entries.put(current.hash(), current.bytes().clone())?;

            let moves_head = match &state.head {
                None => true,
                Some(head) => {
                    (&current.clock, current.hash()) > (&head.clock, head.hash())
                }
            };
            if moves_head {
                state.head = Some(current);
            }
        }
        Ok(())
    }

    /// Merge every entry of `other` into this log.
    ///
    /// Per-entry failures are logged and skipped.
    pub fn join(&self, other: &Log) -> Result<()> {
        if other.id != self.id {
            return Err(Error::InvalidArgument(format!(
                "log id '{}' does not match other log id '{}'",
                self.id, other.id
            )));
        }
        let mut processed = HashSet::new();
        for entry in other.values()? {
            if let Err(err) = self.join_entry(&entry, &mut processed) {
                warn!("skipping entry {} during join: {err}", entry.hash());
            }
        }
        Ok(())
    }

    /// The current head, or [`Error::NotFound`] for an empty log.
    pub fn head(&self) -> Result<EncodedEntry> {
        self.state
            .read()
            .head
            .clone()
            .ok_or_else(|| Error::NotFound("log head".into()))
    }

    /// Remove all entries and reset the head.
    ///
    /// The writer clock is kept, so later appends do not reuse clock values
    /// that replicas may already hold.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        self.entries.clear()?;
        state.head = None;
        Ok(())
    }

    /// Close the underlying entry storage.
    pub fn close(&self) -> Result<()> {
        self.entries.close()?;
        Ok(())
    }

    fn get_inner(&self, hash: &str) -> Result<EncodedEntry> {
        let bytes = match self.entries.get(hash) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                return Err(Error::NotFound(format!("entry {hash}")));
            }
            Err(err) => return Err(err.into()),
        };
        let entry = EncodedEntry::decode(&bytes)?;
        entry.verify()?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rand::seq::SliceRandom;

    use super::*;

    fn new_log(log_id: &str, writer: &str) -> Log {
        let keystore = Keystore::memory();
        let identity = Identity::create(&keystore, writer).unwrap();
        Log::new(log_id, identity, None, Some(keystore)).unwrap()
    }

    #[test]
    fn append_ticks_clock_and_moves_head() -> Result<()> {
        let log = new_log("log", "writer");
        assert!(matches!(log.head(), Err(Error::NotFound(_))));

        let first = log.append("one")?;
        assert_eq!(first.clock.time(), 1);
        assert!(first.next.is_empty());

        let second = log.append("two")?;
        assert_eq!(second.clock.time(), 2);
        assert_eq!(second.next, vec![first.hash().to_owned()]);
        assert_eq!(log.head()?.hash(), second.hash());
        assert_eq!(log.clock().time(), 2);
        Ok(())
    }

    #[test]
    fn empty_payload_is_rejected() {
        let log = new_log("log", "writer");
        assert!(matches!(log.append(""), Err(Error::InvalidArgument(_))));
        assert_eq!(log.clock().time(), 0);
    }

    #[test]
    fn get_returns_verified_entries() -> Result<()> {
        let log = new_log("log", "writer");
        let entry = log.append("payload")?;
        let loaded = log.get(entry.hash())?;
        assert_eq!(loaded, entry);
        assert!(matches!(log.get("zmissing"), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn values_are_sorted_by_clock() -> Result<()> {
        let log = new_log("log", "writer");
        log.append("a")?;
        log.append("b")?;
        log.append("c")?;

        let values = log.values()?;
        let times: Vec<u64> = values.iter().map(|e| e.clock.time()).collect();
        assert_eq!(times, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn traverse_walks_the_chain_from_head() -> Result<()> {
        let log = new_log("log", "writer");
        log.append("a")?;
        log.append("b")?;
        log.append("c")?;

        let walked = log.traverse(None, |_| false)?;
        let payloads: Vec<&str> = walked.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, vec!["c", "b", "a"]);
        Ok(())
    }

    #[test]
    fn traverse_honors_stop_condition() -> Result<()> {
        let log = new_log("log", "writer");
        log.append("a")?;
        let middle = log.append("b")?;
        log.append("c")?;

        let walked = log.traverse(None, |entry| entry.hash() == middle.hash())?;
        assert_eq!(walked.len(), 2);
        assert_eq!(walked.last().unwrap().hash(), middle.hash());
        Ok(())
    }

    #[test]
    fn join_entry_is_idempotent() -> Result<()> {
        let ours = new_log("log", "writer-a");
        let theirs = new_log("log", "writer-b");
        let entry = theirs.append("remote")?;

        let mut processed = HashSet::new();
        ours.join_entry(&entry, &mut processed)?;
        let before = ours.values()?;

        let mut processed = HashSet::new();
        ours.join_entry(&entry, &mut processed)?;
        let after = ours.values()?;

        assert_eq!(before, after);
        assert_eq!(after.len(), 1);
        Ok(())
    }

    #[test]
    fn join_entry_rejects_foreign_logs() {
        let ours = new_log("log-a", "writer");
        let theirs = new_log("log-b", "writer-b");
        let entry = theirs.append("remote").unwrap();

        let mut processed = HashSet::new();
        assert!(matches!(
            ours.join_entry(&entry, &mut processed),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn join_entry_rejects_tampered_entries() {
        let ours = new_log("log", "writer-a");
        let theirs = new_log("log", "writer-b");
        let entry = theirs.append("remote").unwrap();

        let mut tampered = entry.entry().clone();
        tampered.payload = "forged".into();
        let tampered = tampered.encode().unwrap();

        let mut processed = HashSet::new();
        assert!(matches!(
            ours.join_entry(&tampered, &mut processed),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn join_merges_and_head_is_maximal() -> Result<()> {
        let a = new_log("log", "writer-a");
        let b = new_log("log", "writer-b");

        a.append("a1")?;
        a.append("a2")?;
        b.append("b1")?;

        a.join(&b)?;
        assert_eq!(a.values()?.len(), 3);

        // head is the max (clock, hash) across all stored entries
        let values = a.values()?;
        let max = values.last().unwrap();
        assert_eq!(a.head()?.hash(), max.hash());

        // a2 has time 2, b1 has time 1: the local entry stays the head
        assert_eq!(a.head()?.payload, "a2");
        Ok(())
    }

    #[test]
    fn converges_across_replicas() -> Result<()> {
        let a = new_log("log", "writer-a");
        let b = new_log("log", "writer-b");

        a.append("from-a")?;
        b.append("from-b")?;

        a.join(&b)?;
        b.join(&a)?;

        let hashes = |log: &Log| -> Vec<String> {
            log.values()
                .unwrap()
                .iter()
                .map(|e| e.hash().to_owned())
                .collect()
        };
        assert_eq!(hashes(&a), hashes(&b));
        assert_eq!(a.head()?.hash(), b.head()?.hash());
        Ok(())
    }

    #[test]
    fn random_join_orders_converge() -> Result<()> {
        let a = new_log("log", "writer-a");
        let b = new_log("log", "writer-b");
        for i in 0..5 {
            a.append(&format!("a{i}"))?;
            b.append(&format!("b{i}"))?;
        }
        let mut entries = a.values()?;
        entries.extend(b.values()?);

        // fresh replicas receive the same entries in random orders and must
        // end up identical
        let mut rng = rand::thread_rng();
        let mut replicas = Vec::new();
        for writer in ["writer-c", "writer-d", "writer-e"] {
            let replica = new_log("log", writer);
            let mut shuffled = entries.clone();
            shuffled.shuffle(&mut rng);
            let mut processed = HashSet::new();
            for entry in &shuffled {
                replica.join_entry(entry, &mut processed)?;
            }
            replicas.push(replica);
        }

        let hashes = |log: &Log| -> Result<Vec<String>> {
            Ok(log.values()?.iter().map(|e| e.hash().to_owned()).collect())
        };
        let reference = hashes(&replicas[0])?;
        assert_eq!(reference.len(), 10);
        for replica in &replicas[1..] {
            assert_eq!(hashes(replica)?, reference);
            assert_eq!(replica.head()?.hash(), replicas[0].head()?.hash());
        }
        Ok(())
    }

    #[test]
    fn clear_resets_head_but_keeps_clock() -> Result<()> {
        let log = new_log("log", "writer");
        log.append("one")?;
        log.clear()?;

        assert!(matches!(log.head(), Err(Error::NotFound(_))));
        assert!(log.values()?.is_empty());

        let next = log.append("two")?;
        assert_eq!(next.clock.time(), 2);
        Ok(())
    }
}
