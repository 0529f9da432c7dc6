//! Immutable event feed view.

use serde_json::Value;
use tracing::warn;

use crate::{Database, Error, OpKind, Operation, Result};

/// One event as returned by reads.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Hash of the entry carrying the event.
    pub hash: String,
    /// The event value.
    pub value: Value,
}

/// Bounds for [`Events::iter`], each a `"<time>:<hash>"` position.
///
/// Bounds are parsed and compared structurally as `(time, hash)` tuples, so
/// `"10:…"` sorts after `"2:…"` regardless of digit count.
#[derive(Debug, Clone, Default)]
pub struct EventBounds {
    /// Exclusive lower bound.
    pub gt: Option<String>,
    /// Inclusive lower bound.
    pub gte: Option<String>,
    /// Exclusive upper bound.
    pub lt: Option<String>,
    /// Inclusive upper bound.
    pub lte: Option<String>,
}

impl EventBounds {
    /// No bounds; iterates everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Set the exclusive lower bound.
    pub fn gt(mut self, position: impl Into<String>) -> Self {
        self.gt = Some(position.into());
        self
    }

    /// Set the inclusive lower bound.
    pub fn gte(mut self, position: impl Into<String>) -> Self {
        self.gte = Some(position.into());
        self
    }

    /// Set the exclusive upper bound.
    pub fn lt(mut self, position: impl Into<String>) -> Self {
        self.lt = Some(position.into());
        self
    }

    /// Set the inclusive upper bound.
    pub fn lte(mut self, position: impl Into<String>) -> Self {
        self.lte = Some(position.into());
        self
    }
}

/// Append-only events over a [`Database`].
///
/// Events have no keys; every [`Events::add`] appends a new immutable
/// entry, and reads enumerate entries in the log's total order.
#[derive(Debug)]
pub struct Events {
    db: Database,
}

impl Events {
    /// Wrap a database in event-feed semantics.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Append an event. Returns the hash of the new entry.
    pub async fn add(&self, value: Value) -> Result<String> {
        self.db.add_operation(&Operation::add(value)).await
    }

    /// The value carried by the entry stored under `hash`.
    pub fn get(&self, hash: &str) -> Result<Value> {
        let entry = self.db.log().get(hash)?;
        let op = Operation::from_payload(&entry.payload)?;
        Ok(op.value.unwrap_or(Value::Null))
    }

    /// All events, newest first.
    pub fn all(&self) -> Result<Vec<EventRecord>> {
        let mut records = Vec::new();
        for entry in self.db.log().values()?.iter().rev() {
            let op = match Operation::from_payload(&entry.payload) {
                Ok(op) => op,
                Err(err) => {
                    warn!("skipping unparseable payload in {}: {err}", entry.hash());
                    continue;
                }
            };
            records.push(EventRecord {
                hash: entry.hash().to_owned(),
                value: op.value.unwrap_or(Value::Null),
            });
        }
        Ok(records)
    }

    /// Events in ascending total order, filtered by `bounds` and truncated
    /// to `amount` when it is positive.
    ///
    /// Each entry's position is the `(clock time, hash)` pair; bounds are
    /// `"<time>:<hash>"` strings compared structurally against it.
    pub fn iter(&self, bounds: &EventBounds, amount: i64) -> Result<Vec<EventRecord>> {
        let gt = bounds.gt.as_deref().map(parse_bound).transpose()?;
        let gte = bounds.gte.as_deref().map(parse_bound).transpose()?;
        let lt = bounds.lt.as_deref().map(parse_bound).transpose()?;
        let lte = bounds.lte.as_deref().map(parse_bound).transpose()?;

        let mut records = Vec::new();
        for entry in self.db.log().values()? {
            let position = (entry.clock.time(), entry.hash());

            if let Some((time, hash)) = &gt {
                if position <= (*time, hash.as_str()) {
                    continue;
                }
            }
            if let Some((time, hash)) = &gte {
                if position < (*time, hash.as_str()) {
                    continue;
                }
            }
            if let Some((time, hash)) = &lt {
                if position >= (*time, hash.as_str()) {
                    continue;
                }
            }
            if let Some((time, hash)) = &lte {
                if position > (*time, hash.as_str()) {
                    continue;
                }
            }

            let op = match Operation::from_payload(&entry.payload) {
                Ok(op) => op,
                Err(err) => {
                    warn!("skipping unparseable payload in {}: {err}", entry.hash());
                    continue;
                }
            };
            if op.op != OpKind::Add {
                continue;
            }
            records.push(EventRecord {
                hash: entry.hash().to_owned(),
                value: op.value.unwrap_or(Value::Null),
            });
            if amount > 0 && records.len() >= amount as usize {
                break;
            }
        }
        Ok(records)
    }
}

fn parse_bound(bound: &str) -> Result<(u64, String)> {
    let (time, hash) = bound
        .split_once(':')
        .ok_or_else(|| Error::InvalidArgument(format!("malformed event position '{bound}'")))?;
    let time = time
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("malformed event position '{bound}'")))?;
    Ok((time, hash.to_owned()))
}
