//! Connection and write bookkeeping shared by the bundled hosts.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::warn;

use docengine_core::{
    attribute::Attributes,
    error::{EngineError, EngineResult},
};

use crate::host::{SchemaEditor, TransactionMode};

/// Records of one object store in ascending key order.
pub(crate) type ObjectStore = BTreeMap<String, Attributes>;


/// Open/closed flag shared by a connection and the host that handed it out.
#[derive(Debug, Default)]
pub(crate) struct ConnectionHandle {
    closed: AtomicBool,
}

impl ConnectionHandle {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the handle closed. Returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

/// Forgets closed handles and returns the number still open.
pub(crate) fn prune_closed(connections: &mut Vec<Arc<ConnectionHandle>>) -> usize {
    connections.retain(|connection| !connection.is_closed());
    connections.len()
}


#[derive(Debug)]
pub(crate) enum PendingWrite {
    Add(Attributes),
    Put(Attributes),
    Delete,
}

/// Writes of a transaction, applied in order on commit.
#[derive(Debug, Default)]
pub(crate) struct WriteBuffer {
    writes: Vec<(String, PendingWrite)>,
}

impl WriteBuffer {
    pub(crate) fn push(&mut self, key: &str, write: PendingWrite) {
        self.writes.push((key.to_string(), write));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &PendingWrite)> {
        self.writes
            .iter()
            .map(|(key, write)| (key.as_str(), write))
    }

    /// The latest buffered state of `key`: `None` if untouched, `Some(None)` if deleted.
    pub(crate) fn lookup(&self, key: &str) -> Option<Option<&Attributes>> {
        self.writes
            .iter()
            .rev()
            .find(|(pending, _)| pending == key)
            .map(|(_, write)| match write {
                PendingWrite::Add(value) | PendingWrite::Put(value) => Some(value),
                PendingWrite::Delete => None,
            })
    }

    /// Applies the buffered writes on top of committed records, without constraint checks.
    pub(crate) fn overlay(&self, records: &mut ObjectStore) {
        for (key, write) in &self.writes {
            match write {
                PendingWrite::Add(value) | PendingWrite::Put(value) => {
                    records.insert(key.clone(), value.clone());
                },
                PendingWrite::Delete => {
                    records.remove(key);
                },
            }
        }
    }
}

pub(crate) fn ensure_writable(mode: TransactionMode, store: &str) -> EngineResult<()> {
    match mode {
        TransactionMode::ReadWrite => Ok(()),
        TransactionMode::ReadOnly => Err(EngineError::Backend(format!(
            "cannot write to object store {store} in a read-only transaction"
        ))),
    }
}


/// Decides whether opening `name` at `requested` needs an upgrade.
///
/// Fails when `requested` is below `current`, or when an upgrade is needed
/// while `open_connections` other connections are still open.
pub(crate) fn plan_upgrade(name: &str, current: u32, requested: u32, open_connections: usize) -> EngineResult<bool> {
    if requested == 0 {
        return Err(EngineError::Backend(format!(
            "database {name} cannot be opened at version 0"
        )));
    }

    if requested < current {
        return Err(EngineError::Backend(format!(
            "requested version {requested} of database {name} is lower than its current version {current}"
        )));
    }

    if requested == current {
        return Ok(false);
    }

    if open_connections > 0 {
        warn!(database = name, from = current, to = requested, "upgrade blocked by an open connection");
        return Err(EngineError::ConnectionBlocked(name.to_string()));
    }

    Ok(true)
}

/// Schema draft handed to upgrade callbacks. Installed only if the callback succeeds.
#[derive(Debug, Clone, Default)]
pub(crate) struct SchemaDraft {
    stores: BTreeSet<String>,
}

impl SchemaDraft {
    pub(crate) fn new(stores: impl IntoIterator<Item = String>) -> Self {
        Self {
            stores: stores.into_iter().collect(),
        }
    }

    pub(crate) fn into_stores(self) -> BTreeSet<String> {
        self.stores
    }
}

impl SchemaEditor for SchemaDraft {
    fn object_store_names(&self) -> Vec<String> {
        self.stores.iter().cloned().collect()
    }

    fn contains(&self, name: &str) -> bool {
        self.stores.contains(name)
    }

    fn create_object_store(&mut self, name: &str) -> EngineResult<()> {
        if !self.stores.insert(name.to_string()) {
            return Err(EngineError::Backend(format!("object store {name} already exists")));
        }

        Ok(())
    }
}
