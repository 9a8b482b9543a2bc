//! Observable state containers holding a module's form data.
//!
//! A [`StateContainer`] wraps a `tokio::sync::watch` channel so that every
//! mutation is synchronous and immediately visible to subscribers (UI
//! widgets, step predicates, tests). Containers are plain instances owned by
//! a session; there is no global store.

mod processing;

pub use processing::{OperationCounters, ProcessingGuard, ProcessingState, Ticket};

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;

/// Bound shared by every snapshot type stored in a container
pub trait Snapshot:
    Clone + Default + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Snapshot for T where
    T: Clone + Default + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Errors raised by [`StateContainer::patch`]
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("patch must be a JSON object of field names to values")]
    NotAnObject,

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("invalid value for patched fields: {0}")]
    InvalidValue(#[from] serde_json::Error),
}

/// Observable holder of a single snapshot value
pub struct StateContainer<T: Snapshot> {
    tx: watch::Sender<T>,
    revision: AtomicU64,
}

impl<T: Snapshot> Default for StateContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Snapshot> Debug for StateContainer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateContainer")
            .field("revision", &self.revision())
            .field("value", &*self.tx.borrow())
            .finish()
    }
}

impl<T: Snapshot> StateContainer<T> {
    /// Create a container holding the documented defaults
    pub fn new() -> Self {
        Self::with_value(T::default())
    }

    /// Create a container holding `value`
    pub fn with_value(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self {
            tx,
            revision: AtomicU64::new(0),
        }
    }

    /// Clone the current snapshot
    pub fn snapshot(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Read the current snapshot without cloning it.
    ///
    /// The closure only gets a shared reference; mutating the same container
    /// from inside it is not possible.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Replace the whole snapshot (bulk load)
    pub fn replace(&self, value: T) {
        self.tx.send_replace(value);
        self.bump();
    }

    /// Apply a named setter to the snapshot
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut out = None;
        self.tx.send_modify(|value| out = Some(f(value)));
        self.bump();
        match out {
            Some(result) => result,
            None => unreachable!("send_modify always runs its closure"),
        }
    }

    /// Merge-patch named top-level fields from a JSON object.
    ///
    /// Field names use the snapshot's serialized (camelCase) names. Unknown
    /// names are rejected and leave the snapshot untouched.
    pub fn patch(&self, fields: &Value) -> Result<(), PatchError> {
        let fields = fields.as_object().ok_or(PatchError::NotAnObject)?;
        let mut error = None;

        let changed = self.tx.send_if_modified(|value| {
            match merge_fields(value, fields) {
                Ok(next) => {
                    let changed = next != *value;
                    *value = next;
                    changed
                }
                Err(e) => {
                    error = Some(e);
                    false
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }
        if changed {
            self.bump();
        }
        Ok(())
    }

    /// Reset the snapshot to its documented defaults
    pub fn reset(&self) {
        self.replace(T::default());
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of mutations applied since construction
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }
}

fn merge_fields<T: Snapshot>(current: &T, fields: &Map<String, Value>) -> Result<T, PatchError> {
    let mut merged = serde_json::to_value(current)?;
    let object = merged.as_object_mut().ok_or(PatchError::NotAnObject)?;

    for (name, value) in fields {
        if !object.contains_key(name) {
            return Err(PatchError::UnknownField(name.clone()));
        }
        object.insert(name.clone(), value.clone());
    }

    Ok(serde_json::from_value(merged)?)
}
