//! Mapping stored records of any schema generation onto current snapshots.
//!
//! Records written by this crate are wrapped in a versioned envelope:
//!
//! ```json
//! { "schemaVersion": 2, "module": "offer", "payload": { ... } }
//! ```
//!
//! Older records were stored bare. A bare record carrying any of the
//! module's current-shape marker fields is treated as the current version;
//! anything else is version 1 and goes through the full migration chain.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::stored_id;
use crate::modules::{ModuleRecord, WorkflowModule};

/// Top-level key holding the schema version of an envelope
pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// Bookkeeping fields a gateway may add next to a bare record
const BOOKKEEPING_KEYS: &[&str] = &["id", "updatedAt", "createdAt", "userId"];

/// Errors raised while reconciling a stored record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("stored record is not a JSON object")]
    NotAnObject,

    #[error("schemaVersion must be a positive integer")]
    InvalidVersion,

    #[error("record was written for module '{found}', expected '{expected}'")]
    ModuleMismatch { expected: String, found: String },

    #[error("envelope has no payload")]
    MissingPayload,

    #[error("schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("no migration registered from schema version {0}")]
    MissingMigration(u32),

    #[error("migration from version {from} failed: {message}")]
    MigrationFailed { from: u32, message: String },

    #[error("record does not match the current schema: {0}")]
    InvalidRecord(String),

    #[error("record failed validation: {}", .0.join("; "))]
    Rejected(Vec<String>),
}

/// One step of the migration chain, lifting a payload from `from` to `from + 1`
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub from: u32,
    pub apply: fn(Value) -> Result<Value, ReconcileError>,
}

/// How a module's stored records evolved over time
#[derive(Debug)]
pub struct RecordSchema {
    pub current_version: u32,
    /// Fields that only exist in the current shape
    pub markers: &'static [&'static str],
    pub migrations: &'static [Migration],
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    schema_version: u32,
    module: String,
    payload: Value,
}

/// Snapshots restored from a stored record
#[derive(Debug)]
pub struct Restored<M: WorkflowModule> {
    pub id: Option<String>,
    /// Schema version the record was stored with
    pub from_version: u32,
    pub primary: M::Primary,
    pub secondary: M::Secondary,
}

/// Outcome of reconciling a gateway response
#[derive(Debug)]
pub enum Reconciled<M: WorkflowModule> {
    /// Nothing stored: the caller resets to defaults
    Empty,
    Restored(Restored<M>),
}

/// Work out the schema version of a raw record and extract its payload
pub fn detect(
    raw: Value,
    module_key: &str,
    schema: &RecordSchema,
) -> Result<(u32, Value), ReconcileError> {
    let Value::Object(mut object) = raw else {
        return Err(ReconcileError::NotAnObject);
    };

    if let Some(version) = object.get(SCHEMA_VERSION_KEY) {
        let version = version
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or(ReconcileError::InvalidVersion)?;

        if let Some(found) = object.get("module").and_then(Value::as_str) {
            if found != module_key {
                return Err(ReconcileError::ModuleMismatch {
                    expected: module_key.to_string(),
                    found: found.to_string(),
                });
            }
        }

        let payload = object
            .remove("payload")
            .ok_or(ReconcileError::MissingPayload)?;
        return Ok((version, payload));
    }

    for key in BOOKKEEPING_KEYS {
        object.remove(*key);
    }

    let is_current = schema.markers.iter().any(|m| object.contains_key(*m));
    let version = if is_current { schema.current_version } else { 1 };
    Ok((version, Value::Object(object)))
}

/// Fold the migration chain from `version` up to the current version
pub fn migrate(
    mut version: u32,
    mut payload: Value,
    schema: &RecordSchema,
) -> Result<Value, ReconcileError> {
    if version > schema.current_version {
        return Err(ReconcileError::UnsupportedVersion {
            found: version,
            supported: schema.current_version,
        });
    }

    while version < schema.current_version {
        let step = schema
            .migrations
            .iter()
            .find(|m| m.from == version)
            .ok_or(ReconcileError::MissingMigration(version))?;
        payload = (step.apply)(payload)?;
        tracing::debug!(from = version, to = version + 1, "record migrated");
        version += 1;
    }

    Ok(payload)
}

/// Map a gateway response onto snapshots for module `M`
pub fn reconcile<M: WorkflowModule>(raw: Option<Value>) -> Result<Reconciled<M>, ReconcileError> {
    let Some(raw) = raw else {
        return Ok(Reconciled::Empty);
    };

    let id = stored_id(&raw);
    let schema = M::schema();
    let (from_version, payload) = detect(raw, M::KEY, schema)?;
    let payload = migrate(from_version, payload, schema)?;

    let record: M::Record = serde_json::from_value(payload)
        .map_err(|e| ReconcileError::InvalidRecord(e.to_string()))?;
    record.validate().map_err(ReconcileError::Rejected)?;

    let (primary, secondary) = M::from_record(record);
    Ok(Reconciled::Restored(Restored {
        id,
        from_version,
        primary,
        secondary,
    }))
}

/// Serialize the allow-listed fields of a module into a current envelope
pub fn to_envelope<M: WorkflowModule>(
    primary: &M::Primary,
    secondary: &M::Secondary,
) -> Result<Value, serde_json::Error> {
    let envelope = Envelope {
        schema_version: M::schema().current_version,
        module: M::KEY.to_string(),
        payload: allow_listed::<M::Record>(serde_json::to_value(M::to_record(primary, secondary))?),
    };
    serde_json::to_value(envelope)
}

/// Keep only the top-level fields listed in `R::ALLOW_LIST`
fn allow_listed<R: ModuleRecord>(payload: Value) -> Value {
    let Value::Object(object) = payload else {
        return payload;
    };
    let (kept, dropped): (Map<String, Value>, Map<String, Value>) = object
        .into_iter()
        .partition(|(key, _)| R::ALLOW_LIST.contains(&key.as_str()));
    if !dropped.is_empty() {
        let fields: Vec<&String> = dropped.keys().collect();
        tracing::warn!(?fields, "dropping record fields missing from the allow-list");
    }
    Value::Object(kept)
}

/// Helpers shared by legacy migrations
pub(crate) mod legacy {
    use super::{Map, Value};

    /// Trimmed string field, tolerating absence and non-string values
    pub fn text(object: &Map<String, Value>, key: &str) -> Option<String> {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Array field, empty when absent
    pub fn list<'a>(object: &'a Map<String, Value>, key: &str) -> &'a [Value] {
        object
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number field, accepting numeric strings
    pub fn number(value: Option<&Value>) -> Option<f64> {
        match value? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
            _ => None,
        }
    }

    /// First present string among `keys` on an entry that may be a bare string
    pub fn entry_text(entry: &Value, keys: &[&str]) -> Option<String> {
        match entry {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Object(object) => keys.iter().find_map(|k| text(object, k)),
            _ => None,
        }
    }
}
