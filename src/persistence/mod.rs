//! Persistence boundary: gateways and record reconciliation
//!
//! A gateway stores one raw JSON record per (user, module). The gateway
//! resolves the current user itself through an [`AuthProvider`]; callers
//! only name the module.
//!
//! [`AuthProvider`]: crate::auth::AuthProvider

pub mod file;
pub mod memory;
pub mod reconcile;

pub use file::FileGateway;
pub use memory::{GatewayCall, MemoryGateway};
pub use reconcile::{
    detect, reconcile, to_envelope, Migration, ReconcileError, Reconciled, RecordSchema,
    Restored,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by a persistence gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("sign-in required before saving")]
    AuthRequired,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("stored record is not valid JSON: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

/// What a gateway hands back after a successful save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub payload: Value,
}

impl PersistedRecord {
    /// Stored form: the payload's fields with `id` and `updatedAt` merged in
    pub fn to_stored(&self) -> Value {
        let mut stored = self.payload.clone();
        if let Some(object) = stored.as_object_mut() {
            object.insert("id".to_string(), Value::String(self.id.clone()));
            object.insert(
                "updatedAt".to_string(),
                Value::String(self.updated_at.to_rfc3339()),
            );
        }
        stored
    }
}

/// Key-value store for module records, scoped to the current user
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Fetch the raw stored record for `module_key`, if any.
    ///
    /// Without a signed-in user there is nothing to load and `Ok(None)` is
    /// returned.
    async fn load(&self, module_key: &str) -> Result<Option<Value>, PersistenceError>;

    /// Persist `payload` for `module_key`, keeping the record id stable
    /// across saves. Fails with [`PersistenceError::AuthRequired`] when no
    /// user is signed in.
    async fn save(&self, module_key: &str, payload: Value)
        -> Result<PersistedRecord, PersistenceError>;
}

/// Record id carried by a stored record, whatever its shape
pub fn stored_id(raw: &Value) -> Option<String> {
    raw.get("id").and_then(Value::as_str).map(str::to_string)
}
