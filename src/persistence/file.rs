//! JSON-file gateway: one file per user and module under a data directory

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::{stored_id, PersistedRecord, PersistenceError, PersistenceGateway};
use crate::auth::AuthProvider;

/// Stores records as `<root>/<user>/<module>.json`, both components escaped
/// by [`encode_component`]
pub struct FileGateway {
    root: PathBuf,
    auth: Arc<dyn AuthProvider>,
}

impl FileGateway {
    pub fn new(root: impl Into<PathBuf>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            root: root.into(),
            auth,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file for a user and module
    pub fn record_path(&self, user: &str, module_key: &str) -> PathBuf {
        self.root
            .join(encode_component(user))
            .join(format!("{}.json", encode_component(module_key)))
    }

    async fn read(&self, path: &Path) -> Result<Option<Value>, PersistenceError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PersistenceGateway for FileGateway {
    async fn load(&self, module_key: &str) -> Result<Option<Value>, PersistenceError> {
        let Some(user) = self.auth.current_user() else {
            tracing::debug!(module = module_key, "no signed-in user, nothing to load");
            return Ok(None);
        };

        let path = self.record_path(&user, module_key);
        let record = self.read(&path).await?;
        tracing::debug!(
            module = module_key,
            path = %path.display(),
            found = record.is_some(),
            "record read"
        );
        Ok(record)
    }

    async fn save(
        &self,
        module_key: &str,
        payload: Value,
    ) -> Result<PersistedRecord, PersistenceError> {
        let user = self
            .auth
            .current_user()
            .ok_or(PersistenceError::AuthRequired)?;

        let path = self.record_path(&user, module_key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let id = self
            .read(&path)
            .await
            .ok()
            .flatten()
            .as_ref()
            .and_then(stored_id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let record = PersistedRecord {
            id,
            updated_at: Utc::now(),
            payload,
        };

        // Write beside the target and rename so a crash never leaves half a record
        let contents = serde_json::to_string_pretty(&record.to_stored())?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(module = module_key, id = %record.id, path = %path.display(), "record written");
        Ok(record)
    }
}

/// Encode a user id or module key as a single path component.
///
/// Lowercase ASCII letters, digits and `-` pass through; every other byte
/// becomes `_` plus two lowercase hex digits. The output never repeats for
/// distinct inputs, even on case-insensitive filesystems.
fn encode_component(component: &str) -> String {
    if component.is_empty() {
        return "_".to_string();
    }
    let mut encoded = String::with_capacity(component.len());
    for &byte in component.as_bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            encoded.push('_');
            encoded.push_str(&hex::encode([byte]));
        }
    }
    encoded
}
