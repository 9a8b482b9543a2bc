//! In-memory gateway with a call log, injectable failures and held calls

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::{stored_id, PersistedRecord, PersistenceError, PersistenceGateway};
use crate::auth::AuthProvider;

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Load { module: String },
    Save { module: String, payload: Value },
}

/// Gateway keeping records in a map; used by tests and demos
pub struct MemoryGateway {
    auth: Arc<dyn AuthProvider>,
    records: Mutex<HashMap<(String, String), Value>>,
    calls: Mutex<Vec<GatewayCall>>,
    fail_loads: Mutex<VecDeque<PersistenceError>>,
    fail_saves: Mutex<VecDeque<PersistenceError>>,
    load_gate: Mutex<Option<Arc<Semaphore>>>,
    save_gate: Mutex<Option<Arc<Semaphore>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryGateway {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            auth,
            records: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_loads: Mutex::new(VecDeque::new()),
            fail_saves: Mutex::new(VecDeque::new()),
            load_gate: Mutex::new(None),
            save_gate: Mutex::new(None),
        }
    }

    /// Seed a stored record for a user and module
    pub fn insert(&self, user: &str, module_key: &str, raw: Value) {
        lock(&self.records).insert((user.to_string(), module_key.to_string()), raw);
    }

    /// Stored record for a user and module
    pub fn stored(&self, user: &str, module_key: &str) -> Option<Value> {
        lock(&self.records)
            .get(&(user.to_string(), module_key.to_string()))
            .cloned()
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    /// Number of save calls received
    pub fn save_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, GatewayCall::Save { .. }))
            .count()
    }

    /// Make the next load fail with `error`; queued failures apply in order
    pub fn fail_next_load(&self, error: PersistenceError) {
        lock(&self.fail_loads).push_back(error);
    }

    /// Make the next save fail with `error`; queued failures apply in order
    pub fn fail_next_save(&self, error: PersistenceError) {
        lock(&self.fail_saves).push_back(error);
    }

    /// Hold every subsequent load until a permit is added to the returned
    /// semaphore (one permit releases one load)
    pub fn hold_loads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.load_gate) = Some(gate.clone());
        gate
    }

    /// Hold every subsequent save until released, like [`Self::hold_loads`]
    pub fn hold_saves(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.save_gate) = Some(gate.clone());
        gate
    }

    async fn pass(gate: &Mutex<Option<Arc<Semaphore>>>) {
        let gate = lock(gate).clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn load(&self, module_key: &str) -> Result<Option<Value>, PersistenceError> {
        lock(&self.calls).push(GatewayCall::Load {
            module: module_key.to_string(),
        });
        Self::pass(&self.load_gate).await;

        if let Some(error) = lock(&self.fail_loads).pop_front() {
            return Err(error);
        }
        let Some(user) = self.auth.current_user() else {
            return Ok(None);
        };
        Ok(self.stored(&user, module_key))
    }

    async fn save(
        &self,
        module_key: &str,
        payload: Value,
    ) -> Result<PersistedRecord, PersistenceError> {
        lock(&self.calls).push(GatewayCall::Save {
            module: module_key.to_string(),
            payload: payload.clone(),
        });
        Self::pass(&self.save_gate).await;

        if let Some(error) = lock(&self.fail_saves).pop_front() {
            return Err(error);
        }
        let user = self
            .auth
            .current_user()
            .ok_or(PersistenceError::AuthRequired)?;

        let id = self
            .stored(&user, module_key)
            .as_ref()
            .and_then(stored_id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let record = PersistedRecord {
            id,
            updated_at: Utc::now(),
            payload,
        };
        self.insert(&user, module_key, record.to_stored());
        Ok(record)
    }
}
