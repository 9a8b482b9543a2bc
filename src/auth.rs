//! Authentication collaborator seen by sessions and gateways

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Identity of the signed-in user plus a way to ask for a sign-in
pub trait AuthProvider: Send + Sync {
    /// Id of the signed-in user, if any
    fn current_user(&self) -> Option<String>;

    /// Ask the hosting UI to show its sign-in prompt
    fn request_sign_in(&self);
}

/// Auth provider with an explicitly set user.
///
/// The CLI uses it with the configured user; tests flip it between
/// signed-in and signed-out.
#[derive(Debug, Default)]
pub struct StaticAuth {
    user: RwLock<Option<String>>,
    sign_in_requests: AtomicUsize,
}

impl StaticAuth {
    pub fn new(user: Option<String>) -> Self {
        Self {
            user: RwLock::new(user),
            sign_in_requests: AtomicUsize::new(0),
        }
    }

    pub fn signed_in(user: impl Into<String>) -> Self {
        Self::new(Some(user.into()))
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }

    pub fn sign_in(&self, user: impl Into<String>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user.into());
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// How many times a sign-in prompt was requested
    pub fn sign_in_requests(&self) -> usize {
        self.sign_in_requests.load(Ordering::SeqCst)
    }
}

impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<String> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request_sign_in(&self) {
        self.sign_in_requests.fetch_add(1, Ordering::SeqCst);
        tracing::info!("sign-in requested");
    }
}
