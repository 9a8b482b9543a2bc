//! Per-session operation status consumed by the UI layer

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{OperationCounters, ProcessingGuard, ProcessingState, StateContainer, Ticket};

/// Processing key of a load
pub const LOADING: &str = "loading";
/// Processing key of a save
pub const SAVING: &str = "saving";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerKind {
    Error,
    Info,
}

/// Dismissible message that hides itself after a while
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Banner {
    pub kind: BannerKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Banner {
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Prompt and banner flags next to the processing map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusFlags {
    /// Saving was refused for a blank title
    pub title_prompt: bool,
    /// Saving is waiting on a sign-in
    pub auth_prompt: bool,
    pub banner: Option<Banner>,
}

/// Loading flags, prompts, banners and operation counters of one session
#[derive(Clone)]
pub struct StatusTracker {
    processing: Arc<StateContainer<ProcessingState>>,
    flags: Arc<StateContainer<StatusFlags>>,
    counters: Arc<OperationCounters>,
    banner_ttl: Duration,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("processing", &self.processing.snapshot())
            .field("flags", &self.flags.snapshot())
            .finish_non_exhaustive()
    }
}

impl StatusTracker {
    pub fn new(banner_ttl: Duration) -> Self {
        Self {
            processing: Arc::new(StateContainer::new()),
            flags: Arc::new(StateContainer::new()),
            counters: Arc::new(OperationCounters::new()),
            banner_ttl,
        }
    }

    pub fn processing(&self) -> &Arc<StateContainer<ProcessingState>> {
        &self.processing
    }

    pub fn flags(&self) -> &Arc<StateContainer<StatusFlags>> {
        &self.flags
    }

    pub fn is_processing(&self, key: &str) -> bool {
        self.processing.read(|p| p.is_active(key))
    }

    /// Raise the processing flag for `key` until the guard drops
    pub fn begin(&self, key: &str) -> ProcessingGuard {
        ProcessingGuard::begin(self.processing.clone(), key)
    }

    pub fn issue(&self, kind: &str) -> Ticket {
        self.counters.issue(kind)
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.counters.is_current(ticket)
    }

    pub fn invalidate_all(&self) {
        self.counters.invalidate_all();
    }

    pub fn set_title_prompt(&self, shown: bool) {
        self.flags.update(|f| f.title_prompt = shown);
    }

    pub fn set_auth_prompt(&self, shown: bool) {
        self.flags.update(|f| f.auth_prompt = shown);
    }

    /// Show a banner, replacing any previous one
    pub fn raise_banner(&self, kind: BannerKind, message: impl Into<String>) {
        let now = Utc::now();
        let banner = Banner {
            kind,
            message: message.into(),
            raised_at: now,
            expires_at: now + self.banner_ttl,
        };
        self.flags.update(|f| f.banner = Some(banner));
    }

    pub fn dismiss_banner(&self) {
        self.flags.update(|f| f.banner = None);
    }

    /// Banner still visible at `now`
    pub fn banner_at(&self, now: DateTime<Utc>) -> Option<Banner> {
        self.flags
            .read(|f| f.banner.clone())
            .filter(|b| b.is_visible_at(now))
    }

    pub fn banner(&self) -> Option<Banner> {
        self.banner_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_expires() {
        let status = StatusTracker::new(Duration::seconds(5));
        status.raise_banner(BannerKind::Error, "storage unavailable");

        let banner = status.banner().unwrap();
        assert_eq!(banner.message, "storage unavailable");
        assert!(status.banner_at(banner.raised_at + Duration::seconds(4)).is_some());
        assert!(status.banner_at(banner.raised_at + Duration::seconds(5)).is_none());
    }

    #[test]
    fn test_banner_dismiss() {
        let status = StatusTracker::new(Duration::seconds(5));
        status.raise_banner(BannerKind::Info, "saved");
        status.dismiss_banner();
        assert_eq!(status.banner(), None);
    }

    #[test]
    fn test_independent_processing_keys() {
        let status = StatusTracker::new(Duration::seconds(5));
        let saving = status.begin(SAVING);
        let generating = status.begin("advantages");

        drop(generating);
        assert!(status.is_processing(SAVING));
        assert!(!status.is_processing("advantages"));
        drop(saving);
        assert!(!status.is_processing(SAVING));
    }

    #[test]
    fn test_clones_share_state() {
        let status = StatusTracker::new(Duration::seconds(5));
        let other = status.clone();
        other.set_title_prompt(true);
        assert!(status.flags().read(|f| f.title_prompt));

        let ticket = status.issue(LOADING);
        other.invalidate_all();
        assert!(!status.is_current(&ticket));
    }
}
