//! A module session: the per-module store instances plus the async
//! load, save and generate operations that race with user edits.
//!
//! Sessions are explicit values. A host builds one per module entry and
//! calls [`ModuleSession::teardown`] on logout or module switch.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthProvider;
use crate::config::Config;
use crate::error::WorkflowError;
use crate::generation::{
    ContentGenerator, FallbackTemplates, GenerationError, TemplateGenerator,
};
use crate::modules::{is_blank, ModuleRecord, WorkflowModule};
use crate::persistence::{reconcile, to_envelope, PersistenceError, PersistenceGateway, Reconciled};
use crate::status::{BannerKind, StatusTracker, LOADING, SAVING};
use crate::store::StateContainer;
use crate::workflow::{
    Navigation, NavigationController, PhaseProgress, StepContext, StepGraph, StepId, StepStatus,
};

const DEFAULT_BANNER_TTL: Duration = Duration::from_secs(8);
const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Action deferred until the user signs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Save,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Restored {
        id: Option<String>,
        from_version: u32,
    },
    /// Nothing stored; containers were reset to defaults
    Empty,
    /// A newer load or a local edit made this result stale
    Superseded,
    Cancelled,
    /// State left untouched and a banner raised
    Failed(WorkflowError),
}

#[derive(Debug)]
pub enum SaveOutcome {
    Saved { id: String },
    TitleRequired,
    /// Sign-in requested; the save resumes on [`ModuleSession::on_authenticated`]
    AuthRequired,
    ReadOnly,
    Superseded,
    Cancelled,
    Failed(WorkflowError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateOutcome {
    /// Output written to the form; `fallback` when the template stood in
    Applied { fallback: bool },
    UnknownTarget,
    ReadOnly,
    Superseded,
    Cancelled,
}

/// One row of the step listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSummary {
    pub index: usize,
    pub id: StepId,
    pub title: &'static str,
    pub phase: &'static str,
    pub status: StepStatus,
    pub current: bool,
}

/// Builds a [`ModuleSession`] from its collaborators
pub struct SessionBuilder<M: WorkflowModule> {
    gateway: Arc<dyn PersistenceGateway>,
    auth: Arc<dyn AuthProvider>,
    generator: Option<Arc<dyn ContentGenerator>>,
    read_only: bool,
    banner_ttl: Duration,
    generation_timeout: Duration,
    record_id: Option<String>,
    _module: PhantomData<M>,
}

impl<M: WorkflowModule> SessionBuilder<M> {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            gateway,
            auth,
            generator: None,
            read_only: false,
            banner_ttl: DEFAULT_BANNER_TTL,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            record_id: None,
            _module: PhantomData,
        }
    }

    /// Apply the `session` and `generation` config sections
    pub fn from_config(mut self, config: &Config) -> Self {
        self.read_only = config.session.read_only;
        self.banner_ttl = Duration::from_secs(config.session.banner_ttl_secs);
        self.generation_timeout = Duration::from_secs(config.generation.timeout_secs);
        self
    }

    /// Content generator; defaults to rendering the module's templates
    pub fn generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn banner_ttl(mut self, ttl: Duration) -> Self {
        self.banner_ttl = ttl;
        self
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Open the session in edit-existing mode
    pub fn record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }

    pub fn build(self) -> Result<ModuleSession<M>, WorkflowError> {
        let graph = Arc::new(StepGraph::new(M::steps())?);
        let fallbacks = FallbackTemplates::new(M::fallback_templates())?;
        let generator = match self.generator {
            Some(generator) => generator,
            None => Arc::new(TemplateGenerator::new(FallbackTemplates::new(
                M::fallback_templates(),
            )?)),
        };
        let banner_ttl = chrono::Duration::from_std(self.banner_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(8));

        tracing::debug!(module = M::KEY, steps = graph.len(), "session created");

        Ok(ModuleSession {
            primary: Arc::new(StateContainer::new()),
            secondary: Arc::new(StateContainer::new()),
            status: StatusTracker::new(banner_ttl),
            navigation: Mutex::new(NavigationController::new(graph.clone(), self.read_only)),
            graph,
            gateway: self.gateway,
            auth: self.auth,
            generator,
            fallbacks,
            record_id: Mutex::new(self.record_id),
            pending: Mutex::new(None),
            cancel: CancellationToken::new(),
            generation_timeout: self.generation_timeout,
        })
    }
}

/// Live state and operations of one workflow module
pub struct ModuleSession<M: WorkflowModule> {
    primary: Arc<StateContainer<M::Primary>>,
    secondary: Arc<StateContainer<M::Secondary>>,
    status: StatusTracker,
    graph: Arc<StepGraph<M>>,
    navigation: Mutex<NavigationController<M>>,
    gateway: Arc<dyn PersistenceGateway>,
    auth: Arc<dyn AuthProvider>,
    generator: Arc<dyn ContentGenerator>,
    fallbacks: FallbackTemplates,
    record_id: Mutex<Option<String>>,
    pending: Mutex<Option<PendingAction>>,
    cancel: CancellationToken,
    generation_timeout: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M: WorkflowModule> ModuleSession<M> {
    pub fn builder(
        gateway: Arc<dyn PersistenceGateway>,
        auth: Arc<dyn AuthProvider>,
    ) -> SessionBuilder<M> {
        SessionBuilder::new(gateway, auth)
    }

    pub fn primary(&self) -> &Arc<StateContainer<M::Primary>> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<StateContainer<M::Secondary>> {
        &self.secondary
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn graph(&self) -> &Arc<StepGraph<M>> {
        &self.graph
    }

    /// Evaluate `f` against the live snapshots and processing flags
    pub fn with_context<R>(&self, f: impl FnOnce(&StepContext<'_, M>) -> R) -> R {
        self.primary.read(|primary| {
            self.secondary.read(|secondary| {
                self.status.processing().read(|processing| {
                    f(&StepContext {
                        primary,
                        secondary,
                        processing,
                    })
                })
            })
        })
    }

    fn navigation(&self) -> MutexGuard<'_, NavigationController<M>> {
        lock(&self.navigation)
    }

    // Navigation

    pub fn current_step(&self) -> usize {
        self.navigation().current()
    }

    pub fn current_step_id(&self) -> StepId {
        let current = self.current_step();
        self.graph.steps()[current].id
    }

    pub fn step_count(&self) -> usize {
        self.graph.len()
    }

    pub fn is_last_step(&self) -> bool {
        self.navigation().is_last_step()
    }

    pub fn is_read_only(&self) -> bool {
        self.navigation().read_only()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.navigation().set_read_only(read_only);
    }

    pub fn go_next(&self) -> Navigation {
        let navigation = self.with_context(|ctx| self.navigation().go_next(ctx));
        log_navigation::<M>("next", &navigation);
        navigation
    }

    pub fn go_previous(&self) -> Navigation {
        let navigation = self.navigation().go_previous();
        log_navigation::<M>("previous", &navigation);
        navigation
    }

    pub fn go_to_step(&self, index: usize) -> Navigation {
        let navigation = self.with_context(|ctx| self.navigation().go_to_step(index, ctx));
        log_navigation::<M>("goto", &navigation);
        navigation
    }

    pub fn is_unlocked(&self, index: usize) -> bool {
        self.with_context(|ctx| self.navigation().is_unlocked(index, ctx))
    }

    pub fn is_complete(&self, index: usize) -> bool {
        self.with_context(|ctx| self.graph.is_complete(index, ctx))
    }

    /// Status of every step in order
    pub fn step_summaries(&self) -> Vec<StepSummary> {
        let current = self.current_step();
        self.with_context(|ctx| {
            self.graph
                .steps()
                .iter()
                .enumerate()
                .map(|(index, step)| StepSummary {
                    index,
                    id: step.id,
                    title: step.title,
                    phase: step.phase,
                    status: self.graph.status(index, ctx),
                    current: index == current,
                })
                .collect()
        })
    }

    pub fn progress(&self) -> Vec<PhaseProgress> {
        self.with_context(|ctx| self.graph.progress(ctx))
    }

    // Editing

    pub fn edit_primary<R>(&self, f: impl FnOnce(&mut M::Primary) -> R) -> R {
        self.primary.update(f)
    }

    pub fn edit_secondary<R>(&self, f: impl FnOnce(&mut M::Secondary) -> R) -> R {
        self.secondary.update(f)
    }

    /// Merge named fields into the primary snapshot
    pub fn patch_primary(&self, fields: &Value) -> Result<(), WorkflowError> {
        Ok(self.primary.patch(fields)?)
    }

    pub fn patch_secondary(&self, fields: &Value) -> Result<(), WorkflowError> {
        Ok(self.secondary.patch(fields)?)
    }

    /// Back to documented defaults at the first step.
    ///
    /// Outstanding operations become stale and their results are dropped.
    pub fn reset(&self) {
        self.status.invalidate_all();
        self.primary.reset();
        self.secondary.reset();
        self.navigation().rewind();
        tracing::debug!(module = M::KEY, "session reset");
    }

    pub fn record_id(&self) -> Option<String> {
        lock(&self.record_id).clone()
    }

    /// Enter or leave edit-existing mode; leaving it resets the form
    pub fn set_record_id(&self, id: Option<String>) {
        let previous = std::mem::replace(&mut *lock(&self.record_id), id.clone());
        if previous.is_some() && id.is_none() {
            self.reset();
        }
    }

    pub fn pending_action(&self) -> Option<PendingAction> {
        *lock(&self.pending)
    }

    fn revisions(&self) -> (u64, u64) {
        (self.primary.revision(), self.secondary.revision())
    }

    // Persistence

    /// Fetch the stored record and replace the containers with it.
    ///
    /// The result is dropped when a newer load was issued or the containers
    /// were edited while the gateway call was in flight.
    pub async fn load(&self) -> LoadOutcome {
        let ticket = self.status.issue(LOADING);
        let revisions = self.revisions();
        let _guard = self.status.begin(LOADING);

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return LoadOutcome::Cancelled,
            result = self.gateway.load(M::KEY) => result,
        };

        if !self.status.is_current(&ticket) {
            tracing::debug!(module = M::KEY, "discarding superseded load");
            return LoadOutcome::Superseded;
        }
        if self.revisions() != revisions {
            tracing::info!(module = M::KEY, "form edited during load, keeping local edits");
            return LoadOutcome::Superseded;
        }

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => return self.load_failed(e.into()),
        };

        match reconcile::<M>(raw) {
            Ok(Reconciled::Empty) => {
                self.primary.reset();
                self.secondary.reset();
                *lock(&self.record_id) = None;
                tracing::info!(module = M::KEY, "no stored record, starting fresh");
                LoadOutcome::Empty
            }
            Ok(Reconciled::Restored(restored)) => {
                self.primary.replace(restored.primary);
                self.secondary.replace(restored.secondary);
                if restored.id.is_some() {
                    *lock(&self.record_id) = restored.id.clone();
                }
                tracing::info!(
                    module = M::KEY,
                    id = ?restored.id,
                    from_version = restored.from_version,
                    "record loaded"
                );
                LoadOutcome::Restored {
                    id: restored.id,
                    from_version: restored.from_version,
                }
            }
            Err(e) => self.load_failed(e.into()),
        }
    }

    fn load_failed(&self, error: WorkflowError) -> LoadOutcome {
        tracing::warn!(module = M::KEY, error = %error, "load failed");
        self.status
            .raise_banner(BannerKind::Error, format!("Could not load: {error}"));
        LoadOutcome::Failed(error)
    }

    /// Validate locally, then save the allow-listed fields.
    ///
    /// A blank title raises the title prompt, a record the module rejects
    /// raises an error banner and a missing user raises the sign-in prompt;
    /// none of them reaches the gateway.
    pub async fn handle_save(&self) -> SaveOutcome {
        if self.is_read_only() {
            return SaveOutcome::ReadOnly;
        }
        if self.primary.read(|p| is_blank(M::title(p))) {
            self.status.set_title_prompt(true);
            tracing::debug!(module = M::KEY, "save refused, title required");
            return SaveOutcome::TitleRequired;
        }
        let checked = self.with_context(|ctx| M::to_record(ctx.primary, ctx.secondary).validate());
        if let Err(problems) = checked {
            return self.save_failed(WorkflowError::Validation(problems.join("; ")));
        }
        if self.auth.current_user().is_none() {
            return self.defer_until_signed_in();
        }
        self.save_now().await
    }

    /// Set the title from the title prompt and retry the save
    pub async fn submit_title(&self, title: &str) -> SaveOutcome {
        if self.is_read_only() {
            return SaveOutcome::ReadOnly;
        }
        let title = title.trim();
        if title.is_empty() {
            self.status.set_title_prompt(true);
            return SaveOutcome::TitleRequired;
        }
        self.primary
            .update(|p| M::set_title(p, title.to_string()));
        self.status.set_title_prompt(false);
        self.handle_save().await
    }

    /// Resume the action deferred by a sign-in prompt, if any
    pub async fn on_authenticated(&self) -> Option<SaveOutcome> {
        self.status.set_auth_prompt(false);
        let pending = lock(&self.pending).take();
        match pending {
            Some(PendingAction::Save) => Some(self.handle_save().await),
            None => None,
        }
    }

    fn defer_until_signed_in(&self) -> SaveOutcome {
        *lock(&self.pending) = Some(PendingAction::Save);
        self.status.set_auth_prompt(true);
        self.auth.request_sign_in();
        tracing::info!(module = M::KEY, "save deferred until sign-in");
        SaveOutcome::AuthRequired
    }

    async fn save_now(&self) -> SaveOutcome {
        let ticket = self.status.issue(SAVING);
        let _guard = self.status.begin(SAVING);
        self.status.set_title_prompt(false);

        let payload = self.with_context(|ctx| to_envelope::<M>(ctx.primary, ctx.secondary));
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => return self.save_failed(PersistenceError::from(e).into()),
        };

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return SaveOutcome::Cancelled,
            result = self.gateway.save(M::KEY, payload) => result,
        };

        match result {
            Ok(_) if !self.status.is_current(&ticket) => {
                tracing::debug!(module = M::KEY, "discarding superseded save");
                SaveOutcome::Superseded
            }
            Ok(record) => {
                *lock(&self.record_id) = Some(record.id.clone());
                tracing::info!(module = M::KEY, id = %record.id, "record saved");
                SaveOutcome::Saved { id: record.id }
            }
            Err(PersistenceError::AuthRequired) => self.defer_until_signed_in(),
            Err(_) if !self.status.is_current(&ticket) => SaveOutcome::Superseded,
            Err(e) => self.save_failed(e.into()),
        }
    }

    fn save_failed(&self, error: WorkflowError) -> SaveOutcome {
        tracing::warn!(module = M::KEY, error = %error, "save failed");
        self.status
            .raise_banner(BannerKind::Error, format!("Could not save: {error}"));
        SaveOutcome::Failed(error)
    }

    // Generation

    /// Generate content for `target` and write it into the form.
    ///
    /// Generator failures and timeouts fall back to the module's templates,
    /// so the field is never left blank.
    pub async fn generate(&self, target: &str) -> GenerateOutcome {
        if self.is_read_only() {
            return GenerateOutcome::ReadOnly;
        }
        let request = self.with_context(|ctx| {
            M::generation_request(target, ctx.primary, ctx.secondary)
        });
        let Some(request) = request else {
            tracing::warn!(module = M::KEY, field = target, "unknown generation target");
            return GenerateOutcome::UnknownTarget;
        };

        let ticket = self.status.issue(&format!("generate:{target}"));
        let _guard = self.status.begin(target);

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return GenerateOutcome::Cancelled,
            result = tokio::time::timeout(self.generation_timeout, self.generator.generate(&request)) => {
                result.unwrap_or(Err(GenerationError::Timeout(self.generation_timeout.as_secs())))
            }
        };

        let result = result.and_then(|generated| {
            if generated.is_empty() {
                Err(GenerationError::InvalidOutput("no content".to_string()))
            } else {
                Ok(generated)
            }
        });
        let (generated, fallback) = match result {
            Ok(generated) => (generated, false),
            Err(e) => {
                tracing::warn!(module = M::KEY, field = target, error = %e, "generation failed, using fallback");
                (self.fallbacks.render(&request), true)
            }
        };

        if !self.status.is_current(&ticket) {
            tracing::debug!(module = M::KEY, field = target, "discarding superseded generation");
            return GenerateOutcome::Superseded;
        }

        self.primary
            .update(|primary| M::apply_generated(target, generated, primary));
        GenerateOutcome::Applied { fallback }
    }

    /// Abort in-flight operations; their results are discarded
    pub fn teardown(&self) {
        self.cancel.cancel();
        self.status.invalidate_all();
        tracing::info!(module = M::KEY, "session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn log_navigation<M: WorkflowModule>(action: &str, navigation: &Navigation) {
    match navigation {
        Navigation::Moved { from, to } => {
            tracing::debug!(module = M::KEY, action, from, to, "step changed");
        }
        Navigation::Blocked { reason } => {
            tracing::debug!(module = M::KEY, action, ?reason, "navigation blocked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::generation::{Generated, GenerationRequest, Suggestion};
    use crate::modules::testing::{Scratch, ScratchForm};
    use crate::persistence::MemoryGateway;
    use crate::workflow::BlockReason;
    use async_trait::async_trait;
    use serde_json::json;

    struct Harness {
        session: ModuleSession<Scratch>,
        gateway: Arc<MemoryGateway>,
        auth: Arc<StaticAuth>,
    }

    fn harness_with(
        auth: StaticAuth,
        configure: impl FnOnce(SessionBuilder<Scratch>) -> SessionBuilder<Scratch>,
    ) -> Harness {
        let auth = Arc::new(auth);
        let gateway = Arc::new(MemoryGateway::new(auth.clone()));
        let builder = ModuleSession::builder(gateway.clone(), auth.clone());
        let session = configure(builder).build().unwrap();
        Harness {
            session,
            gateway,
            auth,
        }
    }

    fn harness() -> Harness {
        harness_with(StaticAuth::signed_in("ada"), |b| b)
    }

    struct FailingGenerator;

    #[async_trait]
    impl ContentGenerator for FailingGenerator {
        async fn generate(&self, _: &GenerationRequest) -> Result<Generated, GenerationError> {
            Err(GenerationError::Unavailable("offline".to_string()))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl ContentGenerator for SlowGenerator {
        async fn generate(&self, _: &GenerationRequest) -> Result<Generated, GenerationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Generated::Suggestions(vec![Suggestion::new("late")]))
        }
    }

    /// Answers with the text it is given, after waiting for a permit
    struct GatedGenerator {
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl ContentGenerator for GatedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<Generated, GenerationError> {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            Ok(Generated::Suggestions(vec![Suggestion::new(
                request.context["name"].as_str().unwrap_or_default(),
            )]))
        }
    }

    #[test]
    fn test_next_requires_completion() {
        let h = harness();
        assert_eq!(
            h.session.go_next(),
            Navigation::Blocked {
                reason: BlockReason::StepIncomplete
            }
        );

        h.session.edit_primary(|p| p.name = "Draft".to_string());
        assert_eq!(h.session.go_next(), Navigation::Moved { from: 0, to: 1 });
        assert_eq!(h.session.current_step_id(), StepId("notes"));
    }

    #[test]
    fn test_read_only_moves_freely() {
        let h = harness_with(StaticAuth::signed_in("ada"), |b| b.read_only(true));
        assert!(h.session.go_to_step(2).moved());
        assert!(h.session.is_last_step());
    }

    #[test]
    fn test_processing_blocks_completion() {
        let h = harness();
        h.session.edit_primary(|p| p.name = "Draft".to_string());
        let guard = h.session.status().begin("name");
        assert!(!h.session.go_next().moved());
        drop(guard);
        assert!(h.session.go_next().moved());
    }

    #[test]
    fn test_step_summaries_and_progress() {
        let h = harness();
        h.session.edit_primary(|p| p.name = "Draft".to_string());
        let summaries = h.session.step_summaries();
        assert_eq!(summaries[0].status, StepStatus::Complete);
        assert!(summaries[0].current);
        assert_eq!(summaries[1].status, StepStatus::Unlocked);
        assert_eq!(summaries[2].status, StepStatus::Locked);

        let progress = h.session.progress();
        assert_eq!(progress[0].completed, 1);
        assert_eq!(progress[0].total, 2);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let h = harness();
        h.session.edit_primary(|p| {
            p.name = "Draft".to_string();
            p.notes = "n".to_string();
        });
        h.session.go_to_step(1);
        h.session.reset();

        assert_eq!(h.session.primary().snapshot(), ScratchForm::default());
        assert_eq!(h.session.current_step(), 0);
    }

    #[test]
    fn test_clearing_record_id_resets() {
        let h = harness_with(StaticAuth::signed_in("ada"), |b| b.record_id("rec-1"));
        h.session.edit_primary(|p| p.name = "Draft".to_string());

        h.session.set_record_id(Some("rec-2".to_string()));
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "Draft");

        h.session.set_record_id(None);
        assert_eq!(h.session.primary().snapshot(), ScratchForm::default());
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let h = harness();
        h.session.patch_primary(&json!({ "name": "Patched" })).unwrap();
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "Patched");
        assert!(matches!(
            h.session.patch_primary(&json!({ "bogus": 1 })),
            Err(WorkflowError::Patch(_))
        ));
    }

    #[tokio::test]
    async fn test_load_restores_record() {
        let h = harness();
        h.gateway.insert(
            "ada",
            "scratch",
            json!({ "id": "rec-9", "schemaVersion": 1, "module": "scratch", "payload": { "name": "Stored", "notes": "x" } }),
        );

        let outcome = h.session.load().await;
        assert!(matches!(
            outcome,
            LoadOutcome::Restored { ref id, from_version: 1 } if id.as_deref() == Some("rec-9")
        ));
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "Stored");
        assert_eq!(h.session.record_id().as_deref(), Some("rec-9"));
        assert!(!h.session.status().is_processing(LOADING));
    }

    #[tokio::test]
    async fn test_load_nothing_resets() {
        let h = harness();
        h.session.edit_primary(|p| p.name = "Local".to_string());
        assert!(matches!(h.session.load().await, LoadOutcome::Empty));
        assert_eq!(h.session.primary().snapshot(), ScratchForm::default());
    }

    #[tokio::test]
    async fn test_load_failure_keeps_state() {
        let h = harness();
        h.session.edit_primary(|p| p.name = "Local".to_string());
        h.gateway
            .fail_next_load(PersistenceError::Unavailable("down".to_string()));

        assert!(matches!(
            h.session.load().await,
            LoadOutcome::Failed(WorkflowError::Persistence(_))
        ));
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "Local");
        assert!(h.session.status().banner().is_some());
        assert!(!h.session.status().is_processing(LOADING));
    }

    #[tokio::test]
    async fn test_invalid_record_is_reported() {
        let h = harness();
        h.gateway.insert(
            "ada",
            "scratch",
            json!({ "schemaVersion": 1, "payload": { "name": "x".repeat(80) } }),
        );
        assert!(matches!(
            h.session.load().await,
            LoadOutcome::Failed(WorkflowError::Reconcile(_))
        ));
        assert_eq!(h.session.primary().snapshot(), ScratchForm::default());
    }

    #[tokio::test]
    async fn test_edit_during_load_wins() {
        let h = harness();
        h.gateway.insert(
            "ada",
            "scratch",
            json!({ "schemaVersion": 1, "payload": { "name": "Stored" } }),
        );
        let gate = h.gateway.hold_loads();

        let (outcome, ()) = tokio::join!(h.session.load(), async {
            tokio::task::yield_now().await;
            h.session.edit_primary(|p| p.name = "Typed".to_string());
            gate.add_permits(1);
        });

        assert!(matches!(outcome, LoadOutcome::Superseded));
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "Typed");
    }

    #[tokio::test]
    async fn test_newer_load_supersedes_older() {
        let h = harness();
        h.gateway.insert(
            "ada",
            "scratch",
            json!({ "schemaVersion": 1, "payload": { "name": "Stored" } }),
        );
        let gate = h.gateway.hold_loads();

        let (first, second, ()) = tokio::join!(h.session.load(), h.session.load(), async {
            tokio::task::yield_now().await;
            gate.add_permits(2);
        });

        let outcomes = [first, second];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, LoadOutcome::Superseded))
                .count(),
            1
        );
        assert!(matches!(outcomes[1], LoadOutcome::Restored { .. }));
    }

    #[tokio::test]
    async fn test_blank_title_prompts_without_saving() {
        let h = harness();
        h.session.edit_primary(|p| p.name = "   ".to_string());

        assert!(matches!(h.session.handle_save().await, SaveOutcome::TitleRequired));
        assert!(h.session.status().flags().read(|f| f.title_prompt));
        assert_eq!(h.gateway.save_count(), 0);

        let outcome = h.session.submit_title("My draft").await;
        assert!(matches!(outcome, SaveOutcome::Saved { .. }));
        assert!(!h.session.status().flags().read(|f| f.title_prompt));
        assert_eq!(h.gateway.save_count(), 1);
    }

    #[tokio::test]
    async fn test_signed_out_save_resumes_after_sign_in() {
        let h = harness_with(StaticAuth::signed_out(), |b| b);
        h.session.edit_primary(|p| p.name = "Draft".to_string());

        assert!(matches!(h.session.handle_save().await, SaveOutcome::AuthRequired));
        assert_eq!(h.auth.sign_in_requests(), 1);
        assert_eq!(h.session.pending_action(), Some(PendingAction::Save));
        assert_eq!(h.gateway.save_count(), 0);

        h.auth.sign_in("ada");
        let resumed = h.session.on_authenticated().await;
        assert!(matches!(resumed, Some(SaveOutcome::Saved { .. })));
        assert_eq!(h.session.pending_action(), None);
        assert!(h.gateway.stored("ada", "scratch").is_some());

        assert!(h.session.on_authenticated().await.is_none());
    }

    #[tokio::test]
    async fn test_save_failure_raises_banner() {
        let h = harness();
        h.session.edit_primary(|p| p.name = "Draft".to_string());
        h.gateway
            .fail_next_save(PersistenceError::Io("disk full".to_string()));

        assert!(matches!(h.session.handle_save().await, SaveOutcome::Failed(_)));
        let banner = h.session.status().banner().unwrap();
        assert!(banner.message.contains("disk full"));
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "Draft");
        assert!(!h.session.status().is_processing(SAVING));
    }

    #[tokio::test]
    async fn test_read_only_refuses_save() {
        let h = harness_with(StaticAuth::signed_in("ada"), |b| b.read_only(true));
        h.session.edit_primary(|p| p.name = "Draft".to_string());
        assert!(matches!(h.session.handle_save().await, SaveOutcome::ReadOnly));
        assert_eq!(h.gateway.save_count(), 0);
    }

    #[tokio::test]
    async fn test_read_only_title_prompt_leaves_form_alone() {
        let h = harness_with(StaticAuth::signed_in("ada"), |b| b.read_only(true));
        assert!(matches!(
            h.session.submit_title("My draft").await,
            SaveOutcome::ReadOnly
        ));
        assert_eq!(h.session.primary().snapshot(), ScratchForm::default());
    }

    #[tokio::test]
    async fn test_stale_save_does_not_restore_record_id() {
        let h = harness_with(StaticAuth::signed_in("ada"), |b| b.record_id("rec-1"));
        h.session.edit_primary(|p| p.name = "Draft".to_string());
        let gate = h.gateway.hold_saves();

        let (outcome, ()) = tokio::join!(h.session.handle_save(), async {
            tokio::task::yield_now().await;
            h.session.set_record_id(None);
            gate.add_permits(1);
        });

        assert!(matches!(outcome, SaveOutcome::Superseded));
        assert_eq!(h.gateway.save_count(), 1);
        assert_eq!(h.session.record_id(), None);
        assert_eq!(h.session.primary().snapshot(), ScratchForm::default());
        assert!(!h.session.status().is_processing(SAVING));
    }

    #[tokio::test]
    async fn test_rejected_record_is_not_saved() {
        let h = harness();
        h.session.edit_primary(|p| p.name = "x".repeat(60));

        let outcome = h.session.handle_save().await;
        assert!(matches!(
            outcome,
            SaveOutcome::Failed(WorkflowError::Validation(ref message)) if message.contains("50")
        ));
        assert_eq!(h.gateway.save_count(), 0);
        assert!(h.session.status().banner().is_some());
        assert_eq!(h.session.primary().read(|p| p.name.len()), 60);
    }

    struct EmptyGenerator;

    #[async_trait]
    impl ContentGenerator for EmptyGenerator {
        async fn generate(&self, _: &GenerationRequest) -> Result<Generated, GenerationError> {
            Ok(Generated::Suggestions(vec![Suggestion::new("  ")]))
        }
    }

    #[tokio::test]
    async fn test_empty_output_uses_fallback() {
        let h = harness_with(StaticAuth::signed_in("ada"), |b| {
            b.generator(Arc::new(EmptyGenerator))
        });

        let outcome = h.session.generate("name").await;
        assert_eq!(outcome, GenerateOutcome::Applied { fallback: true });
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "Untitled");
    }

    #[tokio::test]
    async fn test_failing_generator_uses_fallback() {
        let h = harness_with(StaticAuth::signed_in("ada"), |b| {
            b.generator(Arc::new(FailingGenerator))
        });

        let outcome = h.session.generate("name").await;
        assert_eq!(outcome, GenerateOutcome::Applied { fallback: true });
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "Untitled");
        assert!(!h.session.status().is_processing("name"));
    }

    #[tokio::test]
    async fn test_generation_timeout_uses_fallback() {
        let h = harness_with(StaticAuth::signed_in("ada"), |b| {
            b.generator(Arc::new(SlowGenerator))
                .generation_timeout(Duration::from_millis(10))
        });

        let outcome = h.session.generate("notes").await;
        assert_eq!(outcome, GenerateOutcome::Applied { fallback: true });
        assert!(h.session.primary().read(|p| p.notes.starts_with("Notes for")));
    }

    #[tokio::test]
    async fn test_default_generator_renders_templates() {
        let h = harness();
        h.session.edit_primary(|p| p.name = "Plan".to_string());
        let outcome = h.session.generate("notes").await;
        assert_eq!(outcome, GenerateOutcome::Applied { fallback: false });
        assert_eq!(
            h.session.primary().read(|p| p.notes.clone()),
            "Notes for Plan\nWrite something here."
        );
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let h = harness();
        assert_eq!(h.session.generate("bogus").await, GenerateOutcome::UnknownTarget);
    }

    #[tokio::test]
    async fn test_older_generation_is_discarded() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let h = harness_with(StaticAuth::signed_in("ada"), |b| {
            b.generator(Arc::new(GatedGenerator { gate: gate.clone() }))
        });

        h.session.edit_primary(|p| p.name = "first".to_string());
        let (older, newer, ()) = tokio::join!(
            h.session.generate("name"),
            async {
                tokio::task::yield_now().await;
                h.session.edit_primary(|p| p.name = "second".to_string());
                h.session.generate("name").await
            },
            async {
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                gate.add_permits(2);
            }
        );

        assert_eq!(older, GenerateOutcome::Superseded);
        assert_eq!(newer, GenerateOutcome::Applied { fallback: false });
        assert_eq!(h.session.primary().read(|p| p.name.clone()), "second");
        assert!(!h.session.status().is_processing("name"));
    }

    #[tokio::test]
    async fn test_teardown_cancels_inflight_load() {
        let h = harness();
        let _gate = h.gateway.hold_loads();

        let (outcome, ()) = tokio::join!(h.session.load(), async {
            tokio::task::yield_now().await;
            h.session.teardown();
        });

        assert!(matches!(outcome, LoadOutcome::Cancelled));
        assert!(h.session.is_torn_down());
        assert!(!h.session.status().is_processing(LOADING));
    }
}
