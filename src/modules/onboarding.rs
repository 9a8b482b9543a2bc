//! Onboarding module: client profile, promise, the onboarding journey and a
//! welcome message.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{is_blank, trimmed_len, ModuleRecord, WorkflowModule};
use crate::generation::{Generated, GenerationRequest, OutputKind, SectionDraft};
use crate::persistence::reconcile::legacy;
use crate::persistence::{Migration, ReconcileError, RecordSchema};
use crate::workflow::{always, StepContext, StepDefinition, StepId};

const MIN_PROFILE_LEN: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnboardingStep {
    pub id: String,
    pub description: String,
    pub time_estimate: String,
}

/// Onboarding form data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnboardingState {
    pub title: String,
    pub client_profile: String,
    pub promise: String,
    pub onboarding_steps: Vec<OnboardingStep>,
    pub welcome_message: String,
}

impl OnboardingState {
    pub fn add_step(
        &mut self,
        description: impl Into<String>,
        time_estimate: impl Into<String>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.onboarding_steps.push(OnboardingStep {
            id: id.clone(),
            description: description.into(),
            time_estimate: time_estimate.into(),
        });
        id
    }

    pub fn update_step(&mut self, id: &str, description: impl Into<String>) -> bool {
        match self.onboarding_steps.iter_mut().find(|s| s.id == id) {
            Some(step) => {
                step.description = description.into();
                true
            }
            None => false,
        }
    }

    pub fn remove_step(&mut self, id: &str) -> bool {
        let before = self.onboarding_steps.len();
        self.onboarding_steps.retain(|s| s.id != id);
        self.onboarding_steps.len() != before
    }

    /// Move the step at `from` to position `to`; out-of-range moves are ignored
    pub fn move_step(&mut self, from: usize, to: usize) -> bool {
        let len = self.onboarding_steps.len();
        if from >= len || to >= len {
            return false;
        }
        let step = self.onboarding_steps.remove(from);
        self.onboarding_steps.insert(to, step);
        true
    }
}

/// Persisted onboarding payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnboardingRecord {
    pub title: String,
    pub client_profile: String,
    pub promise: String,
    pub onboarding_steps: Vec<OnboardingStep>,
    pub welcome_message: String,
}

impl ModuleRecord for OnboardingRecord {
    const ALLOW_LIST: &'static [&'static str] = &[
        "title",
        "clientProfile",
        "promise",
        "onboardingSteps",
        "welcomeMessage",
    ];

    fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for step in &self.onboarding_steps {
            if is_blank(&step.id) {
                problems.push("onboarding step without an id".to_string());
            } else if !seen.insert(step.id.as_str()) {
                problems.push(format!("duplicate onboarding step id '{}'", step.id));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

fn migrate_v1(payload: Value) -> Result<Value, ReconcileError> {
    let Value::Object(object) = payload else {
        return Err(ReconcileError::NotAnObject);
    };

    let record = OnboardingRecord {
        title: legacy::text(&object, "name").unwrap_or_default(),
        client_profile: legacy::text(&object, "clientDescription").unwrap_or_default(),
        promise: legacy::text(&object, "outcome").unwrap_or_default(),
        onboarding_steps: legacy::list(&object, "steps")
            .iter()
            .filter_map(|entry| {
                let description = legacy::entry_text(entry, &["title", "description"])?;
                let time_estimate = entry
                    .as_object()
                    .and_then(|o| legacy::text(o, "duration"))
                    .unwrap_or_default();
                Some((description, time_estimate))
            })
            .enumerate()
            .map(|(i, (description, time_estimate))| OnboardingStep {
                id: format!("step-{}", i + 1),
                description,
                time_estimate,
            })
            .collect(),
        welcome_message: legacy::text(&object, "welcomeEmail").unwrap_or_default(),
    };

    serde_json::to_value(record).map_err(|e| ReconcileError::MigrationFailed {
        from: 1,
        message: e.to_string(),
    })
}

static SCHEMA: RecordSchema = RecordSchema {
    current_version: 2,
    markers: &["clientProfile", "onboardingSteps", "welcomeMessage"],
    migrations: &[Migration {
        from: 1,
        apply: migrate_v1,
    }],
};

type Ctx<'a> = StepContext<'a, Onboarding>;

fn client_done(ctx: &Ctx<'_>) -> bool {
    trimmed_len(&ctx.primary.client_profile) >= MIN_PROFILE_LEN
}

fn has_client(ctx: &Ctx<'_>) -> bool {
    !is_blank(&ctx.primary.client_profile)
}

fn promise_done(ctx: &Ctx<'_>) -> bool {
    trimmed_len(&ctx.primary.promise) >= MIN_PROFILE_LEN
}

fn has_promise(ctx: &Ctx<'_>) -> bool {
    !is_blank(&ctx.primary.promise)
}

fn journey_done(ctx: &Ctx<'_>) -> bool {
    let steps = &ctx.primary.onboarding_steps;
    !steps.is_empty()
        && steps.iter().all(|s| !is_blank(&s.description))
        && !ctx.is_processing("onboardingSteps")
}

fn has_steps(ctx: &Ctx<'_>) -> bool {
    !ctx.primary.onboarding_steps.is_empty()
}

fn welcome_done(ctx: &Ctx<'_>) -> bool {
    !is_blank(&ctx.primary.welcome_message) && !ctx.is_processing("welcomeMessage")
}

fn has_welcome(ctx: &Ctx<'_>) -> bool {
    !is_blank(&ctx.primary.welcome_message)
}

fn review_done(ctx: &Ctx<'_>) -> bool {
    !is_blank(&ctx.primary.title)
}

#[derive(Debug)]
pub struct Onboarding;

impl WorkflowModule for Onboarding {
    type Primary = OnboardingState;
    type Secondary = ();
    type Record = OnboardingRecord;

    const KEY: &'static str = "onboarding";
    const DISPLAY_NAME: &'static str = "Client onboarding";

    fn steps() -> Vec<StepDefinition<Self>> {
        vec![
            StepDefinition {
                id: StepId("client"),
                title: "Describe your client",
                phase: "Foundation",
                prerequisites: vec![],
                unlock: always,
                complete: client_done,
            },
            StepDefinition {
                id: StepId("promise"),
                title: "State the promise",
                phase: "Foundation",
                prerequisites: vec![StepId("client")],
                unlock: has_client,
                complete: promise_done,
            },
            StepDefinition {
                id: StepId("journey"),
                title: "Map the journey",
                phase: "Journey",
                prerequisites: vec![StepId("promise")],
                unlock: has_promise,
                complete: journey_done,
            },
            StepDefinition {
                id: StepId("welcome"),
                title: "Write the welcome",
                phase: "Journey",
                prerequisites: vec![StepId("journey")],
                unlock: has_steps,
                complete: welcome_done,
            },
            StepDefinition {
                id: StepId("review"),
                title: "Review",
                phase: "Launch",
                prerequisites: vec![StepId("welcome")],
                unlock: has_welcome,
                complete: review_done,
            },
        ]
    }

    fn schema() -> &'static RecordSchema {
        &SCHEMA
    }

    fn title(primary: &OnboardingState) -> &str {
        &primary.title
    }

    fn set_title(primary: &mut OnboardingState, title: String) {
        primary.title = title;
    }

    fn to_record(primary: &OnboardingState, _: &()) -> OnboardingRecord {
        OnboardingRecord {
            title: primary.title.clone(),
            client_profile: primary.client_profile.clone(),
            promise: primary.promise.clone(),
            onboarding_steps: primary.onboarding_steps.clone(),
            welcome_message: primary.welcome_message.clone(),
        }
    }

    fn from_record(record: OnboardingRecord) -> (OnboardingState, ()) {
        let state = OnboardingState {
            title: record.title,
            client_profile: record.client_profile,
            promise: record.promise,
            onboarding_steps: record.onboarding_steps,
            welcome_message: record.welcome_message,
        };
        (state, ())
    }

    fn generation_targets() -> &'static [&'static str] {
        &["onboardingSteps", "welcomeMessage"]
    }

    fn generation_request(
        target: &str,
        primary: &OnboardingState,
        _: &(),
    ) -> Option<GenerationRequest> {
        let output = match target {
            "onboardingSteps" => OutputKind::Suggestions,
            "welcomeMessage" => OutputKind::Section,
            _ => return None,
        };
        let steps: Vec<&str> = primary
            .onboarding_steps
            .iter()
            .map(|s| s.description.as_str())
            .collect();
        Some(GenerationRequest {
            target: target.to_string(),
            output,
            context: json!({
                "title": primary.title,
                "clientProfile": primary.client_profile,
                "promise": primary.promise,
                "steps": steps,
            }),
        })
    }

    fn fallback_templates() -> &'static [(&'static str, &'static str)] {
        &[
            (
                "onboardingSteps",
                "Kickoff call | 45 minutes\n\
                 Share the welcome pack | 10 minutes\n\
                 {{#if promise}}First milestone toward {{promise}}{{else}}First milestone review{{/if}} | 1 week",
            ),
            (
                "welcomeMessage",
                "Welcome aboard!\n\
                 {{#if promise}}Together we will reach {{promise}}.{{/if}}\n\
                 {{#each steps}}- {{this}}\n{{/each}}\
                 Reply to this message with any questions.",
            ),
        ]
    }

    fn apply_generated(target: &str, generated: Generated, primary: &mut OnboardingState) {
        match target {
            "onboardingSteps" => {
                for suggestion in generated.into_suggestions() {
                    if !is_blank(&suggestion.text) {
                        primary.add_step(suggestion.text, suggestion.description.unwrap_or_default());
                    }
                }
            }
            "welcomeMessage" => {
                let SectionDraft { heading, body } = generated.into_section();
                primary.welcome_message = format!("{heading}\n\n{body}").trim().to_string();
            }
            other => {
                tracing::warn!(field = other, "ignoring output for unknown onboarding target");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::FallbackTemplates;
    use crate::persistence::{reconcile, Reconciled};
    use crate::store::ProcessingState;
    use crate::workflow::{StepGraph, StepStatus};

    fn restore(raw: Value) -> OnboardingState {
        match reconcile::<Onboarding>(Some(raw)).unwrap() {
            Reconciled::Restored(restored) => restored.primary,
            Reconciled::Empty => panic!("expected a restored record"),
        }
    }

    fn statuses(state: &OnboardingState) -> Vec<StepStatus> {
        let graph = StepGraph::new(Onboarding::steps()).unwrap();
        let processing = ProcessingState::default();
        let ctx = StepContext {
            primary: state,
            secondary: &(),
            processing: &processing,
        };
        (0..graph.len()).map(|i| graph.status(i, &ctx)).collect()
    }

    #[test]
    fn test_step_chain() {
        use StepStatus::*;
        let mut state = OnboardingState::default();
        assert_eq!(statuses(&state), vec![Unlocked, Locked, Locked, Locked, Locked]);

        state.client_profile = "Agency owners scaling past ten clients".to_string();
        state.promise = "Live in two weeks".to_string();
        state.add_step("Kickoff call", "45 minutes");
        assert_eq!(
            statuses(&state),
            vec![Complete, Complete, Complete, Unlocked, Locked]
        );
    }

    #[test]
    fn test_move_step() {
        let mut state = OnboardingState::default();
        let first = state.add_step("a", "");
        state.add_step("b", "");
        assert!(state.move_step(0, 1));
        assert_eq!(state.onboarding_steps[1].id, first);
        assert!(!state.move_step(0, 5));
    }

    #[test]
    fn test_legacy_record_is_migrated() {
        let state = restore(json!({
            "name": "Agency onboarding",
            "clientDescription": "Agency owners",
            "outcome": "Live in two weeks",
            "steps": ["Kickoff", { "title": "Access setup", "duration": "1 day" }, 7],
            "welcomeEmail": "Hi there"
        }));
        assert_eq!(state.title, "Agency onboarding");
        assert_eq!(state.client_profile, "Agency owners");
        assert_eq!(state.onboarding_steps.len(), 2);
        assert_eq!(state.onboarding_steps[1].id, "step-2");
        assert_eq!(state.onboarding_steps[1].time_estimate, "1 day");
        assert_eq!(state.welcome_message, "Hi there");
    }

    #[test]
    fn test_legacy_record_without_known_fields_uses_defaults() {
        assert_eq!(restore(json!({ "foo": 1 })), OnboardingState::default());
    }

    #[test]
    fn test_rejects_duplicate_step_ids() {
        let raw = json!({
            "onboardingSteps": [{ "id": "s" }, { "id": "s" }]
        });
        assert!(matches!(
            reconcile::<Onboarding>(Some(raw)).unwrap_err(),
            ReconcileError::Rejected(_)
        ));
    }

    #[test]
    fn test_generated_steps_keep_time_estimates() {
        let templates = FallbackTemplates::new(Onboarding::fallback_templates()).unwrap();
        let mut state = OnboardingState {
            promise: "launch day".to_string(),
            ..Default::default()
        };
        let request = Onboarding::generation_request("onboardingSteps", &state, &()).unwrap();
        Onboarding::apply_generated("onboardingSteps", templates.render(&request), &mut state);

        assert_eq!(state.onboarding_steps.len(), 3);
        assert_eq!(state.onboarding_steps[0].time_estimate, "45 minutes");
        assert_eq!(
            state.onboarding_steps[2].description,
            "First milestone toward launch day"
        );
    }

    #[test]
    fn test_welcome_fallback_is_never_blank() {
        let templates = FallbackTemplates::new(Onboarding::fallback_templates()).unwrap();
        let mut state = OnboardingState::default();
        let request = Onboarding::generation_request("welcomeMessage", &state, &()).unwrap();
        Onboarding::apply_generated("welcomeMessage", templates.render(&request), &mut state);
        assert!(state.welcome_message.starts_with("Welcome aboard!"));
    }
}
