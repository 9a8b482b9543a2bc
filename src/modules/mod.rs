//! Workflow modules: per-module field sets, steps and record schemas
//!
//! Every module shares the same engine. A module only declares its
//! snapshot types, its ordered steps, its persisted record shape and the
//! generation targets it offers.

pub mod offer;
pub mod onboarding;

pub use offer::Offer;
pub use onboarding::Onboarding;

use std::fmt::Debug;

use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::generation::{Generated, GenerationRequest};
use crate::persistence::RecordSchema;
use crate::store::Snapshot;
use crate::workflow::StepDefinition;

/// Typed payload persisted for a module.
///
/// Only the allow-listed top-level fields of the serialized record reach a
/// gateway; anything else is dropped when the envelope is built.
pub trait ModuleRecord:
    Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
    /// Top-level field names a stored payload may carry
    const ALLOW_LIST: &'static [&'static str];

    /// Check a deserialized record before it reaches the containers
    fn validate(&self) -> Result<(), Vec<String>>;
}

/// One independently configured instance of the workflow engine
pub trait WorkflowModule: Sized + Send + Sync + 'static {
    /// Main form data
    type Primary: Snapshot;
    /// Auxiliary container (pricing for the offer module)
    type Secondary: Snapshot;
    type Record: ModuleRecord;

    /// Storage key and envelope discriminator
    const KEY: &'static str;
    const DISPLAY_NAME: &'static str;

    fn steps() -> Vec<StepDefinition<Self>>;

    fn schema() -> &'static RecordSchema;

    /// Record title; saving is refused while it is blank
    fn title(primary: &Self::Primary) -> &str;

    fn set_title(primary: &mut Self::Primary, title: String);

    fn to_record(primary: &Self::Primary, secondary: &Self::Secondary) -> Self::Record;

    fn from_record(record: Self::Record) -> (Self::Primary, Self::Secondary);

    /// Field names content can be generated for
    fn generation_targets() -> &'static [&'static str];

    /// Build the generator request for `target`, `None` if unknown
    fn generation_request(
        target: &str,
        primary: &Self::Primary,
        secondary: &Self::Secondary,
    ) -> Option<GenerationRequest>;

    /// Handlebars templates rendered when the generator fails
    fn fallback_templates() -> &'static [(&'static str, &'static str)];

    /// Write generated content into the form
    fn apply_generated(target: &str, generated: Generated, primary: &mut Self::Primary);
}

/// Module selector for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModuleKind {
    Offer,
    Onboarding,
}

impl ModuleKind {
    pub fn key(self) -> &'static str {
        match self {
            ModuleKind::Offer => Offer::KEY,
            ModuleKind::Onboarding => Onboarding::KEY,
        }
    }
}

/// Characters in `text` ignoring surrounding whitespace
pub(crate) fn trimmed_len(text: &str) -> usize {
    text.trim().chars().count()
}

pub(crate) fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}
