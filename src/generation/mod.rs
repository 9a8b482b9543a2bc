//! Content-generation collaborator contract
//!
//! The generator itself is opaque: it receives a target name plus a JSON
//! context and returns either a list of suggestions or a section draft.
//! Failures are never fatal; sessions substitute a rendered fallback.

mod fallback;

pub use fallback::{FallbackTemplates, TemplateGenerator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a content generator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("generation timed out after {0}s")]
    Timeout(u64),

    #[error("generator returned unusable output: {0}")]
    InvalidOutput(String),

    #[error("no generation target named '{0}'")]
    UnknownTarget(String),

    #[error("fallback template error: {0}")]
    Template(String),
}

/// Shape of output a target expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Suggestions,
    Section,
}

/// What to generate and from which data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Target field; doubles as the processing-state key
    pub target: String,
    pub output: OutputKind,
    pub context: Value,
}

/// One proposed list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Suggestion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            description: None,
        }
    }
}

/// A drafted block of copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDraft {
    pub heading: String,
    pub body: String,
}

/// Generator output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Generated {
    Suggestions(Vec<Suggestion>),
    Section(SectionDraft),
}

impl Generated {
    /// View the output as suggestions, one per section line
    pub fn into_suggestions(self) -> Vec<Suggestion> {
        match self {
            Generated::Suggestions(list) => list,
            Generated::Section(section) => std::iter::once(section.heading)
                .chain(section.body.lines().map(str::to_string))
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .map(Suggestion::new)
                .collect(),
        }
    }

    /// View the output as a section, first suggestion as the heading
    pub fn into_section(self) -> SectionDraft {
        match self {
            Generated::Section(section) => section,
            Generated::Suggestions(list) => {
                let mut lines = list.into_iter().map(|s| s.text);
                SectionDraft {
                    heading: lines.next().unwrap_or_default(),
                    body: lines.collect::<Vec<_>>().join("\n"),
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Generated::Suggestions(list) => list.iter().all(|s| s.text.trim().is_empty()),
            Generated::Section(section) => {
                section.heading.trim().is_empty() && section.body.trim().is_empty()
            }
        }
    }
}

/// Opaque content-generation service
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generated, GenerationError>;
}
