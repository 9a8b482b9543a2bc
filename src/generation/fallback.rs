//! Handlebars-rendered fallback copy for generation targets
//!
//! Each target registers a template. Rendered output is split into lines:
//! for suggestion targets every non-empty line becomes one suggestion (an
//! optional `text | description` split is honoured); for section targets
//! the first line is the heading and the rest is the body.

use async_trait::async_trait;
use handlebars::Handlebars;

use super::{
    ContentGenerator, Generated, GenerationError, GenerationRequest, OutputKind, SectionDraft,
    Suggestion,
};

/// Deterministic fallback renderer
pub struct FallbackTemplates {
    handlebars: Handlebars<'static>,
}

impl std::fmt::Debug for FallbackTemplates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut targets: Vec<&String> = self.handlebars.get_templates().keys().collect();
        targets.sort();
        f.debug_struct("FallbackTemplates")
            .field("targets", &targets)
            .finish()
    }
}

impl FallbackTemplates {
    /// Register one template per target
    pub fn new(templates: &[(&str, &str)]) -> Result<Self, GenerationError> {
        let mut handlebars = Handlebars::new();
        // Plain text output, no HTML entities
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(false);

        for (target, template) in templates {
            handlebars
                .register_template_string(target, template)
                .map_err(|e| GenerationError::Template(format!("{target}: {e}")))?;
        }
        Ok(Self { handlebars })
    }

    pub fn has_target(&self, target: &str) -> bool {
        self.handlebars.has_template(target)
    }

    /// Render the template for `request.target`
    pub fn try_render(&self, request: &GenerationRequest) -> Result<Generated, GenerationError> {
        if !self.has_target(&request.target) {
            return Err(GenerationError::UnknownTarget(request.target.clone()));
        }
        let text = self
            .handlebars
            .render(&request.target, &request.context)
            .map_err(|e| GenerationError::Template(e.to_string()))?;

        Ok(parse_output(&text, request.output))
    }

    /// Render a fallback that is never blank
    pub fn render(&self, request: &GenerationRequest) -> Generated {
        match self.try_render(request) {
            Ok(generated) if !generated.is_empty() => generated,
            Ok(_) => placeholder(request),
            Err(e) => {
                tracing::warn!(field = %request.target, error = %e, "fallback template failed");
                placeholder(request)
            }
        }
    }
}

fn parse_output(text: &str, output: OutputKind) -> Generated {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    match output {
        OutputKind::Suggestions => Generated::Suggestions(
            lines
                .map(|line| match line.split_once(" | ") {
                    Some((text, description)) => Suggestion {
                        text: text.trim().to_string(),
                        description: Some(description.trim().to_string()),
                    },
                    None => Suggestion::new(line),
                })
                .collect(),
        ),
        OutputKind::Section => Generated::Section(SectionDraft {
            heading: lines.next().unwrap_or_default().to_string(),
            body: lines.collect::<Vec<_>>().join("\n"),
        }),
    }
}

fn placeholder(request: &GenerationRequest) -> Generated {
    let text = format!("Add your {} here", humanize(&request.target));
    match request.output {
        OutputKind::Suggestions => Generated::Suggestions(vec![Suggestion::new(text)]),
        OutputKind::Section => Generated::Section(SectionDraft {
            heading: text,
            body: String::new(),
        }),
    }
}

/// `landingPage` -> `landing page`
fn humanize(target: &str) -> String {
    let mut out = String::with_capacity(target.len() + 4);
    for c in target.chars() {
        if c.is_ascii_uppercase() {
            out.push(' ');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Offline generator that renders the fallback templates.
///
/// Used by the CLI where no remote generator is configured.
pub struct TemplateGenerator {
    templates: FallbackTemplates,
}

impl TemplateGenerator {
    pub fn new(templates: FallbackTemplates) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generated, GenerationError> {
        self.templates.try_render(request)
    }
}
