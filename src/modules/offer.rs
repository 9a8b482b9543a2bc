//! Offer module: audience, results, advantages, risks, bonuses, pricing and
//! a landing page draft.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{is_blank, trimmed_len, ModuleRecord, WorkflowModule};
use crate::generation::{Generated, GenerationRequest, OutputKind, SectionDraft};
use crate::persistence::reconcile::legacy;
use crate::persistence::{Migration, ReconcileError, RecordSchema};
use crate::workflow::{always, StepContext, StepDefinition, StepId};

/// Minimum characters before a free-text answer counts as complete
const MIN_ANSWER_LEN: usize = 10;

const DEFAULT_CURRENCY: &str = "USD";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Advantage {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Risk {
    pub id: String,
    pub text: String,
}

/// Answer to a risk; `risk_id` is a soft reference that may dangle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Assurance {
    pub id: String,
    pub risk_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bonus {
    pub id: String,
    pub name: String,
    pub benefit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Offer form data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferState {
    pub title: String,
    pub audience: String,
    pub desired_result: String,
    pub advantages: Vec<Advantage>,
    pub risks: Vec<Risk>,
    pub assurances: Vec<Assurance>,
    pub bonuses: Vec<Bonus>,
    pub landing_page: Option<SectionDraft>,
    /// Assistant conversation, never persisted
    pub chat_transcript: Vec<ChatMessage>,
}

impl OfferState {
    pub fn add_advantage(&mut self, text: impl Into<String>, description: Option<String>) -> String {
        let id = new_id();
        self.advantages.push(Advantage {
            id: id.clone(),
            text: text.into(),
            description,
        });
        id
    }

    pub fn update_advantage(&mut self, id: &str, text: impl Into<String>) -> bool {
        match self.advantages.iter_mut().find(|a| a.id == id) {
            Some(advantage) => {
                advantage.text = text.into();
                true
            }
            None => false,
        }
    }

    pub fn remove_advantage(&mut self, id: &str) -> bool {
        let before = self.advantages.len();
        self.advantages.retain(|a| a.id != id);
        self.advantages.len() != before
    }

    pub fn add_risk(&mut self, text: impl Into<String>) -> String {
        let id = new_id();
        self.risks.push(Risk {
            id: id.clone(),
            text: text.into(),
        });
        id
    }

    /// Remove a risk; its assurances stay behind as orphans
    pub fn remove_risk(&mut self, id: &str) -> bool {
        let before = self.risks.len();
        self.risks.retain(|r| r.id != id);
        self.risks.len() != before
    }

    pub fn add_assurance(&mut self, risk_id: impl Into<String>, text: impl Into<String>) -> String {
        let id = new_id();
        self.assurances.push(Assurance {
            id: id.clone(),
            risk_id: risk_id.into(),
            text: text.into(),
        });
        id
    }

    pub fn remove_assurance(&mut self, id: &str) -> bool {
        let before = self.assurances.len();
        self.assurances.retain(|a| a.id != id);
        self.assurances.len() != before
    }

    /// Ids of risks no assurance answers yet, in risk order
    pub fn risks_without_assurances(&self) -> Vec<String> {
        self.risks
            .iter()
            .filter(|r| !self.assurances.iter().any(|a| a.risk_id == r.id))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Ids of assurances whose risk no longer exists
    pub fn orphaned_assurances(&self) -> Vec<String> {
        self.assurances
            .iter()
            .filter(|a| !self.risks.iter().any(|r| r.id == a.risk_id))
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn add_bonus(
        &mut self,
        name: impl Into<String>,
        benefit: impl Into<String>,
        value: Option<f64>,
    ) -> String {
        let id = new_id();
        self.bonuses.push(Bonus {
            id: id.clone(),
            name: name.into(),
            benefit: benefit.into(),
            value,
        });
        id
    }

    pub fn remove_bonus(&mut self, id: &str) -> bool {
        let before = self.bonuses.len();
        self.bonuses.retain(|b| b.id != id);
        self.bonuses.len() != before
    }

    pub fn push_chat(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.chat_transcript.push(ChatMessage {
            role: role.into(),
            content: content.into(),
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PricingPackage {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub features: Vec<String>,
}

/// Secondary container: currency and packages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PricingState {
    pub currency: String,
    pub packages: Vec<PricingPackage>,
}

impl Default for PricingState {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            packages: Vec::new(),
        }
    }
}

impl PricingState {
    pub fn add_package(&mut self, name: impl Into<String>, price: f64) -> String {
        let id = new_id();
        self.packages.push(PricingPackage {
            id: id.clone(),
            name: name.into(),
            price,
            features: Vec::new(),
        });
        id
    }

    pub fn remove_package(&mut self, id: &str) -> bool {
        let before = self.packages.len();
        self.packages.retain(|p| p.id != id);
        self.packages.len() != before
    }

    pub fn add_feature(&mut self, package_id: &str, feature: impl Into<String>) -> bool {
        match self.packages.iter_mut().find(|p| p.id == package_id) {
            Some(package) => {
                package.features.push(feature.into());
                true
            }
            None => false,
        }
    }
}

/// Persisted offer payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferRecord {
    pub title: String,
    pub audience: String,
    pub desired_result: String,
    pub advantages: Vec<Advantage>,
    pub risks: Vec<Risk>,
    pub assurances: Vec<Assurance>,
    pub bonuses: Vec<Bonus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_page: Option<SectionDraft>,
    pub pricing: PricingState,
}

impl ModuleRecord for OfferRecord {
    const ALLOW_LIST: &'static [&'static str] = &[
        "title",
        "audience",
        "desiredResult",
        "advantages",
        "risks",
        "assurances",
        "bonuses",
        "landingPage",
        "pricing",
    ];

    fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        let ids = self
            .advantages
            .iter()
            .map(|a| ("advantage", &a.id))
            .chain(self.risks.iter().map(|r| ("risk", &r.id)))
            .chain(self.assurances.iter().map(|a| ("assurance", &a.id)))
            .chain(self.bonuses.iter().map(|b| ("bonus", &b.id)))
            .chain(self.pricing.packages.iter().map(|p| ("package", &p.id)));
        let mut seen = std::collections::HashSet::new();
        for (kind, id) in ids {
            if is_blank(id) {
                problems.push(format!("{kind} without an id"));
            } else if !seen.insert((kind, id.as_str())) {
                problems.push(format!("duplicate {kind} id '{id}'"));
            }
        }

        for package in &self.pricing.packages {
            if !package.price.is_finite() || package.price < 0.0 {
                problems.push(format!("package '{}' has an invalid price", package.id));
            }
        }
        for bonus in &self.bonuses {
            if bonus.value.is_some_and(|v| !v.is_finite() || v < 0.0) {
                problems.push(format!("bonus '{}' has an invalid value", bonus.id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Lift a bare legacy offer onto the version 2 shape.
///
/// Derived entity ids are positional so that migrating the same record
/// twice produces the same result.
fn migrate_v1(payload: Value) -> Result<Value, ReconcileError> {
    let Value::Object(object) = payload else {
        return Err(ReconcileError::NotAnObject);
    };

    let mut record = OfferRecord {
        title: legacy::text(&object, "offerName").unwrap_or_default(),
        audience: legacy::text(&object, "targetAudience").unwrap_or_default(),
        desired_result: legacy::text(&object, "dreamOutcome").unwrap_or_default(),
        ..OfferRecord::default()
    };

    record.advantages = legacy::list(&object, "uniqueMechanisms")
        .iter()
        .filter_map(|entry| {
            let text = legacy::entry_text(entry, &["text", "name", "title"])?;
            let description = entry
                .as_object()
                .and_then(|o| legacy::text(o, "description"));
            Some((text, description))
        })
        .enumerate()
        .map(|(i, (text, description))| Advantage {
            id: format!("adv-{}", i + 1),
            text,
            description,
        })
        .collect();

    for (i, entry) in legacy::list(&object, "objections")
        .iter()
        .filter_map(|entry| {
            let text = legacy::entry_text(entry, &["objection", "text"])?;
            let response = entry.as_object().and_then(|o| legacy::text(o, "response"));
            Some((text, response))
        })
        .enumerate()
    {
        let (text, response) = entry;
        let risk_id = format!("risk-{}", i + 1);
        if let Some(response) = response {
            record.assurances.push(Assurance {
                id: format!("assurance-{}", i + 1),
                risk_id: risk_id.clone(),
                text: response,
            });
        }
        record.risks.push(Risk { id: risk_id, text });
    }

    record.bonuses = legacy::list(&object, "bonuses")
        .iter()
        .filter_map(|entry| {
            let name = legacy::entry_text(entry, &["title", "name"])?;
            let fields = entry.as_object();
            Some(Bonus {
                id: String::new(),
                name,
                benefit: fields
                    .and_then(|o| legacy::text(o, "description"))
                    .unwrap_or_default(),
                value: fields.and_then(|o| legacy::number(o.get("value"))),
            })
        })
        .enumerate()
        .map(|(i, bonus)| Bonus {
            id: format!("bonus-{}", i + 1),
            ..bonus
        })
        .collect();

    if let Some(price) = legacy::number(object.get("price")) {
        record.pricing = PricingState {
            currency: legacy::text(&object, "priceCurrency")
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            packages: vec![PricingPackage {
                id: "package-1".to_string(),
                name: if record.title.is_empty() {
                    "Standard".to_string()
                } else {
                    record.title.clone()
                },
                price,
                features: Vec::new(),
            }],
        };
    }

    let heading = legacy::text(&object, "headline");
    let body = legacy::text(&object, "salesCopy");
    if heading.is_some() || body.is_some() {
        record.landing_page = Some(SectionDraft {
            heading: heading.unwrap_or_default(),
            body: body.unwrap_or_default(),
        });
    }

    if object.contains_key("chatHistory") {
        tracing::debug!("legacy chat history dropped during migration");
    }

    serde_json::to_value(record).map_err(|e| ReconcileError::MigrationFailed {
        from: 1,
        message: e.to_string(),
    })
}

static SCHEMA: RecordSchema = RecordSchema {
    current_version: 2,
    markers: &["advantages", "risks", "assurances", "landingPage", "pricing"],
    migrations: &[Migration {
        from: 1,
        apply: migrate_v1,
    }],
};

type Ctx<'a> = StepContext<'a, Offer>;

fn audience_done(ctx: &Ctx<'_>) -> bool {
    trimmed_len(&ctx.primary.audience) >= MIN_ANSWER_LEN && !ctx.is_processing("audience")
}

fn has_audience(ctx: &Ctx<'_>) -> bool {
    !is_blank(&ctx.primary.audience)
}

fn results_done(ctx: &Ctx<'_>) -> bool {
    trimmed_len(&ctx.primary.desired_result) >= MIN_ANSWER_LEN
}

fn has_result(ctx: &Ctx<'_>) -> bool {
    !is_blank(&ctx.primary.desired_result)
}

fn advantages_done(ctx: &Ctx<'_>) -> bool {
    ctx.primary.advantages.iter().any(|a| !is_blank(&a.text)) && !ctx.is_processing("advantages")
}

fn has_advantages(ctx: &Ctx<'_>) -> bool {
    !ctx.primary.advantages.is_empty()
}

fn risks_done(ctx: &Ctx<'_>) -> bool {
    !ctx.primary.risks.is_empty() && ctx.primary.risks_without_assurances().is_empty()
}

fn has_risks(ctx: &Ctx<'_>) -> bool {
    !ctx.primary.risks.is_empty()
}

fn bonuses_done(ctx: &Ctx<'_>) -> bool {
    ctx.primary
        .bonuses
        .iter()
        .all(|b| !is_blank(&b.name) && !is_blank(&b.benefit))
}

fn pricing_done(ctx: &Ctx<'_>) -> bool {
    let packages = &ctx.secondary.packages;
    !packages.is_empty() && packages.iter().all(|p| p.price > 0.0 && !is_blank(&p.name))
}

fn has_packages(ctx: &Ctx<'_>) -> bool {
    !ctx.secondary.packages.is_empty()
}

fn landing_page_done(ctx: &Ctx<'_>) -> bool {
    ctx.primary
        .landing_page
        .as_ref()
        .is_some_and(|page| !is_blank(&page.heading))
        && !ctx.is_processing("landingPage")
}

#[derive(Debug)]
pub struct Offer;

impl WorkflowModule for Offer {
    type Primary = OfferState;
    type Secondary = PricingState;
    type Record = OfferRecord;

    const KEY: &'static str = "offer";
    const DISPLAY_NAME: &'static str = "Offer";

    fn steps() -> Vec<StepDefinition<Self>> {
        vec![
            StepDefinition {
                id: StepId("audience"),
                title: "Define your audience",
                phase: "Foundation",
                prerequisites: vec![],
                unlock: always,
                complete: audience_done,
            },
            StepDefinition {
                id: StepId("results"),
                title: "Define the result",
                phase: "Foundation",
                prerequisites: vec![StepId("audience")],
                unlock: has_audience,
                complete: results_done,
            },
            StepDefinition {
                id: StepId("advantages"),
                title: "List your advantages",
                phase: "Offer",
                prerequisites: vec![StepId("results")],
                unlock: has_result,
                complete: advantages_done,
            },
            StepDefinition {
                id: StepId("risks"),
                title: "Answer the risks",
                phase: "Offer",
                prerequisites: vec![StepId("advantages")],
                unlock: has_advantages,
                complete: risks_done,
            },
            StepDefinition {
                id: StepId("bonuses"),
                title: "Add bonuses",
                phase: "Offer",
                prerequisites: vec![StepId("risks")],
                unlock: has_risks,
                complete: bonuses_done,
            },
            StepDefinition {
                id: StepId("pricing"),
                title: "Set pricing",
                phase: "Packaging",
                prerequisites: vec![StepId("advantages")],
                unlock: has_advantages,
                complete: pricing_done,
            },
            StepDefinition {
                id: StepId("landing_page"),
                title: "Build the landing page",
                phase: "Launch",
                prerequisites: vec![StepId("results"), StepId("pricing")],
                unlock: has_packages,
                complete: landing_page_done,
            },
        ]
    }

    fn schema() -> &'static RecordSchema {
        &SCHEMA
    }

    fn title(primary: &OfferState) -> &str {
        &primary.title
    }

    fn set_title(primary: &mut OfferState, title: String) {
        primary.title = title;
    }

    fn to_record(primary: &OfferState, secondary: &PricingState) -> OfferRecord {
        OfferRecord {
            title: primary.title.clone(),
            audience: primary.audience.clone(),
            desired_result: primary.desired_result.clone(),
            advantages: primary.advantages.clone(),
            risks: primary.risks.clone(),
            assurances: primary.assurances.clone(),
            bonuses: primary.bonuses.clone(),
            landing_page: primary.landing_page.clone(),
            pricing: secondary.clone(),
        }
    }

    fn from_record(record: OfferRecord) -> (OfferState, PricingState) {
        let primary = OfferState {
            title: record.title,
            audience: record.audience,
            desired_result: record.desired_result,
            advantages: record.advantages,
            risks: record.risks,
            assurances: record.assurances,
            bonuses: record.bonuses,
            landing_page: record.landing_page,
            chat_transcript: Vec::new(),
        };
        (primary, record.pricing)
    }

    fn generation_targets() -> &'static [&'static str] {
        &["audience", "advantages", "landingPage"]
    }

    fn generation_request(
        target: &str,
        primary: &OfferState,
        secondary: &PricingState,
    ) -> Option<GenerationRequest> {
        let (output, context) = match target {
            "audience" => (
                OutputKind::Suggestions,
                json!({
                    "title": primary.title,
                    "desiredResult": primary.desired_result,
                }),
            ),
            "advantages" => (
                OutputKind::Suggestions,
                json!({
                    "audience": primary.audience,
                    "desiredResult": primary.desired_result,
                    "existing": advantage_texts(primary),
                }),
            ),
            "landingPage" => {
                let mut context = Map::new();
                context.insert("title".into(), json!(primary.title));
                context.insert("audience".into(), json!(primary.audience));
                context.insert("desiredResult".into(), json!(primary.desired_result));
                context.insert("advantages".into(), json!(advantage_texts(primary)));
                context.insert("currency".into(), json!(secondary.currency));
                if let Some(package) = secondary.packages.first() {
                    context.insert("price".into(), json!(package.price));
                }
                (OutputKind::Section, Value::Object(context))
            }
            _ => return None,
        };
        Some(GenerationRequest {
            target: target.to_string(),
            output,
            context,
        })
    }

    fn fallback_templates() -> &'static [(&'static str, &'static str)] {
        &[
            (
                "audience",
                "{{#if desiredResult}}People who want {{desiredResult}}{{else}}People who need {{title}}{{/if}}",
            ),
            (
                "advantages",
                "{{#if desiredResult}}A clear path to {{desiredResult}} | Step-by-step guidance for {{audience}}\n{{/if}}\
                 Personal support at every stage | Questions answered while you work\n\
                 Proven templates you can reuse | Less time spent starting from scratch",
            ),
            (
                "landingPage",
                "{{#if title}}{{title}}{{else}}Your new offer{{/if}}\n\
                 {{#if audience}}Built for {{audience}}.{{/if}} {{#if desiredResult}}Get {{desiredResult}}.{{/if}}\n\
                 {{#each advantages}}- {{this}}\n{{/each}}\
                 {{#if price}}Join today for {{price}} {{currency}}.{{/if}}",
            ),
        ]
    }

    fn apply_generated(target: &str, generated: Generated, primary: &mut OfferState) {
        match target {
            "audience" => {
                if let Some(first) = generated
                    .into_suggestions()
                    .into_iter()
                    .find(|s| !is_blank(&s.text))
                {
                    primary.audience = first.text;
                }
            }
            "advantages" => {
                for suggestion in generated.into_suggestions() {
                    if !is_blank(&suggestion.text) {
                        primary.add_advantage(suggestion.text, suggestion.description);
                    }
                }
            }
            "landingPage" => primary.landing_page = Some(generated.into_section()),
            other => tracing::warn!(field = other, "ignoring output for unknown offer target"),
        }
    }
}

fn advantage_texts(primary: &OfferState) -> Vec<&str> {
    primary
        .advantages
        .iter()
        .map(|a| a.text.as_str())
        .filter(|t| !is_blank(t))
        .collect()
}
