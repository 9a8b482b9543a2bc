use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::sync::Arc;

use guidepost::auth::StaticAuth;
use guidepost::config::Config;
use guidepost::logging;
use guidepost::modules::{ModuleKind, Offer, Onboarding, WorkflowModule};
use guidepost::persistence::FileGateway;
use guidepost::session::{GenerateOutcome, LoadOutcome, ModuleSession, SaveOutcome};
use guidepost::workflow::{Navigation, StepStatus};

#[derive(Parser)]
#[command(name = "guidepost")]
#[command(about = "Stepped guided-authoring workflows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workflow module to operate on
    #[arg(short, long, value_enum, default_value = "offer", global = true)]
    module: ModuleKind,

    /// Act as this user (overrides session.user)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List steps with their status and phase progress
    Steps,

    /// Print the stored form data
    Show,

    /// Set a field and save
    Set {
        /// Field name (camelCase, e.g. desiredResult)
        field: String,

        /// JSON value; plain text is stored as a string
        value: String,

        /// Patch the auxiliary container (pricing) instead of the form
        #[arg(long)]
        secondary: bool,
    },

    /// Generate content for a field and save
    Generate {
        /// Generation target (e.g. advantages)
        target: String,
    },

    /// Check whether a step can be entered from the start
    Goto {
        /// Step id (e.g. pricing)
        step: String,
    },

    /// Rewrite the stored record in the current schema
    Migrate,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.user.is_some() {
        config.session.user.clone_from(&cli.user);
    }

    let logging_handle = logging::init_logging(&config, cli.debug)?;

    let result = match cli.module {
        ModuleKind::Offer => run::<Offer>(&config, cli.command).await,
        ModuleKind::Onboarding => run::<Onboarding>(&config, cli.command).await,
    };

    if let Some(log_path) = logging_handle.log_file_path {
        if log_path.metadata().is_ok_and(|m| m.len() > 0) {
            eprintln!("Session log: {}", log_path.display());
        }
    }

    result
}

async fn run<M: WorkflowModule>(config: &Config, command: Commands) -> Result<()> {
    let auth = Arc::new(StaticAuth::new(config.session.user.clone()));
    let gateway = Arc::new(FileGateway::new(config.data_path(), auth.clone()));
    let session = ModuleSession::<M>::builder(gateway, auth)
        .from_config(config)
        .build()
        .context("Failed to build session")?;

    let loaded = match session.load().await {
        LoadOutcome::Restored { from_version, .. } => Some(from_version),
        LoadOutcome::Empty => None,
        LoadOutcome::Failed(e) => return Err(anyhow!(e).context("Failed to load record")),
        other => bail!("load did not complete: {other:?}"),
    };

    match command {
        Commands::Steps => cmd_steps(&session),
        Commands::Show => cmd_show(&session),
        Commands::Set {
            field,
            value,
            secondary,
        } => cmd_set(&session, &field, &value, secondary).await,
        Commands::Generate { target } => cmd_generate(&session, &target).await,
        Commands::Goto { step } => cmd_goto(&session, &step),
        Commands::Migrate => cmd_migrate(&session, loaded).await,
    }
}

fn cmd_steps<M: WorkflowModule>(session: &ModuleSession<M>) -> Result<()> {
    println!("{} steps", M::DISPLAY_NAME);
    println!("{}", "─".repeat(60));

    for summary in session.step_summaries() {
        let glyph = match summary.status {
            StepStatus::Complete => "✓",
            StepStatus::Unlocked => "○",
            StepStatus::Locked => "·",
        };
        println!(
            "{} {:>2}. {:<28} {:<12} {}",
            glyph,
            summary.index + 1,
            summary.title,
            summary.phase,
            summary.id
        );
    }

    println!();
    for phase in session.progress() {
        println!("{}: {}/{}", phase.phase, phase.completed, phase.total);
    }
    Ok(())
}

fn cmd_show<M: WorkflowModule>(session: &ModuleSession<M>) -> Result<()> {
    let output = json!({
        "module": M::KEY,
        "id": session.record_id(),
        "form": session.primary().snapshot(),
        "secondary": session.secondary().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_set<M: WorkflowModule>(
    session: &ModuleSession<M>,
    field: &str,
    value: &str,
    secondary: bool,
) -> Result<()> {
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    let mut patch = serde_json::Map::new();
    patch.insert(field.to_string(), value);
    let patch = Value::Object(patch);

    if secondary {
        session.patch_secondary(&patch)?;
    } else {
        session.patch_primary(&patch)?;
    }
    report_save(session.handle_save().await)
}

async fn cmd_generate<M: WorkflowModule>(session: &ModuleSession<M>, target: &str) -> Result<()> {
    match session.generate(target).await {
        GenerateOutcome::Applied { fallback } => {
            if fallback {
                println!("Generator unavailable, used the fallback template");
            }
        }
        GenerateOutcome::UnknownTarget => bail!(
            "unknown target '{target}', expected one of: {}",
            M::generation_targets().join(", ")
        ),
        other => bail!("generation did not complete: {other:?}"),
    }
    report_save(session.handle_save().await)
}

fn cmd_goto<M: WorkflowModule>(session: &ModuleSession<M>, step: &str) -> Result<()> {
    let index = session
        .graph()
        .steps()
        .iter()
        .position(|s| s.id.0 == step)
        .with_context(|| format!("unknown step '{step}'"))?;

    match session.go_to_step(index) {
        Navigation::Moved { .. } => println!("{step} is unlocked"),
        Navigation::Blocked { reason } => println!("{step} is blocked: {reason:?}"),
    }
    Ok(())
}

async fn cmd_migrate<M: WorkflowModule>(
    session: &ModuleSession<M>,
    loaded: Option<u32>,
) -> Result<()> {
    let Some(from_version) = loaded else {
        println!("Nothing stored for {}", M::KEY);
        return Ok(());
    };
    let current = M::schema().current_version;
    match session.handle_save().await {
        SaveOutcome::Saved { id } => {
            println!("Migrated {id} from schema version {from_version} to {current}");
            Ok(())
        }
        other => report_save(other),
    }
}

fn report_save(outcome: SaveOutcome) -> Result<()> {
    match outcome {
        SaveOutcome::Saved { id } => {
            println!("Saved {id}");
            Ok(())
        }
        SaveOutcome::TitleRequired => bail!("a title is required before saving (set title \"...\")"),
        SaveOutcome::AuthRequired => bail!("sign-in required: pass --user or set session.user"),
        SaveOutcome::ReadOnly => bail!("session is read-only"),
        SaveOutcome::Failed(e) => Err(anyhow!(e).context("Failed to save record")),
        other => bail!("save did not complete: {other:?}"),
    }
}
