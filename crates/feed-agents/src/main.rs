//! `feed-agents` command line.
//!
//! ```bash
//! # Generate a batch of posts
//! feed-agents --config feedme.yaml run --count 5
//!
//! # One post on a given theme, streaming NDJSON progress to stdout
//! feed-agents post --theme "fog over the harbor" --format photo
//!
//! # Approved posts, newest first
//! feed-agents list
//!
//! # Print (or regenerate) the cross-run state
//! feed-agents state --reset
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use feed_agents::agents::{AgentFactory, AgentSource};
use feed_agents::collaborators::PostIndex;
use feed_agents::config::Settings;
use feed_agents::orchestrator::{build_pipeline, BatchOrchestrator};
use feed_agents::registry::open_store;
use feed_agents::telemetry::init_tracing;
use feed_coordination::events::{spawn_with_progress, write_ndjson};
use feed_coordination::production::{PostInput, PostWorkspace};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (overrides FEEDME_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a batch of posts
    Run {
        /// Number of posts (defaults to posts.count)
        #[arg(long)]
        count: Option<usize>,
    },
    /// Produce one post on a given theme
    Post {
        #[arg(long)]
        theme: String,
        #[arg(long, default_value = "photo")]
        format: String,
        /// Supplied image source to rank instead of generating (repeatable)
        #[arg(long = "image")]
        images: Vec<String>,
        /// Interest to put on the crew (repeatable; sampled when omitted)
        #[arg(long = "interest")]
        interests: Vec<String>,
    },
    /// List approved posts, newest first
    List,
    /// Print the cross-run state
    State {
        /// Discard the saved state and generate a fresh one
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
}

fn orchestrator(settings: Settings) -> Result<BatchOrchestrator> {
    let source: Arc<dyn AgentSource> = Arc::new(AgentFactory::new(&settings.llm, &settings.agents)?);
    let pipeline = build_pipeline(&settings)?;
    Ok(BatchOrchestrator::new(settings, source, pipeline))
}

async fn run(settings: Settings, count: Option<usize>) -> Result<()> {
    let count = count.unwrap_or(settings.posts.count as usize);
    let mut orchestrator = orchestrator(settings)?;
    info!(count, "Starting batch");
    let report = orchestrator.run_batch(count).await?;
    info!(
        approved = report.summary.approved_posts,
        rejected = report.summary.rejected_posts,
        failed = report.summary.failed_posts,
        elapsed_secs = format!("{:.1}", report.elapsed_secs),
        "Batch complete"
    );
    Ok(())
}

async fn post(
    settings: Settings,
    theme: String,
    format: String,
    images: Vec<String>,
    interests: Vec<String>,
) -> Result<()> {
    let mut orchestrator = orchestrator(settings)?;
    let interests = if interests.is_empty() {
        orchestrator.choose_interests()
    } else {
        interests
    };
    let crew = orchestrator.crew_for(&interests);
    if crew.interests().is_empty() {
        bail!("None of the interests {interests:?} is in the catalog");
    }
    let input = PostInput::new(theme, format).with_images(images);

    let (handle, receiver) = spawn_with_progress(move |tracer| async move {
        let mut orchestrator = orchestrator.with_tracer(tracer);
        match orchestrator.run_post(&input, &crew).await {
            Ok(outcome) => outcome.to_json(),
            Err(e) => json!({"status": "error", "error": format!("{e:#}")}),
        }
    });

    let mut stdout = tokio::io::stdout();
    write_ndjson(receiver, &mut stdout)
        .await
        .context("Failed to stream progress")?;
    handle.await.context("Post task panicked")?;
    Ok(())
}

fn list(settings: &Settings) -> Result<()> {
    let approved = PostWorkspace::new(&settings.root).approved_dir();
    let entries = PostIndex::list(&approved)?;
    if entries.is_empty() {
        info!(path = %approved.display(), "No approved posts");
    }
    for entry in entries {
        println!(
            "{}  {}  ({} images)  {}",
            entry.timestamp,
            entry.title,
            entry.images.len(),
            entry.folder.display()
        );
    }
    Ok(())
}

fn state(settings: &Settings, reset: bool) -> Result<()> {
    let path = settings.state_path();
    if reset && path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        warn!(path = %path.display(), "Discarded saved state");
    }
    match open_store(settings)? {
        Some(store) => println!("{}", serde_json::to_string_pretty(store.state())?),
        None => info!("Cross-run state is disabled"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let path = Settings::resolve_path(cli.config);
    let settings = Settings::load(&path)?;
    info!(
        config = %path.display(),
        root = %settings.root.display(),
        llm = %settings.llm.url,
        images = %settings.images.url,
        "Settings loaded"
    );

    match cli.command {
        Command::Run { count } => run(settings, count).await,
        Command::Post {
            theme,
            format,
            images,
            interests,
        } => post(settings, theme, format, images, interests).await,
        Command::List => list(&settings),
        Command::State { reset } => state(&settings, reset),
    }
}
