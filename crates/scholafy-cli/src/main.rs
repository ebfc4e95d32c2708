//! Scholafy CLI
//!
//! Runs the parent monitor server, renders saved session reports and checks
//! lesson files.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use scholafy_insight::{json::JsonGenerator, MarkdownGenerator, SessionReport};
use scholafy_player::{
    create_router, load_catalogue, spawn_change_forwarder, AppState, Config, Lesson, PlayerError,
    ProfileHub,
};
use scholafy_store::{MemoryStore, RemoteStore, RestStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Scholafy - lesson player and parent monitor
#[derive(Parser, Debug)]
#[command(name = "scholafy")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: scholafy.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the parent monitor API and live event stream
    Serve {
        /// Port for the HTTP API server (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Lesson catalogue JSON used when the backend has no lessons
        #[arg(short, long, value_name = "FILE")]
        lessons: Option<String>,

        /// Use an in-process store instead of the hosted backend
        #[arg(long)]
        memory: bool,
    },

    /// Render a saved session report
    Report {
        /// Path to a session report JSON file
        #[arg(value_name = "REPORT")]
        report: PathBuf,

        /// Write JSON instead of Markdown
        #[arg(long)]
        json: bool,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Validate a lesson catalogue file
    Check {
        /// Path to the lesson JSON file
        #[arg(value_name = "LESSONS")]
        lessons: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match args.command {
        Command::Serve {
            port,
            lessons,
            memory,
        } => serve(args.config.as_deref(), port, lessons, memory).await,
        Command::Report {
            report,
            json,
            output,
        } => render_report(&report, json, output.as_deref()),
        Command::Check { lessons } => check_lessons(&lessons),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.downcast_ref::<PlayerError>().is_some_and(PlayerError::is_fatal) {
                eprintln!("Scholafy cannot start until this is fixed:");
                eprintln!();
            }
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    let config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path)?
        }
        None => Config::load()?,
    };
    Ok(config.apply_env())
}

/// Builds the store named by the config, or the in-process one.
fn connect_store(config: &Config, memory: bool) -> anyhow::Result<Arc<dyn RemoteStore>> {
    if memory {
        tracing::info!("Using in-process store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let rest = config.rest_config()?;
    tracing::info!(url = %rest.url, "Connecting to backend");
    let store = RestStore::new(&rest).map_err(PlayerError::from)?;
    Ok(Arc::new(store))
}

/// Picks the profile to serve.
fn resolve_profile(config: &Config, memory: bool) -> anyhow::Result<Uuid> {
    if !config.profile_id.is_nil() {
        return Ok(config.profile_id);
    }
    if memory {
        let id = Uuid::new_v4();
        tracing::info!(profile_id = %id, "No profileId configured, using a fresh profile");
        return Ok(id);
    }
    Err(PlayerError::config_validation(
        "profileId is required when using the hosted backend",
        "Set profileId in scholafy.json to the child's profile id",
    )
    .into())
}

async fn serve(
    config_path: Option<&str>,
    port: Option<u16>,
    lessons: Option<String>,
    memory: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.port = port;
    }
    if lessons.is_some() {
        config.lessons_file = lessons;
    }
    config.validate()?;

    let store = connect_store(&config, memory)?;
    let profile_id = resolve_profile(&config, memory)?;

    let fallback: Vec<Lesson> = match config.lessons_file.as_deref() {
        Some(path) => {
            let lessons = load_catalogue(path)?;
            println!("Loaded {} lessons from {path}", lessons.len());
            lessons
        }
        None => Vec::new(),
    };

    let hub = ProfileHub::load(store, profile_id, config.student_name.clone(), fallback).await?;
    let hub = Arc::new(hub);
    print_profile(&hub).await;

    let token = CancellationToken::new();
    let forwarder = spawn_change_forwarder(Arc::clone(&hub), token.clone()).await;

    let addr: SocketAddr = ([127, 0, 0, 1], config.port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;
    let router = create_router(AppState::new(Arc::clone(&hub)));

    println!();
    println!("Parent monitor running on http://{addr}");
    println!("Live events on ws://{addr}/ws");
    println!("Press Ctrl+C to stop");

    let shutdown = token.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                }
                () = shutdown.cancelled() => {}
            }
        })
        .await?;

    token.cancel();
    if let Err(e) = forwarder.await {
        tracing::warn!(error = %e, "Live change forwarder failed");
    }
    println!("Stopped");
    Ok(())
}

/// Prints the loaded profile.
async fn print_profile(hub: &ProfileHub) {
    let profile = hub.profile().await;
    let stats = hub.curriculum_stats().await;

    println!("Profile loaded:");
    println!("  Name: {} (Year {})", profile.name, profile.year_group);
    println!(
        "  Level {} with {} XP, {} day streak",
        profile.level, profile.xp, profile.streak_days
    );
    println!(
        "  Lessons: {}/{} completed, standard {}",
        stats.completed_lessons,
        stats.total_lessons,
        stats.current_standard.description()
    );
    println!("  Assigned: {}", hub.assignments().await.join(", "));
    if let Some(quote) = hub.quote_of_the_day().await {
        println!("  \"{}\" ({})", quote.text, quote.source);
    }
}

fn render_report(path: &Path, json: bool, output: Option<&Path>) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read report '{}': {e}", path.display())
    })?;
    let report = SessionReport::from_json(&contents)?;

    if json {
        let generator = JsonGenerator::new(&report);
        match output {
            Some(out) => {
                generator.write_to_file(out, true)?;
                println!("JSON report: {}", out.display());
            }
            None => println!("{}", generator.generate_pretty()?),
        }
        return Ok(());
    }

    let markdown = MarkdownGenerator::new(&report).generate();
    match output {
        Some(out) => {
            std::fs::write(out, markdown)?;
            println!("Markdown report: {}", out.display());
        }
        None => print!("{markdown}"),
    }
    Ok(())
}

fn check_lessons(path: &Path) -> anyhow::Result<()> {
    let lessons = load_catalogue(path)?;
    println!("{}: {} lesson(s) OK", path.display(), lessons.len());
    for lesson in &lessons {
        println!(
            "  {} \"{}\" ({}, {} min): {} starter, {} video, {} exit",
            lesson.id,
            lesson.title,
            lesson.subject,
            lesson.estimated_minutes,
            lesson.starters.len(),
            lesson.cues.len(),
            lesson.exits.len()
        );
        println!(
            "    pass policy: starter {}, exit {}",
            lesson.starter_policy, lesson.exit_policy
        );
        for cue in &lesson.cues {
            tracing::debug!(lesson_id = %lesson.id, question_id = %cue.id, time = ?cue.time, "Cue");
        }
    }
    Ok(())
}
