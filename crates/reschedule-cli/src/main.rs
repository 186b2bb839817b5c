//! `reschedule` CLI: free-slot search, planning passes and event cleaning
//!
//! ## Usage
//!
//! ```sh
//! # First three free 30-minute slots on a day, around busy intervals
//! reschedule slots --window-start 2026-03-02T09:00:00Z \
//!     --window-end 2026-03-02T17:00:00Z --duration 30 -i busy.json
//!
//! # One cron pass over a user's events (in-memory store)
//! reschedule plan -i events.json --user user-1 --now 2026-03-02T08:00:00Z
//!
//! # Clean a Google Calendar payload without content consent
//! reschedule clean -i event.json --provider google --deny-calendar-content
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the configured level.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use reschedule_engine::cleaning::{
    CleanParams, CleanerRegistry, ConsentSnapshot, Provider, Source, CALENDAR_EVENT_UPSERTED,
};
use reschedule_engine::config::EngineConfig;
use reschedule_engine::event::CalendarEvent;
use reschedule_engine::orchestrator::CronRunner;
use reschedule_engine::store::MemoryStore;
use reschedule_engine::window::{find_free_slots, TimeRange};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "reschedule",
    version,
    about = "Calendar rescheduling engine CLI"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find conflict-free slots inside a window
    Slots {
        /// Window start (RFC 3339)
        #[arg(long)]
        window_start: DateTime<Utc>,
        /// Window end (RFC 3339, exclusive)
        #[arg(long)]
        window_end: DateTime<Utc>,
        /// Slot length in minutes
        #[arg(long)]
        duration: i64,
        /// Scan step in minutes (config value when omitted)
        #[arg(long)]
        step: Option<i64>,
        /// Maximum number of slots (config value when omitted)
        #[arg(long)]
        max_slots: Option<usize>,
        /// JSON array of busy `{startAt, endAt}` intervals (stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
        /// Output file (writes to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Run one planning pass for a user over a JSON array of events
    Plan {
        /// Input file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
        /// Output file (writes to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
        /// User the events belong to
        #[arg(long, default_value = "local-user")]
        user: String,
        /// Reference time for the run (RFC 3339, defaults to now)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Clean a raw provider payload into the canonical record
    Clean {
        /// Input file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
        /// Output file (writes to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
        /// Event type of the payload
        #[arg(long, default_value = CALENDAR_EVENT_UPSERTED)]
        event_type: String,
        /// Calendar provider the payload came from
        #[arg(long, value_enum, default_value_t = ProviderArg::Manual)]
        provider: ProviderArg,
        /// Tenant the event belongs to
        #[arg(long, default_value = "local-user")]
        user: String,
        /// Event id recorded in the envelope
        #[arg(long, default_value = "cli")]
        event_id: String,
        /// Treat the calendarContent scope as not granted
        #[arg(long)]
        deny_calendar_content: bool,
        /// Treat the attendeeDetails scope as not granted
        #[arg(long)]
        deny_attendee_details: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderArg {
    Google,
    Apple,
    Manual,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Google => Provider::Google,
            ProviderArg::Apple => Provider::Apple,
            ProviderArg::Manual => Provider::Manual,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    init_tracing(&config.logging.level);

    match cli.command {
        Commands::Slots {
            window_start,
            window_end,
            duration,
            step,
            max_slots,
            input,
            output,
        } => {
            let window = TimeRange::new(window_start, window_end)
                .context("Invalid search window")?;
            let busy = parse_busy(&read_input(input.as_deref())?)?;
            let slots = find_free_slots(
                &window,
                &busy,
                duration,
                step.unwrap_or(config.planner.step_minutes),
                max_slots.unwrap_or(config.planner.max_slots),
            )
            .context("Slot search failed")?;
            write_json(output.as_deref(), &serde_json::to_value(&slots)?)?;
        }
        Commands::Plan {
            input,
            output,
            user,
            now,
        } => {
            let events: Vec<CalendarEvent> = serde_json::from_str(&read_input(input.as_deref())?)
                .context("Failed to parse events JSON")?;
            let now = now.unwrap_or_else(Utc::now);
            debug!(events = events.len(), user = %user, %now, "starting planning pass");

            let store = Arc::new(MemoryStore::new());
            store.seed_events(&user, events)?;
            let runner = CronRunner::new(store.clone(), store.clone(), &config);
            let report = runner.run_for_user(&user, now).await?;

            let result = json!({
                "report": report,
                "proposals": store.proposals()?,
            });
            write_json(output.as_deref(), &result)?;
        }
        Commands::Clean {
            input,
            output,
            event_type,
            provider,
            user,
            event_id,
            deny_calendar_content,
            deny_attendee_details,
        } => {
            let payload = serde_json::from_str(&read_input(input.as_deref())?)
                .context("Failed to parse payload JSON")?;
            let params = CleanParams {
                clerk_user_id: user,
                event_type,
                event_id,
                occurred_at_ms: Utc::now().timestamp_millis(),
                source: Source {
                    system: "cli".to_string(),
                    provider: provider.into(),
                    account_id: None,
                },
                payload,
                consent: ConsentSnapshot {
                    calendar_content: !deny_calendar_content,
                    attendee_details: !deny_attendee_details,
                },
            };
            let cleaned = CleanerRegistry::default()
                .clean(&params)
                .context("Failed to clean event")?;
            write_json(output.as_deref(), &serde_json::to_value(&cleaned)?)?;
        }
    }

    Ok(())
}

/// Log to stderr so stdout stays machine-readable.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Busy intervals as a JSON array; blank input means a free calendar.
fn parse_busy(raw: &str) -> Result<Vec<TimeRange>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).context("Failed to parse busy intervals JSON")
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

fn write_json(path: Option<&str>, value: &serde_json::Value) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    match path {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write file: {}", path))?;
        }
        None => {
            print!("{}", content);
        }
    }
    Ok(())
}
