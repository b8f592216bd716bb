//! incident-dash: terminal client for the real-time incident dashboard.
//!
//! ## Subcommands
//!
//! - `list`: One-shot listing of the base query for the given filters
//! - `show`: Incident detail with its timeline and related incidents
//! - `update`: Change status, owner or tags of one incident
//! - `bulk`: Resolve, investigate or delete several incidents at once
//! - `watch`: Live view that merges the incident stream into the list

mod error;
mod logging;
mod render;
mod watch;

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use error::{DashError, Result};
use incident_core::{load_config, BulkAction, HttpIncidentApi, IncidentEngine, StorageConfig};
use incident_protocol::{IncidentFilters, IncidentPatch, Severity, SortBy, SortOrder, Status};

#[derive(Parser)]
#[command(name = "incident-dash")]
#[command(about = "Real-time incident dashboard")]
#[command(version)]
struct Cli {
    /// Incident API base URL (overrides config.toml and INCIDENT_DASH_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    /// Storage root for config, persisted filters and logs (default ~/.incident-dash)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List incidents for the current filters
    List {
        #[command(flatten)]
        filters: FilterArgs,

        /// Page size (1-500)
        #[arg(long)]
        limit: Option<u32>,

        /// Rows to skip
        #[arg(long)]
        offset: Option<u32>,

        /// Print the raw page as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one incident with its timeline and related incidents
    Show {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Update a single incident
    Update {
        #[arg(value_name = "ID")]
        id: String,

        /// New status (Open, Investigating, Resolved)
        #[arg(long)]
        status: Option<Status>,

        /// Assign an owner
        #[arg(long)]
        owner: Option<String>,

        /// Comma-separated tags, replacing the current list
        #[arg(long)]
        tags: Option<String>,
    },

    /// Apply one action to several incidents
    Bulk {
        /// resolve, investigate or delete
        #[arg(value_name = "ACTION")]
        action: BulkAction,

        #[arg(value_name = "ID", required = true)]
        ids: Vec<String>,
    },

    /// Follow the live stream (reads commands from stdin until end of input, `help` lists them)
    Watch {
        #[command(flatten)]
        filters: FilterArgs,
    },
}

/// Filter flags. Given flags replace the persisted filters; `--reset` starts
/// from no filters.
#[derive(Args, Default)]
struct FilterArgs {
    /// Clear persisted filters before applying the flags below
    #[arg(long)]
    reset: bool,

    /// Text search over title, account and source
    #[arg(long)]
    search: Option<String>,

    #[arg(long)]
    severity: Option<Severity>,

    #[arg(long)]
    status: Option<Status>,

    #[arg(long)]
    account: Option<String>,

    #[arg(long)]
    source: Option<String>,

    /// Earliest detection date (YYYY-MM-DD, inclusive)
    #[arg(long, value_name = "DATE")]
    since: Option<String>,

    /// Latest detection date (YYYY-MM-DD, inclusive)
    #[arg(long, value_name = "DATE")]
    until: Option<String>,

    #[arg(long)]
    sort_by: Option<SortBy>,

    #[arg(long)]
    sort_order: Option<SortOrder>,
}

impl FilterArgs {
    fn apply_to(self, current: &IncidentFilters) -> IncidentFilters {
        let mut filters = if self.reset {
            IncidentFilters::default()
        } else {
            current.clone()
        };
        if let Some(search) = self.search {
            filters.search = Some(search);
        }
        if let Some(severity) = self.severity {
            filters.severity = Some(severity);
        }
        if let Some(status) = self.status {
            filters.status = Some(status);
        }
        if let Some(account) = self.account {
            filters.account = Some(account);
        }
        if let Some(source) = self.source {
            filters.source = Some(source);
        }
        if let Some(since) = self.since {
            filters.start_date = Some(since);
        }
        if let Some(until) = self.until {
            filters.end_date = Some(until);
        }
        if let Some(sort_by) = self.sort_by {
            filters.sort_by = sort_by;
        }
        if let Some(sort_order) = self.sort_order {
            filters.sort_order = sort_order;
        }
        filters
    }
}

fn main() {
    let cli = Cli::parse();
    let storage = cli
        .root
        .clone()
        .map(StorageConfig::with_root)
        .unwrap_or_default();
    let _logging_guard = logging::init(&storage.logs_dir());

    if let Err(e) = run(cli, storage) {
        tracing::error!(error = %e, "incident-dash failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli, storage: StorageConfig) -> Result<()> {
    let mut config = load_config(&storage.config_file())?;
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
    }
    let api = HttpIncidentApi::from_config(&config)?;
    tracing::debug!(base_url = api.base_url(), "Using incident API");
    let mut engine = IncidentEngine::with_storage(api, storage, config);

    match cli.command {
        Commands::List {
            filters,
            limit,
            offset,
            json,
        } => {
            let next = filters.apply_to(engine.filters());
            engine.set_filters(next);
            let mut table = engine.table();
            if let Some(limit) = limit {
                table.limit = limit;
            }
            if let Some(offset) = offset {
                table.offset = offset;
            }
            engine.set_table(table);
            engine.sync()?;

            let mut stdout = std::io::stdout().lock();
            if json {
                let page = engine
                    .cache()
                    .list(&engine.active_query())
                    .cloned()
                    .unwrap_or_default();
                serde_json::to_writer_pretty(&mut stdout, &page)?;
                writeln!(stdout)?;
            } else {
                writeln!(stdout, "{}", render::table(&engine))?;
            }
        }
        Commands::Show { id } => {
            let incident = engine.open_incident(&id)?;
            println!(
                "{}",
                render::detail(&incident, &engine.timeline(&id), engine.related(&id))
            );
        }
        Commands::Update {
            id,
            status,
            owner,
            tags,
        } => {
            if status.is_none() && owner.is_none() && tags.is_none() {
                return Err(DashError::Usage(
                    "nothing to update: pass --status, --owner or --tags".to_string(),
                ));
            }
            engine.open_incident(&id)?;
            let mut sent = false;
            if let Some(status) = status {
                sent |= match status {
                    Status::Resolved => engine.resolve_incident(&id)?,
                    other => engine.update_incident(&id, IncidentPatch::status(other))?,
                };
            }
            if let Some(owner) = owner {
                sent |= engine.assign_owner(&id, &owner)?;
            }
            if let Some(tags) = tags {
                sent |= engine.update_tags_from_input(&id, &tags)?;
            }
            if sent {
                let updated = engine.fetch_detail(&id)?;
                println!(
                    "{}",
                    render::detail(&updated, &engine.timeline(&id), engine.related(&id))
                );
            } else {
                println!("{} unchanged", id);
            }
        }
        Commands::Bulk { action, ids } => {
            for id in &ids {
                engine.set_selected(id, true);
            }
            let count = engine.bulk_action(action)?;
            println!("{} {} incident(s)", past_tense(action), count);
        }
        Commands::Watch { filters } => {
            let next = filters.apply_to(engine.filters());
            engine.set_filters(next);
            watch::run(&mut engine)?;
        }
    }
    Ok(())
}

fn past_tense(action: BulkAction) -> &'static str {
    match action {
        BulkAction::Resolve => "Resolved",
        BulkAction::Investigate => "Marked investigating",
        BulkAction::Delete => "Deleted",
    }
}
