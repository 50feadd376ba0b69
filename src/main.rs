//! # netassure CLI
//!
//! Thin command-line front end over the `netassure` library: inspect the
//! snapshot listing, drive snapshot lifecycle transitions, and run table
//! queries against the active snapshot.
//!
//! ## Usage
//!
//! ```bash
//! netassure --config ./config/netassure.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `netassure snapshots` | List snapshots with their symbolic aliases |
//! | `netassure resolve <ref>` | Resolve `$last`, `$prev`, `$lastLocked`, `$first` or an id |
//! | `netassure load <ref>` | Load a snapshot |
//! | `netassure unload <ref>` | Unload a snapshot |
//! | `netassure lock <ref>` | Lock a loaded snapshot |
//! | `netassure unlock <ref>` | Unlock a loaded snapshot |
//! | `netassure download <ref>` | Export a snapshot archive to disk |
//! | `netassure flags <ref>` | Show or change post-discovery feature flags |
//! | `netassure query <endpoint>` | Fetch all rows of a table |
//! | `netassure columns <endpoint>` | Discover the columns of a table |

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use netassure::commands::{self, LifecycleCommand, QueryArgs};
use netassure::config;
use netassure::logging;
use netassure::session::Session;

/// netassure: snapshot-aware client for network-assurance backends.
///
/// All commands read the backend location and polling settings from a TOML
/// file. See `config/netassure.example.toml` for every option.
#[derive(Parser)]
#[command(name = "netassure", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/netassure.toml")]
    config: PathBuf,

    /// Override the session's active snapshot reference (`session.snapshot`).
    #[arg(long, global = true)]
    snapshot: Option<String>,

    /// Debug logging (ignored when RUST_LOG is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List snapshots in backend order with their aliases.
    Snapshots {
        /// Only show loaded snapshots.
        #[arg(long)]
        loaded: bool,
    },

    /// Resolve a snapshot reference and print the snapshot.
    Resolve { reference: String },

    /// Load a snapshot. A no-op if it is already loaded.
    Load { reference: String },

    /// Unload a snapshot. A no-op if it is already unloaded.
    Unload { reference: String },

    /// Lock a loaded snapshot.
    Lock { reference: String },

    /// Unlock a loaded snapshot.
    Unlock { reference: String },

    /// Export a snapshot and write the archive to disk.
    ///
    /// Defaults to `<id>.tar` in `download.dir` (or the current directory).
    Download {
        reference: String,

        /// Output file or existing directory.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Job lookup attempts (default: `jobs.retry`).
        #[arg(long)]
        retry: Option<u32>,

        /// Overall job wait in seconds (default: `jobs.timeout_secs`).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show or change post-discovery feature flags.
    ///
    /// Without options, prints the current disabled set.
    Flags {
        reference: String,

        #[arg(long, value_enum)]
        graph_cache: Option<Toggle>,

        #[arg(long, value_enum)]
        historical_data: Option<Toggle>,

        #[arg(long, value_enum)]
        intent_verification: Option<Toggle>,
    },

    /// Fetch every row of a table as JSON.
    Query {
        /// Table endpoint, e.g. `tables/inventory/devices`.
        endpoint: String,

        /// Comma-separated columns. Discovered when omitted.
        #[arg(long)]
        columns: Option<String>,

        /// Filter expression (JSON).
        #[arg(long)]
        filters: Option<String>,

        /// Sort expression (JSON), e.g. `{"order":"asc","column":"hostname"}`.
        #[arg(long)]
        sort: Option<String>,

        /// Query this snapshot instead of the active one.
        #[arg(long = "on", conflicts_with = "unscoped")]
        on: Option<String>,

        /// The endpoint is not snapshot-scoped.
        #[arg(long)]
        unscoped: bool,

        /// Only print the number of matching rows.
        #[arg(long)]
        count: bool,
    },

    /// Discover the column names of a table.
    Columns { endpoint: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = config::load_config(&cli.config)?;
    if let Some(reference) = cli.snapshot {
        cfg.session.snapshot = reference;
    }
    let mut session = Session::connect(&cfg)?;

    match cli.command {
        Commands::Snapshots { loaded } => commands::run_snapshots(&session, loaded)?,
        Commands::Resolve { reference } => commands::run_resolve(&session, &reference)?,
        Commands::Load { reference } => {
            commands::run_lifecycle(&mut session, LifecycleCommand::Load, &reference)?
        }
        Commands::Unload { reference } => {
            commands::run_lifecycle(&mut session, LifecycleCommand::Unload, &reference)?
        }
        Commands::Lock { reference } => {
            commands::run_lifecycle(&mut session, LifecycleCommand::Lock, &reference)?
        }
        Commands::Unlock { reference } => {
            commands::run_lifecycle(&mut session, LifecycleCommand::Unlock, &reference)?
        }
        Commands::Download {
            reference,
            out,
            retry,
            timeout,
        } => commands::run_download(&session, &reference, out.as_deref(), retry, timeout)?,
        Commands::Flags {
            reference,
            graph_cache,
            historical_data,
            intent_verification,
        } => commands::run_flags(
            &mut session,
            &reference,
            graph_cache.map(Toggle::enabled),
            historical_data.map(Toggle::enabled),
            intent_verification.map(Toggle::enabled),
        )?,
        Commands::Query {
            endpoint,
            columns,
            filters,
            sort,
            on,
            unscoped,
            count,
        } => commands::run_query(
            &session,
            QueryArgs {
                endpoint: &endpoint,
                columns: columns.as_deref(),
                filters: filters.as_deref(),
                sort: sort.as_deref(),
                snapshot: on.as_deref(),
                unscoped,
                count,
            },
        )?,
        Commands::Columns { endpoint } => commands::run_columns(&session, &endpoint)?,
    }

    Ok(())
}
