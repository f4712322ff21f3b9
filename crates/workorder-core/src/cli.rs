use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::grouping::GroupBy;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "wo",
    version,
    about = "Work order task list: filter, group, bulk-edit, import and export",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Filters shared by every command that reads the list.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Location query to restore, e.g. `status=NEW&page=2`. Defaults to the
    /// last location used.
    #[arg(long)]
    pub location: Option<String>,

    #[arg(long)]
    pub search: Option<String>,

    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub priority: Option<String>,

    #[arg(long)]
    pub assignee: Option<i64>,

    #[arg(long)]
    pub address: Option<i64>,

    #[arg(long)]
    pub page: Option<u32>,

    /// Drop filters restored from the last location first.
    #[arg(long)]
    pub clear: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show one page of tasks.
    List {
        #[command(flatten)]
        filters: ListArgs,

        #[arg(long = "group-by", default_value = "none", value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<GroupBy>()))]
        group_by: GroupBy,

        /// Group keys to show collapsed.
        #[arg(long, value_delimiter = ',')]
        collapse: Vec<String>,
    },
    /// Write the page (or the given ids on it) as CSV.
    Export {
        #[command(flatten)]
        filters: ListArgs,

        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,

        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Create tasks from a CSV file.
    Import { file: PathBuf },
    /// Print an import template.
    Template {
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Apply one change to many tasks.
    Bulk {
        #[command(flatten)]
        filters: ListArgs,

        #[arg(long, value_delimiter = ',', required_unless_present = "all")]
        ids: Vec<i64>,

        /// Select every task on the page.
        #[arg(long)]
        all: bool,

        #[command(subcommand)]
        action: BulkCommand,
    },
    /// Inspect or change persisted column widths.
    Columns {
        #[command(subcommand)]
        action: ColumnsCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum BulkCommand {
    Status {
        status: String,
    },
    Assign {
        #[arg(required_unless_present = "none")]
        user_id: Option<i64>,

        #[arg(long, conflicts_with = "user_id")]
        none: bool,
    },
    Priority {
        priority: String,
    },
    PlannedDate {
        /// `YYYY-MM-DD` or `DD.MM.YYYY`; omit to clear.
        date: Option<String>,
    },
    Delete,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ColumnsCommand {
    Show,
    Set { column: String, width: u32 },
    Reset,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of
/// the argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
