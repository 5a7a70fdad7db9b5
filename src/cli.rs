use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tresor::domain::{Direction, Granularity};
use tresor::reconciliation::MatchStatus;

#[derive(Debug, Parser)]
#[command(name = "tresor")]
#[command(about = "Treasury timelines, price history and bank reconciliation", long_about = None)]
pub struct Cli {
    /// Override Tresor home directory (config/data subdirs will be created inside it).
    #[arg(long, env = "TRESOR_HOME")]
    pub home: Option<PathBuf>,

    /// Back-office API base URL. Overrides the config file.
    #[arg(long, env = "TRESOR_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Bearer token for the API. Overrides the config file.
    #[arg(long, env = "TRESOR_API_TOKEN", global = true, hide_env_values = true)]
    pub api_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inflow/outflow/net per day, ISO week or month.
    Timeline(TimelineArgs),
    /// Outflow cost per category per bucket.
    Costs(CostsArgs),
    /// Purchase price statistics, moving average and variations.
    Prices(PricesArgs),
    /// CSV exports.
    Export(ExportArgs),
    /// Bank reconciliation match candidates.
    Matches(MatchesArgs),
    Cache(CacheArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Tsv,
    Csv,
}

#[derive(Debug, Args, Clone)]
pub struct SourceArgs {
    /// Read records from a JSON file instead of the API.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Skip the local snapshot cache.
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Debug, Args, Clone)]
pub struct EventFilterArgs {
    /// First day included (YYYY-MM-DD).
    #[arg(long)]
    pub from: Option<String>,

    /// Last day included (YYYY-MM-DD).
    #[arg(long)]
    pub to: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long, value_enum)]
    pub direction: Option<Direction>,
}

#[derive(Debug, Args, Clone)]
pub struct PriceFilterArgs {
    #[arg(long)]
    pub from: Option<String>,

    #[arg(long)]
    pub to: Option<String>,

    /// Case-insensitive supplier substring.
    #[arg(long)]
    pub supplier: Option<String>,

    /// Product id, code or name.
    #[arg(long)]
    pub product: Option<String>,
}

#[derive(Debug, Args)]
pub struct TimelineArgs {
    /// Defaults to the configured granularity.
    #[arg(long, short = 'g', value_enum)]
    pub granularity: Option<Granularity>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub filter: EventFilterArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct CostsArgs {
    #[arg(long, short = 'g', value_enum)]
    pub granularity: Option<Granularity>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub filter: EventFilterArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct PricesArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub filter: PriceFilterArgs,

    /// Print the full analysis as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ExportCmd {
    /// One row per transaction.
    Transactions {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filter: EventFilterArgs,
        /// Output file (stdout when omitted).
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// One row per purchase price observation.
    Prices {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filter: PriceFilterArgs,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// One row per timeline bucket.
    Timeline {
        #[arg(long, short = 'g', value_enum)]
        granularity: Option<Granularity>,
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filter: EventFilterArgs,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub cmd: ExportCmd,
}

#[derive(Debug, Subcommand)]
pub enum MatchesCmd {
    /// Candidates by descending confidence.
    List {
        #[command(flatten)]
        source: SourceArgs,
        /// Only show candidates in this status.
        #[arg(long)]
        status: Option<MatchStatus>,
    },
    Confirm { id: String },
    Reject { id: String },
    Ignore { id: String },
}

#[derive(Debug, Args)]
pub struct MatchesArgs {
    #[command(subcommand)]
    pub cmd: MatchesCmd,
}

#[derive(Debug, Subcommand)]
pub enum CacheCmd {
    List,
    Clear,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub cmd: CacheCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    Show,
    SetApi {
        url: String,
        #[arg(long)]
        token: Option<String>,
    },
    SetGranularity {
        #[arg(value_enum)]
        granularity: Granularity,
    },
    SetFallbackCategory {
        label: String,
    },
    SetCacheTtl {
        seconds: u64,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}
