//! lst: search, page through and tail log indices.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod terminal;

#[derive(Parser, Debug, Default)]
#[command(name = "lst")]
#[command(about = "Search and tail logs stored in an Elasticsearch-compatible backend")]
#[command(version)]
pub struct Cli {
    /// Search terms (query string syntax; `id:<value>` selects a request id)
    pub terms: Vec<String>,

    /// Profile to load and save settings under
    #[arg(short = 'p', long = "profile", default_value = stash::DEFAULT_PROFILE)]
    pub profile: String,

    /// Make the selected profile the default one
    #[arg(long = "set-as-default")]
    pub set_as_default: bool,

    /// (*) Backend URL, e.g. http://es.internal:9200
    #[arg(long = "url")]
    pub url: Option<String>,

    /// (*) Output template, e.g. "%@timestamp %source %message"
    #[arg(short = 'f', long = "format")]
    pub format: Option<String>,

    /// (*) Regex that index names must match
    #[arg(short = 'i', long = "index-pattern")]
    pub index_pattern: Option<String>,

    /// Field used for sorting and following
    #[arg(long = "timestamp-field")]
    pub timestamp_field: Option<String>,

    /// Keep polling for new entries
    #[arg(short = 't', long = "tail")]
    pub tail: bool,

    /// Number of entries shown initially and per page
    #[arg(short = 'n', default_value_t = 100)]
    pub entries: usize,

    /// Print the distinct sources and exit
    #[arg(long = "list-sources")]
    pub list_sources: bool,

    /// Only show entries from these sources (comma separated)
    #[arg(short = 's', long = "src")]
    pub sources: Option<String>,

    /// Only show entries with this request id
    #[arg(long = "id")]
    pub id: Option<String>,

    /// Entries at or after this local time (YYYY-MM-DDTHH:MM:SS[.fff])
    #[arg(short = 'a', long = "after")]
    pub after: Option<String>,

    /// Entries at or before this local time (YYYY-MM-DDTHH:MM:SS[.fff])
    #[arg(short = 'b', long = "before")]
    pub before: Option<String>,

    /// Entries from the trailing window, e.g. 5m, 1h, 7d
    #[arg(short = 'd', long = "duration")]
    pub duration: Option<String>,

    /// Phrase to highlight when there are no search terms
    #[arg(short = 'w', long = "watch")]
    pub watch: Option<String>,

    /// Store the search terms in the profile
    #[arg(long = "save")]
    pub save: bool,

    /// (*) User for HTTP basic auth; the password is prompted for
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,

    /// (*) SSH tunnel: [localport:][user@]sshhost[:sshport]
    #[arg(long = "ssh")]
    pub ssh: Option<String>,

    /// Disable colored output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Log filter from RUST_LOG, or from the verbosity flag count.
fn log_filter(verbose: u8) -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        return EnvFilter::from_default_env();
    }
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::new(level)
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = commands::run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
