use clap::Parser;

/// VVZ Harvester - schedule harvesting for the legacy course catalog
///
/// The binary submits one harvest job and waits for it to finish:
/// - discover: enumerate all remote semesters and scrape each
/// - remote: scrape the semesters named by free-form identifiers
/// - local: scrape a single semester already present in the database
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format; picked by build profile when not given
    #[arg(long, value_enum, default_value_t = LogFormat::default())]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<JobCommand>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    /// Human-readable lines for a terminal
    Pretty,
    /// Newline-delimited JSON for log shippers
    Json,
}

impl Default for LogFormat {
    /// Debug builds log for humans, release builds for machines.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum JobCommand {
    /// Discover all remote semesters and scrape each of them
    Discover,
    /// Scrape the remote semesters matching the given identifiers (e.g. "SS24", "WS 2024/25")
    Remote {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Scrape a single semester that already exists locally
    Local {
        #[arg(long)]
        semester_id: i64,
    },
}
