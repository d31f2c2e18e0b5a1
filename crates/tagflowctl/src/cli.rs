use clap::{Parser, Subcommand};

/// Control CLI for the tagflow Engine.
#[derive(Parser, Debug)]
#[command(name = "tagflowctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config directory (overrides TAGFLOW_CONFIG_DIR)
    #[arg(long, global = true)]
    pub config_dir: Option<String>,

    /// History database path (overrides TAGFLOW_HISTORY_DB)
    #[arg(long, global = true)]
    pub history_db: Option<String>,

    /// Output format: text or json
    #[arg(long, global = true, default_value = "text")]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine: poll connections, execute flows, run state machines, until interrupted
    Serve,

    /// Config document operations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Flow operations
    Flow {
        #[command(subcommand)]
        action: FlowAction,
    },

    /// Tag history operations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Print an aggregate health/status snapshot
    Status,

    /// Generate a shell completion script on stdout
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Load every config document and report validation errors
    Validate,
    /// Re-read config documents and apply them to a running serve process is out of scope here;
    /// this validates and re-saves each document in normalized form
    Reload,
}

#[derive(Subcommand, Debug)]
pub enum FlowAction {
    /// List flows in flows.json
    List,
    /// Compile a flow definition file and save it into flows.json
    Deploy {
        /// Path to a JSON file containing one FlowDefinition
        file: String,
    },
    /// Compile and run one flow by id, starting at its first trigger node
    Run {
        flow_id: String,
        /// JSON payload for the seed message (defaults to `{}`)
        #[arg(long)]
        payload: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Query stored samples for one tag over a time range
    Query {
        connection_id: String,
        tag_id: String,
        /// RFC3339 start timestamp, defaults to 24h ago
        #[arg(long)]
        start: Option<String>,
        /// RFC3339 end timestamp, defaults to now
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete samples older than the given retention, in days
    Cleanup {
        #[arg(long, default_value_t = 90)]
        retention_days: i64,
    },
}
