use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "kubefields",
    version,
    about = "Pick any fields of any Kubernetes kind and watch them as a table across clusters."
)]
pub struct CliArgs {
    /// Kubeconfig context to query (repeatable, defaults to the current context)
    #[arg(short, long = "context")]
    pub contexts: Vec<String>,

    /// Query every context in the kubeconfig
    #[arg(long, conflicts_with = "contexts")]
    pub all_contexts: bool,

    /// Kind to open: pods, deploy, deployments.apps, apps/v1/Deployment
    #[arg(short, long)]
    pub kind: Option<String>,

    /// Start in a specific namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Start with all namespaces selected
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Comma separated dotted field paths to pick up front
    #[arg(short, long, value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Saved view to load for the kind
    #[arg(long)]
    pub view: Option<String>,

    /// Render one table to stdout and exit
    #[arg(long)]
    pub print: bool,

    /// Refresh interval in milliseconds
    #[arg(long, default_value_t = 5_000, value_parser = clap::value_parser!(u64).range(1_000..))]
    pub refresh_ms: u64,

    /// Favorites file (defaults to the per-user config directory)
    #[arg(long)]
    pub favorites: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Append logs to this file while the terminal UI is running
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
