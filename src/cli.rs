use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::utils::parse_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Parser)]
#[command(name = "podtail", version)]
#[command(about = "Tail logs from pods matched by a name pattern, a label query or an owning resource")]
pub struct Cli {
    /// Target: a pod name regex, or a resource as `TYPE NAME`
    #[arg(value_name = "NAME_REGEX | TYPE NAME", num_args = 0..=2)]
    pub target: Vec<String>,

    /// Label query to filter pods on (e.g. -l key1=value1,key2=value2)
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Regular expression matching the container names to tail
    #[arg(short = 'c', long)]
    pub container: Option<String>,

    /// Lines of recent log to display; 0 returns all logs
    #[arg(long, default_value_t = 10)]
    pub tail: i64,

    /// Include timestamps on each line
    #[arg(long)]
    pub timestamps: bool,

    /// Print the logs of the previous container instances, then exit
    #[arg(long)]
    pub previous: bool,

    /// Only return logs newer than a relative duration like 5s, 2m or 3h
    #[arg(long, value_parser = parse_duration, conflicts_with = "since_time")]
    pub since: Option<Duration>,

    /// Only return logs after a specific date (RFC 3339)
    #[arg(long)]
    pub since_time: Option<String>,

    /// Colorize the output prefix
    #[arg(long, value_enum, default_value = "auto")]
    pub color: ColorMode,

    /// Exit once every watched pod has been deleted
    #[arg(long)]
    pub exit_with_pods: bool,

    /// Display log lines without the pod[container] prefix
    #[arg(long)]
    pub no_prefix: bool,

    /// Only tail pods scheduled on this node
    #[arg(long)]
    pub node_name: Option<String>,

    /// Namespace scope; defaults to the kubeconfig namespace
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
