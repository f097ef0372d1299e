mod cli;
mod controller;
mod errors;
mod output;
mod resolver;
mod tailer;
mod types;
mod utils;

use std::io::{BufWriter, IsTerminal};

use anyhow::Context;
use clap::Parser;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, config};
use regex::Regex;
use tokio::sync::mpsc;
use tracing::error;

use cli::{Cli, ColorMode};
use controller::Controller;
use errors::Error;
use output::RECORD_CHANNEL_CAPACITY;
use resolver::{ClusterFetcher, SelectorSpec};
use tailer::PodTailer;
use types::LogRecord;
use utils::{duration_to_seconds, labels_to_string, parse_rfc3339};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let container_regex = match &cli.container {
        Some(pattern) => Some(Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?),
        None => None,
    };

    let client = build_client(cli.context.as_deref()).await?;
    let namespace = cli
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_string());

    let fetcher = ClusterFetcher::new(client.clone(), namespace.clone());
    let selector = resolver::resolve(&fetcher, &cli.target, cli.selector.as_deref()).await?;

    let params = log_params(&cli)?;

    let colored = match cli.color {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stdout().is_terminal(),
    };

    // Shared record channel: every container task produces, one writer task
    // consumes.
    let (tx, mut rx) = mpsc::channel::<LogRecord>(RECORD_CHANNEL_CAPACITY);
    let show_prefix = !cli.no_prefix;
    tokio::spawn(async move {
        let stdout = std::io::stdout();
        let mut out = BufWriter::new(stdout);
        if let Err(err) = output::drain(&mut rx, show_prefix, &mut out).await {
            error!("writing log output: {err}");
        }
    });

    let pods: Api<Pod> = Api::namespaced(client, &namespace);
    let factory = {
        let pods = pods.clone();
        let params = params.clone();
        move |target| PodTailer::new(pods.clone(), target, params.clone(), tx.clone())
    };
    let mut controller = Controller::new(
        selector.clone(),
        container_regex,
        cli.exit_with_pods,
        colored,
        factory,
    );

    if cli.previous {
        let mut list_params = ListParams::default();
        if let SelectorSpec::LabelQuery(labels) = &selector {
            list_params = list_params.labels(&labels_to_string(labels));
        }
        if let Some(node) = &cli.node_name {
            list_params = list_params.fields(&format!("spec.nodeName={node}"));
        }
        controller.run_previous(pods, list_params).await
    } else {
        let mut watch_config = WatcherConfig::default();
        if let SelectorSpec::LabelQuery(labels) = &selector {
            watch_config = watch_config.labels(&labels_to_string(labels));
        }
        if let Some(node) = &cli.node_name {
            watch_config = watch_config.fields(&format!("spec.nodeName={node}"));
        }
        tokio::select! {
            result = controller.run(pods, watch_config) => result,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    }
}

async fn build_client(context: Option<&str>) -> anyhow::Result<Client> {
    let config = match context {
        Some(ctx) => config::Config::from_kubeconfig(&config::KubeConfigOptions {
            context: Some(ctx.to_string()),
            ..Default::default()
        })
        .await
        .with_context(|| format!("context {ctx:?} not found in kubeconfig"))?,
        None => config::Config::infer().await?,
    };
    Ok(Client::try_from(config)?)
}

fn log_params(cli: &Cli) -> anyhow::Result<LogParams> {
    let mut params = LogParams {
        follow: true,
        timestamps: cli.timestamps,
        previous: cli.previous,
        ..LogParams::default()
    };
    if let Some(raw) = &cli.since_time {
        let since = parse_rfc3339(raw).with_context(|| format!("invalid --since-time {raw:?}"))?;
        params.since_time = Some(since);
    }
    if let Some(since) = cli.since {
        let seconds = duration_to_seconds(since);
        if seconds > 0 {
            params.since_seconds = Some(seconds);
        }
    }
    if cli.tail > 0 {
        params.tail_lines = Some(cli.tail);
    }
    Ok(params)
}
