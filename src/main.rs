use std::sync::Arc;

mod console;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use traders_console::{
    actions::ActionRegistry,
    cancel::{CancelHandle, Cancellation},
    client::ApiClient,
    config::Config,
    events::{init_logging, EventEmitter},
    ratelimit::RateLimitGovernor,
    resolver::highlight,
    store::TokenStore,
};

use console::{Console, StdinPrompter};

#[derive(Debug, Parser)]
#[command(name = "traders-console")]
#[command(about = "Plain-language console for the SpaceTraders API")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive prompt (the default)
    Console,
    /// Rank action names against a phrase without running anything
    Resolve {
        #[arg(required = true)]
        query: Vec<String>,

        /// Candidates to print (default: --suggestions)
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the server status and exit
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.config)?;

    match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => run_console(&cli.config).await,
        Commands::Resolve { query, limit, json } => {
            run_resolve(&cli.config, &query.join(" "), limit, json)
        }
        Commands::Status => run_status(&cli.config).await,
    }
}

async fn run_console(config: &Config) -> Result<()> {
    let (handle, cancel) = Cancellation::channel();
    let interrupt = Arc::new(handle);
    spawn_interrupt_watcher(interrupt.clone());

    let events = EventEmitter::new(config.json_output);
    let mut client = build_client(config, events.clone(), cancel.clone())?;
    let store = TokenStore::new(config.token_path());
    if let Some(token) = store.load() {
        tracing::info!(
            target = "traders_console::console",
            path = %store.path().display(),
            "loaded saved agent token"
        );
        client.set_token(token);
    }

    let resolver = ActionRegistry::builtin().resolver(config.resolver_config());
    let console = Console::new(resolver, client, store, events, interrupt, config.suggestions);
    let mut prompter = StdinPrompter::new(cancel);
    console.run(&mut prompter).await
}

fn run_resolve(config: &Config, query: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let resolver = ActionRegistry::builtin().resolver(config.resolver_config());
    let candidates = resolver.resolve_many(query, limit.unwrap_or(config.suggestions));

    if json {
        let payload = serde_json::json!({
            "query": query,
            "action": resolver.resolve_one(query),
            "candidates": candidates,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    match resolver.resolve_one(query) {
        Some(action) => println!("Best match: {action}"),
        None => println!("No action clears the match threshold."),
    }
    for candidate in &candidates {
        println!(
            "  {:>6.3}  {}",
            candidate.score,
            highlight(query, &candidate.identifier)
        );
    }
    Ok(())
}

async fn run_status(config: &Config) -> Result<()> {
    let (handle, cancel) = Cancellation::channel();
    spawn_interrupt_watcher(Arc::new(handle));

    let client = build_client(config, EventEmitter::new(config.json_output), cancel)?;
    let status = client
        .server_status()
        .await
        .context("failed to fetch server status")?;

    println!("{} ({})", status.status, status.version);
    println!("Last reset: {}", status.reset_date);
    if let Some(resets) = &status.server_resets {
        println!("Next reset: {}", resets.next);
    }
    Ok(())
}

fn build_client(config: &Config, events: EventEmitter, cancel: Cancellation) -> Result<ApiClient> {
    let governor = RateLimitGovernor::new(config.governor_config()).with_events(events);
    let base_url = config.base_url();
    tracing::debug!(target = "traders_console::client", %base_url, "building API client");
    ApiClient::connect(&base_url, config.request_timeout(), governor, cancel)
        .context("failed to build HTTP client")
}

/// Every Ctrl-C raises the shared cancel signal until the process exits.
fn spawn_interrupt_watcher(handle: Arc<CancelHandle>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!(target = "traders_console::console", "interrupt received");
            handle.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Commands};

    #[test]
    fn console_is_the_default_command() {
        let cli = Cli::try_parse_from(["traders-console"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config.suggestions, 5);
    }

    #[test]
    fn resolve_joins_words_and_accepts_global_flags() {
        let cli = Cli::try_parse_from([
            "traders-console",
            "resolve",
            "next",
            "server",
            "reset",
            "--limit",
            "3",
            "--gate-ratio",
            "0.5",
        ])
        .unwrap();
        assert_eq!(cli.config.gate_ratio, 0.5);
        match cli.command {
            Some(Commands::Resolve { query, limit, json }) => {
                assert_eq!(query.join(" "), "next server reset");
                assert_eq!(limit, Some(3));
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unlimited_retries_sentinel_parses() {
        let cli = Cli::try_parse_from(["traders-console", "status", "--max-retries", "-1"]).unwrap();
        assert_eq!(cli.config.max_retries, -1);
        assert!(matches!(cli.command, Some(Commands::Status)));
    }
}
