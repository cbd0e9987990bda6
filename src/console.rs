use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use traders_console::{
    actions::{run_action, ActionOutcome, ActionRegistry, Prompter},
    cancel::{CancelHandle, Cancellation},
    client::ApiClient,
    error::ApiError,
    events::EventEmitter,
    resolver::{highlight, CommandResolver},
    store::TokenStore,
};

const EXAMPLE_PROMPTS: &[&str] = &[
    "Get server status?",
    "When is the next server reset?",
    "Register for a new account?",
    "Get agent details?",
    "List my ships?",
    "Generate a new contract?",
    "Exit?",
];

/// Reads answers from stdin. A raised cancel signal ends the current prompt.
pub struct StdinPrompter {
    lines: Lines<BufReader<Stdin>>,
    cancel: Cancellation,
}

impl StdinPrompter {
    pub fn new(cancel: Cancellation) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            cancel,
        }
    }
}

impl Prompter for StdinPrompter {
    async fn ask(&mut self, message: &str) -> Result<Option<String>> {
        print!("{message} ");
        std::io::stdout().flush()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                println!();
                Ok(None)
            }
            line = self.lines.next_line() => Ok(line?),
        }
    }

    fn notify(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

pub struct Console {
    registry: ActionRegistry,
    resolver: CommandResolver,
    client: ApiClient,
    store: TokenStore,
    events: EventEmitter,
    interrupt: Arc<CancelHandle>,
    suggestions: usize,
}

impl Console {
    pub fn new(
        resolver: CommandResolver,
        client: ApiClient,
        store: TokenStore,
        events: EventEmitter,
        interrupt: Arc<CancelHandle>,
        suggestions: usize,
    ) -> Self {
        Self {
            registry: ActionRegistry::builtin(),
            resolver,
            client,
            store,
            events,
            interrupt,
            suggestions,
        }
    }

    pub async fn run(mut self, prompter: &mut StdinPrompter) -> Result<()> {
        println!("Welcome to your SpaceTraders Console. What actions do you want to take today?\n");

        loop {
            self.interrupt.reset();

            let example = EXAMPLE_PROMPTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("Exit?");
            let Some(line) = prompter.ask(&format!("> (e.g. {example})")).await? else {
                println!("Exiting...");
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }

            if !self.handle_line(&line, prompter).await {
                return Ok(());
            }
            println!();
        }
    }

    /// Returns `false` once the session should end.
    async fn handle_line(&mut self, line: &str, prompter: &mut StdinPrompter) -> bool {
        let Some(identifier) = self.resolver.resolve_one(line) else {
            self.report_unmatched(line);
            return true;
        };
        let Some(action) = self.registry.get(identifier) else {
            return true;
        };

        tracing::debug!(
            target = "traders_console::console",
            query = line,
            action = action.identifier,
            "resolved action"
        );
        self.events.emit(
            "action_resolved",
            json!({ "query": line, "action": action.identifier }),
        );

        let result = run_action(action, &mut self.client, &self.store, prompter, Utc::now()).await;
        match result {
            Ok(ActionOutcome::Output(text)) => println!("{text}"),
            Ok(ActionOutcome::Exit(text)) => {
                println!("{text}");
                return false;
            }
            Ok(ActionOutcome::Cancelled) => println!("Cancelled."),
            Ok(ActionOutcome::NotImplemented) => {
                eprintln!("Action not yet implemented: {}", action.identifier)
            }
            Ok(ActionOutcome::SessionRequired) => eprintln!(
                "{} needs an agent session. Perhaps you need to register first?",
                action.identifier
            ),
            Err(error) if error.downcast_ref::<ApiError>().is_some_and(ApiError::is_aborted) => {
                println!("Action cancelled.")
            }
            Err(error) => {
                tracing::warn!(
                    target = "traders_console::console",
                    action = action.identifier,
                    error = %format!("{error:#}"),
                    "action failed"
                );
                eprintln!("Error: {error:#}");
            }
        }
        true
    }

    fn report_unmatched(&self, line: &str) {
        let candidates = self.resolver.resolve_many(line, self.suggestions);
        self.events.emit(
            "action_unmatched",
            json!({
                "query": line,
                "suggestions": candidates.iter().map(|c| c.identifier.as_str()).collect::<Vec<_>>(),
            }),
        );

        eprintln!("No action found. Try to describe what you want to do more clearly.");
        if candidates.is_empty() {
            return;
        }
        eprintln!("Closest actions:");
        for candidate in &candidates {
            let description = self
                .registry
                .get(&candidate.identifier)
                .map(|action| action.description)
                .unwrap_or_default();
            eprintln!("  {}  {}", highlight(line, &candidate.identifier), description);
        }
    }
}
