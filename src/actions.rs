//! Static action table and the handlers that are implemented so far.
//!
//! The table is the resolver's vocabulary. Entries without a handler are
//! still resolvable so the console can tell the user the action exists but
//! is not available yet.

use std::collections::HashSet;
use std::future::Future;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use crossterm::style::Stylize;
use regex::Regex;

use crate::client::ApiClient;
use crate::format::{
    display_value, format_timestamp, parse_server_date, whole_days_between,
    with_thousands_separators,
};
use crate::resolver::{CommandResolver, ResolverConfig};
use crate::store::TokenStore;
use crate::transport::Transport;
use crate::types::{RegisterRequest, ServerStatus, DEFAULT_FACTION, FACTIONS};

/// Servers are wiped on a fixed two-week cycle.
const SERVER_RESET_INTERVAL_DAYS: i64 = 14;

const SYMBOL_MIN_LEN: usize = 3;
const SYMBOL_MAX_LEN: usize = 14;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Exit,
    Status,
    Announcements,
    Stats,
    NextServerReset,
    LastServerReset,
    Register,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub identifier: &'static str,
    pub description: &'static str,
    /// Needs a registered agent token.
    pub requires_session: bool,
    pub handler: Option<Handler>,
}

const fn open(identifier: &'static str, description: &'static str, handler: Option<Handler>) -> ActionDescriptor {
    ActionDescriptor {
        identifier,
        description,
        requires_session: false,
        handler,
    }
}

const fn agent(identifier: &'static str, description: &'static str) -> ActionDescriptor {
    ActionDescriptor {
        identifier,
        description,
        requires_session: true,
        handler: None,
    }
}

pub static ACTIONS: &[ActionDescriptor] = &[
    open("GetStatus", "Get the status of the SpaceTraders server.", Some(Handler::Status)),
    open("Status", "Get the status of the SpaceTraders server.", Some(Handler::Status)),
    open("GetAnnouncements", "Read the latest server announcements.", Some(Handler::Announcements)),
    open("GetStats", "Get the latest server stats.", Some(Handler::Stats)),
    open("NextServerReset", "Get the date of the next server reset.", Some(Handler::NextServerReset)),
    open("LastServerReset", "Get the date of the last server reset.", Some(Handler::LastServerReset)),
    open("Exit", "Exit the program.", Some(Handler::Exit)),
    open("Register", "Register for a new account.", Some(Handler::Register)),
    open("Authenticate", "Log in with an existing agent token.", None),
    agent("GetAgent", "Show your agent details."),
    open("ListAgents", "List all public agents.", None),
    open("GetPublicAgent", "Look up another agent by symbol.", None),
    agent("GetContract", "Show one of your contracts."),
    agent("ListContracts", "List your contracts."),
    agent("AcceptContract", "Accept a contract."),
    agent("DeliverCargoToContract", "Deliver cargo towards a contract."),
    agent("FulfillContract", "Fulfill a completed contract."),
    open("GetFaction", "Show details for a faction.", None),
    open("ListFactions", "List all factions.", None),
    open("GetSystem", "Show details for a system.", None),
    open("ListSystems", "List systems in the universe.", None),
    open("GetWaypoint", "Show details for a waypoint.", None),
    open("ListWaypoints", "List waypoints in a system.", None),
    open("GetMarket", "Show a waypoint's market.", None),
    open("GetShipyard", "Show a waypoint's shipyard.", None),
    open("GetJumpgate", "Show a waypoint's jump gate.", None),
    open("GetConstructionSite", "Show a construction site.", None),
    agent("SupplyConstructionSite", "Supply materials to a construction site."),
    agent("GetShip", "Show one of your ships."),
    agent("GetShipCargo", "Show a ship's cargo."),
    agent("ListShips", "List your ships."),
    agent("PurchaseShip", "Buy a ship at a shipyard."),
    agent("OrbitShip", "Move a ship into orbit."),
    agent("ShipRefine", "Refine raw materials aboard a ship."),
    agent("CreateChart", "Chart the waypoint a ship is at."),
    agent("GetShipCooldown", "Show a ship's cooldown."),
    agent("DockShip", "Dock a ship at its waypoint."),
    agent("CreateSurvey", "Survey the waypoint a ship is at."),
    agent("ExtractResources", "Extract resources with a ship."),
    agent("SiphonResources", "Siphon gas with a ship."),
    agent("ExtractResourcesWithSurvey", "Extract resources using a survey."),
    agent("JettisonCargo", "Jettison cargo from a ship."),
    agent("JumpShip", "Jump a ship to another system."),
    agent("NavigateShip", "Navigate a ship to a waypoint."),
    agent("PatchShipNav", "Change a ship's flight mode."),
    agent("GetShipNav", "Show a ship's navigation status."),
    agent("WarpShip", "Warp a ship to another system."),
    agent("SellCargo", "Sell cargo at a market."),
    agent("ScanSystems", "Scan for nearby systems."),
    agent("ScanWaypoints", "Scan for nearby waypoints."),
    agent("ScanShips", "Scan for nearby ships."),
    agent("RefuelShip", "Refuel a ship."),
    agent("PurchaseCargo", "Buy cargo at a market."),
    agent("TransferCargo", "Move cargo between ships."),
    agent("NegotiateContract", "Negotiate a new contract."),
    agent("GetMounts", "Show a ship's mounts."),
    agent("InstallMount", "Install a mount on a ship."),
    agent("RemoveMount", "Remove a mount from a ship."),
    agent("GetShipScrap", "Quote the scrap value of a ship."),
    agent("ScrapShip", "Scrap a ship."),
    agent("GetRepairShip", "Quote the repair cost of a ship."),
    agent("RepairShip", "Repair a ship."),
];

/// Lookup over the action table, in table order.
#[derive(Debug, Clone, Copy)]
pub struct ActionRegistry {
    actions: &'static [ActionDescriptor],
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ActionRegistry {
    pub fn builtin() -> Self {
        Self { actions: ACTIONS }
    }

    pub fn get(&self, identifier: &str) -> Option<&'static ActionDescriptor> {
        self.actions
            .iter()
            .find(|action| action.identifier == identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static ActionDescriptor> {
        self.actions.iter()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &'static str> {
        self.actions.iter().map(|action| action.identifier)
    }

    pub fn resolver(&self, config: ResolverConfig) -> CommandResolver {
        CommandResolver::new(self.identifiers(), config)
    }
}

/// Line-oriented user input for actions that need more than the command.
pub trait Prompter {
    /// `None` when input has ended or the prompt was cancelled.
    fn ask(&mut self, message: &str) -> impl Future<Output = Result<Option<String>>>;

    /// Feedback shown between prompts, e.g. a validation failure.
    fn notify(&mut self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Output(String),
    Exit(String),
    /// The user backed out of an interactive step.
    Cancelled,
    NotImplemented,
    SessionRequired,
}

pub async fn run_action<T, P>(
    action: &ActionDescriptor,
    client: &mut ApiClient<T>,
    store: &TokenStore,
    prompter: &mut P,
    now: DateTime<Utc>,
) -> Result<ActionOutcome>
where
    T: Transport,
    P: Prompter,
{
    let Some(handler) = action.handler else {
        return Ok(ActionOutcome::NotImplemented);
    };
    if action.requires_session && !client.has_session() {
        return Ok(ActionOutcome::SessionRequired);
    }

    tracing::debug!(
        target = "traders_console::actions",
        identifier = action.identifier,
        ?handler,
        "running action"
    );

    match handler {
        Handler::Exit => Ok(ActionOutcome::Exit("Farewell, sailor!".to_string())),
        Handler::Status => {
            let status = fetch_status(client).await?;
            Ok(ActionOutcome::Output(status.status))
        }
        Handler::Announcements => {
            let status = fetch_status(client).await?;
            Ok(ActionOutcome::Output(render_announcements(&status)))
        }
        Handler::Stats => {
            let status = fetch_status(client).await?;
            Ok(ActionOutcome::Output(render_stats(&status)))
        }
        Handler::NextServerReset => {
            let status = fetch_status(client).await?;
            Ok(ActionOutcome::Output(describe_next_reset(&status, now)?))
        }
        Handler::LastServerReset => {
            let status = fetch_status(client).await?;
            Ok(ActionOutcome::Output(describe_last_reset(&status, now)?))
        }
        Handler::Register => register(client, store, prompter).await,
    }
}

async fn fetch_status<T: Transport>(client: &ApiClient<T>) -> Result<ServerStatus> {
    client
        .server_status()
        .await
        .context("failed to fetch server status")
}

fn render_announcements(status: &ServerStatus) -> String {
    if status.announcements.is_empty() {
        return "No announcements.".to_string();
    }
    status
        .announcements
        .iter()
        .enumerate()
        .map(|(index, announcement)| {
            format!(
                "{}. {}\n{}\n",
                index + 1,
                announcement.title.as_str().bold(),
                announcement.body
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_stats(status: &ServerStatus) -> String {
    status
        .stats
        .iter()
        .map(|(key, value)| format!("{key}: {}", display_value(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn last_reset(status: &ServerStatus) -> Result<DateTime<Utc>> {
    parse_server_date(&status.reset_date)
        .with_context(|| format!("server reported an unreadable reset date {:?}", status.reset_date))
}

/// Prefers the server's own schedule, otherwise last reset plus the cycle length.
fn next_reset(status: &ServerStatus) -> Result<DateTime<Utc>> {
    if let Some(next) = status
        .server_resets
        .as_ref()
        .and_then(|resets| parse_server_date(&resets.next))
    {
        return Ok(next);
    }
    Ok(last_reset(status)? + TimeDelta::days(SERVER_RESET_INTERVAL_DAYS))
}

fn describe_next_reset(status: &ServerStatus, now: DateTime<Utc>) -> Result<String> {
    let next = next_reset(status)?;
    Ok(format!(
        "The next server reset is scheduled for {}. That's in {} days.",
        format_timestamp(next),
        whole_days_between(now, next)
    ))
}

fn describe_last_reset(status: &ServerStatus, now: DateTime<Utc>) -> Result<String> {
    let last = last_reset(status)?;
    Ok(format!(
        "The last server reset was on {}. That was {} days ago.",
        format_timestamp(last),
        whole_days_between(last, now)
    ))
}

async fn register<T, P>(
    client: &mut ApiClient<T>,
    store: &TokenStore,
    prompter: &mut P,
) -> Result<ActionOutcome>
where
    T: Transport,
    P: Prompter,
{
    let Some(symbol) = ask_until(prompter, "Enter your desired agent symbol:", validate_symbol).await? else {
        return Ok(ActionOutcome::Cancelled);
    };
    let Some(faction) = ask_until(
        prompter,
        &format!("Select a faction (default {DEFAULT_FACTION}):"),
        pick_faction,
    )
    .await?
    else {
        return Ok(ActionOutcome::Cancelled);
    };
    let Some(email) = ask_until(prompter, "Enter your email address (optional):", validate_email).await? else {
        return Ok(ActionOutcome::Cancelled);
    };

    let request = RegisterRequest {
        faction: faction.to_string(),
        symbol,
        email,
    };
    let registered = client
        .register(&request)
        .await
        .context("registration failed")?;

    store
        .save(&registered.token)
        .context("registered, but the token could not be saved")?;
    client.set_token(registered.token.clone());

    tracing::info!(
        target = "traders_console::actions",
        agent = %registered.agent.symbol,
        faction = %request.faction,
        "registered new agent"
    );

    Ok(ActionOutcome::Output(format!(
        "Successfully registered as {}! Starting credits: {}.",
        registered.agent.symbol,
        with_thousands_separators(registered.agent.credits)
    )))
}

/// Re-ask until `validate` accepts the answer or input ends.
async fn ask_until<P, V, F>(prompter: &mut P, message: &str, validate: F) -> Result<Option<V>>
where
    P: Prompter,
    F: Fn(&str) -> std::result::Result<V, String>,
{
    loop {
        let Some(answer) = prompter.ask(message).await? else {
            return Ok(None);
        };
        match validate(answer.trim()) {
            Ok(value) => return Ok(Some(value)),
            Err(reason) => prompter.notify(&reason),
        }
    }
}

fn validate_symbol(input: &str) -> std::result::Result<String, String> {
    let len = input.chars().count();
    if (SYMBOL_MIN_LEN..=SYMBOL_MAX_LEN).contains(&len) {
        Ok(input.to_string())
    } else {
        Err(format!(
            "Symbol must be between {SYMBOL_MIN_LEN} and {SYMBOL_MAX_LEN} characters."
        ))
    }
}

fn validate_email(input: &str) -> std::result::Result<Option<String>, String> {
    if input.is_empty() {
        return Ok(None);
    }
    if EMAIL_PATTERN.is_match(input) {
        Ok(Some(input.to_string()))
    } else {
        Err("Invalid email address.".to_string())
    }
}

/// Blank picks the default; otherwise an exact name or a unique substring.
fn pick_faction(input: &str) -> std::result::Result<&'static str, String> {
    if input.is_empty() {
        return Ok(DEFAULT_FACTION);
    }
    let wanted = input.to_uppercase();
    if let Some(exact) = FACTIONS.iter().copied().find(|faction| *faction == wanted) {
        return Ok(exact);
    }

    let matches: Vec<&'static str> = FACTIONS
        .iter()
        .copied()
        .filter(|faction| faction.contains(&wanted))
        .collect();
    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(format!("Unknown faction. Choose one of: {}", FACTIONS.join(", "))),
        several => Err(format!("Did you mean one of: {}?", several.join(", "))),
    }
}

/// Identifiers appearing more than once in the table.
pub fn duplicate_identifiers(registry: &ActionRegistry) -> Vec<&'static str> {
    let mut seen = HashSet::new();
    registry
        .identifiers()
        .filter(|identifier| !seen.insert(*identifier))
        .collect()
}
