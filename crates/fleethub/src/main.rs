//! `fleethub` - CLI for the fleet dashboard
//!
//! This binary renders the fleet and submits status toggles and log forms
//! against the configured document store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::Parser;

use fleethub::cli::{
    Cli, Command, ConditionCommand, ConfigCommand, RentalCommand, ServiceCommand, ShowCommand,
};
use fleethub::client::open_store;
use fleethub::dashboard::{self, RenderOptions, VehicleView};
use fleethub::store::CollectionPath;
use fleethub::{fixtures, init_logging, Config, InventorySync, SyncPhase, VehicleHub, WriteOutcome};

/// The session stopped in the error phase; the message is already user-facing.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct SessionHalted(String);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(message) = full_page_message(&e) {
                eprint!("{}", dashboard::render_error(&message));
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Message for errors that halt the listing, if `error` is one.
fn full_page_message(error: &anyhow::Error) -> Option<String> {
    if let Some(halted) = error.downcast_ref::<SessionHalted>() {
        return Some(halted.0.clone());
    }
    error
        .downcast_ref::<fleethub::Error>()
        .filter(|e| e.is_fatal())
        .map(ToString::to_string)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        command => {
            let session = open_session(&config).await?;
            let result = handle_session(&config, &session, command).await;
            session.shutdown();
            result
        }
    }
}

async fn handle_session(
    config: &Config,
    session: &InventorySync,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::List(cmd) => {
            let state = session.state();
            if cmd.json {
                let json = dashboard::inventory_json(&state, render_options(config));
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                print!("{}", dashboard::render_grid(&state, render_options(config)));
            }
            Ok(())
        }
        Command::Show(cmd) => handle_show(config, session, &cmd),
        Command::Toggle(cmd) => {
            let before = session.state();
            if session.toggle_status(&cmd.id).await? == WriteOutcome::Failed {
                bail!("status change for {} was not saved", cmd.id);
            }
            let after = session.wait_for_revision_after(before.revision).await;
            if let Some(vehicle) = after.vehicle(&cmd.id) {
                println!("{}: {}", vehicle.name, vehicle.status);
            }
            Ok(())
        }
        Command::Service(cmd) => handle_service(config, session, cmd).await,
        Command::Condition(cmd) => handle_condition(config, session, cmd).await,
        Command::Rental(cmd) => handle_rental(config, session, cmd).await,
        Command::Watch => handle_watch(config, session).await,
        Command::Status(_) | Command::Config(_) => Ok(()),
    }
}

/// Connect, authenticate, seed and wait for the first snapshot.
async fn open_session(config: &Config) -> anyhow::Result<InventorySync> {
    let session = InventorySync::connect(config)?;
    let fleet = if config.seed.enabled {
        Some(fixtures::resolve(config.seed.fixtures_path.as_deref()).context("failed to load fixtures")?)
    } else {
        None
    };

    session.start(fleet.as_deref()).await?;
    let state = session.wait_until_loaded().await;
    if state.phase == SyncPhase::Error {
        let message = state.error.unwrap_or_else(|| "unknown error".to_string());
        session.shutdown();
        return Err(SessionHalted(message).into());
    }
    Ok(session)
}

fn handle_show(config: &Config, session: &InventorySync, cmd: &ShowCommand) -> anyhow::Result<()> {
    let vehicle = session
        .open_detail(&cmd.id)
        .with_context(|| format!("no vehicle with id {}", cmd.id))?;
    if cmd.json {
        let view = VehicleView::new(&vehicle, render_options(config));
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", dashboard::render_detail(&vehicle, render_options(config)));
    }
    session.close_detail();
    Ok(())
}

async fn handle_service(
    config: &Config,
    session: &InventorySync,
    cmd: ServiceCommand,
) -> anyhow::Result<()> {
    let mut hub = open_hub(session, &cmd.id)?;
    hub.service.date = cmd.date;
    hub.service.notes = cmd.notes;
    hub.service.cost = cmd.cost.unwrap_or_default();
    hub.service.next_date = cmd.next_date.unwrap_or_default();

    let before = session.state().revision;
    let outcome = hub.submit_service().await?;
    report(config, session, &cmd.id, before, outcome, "service record").await
}

async fn handle_condition(
    config: &Config,
    session: &InventorySync,
    cmd: ConditionCommand,
) -> anyhow::Result<()> {
    let mut hub = open_hub(session, &cmd.id)?;
    if let Some(date) = cmd.date {
        hub.condition.date = date;
    }
    hub.condition.note = cmd.note;
    hub.condition.mileage = cmd.mileage.unwrap_or_default();

    let before = session.state().revision;
    let outcome = hub.submit_condition(today()).await?;
    report(config, session, &cmd.id, before, outcome, "condition entry").await
}

async fn handle_rental(
    config: &Config,
    session: &InventorySync,
    cmd: RentalCommand,
) -> anyhow::Result<()> {
    let mut hub = open_hub(session, &cmd.id)?;
    hub.rental.days = cmd.days;

    let before = session.state().revision;
    let outcome = hub.submit_rental().await?;
    report(config, session, &cmd.id, before, outcome, "rental return").await
}

fn open_hub(session: &InventorySync, id: &str) -> anyhow::Result<VehicleHub> {
    let vehicle = session
        .open_detail(id)
        .with_context(|| format!("no vehicle with id {id}"))?;
    Ok(VehicleHub::open(session.client().clone(), vehicle, today()))
}

/// Print the refreshed detail view once the write shows up in a snapshot.
async fn report(
    config: &Config,
    session: &InventorySync,
    id: &str,
    before: Option<u64>,
    outcome: WriteOutcome,
    what: &str,
) -> anyhow::Result<()> {
    if outcome == WriteOutcome::Failed {
        bail!("{what} for {id} was not saved");
    }
    let state = session.wait_for_revision_after(before).await;
    if let Some(vehicle) = state.selected.as_ref().or_else(|| state.vehicle(id)) {
        println!("Saved {what}.");
        println!();
        print!("{}", dashboard::render_detail(vehicle, render_options(config)));
    }
    session.close_detail();
    Ok(())
}

async fn handle_watch(config: &Config, session: &InventorySync) -> anyhow::Result<()> {
    let mut rx = session.watch();
    let mut last_revision = None;

    loop {
        let state = rx.borrow_and_update().clone();
        if state.revision != last_revision || state.phase == SyncPhase::Error {
            last_revision = state.revision;
            // Clear the screen and home the cursor
            print!("\x1b[2J\x1b[H");
            print!("{}", dashboard::render_grid(&state, render_options(config)));
        }
        if state.phase == SyncPhase::Error {
            return Err(SessionHalted(state.error.unwrap_or_default()).into());
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                return Ok(());
            }
        }
    }
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let collection = CollectionPath::cars_for_tenant(&config.tenant.app_id);
    let stats = store.stats(&collection)?;

    if json {
        let status = serde_json::json!({
            "tenant": config.tenant.app_id,
            "collection": collection.as_str(),
            "database_path": store.path(),
            "documents": stats.documents,
            "users": stats.users,
            "revision": stats.revision,
            "last_write": stats.last_write,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("fleethub status");
        println!("---------------");
        println!("Tenant:        {}", config.tenant.app_id);
        println!("Collection:    {collection}");
        println!("Database:      {}", store.path().display());
        println!("Vehicles:      {}", stats.documents);
        println!("Users:         {}", stats.users);
        println!("Revision:      {}", stats.revision);
        println!(
            "Last write:    {}",
            stats.last_write.as_deref().unwrap_or("never")
        );
        println!("Size:          {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Backend]");
                match config.backend_config() {
                    Ok(backend) => {
                        println!("  Project:            {}", backend.project_id);
                        if backend.in_memory {
                            println!("  Database:           (in memory)");
                        } else {
                            println!("  Database:           {}", backend.database_path().display());
                        }
                    }
                    Err(e) => println!("  Not usable:         {e}"),
                }
                println!(
                    "  Auth token:         {}",
                    if config.auth_token().is_some() { "set" } else { "not set" }
                );
                println!();
                println!("[Tenant]");
                println!("  App id:             {}", config.tenant.app_id);
                println!();
                println!("[Store]");
                println!("  Array union:        {:?}", config.store.array_union);
                println!();
                println!("[Seed]");
                println!("  Enabled:            {}", config.seed.enabled);
                match &config.seed.fixtures_path {
                    Some(path) => println!("  Fixtures:           {}", path.display()),
                    None => println!("  Fixtures:           (built-in)"),
                }
                println!();
                println!("[Dashboard]");
                println!(
                    "  Service due months: {}",
                    config.dashboard.service_due_months
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(loaded) => match loaded.backend_config() {
                    Ok(_) => println!("Configuration is valid."),
                    Err(e) => println!("Configuration loads, but {e}"),
                },
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn render_options(config: &Config) -> RenderOptions {
    RenderOptions {
        today: today(),
        service_due_months: config.dashboard.service_due_months,
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
