//! Agrisync - offline-first farm data cache with background sync.
//!
//! Reads and edits the farmer's cached records (profile, farms, loans,
//! weather, market prices, credit score). Edits made without a connection are
//! queued and sent, in order, the next time the server is reachable.
//!
//! QUICK START:
//!   agrisync init-config --server-url http://host:5000/api
//!   agrisync status                      # Connectivity, queue, dashboard
//!   agrisync --offline add-farm --name North --size 2 --crops maize
//!   agrisync pending                     # What is waiting to be sent
//!   agrisync sync                        # Send it and refresh

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use agrisync::application::formatter::{
    format_credit, format_farms_table, format_json, format_loans_table, format_market_table,
    format_outcome, format_pending_table, format_status, format_user, format_weather,
};
use agrisync::application::{
    ConnectivityMonitor, DomainCache, OutputFormat, PendingQueue, SyncCoordinator,
};
use agrisync::cli::{Cli, Commands};
use agrisync::domain::{
    AppConfig, AppError, Connectivity, EntityKind, Farm, Loan, Location, Mutation, SyncOutcome,
    SyncTrigger, User,
};
use agrisync::infrastructure::{
    config_file_path, ensure_config_exists, load_config, load_config_from_file, save_config_to,
    DurableStore, HttpRemote, LocalStorage, Reachability, RemoteBackend, StaticReachability,
    TcpReachability,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {e:#}", "Error:".red().bold());
        std::process::exit(1);
    }
}

/// The wired-up sync core for one invocation.
struct App {
    cache: Arc<DomainCache>,
    coordinator: Arc<SyncCoordinator>,
    format: OutputFormat,
}

impl App {
    async fn open(config: &AppConfig, offline: bool, format: OutputFormat) -> anyhow::Result<Self> {
        let db_path = config.storage_db_path();
        let store: Arc<dyn DurableStore> = Arc::new(
            LocalStorage::open(&db_path)
                .with_context(|| format!("Failed to open store at {}", db_path.display()))?,
        );

        let reachability: Arc<dyn Reachability> = if offline {
            Arc::new(StaticReachability(Connectivity::Offline))
        } else {
            Arc::new(TcpReachability::from_url(
                &config.sync.server_url,
                config.sync.request_timeout(),
            )?)
        };

        let monitor = Arc::new(ConnectivityMonitor::sample(reachability.as_ref()).await);
        let queue = Arc::new(PendingQueue::load(Arc::clone(&store)).await?);
        let cache = Arc::new(DomainCache::load(store, queue, monitor).await?);

        let remote: Arc<dyn RemoteBackend> = Arc::new(HttpRemote::new(&config.sync)?);
        let coordinator = Arc::new(
            SyncCoordinator::restore(
                Arc::clone(&cache),
                remote,
                reachability,
                config.sync.clone(),
            )
            .await?,
        );

        Ok(Self {
            cache,
            coordinator,
            format,
        })
    }

    /// Send anything left over from an earlier offline session.
    async fn catch_up(&self) {
        if self.cache.queue().is_empty().await {
            return;
        }
        match self.coordinator.request_sync(SyncTrigger::Reconnect).await {
            Ok(SyncOutcome::Completed { submitted, .. }) => {
                tracing::info!(submitted, "Caught up with server");
            }
            Ok(SyncOutcome::Skipped(reason)) => tracing::debug!(%reason, "Catch-up skipped"),
            Err(e) => tracing::warn!(error = %e, "Catch-up sync failed"),
        }
    }
}

/// Main application logic.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = cli.output_format().map_err(anyhow::Error::msg)?;

    let config = match &cli.config {
        Some(path) => load_config_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => load_config()?,
    };

    let command = match cli.command {
        Commands::InitConfig { server_url } => {
            return cmd_init_config(cli.config.as_deref(), config, server_url);
        }
        command => command,
    };

    let app = App::open(&config, cli.offline, format).await?;

    match command {
        Commands::Status => {
            if config.sync.auto_sync {
                app.catch_up().await;
            }
            cmd_status(&app).await?;
        }
        Commands::Show { entity, crop } => {
            if config.sync.auto_sync {
                app.catch_up().await;
            }
            cmd_show(&app, entity, crop.as_deref()).await?;
        }
        Commands::Pending => cmd_pending(&app).await?,
        Commands::ClearPending { yes } => cmd_clear_pending(&app, yes).await?,
        Commands::Sync => {
            let outcome = app.coordinator.request_sync(SyncTrigger::Manual).await?;
            println!("{}", format_outcome(&outcome));
        }
        Commands::Refresh => {
            let outcome = app.coordinator.refresh().await?;
            println!("{}", format_outcome(&outcome));
        }
        Commands::SetCreditScore { score } => {
            let credit = app.cache.update_credit_score(score).await?;
            print_value(app.format, &credit, format_credit)?;
        }
        Commands::UpdateProfile {
            name,
            email,
            phone,
            farmer_type,
            address,
            latitude,
            longitude,
        } => {
            let mut user = app.cache.user().unwrap_or_else(|| User {
                id: Uuid::new_v4().to_string(),
                name: String::new(),
                email: String::new(),
                phone: String::new(),
                farmer_type: agrisync::domain::FarmerType::default(),
                location: Location::default(),
                profile_complete: false,
            });
            if let Some(name) = name {
                user.name = name;
            }
            if let Some(email) = email {
                user.email = email;
            }
            if let Some(phone) = phone {
                user.phone = phone;
            }
            if let Some(farmer_type) = farmer_type {
                user.farmer_type = farmer_type;
            }
            if let Some(address) = address {
                user.location.address = address;
            }
            if let Some(latitude) = latitude {
                user.location.latitude = latitude;
            }
            if let Some(longitude) = longitude {
                user.location.longitude = longitude;
            }

            let user = user.refresh_completeness();
            apply_change(&app, Mutation::UpdateProfile { user }, "Profile").await?;
        }
        Commands::AddFarm {
            id,
            name,
            size,
            crops,
            soil,
            health,
            last_harvest,
        } => {
            let farm = Farm {
                id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                name,
                size,
                crop_types: crops,
                location: app.cache.user().map(|u| u.location).unwrap_or_default(),
                soil_type: soil,
                last_harvest,
                crop_health: health,
            };
            apply_change(&app, Mutation::SaveFarm { farm }, "Farm").await?;
        }
        Commands::RemoveFarm { id } => {
            apply_change(&app, Mutation::RemoveFarm { farm_id: id }, "Farm removal").await?;
        }
        Commands::ApplyLoan {
            id,
            amount,
            rate,
            start,
            end,
        } => {
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let loan = Loan::new(id, amount, rate, start, end)?;
            apply_change(&app, Mutation::ApplyForLoan { loan }, "Loan application").await?;
        }
        Commands::RepayLoan { loan_id, amount } => {
            apply_change(&app, Mutation::RepayLoan { loan_id, amount }, "Repayment").await?;
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// Apply a change locally, then send it now or leave it queued.
async fn apply_change(app: &App, mutation: Mutation, what: &str) -> anyhow::Result<()> {
    let outcome = app.cache.apply(mutation.clone()).await?;
    if !outcome.persisted {
        println!(
            "{} {what} applied, but the local database could not be updated",
            "!".yellow().bold()
        );
    }

    if let Some(op) = outcome.operation {
        println!(
            "{} {what} saved offline, queued as #{} ({} pending)",
            "•".yellow(),
            op.seq,
            app.cache.queue().len().await
        );
        return Ok(());
    }

    match app.coordinator.submit_now(mutation).await {
        Ok(outcome) => {
            println!("{} {what} saved", "✓".green().bold());
            println!("{}", format_outcome(&outcome));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Immediate submit failed");
            println!(
                "{} {what} saved locally; sending failed and will be retried: {e}",
                "!".yellow().bold()
            );
        }
    }

    Ok(())
}

async fn cmd_status(app: &App) -> anyhow::Result<()> {
    let status = app.coordinator.status().await;
    let summary = app.cache.summary();

    match app.format {
        OutputFormat::Table => println!("{}", format_status(&status, &summary)),
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct StatusReport<'a> {
                sync: &'a agrisync::domain::SyncStatus,
                summary: &'a agrisync::application::CacheSummary,
            }
            let report = StatusReport {
                sync: &status,
                summary: &summary,
            };
            println!("{}", format_json(&report)?);
        }
    }

    Ok(())
}

async fn cmd_show(app: &App, entity: EntityKind, crop: Option<&str>) -> anyhow::Result<()> {
    let cache = &app.cache;

    match entity {
        EntityKind::User => print_optional(app.format, cache.user().as_ref(), format_user)?,
        EntityKind::Farms => print_value(app.format, &cache.farms(), |f| format_farms_table(f))?,
        EntityKind::Loans => print_value(app.format, &cache.loans(), |l| format_loans_table(l))?,
        EntityKind::Weather => print_optional(app.format, cache.weather().as_ref(), format_weather)?,
        EntityKind::MarketPrices => match crop {
            Some(crop) => {
                let price = cache.market_price(crop).ok_or_else(|| AppError::NotFound {
                    entity: "market price",
                    id: crop.to_string(),
                })?;
                print_value(app.format, std::slice::from_ref(&price), format_market_table)?;
            }
            None => print_value(app.format, &cache.market_prices(), |p| {
                format_market_table(p)
            })?,
        },
        EntityKind::CreditScore => {
            print_optional(app.format, cache.credit_score().as_ref(), format_credit)?;
        }
        EntityKind::PendingOperations => cmd_pending(app).await?,
    }

    Ok(())
}

async fn cmd_pending(app: &App) -> anyhow::Result<()> {
    let ops = app.cache.queue().drain().await;

    if app.format == OutputFormat::Table && ops.is_empty() {
        println!("{} No pending operations", "✓".green());
        return Ok(());
    }
    print_value(app.format, ops.as_slice(), format_pending_table)
}

async fn cmd_clear_pending(app: &App, yes: bool) -> anyhow::Result<()> {
    let pending = app.cache.queue().len().await;
    if pending == 0 {
        println!("{} No pending operations", "✓".green());
        return Ok(());
    }
    if !yes {
        anyhow::bail!(
            "Refusing to drop {pending} unsent operation(s); rerun with --yes to discard them"
        );
    }

    let removed = app.cache.queue().clear().await?;
    println!("{} Discarded {removed} pending operation(s)", "✓".green().bold());
    Ok(())
}

fn cmd_init_config(
    explicit_path: Option<&Path>,
    mut config: AppConfig,
    server_url: Option<String>,
) -> anyhow::Result<()> {
    let path = explicit_path.map_or_else(config_file_path, Path::to_path_buf);

    if let Some(url) = server_url {
        url::Url::parse(&url).with_context(|| format!("Invalid server URL: {url}"))?;
        config.sync.server_url = url;
        save_config_to(&path, &config)?;
        println!(
            "{} Configuration written to {}",
            "✓".green().bold(),
            path.display()
        );
        return Ok(());
    }

    if ensure_config_exists(&path)? {
        println!("{} Created {}", "✓".green().bold(), path.display());
    } else {
        println!("Configuration already exists at {}", path.display());
    }
    Ok(())
}

fn print_value<T, F>(format: OutputFormat, value: &T, table: F) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    let out = match format {
        OutputFormat::Table => table(value),
        OutputFormat::Json => format_json(value)?,
    };
    println!("{out}");
    Ok(())
}

fn print_optional<T, F>(format: OutputFormat, value: Option<&T>, table: F) -> anyhow::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match (format, value) {
        (OutputFormat::Table, None) => {
            println!("{}", "Nothing cached yet. Run `agrisync refresh` while online.".dimmed());
            Ok(())
        }
        (OutputFormat::Json, None) => {
            println!("null");
            Ok(())
        }
        (_, Some(value)) => print_value(format, value, table),
    }
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
