//! Territory Engine Daemon and admin CLI
//!
//! ## Usage
//!
//! ```bash
//! # Run the periodic eviction sweeper until Ctrl+C
//! territory-engine serve
//!
//! # Load the city catalog
//! territory-engine seed cities.toml
//!
//! # Register an agent with a random city in France
//! territory-engine register --country FR --name "Alice"
//!
//! # Administrative reassignment
//! territory-engine override paris agent-b --admin ops-1 --reason "dispute"
//!
//! # Inspect the assignment trail
//! territory-engine trail --city paris
//! ```
//!
//! Every command except `serve` prints its result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use territory_engine::services::audit_service::DEFAULT_TRAIL_LIMIT;
use territory_engine::services::events::spawn_logging_listener;
use territory_engine::{void_placement, Actor, Config, Services, Sweeper, TerritoryDb, TerritoryError};

#[derive(Parser, Debug)]
#[command(name = "territory-engine")]
#[command(about = "City ownership, liveness and eviction engine")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "TERRITORY_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (holds territory.db)
    #[arg(long, env = "TERRITORY_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the eviction sweeper on its configured interval
    Serve,

    /// Load cities from a .toml or .json catalog file
    Seed {
        file: PathBuf,
    },

    /// Run one eviction sweep now
    Sweep {
        /// Override the configured inactivity threshold (must exceed warning_days)
        #[arg(long)]
        threshold_days: Option<u32>,
    },

    /// Register an agent and claim a random city in a country
    Register {
        /// ISO country code
        #[arg(long)]
        country: String,
        /// Agent id (generated when omitted)
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },

    /// Claim a specific city for an agent
    Claim {
        city: String,
        agent: String,
        /// Act as this administrator (allows reserved cities)
        #[arg(long)]
        admin: Option<String>,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Release the city an agent holds
    Release {
        agent: String,
        #[arg(long)]
        admin: Option<String>,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Assign a city to an agent, displacing any current owner
    Override {
        city: String,
        agent: String,
        #[arg(long)]
        admin: String,
        #[arg(long)]
        reason: String,
    },

    /// Void an agent immediately
    Void {
        agent: String,
        #[arg(long)]
        admin: String,
        #[arg(long)]
        reason: String,
    },

    /// Record a proof of life for an agent
    Heartbeat {
        agent: String,
    },

    /// Show an agent's liveness and eviction status
    Status {
        agent: String,
    },

    /// List agents inside the eviction warning window
    Approaching,

    /// Set or clear a city's reserved flag
    Reserve {
        city: String,
        #[arg(long)]
        clear: bool,
    },

    /// Show the assignment trail for a city or an agent
    Trail {
        #[arg(long, conflicts_with = "agent", required_unless_present = "agent")]
        city: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value_t = DEFAULT_TRAIL_LIMIT)]
        limit: u32,
    },

    /// Countries ranked by eligible cities
    Availability,

    /// Database statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("territory_engine=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    config.validate()?;

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(TerritoryDb::open(&config.storage_dir, config.busy_timeout())?);
    let services = Services::new(db, &config);

    match args.command {
        Command::Serve => serve(services, config).await,
        Command::Seed { file } => print_json(&services.catalog.seed_from_file(&file)?),
        Command::Sweep { threshold_days } => {
            let threshold = config.eviction.sweep_threshold(threshold_days)?;
            print_json(&services.eviction.sweep(threshold)?)
        }
        Command::Register { country, agent, name } => {
            let agent_id = agent.unwrap_or_else(|| Uuid::new_v4().to_string());
            print_json(&services.registration.register(&agent_id, name.as_deref(), &country)?)
        }
        Command::Claim { city, agent, admin, reason } => {
            let actor = actor_for(admin)?;
            print_json(&services.allocation.claim(&city, &agent, &actor, &reason)?)
        }
        Command::Release { agent, admin, reason } => {
            let actor = actor_for(admin)?;
            print_json(&services.allocation.release(&agent, &actor, &reason)?)
        }
        Command::Override { city, agent, admin, reason } => {
            let actor = Actor::admin(admin)?;
            print_json(&services.allocation.administrative_override(&city, &agent, &actor, &reason)?)
        }
        Command::Void { agent, admin, reason } => {
            let actor = Actor::admin(admin)?;
            let placement = void_placement(&agent);
            print_json(&services.allocation.void_agent(&agent, &placement, &actor, &reason)?)
        }
        Command::Heartbeat { agent } => {
            services.liveness.record_liveness(&agent, None)?;
            print_json(&services.liveness.status_default(&agent)?)
        }
        Command::Status { agent } => {
            let record = services.registration.get_agent(&agent)?;
            let status = match services.liveness.status_default(&agent) {
                Err(TerritoryError::AgentVoided(_)) => None,
                other => Some(other?),
            };
            print_json(&serde_json::json!({ "agent": record, "liveness": status }))
        }
        Command::Approaching => {
            let eviction = services.liveness.eviction_config();
            print_json(&services.liveness.list_approaching(eviction.threshold_days, eviction.warning_days)?)
        }
        Command::Reserve { city, clear } => print_json(&services.catalog.set_reserved(&city, !clear)?),
        Command::Trail { city, agent, limit } => {
            let records = match (city, agent) {
                (Some(city), _) => services.audit.trail_for_city(&city, limit)?,
                (None, Some(agent)) => services.audit.trail_for_agent(&agent, limit)?,
                (None, None) => anyhow::bail!("either --city or --agent is required"),
            };
            print_json(&records)
        }
        Command::Availability => print_json(&services.catalog.country_availability()?),
        Command::Stats => print_json(&services.db.stats()?),
    }
}

async fn serve(services: Services, config: Config) -> anyhow::Result<()> {
    info!(
        storage_dir = %config.storage_dir.display(),
        threshold_days = config.eviction.threshold_days,
        warning_days = config.eviction.warning_days,
        "Starting territory-engine"
    );

    let listener = spawn_logging_listener(services.events.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let sweeper = Sweeper::new(services.eviction.clone(), config.eviction.clone());
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    info!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let _ = shutdown_tx.send(());
    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "Sweeper task failed");
    }
    listener.abort();

    if let Ok(stats) = services.db.stats() {
        info!(
            cities = stats.city_count,
            owned = stats.owned_city_count,
            agents = stats.agent_count,
            voided = stats.voided_agent_count,
            "Final territory stats"
        );
    }

    Ok(())
}

fn actor_for(admin: Option<String>) -> anyhow::Result<Actor> {
    Ok(match admin {
        Some(id) => Actor::admin(id)?,
        None => Actor::SelfRegistration,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
