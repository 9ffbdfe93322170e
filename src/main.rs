//! # Subflow: subscriber lifecycle messaging
//!
//! Segments subscribers, picks and personalizes templates, persists state and
//! runs the onboarding / retention / churn / upgrade workflows.
//!
//! Usage:
//!   subflow init                                   # Create config, data dirs, seed rules cache
//!   subflow process-events --file events.json      # Route a lifecycle event feed
//!   subflow onboard --name Ann --days 0 --spend 60 # Single onboarding
//!   subflow retain --id 2 --name Bob --inactive-days 15
//!   subflow churn                                  # Weekly churn batch, now
//!   subflow schedule                               # Run the cron scheduler

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use subflow_core::SubflowConfig;
use subflow_core::types::Fields;
use subflow_rules::ConfigBundle;
use subflow_scheduler::{BatchScheduler, EventRouter, spawn_scheduler};
use subflow_templates::TemplateStore;
use subflow_workflow::WorkflowEngine;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "subflow",
    version,
    about = "📬 Subflow: subscriber lifecycle messaging"
)]
struct Cli {
    /// Config file (default: ~/.subflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config, create the store and seed the rules cache
    Init,
    /// Process a lifecycle event feed in order
    ProcessEvents {
        #[arg(long, default_value = "data/sample_events.json")]
        file: String,
    },
    /// Onboard one subscriber
    Onboard {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Days since subscribing
        #[arg(long, default_value = "0")]
        days: i64,
        /// Total spend
        #[arg(long, default_value = "0")]
        spend: f64,
    },
    /// Send a retention offer to one subscriber
    Retain {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "0")]
        days: i64,
        /// Days without activity
        #[arg(long, default_value = "0")]
        inactive_days: i64,
        #[arg(long, default_value = "0")]
        spend: f64,
    },
    /// Recompute a subscriber's tier and send the upgrade notice
    Upgrade {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        spend: f64,
    },
    /// Run the churn batch now
    Churn,
    /// Run the retention scan now
    RetentionScan,
    /// Show a stored subscriber
    Show {
        #[arg(long)]
        id: String,
    },
    /// Show a subscriber's message log
    Logs {
        #[arg(long)]
        id: String,
    },
    /// Run retention nightly and churn weekly until interrupted
    Schedule,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&str>) -> Result<SubflowConfig> {
    let mut config = match path {
        Some(p) => SubflowConfig::load_from(&expand_path(p))?,
        None => SubflowConfig::load()?,
    };
    config.apply_env()?;
    Ok(config)
}

/// Store, rules/tiers, templates and messenger wired into one engine.
fn build_engine(config: &SubflowConfig) -> Result<WorkflowEngine> {
    let store = subflow_store::open(&config.storage, expand_path)?;
    let rules_path = expand_path(&config.paths.rules_file);
    let tiers_path = expand_path(&config.paths.tiers_file);
    let bundle = match store.config_cache() {
        Some(cache) => ConfigBundle::load_cached(cache, &rules_path, &tiers_path)?,
        None => ConfigBundle::load(&rules_path, &tiers_path)?,
    };
    let templates = TemplateStore::new(&expand_path(&config.paths.templates_dir));
    let messenger = subflow_channels::build_messenger(&config.messaging)?;

    let mut engine = WorkflowEngine::new(store, bundle, templates, messenger)
        .with_settings(config.workflow.clone());
    if config.workflow.attach_assets {
        engine = engine.with_assets(subflow_channels::build_asset_provider(
            &config.assets,
            config.messaging.timeout_secs,
            expand_path,
        ));
    }
    Ok(engine)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "subflow=debug,subflow_workflow=debug,subflow_store=debug,subflow_scheduler=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Init => {
            println!("📬 Subflow Setup\n");
            if cli.config.is_none() && !SubflowConfig::default_path().exists() {
                config.save()?;
                println!("✅ Config written: {}", SubflowConfig::default_path().display());
            }
            let engine = build_engine(&config)?;
            println!("✅ Store ready: {}", engine.store().name());
            println!(
                "✅ Rules: {}, tiers: {}",
                engine.config().rules().len(),
                engine.config().tiers().len()
            );
        }
        Command::ProcessEvents { file } => {
            let engine = Arc::new(build_engine(&config)?);
            let router = EventRouter::new(engine).with_dedupe(config.router.dedupe_events);
            let report = router.process_file(&expand_path(&file)).await?;
            print_json(&report)?;
        }
        Command::Onboard {
            name,
            id,
            email,
            days,
            spend,
        } => {
            let mut payload = fields(json!({
                "name": name,
                "days_subscribed": days,
                "total_spend": spend,
            }));
            if let Some(id) = id {
                payload.insert("id".into(), Value::String(id));
            }
            if let Some(email) = email {
                payload.insert("email".into(), Value::String(email));
            }
            let outcome = build_engine(&config)?.onboard(&payload).await?;
            print_json(&outcome)?;
        }
        Command::Retain {
            id,
            name,
            days,
            inactive_days,
            spend,
        } => {
            let payload = fields(json!({
                "id": id,
                "name": name,
                "days_subscribed": days,
                "no_activity_days": inactive_days,
                "total_spend": spend,
            }));
            let outcome = build_engine(&config)?.retain(&payload).await?;
            print_json(&outcome)?;
        }
        Command::Upgrade { id, name, spend } => {
            let mut payload = fields(json!({"id": id, "total_spend": spend}));
            if let Some(name) = name {
                payload.insert("name".into(), Value::String(name));
            }
            let outcome = build_engine(&config)?.upgrade(&payload).await?;
            print_json(&outcome)?;
        }
        Command::Churn => {
            let report = build_engine(&config)?.run_churn().await?;
            print_json(&report)?;
        }
        Command::RetentionScan => {
            let report = build_engine(&config)?.run_retention_scan().await?;
            print_json(&report)?;
        }
        Command::Show { id } => {
            let store = subflow_store::open(&config.storage, expand_path)?;
            match store.get(&id)? {
                Some(subscriber) => print_json(&subscriber)?,
                None => anyhow::bail!("Subscriber {id} not found"),
            }
        }
        Command::Logs { id } => {
            let store = subflow_store::open(&config.storage, expand_path)?;
            print_json(&store.message_log(&id)?)?;
        }
        Command::Schedule => {
            let engine = Arc::new(build_engine(&config)?);
            let scheduler = Arc::new(Mutex::new(BatchScheduler::new(
                &config.schedule,
                chrono::Utc::now(),
            )?));
            let check_interval = config.schedule.check_interval_secs;
            tokio::select! {
                _ = spawn_scheduler(scheduler, engine, check_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("🛑 Scheduler stopped");
                }
            }
        }
    }

    Ok(())
}
