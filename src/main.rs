mod cli;

use tandem::{batch, config};
use tandem_exec::{Results, Scheduler};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tandem=trace,tandem_exec=trace,tandem_core=debug".to_string()
        } else {
            "tandem=info,tandem_exec=warn,tandem_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            series,
            tasks,
            pushes,
            cancel_after,
            batch,
            events,
            json,
        } => {
            let mut plan = match batch {
                Some(path) => batch::load_batch(&path)?,
                None => batch::Batch::default(),
            };
            if series {
                plan.mode = tandem_exec::Mode::Series.to_string();
            }
            plan.tasks.extend(tasks);
            plan.push.extend(pushes);

            let options = RunOptions {
                cancel_after: cancel_after.map(Duration::from_millis),
                events,
                json,
            };
            run(&plan, cli.config.as_deref(), &options)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path: Option<PathBuf> = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("tandem {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

struct RunOptions {
    cancel_after: Option<Duration>,
    events: bool,
    json: bool,
}

fn run(plan: &batch::Batch, config_path: Option<&Path>, options: &RunOptions) -> Result<()> {
    if plan.tasks.is_empty() {
        anyhow::bail!("No tasks given; use --task or --batch");
    }

    let config = config::load_config_or_default(config_path)?;
    let scheduler = Scheduler::new(&config.scheduler)?;
    let mut events = scheduler.subscribe();

    tracing::info!(
        "Running {} task(s) in {} (+{} pushed)",
        plan.tasks.len(),
        plan.mode,
        plan.push.len()
    );
    let outcome = batch::run_batch(&scheduler, plan, options.cancel_after)?;

    if options.events {
        loop {
            match events.try_recv() {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} events (event buffer full)", skipped);
                }
                Err(_) => break,
            }
        }
    }

    match (&outcome, options.json) {
        (Some(results), true) => {
            let (values, failures) = sorted(results);
            let doc = serde_json::json!({
                "status": "delivered",
                "values": values,
                "failures": failures,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        (None, true) => {
            println!("{}", serde_json::json!({ "status": "cancelled" }));
        }
        (Some(results), false) => {
            let (values, failures) = sorted(results);
            println!(
                "Pool delivered: {} value(s), {} failure(s)",
                values.len(),
                failures.len()
            );
            for (id, value) in &values {
                println!("  {} = {}", id, value);
            }
            for (id, message) in &failures {
                println!("  {} failed: {}", id, message);
            }
        }
        (None, false) => println!("Pool cancelled; no results delivered"),
    }

    scheduler.shutdown();
    Ok(())
}

fn sorted(results: &Results<String>) -> (BTreeMap<&str, &str>, BTreeMap<&str, &str>) {
    let values = results
        .iter()
        .map(|(id, value)| (id, value.as_str()))
        .collect();
    let failures = results
        .failed_ids()
        .into_iter()
        .filter_map(|id| results.failure(id).map(|message| (id, message)))
        .collect();
    (values, failures)
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::AppConfig::default()
        }
    };

    let scheduler = &config.scheduler;
    let warnings = scheduler.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration loaded with {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }
    println!(
        "  Workers: {} thread(s) named {:?}",
        scheduler.workers.effective_max_threads(),
        scheduler.workers.thread_name
    );
    println!("  Home thread: {:?}", scheduler.home.thread_name);
    println!(
        "  Events: capacity {}, recent {}",
        scheduler.events.capacity, scheduler.events.recent
    );

    Ok(())
}
