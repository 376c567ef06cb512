use std::env;
use std::process;
use std::time::Duration;

use colony_api::{open_store, AdmissionRequest, ColonyPaths, Engine, EngineError};
use contracts::{ApiError, ErrorCode, TaskDefinition};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

fn print_usage() {
    println!("colony-cli <command>");
    println!("commands:");
    println!("  status");
    println!("  catalog");
    println!("  available");
    println!("  assign <task> <placement> [ticks]");
    println!("  tick [n]");
    println!("  clear-alerts");
    println!("  drain-alerts");
    println!("  run [secs]");
    println!("    runs the tick scheduler for secs, or until ctrl-c");
    println!("environment:");
    println!("  COLONY_CONFIG      TOML engine config (defaults when unset)");
    println!("  COLONY_STORE_PATH  world store, default colony_world.sqlite; *.json for a JSON document");
    println!("  RUST_LOG           log filter, default info");
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_u64(value: Option<&String>, label: &str) -> Result<u64, String> {
    let raw = value.ok_or_else(|| format!("missing {label}"))?;
    raw.parse::<u64>()
        .map_err(|_| format!("invalid {label}: {raw}"))
}

fn parse_optional_u64(value: Option<&String>, label: &str) -> Result<Option<u64>, String> {
    value.map(|_| parse_u64(value, label)).transpose()
}

fn fail(error: ApiError) -> ! {
    match serde_json::to_string_pretty(&error) {
        Ok(payload) => eprintln!("{payload}"),
        Err(_) => eprintln!("error: {error}"),
    }
    process::exit(1);
}

fn fail_usage(message: &str) -> ! {
    eprintln!("error: {message}");
    print_usage();
    process::exit(2);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(payload) => println!("{payload}"),
        Err(err) => fail(ApiError::new(
            ErrorCode::InternalError,
            "failed to encode output",
            Some(err.to_string()),
        )),
    }
}

fn print_definitions(definitions: &[TaskDefinition]) {
    for definition in definitions {
        let costs = definition
            .costs
            .iter()
            .map(|(name, amount)| format!("{name}={amount}"))
            .collect::<Vec<_>>()
            .join(",");
        let rewards = definition
            .rewards
            .iter()
            .map(|(name, amount)| format!("{name}={amount}"))
            .collect::<Vec<_>>()
            .join(",");
        let requires = if definition.prerequisites.is_empty() {
            String::from("-")
        } else {
            definition.prerequisites.join(",")
        };
        println!(
            "{} ticks={} costs=[{}] rewards=[{}] requires={}",
            definition.name, definition.duration_ticks, costs, rewards, requires
        );
    }
}

async fn open_engine() -> Result<Engine, ApiError> {
    let paths = ColonyPaths::from_env();
    let config = paths.load_config().map_err(|err| {
        ApiError::new(ErrorCode::InvalidConfig, "engine config is invalid", Some(err.to_string()))
    })?;

    let busy_timeout = Duration::from_millis(config.persistence_timeout_ms);
    let store = open_store(&paths.store_path, busy_timeout)
        .map_err(|err| EngineError::from(err).to_api_error())?;
    info!(store = %paths.store_path.display(), "opening colony world");

    Engine::open(config, store)
        .await
        .map_err(|err| err.to_api_error())
}

async fn run_scheduler(engine: &Engine, secs: Option<u64>) {
    engine.start_scheduler().await;
    match secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "failed to wait for ctrl-c; stopping now");
            }
        }
    }
    engine.stop_scheduler().await;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Status,
    Catalog,
    Available,
    Assign {
        task: String,
        placement: String,
        ticks: Option<u64>,
    },
    Tick {
        count: u64,
    },
    ClearAlerts,
    DrainAlerts,
    Run {
        secs: Option<u64>,
    },
}

/// Parses the whole command line before anything touches the store.
fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.get(1) else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "help" => Ok(Command::Help),
        "status" => Ok(Command::Status),
        "catalog" => Ok(Command::Catalog),
        "available" => Ok(Command::Available),
        "assign" => {
            let (Some(task), Some(placement)) = (args.get(2), args.get(3)) else {
                return Err("assign needs <task> <placement>".to_string());
            };
            Ok(Command::Assign {
                task: task.clone(),
                placement: placement.clone(),
                ticks: parse_optional_u64(args.get(4), "ticks")?,
            })
        }
        "tick" => Ok(Command::Tick {
            count: parse_optional_u64(args.get(2), "n")?.unwrap_or(1),
        }),
        "clear-alerts" => Ok(Command::ClearAlerts),
        "drain-alerts" => Ok(Command::DrainAlerts),
        "run" => Ok(Command::Run {
            secs: parse_optional_u64(args.get(2), "secs")?,
        }),
        other => Err(format!("unknown command: {other}")),
    }
}

/// Gives a timed-out save the chance to be reconciled before the process
/// exits, then reports `error`.
async fn fail_after_settling(engine: &Engine, error: EngineError) {
    if let Err(err) = engine.settle().await {
        warn!(%err, "store may still hold a save that was rolled back");
    }
    fail(error.to_api_error())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let command = parse_command(&args).unwrap_or_else(|err| fail_usage(&err));
    if command == Command::Help {
        print_usage();
        return;
    }

    let engine = match open_engine().await {
        Ok(engine) => engine,
        Err(err) => fail(err),
    };

    match command {
        Command::Help => print_usage(),
        Command::Status => {
            print_json(&engine.query_state().await);
        }
        Command::Catalog => {
            print_definitions(&engine.catalog().await);
        }
        Command::Available => {
            print_definitions(&engine.available_tasks().await);
        }
        Command::Assign {
            task,
            placement,
            ticks,
        } => {
            let mut request = AdmissionRequest::new(task.as_str(), placement.as_str());
            request.duration_override = ticks;
            match engine.assign_task(request).await {
                Ok(instance_id) => println!("assigned instance_id={instance_id} task={task}"),
                Err(err) => fail_after_settling(&engine, err).await,
            }
        }
        Command::Tick { count } => {
            for _ in 0..count {
                match engine.tick_once().await {
                    Ok(report) => {
                        println!(
                            "tick={} completed={} failed={} alerts={}",
                            report.tick,
                            report.completed.len(),
                            report.failed.len(),
                            report.raised_alerts.join(" | ")
                        );
                    }
                    Err(err) => fail_after_settling(&engine, err).await,
                }
            }
        }
        Command::ClearAlerts => {
            if let Err(err) = engine.clear_alerts().await {
                fail_after_settling(&engine, err).await;
            }
            println!("alerts cleared");
        }
        Command::DrainAlerts => match engine.drain_alerts().await {
            Ok(alerts) => print_json(&alerts),
            Err(err) => fail_after_settling(&engine, err).await,
        },
        Command::Run { secs } => {
            run_scheduler(&engine, secs).await;
            if let Err(err) = engine.settle().await {
                warn!(%err, "store may still hold a save that was rolled back");
            }
            println!("{}", engine.query_state().await);
            if let Some(error) = engine.last_persistence_error().await {
                eprintln!("last persistence error: {error}");
            }
        }
    }
}
