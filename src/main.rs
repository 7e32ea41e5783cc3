use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use daykeeper::config::{default_config_toml, Config, ConfigWatcher, LoadedConfig};
use daykeeper::domain::PlanRowView;
use daykeeper::engine::{Engine, SharedEngine};
use daykeeper::notifications::notify_event;
use daykeeper::persistence::{config_file, ensure_data_dir};
use daykeeper::report::generate_report;
use daykeeper::ticker::{tick_duration, Clock, Driver, SystemClock};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, PoisonError};
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "daykeeper")]
#[command(about = "Recurring reminders with catch-up blocks, adaptive timing and streaks", long_about = None)]
struct Cli {
    /// Data directory. Defaults to a local .daykeeper, then ~/.daykeeper
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Configuration file. Defaults to <data dir>/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, reading commands from stdin
    Run,
    /// Show today's plan
    Plan {
        #[arg(long)]
        json: bool,
    },
    /// Show or manage the backlog
    Backlog {
        #[arg(long)]
        json: bool,
        /// Record today's skipped and missed tasks now
        #[arg(long)]
        flush: bool,
        /// Show backlog statistics
        #[arg(long)]
        stats: bool,
        /// Remove an entry by id
        #[arg(long, value_name = "ID")]
        remove: Option<String>,
    },
    /// Redeem a backlog entry, crediting it to today
    Redeem { id: String },
    /// Show streaks and badges
    Streak {
        #[arg(long)]
        json: bool,
        /// Number of recorded days to list
        #[arg(long, default_value_t = 7)]
        days: usize,
    },
    /// Generate a markdown report for today
    Report {
        /// Output file path. Defaults to <data dir>/report-YYYY-MM-DD.md
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a starter config.toml into the data directory
    Init {
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// Overwrite an existing config.toml
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("daykeeper=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = ensure_data_dir(cli.data_dir.as_deref()).context("Failed to prepare data directory")?;
    let config_path = cli.config.clone().unwrap_or_else(|| config_file(&data_dir));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init { timezone, force } => init(&config_path, &timezone, force),
        Commands::Run => run(&data_dir, &config_path),
        Commands::Plan { json } => {
            let engine = open_engine(&data_dir, &config_path)?;
            let snapshot = engine.snapshot(Utc::now());
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{} ({})", snapshot.date, snapshot.timezone);
                for row in &snapshot.plan {
                    println!("  {}", row);
                }
                for block in &snapshot.catch_up {
                    println!("catch-up {} ({} items)", block.segment, block.items.len());
                }
            }
            Ok(())
        }
        Commands::Backlog {
            json,
            flush,
            stats,
            remove,
        } => {
            let mut engine = open_engine(&data_dir, &config_path)?;
            let now = Utc::now();
            if flush {
                let added = engine.flush_backlog(now);
                println!("Recorded {} entries", added.len());
            }
            if let Some(id) = remove {
                let entry = engine
                    .remove_backlog_entry(&id, now)
                    .with_context(|| format!("Failed to remove backlog entry {}", id))?;
                println!("Removed {}", entry.title);
            }
            if stats {
                let stats = engine.backlog_stats(now);
                if json {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                } else {
                    println!(
                        "{} entries, {} open, {} redeemed ({:.1}%)",
                        stats.total, stats.open, stats.redeemed, stats.redemption_rate
                    );
                }
                return Ok(());
            }
            let entries = engine.backlog(now);
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    let mark = if entry.redeemed { "[+]" } else { "[ ]" };
                    println!(
                        "{} p{} {} ({}, {}) {}",
                        mark,
                        entry.priority.level(),
                        entry.title,
                        entry.reason,
                        entry.original_date,
                        entry.id
                    );
                }
            }
            Ok(())
        }
        Commands::Redeem { id } => {
            let mut engine = open_engine(&data_dir, &config_path)?;
            let entry = engine
                .redeem(&id, Utc::now())
                .with_context(|| format!("Failed to redeem {}", id))?;
            println!("Redeemed {}", entry.title);
            Ok(())
        }
        Commands::Streak { json, days } => {
            let engine = open_engine(&data_dir, &config_path)?;
            let summary = engine.streak_summary();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Current streak: {} days, longest: {} days",
                    summary.current_streak, summary.longest_streak
                );
                for badge in &summary.badges {
                    println!("  badge {} earned {}", badge.id, badge.earned_on);
                }
                for record in engine.streak_history(days) {
                    println!(
                        "  {} {:.0}% ({}/{})",
                        record.date,
                        record.completion_ratio * 100.0,
                        record.completed + record.redeemed,
                        record.total
                    );
                }
            }
            Ok(())
        }
        Commands::Report { output } => {
            let mut engine = open_engine(&data_dir, &config_path)?;
            let path = generate_report(&mut engine, Utc::now(), &data_dir, output)
                .context("Failed to write report")?;
            println!("Report generated: {}", path.display());
            Ok(())
        }
    }
}

fn load_config(config_path: &Path) -> Result<LoadedConfig> {
    Config::load(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))
}

/// Open the engine and bring it up to date with the current time
fn open_engine(data_dir: &Path, config_path: &Path) -> Result<Engine> {
    let loaded = load_config(config_path)?;
    let now = Utc::now();
    let mut engine = Engine::open(loaded, data_dir, now).context("Failed to open day state")?;
    engine.tick(now);
    for event in engine.drain_events() {
        info!("{}", event);
    }
    Ok(engine)
}

fn init(config_path: &Path, timezone: &str, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    let content = default_config_toml(timezone)?;
    daykeeper::persistence::atomic_write(config_path, &content)?;
    println!("Wrote {}", config_path.display());
    println!("Run 'daykeeper run' to start the scheduler.");
    Ok(())
}

fn run(data_dir: &Path, config_path: &Path) -> Result<()> {
    let engine = open_engine(data_dir, config_path)?.into_shared();
    let interval = tick_duration(lock(&engine).settings().tick_ms);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (tx, rx) = mpsc::channel();
    let watcher = ConfigWatcher::new(config_path);
    let driver = Driver::spawn(Arc::clone(&engine), Arc::clone(&clock), interval, tx, Some(watcher));
    let printer = thread::spawn(move || {
        for event in rx {
            println!("{}", event);
            notify_event(&event);
        }
    });

    info!(data_dir = %data_dir.display(), "scheduler running");
    print_help();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            continue;
        };
        if command == "quit" || command == "q" {
            break;
        }
        if let Err(e) = handle_command(&engine, clock.now(), command, args, config_path) {
            eprintln!("Error: {:#}", e);
        }
        io::stdout().flush()?;
    }

    driver.stop();
    if printer.join().is_err() {
        warn!("event printer panicked");
    }
    Ok(())
}

fn lock(engine: &SharedEngine) -> std::sync::MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn handle_command(
    engine: &SharedEngine,
    now: chrono::DateTime<Utc>,
    command: &str,
    args: &[&str],
    config_path: &Path,
) -> Result<()> {
    // Loading the config happens outside the lock
    let reloaded = if command == "reload" {
        Some(load_config(config_path)?)
    } else {
        None
    };

    let mut engine = lock(engine);
    match command {
        "complete" | "c" => {
            let id = target_id(&engine, args)?;
            engine.complete(&id, now)?;
        }
        "skip" | "s" => {
            let id = target_id(&engine, args)?;
            engine.skip(&id, now)?;
        }
        "pause" | "p" => engine.pause(now)?,
        "resume" | "r" => engine.resume(now)?,
        "complete-all" => {
            let count = engine.complete_all(first_arg(args, "block id")?, now)?;
            println!("Completed {} tasks", count);
        }
        "skip-all" => {
            let count = engine.skip_all(first_arg(args, "block id")?, now)?;
            println!("Skipped {} tasks", count);
        }
        "redeem" => {
            let entry = engine.redeem(first_arg(args, "backlog entry id")?, now)?;
            println!("Redeemed {}", entry.title);
        }
        "reload" => {
            if let Some(loaded) = reloaded {
                engine.reload_configuration(loaded, now);
            }
        }
        "plan" => {
            for instance in engine.plan() {
                println!("  {}", PlanRowView::from(instance));
            }
        }
        "status" => match engine.active() {
            Some(view) => println!(
                "{} {} (snooze {}m) {}",
                view.title,
                view.remaining,
                view.snooze_secs / 60,
                if view.paused { "(paused)" } else { "" }
            ),
            None => println!("Nothing active"),
        },
        "blocks" => {
            for block in engine.catch_up_blocks() {
                println!("{} ({} items)", block.block_id, block.items.len());
                for item in &block.items {
                    println!("  {} {} {}", item.time.format("%H:%M"), item.title, item.instance_id);
                }
            }
        }
        "help" | "?" => print_help(),
        other => bail!("unknown command '{}'", other),
    }
    Ok(())
}

/// Explicit instance id, else the active one
fn target_id(engine: &Engine, args: &[&str]) -> Result<String> {
    match args.first() {
        Some(id) => Ok((*id).to_string()),
        None => engine
            .active()
            .map(|view| view.instance_id)
            .ok_or_else(|| anyhow!("nothing is active; give an instance id")),
    }
}

fn first_arg<'a>(args: &[&'a str], name: &str) -> Result<&'a str> {
    args.first()
        .copied()
        .ok_or_else(|| anyhow!("missing {}", name))
}

fn print_help() {
    println!("Commands: complete [ID], skip [ID], pause, resume, complete-all BLOCK, skip-all BLOCK,");
    println!("          redeem ID, reload, plan, status, blocks, help, quit");
}
