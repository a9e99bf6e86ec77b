use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

use evenemang_scraper::ai::GeminiExtractor;
use evenemang_scraper::browser::ChromeDriver;
use evenemang_scraper::config::RuntimeConfig;
use evenemang_scraper::db::Database;
use evenemang_scraper::error::{Result, ScraperError};
use evenemang_scraper::logging;
use evenemang_scraper::orchestrator::Orchestrator;
use evenemang_scraper::store::{
    DateMode, EventQuery, EventStore, RunLogStore, SelectorStore, Settings, SourceUrls,
};
use evenemang_scraper::types::{RunMode, RunStatus, SelectorBundle, TargetGroup};

#[derive(Parser)]
#[command(name = "evenemang_scraper")]
#[command(about = "Stockholm cultural venue event scraper")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full scrape over all enabled source URLs (the default)
    Run {
        /// Run mode recorded in the scraping log: auto (cron) or manual
        #[arg(long, default_value = "manual")]
        mode: String,
    },
    /// Event catalog queries and deletes
    Events {
        #[command(subcommand)]
        cmd: EventsCmd,
    },
    /// Selector bundle administration
    Selectors {
        #[command(subcommand)]
        cmd: SelectorsCmd,
    },
    /// Source URL administration
    Urls {
        #[command(subcommand)]
        cmd: UrlsCmd,
    },
    /// Scraping log administration
    Logs {
        #[command(subcommand)]
        cmd: LogsCmd,
    },
    /// Delete events older than the retention window
    Sweep {
        /// Override the retention window in days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Dashboard summary: totals, upcoming counts, venue and audience breakdowns
    Stats,
}

#[derive(Subcommand)]
enum EventsCmd {
    /// List events with the admin filter options
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        venue: Option<String>,
        #[arg(long)]
        source: Option<String>,
        /// "All Time", "This Week", "Next 30 Days", or a YYYY-MM-DD date
        #[arg(long, default_value = "All Time")]
        date_mode: String,
        /// Repeatable target group filter (children, teens, ...)
        #[arg(long)]
        target_group: Vec<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        per_page: usize,
    },
    /// Delete one event by its identity triple
    Delete {
        #[arg(long)]
        name: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        url: String,
    },
}

#[derive(Subcommand)]
enum SelectorsCmd {
    List,
    /// Store a bundle for a URL; JSON in the admin wire form
    Put {
        #[arg(long)]
        url: String,
        #[arg(long)]
        json: String,
    },
    Delete {
        #[arg(long)]
        url: String,
    },
}

#[derive(Subcommand)]
enum UrlsCmd {
    List,
    Add {
        #[arg(long)]
        url: String,
        #[arg(long)]
        name: String,
    },
    Enable {
        #[arg(long)]
        id: i64,
    },
    Disable {
        #[arg(long)]
        id: i64,
    },
    Remove {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum LogsCmd {
    List {
        #[arg(long, default_value_t = 30)]
        days: i64,
        /// Optional status filter: OK, Warn or Error
        #[arg(long)]
        status: Option<String>,
    },
    Clear {
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
}

fn parse_date_mode(s: &str) -> Result<DateMode> {
    match s {
        "All Time" | "all" => Ok(DateMode::AllTime),
        "This Week" | "week" => Ok(DateMode::ThisWeek),
        "Next 30 Days" | "month" => Ok(DateMode::Next30Days),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
            .map(DateMode::On)
            .map_err(|_| {
                ScraperError::Config(format!(
                    "unrecognized date mode '{other}' (expected a range name or YYYY-MM-DD)"
                ))
            }),
    }
}

async fn run_scrape(config: RuntimeConfig, db: Database, mode: RunMode) -> Result<RunStatus> {
    // Setup failures are fatal and happen before any worker spawns.
    let api_key = config.ai_api_key.clone().ok_or_else(|| {
        ScraperError::Config("AI_API_KEY is not set (required for selector discovery)".into())
    })?;
    let ai = Arc::new(GeminiExtractor::new(api_key, config.ai_model_hint.clone()));
    let driver = Arc::new(ChromeDriver::launch()?);

    let orchestrator = Orchestrator::new(db, config, driver, ai);
    let summary = orchestrator.run(mode).await?;

    for warning in &summary.warnings {
        println!("⚠️  {warning}");
    }
    // The admin surface parses this exact line from stdout.
    println!(
        "Scraping complete: {} events, {} failures",
        summary.events_found, summary.failures
    );
    Ok(summary.status)
}

async fn dispatch(cli: Cli, config: RuntimeConfig, db: Database) -> Result<RunStatus> {
    let command = cli.command.unwrap_or(Commands::Run {
        mode: "manual".to_string(),
    });

    match command {
        Commands::Run { mode } => {
            let mode = match mode.to_lowercase().as_str() {
                "auto" => RunMode::Auto,
                "manual" => RunMode::Manual,
                other => {
                    return Err(ScraperError::Config(format!("unknown run mode '{other}'")))
                }
            };
            println!("🚀 Starting scrape run ({})...", mode.as_str());
            return run_scrape(config, db, mode).await;
        }
        Commands::Events { cmd } => match cmd {
            EventsCmd::List {
                search,
                venue,
                source,
                date_mode,
                target_group,
                page,
                per_page,
            } => {
                let mut groups = Vec::new();
                for name in target_group {
                    groups.push(TargetGroup::parse(&name).ok_or_else(|| {
                        ScraperError::Config(format!("unknown target group '{name}'"))
                    })?);
                }
                let query = EventQuery {
                    search,
                    venue,
                    source,
                    date_mode: parse_date_mode(&date_mode)?,
                    target_groups: groups,
                    page,
                    per_page,
                };
                let store = EventStore::new(db);
                let (events, total) = store.filter(&query, Local::now().date_naive())?;
                println!("📋 {total} events (showing page {page}):");
                for event in events {
                    println!(
                        "   {} | {} | {} | {} | {} | {}",
                        event.date_iso,
                        event.time,
                        event.event_name,
                        event.location,
                        event.target_group,
                        event.status
                    );
                }
            }
            EventsCmd::Delete { name, date, url } => {
                let deleted = EventStore::new(db).delete(&name, date, &url)?;
                println!("{}", if deleted { "✅ Deleted" } else { "Nothing matched" });
            }
        },
        Commands::Selectors { cmd } => {
            let store = SelectorStore::new(db);
            match cmd {
                SelectorsCmd::List => {
                    for config in store.list_all()? {
                        println!(
                            "{}{} (updated {})",
                            config.domain, config.url_pattern, config.last_updated
                        );
                        println!("   container: {}", config.bundle.container);
                        for (field, item) in &config.bundle.items {
                            println!("   {field}: {}", serde_json::to_string(item)?);
                        }
                    }
                }
                SelectorsCmd::Put { url, json } => {
                    let bundle: SelectorBundle = serde_json::from_str(&json)?;
                    store.put(&url, &bundle)?;
                    println!("✅ Saved selectors for {url}");
                }
                SelectorsCmd::Delete { url } => {
                    let deleted = store.delete(&url)?;
                    println!("{}", if deleted { "✅ Deleted" } else { "Nothing matched" });
                }
            }
        }
        Commands::Urls { cmd } => {
            let store = SourceUrls::new(db);
            match cmd {
                UrlsCmd::List => {
                    for source in store.list()? {
                        println!(
                            "{:>3} [{}] {} ({})",
                            source.id,
                            if source.enabled { "on " } else { "off" },
                            source.name,
                            source.url
                        );
                    }
                }
                UrlsCmd::Add { url, name } => {
                    if store.add(&url, &name)? {
                        println!("✅ Added {name}");
                    } else {
                        println!("⚠️  URL already configured");
                    }
                }
                UrlsCmd::Enable { id } => {
                    store.set_enabled(id, true)?;
                    println!("✅ Enabled {id}");
                }
                UrlsCmd::Disable { id } => {
                    store.set_enabled(id, false)?;
                    println!("✅ Disabled {id}");
                }
                UrlsCmd::Remove { id } => {
                    store.remove(id)?;
                    println!("✅ Removed {id}");
                }
            }
        }
        Commands::Logs { cmd } => {
            let store = RunLogStore::new(db);
            match cmd {
                LogsCmd::List { days, status } => {
                    for log in store.list(days, status.as_deref())? {
                        println!(
                            "{} [{}] {} — {} events, {} failures",
                            log.timestamp, log.status, log.mode, log.events_found, log.failures
                        );
                        for warning in &log.warnings {
                            println!("     ⚠️  {warning}");
                        }
                    }
                }
                LogsCmd::Clear { days } => {
                    let deleted = store.clear_older_than(days)?;
                    println!("✅ Cleared {deleted} log entries");
                }
            }
        }
        Commands::Sweep { days } => {
            let settings = Settings::new(db.clone());
            let days = match days {
                Some(days) => days,
                None => settings.get_i64("auto_delete_days", config.retention_days)?,
            };
            let deleted = EventStore::new(db).delete_older_than(days, Local::now().date_naive())?;
            println!("✅ Removed {deleted} events older than {days} days");
        }
        Commands::Stats => {
            let store = EventStore::new(db);
            let today = Local::now().date_naive();
            println!("📊 {} events in catalog", store.count_all()?);
            println!(
                "   {} this week, {} in the next 30 days",
                store.count_between(today, today + Duration::days(7))?,
                store.count_between(today, today + Duration::days(30))?
            );
            println!("   {} venues", store.distinct_venues()?.len());
            println!("Events by venue:");
            for (venue, count) in store.counts_by_venue()? {
                println!("   {venue}: {count}");
            }
            println!("Events by target group:");
            for (group, count) in store.counts_by_target_group()? {
                println!("   {group}: {count}");
            }
        }
    }
    Ok(RunStatus::Ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config = match RuntimeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            eprintln!("❌ Configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let db = match Database::open(&config.db_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Could not open catalog: {e}");
            eprintln!("❌ Could not open catalog at {}: {e}", config.db_path);
            return ExitCode::from(2);
        }
    };

    match dispatch(cli, config, db).await {
        Ok(RunStatus::Error) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {e}");
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}
