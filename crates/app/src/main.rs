use std::fmt;
use std::path::Path;
use std::sync::Arc;

use coursetime_core::activity::{ActivityPhase, InteractionKind};
use coursetime_core::aggregate::{FormationProgress, ProgressAggregate};
use coursetime_core::model::{Catalog, CatalogDefinition, FormationId, LearnerId, UnitId};
use coursetime_core::resume::ResumeReason;
use services::{
    ActivityService, Clock, ProgressService, SessionClock, StaticIdentity, StudySessionService,
};
use storage::repository::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;

use config::Config;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(raw: String, flag: &'static str) -> Result<T, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn parse_id<T: std::str::FromStr>(raw: String, flag: &'static str) -> Result<T, ArgsError> {
    raw.parse().map_err(|_| ArgsError::InvalidId { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- report --learner <id> --formation <id> [--json] [options]");
    eprintln!("  cargo run -p app -- resume --learner <id> --formation <id> [options]");
    eprintln!("  cargo run -p app -- study  --learner <id> --unit <id> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>          default sqlite://coursetime.sqlite3");
    eprintln!("  --catalog <path>           default catalog.json");
    eprintln!("  --inactivity-secs <secs>   default 900");
    eprintln!("  --warning-secs <secs>      default 30");
    eprintln!();
    eprintln!("While studying, each input line counts as activity:");
    eprintln!("  pos <secs>   report the media position");
    eprintln!("  stay         answer the inactivity warning");
    eprintln!("  status       print the current progress");
    eprintln!("  quit         close the course");
    eprintln!();
    eprintln!("Environment:");
    eprintln!(
        "  {}, {}, {}, {}, {}, {}, {}",
        config::DB_URL_VAR,
        config::CATALOG_VAR,
        config::INACTIVITY_VAR,
        config::WARNING_VAR,
        config::FLUSH_VAR,
        config::DEFAULT_DURATION_VAR,
        config::LOG_VAR
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Report,
    Resume,
    Study,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "report" => Some(Self::Report),
            "resume" => Some(Self::Resume),
            "study" => Some(Self::Study),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Args {
    learner: LearnerId,
    formation: Option<FormationId>,
    unit: Option<UnitId>,
    json: bool,
}

impl Args {
    /// Parses subcommand flags, writing overrides into `config`.
    fn parse(
        args: &mut impl Iterator<Item = String>,
        config: &mut Config,
    ) -> Result<Self, ArgsError> {
        let mut learner = None;
        let mut formation = None;
        let mut unit = None;
        let mut json = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--learner" => {
                    learner = Some(parse_id(require_value(args, "--learner")?, "--learner")?);
                }
                "--formation" => {
                    formation = Some(parse_id(require_value(args, "--formation")?, "--formation")?);
                }
                "--unit" => unit = Some(parse_id(require_value(args, "--unit")?, "--unit")?),
                "--json" => json = true,
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    config.db_url = value;
                }
                "--catalog" => config.catalog_path = require_value(args, "--catalog")?.into(),
                "--inactivity-secs" => {
                    let value = require_value(args, "--inactivity-secs")?;
                    config.inactivity_timeout_secs = parse_number(value, "--inactivity-secs")?;
                }
                "--warning-secs" => {
                    let value = require_value(args, "--warning-secs")?;
                    config.warning_window_secs = parse_number(value, "--warning-secs")?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            learner: learner.ok_or(ArgsError::MissingFlag { flag: "--learner" })?,
            formation,
            unit,
            json,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn load_catalog(
    path: &Path,
    default_duration_secs: u64,
) -> Result<Catalog, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("cannot read catalog {}: {err}", path.display()))?;
    let definition: CatalogDefinition = serde_json::from_str(&raw)?;
    let catalog = Catalog::from_definition(definition, default_duration_secs)?;
    info!(path = %path.display(), formations = catalog.formations().count(), "catalog loaded");
    Ok(catalog)
}

fn init_tracing(config: &Config) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

//
// ─── COMMANDS ──────────────────────────────────────────────────────────────────
//

fn aggregate_line(aggregate: &ProgressAggregate) -> String {
    format!(
        "{:.1}% ({}s of {}s)",
        aggregate.rounded_percent(),
        aggregate.time_spent_secs,
        aggregate.total_duration_secs
    )
}

fn print_report(catalog: &Catalog, report: &FormationProgress) {
    let name = catalog
        .formation(report.formation_id)
        .map_or("?", |formation| formation.name.as_str());
    println!("{name}: {}", aggregate_line(&report.overall));
    match &report.common_core {
        Some(common_core) => println!("  common core: {}", aggregate_line(common_core)),
        None => println!("  common core: none"),
    }
    for module in &report.modules {
        let name = catalog.module(module.module_id).map_or("?", |m| m.name.as_str());
        let marker = if module.common_core { " [common core]" } else { "" };
        println!("  {name}{marker}: {}", aggregate_line(&module.aggregate));
        for chapter in &module.chapters {
            let name = catalog.chapter(chapter.chapter_id).map_or("?", |c| c.name.as_str());
            println!("    {name}: {}", aggregate_line(&chapter.aggregate));
            for sub in &chapter.sub_chapters {
                let name = catalog
                    .sub_chapter(sub.sub_chapter_id)
                    .map_or("?", |s| s.name.as_str());
                println!("      {name}: {}", aggregate_line(&sub.aggregate));
            }
        }
    }
}

fn report_json(report: &FormationProgress) -> serde_json::Value {
    let aggregate = |a: &ProgressAggregate| {
        serde_json::json!({
            "percent_complete": a.rounded_percent(),
            "time_spent_secs": a.time_spent_secs,
            "total_duration_secs": a.total_duration_secs,
        })
    };
    serde_json::json!({
        "formation_id": report.formation_id,
        "overall": aggregate(&report.overall),
        "common_core": report.common_core.as_ref().map(aggregate),
        "modules": report.modules.iter().map(|module| serde_json::json!({
            "module_id": module.module_id,
            "common_core": module.common_core,
            "progress": aggregate(&module.aggregate),
            "chapters": module.chapters.iter().map(|chapter| serde_json::json!({
                "chapter_id": chapter.chapter_id,
                "progress": aggregate(&chapter.aggregate),
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}

enum StudyInput {
    Position(u64),
    StayActive,
    Status,
    Quit,
    Activity,
}

impl StudyInput {
    fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("quit" | "q"), _) => Self::Quit,
            (Some("stay"), _) => Self::StayActive,
            (Some("status"), _) => Self::Status,
            (Some("pos"), Some(value)) => value.parse().map_or(Self::Activity, Self::Position),
            _ => Self::Activity,
        }
    }
}

async fn study(
    config: &Config,
    catalog: Arc<Catalog>,
    storage: &Storage,
    learner: LearnerId,
    unit: UnitId,
) -> Result<(), Box<dyn std::error::Error>> {
    let clock = SessionClock::anchored(&Clock::system());
    let identity = Arc::new(StaticIdentity::new(learner));
    let activity = ActivityService::new(config.activity_settings()?, clock, identity.clone());
    let countdown = activity.spawn_countdown();
    let (events, events_rx) = mpsc::channel(64);
    let interactions = activity.attach(events_rx);

    let title = catalog
        .get_content_unit(unit)
        .map(|u| u.title().to_string())
        .unwrap_or_default();
    let sessions = StudySessionService::new(
        clock,
        config.timer_settings()?,
        catalog,
        Arc::clone(&storage.progress),
        Arc::clone(&storage.last_opened),
        identity.clone(),
    );
    let session = sessions.open(unit, &activity).await?;
    println!(
        "studying {title}: {}s spent, {:.1}%",
        session.progress().time_spent_secs(),
        session.progress().percent_complete()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = activity.subscribe();
    let closed = loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break session.close().await?;
                };
                match StudyInput::parse(&line) {
                    StudyInput::StayActive => {
                        activity.stay_active();
                        continue;
                    }
                    StudyInput::Quit => break session.close().await?,
                    StudyInput::Position(secs) => session.report_position(secs).await?,
                    StudyInput::Status => {
                        let record = session.progress();
                        println!(
                            "{}s spent, {:.1}%",
                            record.time_spent_secs(),
                            record.percent_complete()
                        );
                    }
                    StudyInput::Activity => {}
                }
                // A closed channel only means the forwarder stopped after a logout.
                let _ = events.send(InteractionKind::KeyDown).await;
            }
            Ok(()) = state.changed() => {
                let snapshot = *state.borrow_and_update();
                match snapshot.phase {
                    ActivityPhase::WarningWindow => eprintln!(
                        "inactive: logging out in {}s, press enter to stay",
                        snapshot.time_until_forced_logout_ms.unwrap_or(0).div_ceil(1_000)
                    ),
                    ActivityPhase::Active => eprintln!("welcome back"),
                    ActivityPhase::ForcedLogout => {
                        eprintln!("logged out after inactivity");
                        let closed = session.finished().await?;
                        identity.wait_ended().await;
                        break closed;
                    }
                }
            }
        }
    };

    interactions.dispose();
    countdown.dispose();
    println!(
        "closed: {}s spent, {:.1}%{}",
        closed.record.time_spent_secs(),
        closed.record.percent_complete(),
        if closed.persisted { "" } else { " (not saved)" }
    );
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::from_env()?;
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Err(
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing subcommand").into(),
            );
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(&mut argv, &mut config).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    init_tracing(&config);
    let timer = config.timer_settings()?;
    let catalog = Arc::new(load_catalog(
        &config.catalog_path,
        timer.default_unit_duration_secs(),
    )?);

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    let db_url = normalize_sqlite_url(config.db_url.clone());
    prepare_sqlite_file(&db_url)?;
    let storage = Storage::sqlite(&db_url).await?;

    match cmd {
        Command::Report => {
            let formation = parsed
                .formation
                .ok_or(ArgsError::MissingFlag { flag: "--formation" })?;
            let progress = ProgressService::new(
                Arc::clone(&catalog),
                Arc::clone(&storage.progress),
                Arc::clone(&storage.last_opened),
            );
            let report = progress.formation_report(parsed.learner, formation).await?;
            if parsed.json {
                println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
            } else {
                print_report(&catalog, &report);
            }
            Ok(())
        }
        Command::Resume => {
            let formation = parsed
                .formation
                .ok_or(ArgsError::MissingFlag { flag: "--formation" })?;
            let progress = ProgressService::new(
                Arc::clone(&catalog),
                Arc::clone(&storage.progress),
                Arc::clone(&storage.last_opened),
            );
            match progress.resume_unit(parsed.learner, formation).await? {
                Some(target) => {
                    let reason = match target.reason {
                        ResumeReason::LastOpened => "last opened",
                        ResumeReason::FirstIncomplete => "first incomplete",
                        ResumeReason::Restart => "all complete, restarting",
                    };
                    let spent = target.record.map_or(0, |r| r.time_spent_secs());
                    println!(
                        "{} {} ({reason}, {spent}s spent)",
                        target.unit.id(),
                        target.unit.title()
                    );
                }
                None => println!("formation {formation} has no courses"),
            }
            Ok(())
        }
        Command::Study => {
            let unit = parsed.unit.ok_or(ArgsError::MissingFlag { flag: "--unit" })?;
            study(&config, catalog, &storage, parsed.learner, unit).await
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
