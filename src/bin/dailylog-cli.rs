//! dailylog CLI - local data layer front end
//!
//! Usage:
//!   dailylog-cli add --person <name> --type <name> --date <YYYY-MM-DD> --start <HH:MM> --end <HH:MM> [--details <text>]
//!   dailylog-cli list [--person <name>]
//!   dailylog-cli person list|add|rename|delete ...
//!   dailylog-cli type list|add|rename|delete ...
//!   dailylog-cli export [--output <path>]
//!   dailylog-cli import <path> [--password <pw>]
//!   dailylog-cli password set <pw> | password clear
//!   dailylog-cli cleanup
//!   dailylog-cli delete-date <YYYY-MM-DD>

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use dailylog_lib::db::{ActivityRecord, StoreError, LOCAL_USER};
use dailylog_lib::mirror::{Mirror, KEY_ACTIVITIES};
use dailylog_lib::{backup, registry, validation, AppContext, MIRROR_DIR};

#[derive(Debug)]
enum Command {
    Add {
        person: String,
        activity: String,
        date: String,
        start: String,
        end: String,
        details: String,
    },
    List {
        person: Option<String>,
    },
    Person(EntityCommand),
    Type(EntityCommand),
    Export {
        output: Option<PathBuf>,
    },
    Import {
        path: PathBuf,
        password: Option<String>,
    },
    PasswordSet {
        password: String,
    },
    PasswordClear,
    Cleanup,
    DeleteDate {
        date: String,
    },
    Help,
    Version,
}

#[derive(Debug)]
enum EntityCommand {
    List,
    Add { name: String },
    Rename { from: String, to: String },
    Delete { name: String, yes: bool },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    match parse_args(&args) {
        Ok(cmd) => match run_command(cmd) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");
            print_help();
            ExitCode::FAILURE
        }
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_entity(args: &[String]) -> Result<EntityCommand, String> {
    match args.first().map(String::as_str) {
        Some("list") | None => Ok(EntityCommand::List),
        Some("add") => {
            let name = args.get(1).cloned().ok_or("missing name")?;
            Ok(EntityCommand::Add { name })
        }
        Some("rename") => {
            let from = args.get(1).cloned().ok_or("missing current name")?;
            let to = args.get(2).cloned().ok_or("missing new name")?;
            Ok(EntityCommand::Rename { from, to })
        }
        Some("delete") => {
            let name = args.get(1).cloned().ok_or("missing name")?;
            let yes = args.iter().any(|a| a == "--yes" || a == "-y");
            Ok(EntityCommand::Delete { name, yes })
        }
        Some(other) => Err(format!("unknown subcommand: {other}")),
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "version" | "--version" | "-V" => Ok(Command::Version),

        "add" => {
            let rest = &args[2..];
            Ok(Command::Add {
                person: flag_value(rest, "--person").ok_or("missing --person")?,
                activity: flag_value(rest, "--type").ok_or("missing --type")?,
                date: flag_value(rest, "--date").ok_or("missing --date")?,
                start: flag_value(rest, "--start").ok_or("missing --start")?,
                end: flag_value(rest, "--end").ok_or("missing --end")?,
                details: flag_value(rest, "--details").unwrap_or_default(),
            })
        }

        "list" => Ok(Command::List {
            person: flag_value(&args[2..], "--person"),
        }),

        "person" => parse_entity(&args[2..]).map(Command::Person),
        "type" => parse_entity(&args[2..]).map(Command::Type),

        "export" => Ok(Command::Export {
            output: flag_value(&args[2..], "--output")
                .or_else(|| flag_value(&args[2..], "-o"))
                .map(PathBuf::from),
        }),

        "import" => {
            let path = args
                .get(2)
                .filter(|a| !a.starts_with('-'))
                .cloned()
                .ok_or("missing backup file path")?;
            Ok(Command::Import {
                path: PathBuf::from(path),
                password: flag_value(&args[3..], "--password"),
            })
        }

        "password" => match args.get(2).map(String::as_str) {
            Some("set") => {
                let password = args.get(3).cloned().ok_or("missing password")?;
                Ok(Command::PasswordSet { password })
            }
            Some("clear") => Ok(Command::PasswordClear),
            _ => Err("expected 'password set <pw>' or 'password clear'".into()),
        },

        "cleanup" => Ok(Command::Cleanup),

        "delete-date" => {
            let date = args.get(2).cloned().ok_or("missing date")?;
            Ok(Command::DeleteDate { date })
        }

        other => Err(format!("unknown command: {other}")),
    }
}

fn data_dir() -> PathBuf {
    if let Ok(dir) = env::var("DAILYLOG_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dailylog")
}

fn run_command(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("dailylog-cli {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(run_async(cmd))
}

async fn open_context() -> anyhow::Result<AppContext> {
    let dir = data_dir();
    let ctx = AppContext::open(&dir)
        .with_context(|| format!("failed to open store in {}", dir.display()))?;
    ctx.initialize().await?;
    Ok(ctx)
}

async fn run_async(cmd: Command) -> anyhow::Result<()> {
    // `list` degrades to the mirror snapshot when the store will not open.
    if let Command::List { person } = &cmd {
        match open_context().await {
            Ok(ctx) => return list_activities(&ctx, person.as_deref()).await,
            Err(e) if is_open_error(&e) => {
                eprintln!("Warning: store unavailable ({e:#}); showing last known snapshot");
                let mirror = Mirror::new(&data_dir().join(MIRROR_DIR));
                let activities: Vec<ActivityRecord> = mirror.read(KEY_ACTIVITIES);
                print_activities(filter_by_person(activities, person.as_deref()));
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }

    let ctx = open_context().await?;

    match cmd {
        Command::Add {
            person,
            activity,
            date,
            start,
            end,
            details,
        } => {
            validation::validate_date(&date)?;
            validation::validate_time_of_day(&start)?;
            validation::validate_time_of_day(&end)?;

            let now = chrono::Utc::now().to_rfc3339();
            let record = ActivityRecord {
                id: String::new(),
                person,
                activity_name: activity,
                date,
                start_time: start,
                end_time: end,
                details,
                created_at: now.clone(),
                created_by: LOCAL_USER.into(),
                updated_at: now,
                updated_by: LOCAL_USER.into(),
            };
            let id = ctx.store.run(move |db| db.add_activity(&record)).await?;
            let activities = ctx.store.run(|db| db.list_activities()).await?;
            ctx.mirror.write(KEY_ACTIVITIES, &activities);
            println!("Added activity {id}");
        }

        Command::Person(sub) => run_entity(&ctx, sub, true).await?,
        Command::Type(sub) => run_entity(&ctx, sub, false).await?,

        Command::Export { output } => {
            let json = backup::export(&ctx).await?;
            let path = output.unwrap_or_else(|| {
                let stamp = chrono::Local::now().format("%Y%m%d_%H%M");
                PathBuf::from(format!("dailylog_backup_{stamp}.json"))
            });
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported backup to {}", path.display());
        }

        Command::Import { path, password } => {
            let input = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let summary = backup::restore(&ctx, &input, password.as_deref()).await?;
            println!(
                "Merged {} new activities, {} persons, {} activity types",
                summary.new_activities, summary.persons_added, summary.activity_types_added
            );
        }

        Command::PasswordSet { password } => {
            registry::set_backup_password(&ctx, Some(&password)).await?;
            println!("Backup password set");
        }

        Command::PasswordClear => {
            registry::set_backup_password(&ctx, None).await?;
            println!("Backup password cleared");
        }

        Command::Cleanup => {
            let removed = ctx
                .store
                .run(|db| db.cleanup_duplicate_activities())
                .await?;
            println!("Removed {removed} duplicate records");
        }

        Command::DeleteDate { date } => {
            validation::validate_date(&date)?;
            let date_for_store = date.clone();
            let removed = ctx
                .store
                .run(move |db| db.delete_activities_by_date(&date_for_store))
                .await?;
            println!("Removed {removed} records dated {date}");
        }

        Command::List { .. } | Command::Help | Command::Version => unreachable!(),
    }

    Ok(())
}

async fn run_entity(ctx: &AppContext, cmd: EntityCommand, is_person: bool) -> anyhow::Result<()> {
    match cmd {
        EntityCommand::List => {
            let config = ctx.store.run(|db| db.load_config()).await?;
            let names: Vec<String> = if is_person {
                config.persons.into_iter().map(|p| p.name).collect()
            } else {
                config.activity_types.into_iter().map(|t| t.name).collect()
            };
            for name in names {
                println!("{name}");
            }
        }

        EntityCommand::Add { name } => {
            if is_person {
                registry::add_or_rename_person(ctx, &name, None).await?;
            } else {
                registry::add_or_rename_activity_type(ctx, &name, None).await?;
            }
            println!("Added '{name}'");
        }

        EntityCommand::Rename { from, to } => {
            let outcome = if is_person {
                registry::add_or_rename_person(ctx, &to, Some(&from)).await?
            } else {
                registry::add_or_rename_activity_type(ctx, &to, Some(&from)).await?
            };
            println!(
                "Renamed '{from}' to '{to}'; {} records updated",
                outcome.affected
            );
            for failure in &outcome.failures {
                eprintln!("  failed to update {}: {}", failure.id, failure.message);
            }
        }

        EntityCommand::Delete { name, yes } => {
            let count = if is_person {
                registry::activity_count_by_person(ctx, &name).await?
            } else {
                registry::activity_count_by_type(ctx, &name).await?
            };

            if !yes {
                bail!(
                    "deleting '{name}' would also delete {count} activity records; \
                     re-run with --yes to confirm"
                );
            }

            let outcome = if is_person {
                registry::delete_person(ctx, &name).await?
            } else {
                registry::delete_activity_type(ctx, &name).await?
            };
            println!(
                "Deleted '{name}' and {} referencing records",
                outcome.affected
            );
            for failure in &outcome.failures {
                eprintln!("  failed to delete {}: {}", failure.id, failure.message);
            }
        }
    }
    Ok(())
}

async fn list_activities(ctx: &AppContext, person: Option<&str>) -> anyhow::Result<()> {
    let activities = ctx.store.run(|db| db.list_activities()).await?;
    print_activities(filter_by_person(activities, person));
    Ok(())
}

fn filter_by_person(activities: Vec<ActivityRecord>, person: Option<&str>) -> Vec<ActivityRecord> {
    match person {
        Some(person) => activities
            .into_iter()
            .filter(|r| r.person == person)
            .collect(),
        None => activities,
    }
}

fn print_activities(mut activities: Vec<ActivityRecord>) {
    activities.sort_by(|a, b| {
        (a.date.as_str(), a.start_time.as_str()).cmp(&(b.date.as_str(), b.start_time.as_str()))
    });
    for r in &activities {
        println!(
            "{} {}-{}  {}  {}  {}",
            r.date, r.start_time, r.end_time, r.person, r.activity_name, r.id
        );
    }
    println!("({} records)", activities.len());
}

fn is_open_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<StoreError>()
        .map(|e| matches!(e, StoreError::Open(_)))
        .unwrap_or(false)
}

fn print_help() {
    println!(
        r#"dailylog-cli - local-first personal activity log

USAGE:
  dailylog-cli add --person <name> --type <name> --date <YYYY-MM-DD>
               --start <HH:MM> --end <HH:MM> [--details <text>]
  dailylog-cli list [--person <name>]
  dailylog-cli person list
  dailylog-cli person add <name>
  dailylog-cli person rename <old> <new>
  dailylog-cli person delete <name> [--yes]
  dailylog-cli type list|add|rename|delete ...
  dailylog-cli export [--output <path>]
  dailylog-cli import <path> [--password <pw>]
  dailylog-cli password set <pw>
  dailylog-cli password clear
  dailylog-cli cleanup              remove duplicate records
  dailylog-cli delete-date <date>   remove all records on a date

Data directory: $DAILYLOG_DATA_DIR or the platform data dir."#
    );
}
