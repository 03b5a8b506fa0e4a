//! Packrat CLI - Manage packing lists and sync them from the terminal

use std::collections::HashMap;
use std::env;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use packrat_core::auth::FixedSession;
use packrat_core::db::{ChangeLog, ConflictStore, Database, EntityStore, SyncMetaStore};
use packrat_core::models::{Person, Trip, TripItem};
use packrat_core::sync::{
    ChangeOperation, ChangeTracker, ResolutionStrategy, SyncConflict, SyncEngine, SyncOptions,
};
use packrat_core::remote::{PostgrestRemoteStore, RemoteConfig};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "packrat")]
#[command(about = "Offline-first packing lists that sync when you are")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage trips
    Trip {
        #[command(subcommand)]
        command: TripCommands,
    },
    /// Manage people on a trip
    Person {
        #[command(subcommand)]
        command: PersonCommands,
    },
    /// Manage items on a trip
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Mark an item as packed
    Pack {
        /// Item id
        id: String,
    },
    /// Mark an item as not packed
    Unpack {
        /// Item id
        id: String,
    },
    /// Run a full sync cycle against the configured remote
    Sync,
    /// Show pending changes and the last sync watermark
    Status,
    /// List unresolved sync conflicts
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a sync conflict for an entity
    Resolve {
        /// Conflicted entity id
        entity_id: String,
        /// Which side wins
        #[arg(long, value_parser = ["local", "server"])]
        strategy: String,
    },
}

#[derive(Subcommand)]
enum TripCommands {
    /// Create a new trip
    #[command(alias = "new")]
    Create {
        /// Trip title
        title: Vec<String>,
    },
    /// List trips
    List,
    /// Delete a trip
    Delete {
        /// Trip id
        id: String,
    },
}

#[derive(Subcommand)]
enum PersonCommands {
    /// Add a person to a trip
    Add {
        /// Trip id
        trip_id: String,
        /// Person's name
        name: String,
    },
    /// List people on a trip
    List {
        /// Trip id
        trip_id: String,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Add an item to a trip
    Add {
        /// Trip id
        trip_id: String,
        /// Item name
        name: String,
        /// Quantity
        #[arg(short, long, default_value = "1")]
        quantity: u32,
    },
    /// List items on a trip
    List {
        /// Trip id
        trip_id: String,
    },
    /// Delete an item
    Delete {
        /// Item id
        id: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] packrat_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Trip title cannot be empty")]
    EmptyTitle,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("No conflict staged for entity: {0}")]
    NoConflict(String),
    #[error(
        "Sync is not configured. Set PACKRAT_API_URL and PACKRAT_API_KEY to enable `packrat sync`."
    )]
    SyncNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("packrat=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Trip { command } => match command {
            TripCommands::Create { title } => run_trip_create(&title, &db_path),
            TripCommands::List => run_trip_list(&db_path),
            TripCommands::Delete { id } => run_trip_delete(&id, &db_path),
        },
        Commands::Person { command } => match command {
            PersonCommands::Add { trip_id, name } => run_person_add(&trip_id, &name, &db_path),
            PersonCommands::List { trip_id } => run_person_list(&trip_id, &db_path),
        },
        Commands::Item { command } => match command {
            ItemCommands::Add {
                trip_id,
                name,
                quantity,
            } => run_item_add(&trip_id, &name, quantity, &db_path),
            ItemCommands::List { trip_id } => run_item_list(&trip_id, &db_path),
            ItemCommands::Delete { id } => run_item_delete(&id, &db_path),
        },
        Commands::Pack { id } => run_set_packed(&id, true, &db_path),
        Commands::Unpack { id } => run_set_packed(&id, false, &db_path),
        Commands::Sync => run_sync(&db_path).await,
        Commands::Status => run_status(&db_path),
        Commands::Conflicts { json } => run_conflicts(json, &db_path),
        Commands::Resolve {
            entity_id,
            strategy,
        } => run_resolve(&entity_id, &strategy, &db_path).await,
    }
}

fn run_trip_create(title_parts: &[String], db_path: &Path) -> Result<(), CliError> {
    let title = title_parts.join(" ").trim().to_string();
    if title.is_empty() {
        return Err(CliError::EmptyTitle);
    }

    let db = open_database(db_path)?;
    let user_id = user_id();
    let mut trip = Trip::new(&user_id, title);
    ChangeTracker::new(db).track(ChangeOperation::Create, None, &mut trip, &user_id)?;

    println!("{}", trip.id);
    Ok(())
}

fn run_trip_list(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let trips = EntityStore::<Trip>::new(db).list(&user_id())?;
    for trip in trips {
        println!("{}", format_trip_line(&trip));
    }
    Ok(())
}

fn run_trip_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let store = EntityStore::<Trip>::new(db.clone());
    let trip = store
        .get(id)?
        .ok_or_else(|| CliError::NotFound(id.to_string()))?;

    let before = trip.clone();
    let mut after = trip;
    ChangeTracker::new(db).track(
        ChangeOperation::Delete,
        Some(&before),
        &mut after,
        &user_id(),
    )?;
    println!("{}", after.id);
    Ok(())
}

fn run_person_add(trip_id: &str, name: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    require_trip(&db, trip_id)?;

    let mut person = Person::new(trip_id, name);
    ChangeTracker::new(db).track(ChangeOperation::Create, None, &mut person, &user_id())?;
    println!("{}", person.id);
    Ok(())
}

fn run_person_list(trip_id: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let people = EntityStore::<Person>::new(db).list(trip_id)?;
    for person in people {
        println!("{}  {}", person.id, person.name);
    }
    Ok(())
}

fn run_item_add(trip_id: &str, name: &str, quantity: u32, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    require_trip(&db, trip_id)?;

    let mut item = TripItem::new(trip_id, name);
    item.quantity = quantity;
    ChangeTracker::new(db).track(ChangeOperation::Create, None, &mut item, &user_id())?;
    println!("{}", item.id);
    Ok(())
}

fn run_item_list(trip_id: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let items = EntityStore::<TripItem>::new(db).list(trip_id)?;
    for item in items {
        println!("{}", format_item_line(&item));
    }
    Ok(())
}

fn run_item_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let store = EntityStore::<TripItem>::new(db.clone());
    let item = store
        .get(id)?
        .ok_or_else(|| CliError::NotFound(id.to_string()))?;

    let before = item.clone();
    let mut after = item;
    ChangeTracker::new(db).track(
        ChangeOperation::Delete,
        Some(&before),
        &mut after,
        &user_id(),
    )?;
    println!("{}", after.id);
    Ok(())
}

fn run_set_packed(id: &str, packed: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    ChangeTracker::new(db).track_packed_status(id, packed, &user_id())?;
    println!("{id}");
    Ok(())
}

async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let engine = open_engine(db)?;

    engine.check_connectivity().await;
    let report = engine.force_sync().await?;
    println!(
        "Synced: {} pulled, {} pushed, {} conflicts",
        report.pulled, report.conflicts, report.pushed
    );
    for conflict in engine.state().conflicts {
        println!("  conflict on {} {}", conflict.entity_type, conflict.entity_id);
    }
    Ok(())
}

fn run_status(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let pending = ChangeLog::new(db.clone()).pending()?;
    let watermark = SyncMetaStore::new(db).watermark(&user_id())?;

    println!("Pending changes: {}", pending.len());
    for change in &pending {
        println!(
            "  {} {} {}",
            change.operation, change.entity_type, change.entity_id
        );
    }
    match watermark {
        Some(at) => println!("Last pulled through: {at}"),
        None => println!("Never synced"),
    }
    Ok(())
}

fn run_conflicts(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let conflicts = ConflictStore::new(db).unresolved()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
    } else if conflicts.is_empty() {
        println!("No conflicts");
    } else {
        for conflict in &conflicts {
            println!("{}", format_conflict_line(conflict));
        }
    }
    Ok(())
}

async fn run_resolve(entity_id: &str, strategy: &str, db_path: &Path) -> Result<(), CliError> {
    let strategy: ResolutionStrategy = strategy.parse()?;
    let db = open_database(db_path)?;
    let engine = open_engine(db)?;

    let conflict = engine
        .state()
        .conflicts
        .into_iter()
        .find(|c| c.entity_id == entity_id)
        .ok_or_else(|| CliError::NoConflict(entity_id.to_string()))?;

    engine
        .resolve_conflict(&conflict.id, strategy, &HashMap::new())
        .await?;
    let report = engine.force_sync().await?;
    println!(
        "Resolved {} ({} pushed)",
        conflict.entity_id, report.pushed
    );
    Ok(())
}

fn format_trip_line(trip: &Trip) -> String {
    let items: usize = trip.days.iter().map(|d| d.items.len()).sum();
    format!("{}  {}  {} day(s), {} item(s)", trip.id, trip.title, trip.days.len(), items)
}

fn format_item_line(item: &TripItem) -> String {
    let mark = if item.packed { "x" } else { " " };
    format!("[{mark}] {}  {} x{}", item.id, item.name, item.quantity)
}

fn format_conflict_line(conflict: &SyncConflict) -> String {
    let fields = conflict
        .conflict_details
        .as_ref()
        .map_or(0, |d| d.conflicts.len());
    format!(
        "{}  {} {}  {} field(s) differ",
        conflict.id, conflict.entity_type, conflict.entity_id, fields
    )
}

fn user_id() -> String {
    env::var("PACKRAT_USER_ID").unwrap_or_else(|_| "local".to_string())
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("PACKRAT_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("packrat")
        .join("packrat.db")
}

fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(path)?)
}

fn open_engine(db: Database) -> Result<SyncEngine<PostgrestRemoteStore, FixedSession>, CliError> {
    let config = RemoteConfig::from_env().ok_or(CliError::SyncNotConfigured)?;
    let remote = PostgrestRemoteStore::new(config)?;
    let session = FixedSession::new(user_id());
    Ok(SyncEngine::new(db, remote, session, SyncOptions::default()))
}

fn require_trip(db: &Database, trip_id: &str) -> Result<(), CliError> {
    let trip = EntityStore::<Trip>::new(db.clone()).get(trip_id)?;
    match trip {
        Some(trip) if !packrat_core::Syncable::is_deleted(&trip) => Ok(()),
        _ => Err(CliError::NotFound(trip_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packrat_core::models::{DayItem, TripDay};
    use pretty_assertions::assert_eq;

    fn day_item(name: &str) -> DayItem {
        DayItem {
            name: name.to_string(),
            quantity: 1,
            packed: false,
        }
    }

    #[test]
    fn trip_line_counts_days_and_items() {
        let mut trip = Trip::new("u1", "Alps");
        trip.days = vec![
            TripDay::default(),
            TripDay {
                items: vec![day_item("Socks"), day_item("Hat")],
                ..TripDay::default()
            },
        ];
        let line = format_trip_line(&trip);
        assert!(line.contains("Alps"));
        assert!(line.contains("2 day(s), 2 item(s)"));
    }

    #[test]
    fn item_line_shows_packed_state() {
        let mut item = TripItem::new("t1", "Socks");
        item.quantity = 3;
        assert_eq!(
            format_item_line(&item),
            format!("[ ] {}  Socks x3", item.id)
        );
        item.packed = true;
        assert!(format_item_line(&item).starts_with("[x]"));
    }

    #[test]
    fn db_path_prefers_cli_argument() {
        let explicit = PathBuf::from("/tmp/mine.db");
        assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
    }
}
