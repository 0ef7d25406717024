use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use tutorsched::compactor::compact_if_needed;
use tutorsched::config::Config;
use tutorsched::engine::Engine;
use tutorsched::model::EntityRef;
use tutorsched::notify::NotifyHub;
use tutorsched::store::{Collection, InMemoryStore};

const USAGE: &str = "usage: tutorsched <command>

commands:
  summary                     record counts per collection
  availability <tutor>        declared and effective weekly hours
  slots <tutor> <minutes>     bookable slots over the horizon
  classes <tutor>             a tutor's classes
  show <class_ID|session_ID>  one class or session";

fn parse_id(raw: Option<&String>) -> Result<Ulid, Box<dyn std::error::Error>> {
    let raw = raw.ok_or(USAGE)?;
    Ok(Ulid::from_string(raw).map_err(|e| format!("bad id {raw:?}: {e}"))?)
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = Config::from_env();
    tutorsched::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let journal = config.journal_path();
    let store = Arc::new(InMemoryStore::open(&journal)?);
    info!(journal = %journal.display(), "store opened");
    compact_if_needed(&store, config.compact_threshold).await?;

    let engine = Engine::new(store.clone(), Arc::new(NotifyHub::new()), config.engine);

    match command.as_str() {
        "summary" => {
            let counts: serde_json::Map<String, serde_json::Value> = Collection::ALL
                .iter()
                .map(|c| (c.to_string(), store.record_count(*c).into()))
                .collect();
            print_json(&counts)?;
        }
        "availability" => {
            let tutor_id = parse_id(args.get(1))?;
            let declared = engine.resolve_effective_availability(tutor_id, false).await?;
            let effective = engine.resolve_effective_availability(tutor_id, true).await?;
            print_json(&serde_json::json!({
                "declared": declared,
                "effective": effective.time_slots,
            }))?;
        }
        "slots" => {
            let tutor_id = parse_id(args.get(1))?;
            let minutes: u32 = args
                .get(2)
                .unwrap_or(&config.engine.default_session_minutes.to_string())
                .parse()?;
            print_json(&engine.generate_bookable_slots(tutor_id, minutes).await?)?;
        }
        "classes" => {
            let tutor_id = parse_id(args.get(1))?;
            print_json(&engine.list_tutor_classes(tutor_id).await?)?;
        }
        "show" => {
            let target = EntityRef::parse(args.get(1).ok_or(USAGE)?);
            print_json(&engine.resolve_ref(&target).await?)?;
        }
        other => {
            eprintln!("unknown command {other:?}\n\n{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}
