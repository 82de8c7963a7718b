use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use peregrine_client::{BookingPlatform, Executor, HttpPlatform, RetryPolicy};
use peregrine_coordinator::{ClaimTable, ReleaseEngine};
use peregrine_core::PeregrineConfig;
use peregrine_proxy::ProxyPool;
use peregrine_store::Store;
use peregrine_trigger::{ReleaseFire, TriggerLoop};

#[derive(Parser, Debug)]
#[command(name = "peregrine", about = "Release-time reservation sniper")]
struct Args {
    /// Path to peregrine.toml. Falls back to $PEREGRINE_CONFIG, then
    /// ~/.peregrine/peregrine.toml.
    #[arg(long)]
    config: Option<String>,

    /// Run a single release event for the given venue id right now,
    /// then exit. Useful for dry runs and recovering a missed release.
    #[arg(long, value_name = "VENUE_ID")]
    once: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peregrine=info".into()),
        )
        .init();

    let args = Args::parse();

    // load config: explicit path > PEREGRINE_CONFIG env > ~/.peregrine/peregrine.toml
    let config_path = args
        .config
        .or_else(|| std::env::var("PEREGRINE_CONFIG").ok());
    let config = PeregrineConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        PeregrineConfig::default()
    });

    // initialize SQLite database
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(Store::new(db)?);

    // proxy pool from the stored identities
    let identities = store.list_proxies()?;
    if identities.is_empty() {
        warn!("no proxy identities configured — attempts will fail as proxy-exhausted");
    }
    let pool = Arc::new(ProxyPool::new(identities));
    info!(proxies = pool.len(), "proxy pool ready");

    let platform: Arc<dyn BookingPlatform> = Arc::new(HttpPlatform::new(&config.platform));
    let executor = Arc::new(Executor::new(
        Arc::clone(&pool),
        RetryPolicy::from_config(&config.booking),
    ));
    let claims = Arc::new(ClaimTable::new());
    let engine = Arc::new(ReleaseEngine::new(
        Arc::clone(&store),
        platform,
        executor,
        claims,
        config.booking.clone(),
    ));

    if let Some(venue_id) = args.once {
        info!(venue_id = %venue_id, "running one release event");
        engine.run_release_event(&venue_id).await;
        return Ok(());
    }

    let venues = store.list_enabled_venues()?;
    if venues.is_empty() {
        warn!("no enabled venues — nothing to schedule");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    // Fired-release channel: per-venue timer loops → event runner below.
    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::channel::<ReleaseFire>(64);

    for venue in &venues {
        let timer = TriggerLoop::new(
            venue.id.clone(),
            venue.release_time.clone(),
            venue.timezone.clone(),
            false,
            fired_tx.clone(),
        );
        tokio::spawn(timer.run(shutdown_rx.clone()));
        info!(
            venue_id = %venue.id,
            release_time = %venue.release_time,
            tz = %venue.timezone,
            "venue timer spawned"
        );
    }
    // The runner must see the channel close once every timer exits.
    drop(fired_tx);

    loop {
        tokio::select! {
            fire = fired_rx.recv() => {
                match fire {
                    Some(fire) => {
                        info!(venue_id = %fire.venue_id, released_at = %fire.released_at, "release fired");
                        // Events for different venues can overlap; each
                        // runs on its own task.
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move {
                            engine.run_release_event(&fire.venue_id).await;
                        });
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }

    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
