pub mod client;
mod config;
pub mod nav;
pub mod persistence;
pub mod quest;
pub mod shutdown;
pub mod telemetry;
pub mod world;

pub use client::phoenix::PhoenixClient;
pub use client::{ControlError, GameControl, SceneEntity};
pub use config::{AppConfig, GameConfig, RoutingConfig};
pub use nav::locator::{LocationResolver, NpcLocation};
pub use nav::navigator::{NavFailure, NavState, NavigationSettings, Navigator};
pub use nav::routing::{
    ClearanceSession, HttpRouteConfig, HttpRouteSource, Route, RouteError, RouteProvider,
    RouteSource,
};
pub use persistence::cache::{CacheError, CacheStore};
pub use quest::{QuestReport, QuestRunner, QuestStep, QuestTimings};
pub use shutdown::StopSignal;
pub use world::dataset::{DatasetError, GameDataset};
pub use world::position::{MapId, PlayerPosition};

use std::sync::Arc;
use tracing::{info, warn};

pub fn run(args: &[String]) -> Result<(), String> {
    let config = AppConfig::from_args(args)?;
    let log_path = telemetry::logging::init(&config.root)?;

    let cache = Arc::new(CacheStore::open(&config.cache_dir).map_err(|err| err.to_string())?);
    let dataset = Arc::new(
        GameDataset::load(&config.dataset, &config.language, config.map_count)
            .map_err(|err| err.to_string())?,
    );

    println!("questbot: dataset scan");
    println!("- root: {}", config.root.display());
    if let Some(config_file) = &config.config_file {
        println!("- config: {}", config_file.display());
    }
    println!("- npcs: {}", dataset.npc_count());
    println!("- monsters: {}", dataset.monster_count());
    println!("- map names: {}", dataset.map_info_count());
    println!(
        "- map files: {} (scan range 1..={})",
        dataset.map_file_count(),
        config.map_count
    );
    println!("- cache: {}", cache.root().display());
    println!("- log: {}", log_path.display());
    println!("- quest steps: {}", config.script.len());

    let session = ClearanceSession::new(config.routing.clearance.clone(), config.routing.credential_lifetime);
    let route_source = HttpRouteSource::new(
        &HttpRouteConfig {
            base_url: config.routing.base_url.clone(),
            user_agent: config.routing.user_agent.clone(),
            timeout: config.routing.timeout,
        },
        session,
    )
    .map_err(|err| err.to_string())?;
    let routes = RouteProvider::new(Arc::clone(&cache), route_source);

    let client = PhoenixClient::connect(
        &config.game.addr,
        &config.game.character,
        config.game.connect_timeout,
    )
    .map_err(|err| err.to_string())?;

    let mut navigator = Navigator::new(client, routes, Arc::clone(&dataset), config.navigation);
    match navigator.refresh_position() {
        Some(position) => info!(
            character = %config.game.character,
            map_id = position.map_id,
            map = %dataset.map_name(position.map_id),
            x = position.x,
            y = position.y,
            "connected"
        ),
        None => warn!(character = %config.game.character, "connected, position not yet known"),
    }

    let locator = LocationResolver::new(Arc::clone(&cache), Arc::clone(&dataset));
    let stop = StopSignal::new();
    shutdown::install(stop.clone())?;
    let mut runner = QuestRunner::new(navigator, locator, config.timings).with_stop(stop);
    let report = runner.run_script(&config.script);
    if report.interrupted {
        println!("questbot: quest interrupted");
    }

    let stats = cache.stats();
    println!(
        "questbot: quest finished, steps={}, succeeded={}, cache hits={}, misses={}, writes={}",
        report.attempted, report.succeeded, stats.hits, stats.misses, stats.writes
    );
    Ok(())
}
