use crate::nav::navigator::NavigationSettings;
use crate::quest::{default_script, QuestStep, QuestTimings};
use crate::world::dataset::DatasetPaths;
use crate::world::position::MapId;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ROUTING_URL: &str = "https://www.noshydra.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_GAME_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_MAP_COUNT: MapId = 412;
const DEFAULT_CONFIG_NAME: &str = "questbot.yaml";

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub base_url: String,
    pub clearance: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub credential_lifetime: Duration,
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub character: String,
    pub addr: String,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub root: PathBuf,
    pub config_file: Option<PathBuf>,
    pub dataset: DatasetPaths,
    pub cache_dir: PathBuf,
    pub map_count: MapId,
    pub language: String,
    pub routing: RoutingConfig,
    pub game: GameConfig,
    pub navigation: NavigationSettings,
    pub timings: QuestTimings,
    pub script: Vec<QuestStep>,
}

/// Optional YAML overrides. Relative paths resolve against the data root.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    maps_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    npcs_file: Option<PathBuf>,
    monsters_file: Option<PathBuf>,
    maps_file: Option<PathBuf>,
    map_count: Option<MapId>,
    language: Option<String>,
    routing: RoutingSection,
    game: GameSection,
    navigation: NavigationSection,
    timings: TimingSection,
    script: Option<Vec<QuestStep>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RoutingSection {
    base_url: Option<String>,
    clearance: Option<String>,
    user_agent: Option<String>,
    timeout_secs: Option<f64>,
    credential_lifetime_secs: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GameSection {
    character: Option<String>,
    addr: Option<String>,
    connect_timeout_secs: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct NavigationSection {
    max_desync_restarts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TimingSection {
    portal_walk_wait_secs: Option<f64>,
    portal_settle_secs: Option<f64>,
    npc_walk_wait_secs: Option<f64>,
    talk_settle_secs: Option<f64>,
    step_pause_secs: Option<f64>,
    attack_settle_secs: Option<f64>,
    hunt_retry_secs: Option<f64>,
    approach_wait_secs: Option<f64>,
    hunt_timeout_secs: Option<f64>,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        Self::from_sources(args, |name| std::env::var(name).ok())
    }

    /// Defaults, then the YAML file, then `QUESTBOT_*` variables from `env`.
    pub fn from_sources(
        args: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        if args.len() < 2 {
            return Err("usage: questbot <data-root> [config.yaml]".to_string());
        }
        let root = Path::new(&args[1]).to_path_buf();
        if !root.is_dir() {
            return Err(format!("data root not found: {}", root.display()));
        }

        let config_file = if args.len() > 2 {
            Some(PathBuf::from(&args[2]))
        } else {
            let candidate = root.join(DEFAULT_CONFIG_NAME);
            candidate.is_file().then_some(candidate)
        };
        let file = match &config_file {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        let resolve = |value: Option<PathBuf>, default: &str| -> PathBuf {
            match value {
                Some(path) if path.is_absolute() => path,
                Some(path) => root.join(path),
                None => root.join(default),
            }
        };
        let dataset = DatasetPaths {
            npcs_file: resolve(file.npcs_file, "npcs.json"),
            monsters_file: resolve(file.monsters_file, "monsters.json"),
            maps_file: resolve(file.maps_file, "maps.json"),
            maps_dir: resolve(file.maps_dir, "maps"),
        };
        let cache_dir = resolve(file.cache_dir, "cache");

        let routing = RoutingConfig {
            base_url: env_value(&env, "QUESTBOT_ROUTING_URL")
                .or(file.routing.base_url)
                .unwrap_or_else(|| DEFAULT_ROUTING_URL.to_string()),
            clearance: env_value(&env, "QUESTBOT_CLEARANCE")
                .or(file.routing.clearance)
                .unwrap_or_default(),
            user_agent: file
                .routing
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout: seconds(file.routing.timeout_secs, 10.0, "routing.timeout_secs")?,
            credential_lifetime: seconds(
                file.routing.credential_lifetime_secs,
                15.0 * 60.0,
                "routing.credential_lifetime_secs",
            )?,
        };
        let game = GameConfig {
            character: env_value(&env, "QUESTBOT_CHARACTER")
                .or(file.game.character)
                .unwrap_or_default(),
            addr: env_value(&env, "QUESTBOT_GAME_ADDR")
                .or(file.game.addr)
                .unwrap_or_else(|| DEFAULT_GAME_ADDR.to_string()),
            connect_timeout: seconds(file.game.connect_timeout_secs, 5.0, "game.connect_timeout_secs")?,
        };

        let defaults = NavigationSettings::default();
        let navigation = NavigationSettings {
            portal_walk_wait: seconds(file.timings.portal_walk_wait_secs, 2.0, "timings.portal_walk_wait_secs")?,
            portal_settle: seconds(file.timings.portal_settle_secs, 1.5, "timings.portal_settle_secs")?,
            max_desync_restarts: file
                .navigation
                .max_desync_restarts
                .unwrap_or(defaults.max_desync_restarts),
        };
        let t = &file.timings;
        let timings = QuestTimings {
            npc_walk_wait: seconds(t.npc_walk_wait_secs, 1.5, "timings.npc_walk_wait_secs")?,
            talk_settle: seconds(t.talk_settle_secs, 1.5, "timings.talk_settle_secs")?,
            step_pause: seconds(t.step_pause_secs, 2.0, "timings.step_pause_secs")?,
            attack_settle: seconds(t.attack_settle_secs, 3.0, "timings.attack_settle_secs")?,
            hunt_retry: seconds(t.hunt_retry_secs, 2.0, "timings.hunt_retry_secs")?,
            approach_wait: seconds(t.approach_wait_secs, 0.5, "timings.approach_wait_secs")?,
            hunt_timeout: seconds(t.hunt_timeout_secs, 300.0, "timings.hunt_timeout_secs")?,
        };

        let config = Self {
            root,
            config_file,
            dataset,
            cache_dir,
            map_count: file.map_count.unwrap_or(DEFAULT_MAP_COUNT),
            language: file.language.unwrap_or_else(|| "fr".to_string()),
            routing,
            game,
            navigation,
            timings,
            script: file.script.unwrap_or_else(default_script),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.dataset.maps_dir.is_dir() {
            return Err(format!(
                "maps directory not found: {}",
                self.dataset.maps_dir.display()
            ));
        }
        if self.routing.clearance.trim().is_empty() {
            return Err(
                "routing clearance credential not set (QUESTBOT_CLEARANCE or routing.clearance)"
                    .to_string(),
            );
        }
        if self.game.character.trim().is_empty() {
            return Err(
                "character name not set (QUESTBOT_CHARACTER or game.character)".to_string(),
            );
        }
        if self.map_count == 0 {
            return Err("map_count must be at least 1".to_string());
        }
        Ok(())
    }
}

fn load_config_file(path: &Path) -> Result<ConfigFile, String> {
    let data = std::fs::read_to_string(path)
        .map_err(|err| format!("config read failed for {}: {}", path.display(), err))?;
    if data.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(&data)
        .map_err(|err| format!("config parse failed for {}: {}", path.display(), err))
}

fn env_value(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    env(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn seconds(value: Option<f64>, default: f64, label: &str) -> Result<Duration, String> {
    let secs = value.unwrap_or(default);
    Duration::try_from_secs_f64(secs).map_err(|_| format!("{label} must be a non-negative number, got {secs}"))
}
