use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_NAME: &str = "questbot.log";
const DEFAULT_FILTER: &str = "questbot=info";

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Installs the global subscriber: plain-text file under `<root>/log` plus stderr.
/// Later calls return the path chosen by the first one.
pub fn init(root: &Path) -> Result<PathBuf, String> {
    if let Some(path) = LOG_PATH.get() {
        return Ok(path.clone());
    }
    let log_dir = root.join("log");
    std::fs::create_dir_all(&log_dir)
        .map_err(|err| format!("log directory create failed: {}", err))?;

    let file_appender = RollingFileAppender::new(Rotation::NEVER, &log_dir, LOG_FILE_NAME);
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|err| format!("log system init failed: {}", err))?;

    let path = log_dir.join(LOG_FILE_NAME);
    Ok(LOG_PATH.get_or_init(|| path).clone())
}
