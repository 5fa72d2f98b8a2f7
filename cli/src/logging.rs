// Logging — stderr subscriber plus an optional per-session log file

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// `<root>/<role>/session_<timestamp>.log`
pub fn session_log_path(root: &Path, role: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    root.join(role).join(format!("session_{}.log", stamp))
}

/// Install the global subscriber. With a `role`, every event is also written
/// to a fresh session file under `logs/<role>/`; keep the returned guard alive
/// until exit so buffered lines get flushed.
pub fn init(role: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match role {
        Some(role) => {
            let path = session_log_path(Path::new("logs"), role);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_name = path
                .file_name()
                .context("Session log path has no file name")?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_log_path_layout() {
        let path = session_log_path(Path::new("logs"), "relay");
        assert!(path.starts_with("logs/relay"));

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("session_"));
        assert!(name.ends_with(".log"));
    }
}
