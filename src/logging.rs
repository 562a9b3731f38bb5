use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Base name of the rolling log file
pub const LOG_FILE_NAME: &str = "query-catalog.log";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level or EnvFilter directive (trace, debug, info, warn, error)
    pub level: String,
    pub log_dir: PathBuf,
    pub rotation: LogRotation,
    pub console_enabled: bool,
    pub file_enabled: bool,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(LogRotation::Daily),
            "hourly" => Ok(LogRotation::Hourly),
            "never" => Ok(LogRotation::Never),
            other => Err(format!(
                "unknown log rotation '{other}' (expected daily, hourly or never)"
            )),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            rotation: LogRotation::Daily,
            console_enabled: true,
            file_enabled: false,
            json: false,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.file_enabled = enabled;
        self
    }

    pub fn with_json(mut self, enabled: bool) -> Self {
        self.json = enabled;
        self
    }
}

fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn file_appender(config: &LogConfig) -> rolling::RollingFileAppender {
    match config.rotation {
        LogRotation::Daily => rolling::daily(&config.log_dir, LOG_FILE_NAME),
        LogRotation::Hourly => rolling::hourly(&config.log_dir, LOG_FILE_NAME),
        LogRotation::Never => rolling::never(&config.log_dir, LOG_FILE_NAME),
    }
}

/// Installs the global subscriber.
///
/// Console output goes to stderr so stdout stays clean for query results.
/// The returned guard flushes the file writer on drop; hold it for the
/// lifetime of the process. With both outputs disabled, warnings still
/// reach stderr.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guard = None;

    if config.console_enabled || !config.file_enabled {
        let console = fmt::layer().with_writer(std::io::stderr).with_target(true);
        layers.push(if config.json {
            console.json().boxed()
        } else {
            console.boxed()
        });
    }

    if config.file_enabled {
        ensure_log_dir(&config.log_dir)?;
        let (writer, file_guard) = non_blocking(file_appender(config));
        guard = Some(file_guard);

        let file = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        layers.push(if config.json {
            file.json().boxed()
        } else {
            file.boxed()
        });
    }

    let filter = if config.console_enabled || config.file_enabled {
        env_filter
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;

    tracing::debug!(
        level = %config.level,
        console = config.console_enabled,
        file = config.file_enabled,
        json = config.json,
        "logging initialized"
    );
    if config.file_enabled {
        tracing::info!("📂 log directory: {}", config.log_dir.display());
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console_enabled);
        assert!(!config.file_enabled);
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_rotation_parsing() {
        assert_eq!("Hourly".parse::<LogRotation>(), Ok(LogRotation::Hourly));
        assert_eq!("never".parse::<LogRotation>(), Ok(LogRotation::Never));
        assert!("weekly".parse::<LogRotation>().is_err());
    }

    #[test]
    fn test_ensure_log_dir() {
        let temp_dir = tempdir().unwrap();
        let log_dir = temp_dir.path().join("test_logs");

        assert!(ensure_log_dir(&log_dir).is_ok());
        assert!(log_dir.exists());
    }

    // Only test in this binary that installs the global subscriber.
    #[test]
    fn test_init_logging_writes_file() {
        let temp_dir = tempdir().unwrap();
        let config = LogConfig::default()
            .with_log_dir(temp_dir.path().join("logs"))
            .with_rotation(LogRotation::Never)
            .with_console(false)
            .with_file(true)
            .with_level("info");

        let guard = init_logging(&config).unwrap();
        assert!(guard.is_some());
        tracing::info!("written to file");
        drop(guard);

        let contents = fs::read_to_string(temp_dir.path().join("logs").join(LOG_FILE_NAME)).unwrap();
        assert!(contents.contains("written to file"));
    }
}
