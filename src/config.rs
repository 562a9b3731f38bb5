//! Layered configuration
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional TOML
//! file, `CATALOG_`-prefixed environment variables (`__` between nested
//! keys, e.g. `CATALOG_DATABASE__NAME`), then `DATABASE_URL`.

use crate::error::{Error, Result};
use crate::logging::{LogConfig, LogRotation};
use crate::store::{MongoConfig, MongoConnectionOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config files tried in order when no explicit path is given
pub const CONFIG_PATHS: [&str; 2] = ["query-catalog.toml", "config/query-catalog.toml"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub name: String,
    pub app_name: String,
    pub connect_timeout_secs: u64,
    pub server_selection_timeout_secs: u64,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    /// Abort at startup when the first ping fails
    pub require_connection: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    pub level: String,
    pub dir: String,
    /// daily, hourly or never
    pub rotation: String,
    pub console: bool,
    pub file: bool,
    pub json: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings {
                url: "mongodb://localhost:27017".to_string(),
                name: "query_catalog".to_string(),
                app_name: "query-catalog".to_string(),
                connect_timeout_secs: 10,
                server_selection_timeout_secs: 30,
                max_pool_size: 10,
                min_pool_size: 0,
                require_connection: false,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                dir: "logs".to_string(),
                rotation: "daily".to_string(),
                console: true,
                file: false,
                json: false,
            },
        }
    }
}

impl CatalogConfig {
    /// Loads configuration from the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Loads configuration with an explicit environment map
    pub fn load_with_env(path: Option<&Path>, env: HashMap<String, String>) -> Result<Self> {
        let mut settings = config::Config::builder();

        let default_config = CatalogConfig::default();
        settings = settings.add_source(config::Config::try_from(&default_config)?);

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                settings = settings.add_source(config::File::from(path.to_path_buf()));
            }
            None => {
                if let Some(found) = CONFIG_PATHS.iter().map(PathBuf::from).find(|p| p.exists()) {
                    tracing::debug!("loading config file {}", found.display());
                    settings = settings.add_source(config::File::from(found));
                }
            }
        }

        let database_url = env.get("DATABASE_URL").cloned();

        settings = settings.add_source(
            config::Environment::with_prefix("CATALOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(env)),
        );

        let mut config: CatalogConfig = settings.build()?.try_deserialize()?;

        if let Some(url) = database_url {
            config.database.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(Error::Config("database.url cannot be empty".to_string()));
        }
        if self.database.name.trim().is_empty() {
            return Err(Error::Config("database.name cannot be empty".to_string()));
        }
        if self.database.min_pool_size > self.database.max_pool_size {
            return Err(Error::Config(
                "database.min_pool_size cannot exceed database.max_pool_size".to_string(),
            ));
        }
        self.logging
            .rotation
            .parse::<LogRotation>()
            .map_err(Error::Config)?;
        Ok(())
    }

    /// Driver configuration for [`MongoStore`](crate::store::MongoStore)
    pub fn mongo_config(&self) -> MongoConfig {
        let db = &self.database;
        MongoConfig {
            uri: db.url.clone(),
            database: db.name.clone(),
            pool_options: MongoConnectionOptions {
                max_pool_size: db.max_pool_size,
                min_pool_size: db.min_pool_size,
                connect_timeout: Duration::from_secs(db.connect_timeout_secs),
                server_selection_timeout: Duration::from_secs(db.server_selection_timeout_secs),
                app_name: Some(db.app_name.clone()).filter(|name| !name.is_empty()),
            },
        }
    }

    pub fn log_config(&self) -> Result<LogConfig> {
        let rotation = self
            .logging
            .rotation
            .parse::<LogRotation>()
            .map_err(Error::Config)?;
        Ok(LogConfig::default()
            .with_level(&self.logging.level)
            .with_log_dir(&self.logging.dir)
            .with_rotation(rotation)
            .with_console(self.logging.console)
            .with_file(self.logging.file)
            .with_json(self.logging.json))
    }

    /// Writes a commented sample configuration to `path`
    pub fn generate_sample_config(path: &Path) -> Result<()> {
        let toml_content = toml::to_string_pretty(&CatalogConfig::default())
            .map_err(|e| Error::Config(e.to_string()))?;

        let sample_content = format!(
            r#"# query-catalog configuration
#
# Save as query-catalog.toml or config/query-catalog.toml.
# Environment overrides use the CATALOG_ prefix with __ between sections,
# e.g. CATALOG_DATABASE__NAME=sample_db. DATABASE_URL overrides database.url.

{}
# [database]
# require_connection = abort when the startup ping fails
#
# [logging]
# level = trace, debug, info, warn, error, or an EnvFilter directive
# rotation = daily, hourly, never (file output only)
"#,
            toml_content
        );

        std::fs::write(path, sample_content)?;
        Ok(())
    }
}
