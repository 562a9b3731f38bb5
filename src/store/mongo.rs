//! MongoDB Document Store
//!
//! Provides the driver-backed store using the official mongodb crate

use super::DocumentStore;
use crate::error::StoreError;
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    options::ClientOptions,
    Client, Database,
};
use std::sync::Arc;
use std::time::Duration;

/// MongoDB Connection Configuration
#[derive(Clone, Debug)]
pub struct MongoConfig {
    /// Connection URI
    pub uri: String,
    /// Database name
    pub database: String,
    /// Connection pool options
    pub pool_options: MongoConnectionOptions,
}

impl MongoConfig {
    /// Create new MongoDB configuration
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            pool_options: MongoConnectionOptions::default(),
        }
    }

    /// Validate MongoDB configuration
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.uri.is_empty() {
            return Err(StoreError::Configuration(
                "MongoDB URI cannot be empty".to_string(),
            ));
        }
        if !self.uri.starts_with("mongodb://") && !self.uri.starts_with("mongodb+srv://") {
            return Err(StoreError::Configuration(format!(
                "MongoDB URI must use the mongodb:// or mongodb+srv:// scheme, got '{}'",
                redact_uri(&self.uri)
            )));
        }
        if self.database.is_empty() {
            return Err(StoreError::Configuration(
                "Database name cannot be empty".to_string(),
            ));
        }
        if self.pool_options.min_pool_size > self.pool_options.max_pool_size {
            return Err(StoreError::Configuration(
                "min_pool_size cannot exceed max_pool_size".to_string(),
            ));
        }
        Ok(())
    }
}

/// MongoDB Connection Pool Options
#[derive(Clone, Debug)]
pub struct MongoConnectionOptions {
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Server selection timeout
    pub server_selection_timeout: Duration,
    /// Application name
    pub app_name: Option<String>,
}

impl Default for MongoConnectionOptions {
    fn default() -> Self {
        Self {
            max_pool_size: 10,
            min_pool_size: 0,
            connect_timeout: Duration::from_secs(10),
            server_selection_timeout: Duration::from_secs(30),
            app_name: Some("query-catalog".to_string()),
        }
    }
}

/// Strips credentials from a connection string before it is logged
pub fn redact_uri(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &uri[..scheme_end], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}

/// MongoDB specific error conversion
pub(crate) fn convert_mongodb_error(err: mongodb::error::Error) -> StoreError {
    use mongodb::error::ErrorKind;

    match err.kind.as_ref() {
        ErrorKind::Authentication { .. } => {
            StoreError::Connection(format!("Authentication failed: {}", err))
        }
        ErrorKind::ConnectionPoolCleared { .. } => {
            StoreError::Connection(format!("Connection pool cleared: {}", err))
        }
        ErrorKind::ServerSelection { .. } => {
            StoreError::Connection(format!("Server selection failed: {}", err))
        }
        ErrorKind::DnsResolve { .. } => {
            StoreError::Connection(format!("DNS resolution failed: {}", err))
        }
        ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            StoreError::Timeout(format!("Operation timed out: {}", err))
        }
        ErrorKind::Io(_) => StoreError::Connection(format!("I/O failure: {}", err)),
        ErrorKind::InvalidArgument { .. } => {
            StoreError::InvalidQuery(format!("Invalid argument: {}", err))
        }
        ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
            StoreError::Serialization(err.to_string())
        }
        _ => StoreError::Query(err.to_string()),
    }
}

/// MongoDB Document Store
pub struct MongoStore {
    client: Client,
    database: Database,
    config: Arc<MongoConfig>,
}

impl MongoStore {
    /// Create the client. No round trip happens until the first command.
    pub async fn connect(config: MongoConfig) -> Result<Self, StoreError> {
        config.validate()?;

        let mut client_options = ClientOptions::parse(&config.uri)
            .await
            .map_err(convert_mongodb_error)?;

        client_options.max_pool_size = Some(config.pool_options.max_pool_size);
        client_options.min_pool_size = Some(config.pool_options.min_pool_size);
        client_options.connect_timeout = Some(config.pool_options.connect_timeout);
        client_options.server_selection_timeout =
            Some(config.pool_options.server_selection_timeout);

        if let Some(ref app_name) = config.pool_options.app_name {
            client_options.app_name = Some(app_name.clone());
        }

        let client = Client::with_options(client_options).map_err(convert_mongodb_error)?;
        let database = client.database(&config.database);

        tracing::debug!(
            uri = %redact_uri(&config.uri),
            database = %config.database,
            "mongodb client created"
        );

        Ok(Self {
            client,
            database,
            config: Arc::new(config),
        })
    }

    /// Connects, hands the store to `f`, and closes the client afterwards
    /// whatever `f` returned.
    pub async fn with_connection<F, Fut, T>(config: MongoConfig, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let store: Arc<dyn DocumentStore> = Arc::new(Self::connect(config).await?);
        Ok(super::with_store(store, f).await)
    }

    /// Get reference to MongoDB database
    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// Get server version
    pub async fn server_version(&self) -> Result<String, StoreError> {
        let build_info = self
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(convert_mongodb_error)?;

        Ok(build_info
            .get_str("version")
            .unwrap_or("unknown")
            .to_string())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .database
            .collection::<Document>(collection)
            .find(filter)
            .await
            .map_err(convert_mongodb_error)?;

        cursor.try_collect().await.map_err(convert_mongodb_error)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .database
            .collection::<Document>(collection)
            .aggregate(pipeline)
            .await
            .map_err(convert_mongodb_error)?;

        cursor.try_collect().await.map_err(convert_mongodb_error)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(convert_mongodb_error)?;

        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
