//! Direct connection provider.
//!
//! Opens a dedicated connection per acquisition. In persistent mode one
//! healthy connection per pool name is kept after release and handed out
//! again by the next acquisition instead of reconnecting.

use crate::config::{DatabaseConfig, ProviderKind};
use crate::db::connection::{Connection, SqlxConnection};
use crate::db::provider::{ConnectionProvider, LastError, ProviderStats, UsageCounter};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub struct DirectProvider {
    configs: HashMap<String, DatabaseConfig>,
    persistent: bool,
    /// Released connections kept for reuse (persistent mode only).
    idle: Mutex<HashMap<String, Box<dyn Connection>>>,
    usage: UsageCounter,
    last_error: LastError,
    initialized: AtomicBool,
}

impl DirectProvider {
    pub fn new(databases: Vec<DatabaseConfig>, persistent: bool) -> Self {
        let configs = databases
            .into_iter()
            .map(|config| (config.id.clone(), config))
            .collect();
        Self {
            configs,
            persistent,
            idle: Mutex::new(HashMap::new()),
            usage: UsageCounter::default(),
            last_error: LastError::default(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Number of connections parked for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn config(&self, pool_name: &str) -> DbResult<&DatabaseConfig> {
        self.configs
            .get(pool_name)
            .ok_or_else(|| DbError::pool_not_found(pool_name))
    }

    fn take_idle(&self, pool_name: &str) -> Option<Box<dyn Connection>> {
        self.idle.lock().ok()?.remove(pool_name)
    }
}

#[async_trait]
impl ConnectionProvider for DirectProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Direct
    }

    async fn acquire(&self, pool_name: &str) -> DbResult<Box<dyn Connection>> {
        let config = match self.config(pool_name) {
            Ok(config) => config,
            Err(e) => {
                self.last_error.set(e.to_string());
                return Err(e);
            }
        };

        if self.persistent {
            if let Some(conn) = self.take_idle(pool_name) {
                debug!(pool = %pool_name, "Reusing persistent connection");
                self.usage.on_acquire();
                return Ok(conn);
            }
        }

        match SqlxConnection::connect(config).await {
            Ok(conn) => {
                if !self.initialized.swap(true, Ordering::AcqRel) {
                    info!(pool = %pool_name, db_type = %config.db_type, "Direct provider connected");
                }
                self.last_error.clear();
                self.usage.on_acquire();
                debug!(pool = %pool_name, "Opened direct connection");
                Ok(Box::new(conn))
            }
            Err(e) => {
                warn!(pool = %pool_name, error = %e, "Failed to open connection");
                self.last_error.set(e.to_string());
                Err(e)
            }
        }
    }

    fn release(&self, connection: Box<dyn Connection>, broken: bool) {
        let pool_name = connection.pool_name().to_string();
        self.usage.on_release(&pool_name);

        if broken {
            debug!(pool = %pool_name, "Closing broken connection");
            connection.discard();
            return;
        }

        if self.persistent {
            if let Ok(mut idle) = self.idle.lock() {
                if !idle.contains_key(&pool_name) {
                    idle.insert(pool_name, connection);
                    return;
                }
            }
        }

        // Dropping a dedicated connection closes it
        drop(connection);
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }

    fn database_type(&self, pool_name: &str) -> DbResult<DatabaseType> {
        self.config(pool_name).map(|config| config.db_type)
    }

    fn stats(&self) -> ProviderStats {
        self.usage.snapshot()
    }

    async fn shutdown(&self) {
        let parked: Vec<Box<dyn Connection>> = match self.idle.lock() {
            Ok(mut idle) => idle.drain().map(|(_, conn)| conn).collect(),
            Err(_) => Vec::new(),
        };
        for conn in parked {
            info!(pool = %conn.pool_name(), "Closing persistent connection");
            conn.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;

    fn sqlite_config(dir: &tempfile::TempDir) -> DatabaseConfig {
        let url = format!("sqlite:{}", dir.path().join("direct.db").display());
        DatabaseConfig::new("main", url, PoolOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_pool_records_error() {
        let provider = DirectProvider::new(Vec::new(), false);
        let result = provider.acquire("nope").await;
        assert!(matches!(result, Err(DbError::PoolNotFound { .. })));
        assert!(provider.last_error().unwrap().contains("nope"));
        assert!(!provider.is_initialized());
        assert!(provider.database_type("nope").is_err());
    }

    #[tokio::test]
    async fn test_non_persistent_closes_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirectProvider::new(vec![sqlite_config(&dir)], false);

        let conn = provider.acquire("main").await.unwrap();
        assert!(provider.is_initialized());
        assert_eq!(provider.stats().checked_out, 1);
        provider.release(conn, false);
        assert_eq!(provider.idle_count(), 0);
        assert_eq!(
            provider.stats(),
            ProviderStats {
                acquired: 1,
                released: 1,
                checked_out: 0
            }
        );
    }

    #[tokio::test]
    async fn test_persistent_reuses_healthy_connection() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirectProvider::new(vec![sqlite_config(&dir)], true);

        let mut conn = provider.acquire("main").await.unwrap();
        conn.execute("CREATE TEMP TABLE marker (x INTEGER)", &[])
            .await
            .unwrap();
        provider.release(conn, false);
        assert_eq!(provider.idle_count(), 1);

        // Temp tables live per session, so seeing it proves reuse
        let mut conn = provider.acquire("main").await.unwrap();
        assert_eq!(provider.idle_count(), 0);
        let rows = conn.fetch_all("SELECT COUNT(*) AS n FROM marker", &[]).await;
        assert!(rows.is_ok());
        provider.release(conn, true);
        assert_eq!(provider.idle_count(), 0);

        provider.shutdown().await;
    }
}
