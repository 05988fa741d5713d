//! Connection providers.
//!
//! A provider hands out [`Connection`]s by pool name and takes them back.
//! Two implementations exist: [`DirectProvider`](super::DirectProvider)
//! opens one connection per unit of work, [`PooledProvider`](super::PooledProvider)
//! checks connections out of a bounded sqlx pool shared by concurrent tasks.
//! Which one a process uses is decided once, see [`ProviderKind::detect`].

use crate::config::{Config, DatabaseConfig, ProviderKind};
use crate::db::connection::Connection;
use crate::db::{DirectProvider, PooledProvider};
use crate::error::DbResult;
use crate::models::DatabaseType;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{info, warn};

/// Environment variable forcing the connection model.
pub const CONNECTION_MODE_ENV: &str = "DB_CONNECTION_MODE";

/// Acquisition counters of a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    pub acquired: u64,
    pub released: u64,
    /// Connections currently handed out.
    pub checked_out: usize,
}

#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Hand out a connection for `pool_name`.
    ///
    /// Failure is final for the calling operation; the message is also kept
    /// for [`last_error`](Self::last_error).
    async fn acquire(&self, pool_name: &str) -> DbResult<Box<dyn Connection>>;

    /// Take a connection back. `broken` connections are closed, never reused.
    fn release(&self, connection: Box<dyn Connection>, broken: bool);

    fn is_initialized(&self) -> bool;

    fn last_error(&self) -> Option<String>;

    fn database_type(&self, pool_name: &str) -> DbResult<DatabaseType>;

    fn stats(&self) -> ProviderStats;

    /// Close every idle connection and pool.
    async fn shutdown(&self);
}

/// Lock-free acquisition bookkeeping shared by both providers.
#[derive(Debug, Default)]
pub(crate) struct UsageCounter {
    acquired: AtomicU64,
    released: AtomicU64,
    active: AtomicUsize,
}

impl UsageCounter {
    pub(crate) fn on_acquire(&self) {
        self.acquired.fetch_add(1, Ordering::AcqRel);
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturates at 0 so an extra release cannot wrap the count.
    pub(crate) fn on_release(&self, pool_name: &str) {
        self.released.fetch_add(1, Ordering::AcqRel);
        let result = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });

        if let Ok(0) = result {
            warn!(
                pool = %pool_name,
                "Active connection count underflow detected - extra release call"
            );
        }
    }

    pub(crate) fn snapshot(&self) -> ProviderStats {
        ProviderStats {
            acquired: self.acquired.load(Ordering::Acquire),
            released: self.released.load(Ordering::Acquire),
            checked_out: self.active.load(Ordering::Acquire),
        }
    }
}

/// Last acquisition failure of a provider.
#[derive(Debug, Default)]
pub(crate) struct LastError(Mutex<Option<String>>);

impl LastError {
    pub(crate) fn set(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(message.into());
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = None;
        }
    }

    pub(crate) fn get(&self) -> Option<String> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }
}

static DETECTED_KIND: OnceLock<ProviderKind> = OnceLock::new();

impl ProviderKind {
    /// Detect the connection model for this process.
    ///
    /// `DB_CONNECTION_MODE` wins when set to a known value. Otherwise a
    /// multi-threaded tokio runtime selects the pooled model and anything
    /// else the direct one. The answer is computed once and reused.
    pub fn detect() -> ProviderKind {
        *DETECTED_KIND.get_or_init(|| {
            let kind = Self::detect_uncached(std::env::var(CONNECTION_MODE_ENV).ok().as_deref());
            info!(kind = %kind, "Selected connection provider");
            kind
        })
    }

    pub(crate) fn detect_uncached(env_value: Option<&str>) -> ProviderKind {
        if let Some(raw) = env_value {
            match raw.parse::<ProviderKind>() {
                Ok(kind) => return kind,
                Err(e) => warn!(error = %e, "Ignoring {}", CONNECTION_MODE_ENV),
            }
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle)
                if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread =>
            {
                ProviderKind::Pooled
            }
            _ => ProviderKind::Direct,
        }
    }
}

/// Build a provider of the given kind for a set of databases.
pub fn build_provider(
    kind: ProviderKind,
    databases: Vec<DatabaseConfig>,
    persistent: bool,
) -> Arc<dyn ConnectionProvider> {
    match kind {
        ProviderKind::Direct => Arc::new(DirectProvider::new(databases, persistent)),
        ProviderKind::Pooled => Arc::new(PooledProvider::new(databases)),
    }
}

/// Build the provider described by the process configuration, over
/// databases already parsed from it.
pub fn provider_from_config(
    config: &Config,
    databases: Vec<DatabaseConfig>,
) -> Arc<dyn ConnectionProvider> {
    let kind = config.connection_mode.unwrap_or_else(ProviderKind::detect);
    build_provider(kind, databases, config.persistent)
}
