//! Executor factory bound to one pool.

use crate::db::executor::QueryExecutor;
use crate::db::provider::ConnectionProvider;
use crate::error::DbResult;
use crate::models::DatabaseType;
use crate::telemetry::Instrumentation;
use std::sync::Arc;

/// Binds a provider, a pool name and the instrumentation of a unit of work.
///
/// Cheap to clone. Every executor it hands out shares the same tracer and
/// trace context, so all statements of the unit of work land in one trace.
#[derive(Clone)]
pub struct ConnectionManager {
    provider: Arc<dyn ConnectionProvider>,
    pool_name: String,
    instrumentation: Instrumentation,
}

impl ConnectionManager {
    /// Create a manager without tracing.
    pub fn new(provider: Arc<dyn ConnectionProvider>, pool_name: impl Into<String>) -> Self {
        Self {
            provider,
            pool_name: pool_name.into(),
            instrumentation: Instrumentation::disabled(),
        }
    }

    #[must_use]
    pub fn with_instrumentation(mut self, instrumentation: Instrumentation) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    /// A fresh executor. It acquires its connection lazily.
    pub fn executor(&self) -> QueryExecutor {
        QueryExecutor::new(
            Arc::clone(&self.provider),
            self.pool_name.clone(),
            self.instrumentation.clone(),
        )
    }

    pub fn database_type(&self) -> DbResult<DatabaseType> {
        self.provider.database_type(&self.pool_name)
    }

    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("provider", &self.provider.kind())
            .field("pool_name", &self.pool_name)
            .field("instrumentation", &self.instrumentation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::MockProvider;
    use crate::telemetry::{LogTracer, TraceContext};

    #[tokio::test]
    async fn test_executors_share_provider_and_context() {
        let provider = MockProvider::new();
        let manager = ConnectionManager::new(provider.clone(), "reports").with_instrumentation(
            Instrumentation::new(Arc::new(LogTracer)).with_context(TraceContext::from_id("t-9")),
        );

        let mut first = manager.executor();
        let mut second = manager.clone().executor();
        assert_eq!(first.pool_name(), "reports");
        first.run("UPDATE t SET a = 1", &[]).await.unwrap();
        second.run("UPDATE t SET a = 2", &[]).await.unwrap();

        assert_eq!(provider.acquired(), 2);
        assert_eq!(
            manager.instrumentation().context().map(TraceContext::trace_id),
            Some("t-9")
        );
        assert_eq!(manager.database_type().unwrap(), DatabaseType::SQLite);
    }

    #[test]
    fn test_executor_is_lazy() {
        let provider = MockProvider::new();
        let manager = ConnectionManager::new(provider.clone(), "main");
        let executor = manager.executor();
        assert!(!executor.has_connection());
        assert_eq!(provider.acquired(), 0);
    }
}
