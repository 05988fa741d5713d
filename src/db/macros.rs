//! Backend dispatch macros for reducing code duplication.
//!
//! The sqlx connection types share method names but not a usable common
//! type, so statements that read the same for every backend are written
//! once and expanded per variant at compile time.

/// Run the same body against whichever backend a connection holds.
///
/// `$conn` is bound to the `&mut` driver connection of the matching variant.
///
/// # Example
///
/// ```ignore
/// with_backend!(&mut self.backend, conn => {
///     sqlx::Executor::execute(conn, "BEGIN").await.map(|_| ())
/// })
/// ```
macro_rules! with_backend {
    ($backend:expr, $conn:ident => $body:expr) => {
        match $backend {
            $crate::db::connection::Backend::MySql(slot) => {
                let $conn = slot.get();
                $body
            }
            $crate::db::connection::Backend::Postgres(slot) => {
                let $conn = slot.get();
                $body
            }
            $crate::db::connection::Backend::Sqlite(slot) => {
                let $conn = slot.get();
                $body
            }
        }
    };
}

/// Match every pool variant with a per-backend body.
///
/// # Example
///
/// ```ignore
/// with_pool!(pool, {
///     MySql(p) => p.acquire().await,
///     Postgres(p) => p.acquire().await,
///     SQLite(p) => p.acquire().await,
/// })
/// ```
macro_rules! with_pool {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pooled::DbPool::$variant($p) => $body,
            )+
        }
    };
}
