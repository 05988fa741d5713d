//! Query tracing.
//!
//! The executor reports spans through the [`Tracer`] trait; the backend is
//! supplied by the caller. [`LogTracer`] maps spans onto the `tracing` crate,
//! [`NoopTracer`] disables tracing entirely.
//!
//! Tracer failures never fail a query. They are dropped, and logged only when
//! the process runs in development mode.

use crate::config::{TRACE_QUERIES_ENV, env_flag, is_development};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Span attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// A span attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: &'static str,
    pub value: AttributeValue,
}

impl KeyValue {
    pub fn new(key: &'static str, value: impl Into<AttributeValue>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Internal,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error(String),
}

#[derive(Debug, Error)]
#[error("tracer error: {0}")]
pub struct TracerError(pub String);

static NEXT_SPAN_ID: AtomicU64 = AtomicU64::new(1);

/// An open span, owned by whoever started it until it is ended.
#[derive(Debug)]
pub struct SpanHandle {
    id: u64,
    name: String,
    started: Instant,
    span: Option<tracing::Span>,
}

impl SpanHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_SPAN_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            started: Instant::now(),
            span: None,
        }
    }

    /// Attach a `tracing` span carried until the handle is ended.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn span(&self) -> Option<&tracing::Span> {
        self.span.as_ref()
    }
}

/// Tracing backend consumed by the query executor.
pub trait Tracer: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn start_span(
        &self,
        name: &str,
        attributes: &[KeyValue],
        kind: SpanKind,
    ) -> Result<SpanHandle, TracerError>;

    fn end_span(
        &self,
        span: SpanHandle,
        attributes: &[KeyValue],
        status: SpanStatus,
    ) -> Result<(), TracerError>;

    fn record_exception(&self, span: &SpanHandle, error: &str) -> Result<(), TracerError>;
}

/// Tracer that is never enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn is_enabled(&self) -> bool {
        false
    }

    fn start_span(
        &self,
        name: &str,
        _attributes: &[KeyValue],
        _kind: SpanKind,
    ) -> Result<SpanHandle, TracerError> {
        Ok(SpanHandle::new(name))
    }

    fn end_span(
        &self,
        _span: SpanHandle,
        _attributes: &[KeyValue],
        _status: SpanStatus,
    ) -> Result<(), TracerError> {
        Ok(())
    }

    fn record_exception(&self, _span: &SpanHandle, _error: &str) -> Result<(), TracerError> {
        Ok(())
    }
}

/// Tracer that emits spans through the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl LogTracer {
    fn record(span: &tracing::Span, attributes: &[KeyValue]) {
        for attr in attributes {
            match &attr.value {
                AttributeValue::Str(s) => span.record(attr.key, s.as_str()),
                AttributeValue::Int(i) => span.record(attr.key, *i),
                AttributeValue::Float(v) => span.record(attr.key, *v),
                AttributeValue::Bool(b) => span.record(attr.key, *b),
            };
        }
    }
}

impl Tracer for LogTracer {
    fn is_enabled(&self) -> bool {
        true
    }

    fn start_span(
        &self,
        name: &str,
        attributes: &[KeyValue],
        kind: SpanKind,
    ) -> Result<SpanHandle, TracerError> {
        let span = tracing::debug_span!(
            "db.query",
            otel.name = name,
            otel.kind = ?kind,
            db.operation = tracing::field::Empty,
            db.system = tracing::field::Empty,
            db.params.count = tracing::field::Empty,
            db.in_transaction = tracing::field::Empty,
            db.rows_affected = tracing::field::Empty,
            db.execution_time_ms = tracing::field::Empty,
            trace.id = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
            error = tracing::field::Empty,
        );
        Self::record(&span, attributes);
        Ok(SpanHandle::new(name).with_span(span))
    }

    fn end_span(
        &self,
        span: SpanHandle,
        attributes: &[KeyValue],
        status: SpanStatus,
    ) -> Result<(), TracerError> {
        let Some(inner) = span.span() else {
            return Err(TracerError(format!(
                "span {} was not started by this tracer",
                span.name()
            )));
        };
        Self::record(inner, attributes);
        match &status {
            SpanStatus::Ok => inner.record("otel.status_code", "OK"),
            SpanStatus::Error(_) => inner.record("otel.status_code", "ERROR"),
        };
        inner.in_scope(|| {
            tracing::debug!(elapsed_ms = span.elapsed_ms(), status = ?status, "span finished");
        });
        Ok(())
    }

    fn record_exception(&self, span: &SpanHandle, error: &str) -> Result<(), TracerError> {
        if let Some(inner) = span.span() {
            inner.record("error", error);
        }
        Ok(())
    }
}

/// Trace identity shared by every statement of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: String,
}

impl TraceContext {
    /// Creates a new trace context with a generated ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Creates a trace context continuing an existing trace.
    #[must_use]
    pub fn from_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracer, trace context and query-tracing switch for one unit of work.
///
/// When `trace_queries` is unset the `DB_TRACE_QUERIES` environment variable
/// decides, read on every statement.
#[derive(Clone)]
pub struct Instrumentation {
    tracer: Arc<dyn Tracer>,
    context: Option<TraceContext>,
    trace_queries: Option<bool>,
}

impl Instrumentation {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self {
            tracer,
            context: None,
            trace_queries: None,
        }
    }

    /// No tracing at all.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopTracer))
    }

    #[must_use]
    pub fn with_context(mut self, context: TraceContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Override `DB_TRACE_QUERIES` for this unit of work.
    #[must_use]
    pub fn with_query_tracing(mut self, enabled: bool) -> Self {
        self.trace_queries = Some(enabled);
        self
    }

    pub fn tracer(&self) -> &dyn Tracer {
        self.tracer.as_ref()
    }

    pub fn context(&self) -> Option<&TraceContext> {
        self.context.as_ref()
    }

    /// Whether statements should be wrapped in spans right now.
    pub fn should_trace(&self) -> bool {
        self.tracer.is_enabled()
            && self
                .trace_queries
                .unwrap_or_else(|| env_flag(TRACE_QUERIES_ENV))
    }
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("enabled", &self.tracer.is_enabled())
            .field("context", &self.context)
            .field("trace_queries", &self.trace_queries)
            .finish()
    }
}

/// Drop a tracer failure, logging it in development mode.
pub(crate) fn swallow<T>(operation: &str, result: Result<T, TracerError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            if is_development() {
                tracing::warn!(operation, error = %e, "Tracer call failed");
            }
            None
        }
    }
}
