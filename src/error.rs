//! Error types for the pagescribe library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal/validation**: the operation cannot be accepted
//!   at all (missing caller identity, bad source URL, storage failure).
//!   Returned as `Err(ExtractError)` from the public `Extractor` entry points.
//!
//! * [`VisionError`] — **Typed client failure**: a vision-model call failed
//!   after exhausting in-call retries. Carries the HTTP status and raw body
//!   for diagnostics. This never crosses the worker boundary as an error — the
//!   step converts it into the job's `last_error` plus a `paused` transition.
//!
//! * [`StoreError`] — SQLite-layer failures, wrapped so callers see one
//!   storage error type rather than raw `rusqlite` details.
//!
//! The separation keeps the scheduler honest: no step failure can escape and
//! kill the worker loop; only trigger/status callers ever see an `Err`.

use thiserror::Error;

/// Fatal and validation errors returned by the public `Extractor` API.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The trigger or status call arrived without a caller identity.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The request was malformed (bad URL, nonsensical page count).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The persistence layer failed.
    #[error("storage error")]
    Store(#[from] StoreError),
}

/// A failed vision-model call, surfaced as a value rather than a panic.
///
/// The step function turns this into a human-readable `last_error`; the raw
/// status and body are preserved because provider error bodies are the only
/// useful diagnostic when a model silently 429s or 502s for hours.
#[derive(Debug, Clone, Error)]
pub enum VisionError {
    /// The endpoint answered with a non-retryable status, or a retryable one
    /// on the final attempt.
    #[error("vision API error: {status} {body}")]
    Api { status: u16, body: String },

    /// The request never produced an HTTP response (DNS, TLS, timeout) even
    /// after retries.
    #[error("vision request failed: {detail}")]
    Request { detail: String },

    /// No API credential is configured. Fatal until reconfigured; the job is
    /// parked `paused` without an automatic retry.
    #[error("vision API key is not configured")]
    MissingCredential,
}

/// SQLite persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("query failed")]
    Query(#[source] rusqlite::Error),

    #[error("migration failed: {message}")]
    Migration { message: String },
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
