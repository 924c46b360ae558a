//! Error types shared across the engine.
//!
//! Each component that can fail at a module boundary gets its own
//! `thiserror` enum; `anyhow` is reserved for the outer edges (config
//! loading, the `hekad` binary) where context matters more than matching on
//! a specific variant.

use thiserror::Error;

/// Errors raised while compiling a [`crate::matcher`] expression.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MatcherError {
    #[error("lexical error: {0}")]
    Lexical(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown header '{0}'")]
    UnknownHeader(String),
    #[error("malformed Fields[...] reference: {0}")]
    MalformedFields(String),
    #[error("NIL may only be used with == or !=")]
    NilMisuse,
    #[error("invalid regex literal: {0}")]
    BadRegex(String),
}

/// Errors raised by the pack pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pack released more times than it was retained (over-release)")]
    OverRelease,
    #[error("pool is shut down")]
    Closed,
}

/// Errors raised by the router.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router ingress channel closed")]
    IngressClosed,
    #[error("consumer '{0}' delivery channel closed")]
    ConsumerClosed(String),
}

/// Errors raised by plugin runners.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("retryable transport error: {0}")]
    Retry(String),
    #[error("fatal plugin error: {0}")]
    Fatal(String),
    #[error("record exceeded maximum size ({0} bytes)")]
    RecordTooLarge(usize),
}

/// Errors raised by the statsd parser / accumulator.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum StatsError {
    #[error("malformed statsd line: {0}")]
    BadLine(String),
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
}

/// Errors raised by the framed stream codec.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("truncated frame: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("missing record separator")]
    MissingRecordSeparator,
    #[error("missing unit separator")]
    MissingUnitSeparator,
    #[error("hmac verification failed")]
    HmacMismatch,
    #[error("unknown hmac hash function {0}")]
    UnknownHashFunction(u8),
    #[error("header decode error: {0}")]
    Header(String),
}

/// Errors raised by the disk-backed output buffer.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue full, configured policy is shutdown")]
    PolicyShutdown,
    #[error("queue full, record dropped")]
    PolicyDrop,
    #[error("queue full, configured policy is block")]
    PolicyBlock,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("matcher error in section '{section}': {source}")]
    Matcher {
        section: String,
        #[source]
        source: MatcherError,
    },
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}
