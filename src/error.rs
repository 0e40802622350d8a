//! Top-level error types for the bridge
//!
//! Each stage owns its own error enum; [`BridgeError`] wraps them so the
//! dispatcher and `main` can report any of them uniformly. Text shown to
//! operators goes through [`sanitize_error_message`] first.

use crate::config::ConfigError;
use crate::events::DecodeError;
use crate::resolver::ResolveError;
use crate::store::StoreError;
use crate::transport::mqtt::MqttError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

const MAX_MESSAGE_LEN: usize = 500;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap an error from any [`crate::transport::Transport`] implementation
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }

    /// Full cause chain, redacted, for operator logs
    pub fn operator_message(&self) -> String {
        sanitize_error_message(&display_chain(self))
    }
}

/// Join an error and all of its sources with `: `
pub fn display_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        // thiserror `{0}` formats often repeat the source verbatim
        if !message.ends_with(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

fn secret_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)(password|token|key|secret|apikey|authorization)[=:]\s*(bearer\s+)?[^\s&,]+")
                .ok()
        })
        .as_ref()
}

fn bearer_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").ok())
        .as_ref()
}

fn sensitive_path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
        })
        .as_ref()
}

/// Sanitize error messages to prevent credential leakage into logs
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(re) = secret_pattern() {
        sanitized = re.replace_all(&sanitized, "${1}=***").into_owned();
    }
    if let Some(re) = bearer_pattern() {
        sanitized = re.replace_all(&sanitized, "Bearer ***").into_owned();
    }
    if let Some(re) = sensitive_path_pattern() {
        sanitized = re.replace_all(&sanitized, "/***REDACTED***/").into_owned();
    }

    // Truncate very long messages - ensure total length is <= MAX_MESSAGE_LEN
    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
