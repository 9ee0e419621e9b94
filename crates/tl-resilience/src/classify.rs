//! Best-effort error classification from message text.
//!
//! Inspects the error display chain for well-known substrings. This is a
//! heuristic for alert routing and recovery selection, not an exhaustive
//! taxonomy; anything unrecognized is UNKNOWN.

use tl_common::ErrorKind;

/// Classify a raw error message.
pub fn classify_message(message: &str) -> ErrorKind {
    let m = message.to_ascii_lowercase();

    if m.contains("timeout") || m.contains("timed out") {
        return ErrorKind::Timeout;
    }
    if m.contains("connection")
        || m.contains("connect")
        || m.contains("refused")
        || m.contains("unreachable")
        || m.contains("broken pipe")
    {
        return ErrorKind::Connection;
    }
    if m.contains("authentication")
        || m.contains("unauthorized")
        || m.contains("forbidden")
        || m.contains("credential")
        || m.contains("access denied")
    {
        return ErrorKind::Authentication;
    }
    if m.contains("transform") || m.contains("mapping") || m.contains("conversion") {
        return ErrorKind::Transformation;
    }
    if m.contains("validation") || m.contains("invalid") || m.contains("malformed") {
        return ErrorKind::Validation;
    }
    if m.contains("adapter") {
        return ErrorKind::Adapter;
    }
    if m.contains("configuration") || m.contains("config") || m.contains("property") {
        return ErrorKind::Configuration;
    }
    if m.contains("out of memory")
        || m.contains("cache")
        || m.contains("internal error")
        || m.contains("system")
    {
        return ErrorKind::System;
    }

    ErrorKind::Unknown
}

/// Classify an error including its cause chain.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        let kind = classify_message(&cause.to_string());
        if kind != ErrorKind::Unknown {
            return kind;
        }
    }
    ErrorKind::Unknown
}
