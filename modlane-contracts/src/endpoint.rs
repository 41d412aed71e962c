/// Single most-recent-status channel. New subscribers receive the last
/// cached status immediately.
pub const CURRENT_TASK: &str = "/currentTask";

/// Progress stream for conversions and extractions. No catch-up.
pub const CONVERSION: &str = "/conversion";

/// Canonical form of an endpoint name: exactly one leading slash, no
/// trailing slash.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    format!("/{trimmed}")
}

/// Whether the server keeps a catch-up copy of the last status sent on
/// `endpoint`.
pub fn caches_last_status(endpoint: &str) -> bool {
    endpoint == CURRENT_TASK
}
