use std::env;
use std::str::FromStr;

/// # NDOC
/// component: `subsystems::mail_trace::config`
/// purpose: Environment-overridable tunables for the matcher, staging
///   writer, and run worker. Every accessor falls back to a compiled-in
///   default on a missing or unparseable env var rather than panicking.

fn env_or_default<T: FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Minimum adjusted confidence score (0-100) required to emit a match.
pub fn match_min_score() -> i32 {
    env_or_default("MAILTRACE_MATCH_MIN_SCORE", 0)
}

/// Whether zip/city+state fast filters are applied before scoring.
pub fn fast_filters_enabled() -> bool {
    env_or_default("MAILTRACE_FAST_FILTERS", true)
}

/// How many top-ranked candidates to recheck before the final tie-break.
/// `1` is the single `extractOne` fast path; values above 1 widen the
/// rechecked set before bonuses/tie-break are applied.
pub fn limit_topk() -> usize {
    env_or_default("MAILTRACE_LIMIT_TOPK", 1)
}

/// Batch size for staging and match-store writes.
pub fn staging_batch_size() -> usize {
    env_or_default("MAILTRACE_STAGING_BATCH_SIZE", 1000)
}

/// Heartbeat interval, in seconds, emitted by a live matching worker.
pub fn heartbeat_interval_secs() -> u64 {
    env_or_default("MAILTRACE_HEARTBEAT_INTERVAL_SECS", 5)
}
