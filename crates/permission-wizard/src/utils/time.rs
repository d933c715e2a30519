pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Converts a validated, finite, non-negative seconds value into a `Duration`.
pub fn secs_f64(value: f64) -> std::time::Duration {
    if value.is_finite() && value > 0.0 {
        std::time::Duration::from_secs_f64(value)
    } else {
        std::time::Duration::ZERO
    }
}
