use colored::Colorize;

/// Format minutes-since-midnight as HH:MM.
pub fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Format a serving or shift window for display.
pub fn format_window(start_min: u32, end_min: u32) -> String {
    format!("{}-{}", format_minutes(start_min), format_minutes(end_min))
}

/// Format timestamp in human-readable format.
pub fn format_timestamp(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Mask a code for log-safe display; only the last two characters stay
/// visible. Counts characters, not bytes: kiosk input is free-form and may
/// carry multi-byte UTF-8.
pub fn mask_code(code: &str) -> String {
    let total = code.chars().count();
    if total <= 2 {
        "*".repeat(total)
    } else {
        let visible: String = code.chars().skip(total - 2).collect();
        format!("{}{}", "*".repeat(total - 2), visible)
    }
}

/// Kiosk-facing rejection banner.
pub fn format_rejection(rejection: &crate::error::Rejection) -> String {
    format!("✗ {} [{}]", rejection, rejection.code()).red().to_string()
}
