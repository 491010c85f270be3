use thiserror::Error;

/// Infrastructure faults. Business rejections are not errors, see [`Rejection`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Data integrity fault: {0}")]
    Integrity(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Enumerated business outcomes of a redemption attempt. These are returned,
/// never thrown, and the coordinator never retries them automatically. Each
/// reason stays distinguishable for audit and reporting; the kiosk layer owns
/// localization and HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Rejection {
    NotFound,
    Ambiguous,
    HolderSuspended,
    CompanyInactive,
    ShiftInactive,
    MealTypeInactive,
    MealTypeMismatch,
    OutsideMealWindow,
    OutsideShiftWindow,
    Expired,
    DailyLimitReached,
    IntervalTooShort,
    AlreadyUsed,
    /// Storage/transport fault surfaced to the kiosk. The only reason the
    /// kiosk may retry; a retry against an already-committed voucher simply
    /// yields `AlreadyUsed`.
    Unavailable,
}

impl Rejection {
    /// Stable machine-readable code, recorded by the kiosk for audit.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotFound => "not_found",
            Rejection::Ambiguous => "ambiguous",
            Rejection::HolderSuspended => "holder_suspended",
            Rejection::CompanyInactive => "company_inactive",
            Rejection::ShiftInactive => "shift_inactive",
            Rejection::MealTypeInactive => "meal_type_inactive",
            Rejection::MealTypeMismatch => "meal_type_mismatch",
            Rejection::OutsideMealWindow => "outside_meal_window",
            Rejection::OutsideShiftWindow => "outside_shift_window",
            Rejection::Expired => "expired",
            Rejection::DailyLimitReached => "daily_limit_reached",
            Rejection::IntervalTooShort => "interval_too_short",
            Rejection::AlreadyUsed => "already_used",
            Rejection::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Rejection::NotFound => "no entitlement matches this code",
            Rejection::Ambiguous => "code matches more than one entitlement",
            Rejection::HolderSuspended => "holder is suspended",
            Rejection::CompanyInactive => "holder's company is inactive",
            Rejection::ShiftInactive => "holder's shift is inactive",
            Rejection::MealTypeInactive => "meal type is inactive",
            Rejection::MealTypeMismatch => "voucher is bound to a different meal type",
            Rejection::OutsideMealWindow => "outside the meal serving window",
            Rejection::OutsideShiftWindow => "outside the holder's shift window",
            Rejection::Expired => "voucher is expired or already consumed",
            Rejection::DailyLimitReached => "daily meal limit reached",
            Rejection::IntervalTooShort => "too soon after the previous meal",
            Rejection::AlreadyUsed => "voucher was already used",
            Rejection::Unavailable => "service temporarily unavailable",
        };
        write!(f, "{}", msg)
    }
}
