use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Company a holder belongs to. Admin CRUD owns these rows; the engine only
/// reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

/// Work-schedule window gating which meals a holder may redeem. Start/end are
/// minutes since midnight; `end_min < start_min` means the shift wraps
/// midnight (night shifts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub id: i64,
    pub name: String,
    pub start_min: u32,
    pub end_min: u32,
    pub active: bool,
}

/// A named serving window (e.g., "Almoço"). Tolerance only extends the window
/// forward; meal windows never wrap midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealType {
    pub id: i64,
    pub name: String,
    pub start_min: u32,
    pub end_min: u32,
    pub tolerance_min: u32,
    pub max_per_day: Option<u32>,
    pub active: bool,
}

/// An employee entitled to meals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holder {
    pub id: i64,
    pub name: String,
    pub company_id: i64,
    pub shift_id: i64,
    pub suspended: bool,
}

/// Permanent, reusable code bound 1:1 to a holder. No `used_at`: consumption
/// is governed entirely by the usage ledger's daily/interval invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonVoucher {
    pub id: i64,
    pub holder_id: i64,
    pub code: String,
}

/// One-time, date-bound entitlement issued exceptionally to a holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraVoucher {
    pub id: i64,
    pub holder_id: i64,
    pub code: String,
    pub meal_type_id: Option<i64>,
    pub valid_on: NaiveDate,
    pub used_at: Option<DateTime<Utc>>,
}

/// Anonymous one-time code with an expiration date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisposableVoucher {
    pub id: i64,
    pub code: String,
    pub meal_type_id: Option<i64>,
    pub expires_on: NaiveDate,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoucherVariant {
    Common,
    Extra,
    Disposable,
}

impl std::fmt::Display for VoucherVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoucherVariant::Common => write!(f, "common"),
            VoucherVariant::Extra => write!(f, "extra"),
            VoucherVariant::Disposable => write!(f, "disposable"),
        }
    }
}

impl std::str::FromStr for VoucherVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "common" => Ok(VoucherVariant::Common),
            "extra" => Ok(VoucherVariant::Extra),
            "disposable" => Ok(VoucherVariant::Disposable),
            other => Err(format!("unknown voucher variant: {}", other)),
        }
    }
}

/// Immutable ledger row recording one successful redemption. Created only by
/// the commit path; never updated or deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: i64,
    pub holder_id: Option<i64>,
    pub meal_type_id: i64,
    pub variant: VoucherVariant,
    pub voucher_ref: i64,
    pub redeemed_at: DateTime<Utc>,
}
