use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    config::RedemptionConfig,
    error::{EngineError, Rejection},
    redemption::{unavailable, ResolvedEntitlement},
    schedule::ScheduleClock,
    storage::{models::MealType, Database},
};

/// The single canonical rule set for redemption eligibility. Checks run in a
/// fixed order so every rejection carries one deterministic reason. The
/// evaluator is read-only and idempotent: the coordinator may re-run it
/// without double-counting, and its verdict is advisory — the commit path
/// arbitrates races.
pub struct EligibilityEvaluator<'a> {
    db: &'a Database,
    rules: &'a RedemptionConfig,
}

impl<'a> EligibilityEvaluator<'a> {
    pub fn new(db: &'a Database, rules: &'a RedemptionConfig) -> Self {
        Self { db, rules }
    }

    pub fn evaluate(
        &self,
        resolved: &ResolvedEntitlement,
        meal_type: &MealType,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), Rejection> {
        let today = now.date_naive();
        let time = now.time();

        // 1-2: holder standing, company and shift activity
        let mut holder_shift = None;
        if let Some(holder) = resolved.holder() {
            if holder.suspended {
                return Err(Rejection::HolderSuspended);
            }

            let company = self
                .db
                .get_company(holder.company_id)
                .map_err(unavailable)?
                .ok_or_else(|| {
                    unavailable(EngineError::Integrity(format!(
                        "holder {} references missing company {}",
                        holder.id, holder.company_id
                    )))
                })?;
            if !company.active {
                return Err(Rejection::CompanyInactive);
            }

            let shift = self
                .db
                .get_shift(holder.shift_id)
                .map_err(unavailable)?
                .ok_or_else(|| {
                    unavailable(EngineError::Integrity(format!(
                        "holder {} references missing shift {}",
                        holder.id, holder.shift_id
                    )))
                })?;
            if !shift.active {
                return Err(Rejection::ShiftInactive);
            }
            holder_shift = Some(shift);
        }

        // 3: target meal type must be active
        if !meal_type.active {
            return Err(Rejection::MealTypeInactive);
        }

        // 4: vouchers generated for a fixed meal type must match exactly
        if let Some(bound) = resolved.bound_meal_type() {
            if bound != meal_type.id {
                return Err(Rejection::MealTypeMismatch);
            }
        }

        // 5: serving window, tolerance included
        if !ScheduleClock::within_meal_window(time, meal_type) {
            return Err(Rejection::OutsideMealWindow);
        }

        // 6: shift window gates common vouchers only; extra and disposable
        // are exceptions to the normal schedule
        if let (ResolvedEntitlement::Common { .. }, Some(shift)) = (resolved, &holder_shift) {
            if !ScheduleClock::within_shift_window(time, shift) {
                return Err(Rejection::OutsideShiftWindow);
            }
        }

        // 7: single-use vouchers must still be live. A consumed voucher is
        // reported as AlreadyUsed so a retried kiosk call stays
        // distinguishable from a date-expired code.
        match resolved {
            ResolvedEntitlement::Extra { voucher, .. } => {
                if voucher.used_at.is_some() {
                    return Err(Rejection::AlreadyUsed);
                }
                if voucher.valid_on < today {
                    return Err(Rejection::Expired);
                }
            }
            ResolvedEntitlement::Disposable { voucher } => {
                if voucher.used_at.is_some() {
                    return Err(Rejection::AlreadyUsed);
                }
                if voucher.expires_on < today {
                    return Err(Rejection::Expired);
                }
            }
            ResolvedEntitlement::Common { .. } => {}
        }

        // 8-9: aggregate ledger invariants, holder-scoped
        if let Some(holder) = resolved.holder() {
            let count = self
                .db
                .usage_count_on(holder.id, today)
                .map_err(unavailable)?;
            let ceiling = meal_type.max_per_day.unwrap_or(self.rules.max_meals_per_day);
            if count >= ceiling {
                debug!(
                    "Holder {} already redeemed {} meals today (ceiling {})",
                    holder.id, count, ceiling
                );
                return Err(Rejection::DailyLimitReached);
            }

            if let Some(last) = self
                .db
                .last_redemption_on(holder.id, today)
                .map_err(unavailable)?
            {
                let minimum = Duration::minutes(self.rules.min_interval_minutes);
                if now - last < minimum {
                    debug!(
                        "Holder {} redeemed at {}, interval below {} minutes",
                        holder.id, last, self.rules.min_interval_minutes
                    );
                    return Err(Rejection::IntervalTooShort);
                }
            }
        }

        Ok(())
    }
}
