use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    config::RedemptionConfig,
    error::Rejection,
    redemption::{unavailable, EligibilityEvaluator, EntitlementResolver, ResolvedEntitlement},
    schedule::ScheduleClock,
    storage::{CommitOutcome, Database, MealType, VoucherVariant},
};

/// Success payload returned to the kiosk layer, which owns HTTP mapping and
/// localization.
#[derive(Debug, Clone, Serialize)]
pub struct RedemptionOutcome {
    pub variant: VoucherVariant,
    pub holder_name: Option<String>,
    pub meal_type_name: String,
    pub redeemed_at: DateTime<Utc>,
}

/// The single entry point exposed to the kiosk: resolve, evaluate, then
/// commit in one transaction. Resolution and evaluation are advisory reads;
/// the conditional update / unique-constraint insert at commit time is the
/// authoritative arbiter, because time elapses between evaluation and commit
/// and a competitor may redeem first.
#[derive(Clone)]
pub struct RedemptionCoordinator {
    db: Arc<Database>,
    rules: RedemptionConfig,
}

impl RedemptionCoordinator {
    pub fn new(db: Arc<Database>, rules: RedemptionConfig) -> Self {
        Self { db, rules }
    }

    /// Redeem `code` for the meal type currently being served. `now` is
    /// injected by the caller. The blocking resolve/evaluate/commit sequence
    /// runs on the blocking pool so the async runtime stays responsive and
    /// the configured deadline can actually expire; on timeout the SQLite
    /// transaction abort is relied upon and `Unavailable` is returned.
    pub async fn redeem(
        &self,
        code: &str,
        meal_type_id: i64,
        now: DateTime<Utc>,
    ) -> std::result::Result<RedemptionOutcome, Rejection> {
        let deadline = Duration::from_secs(self.rules.redeem_deadline_secs);
        let worker = self.clone();
        let code = code.to_string();
        let task =
            tokio::task::spawn_blocking(move || worker.redeem_blocking(&code, meal_type_id, now));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!("Redemption task failed: {}", join_err);
                Err(Rejection::Unavailable)
            }
            Err(_) => {
                error!("Redemption deadline of {:?} exceeded", deadline);
                Err(Rejection::Unavailable)
            }
        }
    }

    fn redeem_blocking(
        &self,
        code: &str,
        meal_type_id: i64,
        now: DateTime<Utc>,
    ) -> std::result::Result<RedemptionOutcome, Rejection> {
        let today = now.date_naive();

        let resolver = EntitlementResolver::new(&self.db);
        let resolved = resolver.resolve(code, today)?;

        let meal_type = self
            .db
            .get_meal_type(meal_type_id)
            .map_err(unavailable)?
            .ok_or_else(|| {
                error!("Kiosk selected unknown meal type {}", meal_type_id);
                Rejection::Unavailable
            })?;

        let evaluator = EligibilityEvaluator::new(&self.db, &self.rules);
        evaluator.evaluate(&resolved, &meal_type, now)?;

        self.commit(&resolved, &meal_type, now)?;

        let outcome = RedemptionOutcome {
            variant: resolved.variant(),
            holder_name: resolved.holder().map(|h| h.name.clone()),
            meal_type_name: meal_type.name.clone(),
            redeemed_at: now,
        };
        info!(
            "Redeemed {} voucher for {} ({})",
            outcome.variant,
            outcome.holder_name.as_deref().unwrap_or("anonymous"),
            outcome.meal_type_name
        );
        Ok(outcome)
    }

    /// One atomic transaction per variant. Losing the race is a legitimate
    /// business outcome and is never retried here.
    fn commit(
        &self,
        resolved: &ResolvedEntitlement,
        meal_type: &MealType,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), Rejection> {
        let committed = match resolved {
            // No "used" flag to flip: the ledger insert is the whole commit,
            // and the unique (holder, meal type, day) index arbitrates.
            ResolvedEntitlement::Common { voucher, holder } => self
                .db
                .commit_common(voucher.id, holder.id, meal_type.id, now)
                .map_err(unavailable)?,
            ResolvedEntitlement::Extra { voucher, holder } => self
                .db
                .commit_extra(voucher.id, holder.id, meal_type.id, now)
                .map_err(unavailable)?,
            ResolvedEntitlement::Disposable { voucher } => self
                .db
                .commit_disposable(voucher.id, meal_type.id, now)
                .map_err(unavailable)?,
        };

        match committed {
            CommitOutcome::Committed => Ok(()),
            CommitOutcome::AlreadyConsumed => {
                warn!(
                    "Lost redemption race on {} voucher, code already consumed",
                    resolved.variant()
                );
                Err(Rejection::AlreadyUsed)
            }
            CommitOutcome::LedgerConflict => {
                warn!(
                    "Ledger refused {} redemption, holder already ate this meal today",
                    resolved.variant()
                );
                Err(Rejection::DailyLimitReached)
            }
        }
    }

    /// Kiosk auto-selection helper: the active meal type whose serving
    /// window (tolerance included) contains `now`.
    pub fn current_meal(
        &self,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<MealType>, Rejection> {
        let meals = self.db.list_active_meal_types().map_err(unavailable)?;
        Ok(meals
            .into_iter()
            .find(|meal| ScheduleClock::within_meal_window(now.time(), meal)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coordinator() -> (RedemptionCoordinator, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let coordinator = RedemptionCoordinator::new(db.clone(), RedemptionConfig::default());
        (coordinator, db)
    }

    fn at_lunch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 30, 0).unwrap()
    }

    fn seed_schedule(db: &Database) -> (i64, i64) {
        let company = db.insert_company("Acme", true).unwrap();
        let shift = db.insert_shift("day", 6 * 60, 14 * 60, true).unwrap();
        db.insert_meal_type("Almoço", 12 * 60, 13 * 60, 15, None, true)
            .unwrap();
        (company, shift)
    }

    #[tokio::test]
    async fn test_disposable_happy_path_then_already_used() {
        let (coordinator, db) = coordinator();
        seed_schedule(&db);
        db.insert_disposable_voucher("4821", None, at_lunch().date_naive())
            .unwrap();

        let outcome = coordinator.redeem("4821", 1, at_lunch()).await.unwrap();
        assert_eq!(outcome.variant, VoucherVariant::Disposable);
        assert_eq!(outcome.holder_name, None);
        assert_eq!(outcome.meal_type_name, "Almoço");

        // Same code, same instant: the voucher is consumed, not expired.
        let second = coordinator.redeem("4821", 1, at_lunch()).await.unwrap_err();
        assert_eq!(second, Rejection::AlreadyUsed);
    }

    #[tokio::test]
    async fn test_common_voucher_shift_mismatch() {
        let (coordinator, db) = coordinator();
        let (company, shift) = seed_schedule(&db);
        db.insert_meal_type("Jantar", 14 * 60 + 30, 15 * 60 + 30, 0, None, true)
            .unwrap();
        let holder = db.insert_holder("Maria", company, shift, false).unwrap();
        db.insert_common_voucher(holder, "1111").unwrap();

        // Day shift 06:00-14:00; 15:00 is outside it.
        let at_15 = Utc.with_ymd_and_hms(2024, 6, 10, 15, 0, 0).unwrap();
        let result = coordinator.redeem("1111", 2, at_15).await.unwrap_err();
        assert_eq!(result, Rejection::OutsideShiftWindow);
    }

    #[tokio::test]
    async fn test_common_voucher_second_redemption_same_meal_loses() {
        let (coordinator, db) = coordinator();
        let (company, shift) = seed_schedule(&db);
        let holder = db.insert_holder("Maria", company, shift, false).unwrap();
        db.insert_common_voucher(holder, "1111").unwrap();

        coordinator.redeem("1111", 1, at_lunch()).await.unwrap();

        // The unique ledger index refuses a second lunch today even though
        // an hour has passed since the first.
        let rules = RedemptionConfig {
            min_interval_minutes: 0,
            max_meals_per_day: 5,
            ..RedemptionConfig::default()
        };
        let lax = RedemptionCoordinator::new(db.clone(), rules);
        let result = lax.redeem("1111", 1, at_lunch()).await.unwrap_err();
        assert_eq!(result, Rejection::DailyLimitReached);
    }

    #[tokio::test]
    async fn test_unknown_code_not_found() {
        let (coordinator, db) = coordinator();
        seed_schedule(&db);

        let result = coordinator.redeem("0000", 1, at_lunch()).await.unwrap_err();
        assert_eq!(result, Rejection::NotFound);
    }

    #[tokio::test]
    async fn test_extra_voucher_consumed_exactly_once() {
        let (coordinator, db) = coordinator();
        let (company, shift) = seed_schedule(&db);
        let holder = db.insert_holder("Jorge", company, shift, false).unwrap();
        db.insert_extra_voucher(holder, "7777", None, at_lunch().date_naive())
            .unwrap();

        let outcome = coordinator.redeem("7777", 1, at_lunch()).await.unwrap();
        assert_eq!(outcome.variant, VoucherVariant::Extra);
        assert_eq!(outcome.holder_name.as_deref(), Some("Jorge"));

        let second = coordinator.redeem("7777", 1, at_lunch()).await.unwrap_err();
        assert_eq!(second, Rejection::AlreadyUsed);
    }

    #[tokio::test]
    async fn test_extra_after_common_same_meal_hits_daily_limit() {
        let (coordinator, db) = coordinator();
        let (company, shift) = seed_schedule(&db);
        let holder = db.insert_holder("Maria", company, shift, false).unwrap();
        db.insert_common_voucher(holder, "1111").unwrap();
        db.insert_extra_voucher(holder, "2001", Some(1), at_lunch().date_naive())
            .unwrap();

        let noon = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        coordinator.redeem("1111", 1, noon).await.unwrap();

        // An hour later, still inside the lunch window: the unique ledger
        // index refuses a second lunch for the holder, and the whole
        // transaction rolls back as a business rejection, not a fault.
        let later = Utc.with_ymd_and_hms(2024, 6, 10, 13, 5, 0).unwrap();
        let result = coordinator.redeem("2001", 1, later).await.unwrap_err();
        assert_eq!(result, Rejection::DailyLimitReached);

        // The rollback left the extra voucher unconsumed.
        let voucher = db
            .find_extra("2001", later.date_naive())
            .unwrap()
            .unwrap();
        assert!(voucher.used_at.is_none());
    }

    #[tokio::test]
    async fn test_zero_deadline_times_out_as_unavailable() {
        let (_, db) = coordinator();
        seed_schedule(&db);
        db.insert_disposable_voucher("4821", None, at_lunch().date_naive())
            .unwrap();

        let rules = RedemptionConfig {
            redeem_deadline_secs: 0,
            ..RedemptionConfig::default()
        };
        let strict = RedemptionCoordinator::new(db, rules);

        let result = strict.redeem("4821", 1, at_lunch()).await.unwrap_err();
        assert_eq!(result, Rejection::Unavailable);
    }

    #[tokio::test]
    async fn test_current_meal_auto_selection() {
        let (coordinator, db) = coordinator();
        seed_schedule(&db);

        let selected = coordinator.current_meal(at_lunch()).unwrap().unwrap();
        assert_eq!(selected.name, "Almoço");

        let at_night = Utc.with_ymd_and_hms(2024, 6, 10, 23, 0, 0).unwrap();
        assert!(coordinator.current_meal(at_night).unwrap().is_none());
    }
}
