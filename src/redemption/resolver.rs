use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::{
    error::{EngineError, Rejection},
    redemption::unavailable,
    storage::{
        models::{CommonVoucher, DisposableVoucher, ExtraVoucher, Holder, VoucherVariant},
        Database,
    },
};

/// A presented code resolved to exactly one entitlement variant, with its
/// owner context loaded.
#[derive(Debug, Clone)]
pub enum ResolvedEntitlement {
    Common {
        voucher: CommonVoucher,
        holder: Holder,
    },
    Extra {
        voucher: ExtraVoucher,
        holder: Holder,
    },
    Disposable {
        voucher: DisposableVoucher,
    },
}

impl ResolvedEntitlement {
    pub fn variant(&self) -> VoucherVariant {
        match self {
            ResolvedEntitlement::Common { .. } => VoucherVariant::Common,
            ResolvedEntitlement::Extra { .. } => VoucherVariant::Extra,
            ResolvedEntitlement::Disposable { .. } => VoucherVariant::Disposable,
        }
    }

    /// The holder, where the variant has one. Disposable vouchers are
    /// anonymous.
    pub fn holder(&self) -> Option<&Holder> {
        match self {
            ResolvedEntitlement::Common { holder, .. } => Some(holder),
            ResolvedEntitlement::Extra { holder, .. } => Some(holder),
            ResolvedEntitlement::Disposable { .. } => None,
        }
    }

    /// The meal type fixed by the voucher at generation time, if any. None
    /// means the meal type is chosen at the kiosk.
    pub fn bound_meal_type(&self) -> Option<i64> {
        match self {
            ResolvedEntitlement::Common { .. } => None,
            ResolvedEntitlement::Extra { voucher, .. } => voucher.meal_type_id,
            ResolvedEntitlement::Disposable { voucher } => voucher.meal_type_id,
        }
    }
}

/// Single dispatch point over the three entitlement variants. Each probe is
/// isolated; a code matching more than one variant is a data-integrity
/// fault surfaced as `Ambiguous`, never silently resolved.
pub struct EntitlementResolver<'a> {
    db: &'a Database,
}

impl<'a> EntitlementResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn resolve(
        &self,
        code: &str,
        today: NaiveDate,
    ) -> std::result::Result<ResolvedEntitlement, Rejection> {
        let mut matches: Vec<ResolvedEntitlement> = Vec::new();

        if let Some(voucher) = self
            .db
            .find_disposable(code, today)
            .map_err(unavailable)?
        {
            debug!("Code matched disposable voucher {}", voucher.id);
            matches.push(ResolvedEntitlement::Disposable { voucher });
        }

        if let Some(voucher) = self.db.find_common_voucher(code).map_err(unavailable)? {
            let holder = self.load_holder(voucher.holder_id)?;
            debug!(
                "Code matched common voucher {} of holder {}",
                voucher.id, holder.id
            );
            matches.push(ResolvedEntitlement::Common { voucher, holder });
        }

        if let Some(voucher) = self.db.find_extra(code, today).map_err(unavailable)? {
            let holder = self.load_holder(voucher.holder_id)?;
            debug!(
                "Code matched extra voucher {} of holder {}",
                voucher.id, holder.id
            );
            matches.push(ResolvedEntitlement::Extra { voucher, holder });
        }

        match matches.len() {
            0 => Err(Rejection::NotFound),
            1 => Ok(matches.remove(0)),
            n => {
                warn!("Code matches {} entitlements, refusing to pick one", n);
                Err(Rejection::Ambiguous)
            }
        }
    }

    fn load_holder(&self, holder_id: i64) -> std::result::Result<Holder, Rejection> {
        self.db
            .get_holder(holder_id)
            .map_err(unavailable)?
            .ok_or_else(|| {
                unavailable(EngineError::Integrity(format!(
                    "voucher references missing holder {}",
                    holder_id
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn seeded_db() -> (Database, NaiveDate) {
        let db = Database::open_in_memory().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();

        let company = db.insert_company("Acme", true).unwrap();
        let shift = db.insert_shift("day", 6 * 60, 14 * 60, true).unwrap();
        let holder = db.insert_holder("Maria", company, shift, false).unwrap();

        db.insert_common_voucher(holder, "1111").unwrap();
        db.insert_extra_voucher(holder, "2222", None, today).unwrap();
        db.insert_disposable_voucher("4821", None, today).unwrap();

        (db, today)
    }

    #[test]
    fn test_resolves_each_variant() {
        let (db, today) = seeded_db();
        let resolver = EntitlementResolver::new(&db);

        assert_eq!(
            resolver.resolve("1111", today).unwrap().variant(),
            VoucherVariant::Common
        );
        assert_eq!(
            resolver.resolve("2222", today).unwrap().variant(),
            VoucherVariant::Extra
        );
        assert_eq!(
            resolver.resolve("4821", today).unwrap().variant(),
            VoucherVariant::Disposable
        );
    }

    #[test]
    fn test_unknown_code_is_not_found() {
        let (db, today) = seeded_db();
        let resolver = EntitlementResolver::new(&db);

        assert_eq!(resolver.resolve("9999", today).unwrap_err(), Rejection::NotFound);
    }

    #[test]
    fn test_expired_single_use_codes_do_not_match() {
        let (db, today) = seeded_db();
        let resolver = EntitlementResolver::new(&db);

        // Valid yesterday only
        let yesterday = today.pred_opt().unwrap();
        let holder = db.get_holder(1).unwrap().unwrap();
        db.insert_extra_voucher(holder.id, "3333", None, yesterday)
            .unwrap();
        db.insert_disposable_voucher("5555", None, yesterday).unwrap();

        assert_eq!(resolver.resolve("3333", today).unwrap_err(), Rejection::NotFound);
        assert_eq!(resolver.resolve("5555", today).unwrap_err(), Rejection::NotFound);
    }

    #[test]
    fn test_multi_variant_match_is_ambiguous() {
        let (db, today) = seeded_db();
        let resolver = EntitlementResolver::new(&db);

        // An extra voucher generated with the same code as an existing
        // common voucher: data-integrity fault, never silently resolved.
        let holder = db.get_holder(1).unwrap().unwrap();
        db.insert_extra_voucher(holder.id, "1111", None, today)
            .unwrap();

        assert_eq!(resolver.resolve("1111", today).unwrap_err(), Rejection::Ambiguous);
    }

    #[test]
    fn test_disposable_holder_is_anonymous() {
        let (db, today) = seeded_db();
        let resolver = EntitlementResolver::new(&db);

        let resolved = resolver.resolve("4821", today).unwrap();
        assert!(resolved.holder().is_none());
    }
}
