use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::{
    error::Result,
    storage::models::{
        Company, CommonVoucher, DisposableVoucher, ExtraVoucher, Holder, MealType, Shift,
        UsageRecord, VoucherVariant,
    },
};

/// Outcome of a commit attempt. Losing either way is a legitimate business
/// outcome, not a fault; the coordinator maps each loss to its rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The conditional `used_at` update affected zero rows: a concurrent
    /// request consumed the voucher first.
    AlreadyConsumed,
    /// The ledger's unique (holder, meal type, day) index refused the
    /// insert: the holder already has a redemption for this meal today,
    /// possibly through a different voucher.
    LedgerConflict,
}

/// SQLite-backed store. The voucher rows and the usage ledger are the only
/// shared mutable state; their ownership lives in SQLite's transaction
/// manager, never in process memory. The engine never caches voucher "used"
/// status across requests.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS shifts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                start_min INTEGER NOT NULL,
                end_min INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS meal_types (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                start_min INTEGER NOT NULL,
                end_min INTEGER NOT NULL,
                tolerance_min INTEGER NOT NULL DEFAULT 0,
                max_per_day INTEGER,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS holders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                company_id INTEGER NOT NULL REFERENCES companies(id),
                shift_id INTEGER NOT NULL REFERENCES shifts(id),
                suspended INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS common_vouchers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                holder_id INTEGER NOT NULL UNIQUE REFERENCES holders(id),
                code TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS extra_vouchers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                holder_id INTEGER NOT NULL REFERENCES holders(id),
                code TEXT NOT NULL,
                meal_type_id INTEGER REFERENCES meal_types(id),
                valid_on TEXT NOT NULL,
                used_at TEXT
            );

            CREATE TABLE IF NOT EXISTS disposable_vouchers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL,
                meal_type_id INTEGER REFERENCES meal_types(id),
                expires_on TEXT NOT NULL,
                used_at TEXT
            );

            CREATE TABLE IF NOT EXISTS usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                holder_id INTEGER REFERENCES holders(id),
                meal_type_id INTEGER NOT NULL REFERENCES meal_types(id),
                variant TEXT NOT NULL,
                voucher_ref INTEGER NOT NULL,
                redeemed_on TEXT NOT NULL,
                redeemed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_extra_code ON extra_vouchers(code);
            CREATE INDEX IF NOT EXISTS idx_disposable_code ON disposable_vouchers(code);
            CREATE INDEX IF NOT EXISTS idx_usage_holder_day
                ON usage_records(holder_id, redeemed_on);

            -- At-most-once guard for common vouchers: one redemption per
            -- holder, meal type and day. A violated insert is a lost race.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_usage_once_per_meal
                ON usage_records(holder_id, meal_type_id, redeemed_on)
                WHERE holder_id IS NOT NULL;",
        )?;

        Ok(())
    }

    // ---- configuration reads (owned by external admin CRUD) ----

    pub fn get_company(&self, id: i64) -> Result<Option<Company>> {
        let conn = self.conn.lock().unwrap();
        let company = conn
            .query_row(
                "SELECT id, name, active FROM companies WHERE id = ?1",
                [id],
                |row| {
                    Ok(Company {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        active: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(company)
    }

    pub fn get_shift(&self, id: i64) -> Result<Option<Shift>> {
        let conn = self.conn.lock().unwrap();
        let shift = conn
            .query_row(
                "SELECT id, name, start_min, end_min, active FROM shifts WHERE id = ?1",
                [id],
                |row| {
                    Ok(Shift {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        start_min: row.get(2)?,
                        end_min: row.get(3)?,
                        active: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(shift)
    }

    pub fn get_meal_type(&self, id: i64) -> Result<Option<MealType>> {
        let conn = self.conn.lock().unwrap();
        let meal = conn
            .query_row(
                "SELECT id, name, start_min, end_min, tolerance_min, max_per_day, active
                 FROM meal_types WHERE id = ?1",
                [id],
                |row| {
                    Ok(MealType {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        start_min: row.get(2)?,
                        end_min: row.get(3)?,
                        tolerance_min: row.get(4)?,
                        max_per_day: row.get(5)?,
                        active: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(meal)
    }

    pub fn list_active_meal_types(&self) -> Result<Vec<MealType>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, start_min, end_min, tolerance_min, max_per_day, active
             FROM meal_types WHERE active = 1 ORDER BY start_min",
        )?;

        let meals = stmt
            .query_map([], |row| {
                Ok(MealType {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    start_min: row.get(2)?,
                    end_min: row.get(3)?,
                    tolerance_min: row.get(4)?,
                    max_per_day: row.get(5)?,
                    active: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(meals)
    }

    pub fn get_holder(&self, id: i64) -> Result<Option<Holder>> {
        let conn = self.conn.lock().unwrap();
        let holder = conn
            .query_row(
                "SELECT id, name, company_id, shift_id, suspended FROM holders WHERE id = ?1",
                [id],
                |row| {
                    Ok(Holder {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        company_id: row.get(2)?,
                        shift_id: row.get(3)?,
                        suspended: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(holder)
    }

    // ---- voucher probes (advisory reads, commit is authoritative) ----

    /// Matches by code and expiration only. Whether the voucher is still
    /// unused is the evaluator's and the commit path's concern; filtering it
    /// here would make a consumed code indistinguishable from an unknown one.
    pub fn find_disposable(
        &self,
        code: &str,
        today: NaiveDate,
    ) -> Result<Option<DisposableVoucher>> {
        let conn = self.conn.lock().unwrap();
        let voucher = conn
            .query_row(
                "SELECT id, code, meal_type_id, expires_on, used_at
                 FROM disposable_vouchers
                 WHERE code = ?1 AND expires_on >= ?2",
                params![code, today.to_string()],
                |row| {
                    Ok(DisposableVoucher {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        meal_type_id: row.get(2)?,
                        expires_on: parse_date(3, row.get::<_, String>(3)?)?,
                        used_at: row
                            .get::<_, Option<String>>(4)?
                            .map(|s| parse_ts(4, s))
                            .transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(voucher)
    }

    pub fn find_common_voucher(&self, code: &str) -> Result<Option<CommonVoucher>> {
        let conn = self.conn.lock().unwrap();
        let voucher = conn
            .query_row(
                "SELECT id, holder_id, code FROM common_vouchers WHERE code = ?1",
                [code],
                |row| {
                    Ok(CommonVoucher {
                        id: row.get(0)?,
                        holder_id: row.get(1)?,
                        code: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(voucher)
    }

    pub fn find_extra(&self, code: &str, today: NaiveDate) -> Result<Option<ExtraVoucher>> {
        let conn = self.conn.lock().unwrap();
        let voucher = conn
            .query_row(
                "SELECT id, holder_id, code, meal_type_id, valid_on, used_at
                 FROM extra_vouchers
                 WHERE code = ?1 AND valid_on >= ?2",
                params![code, today.to_string()],
                |row| {
                    Ok(ExtraVoucher {
                        id: row.get(0)?,
                        holder_id: row.get(1)?,
                        code: row.get(2)?,
                        meal_type_id: row.get(3)?,
                        valid_on: parse_date(4, row.get::<_, String>(4)?)?,
                        used_at: row
                            .get::<_, Option<String>>(5)?
                            .map(|s| parse_ts(5, s))
                            .transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(voucher)
    }

    // ---- ledger reads ----

    pub fn usage_count_on(&self, holder_id: i64, day: NaiveDate) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM usage_records WHERE holder_id = ?1 AND redeemed_on = ?2",
            params![holder_id, day.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn last_redemption_on(
        &self,
        holder_id: i64,
        day: NaiveDate,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let last: Option<String> = conn
            .query_row(
                "SELECT redeemed_at FROM usage_records
                 WHERE holder_id = ?1 AND redeemed_on = ?2
                 ORDER BY redeemed_at DESC LIMIT 1",
                params![holder_id, day.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        last.map(|s| parse_ts(0, s))
            .transpose()
            .map_err(Into::into)
    }

    pub fn recent_usage(&self, limit: Option<usize>) -> Result<Vec<UsageRecord>> {
        let conn = self.conn.lock().unwrap();
        let query = if let Some(lim) = limit {
            format!(
                "SELECT id, holder_id, meal_type_id, variant, voucher_ref, redeemed_at
                 FROM usage_records ORDER BY redeemed_at DESC LIMIT {}",
                lim
            )
        } else {
            "SELECT id, holder_id, meal_type_id, variant, voucher_ref, redeemed_at
             FROM usage_records ORDER BY redeemed_at DESC"
                .to_string()
        };

        let mut stmt = conn.prepare(&query)?;
        let records = stmt
            .query_map([], |row| {
                let variant_str: String = row.get(3)?;
                let variant = variant_str.parse::<VoucherVariant>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?;

                Ok(UsageRecord {
                    id: row.get(0)?,
                    holder_id: row.get(1)?,
                    meal_type_id: row.get(2)?,
                    variant,
                    voucher_ref: row.get(4)?,
                    redeemed_at: parse_ts(5, row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn stats(&self, today: NaiveDate) -> Result<LedgerStats> {
        let conn = self.conn.lock().unwrap();

        let total: i64 =
            conn.query_row("SELECT COUNT(*) FROM usage_records", [], |row| row.get(0))?;

        let today_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM usage_records WHERE redeemed_on = ?1",
            [today.to_string()],
            |row| row.get(0),
        )?;

        let count_variant = |variant: &str| -> rusqlite::Result<i64> {
            conn.query_row(
                "SELECT COUNT(*) FROM usage_records WHERE variant = ?1",
                [variant],
                |row| row.get(0),
            )
        };

        let common = count_variant("common")?;
        let extra = count_variant("extra")?;
        let disposable = count_variant("disposable")?;

        let pending_extra: i64 = conn.query_row(
            "SELECT COUNT(*) FROM extra_vouchers WHERE used_at IS NULL AND valid_on >= ?1",
            [today.to_string()],
            |row| row.get(0),
        )?;

        let pending_disposable: i64 = conn.query_row(
            "SELECT COUNT(*) FROM disposable_vouchers WHERE used_at IS NULL AND expires_on >= ?1",
            [today.to_string()],
            |row| row.get(0),
        )?;

        Ok(LedgerStats {
            total_redemptions: total as usize,
            redemptions_today: today_count as usize,
            common_redemptions: common as usize,
            extra_redemptions: extra as usize,
            disposable_redemptions: disposable as usize,
            pending_extra: pending_extra as usize,
            pending_disposable: pending_disposable as usize,
        })
    }

    // ---- commits (authoritative, single transaction each) ----

    /// Commit a common-voucher redemption. The only write is the ledger
    /// insert; the unique index on (holder, meal type, day) arbitrates
    /// concurrent submissions.
    pub fn commit_common(
        &self,
        voucher_id: i64,
        holder_id: i64,
        meal_type_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO usage_records
             (holder_id, meal_type_id, variant, voucher_ref, redeemed_on, redeemed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                holder_id,
                meal_type_id,
                VoucherVariant::Common.to_string(),
                voucher_id,
                now.date_naive().to_string(),
                now.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {
                tx.commit()?;
                Ok(CommitOutcome::Committed)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Ok(CommitOutcome::LedgerConflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn commit_extra(
        &self,
        voucher_id: i64,
        holder_id: i64,
        meal_type_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        self.commit_single_use(
            "extra_vouchers",
            VoucherVariant::Extra,
            voucher_id,
            Some(holder_id),
            meal_type_id,
            now,
        )
    }

    pub fn commit_disposable(
        &self,
        voucher_id: i64,
        meal_type_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        self.commit_single_use(
            "disposable_vouchers",
            VoucherVariant::Disposable,
            voucher_id,
            None,
            meal_type_id,
            now,
        )
    }

    /// Conditional update first: "set used_at where still unused" is the sole
    /// source of truth for consumption. Zero affected rows means a concurrent
    /// request won; the transaction is dropped without compensating writes.
    /// The ledger insert rides in the same transaction, so the voucher can
    /// never end up used without a matching ledger entry. A unique-index
    /// violation on that insert (holder already ate this meal today via
    /// another voucher) rolls back the `used_at` write and is reported as a
    /// conflict, never as a fault.
    fn commit_single_use(
        &self,
        table: &str,
        variant: VoucherVariant,
        voucher_id: i64,
        holder_id: Option<i64>,
        meal_type_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            &format!(
                "UPDATE {} SET used_at = ?1 WHERE id = ?2 AND used_at IS NULL",
                table
            ),
            params![now.to_rfc3339(), voucher_id],
        )?;

        if updated == 0 {
            return Ok(CommitOutcome::AlreadyConsumed);
        }

        let inserted = tx.execute(
            "INSERT INTO usage_records
             (holder_id, meal_type_id, variant, voucher_ref, redeemed_on, redeemed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                holder_id,
                meal_type_id,
                variant.to_string(),
                voucher_id,
                now.date_naive().to_string(),
                now.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {
                tx.commit()?;
                Ok(CommitOutcome::Committed)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Ok(CommitOutcome::LedgerConflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ---- admin generation workflow (external in production, used by the
    //      seed command and tests) ----

    pub fn insert_company(&self, name: &str, active: bool) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO companies (name, active) VALUES (?1, ?2)",
            params![name, active],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_shift(&self, name: &str, start_min: u32, end_min: u32, active: bool) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO shifts (name, start_min, end_min, active) VALUES (?1, ?2, ?3, ?4)",
            params![name, start_min, end_min, active],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_meal_type(
        &self,
        name: &str,
        start_min: u32,
        end_min: u32,
        tolerance_min: u32,
        max_per_day: Option<u32>,
        active: bool,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO meal_types (name, start_min, end_min, tolerance_min, max_per_day, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, start_min, end_min, tolerance_min, max_per_day, active],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_holder(
        &self,
        name: &str,
        company_id: i64,
        shift_id: i64,
        suspended: bool,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO holders (name, company_id, shift_id, suspended)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, company_id, shift_id, suspended],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_common_voucher(&self, holder_id: i64, code: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO common_vouchers (holder_id, code) VALUES (?1, ?2)",
            params![holder_id, code],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_extra_voucher(
        &self,
        holder_id: i64,
        code: &str,
        meal_type_id: Option<i64>,
        valid_on: NaiveDate,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO extra_vouchers (holder_id, code, meal_type_id, valid_on)
             VALUES (?1, ?2, ?3, ?4)",
            params![holder_id, code, meal_type_id, valid_on.to_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_disposable_voucher(
        &self,
        code: &str,
        meal_type_id: Option<i64>,
        expires_on: NaiveDate,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO disposable_vouchers (code, meal_type_id, expires_on)
             VALUES (?1, ?2, ?3)",
            params![code, meal_type_id, expires_on.to_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LedgerStats {
    pub total_redemptions: usize,
    pub redemptions_today: usize,
    pub common_redemptions: usize,
    pub extra_redemptions: usize,
    pub disposable_redemptions: usize,
    pub pending_extra: usize,
    pub pending_disposable: usize,
}

fn parse_ts(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
        })
}

fn parse_date(idx: usize, s: String) -> rusqlite::Result<NaiveDate> {
    s.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}
