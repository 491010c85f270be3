pub mod db;
pub mod models;

pub use db::{CommitOutcome, Database, LedgerStats};
pub use models::{
    Company, CommonVoucher, DisposableVoucher, ExtraVoucher, Holder, MealType, Shift, UsageRecord,
    VoucherVariant,
};
