use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redemption: RedemptionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Knobs for the aggregate redemption rules. The daily ceiling and the
/// minimum inter-meal interval were inconsistent across the legacy kiosk
/// deployments (2 vs 3 meals, 1h vs 3h); both live here so the business rule
/// can be settled per site without a code change.
#[derive(Debug, Deserialize, Clone)]
pub struct RedemptionConfig {
    pub max_meals_per_day: u32,
    pub min_interval_minutes: i64,
    pub redeem_deadline_secs: u64,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            max_meals_per_day: 2,
            min_interval_minutes: 60,
            redeem_deadline_secs: 5,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let config = config::Config::builder()
            .set_default("database.path", "cantina.db")?
            .set_default("redemption.max_meals_per_day", 2_i64)?
            .set_default("redemption.min_interval_minutes", 60_i64)?
            .set_default("redemption.redeem_deadline_secs", 5_i64)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("CANTINA").separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
