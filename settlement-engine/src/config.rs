//! Engine configuration

use rust_decimal::Decimal;
use shared::settlement::MINIMUM_WITHDRAWAL;

/// Which field a coupon's user list is matched against
///
/// The legacy data model matched coupon users against the cart id in
/// one code path; kept configurable until the data is migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponMatch {
    UserId,
    CartId,
}

/// Engine configuration - all settlement tunables
///
/// # Environment variables
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | WORK_DIR | /var/lib/settlement | Working directory for the database |
/// | MINIMUM_WITHDRAWAL | 500 | Smallest withdrawal amount accepted |
/// | LOW_STOCK_THRESHOLD | 5 | Default low-stock notification threshold |
/// | COUPON_MATCH | user_id | Coupon eligibility join field (user_id or cart_id) |
///
/// # Example
///
/// ```ignore
/// WORK_DIR=/data/settlement MINIMUM_WITHDRAWAL=1000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Working directory holding the redb database file
    pub work_dir: String,
    /// Smallest withdrawal a merchant may request
    pub minimum_withdrawal: Decimal,
    /// Low-stock threshold applied to products created without one
    pub default_low_stock_threshold: u32,
    /// Coupon eligibility join field
    pub coupon_match: CouponMatch,
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            work_dir: std::env::var("WORK_DIR")
                .unwrap_or_else(|_| "/var/lib/settlement".into()),
            minimum_withdrawal: std::env::var("MINIMUM_WITHDRAWAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(MINIMUM_WITHDRAWAL),
            default_low_stock_threshold: std::env::var("LOW_STOCK_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            coupon_match: match std::env::var("COUPON_MATCH").as_deref() {
                Ok("cart_id") => CouponMatch::CartId,
                _ => CouponMatch::UserId,
            },
        }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.work_dir).join("settlement.redb")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
