//! Shop and merchant models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shop entity - a seller storefront, owned by exactly one merchant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: String,
    pub name: String,
    /// Owning merchant reference (String ID, required)
    pub merchant_id: String,
    /// Commission rate in percent, applied per invoice line
    pub commission_percent: Decimal,
    pub is_active: bool,
}

/// Merchant entity - the commission-bearing business owning one or more shops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}
