//! Address snapshot

use serde::{Deserialize, Serialize};

/// Shipping/billing address
///
/// Resolved from the address directory at order time and snapshotted
/// onto the order; later edits to the directory do not touch existing
/// orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub recipient: String,
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}
