use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A monitored host. Created by ingestion; this crate only reads its identity
/// and writes the ownership columns.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: i64,
    pub domain: String,
    pub owner_org: Option<String>,
    pub has_dmarc_report: bool,
    pub ownership_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipAttributes {
    pub owner_org: String,
    pub has_dmarc_report: bool,
}
