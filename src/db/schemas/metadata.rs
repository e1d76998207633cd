//! Common metadata for all documents
//!
//! Tracks creation, update, and soft deletion timestamps.

use bson::DateTime;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Common metadata for all documents
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Creation time, falling back to now for legacy documents
    pub fn created(&self) -> chrono::DateTime<Utc> {
        self.created_at.map(|d| d.to_chrono()).unwrap_or_else(Utc::now)
    }

    /// Last update time, falling back to the creation time
    pub fn updated(&self) -> chrono::DateTime<Utc> {
        self.updated_at
            .map(|d| d.to_chrono())
            .unwrap_or_else(|| self.created())
    }
}
