pub mod memory;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scoring::ScoredCandidate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl Display for BatchStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown batch status: {0}")]
pub struct ParseBatchStatusError(pub String);

impl FromStr for BatchStatus {
    type Err = ParseBatchStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(ParseBatchStatusError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationBatch {
    pub incident_id: String,
    pub recommendations: Vec<ScoredCandidate>,
    pub timestamp: DateTime<Utc>,
    pub status: BatchStatus,
}

impl RecommendationBatch {
    pub fn pending(incident_id: impl Into<String>, recommendations: Vec<ScoredCandidate>) -> Self {
        Self {
            incident_id: incident_id.into(),
            recommendations,
            timestamp: Utc::now(),
            status: BatchStatus::Pending,
        }
    }
}

/// A batch as read back from a store, with its generated id. Only the
/// dispatcher workflow moves a stored batch out of `PENDING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBatch {
    pub id: String,
    #[serde(flatten)]
    pub batch: RecommendationBatch,
    #[serde(default)]
    pub accepted_unit_id: Option<String>,
}

impl StoredBatch {
    pub fn is_pending(&self) -> bool {
        self.batch.status == BatchStatus::Pending
    }
}

/// Sink for recommendation batches. Writes are best effort from the ranker's
/// point of view.
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Persists `batch` and returns its generated identifier.
    async fn insert_batch(&self, batch: &RecommendationBatch) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{BatchStatus, RecommendationBatch};

    #[test]
    fn new_batches_start_pending() {
        let batch = RecommendationBatch::pending("inc-1", Vec::new());
        assert_eq!(batch.status, BatchStatus::Pending);
        let json = serde_json::to_value(&batch).expect("serializable");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["incidentId"], "inc-1");
    }

    #[test]
    fn parses_batch_status() {
        assert_eq!(BatchStatus::from_str("accepted").ok(), Some(BatchStatus::Accepted));
        assert!(BatchStatus::from_str("maybe").is_err());
    }
}
