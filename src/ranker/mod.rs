pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::incident::IncidentRequest;
use crate::ranker::queue::PersistenceQueue;
use crate::recommendations::RecommendationBatch;
use crate::scoring::model::score_unit;
use crate::scoring::{ScoredCandidate, ScoringTables};
use crate::units::{Unit, UnitRepository};

/// Number of candidates returned per request unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_REPOSITORY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RankerSettings {
    pub top_k: usize,
    pub repository_timeout: Duration,
}

impl Default for RankerSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            repository_timeout: DEFAULT_REPOSITORY_TIMEOUT,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RankingError {
    #[error("non-finite distance computed for unit {unit_id}")]
    NonFiniteDistance { unit_id: String },
    #[error("non-finite score computed for unit {unit_id}")]
    NonFiniteScore { unit_id: String },
}

/// Turns one incident request into a ranked shortlist of units.
#[derive(Clone)]
pub struct Recommender {
    tables: Arc<ScoringTables>,
    units: Arc<dyn UnitRepository>,
    queue: PersistenceQueue,
    settings: RankerSettings,
}

impl Recommender {
    pub fn new(
        tables: Arc<ScoringTables>,
        units: Arc<dyn UnitRepository>,
        queue: PersistenceQueue,
        settings: RankerSettings,
    ) -> Self {
        Self {
            tables,
            units,
            queue,
            settings,
        }
    }

    pub fn settings(&self) -> &RankerSettings {
        &self.settings
    }

    /// Ranks the available pool for `request`. When the request names an
    /// incident, the shortlist is queued for storage after ranking succeeds;
    /// storage never affects the returned result.
    pub async fn recommend(
        &self,
        request: &IncidentRequest,
    ) -> Result<Vec<ScoredCandidate>, RankingError> {
        let pool = self.fetch_pool().await;
        let ranked = rank_candidates(&self.tables, &pool, request, self.settings.top_k)?;
        debug!(
            incident_type = %request.incident_type,
            priority = request.priority,
            pool = pool.len(),
            returned = ranked.len(),
            "ranked dispatch candidates"
        );

        if let Some(incident_id) = request.persistence_id() {
            self.queue
                .enqueue(RecommendationBatch::pending(incident_id, ranked.clone()));
        }
        Ok(ranked)
    }

    async fn fetch_pool(&self) -> Vec<Unit> {
        let timeout = self.settings.repository_timeout;
        match tokio::time::timeout(timeout, self.units.available_units()).await {
            Ok(Ok(units)) => units,
            Ok(Err(err)) => {
                warn!("failed fetching available units, treating pool as empty: {err:#}");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out fetching available units, treating pool as empty"
                );
                Vec::new()
            }
        }
    }
}

/// Scores every unassigned unit in `pool` and keeps the best `top_k`.
/// Equal scores keep their pool order.
pub fn rank_candidates(
    tables: &ScoringTables,
    pool: &[Unit],
    request: &IncidentRequest,
    top_k: usize,
) -> Result<Vec<ScoredCandidate>, RankingError> {
    let mut scored = Vec::with_capacity(pool.len());
    for unit in pool.iter().filter(|unit| !request.is_assigned(&unit.id)) {
        let candidate = score_unit(
            tables,
            unit,
            request.location,
            &request.incident_type,
            request.priority,
        );
        if !candidate.distance.is_finite() {
            return Err(RankingError::NonFiniteDistance {
                unit_id: candidate.unit_id,
            });
        }
        if !candidate.score.is_finite() {
            return Err(RankingError::NonFiniteScore {
                unit_id: candidate.unit_id,
            });
        }
        scored.push(candidate);
    }

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    Ok(scored)
}
