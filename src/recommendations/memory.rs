use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::recommendations::{RecommendationBatch, RecommendationStore, StoredBatch};

#[derive(Debug, Default)]
pub struct InMemoryRecommendationStore {
    batches: Mutex<Vec<StoredBatch>>,
}

impl InMemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn batches(&self) -> Vec<StoredBatch> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn insert_batch(&self, batch: &RecommendationBatch) -> Result<String> {
        let mut guard = self.batches.lock().await;
        let id = format!("batch-{}", guard.len() + 1);
        guard.push(StoredBatch {
            id: id.clone(),
            batch: batch.clone(),
            accepted_unit_id: None,
        });
        Ok(id)
    }
}
