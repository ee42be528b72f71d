use anyhow::Result;
use async_trait::async_trait;

use crate::units::{Unit, UnitRepository};

/// Fixed unit pool held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUnitRepository {
    units: Vec<Unit>,
}

impl InMemoryUnitRepository {
    pub fn new(units: Vec<Unit>) -> Self {
        Self { units }
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }
}

#[async_trait]
impl UnitRepository for InMemoryUnitRepository {
    async fn available_units(&self) -> Result<Vec<Unit>> {
        Ok(self
            .units
            .iter()
            .filter(|unit| unit.is_available())
            .cloned()
            .collect())
    }
}
