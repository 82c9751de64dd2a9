//! Result Writer: turns per-sensor value series into observations and
//! replaces the scheduler's earlier observations for the same window.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::{DataGapError, DataSource, Horizon, Observation, SensorId};
use crate::repo::{DataStore, SeriesReplacement};

/// Collects the series of a run and persists them in one atomic batch.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    source: DataSource,
    horizon: Horizon,
    belief_time: DateTime<Utc>,
    staged: Vec<SeriesReplacement>,
}

impl ResultWriter {
    /// `belief_time` defaults to now.
    pub fn new(source: DataSource, horizon: Horizon, belief_time: Option<DateTime<Utc>>) -> Self {
        Self {
            source,
            horizon,
            belief_time: belief_time.unwrap_or_else(Utc::now),
            staged: Vec::new(),
        }
    }

    /// Stage one series, one value per horizon slot. Staging the same sensor
    /// again replaces the earlier series.
    pub fn stage(&mut self, sensor: SensorId, values: &[f64]) -> Result<(), DataGapError> {
        if values.len() != self.horizon.len() {
            return Err(DataGapError::LengthMismatch {
                sensor,
                expected: self.horizon.len(),
                found: values.len(),
            });
        }
        let observations = values
            .iter()
            .enumerate()
            .map(|(slot, &value)| Observation {
                sensor_id: sensor,
                event_start: self.horizon.slot_start(slot),
                belief_time: self.belief_time,
                value,
                source: self.source.name.clone(),
            })
            .collect();
        let replacement = SeriesReplacement {
            sensor_id: sensor,
            start: self.horizon.start,
            end: self.horizon.end,
            source: self.source.clone(),
            observations,
        };
        match self.staged.iter_mut().find(|r| r.sensor_id == sensor) {
            Some(existing) => *existing = replacement,
            None => self.staged.push(replacement),
        }
        Ok(())
    }

    pub fn staged_sensors(&self) -> Vec<SensorId> {
        self.staged.iter().map(|r| r.sensor_id).collect()
    }

    /// Persist every staged series in one batch. Returns the number of observations written.
    pub async fn commit(self, store: &dyn DataStore) -> Result<usize> {
        if self.staged.is_empty() {
            return Ok(0);
        }
        let written = store.replace_observations(&self.staged).await?;
        info!(
            source = %self.source.name,
            sensors = self.staged.len(),
            observations = written,
            "scheduling results persisted"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryStore;
    use chrono::{Duration, TimeZone};

    fn horizon() -> Horizon {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Horizon::new(start, start + Duration::hours(3), Duration::hours(1)).unwrap()
    }

    #[tokio::test]
    async fn test_writing_twice_is_idempotent() {
        let store = InMemoryStore::new();
        let source = store.data_source("scheduler", "scheduling script").await.unwrap();
        let belief = horizon().start;

        for _ in 0..2 {
            let mut writer = ResultWriter::new(source.clone(), horizon(), Some(belief));
            writer.stage(11, &[1.0, 2.0, 3.0]).unwrap();
            writer.commit(&store).await.unwrap();
        }

        let stored = store.observations(11);
        assert_eq!(stored.len(), 3);
        assert_eq!(stored.iter().map(|o| o.value).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
        assert_eq!(stored[2].event_start, horizon().start + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_other_sources_are_untouched() {
        let store = InMemoryStore::new();
        store.insert_observations([Observation {
            sensor_id: 11,
            event_start: horizon().start,
            belief_time: horizon().start,
            value: 42.0,
            source: "thesis".into(),
        }]);
        let source = store.data_source("scheduler", "scheduling script").await.unwrap();
        let mut writer = ResultWriter::new(source, horizon(), None);
        writer.stage(11, &[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(writer.commit(&store).await.unwrap(), 3);
        assert_eq!(store.observations(11).len(), 4);
    }

    #[test]
    fn test_stage_rejects_wrong_length() {
        let source = DataSource {
            id: 1,
            name: "scheduler".into(),
            source_type: "scheduling script".into(),
        };
        let mut writer = ResultWriter::new(source, horizon(), None);
        assert!(matches!(
            writer.stage(11, &[1.0]),
            Err(DataGapError::LengthMismatch { expected: 3, found: 1, .. })
        ));
        writer.stage(11, &[1.0, 1.0, 1.0]).unwrap();
        writer.stage(11, &[2.0, 2.0, 2.0]).unwrap();
        assert_eq!(writer.staged_sensors(), vec![11]);
    }
}
