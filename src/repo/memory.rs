use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use super::{DataStore, SeriesReplacement};
use crate::domain::{
    Asset, AssetId, AssetKind, DataSource, Network, NetworkResource, Observation, ResourceId, SensorId,
};

/// Serializable contents of a store, used for demos and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub networks: Vec<Network>,
    pub resources: Vec<NetworkResource>,
    pub assets: Vec<Asset>,
    pub sources: Vec<DataSource>,
    pub observations: Vec<Observation>,
}

impl Fixture {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading fixture {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing fixture {}", path.display()))
    }
}

#[derive(Debug, Default)]
struct Inner {
    networks: BTreeMap<i64, Network>,
    resources: BTreeMap<ResourceId, NetworkResource>,
    assets: BTreeMap<AssetId, Asset>,
    sources: Vec<DataSource>,
    observations: Vec<Observation>,
    reject_writes: bool,
}

/// Process-local `DataStore`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            inner.networks = fixture.networks.into_iter().map(|n| (n.id, n)).collect();
            inner.resources = fixture.resources.into_iter().map(|r| (r.id, r)).collect();
            inner.assets = fixture.assets.into_iter().map(|a| (a.id, a)).collect();
            inner.sources = fixture.sources;
            inner.observations = fixture.observations;
        }
        store
    }

    pub fn insert_network(&self, network: Network) {
        self.inner.write().networks.insert(network.id, network);
    }

    pub fn insert_resource(&self, resource: NetworkResource) {
        self.inner.write().resources.insert(resource.id, resource);
    }

    pub fn insert_asset(&self, asset: Asset) {
        self.inner.write().assets.insert(asset.id, asset);
    }

    pub fn insert_observations(&self, observations: impl IntoIterator<Item = Observation>) {
        self.inner.write().observations.extend(observations);
    }

    /// All observations recorded for `sensor`, in insertion order.
    pub fn observations(&self, sensor: SensorId) -> Vec<Observation> {
        self.inner
            .read()
            .observations
            .iter()
            .filter(|o| o.sensor_id == sensor)
            .cloned()
            .collect()
    }

    pub fn observation_count(&self) -> usize {
        self.inner.read().observations.len()
    }

    /// Make every following `replace_observations` call fail.
    pub fn reject_writes(&self, reject: bool) {
        self.inner.write().reject_writes = reject;
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn network(&self, id: i64) -> Result<Option<Network>> {
        Ok(self.inner.read().networks.get(&id).cloned())
    }

    async fn network_resource(&self, id: ResourceId) -> Result<Option<NetworkResource>> {
        Ok(self.inner.read().resources.get(&id).cloned())
    }

    async fn asset(&self, id: AssetId) -> Result<Option<Asset>> {
        Ok(self.inner.read().assets.get(&id).cloned())
    }

    async fn assets_of_kind(&self, kind: AssetKind) -> Result<Vec<Asset>> {
        Ok(self
            .inner
            .read()
            .assets
            .values()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect())
    }

    async fn search_beliefs(
        &self,
        sensor: SensorId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<Vec<Observation>> {
        Ok(self
            .inner
            .read()
            .observations
            .iter()
            .filter(|o| o.sensor_id == sensor && o.event_start >= start && o.event_start < end)
            .filter(|o| source.map_or(true, |s| o.source == s))
            .cloned()
            .collect())
    }

    async fn data_source(&self, name: &str, source_type: &str) -> Result<DataSource> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner
            .sources
            .iter()
            .find(|s| s.name == name && s.source_type == source_type)
        {
            return Ok(existing.clone());
        }
        let source = DataSource {
            id: inner.sources.iter().map(|s| s.id).max().unwrap_or(0) + 1,
            name: name.to_string(),
            source_type: source_type.to_string(),
        };
        inner.sources.push(source.clone());
        Ok(source)
    }

    async fn replace_observations(&self, batch: &[SeriesReplacement]) -> Result<usize> {
        // One write guard for the whole batch: readers never see a partial replacement.
        let mut inner = self.inner.write();
        if inner.reject_writes {
            bail!("store is rejecting writes");
        }
        let mut inserted = 0;
        for replacement in batch {
            let before = inner.observations.len();
            inner.observations.retain(|o| {
                !(o.sensor_id == replacement.sensor_id
                    && o.source == replacement.source.name
                    && o.event_start >= replacement.start
                    && o.event_start < replacement.end)
            });
            debug!(
                sensor = replacement.sensor_id,
                removed = before - inner.observations.len(),
                added = replacement.observations.len(),
                "replacing observations"
            );
            inner.observations.extend(replacement.observations.iter().cloned());
            inserted += replacement.observations.len();
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    fn obs(sensor: SensorId, hour: i64, value: f64, source: &str) -> Observation {
        Observation {
            sensor_id: sensor,
            event_start: at(hour),
            belief_time: at(0),
            value,
            source: source.into(),
        }
    }

    #[tokio::test]
    async fn test_data_source_get_or_create() {
        let store = InMemoryStore::new();
        let a = store.data_source("scheduler", "script").await.unwrap();
        let b = store.data_source("scheduler", "script").await.unwrap();
        let c = store.data_source("thesis", "script").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_search_filters_window_and_source() {
        let store = InMemoryStore::new();
        store.insert_observations([obs(1, 0, 1.0, "a"), obs(1, 1, 2.0, "b"), obs(1, 5, 3.0, "a"), obs(2, 0, 4.0, "a")]);
        let found = store.search_beliefs(1, at(0), at(5), Some("a")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 1.0);
        assert_eq!(store.search_beliefs(1, at(0), at(6), None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_replace_only_touches_own_source_in_window() {
        let store = InMemoryStore::new();
        store.insert_observations([obs(1, 0, 1.0, "scheduler"), obs(1, 0, 9.0, "thesis"), obs(1, 4, 7.0, "scheduler")]);
        let source = store.data_source("scheduler", "script").await.unwrap();
        let batch = vec![SeriesReplacement {
            sensor_id: 1,
            start: at(0),
            end: at(2),
            source,
            observations: vec![obs(1, 0, 5.0, "scheduler"), obs(1, 1, 6.0, "scheduler")],
        }];
        assert_eq!(store.replace_observations(&batch).await.unwrap(), 2);

        let mut values: Vec<f64> = store.observations(1).iter().map(|o| o.value).collect();
        values.sort_by(f64::total_cmp);
        assert_eq!(values, vec![5.0, 6.0, 7.0, 9.0]);
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_store_untouched() {
        let store = InMemoryStore::new();
        store.insert_observations([obs(1, 0, 1.0, "scheduler")]);
        store.reject_writes(true);
        let source = store.data_source("scheduler", "script").await.unwrap();
        let batch = vec![SeriesReplacement {
            sensor_id: 1,
            start: at(0),
            end: at(1),
            source,
            observations: vec![],
        }];
        assert!(store.replace_observations(&batch).await.is_err());
        assert_eq!(store.observation_count(), 1);
    }
}
