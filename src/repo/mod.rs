//! Collaborator boundary: the persisted network, asset and time-series tables.
//!
//! The scheduler only reads resources and assets and only writes
//! observations, always through one atomic `replace_observations` call.

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::{Fixture, InMemoryStore};

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DbConfig;

use crate::domain::{
    Asset, AssetId, AssetKind, DataSource, Network, NetworkResource, Observation, ResourceId, SensorId,
};

/// New observations for one sensor that supersede everything the same source
/// holds for that sensor in `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesReplacement {
    pub sensor_id: SensorId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: DataSource,
    pub observations: Vec<Observation>,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn network(&self, id: i64) -> Result<Option<Network>>;

    async fn network_resource(&self, id: ResourceId) -> Result<Option<NetworkResource>>;

    async fn asset(&self, id: AssetId) -> Result<Option<Asset>>;

    async fn assets_of_kind(&self, kind: AssetKind) -> Result<Vec<Asset>>;

    /// Beliefs about `sensor` with event start in `[start, end)`, optionally
    /// restricted to one source name.
    async fn search_beliefs(
        &self,
        sensor: SensorId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<Vec<Observation>>;

    /// Get or create the data source with this name and type.
    async fn data_source(&self, name: &str, source_type: &str) -> Result<DataSource>;

    /// Apply every replacement or none. Returns the number of inserted observations.
    async fn replace_observations(&self, batch: &[SeriesReplacement]) -> Result<usize>;
}

#[cfg(feature = "db")]
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Postgres when `db.url` is set and the `db` feature is built in, otherwise
/// the JSON fixture at `fixture`.
pub async fn open(db: &DbConfig, fixture: &Path) -> Result<Arc<dyn DataStore>> {
    if let Some(url) = &db.url {
        #[cfg(feature = "db")]
        {
            let max_connections = db.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
            info!(max_connections, "using postgres store");
            return Ok(Arc::new(pg::PgStore::connect(url, max_connections).await?));
        }
        #[cfg(not(feature = "db"))]
        tracing::warn!(url = %url, "db.url is set but postgres support is not built in, using the fixture");
    }
    info!(fixture = %fixture.display(), "using in-memory fixture store");
    let fixture = Fixture::from_json_file(fixture)?;
    Ok(Arc::new(InMemoryStore::from_fixture(fixture)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_without_url_loads_fixture() {
        let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/two_bus.json");
        let store = open(&DbConfig::default(), &fixture).await.unwrap();
        assert!(store.network(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_reports_missing_fixture() {
        let err = open(&DbConfig::default(), Path::new("demos/does_not_exist.json")).await;
        assert!(err.is_err());
    }
}
