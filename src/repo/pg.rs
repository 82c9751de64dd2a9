#![cfg(feature = "db")]
//! Postgres-backed `DataStore`.
//!
//! Tables: `network`, `network_network_resource`, `network_resource`,
//! `generic_asset`, `sensor`, `data_source` and `timed_belief`. Integer type
//! ids are resolved to kinds here, once, and never leave this module.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use tracing::debug;

use super::{DataStore, SeriesReplacement};
use crate::domain::{
    Asset, AssetId, AssetKind, Attributes, DataSource, Network, NetworkResource, Observation, ResourceId,
    ResourceKind, Sensor, SensorId,
};
use crate::topology::TopologyError;

#[derive(Debug, sqlx::FromRow)]
struct NetworkRow {
    id: i64,
    name: String,
    account_id: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: i64,
    name: String,
    network_resource_type_id: i32,
    attributes: Option<Json<Map<String, Value>>>,
}

#[derive(Debug, sqlx::FromRow)]
struct AssetRow {
    id: i64,
    name: String,
    generic_asset_type_id: i32,
    attributes: Option<Json<Map<String, Value>>>,
}

#[derive(Debug, sqlx::FromRow)]
struct SensorRow {
    id: i64,
    name: String,
    unit: String,
}

#[derive(Debug, sqlx::FromRow)]
struct BeliefRow {
    sensor_id: i64,
    event_start: DateTime<Utc>,
    belief_time: DateTime<Utc>,
    event_value: f64,
    source: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SourceRow {
    id: i64,
    name: String,
    #[sqlx(rename = "type")]
    source_type: String,
}

impl From<SourceRow> for DataSource {
    fn from(row: SourceRow) -> Self {
        DataSource {
            id: row.id,
            name: row.name,
            source_type: row.source_type,
        }
    }
}

fn attributes(raw: Option<Json<Map<String, Value>>>) -> Attributes {
    raw.map(|Json(map)| Attributes::from(map)).unwrap_or_default()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    async fn sensors(&self, asset: AssetId) -> Result<Vec<Sensor>> {
        let rows: Vec<SensorRow> =
            sqlx::query_as("SELECT id, name, unit FROM sensor WHERE generic_asset_id = $1 ORDER BY id")
                .bind(asset)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| Sensor {
                id: r.id,
                name: r.name,
                unit: r.unit,
            })
            .collect())
    }

    async fn asset_from_row(&self, row: AssetRow) -> Result<Asset> {
        let kind = AssetKind::from_type_id(row.generic_asset_type_id).ok_or(TopologyError::UnknownType {
            what: "asset",
            type_id: row.generic_asset_type_id,
        })?;
        Ok(Asset {
            id: row.id,
            name: row.name,
            kind,
            attributes: attributes(row.attributes),
            sensors: self.sensors(row.id).await?,
        })
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn network(&self, id: i64) -> Result<Option<Network>> {
        let Some(row): Option<NetworkRow> =
            sqlx::query_as("SELECT id, name, account_id FROM network WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };
        let resources: Vec<(i64,)> = sqlx::query_as(
            "SELECT network_resource_id FROM network_network_resource WHERE network_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(Network {
            id: row.id,
            name: row.name,
            account_id: row.account_id,
            resources: resources.into_iter().map(|(r,)| r).collect(),
        }))
    }

    async fn network_resource(&self, id: ResourceId) -> Result<Option<NetworkResource>> {
        let row: Option<ResourceRow> = sqlx::query_as(
            "SELECT id, name, network_resource_type_id, attributes FROM network_resource WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| -> Result<NetworkResource> {
            let kind = ResourceKind::from_type_id(r.network_resource_type_id).ok_or(TopologyError::UnknownType {
                what: "network resource",
                type_id: r.network_resource_type_id,
            })?;
            Ok(NetworkResource::new(r.id, r.name, kind, attributes(r.attributes)))
        })
        .transpose()
    }

    async fn asset(&self, id: AssetId) -> Result<Option<Asset>> {
        let row: Option<AssetRow> =
            sqlx::query_as("SELECT id, name, generic_asset_type_id, attributes FROM generic_asset WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => Ok(Some(self.asset_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn assets_of_kind(&self, kind: AssetKind) -> Result<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(
            "SELECT id, name, generic_asset_type_id, attributes FROM generic_asset \
             WHERE generic_asset_type_id = $1 ORDER BY id",
        )
        .bind(kind.type_id())
        .fetch_all(&self.pool)
        .await?;
        let mut assets = Vec::with_capacity(rows.len());
        for row in rows {
            assets.push(self.asset_from_row(row).await?);
        }
        Ok(assets)
    }

    async fn search_beliefs(
        &self,
        sensor: SensorId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<Vec<Observation>> {
        let rows: Vec<BeliefRow> = sqlx::query_as(
            r#"
            SELECT b.sensor_id, b.event_start, b.belief_time, b.event_value, s.name AS source
            FROM timed_belief b
            JOIN data_source s ON s.id = b.source_id
            WHERE b.sensor_id = $1 AND b.event_start >= $2 AND b.event_start < $3
              AND ($4::text IS NULL OR s.name = $4)
            ORDER BY b.event_start, b.belief_time
            "#,
        )
        .bind(sensor)
        .bind(start)
        .bind(end)
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Observation {
                sensor_id: r.sensor_id,
                event_start: r.event_start,
                belief_time: r.belief_time,
                value: r.event_value,
                source: r.source,
            })
            .collect())
    }

    async fn data_source(&self, name: &str, source_type: &str) -> Result<DataSource> {
        let existing: Option<SourceRow> =
            sqlx::query_as("SELECT id, name, type FROM data_source WHERE name = $1 AND type = $2")
                .bind(name)
                .bind(source_type)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(row) = existing {
            return Ok(row.into());
        }
        let created: SourceRow =
            sqlx::query_as("INSERT INTO data_source (name, type) VALUES ($1, $2) RETURNING id, name, type")
                .bind(name)
                .bind(source_type)
                .fetch_one(&self.pool)
                .await?;
        Ok(created.into())
    }

    async fn replace_observations(&self, batch: &[SeriesReplacement]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("Failed to start transaction")?;
        let mut inserted = 0;

        for replacement in batch {
            let removed = sqlx::query(
                "DELETE FROM timed_belief \
                 WHERE sensor_id = $1 AND source_id = $2 AND event_start >= $3 AND event_start < $4",
            )
            .bind(replacement.sensor_id)
            .bind(replacement.source.id)
            .bind(replacement.start)
            .bind(replacement.end)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            for obs in &replacement.observations {
                if obs.sensor_id != replacement.sensor_id {
                    return Err(anyhow!(
                        "observation for sensor {} in replacement for sensor {}",
                        obs.sensor_id,
                        replacement.sensor_id
                    ));
                }
                sqlx::query(
                    "INSERT INTO timed_belief (sensor_id, source_id, event_start, belief_time, event_value) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(obs.sensor_id)
                .bind(replacement.source.id)
                .bind(obs.event_start)
                .bind(obs.belief_time)
                .bind(obs.value)
                .execute(&mut *tx)
                .await?;
            }
            inserted += replacement.observations.len();
            debug!(sensor = replacement.sensor_id, removed, added = replacement.observations.len(), "replaced beliefs");
        }

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(inserted)
    }
}
