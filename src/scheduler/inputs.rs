//! Resolving a request's identifiers into records and baseline curves.

use tracing::{debug, warn};

use super::SchedulingError;
use crate::domain::{
    align_to_horizon, Asset, AssetId, AssetKind, Horizon, NetworkResource, Quantity, ResourceId, ResourceKind,
    ResourceSelection,
};
use crate::power_flow::DeviceCurves;
use crate::repo::DataStore;
use crate::topology::{ElementRecord, Topology, TopologyError, TopologyRecords};

/// Records for one run plus the assets behind asset-backed external grids.
#[derive(Debug, Clone, Default)]
pub struct RunRecords {
    pub topology: TopologyRecords,
    /// Aligned with `topology.external_grids`.
    pub external_grid_assets: Vec<Option<Asset>>,
}

async fn resource(
    store: &dyn DataStore,
    id: ResourceId,
    expected: ResourceKind,
) -> Result<NetworkResource, SchedulingError> {
    let resource = store
        .network_resource(id)
        .await?
        .ok_or_else(|| TopologyError::NotFound {
            kind: expected.to_string(),
            id,
        })?;
    if resource.kind != expected {
        return Err(TopologyError::WrongKind {
            element: format!("resource {id}"),
            expected: expected.to_string(),
            found: resource.kind.to_string(),
        }
        .into());
    }
    Ok(resource)
}

async fn asset(store: &dyn DataStore, id: AssetId, expected: AssetKind) -> Result<Asset, SchedulingError> {
    let asset = store.asset(id).await?.ok_or_else(|| TopologyError::NotFound {
        kind: expected.to_string(),
        id,
    })?;
    if asset.kind != expected {
        return Err(TopologyError::WrongKind {
            element: format!("asset {id}"),
            expected: expected.to_string(),
            found: asset.kind.to_string(),
        }
        .into());
    }
    Ok(asset)
}

async fn resources(
    store: &dyn DataStore,
    ids: &[ResourceId],
    kind: ResourceKind,
) -> Result<Vec<ElementRecord>, SchedulingError> {
    let mut records = Vec::with_capacity(ids.len());
    for &id in ids {
        records.push(ElementRecord::from(&resource(store, id, kind).await?));
    }
    Ok(records)
}

async fn assets(store: &dyn DataStore, ids: &[AssetId], kind: AssetKind) -> Result<Vec<Asset>, SchedulingError> {
    let mut out = Vec::with_capacity(ids.len());
    for &id in ids {
        out.push(asset(store, id, kind).await?);
    }
    Ok(out)
}

/// Fetch every record named by the selection, in selection order.
///
/// External grids resolve as network resources first and fall back to
/// assets. With no loads named, every load asset attached to one of the
/// selected buses is used.
pub async fn fetch_records(
    store: &dyn DataStore,
    selection: &ResourceSelection,
) -> Result<RunRecords, SchedulingError> {
    let mut external_grids = Vec::with_capacity(selection.external_grids.len());
    let mut external_grid_assets = Vec::with_capacity(selection.external_grids.len());
    for &id in &selection.external_grids {
        match store.network_resource(id).await? {
            Some(r) if r.kind == ResourceKind::ExternalGrid => {
                external_grids.push(ElementRecord::from(&r));
                external_grid_assets.push(None);
            }
            _ => {
                let a = asset(store, id, AssetKind::ExternalGrid).await?;
                external_grids.push(ElementRecord::from(&a));
                external_grid_assets.push(Some(a));
            }
        }
    }

    let loads = if selection.loads.is_empty() {
        let discovered: Vec<Asset> = store
            .assets_of_kind(AssetKind::Load)
            .await?
            .into_iter()
            .filter(|a| a.bus().is_some_and(|bus| selection.buses.contains(&bus)))
            .collect();
        debug!(count = discovered.len(), "discovered loads on selected buses");
        discovered
    } else {
        assets(store, &selection.loads, AssetKind::Load).await?
    };

    Ok(RunRecords {
        topology: TopologyRecords {
            buses: resources(store, &selection.buses, ResourceKind::Bus).await?,
            lines: resources(store, &selection.lines, ResourceKind::Line).await?,
            transformers: resources(store, &selection.transformers, ResourceKind::Transformer).await?,
            shunts: resources(store, &selection.shunts, ResourceKind::Shunt).await?,
            external_grids,
            batteries: assets(store, &selection.batteries, AssetKind::Battery).await?,
            loads,
            pvs: assets(store, &selection.pvs, AssetKind::Pv).await?,
        },
        external_grid_assets,
    })
}

/// Aligned series for `asset`'s `quantity` sensor, `None` when it has no such sensor.
async fn curve(
    store: &dyn DataStore,
    asset: &Asset,
    quantity: Quantity,
    horizon: &Horizon,
    source: Option<&str>,
) -> Result<Option<Vec<f64>>, SchedulingError> {
    let Some(sensor) = asset.sensor_for(quantity) else {
        warn!(asset = asset.id, %quantity, "no sensor, using a zero curve");
        return Ok(None);
    };
    let beliefs = store
        .search_beliefs(sensor.id, horizon.start, horizon.end, source)
        .await?;
    Ok(Some(align_to_horizon(sensor.id, horizon, &beliefs)?))
}

/// Baseline load P/Q and PV curves for the topology's devices.
pub async fn fetch_baselines(
    store: &dyn DataStore,
    records: &TopologyRecords,
    topology: &Topology,
    horizon: &Horizon,
    source: Option<&str>,
) -> Result<DeviceCurves, SchedulingError> {
    let len = horizon.len();
    let mut curves = DeviceCurves::zeros(topology, len);
    for (i, load) in records.loads.iter().enumerate() {
        if let Some(p) = curve(store, load, Quantity::ActivePower, horizon, source).await? {
            curves.load_p[i] = p;
        }
        if let Some(q) = curve(store, load, Quantity::ReactivePower, horizon, source).await? {
            curves.load_q[i] = q;
        }
    }
    for (i, pv) in records.pvs.iter().enumerate() {
        if let Some(p) = curve(store, pv, Quantity::ActivePower, horizon, source).await? {
            curves.pv_p[i] = p;
        }
    }
    Ok(curves)
}
