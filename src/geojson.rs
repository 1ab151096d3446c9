//! GeoJSON rendering of vehicle positions.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::parser::PositionEntity;

/// Feature properties. `label` is omitted entirely when the feed has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// `[longitude, latitude]`
    Point { coordinates: [f64; 2] },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    pub properties: Properties,
    pub geometry: Geometry,
}

/// One point-in-time view of the whole fleet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl Feature {
    /// `None` for a positionless entity.
    pub fn from_position(entity: &PositionEntity) -> Option<Self> {
        let (lon, lat) = entity.coordinates()?;
        Some(Self {
            properties: Properties {
                id: entity.vehicle_id.clone(),
                label: entity.label.clone(),
            },
            geometry: Geometry::Point {
                coordinates: [lon, lat],
            },
        })
    }
}

impl FeatureCollection {
    pub fn to_bytes(&self) -> Result<Bytes, FeedError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Builds the collection for `entities`, dropping those without a position.
/// Feature order follows entity order.
pub fn to_feature_collection(entities: &[PositionEntity]) -> FeatureCollection {
    FeatureCollection {
        features: entities.iter().filter_map(Feature::from_position).collect(),
    }
}
