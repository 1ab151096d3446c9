//! Protobuf parser for GTFS Realtime vehicle-position feeds.

use prost::Message;
use tracing::debug;

use crate::error::FeedError;
use crate::gtfs_rt::{FeedEntity, FeedMessage};

/// One vehicle as reported by the upstream feed.
///
/// `longitude`/`latitude` are either both present or both absent; an entity
/// without them is positionless and never reaches the GeoJSON output.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionEntity {
    pub vehicle_id: String,
    pub label: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

impl PositionEntity {
    /// `(longitude, latitude)` when the vehicle reported a position.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }

    fn from_entity(entity: &FeedEntity) -> Option<Self> {
        if entity.is_deleted() {
            return None;
        }
        let vehicle = entity.vehicle.as_ref()?;
        let descriptor = vehicle.vehicle.as_ref();
        let vehicle_id = descriptor
            .and_then(|d| d.id.clone())
            .unwrap_or_else(|| entity.id.clone());
        let label = descriptor.and_then(|d| d.label.clone());
        let position = vehicle.position.as_ref();

        Some(Self {
            vehicle_id,
            label,
            longitude: position.map(|p| f64::from(p.longitude)),
            latitude: position.map(|p| f64::from(p.latitude)),
        })
    }
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`FeedError::Decode`] if the bytes are not valid protobuf for a
/// `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, FeedError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Decodes `bytes` and extracts one [`PositionEntity`] per vehicle entity, in
/// upstream order.
///
/// Deleted entities and entities without a vehicle position message are
/// skipped. The vehicle id falls back to the entity id when the feed omits the
/// vehicle descriptor.
pub fn decode_positions(bytes: &[u8]) -> Result<Vec<PositionEntity>, FeedError> {
    let feed = parse_feed(bytes)?;
    debug!(
        header_timestamp = feed.header.timestamp,
        entity_count = feed.entity.len(),
        "Feed parsed"
    );
    Ok(feed.entity.iter().filter_map(PositionEntity::from_entity).collect())
}
