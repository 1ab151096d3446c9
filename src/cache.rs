//! Snapshot cache in front of the upstream feed.
//!
//! Holds the single current GeoJSON snapshot. A snapshot younger than
//! [`FRESHNESS_WINDOW`] is served without touching the upstream; otherwise a
//! refresh runs fetch -> decode -> transform -> serialize. At most one refresh
//! is in flight at a time: callers that miss while one is running await the
//! same shared result. The refresh runs in its own task, so it completes even
//! when every waiter has gone away.
//!
//! A failed refresh leaves the current snapshot untouched and hands the error
//! to every waiter. There is no stale fallback and no retry; the next caller
//! starts a new refresh.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::fetch::FeedSource;
use crate::geojson::to_feature_collection;
use crate::parser::decode_positions;

pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(1);

/// One serialized `FeatureCollection` and the moment it was captured.
#[derive(Debug)]
pub struct Snapshot {
    pub captured_at: Instant,
    pub captured_utc: DateTime<Utc>,
    pub payload: Bytes,
    pub features: usize,
}

impl Snapshot {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.captured_at) <= FRESHNESS_WINDOW
    }
}

type Refresh = Shared<BoxFuture<'static, Result<Arc<Snapshot>, FeedError>>>;

struct Inner {
    source: Arc<dyn FeedSource>,
    current: RwLock<Option<Arc<Snapshot>>>,
    in_flight: Mutex<Option<Refresh>>,
}

/// Shared handle to the cache; clones refer to the same snapshot.
#[derive(Clone)]
pub struct SnapshotCache {
    inner: Arc<Inner>,
}

impl SnapshotCache {
    pub fn new(source: Arc<dyn FeedSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                current: RwLock::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// The serialized `FeatureCollection`, refreshed first if stale.
    pub async fn get(&self) -> Result<Bytes, FeedError> {
        Ok(self.snapshot().await?.payload.clone())
    }

    /// The current snapshot, refreshed first if stale or absent.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>, FeedError> {
        if let Some(snapshot) = self.fresh() {
            debug!(
                age_ms = snapshot.captured_at.elapsed().as_millis() as u64,
                "Serving cached snapshot"
            );
            return Ok(snapshot);
        }

        let refresh = {
            let mut in_flight = lock(&self.inner.in_flight);
            // A refresh may have landed between the check above and the lock.
            if let Some(snapshot) = self.fresh() {
                return Ok(snapshot);
            }
            match in_flight.as_ref() {
                Some(refresh) => {
                    debug!("Joining in-flight refresh");
                    refresh.clone()
                }
                None => {
                    let refresh = self.start_refresh();
                    *in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    /// The last installed snapshot, fresh or not, without refreshing.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        read(&self.inner.current).clone()
    }

    fn fresh(&self) -> Option<Arc<Snapshot>> {
        let now = Instant::now();
        read(&self.inner.current)
            .as_ref()
            .filter(|s| s.is_fresh(now))
            .cloned()
    }

    fn start_refresh(&self) -> Refresh {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            // Dropped after the install below (or while unwinding), so a
            // caller that finds no refresh in flight also finds its snapshot.
            let _slot = ClearInFlight(inner.clone());
            let result = refresh(inner.source.as_ref()).await;
            if let Ok(snapshot) = &result {
                *write(&inner.current) = Some(snapshot.clone());
            }
            result
        });

        task.map(|joined| {
            joined.unwrap_or_else(|e| Err(FeedError::RefreshAborted(e.to_string())))
        })
        .boxed()
        .shared()
    }
}

struct ClearInFlight(Arc<Inner>);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        lock(&self.0.in_flight).take();
    }
}

#[tracing::instrument(skip(source))]
async fn refresh(source: &dyn FeedSource) -> Result<Arc<Snapshot>, FeedError> {
    let result = async {
        let bytes = source.fetch().await?;
        let entities = decode_positions(&bytes)?;
        let collection = to_feature_collection(&entities);
        let payload = collection.to_bytes()?;
        Ok::<_, FeedError>(Snapshot {
            captured_at: Instant::now(),
            captured_utc: Utc::now(),
            payload,
            features: collection.features.len(),
        })
    }
    .await;

    match result {
        Ok(snapshot) => {
            info!(
                captured_at = %snapshot.captured_utc,
                features = snapshot.features,
                bytes = snapshot.payload.len(),
                "Snapshot refreshed"
            );
            Ok(Arc::new(snapshot))
        }
        Err(e) => {
            warn!(error = %e, "Snapshot refresh failed");
            Err(e)
        }
    }
}

// Poisoning only means another task panicked mid-update of a plain value that
// is always written whole, so the inner value is still usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}
