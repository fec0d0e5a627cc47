//! Throttled courier location updates.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use courierlink_core::protocol::payload::LocationFix;

use crate::connection::ConnectionManager;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

struct Sent {
    lat: f64,
    lon: f64,
    at: Instant,
}

/// Sends a fix only after the device moved `min_distance_m` and at least
/// `min_interval` passed since the last one sent.
pub struct LocationPublisher {
    link: ConnectionManager,
    min_distance_m: f64,
    min_interval: Duration,
    last: Mutex<Option<Sent>>,
}

impl LocationPublisher {
    pub fn new(link: ConnectionManager) -> Self {
        Self::with_thresholds(link, 30.0, Duration::from_secs(1))
    }

    pub fn with_thresholds(link: ConnectionManager, min_distance_m: f64, min_interval: Duration) -> Self {
        Self {
            link,
            min_distance_m,
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Returns whether the fix was sent.
    pub fn publish(&self, order_id: &str, lat: f64, lon: f64) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = last.as_ref() {
            let moved = haversine_m((prev.lat, prev.lon), (lat, lon));
            if moved < self.min_distance_m || now.duration_since(prev.at) < self.min_interval {
                return false;
            }
        }
        *last = Some(Sent { lat, lon, at: now });
        drop(last);

        let fix = LocationFix {
            lat,
            lon,
            timestamp: Some(Utc::now().timestamp_millis() as f64 / 1000.0),
        };
        self.link.push_location(order_id, fix);
        true
    }
}
