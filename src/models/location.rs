use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(AppError::Validation(format!(
                "latitude must be within [-90, 90], got {}",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(AppError::Validation(format!(
                "longitude must be within [-180, 180], got {}",
                self.lng
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Telemetry {
    /// Percent, 0..=100.
    pub battery_level: Option<u8>,
    pub speed_kmh: f64,
    /// Degrees clockwise from north, 0..=360.
    pub heading_deg: f64,
    pub accuracy_m: f64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            battery_level: None,
            speed_kmh: 0.0,
            heading_deg: 0.0,
            accuracy_m: 10.0,
        }
    }
}

impl Telemetry {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(level) = self.battery_level {
            if level > 100 {
                return Err(AppError::Validation(format!(
                    "battery_level must be within [0, 100], got {level}"
                )));
            }
        }
        if !self.speed_kmh.is_finite() || self.speed_kmh < 0.0 {
            return Err(AppError::Validation("speed_kmh must be >= 0".to_string()));
        }
        if !self.heading_deg.is_finite() || !(0.0..=360.0).contains(&self.heading_deg) {
            return Err(AppError::Validation(
                "heading_deg must be within [0, 360]".to_string(),
            ));
        }
        if !self.accuracy_m.is_finite() || self.accuracy_m < 0.0 {
            return Err(AppError::Validation("accuracy_m must be >= 0".to_string()));
        }
        Ok(())
    }
}

fn default_online() -> bool {
    true
}

/// One telemetry push from a rider. Replaces every field it carries on the
/// stored row; omitted telemetry falls back to defaults, not prior values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub location: GeoPoint,
    #[serde(default = "default_online")]
    pub is_online: bool,
    #[serde(default)]
    pub telemetry: Telemetry,
}

impl LocationUpdate {
    pub fn online(location: GeoPoint) -> Self {
        Self {
            location,
            is_online: true,
            telemetry: Telemetry::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.location.validate()?;
        self.telemetry.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderLocation {
    pub rider_id: Uuid,
    pub location: GeoPoint,
    pub is_online: bool,
    pub current_order_id: Option<Uuid>,
    pub telemetry: Telemetry,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RiderLocation {
    pub fn from_update(rider_id: Uuid, update: LocationUpdate, now: DateTime<Utc>) -> Self {
        Self {
            rider_id,
            location: update.location,
            is_online: update.is_online,
            current_order_id: None,
            telemetry: update.telemetry,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full replace of position, presence and telemetry. `current_order_id`
    /// belongs to dispatch and is left alone.
    pub fn apply(&mut self, update: LocationUpdate, now: DateTime<Utc>) {
        self.location = update.location;
        self.is_online = update.is_online;
        self.telemetry = update.telemetry;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyLocation {
    pub location: RiderLocation,
    pub distance_m: f64,
}
