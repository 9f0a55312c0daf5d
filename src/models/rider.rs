use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::RiderLocation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rider {
    pub id: Uuid,
    pub user_id: Uuid,
    pub is_available: bool,
    pub last_assigned: Option<DateTime<Utc>>,
}

impl Rider {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            is_available: true,
            last_assigned: None,
        }
    }
}

/// A live position joined with its registry row.
#[derive(Debug, Clone, Serialize)]
pub struct RiderPresence {
    pub rider: Rider,
    pub location: RiderLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}
