use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub order_id: Uuid,
    pub rider_id: Uuid,
    /// Distance from rider to pickup when chosen by proximity search.
    pub distance_m: Option<f64>,
    /// Candidates tried before this one won, including lost races.
    pub attempts: u32,
    pub assigned_at: DateTime<Utc>,
}
