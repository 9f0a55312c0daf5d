//! Uniform lat/lng grid used as the point-radius index for rider positions.
//!
//! Each cell holds the ids of riders whose last known position falls inside
//! it. A radius query computes the bounding box of the search circle, visits
//! only the cells it overlaps and returns their members as candidates; the
//! caller applies the exact great-circle filter. When the box degenerates
//! (it touches a pole or crosses the antimeridian) or would visit more cells
//! than are occupied, the query walks the occupied cells instead.

use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

use crate::geo::EARTH_RADIUS_M;
use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKey {
    row: i64,
    col: i64,
}

pub struct GridIndex {
    cell_degrees: f64,
    cells: DashMap<CellKey, HashSet<Uuid>>,
}

struct SearchWindow {
    rows: (i64, i64),
    cols: Option<(i64, i64)>,
}

impl SearchWindow {
    fn contains(&self, key: &CellKey) -> bool {
        let row_ok = key.row >= self.rows.0 && key.row <= self.rows.1;
        let col_ok = match self.cols {
            Some((min, max)) => key.col >= min && key.col <= max,
            None => true,
        };
        row_ok && col_ok
    }

    fn cell_count(&self) -> Option<u64> {
        let (min, max) = self.cols?;
        let rows = (self.rows.1 - self.rows.0 + 1) as u64;
        let cols = (max - min + 1) as u64;
        Some(rows.saturating_mul(cols))
    }
}

impl GridIndex {
    pub fn new(cell_degrees: f64) -> Self {
        Self {
            cell_degrees,
            cells: DashMap::new(),
        }
    }

    pub fn cell_for(&self, point: &GeoPoint) -> CellKey {
        CellKey {
            row: (point.lat / self.cell_degrees).floor() as i64,
            col: (point.lng / self.cell_degrees).floor() as i64,
        }
    }

    pub fn insert(&self, id: Uuid, cell: CellKey) {
        self.cells.entry(cell).or_default().insert(id);
    }

    pub fn remove(&self, id: Uuid, cell: CellKey) {
        if let Some(mut members) = self.cells.get_mut(&cell) {
            members.remove(&id);
        }
        self.cells.remove_if(&cell, |_, members| members.is_empty());
    }

    pub fn relocate(&self, id: Uuid, from: Option<CellKey>, to: Option<CellKey>) {
        if from == to {
            return;
        }
        if let Some(cell) = from {
            self.remove(id, cell);
        }
        if let Some(cell) = to {
            self.insert(id, cell);
        }
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Ids in every cell overlapping the circle. May include riders outside
    /// the radius, never misses one inside it.
    pub fn candidates(&self, center: &GeoPoint, radius_m: f64) -> Vec<Uuid> {
        let window = self.window(center, radius_m);
        let mut out = Vec::new();

        match window.cell_count() {
            Some(count) if count <= self.occupied_cells() as u64 => {
                let (col_min, col_max) = window.cols.unwrap_or_default();
                for row in window.rows.0..=window.rows.1 {
                    for col in col_min..=col_max {
                        if let Some(members) = self.cells.get(&CellKey { row, col }) {
                            out.extend(members.iter().copied());
                        }
                    }
                }
            }
            _ => {
                for entry in self.cells.iter() {
                    if window.contains(entry.key()) {
                        out.extend(entry.value().iter().copied());
                    }
                }
            }
        }

        out
    }

    fn window(&self, center: &GeoPoint, radius_m: f64) -> SearchWindow {
        let angular = (radius_m / EARTH_RADIUS_M).max(0.0);
        let lat = center.lat.to_radians();
        let min_lat = lat - angular;
        let max_lat = lat + angular;
        let half_pi = std::f64::consts::FRAC_PI_2;

        let row_of = |lat_rad: f64| (lat_rad.to_degrees() / self.cell_degrees).floor() as i64;
        let rows = (row_of(min_lat.max(-half_pi)), row_of(max_lat.min(half_pi)));

        if min_lat <= -half_pi || max_lat >= half_pi || angular >= std::f64::consts::PI {
            return SearchWindow { rows, cols: None };
        }

        let delta_lng = (angular.sin() / lat.cos()).min(1.0).asin().to_degrees();
        let min_lng = center.lng - delta_lng;
        let max_lng = center.lng + delta_lng;
        if min_lng < -180.0 || max_lng > 180.0 {
            return SearchWindow { rows, cols: None };
        }

        let col_of = |lng: f64| (lng / self.cell_degrees).floor() as i64;
        SearchWindow {
            rows,
            cols: Some((col_of(min_lng), col_of(max_lng))),
        }
    }
}
