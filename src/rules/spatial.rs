//! Spatial pre-filtering for rule evaluation.
//!
//! Two composed layers: each `latlongring` rule gets a precomputed lat/lon
//! bounding box, and the boxes are indexed into a uniform grid keyed by
//! `(floor(lat/cell), floor(lon/cell))`. Rules without a ring match
//! everywhere and are always candidates. Contract: the pre-filter never
//! removes a rule that would otherwise match.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::geometry::nm_to_lat_lon_offsets;
use crate::rules::config::Rule;

/// (min_lat, max_lat, min_lon, max_lon)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

#[derive(Debug)]
pub struct SpatialIndex {
    /// Grid cell -> indices of ring rules whose bbox intersects the cell.
    grid: HashMap<(i32, i32), Vec<usize>>,
    /// Rules with no latlongring: candidates for every position.
    everywhere: Vec<usize>,
    cell_deg: f64,
    enabled: bool,
    rule_count: usize,
}

impl SpatialIndex {
    /// Build the index over the rule list. With `enabled` false every rule is
    /// a candidate for every position (the linear path).
    pub fn build(rules: &[Rule], cell_deg: f64, enabled: bool) -> SpatialIndex {
        let mut grid: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        let mut everywhere = Vec::new();
        let mut ring_count = 0usize;

        for (idx, rule) in rules.iter().enumerate() {
            let Some(ring) = (enabled)
                .then_some(rule.conditions.latlongring.as_ref())
                .flatten()
            else {
                everywhere.push(idx);
                continue;
            };
            ring_count += 1;

            let (lat_off, lon_off) = nm_to_lat_lon_offsets(ring.radius_nm, ring.lat);
            let bbox = BoundingBox {
                min_lat: ring.lat - lat_off,
                max_lat: ring.lat + lat_off,
                min_lon: ring.lon - lon_off,
                max_lon: ring.lon + lon_off,
            };

            let min_cell_lat = (bbox.min_lat / cell_deg).floor() as i32;
            let max_cell_lat = (bbox.max_lat / cell_deg).ceil() as i32;
            let min_cell_lon = (bbox.min_lon / cell_deg).floor() as i32;
            let max_cell_lon = (bbox.max_lon / cell_deg).ceil() as i32;

            for cell_lat in min_cell_lat..=max_cell_lat {
                for cell_lon in min_cell_lon..=max_cell_lon {
                    grid.entry((cell_lat, cell_lon)).or_default().push(idx);
                }
            }
        }

        if enabled && ring_count > 0 {
            info!(
                "built spatial grid: {} cells for {} ring rules ({}° cells)",
                grid.len(),
                ring_count,
                cell_deg
            );
        } else if enabled {
            debug!("spatial grid enabled but no latlongring rules found");
        }

        SpatialIndex {
            grid,
            everywhere,
            cell_deg,
            enabled,
            rule_count: rules.len(),
        }
    }

    /// Rule indices worth evaluating for a position, in rule order.
    pub fn candidates(&self, lat: f64, lon: f64) -> Vec<usize> {
        if !self.enabled {
            return (0..self.rule_count).collect();
        }

        let cell = (
            (lat / self.cell_deg).floor() as i32,
            (lon / self.cell_deg).floor() as i32,
        );
        let mut out = self.everywhere.clone();
        if let Some(ring_rules) = self.grid.get(&cell) {
            out.extend_from_slice(ring_rules);
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}
