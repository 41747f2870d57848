//! Named geographic regions with altitude and heading constraints.
//!
//! A region layer is one independent set of regions (typically converted from
//! one chart file by external tooling); a flight occupies at most one region
//! per layer. The core only ever asks a layer `contains(...)`; everything
//! upstream of that — KML conversion, geodesic cleanup — lives outside this
//! crate. Region sets are defined programmatically or loaded from the JSON
//! interchange format below.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single region: a polygon footprint plus inclusive altitude bounds and a
/// heading window. A heading window with end < start wraps through north.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    /// Vertices as (lon, lat) pairs; implicitly closed.
    pub polygon: Vec<(f64, f64)>,
    pub min_alt: i32,
    pub max_alt: i32,
    #[serde(default)]
    pub start_hdg: i32,
    #[serde(default = "default_end_hdg")]
    pub end_hdg: i32,
}

fn default_end_hdg() -> i32 {
    360
}

/// One region layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionSet {
    pub regions: Vec<Region>,
}

impl RegionSet {
    pub fn new(regions: Vec<Region>) -> Self {
        if regions.is_empty() {
            warn!("region layer configured with no regions");
        }
        Self { regions }
    }

    /// Load a layer from the JSON interchange format:
    /// `{"regions": [{"name": ..., "polygon": [[lon, lat], ...], ...}]}`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read region file {}", path.display()))?;
        let set: RegionSet = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse region file {}", path.display()))?;
        if set.regions.is_empty() {
            warn!("no regions found in {}", path.display());
        }
        Ok(set)
    }

    /// Index of the first region containing the given position, or None.
    pub fn contains(&self, lat: f64, lon: f64, heading: f64, alt: i32) -> Option<usize> {
        self.regions.iter().position(|r| {
            point_in_polygon(lon, lat, &r.polygon)
                && heading_in_window(heading, r.start_hdg, r.end_hdg)
                && alt >= r.min_alt
                && alt <= r.max_alt
        })
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.regions.get(index).map(|r| r.name.as_str())
    }
}

/// Is the given heading within the window? Wraps when end < start.
fn heading_in_window(hdg: f64, start: i32, end: i32) -> bool {
    let (start, end) = (start as f64, end as f64);
    if end < start {
        hdg >= start || hdg <= end
    } else {
        hdg >= start && hdg <= end
    }
}

/// Ray-casting point-in-polygon test over (lon, lat) vertices.
fn point_in_polygon(x: f64, y: f64, polygon: &[(f64, f64)]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Build a rectangular region for tests and quick configs.
pub fn rect_region(
    name: &str,
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
    min_alt: i32,
    max_alt: i32,
) -> Region {
    Region {
        name: name.to_string(),
        polygon: vec![
            (lon_min, lat_min),
            (lon_max, lat_min),
            (lon_max, lat_max),
            (lon_min, lat_max),
        ],
        min_alt,
        max_alt,
        start_hdg: 0,
        end_hdg: 360,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
    }

    #[test]
    fn test_point_inside_polygon() {
        assert!(point_in_polygon(0.5, 0.5, &unit_square()));
        assert!(!point_in_polygon(1.5, 0.5, &unit_square()));
        assert!(!point_in_polygon(0.5, -0.5, &unit_square()));
    }

    #[test]
    fn test_degenerate_polygon() {
        assert!(!point_in_polygon(0.5, 0.5, &[(0.0, 0.0), (1.0, 1.0)]));
        assert!(!point_in_polygon(0.5, 0.5, &[]));
    }

    #[test]
    fn test_heading_window_wraps() {
        assert!(heading_in_window(350.0, 330, 30));
        assert!(heading_in_window(10.0, 330, 30));
        assert!(!heading_in_window(180.0, 330, 30));
        assert!(heading_in_window(180.0, 90, 270));
    }

    #[test]
    fn test_contains_respects_altitude_band() {
        let set = RegionSet::new(vec![rect_region("Low", 0.0, 1.0, 0.0, 1.0, 0, 500)]);
        assert_eq!(set.contains(0.5, 0.5, 0.0, 400), Some(0));
        assert_eq!(set.contains(0.5, 0.5, 0.0, 500), Some(0)); // inclusive
        assert_eq!(set.contains(0.5, 0.5, 0.0, 600), None);
    }

    #[test]
    fn test_contains_first_match_wins() {
        let set = RegionSet::new(vec![
            rect_region("A", 0.0, 1.0, 0.0, 1.0, 0, 10_000),
            rect_region("B", 0.0, 1.0, 0.0, 1.0, 0, 10_000),
        ]);
        assert_eq!(set.contains(0.5, 0.5, 0.0, 100), Some(0));
        assert_eq!(set.name_of(0), Some("A"));
    }

    #[test]
    fn test_heading_constraint() {
        let mut region = rect_region("Approach", 0.0, 1.0, 0.0, 1.0, 0, 10_000);
        region.start_hdg = 230;
        region.end_hdg = 270;
        let set = RegionSet::new(vec![region]);
        assert_eq!(set.contains(0.5, 0.5, 250.0, 100), Some(0));
        assert_eq!(set.contains(0.5, 0.5, 90.0, 100), None);
    }
}
