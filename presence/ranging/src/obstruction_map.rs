// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;

use crate::error::RangingError;

const DEFAULT_RESOLUTION_METERS: f64 = 1.0;

/// Sparse grid of measured field strengths.
///
/// Samples are stored per discretized cell. Lookups for a point without an
/// exact sample fall back to the Euclidean-nearest stored cell.
#[derive(Clone, Debug)]
pub struct ObstructionMap {
    resolution: f64,
    cells: BTreeMap<(i64, i64), f64>,
}

impl Default for ObstructionMap {
    fn default() -> Self {
        ObstructionMap::new(DEFAULT_RESOLUTION_METERS)
    }
}

impl ObstructionMap {
    /// Creates an empty map whose cells are `resolution` meters wide.
    /// Non-positive or non-finite resolutions fall back to one meter.
    pub fn new(resolution: f64) -> Self {
        let resolution = if resolution.is_finite() && resolution > 0.0 {
            resolution
        } else {
            DEFAULT_RESOLUTION_METERS
        };
        ObstructionMap {
            resolution,
            cells: BTreeMap::new(),
        }
    }

    /// Records a field-strength sample, replacing any sample already held by
    /// the same cell.
    pub fn insert(&mut self, x: f64, y: f64, strength: f64) {
        let cell = self.cell_of(x, y);
        self.cells.insert(cell, strength);
    }

    /// Number of cells holding a sample.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the map holds no sample at all.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Field strength at a point: the exact cell if sampled, otherwise the
    /// nearest sampled cell. Equidistant cells resolve to the lowest cell index.
    pub fn field_strength_at(&self, x: f64, y: f64) -> Result<f64, RangingError> {
        if let Some(strength) = self.cells.get(&self.cell_of(x, y)) {
            return Ok(*strength);
        }
        self.cells
            .iter()
            .map(|(cell, strength)| {
                let (cx, cy) = self.cell_center(*cell);
                ((cx - x).hypot(cy - y), *strength)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, strength)| strength)
            .ok_or(RangingError::NoObstructionData)
    }

    /// Estimates how many walls lie between two planar points.
    ///
    /// Walks the grid boundaries spanned by the segment along each axis,
    /// sampling at the midpoint of the other axis, and counts each boundary
    /// where the field strength rises over the following half cell. This is an
    /// axis-aligned approximation, not a ray cast.
    pub fn count_wall_crossings(
        &self,
        start: (f64, f64),
        end: (f64, f64),
    ) -> Result<u32, RangingError> {
        if self.is_empty() {
            return Err(RangingError::NoObstructionData);
        }
        let (x1, y1) = start;
        let (x2, y2) = end;
        let mid_x = (x1 + x2) / 2.0;
        let mid_y = (y1 + y2) / 2.0;
        let half_step = self.resolution / 2.0;

        let mut crossings = 0;
        for x in self.boundaries(x1, x2) {
            if self.field_strength_at(x, mid_y)? < self.field_strength_at(x + half_step, mid_y)? {
                crossings += 1;
            }
        }
        for y in self.boundaries(y1, y2) {
            if self.field_strength_at(mid_x, y)? < self.field_strength_at(mid_x, y + half_step)? {
                crossings += 1;
            }
        }
        Ok(crossings)
    }

    // Grid boundary coordinates from the cell holding the lower bound up to
    // and including the cell holding the upper bound.
    fn boundaries(&self, a: f64, b: f64) -> impl Iterator<Item = f64> {
        let resolution = self.resolution;
        let first = (a.min(b) / resolution).floor() as i64;
        let last = (a.max(b) / resolution).floor() as i64;
        (first..=last).map(move |k| k as f64 * resolution)
    }

    fn cell_of(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.resolution).round() as i64,
            (y / self.resolution).round() as i64,
        )
    }

    fn cell_center(&self, cell: (i64, i64)) -> (f64, f64) {
        (cell.0 as f64 * self.resolution, cell.1 as f64 * self.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map_has_no_data() {
        let map = ObstructionMap::default();
        assert_eq!(
            map.field_strength_at(1.0, 1.0),
            Err(RangingError::NoObstructionData)
        );
        assert_eq!(
            map.count_wall_crossings((0.0, 0.0), (5.0, 5.0)),
            Err(RangingError::NoObstructionData)
        );
    }

    #[test]
    fn exact_and_nearest_lookup() {
        let mut map = ObstructionMap::default();
        map.insert(0.0, 0.0, -40.0);
        map.insert(10.0, 0.0, -70.0);

        assert_eq!(map.field_strength_at(0.0, 0.0), Ok(-40.0));
        // (3, 1) is closer to the origin sample.
        assert_eq!(map.field_strength_at(3.0, 1.0), Ok(-40.0));
        // (8, 0) is closer to the second sample.
        assert_eq!(map.field_strength_at(8.0, 0.0), Ok(-70.0));
    }

    #[test]
    fn insert_replaces_sample_in_same_cell() {
        let mut map = ObstructionMap::new(2.0);
        map.insert(4.0, 4.0, -50.0);
        map.insert(4.4, 3.8, -55.0);
        assert_eq!(map.len(), 1);
        assert_eq!(map.field_strength_at(4.0, 4.0), Ok(-55.0));
    }

    #[test]
    fn uniform_field_has_no_walls() {
        let mut map = ObstructionMap::default();
        for x in 0..6 {
            for y in 0..6 {
                map.insert(x as f64, y as f64, -60.0);
            }
        }
        assert_eq!(map.count_wall_crossings((0.0, 0.0), (5.0, 5.0)), Ok(0));
    }

    #[test]
    fn rising_edge_counts_as_wall() {
        // Strength jumps between x = 2 and x = 3, every other cell is flat.
        let mut map = ObstructionMap::new(0.5);
        for step in 0..=12 {
            let x = step as f64 * 0.5;
            let strength = if x >= 2.5 { -50.0 } else { -80.0 };
            map.insert(x, 0.0, strength);
        }
        assert_eq!(map.count_wall_crossings((0.0, 0.0), (6.0, 0.0)), Ok(1));
        // Walking the other way crosses the same boundary.
        assert_eq!(map.count_wall_crossings((6.0, 0.0), (0.0, 0.0)), Ok(1));
    }
}
