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

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Fewest scanners that can fix a planar position.
pub const MIN_MULTILATERATION_SOURCES: usize = 3;

// Singular values below this fraction of the largest one count as zero.
const RANK_TOLERANCE: f64 = 1e-9;

// Scanners must span at least a plane to locate anything.
const MIN_GEOMETRY_RANK: usize = 2;

/// A point in the building's coordinate system, in meters. Planar layouts
/// keep `z` at zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// East-west coordinate.
    pub x: f64,
    /// North-south coordinate.
    pub y: f64,
    /// Height.
    #[serde(default)]
    pub z: f64,
}

impl Position {
    /// Creates a position from three coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z }
    }

    /// Creates a position on the floor plane.
    pub fn planar(x: f64, y: f64) -> Self {
        Position { x, y, z: 0.0 }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance to another position ignoring height.
    pub fn planar_distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn offset_from(&self, origin: &Position) -> [f64; 3] {
        [self.x - origin.x, self.y - origin.y, self.z - origin.z]
    }
}

/// Solves for the most likely position given scanner positions and the
/// distance estimated from each of them.
///
/// Subtracting the first scanner's sphere equation from the others yields the
/// linear system `A·x = b`, solved in the least-squares sense so that noisy,
/// over-determined inputs still produce an estimate. The system is expressed
/// relative to the first scanner; coordinates the geometry cannot resolve
/// (e.g. height when every scanner is mounted at the same z) keep the first
/// scanner's value.
///
/// Returns `None` when fewer than three pairs are given, the lengths differ, a
/// distance is negative or not finite, or the scanners are collinear or
/// coincident.
pub fn solve_position(positions: &[Position], distances: &[f64]) -> Option<Position> {
    if positions.len() != distances.len() || positions.len() < MIN_MULTILATERATION_SOURCES {
        return None;
    }
    if distances.iter().any(|d| !d.is_finite() || *d < 0.0) {
        return None;
    }
    let (origin, other_positions) = positions.split_first()?;
    let (origin_distance, other_distances) = distances.split_first()?;

    let rows = other_positions.len();
    let offsets: Vec<[f64; 3]> = other_positions
        .iter()
        .map(|position| position.offset_from(origin))
        .collect();

    // Row i: 2 (p_i - p_0)
    let a = DMatrix::from_row_iterator(
        rows,
        3,
        offsets.iter().flat_map(|offset| offset.map(|c| 2.0 * c)),
    );
    // b_i: d_0^2 - d_i^2 + |p_i - p_0|^2
    let b = DVector::from_iterator(
        rows,
        offsets
            .iter()
            .zip_eq(other_distances)
            .map(|(offset, distance)| {
                let norm_squared: f64 = offset.iter().map(|c| c * c).sum();
                origin_distance * origin_distance - distance * distance + norm_squared
            }),
    );

    let svd = a.svd(true, true);
    let largest = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    if !(largest > 0.0) {
        return None;
    }
    let eps = largest * RANK_TOLERANCE;
    if svd.rank(eps) < MIN_GEOMETRY_RANK {
        return None;
    }
    let solution = svd.solve(&b, eps).ok()?;
    let mut coords = solution.iter().copied();
    let position = Position::new(
        origin.x + coords.next()?,
        origin.y + coords.next()?,
        origin.z + coords.next()?,
    );
    if position.x.is_finite() && position.y.is_finite() && position.z.is_finite() {
        Some(position)
    } else {
        None
    }
}

/// Euclidean error between an estimated position and the true one.
pub fn position_error(estimated: &Position, actual: &Position) -> f64 {
    estimated.distance_to(actual)
}
