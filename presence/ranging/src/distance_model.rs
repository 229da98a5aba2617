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

use std::collections::HashMap;

/// Path-loss exponent of free space, used for links that have not been calibrated yet.
pub const DEFAULT_PATH_LOSS_FACTOR: f64 = 2.0;

/// Weight given to a new measurement when smoothing a link's path-loss factor.
pub const PATH_LOSS_SMOOTHING_ALPHA: f64 = 0.1;

// Each wall crossed is assumed to halve the signal.
const WALL_ATTENUATION: f64 = 0.5;

/// Estimates the distance in meters for an RSSI sample using the log-distance
/// path loss model.
///
/// `reference_power` is the RSSI expected at 1 meter and `attenuation` the
/// path loss exponent of the environment. The result is not clamped: callers
/// filter implausible distances with their own radius limit.
pub fn distance_from_rssi(rssi: f64, reference_power: f64, attenuation: f64) -> f64 {
    // PL = reference_power - rssi = 10 * attenuation * log_10(d / d_0), d_0 = 1m
    // d = 10 ^ ((reference_power - rssi) / (10 * attenuation))
    let base: f64 = 10.0;
    base.powf((reference_power - rssi) / (10.0 * attenuation))
}

/// Loss measured against a reference whose true distance is known.
///
/// Returns `None` when either distance is not strictly positive, since the
/// logarithm of the ratio is then undefined.
pub fn measured_loss(estimated_distance: f64, actual_distance: f64) -> Option<f64> {
    if !(estimated_distance > 0.0 && actual_distance > 0.0) {
        return None;
    }
    Some((estimated_distance / actual_distance).log10())
}

/// Applies a link's path-loss factor and the obstruction correction to a raw
/// distance estimate.
pub fn adjust_distance(raw_distance: f64, path_loss_factor: f64, wall_crossings: u32) -> f64 {
    let walls = i32::try_from(wall_crossings).unwrap_or(i32::MAX);
    raw_distance.powf(path_loss_factor) * WALL_ATTENUATION.powi(walls)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LinkKey {
    device: String,
    scanner: String,
}

impl LinkKey {
    fn new(device: &str, scanner: &str) -> Self {
        LinkKey {
            device: device.to_string(),
            scanner: scanner.to_string(),
        }
    }
}

/// Adaptive path-loss exponents, one per (device, scanner) link.
#[derive(Clone, Debug, Default)]
pub struct PathLossTable {
    factors: HashMap<LinkKey, f64>,
}

impl PathLossTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        PathLossTable {
            factors: HashMap::new(),
        }
    }

    /// Current factor for the link, created with the free-space default on
    /// first use.
    pub fn factor(&mut self, device: &str, scanner: &str) -> f64 {
        *self
            .factors
            .entry(LinkKey::new(device, scanner))
            .or_insert(DEFAULT_PATH_LOSS_FACTOR)
    }

    /// Current factor for the link without creating it.
    pub fn peek(&self, device: &str, scanner: &str) -> Option<f64> {
        self.factors.get(&LinkKey::new(device, scanner)).copied()
    }

    /// Folds a measured loss into the link's factor by exponential smoothing
    /// and returns the new factor.
    pub fn update(&mut self, device: &str, scanner: &str, measured_loss: f64) -> f64 {
        let factor = self
            .factors
            .entry(LinkKey::new(device, scanner))
            .or_insert(DEFAULT_PATH_LOSS_FACTOR);
        *factor = *factor * (1.0 - PATH_LOSS_SMOOTHING_ALPHA)
            + measured_loss * PATH_LOSS_SMOOTHING_ALPHA;
        *factor
    }

    /// Drops every link of a device that no longer exists.
    pub fn forget_device(&mut self, device: &str) {
        self.factors.retain(|key, _| key.device != device);
    }

    /// Number of links tracked.
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    /// Whether no link has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}
