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

use ranging::{ObstructionMap, Position};
use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;
use crate::error::LocatorError;
use crate::prune::PrunePolicy;

mod fs;
#[cfg(test)]
pub(crate) mod mock;

pub use fs::FsConfigLoader;

pub const DEFAULT_MAX_RADIUS: f64 = 20.0;
pub const DEFAULT_MAX_VELOCITY: f64 = 3.0;
pub const DEFAULT_DEVICE_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_UPDATE_INTERVAL_SECS: f64 = 10.0;
pub const DEFAULT_SMOOTHING_SAMPLES: usize = 20;
pub const DEFAULT_ATTENUATION: f64 = 3.0;
pub const DEFAULT_REFERENCE_POWER: f64 = -55.0;

/// Types that can load the locator configuration from external storage.
pub trait ConfigLoader {
    fn load(&self) -> Result<LocatorConfig, LocatorError>;
}

/// User-tunable options of the tracker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerOptions {
    /// Contacts further away than this (meters) never win an area.
    pub max_radius: f64,
    /// Fastest plausible receding speed (m/s) of a tracked device.
    pub max_velocity: f64,
    /// Seconds without contact after which a device is away.
    pub device_timeout: f64,
    /// Seconds between two published reports of an unchanged device.
    pub update_interval: f64,
    /// Length of the rssi and distance histories per contact.
    pub smoothing_samples: usize,
    /// Default path-loss exponent of the distance model.
    pub attenuation: f64,
    /// Default RSSI at one meter, in dBm.
    pub reference_power: f64,
    pub enable_trilateration: bool,
    /// Devices the user selected for tracking.
    pub devices: Vec<DeviceAddress>,
    /// Per-scanner RSSI correction in dBm.
    pub rssi_offsets: BTreeMap<DeviceAddress, f64>,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        TrackerOptions {
            max_radius: DEFAULT_MAX_RADIUS,
            max_velocity: DEFAULT_MAX_VELOCITY,
            device_timeout: DEFAULT_DEVICE_TIMEOUT_SECS,
            update_interval: DEFAULT_UPDATE_INTERVAL_SECS,
            smoothing_samples: DEFAULT_SMOOTHING_SAMPLES,
            attenuation: DEFAULT_ATTENUATION,
            reference_power: DEFAULT_REFERENCE_POWER,
            enable_trilateration: false,
            devices: Vec::new(),
            rssi_offsets: BTreeMap::new(),
        }
    }
}

impl TrackerOptions {
    pub fn rssi_offset(&self, scanner: &DeviceAddress) -> f64 {
        self.rssi_offsets.get(scanner).copied().unwrap_or(0.0)
    }

    pub fn is_selected(&self, address: &DeviceAddress) -> bool {
        self.devices.contains(address)
    }
}

/// A receiver installed at a fixed spot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub address: DeviceAddress,
    pub name: String,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
}

/// A transmitter with a surveyed position, used to calibrate path loss.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixedBeaconConfig {
    pub address: DeviceAddress,
    pub position: Position,
}

/// One surveyed field-strength sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstructionSample {
    pub x: f64,
    pub y: f64,
    pub strength: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstructionConfig {
    /// Grid cell size in meters.
    pub resolution: f64,
    pub samples: Vec<ObstructionSample>,
}

impl Default for ObstructionConfig {
    fn default() -> Self {
        ObstructionConfig {
            resolution: 1.0,
            samples: Vec::new(),
        }
    }
}

/// Everything the locator needs to start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub options: TrackerOptions,
    pub scanners: Vec<ScannerConfig>,
    /// Area id to display name.
    pub areas: BTreeMap<String, String>,
    pub fixed_beacons: Vec<FixedBeaconConfig>,
    pub obstruction: ObstructionConfig,
    pub prune: PrunePolicy,
}

impl LocatorConfig {
    /// Parses a JSON document.
    pub fn from_json(contents: &str) -> Result<Self, LocatorError> {
        serde_json::from_str(contents).map_err(|err| LocatorError::ContractViolation(err.to_string()))
    }

    /// Builds the obstruction map from the surveyed samples.
    pub fn obstruction_map(&self) -> ObstructionMap {
        let mut map = ObstructionMap::new(self.obstruction.resolution);
        for sample in &self.obstruction.samples {
            map.insert(sample.x, sample.y, sample.strength);
        }
        map
    }

    pub fn fixed_position(&self, address: &DeviceAddress) -> Option<Position> {
        self.fixed_beacons
            .iter()
            .find(|beacon| &beacon.address == address)
            .map(|beacon| beacon.position)
    }
}
