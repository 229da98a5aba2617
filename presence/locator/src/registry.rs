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

use ranging::Position;

use crate::address::DeviceAddress;
use crate::config::{LocatorConfig, ScannerConfig, TrackerOptions};

/// Source of the scanner roster.
pub trait ScannerRegistry {
    fn scanners(&self) -> Vec<ScannerConfig>;
}

/// Resolves area ids to display names.
pub trait AreaRegistry {
    fn area_name(&self, area_id: &str) -> Option<String>;
}

/// Registries backed by the loaded configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticRegistry {
    scanners: Vec<ScannerConfig>,
    areas: BTreeMap<String, String>,
}

impl StaticRegistry {
    pub fn new(scanners: Vec<ScannerConfig>, areas: BTreeMap<String, String>) -> Self {
        StaticRegistry { scanners, areas }
    }

    pub fn from_config(config: &LocatorConfig) -> Self {
        Self::new(config.scanners.clone(), config.areas.clone())
    }
}

impl ScannerRegistry for StaticRegistry {
    fn scanners(&self) -> Vec<ScannerConfig> {
        self.scanners.clone()
    }
}

impl AreaRegistry for StaticRegistry {
    fn area_name(&self, area_id: &str) -> Option<String> {
        self.areas.get(area_id).cloned()
    }
}

/// What the update cycle knows about one scanner.
#[derive(Clone, Debug, PartialEq)]
pub struct ScannerInfo {
    pub address: DeviceAddress,
    pub name: String,
    pub area_id: Option<String>,
    pub position: Option<Position>,
    pub rssi_offset: f64,
}

impl ScannerInfo {
    pub fn from_config(scanner: &ScannerConfig, options: &TrackerOptions) -> Self {
        ScannerInfo {
            address: scanner.address.clone(),
            name: scanner.name.clone(),
            area_id: scanner.area_id.clone(),
            position: scanner.position,
            rssi_offset: options.rssi_offset(&scanner.address),
        }
    }
}

/// Builds the roster from `registry`, keyed by scanner address.
pub fn load_roster(
    registry: &dyn ScannerRegistry,
    options: &TrackerOptions,
) -> BTreeMap<DeviceAddress, ScannerInfo> {
    registry
        .scanners()
        .iter()
        .map(|scanner| {
            (
                scanner.address.clone(),
                ScannerInfo::from_config(scanner, options),
            )
        })
        .collect()
}
