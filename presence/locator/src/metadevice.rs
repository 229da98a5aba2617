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

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;
use crate::config::TrackerOptions;
use crate::device::{BeaconSourceKind, Device};

/// State reported by the private BLE identity resolver for one IRK.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivateDeviceUpdate {
    /// Identity resolving key, as hex.
    pub irk: String,
    #[serde(default)]
    pub name: Option<String>,
    /// The rotating address the key currently resolves to.
    #[serde(default)]
    pub current_address: Option<DeviceAddress>,
}

/// Tracks which devices are metadevices and keeps them in sync with their
/// physical sources.
#[derive(Debug, Default)]
pub struct MetadeviceResolver {
    metadevices: BTreeSet<DeviceAddress>,
    pending_private: BTreeMap<String, PrivateDeviceUpdate>,
}

fn get_or_create<'a>(
    devices: &'a mut BTreeMap<DeviceAddress, Device>,
    address: &DeviceAddress,
) -> &'a mut Device {
    devices
        .entry(address.clone())
        .or_insert_with(|| Device::new(address.clone()))
}

impl MetadeviceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_metadevice(&self, address: &DeviceAddress) -> bool {
        self.metadevices.contains(address)
    }

    pub fn metadevices(&self) -> impl Iterator<Item = &DeviceAddress> {
        self.metadevices.iter()
    }

    /// Creates or refreshes the iBeacon metadevice `source` belongs to.
    pub fn register_ibeacon_source(
        &mut self,
        devices: &mut BTreeMap<DeviceAddress, Device>,
        source: &DeviceAddress,
        options: &TrackerOptions,
    ) {
        let Some(source_device) = devices.get(source) else {
            error!("iBeacon source {} is not a tracked device.", source);
            return;
        };
        if !source_device.beacon_kinds.contains(&BeaconSourceKind::IBeacon) {
            error!(
                "Only iBeacon sources can feed a beacon metadevice, {} is not one.",
                source_device.display_name()
            );
            return;
        }
        let Some(beacon) = source_device.beacon.clone() else {
            error!("Source device {} is not a valid iBeacon.", source_device.display_name());
            return;
        };

        let source_seen = source_device.last_seen;
        let meta_address = DeviceAddress::new(&beacon.unique_id);
        let head_seen = devices
            .get(&meta_address)
            .and_then(|metadevice| metadevice.beacon_sources.first())
            .and_then(|head| devices.get(head))
            .map(|head| head.last_seen);
        let newly_tracked = !self.metadevices.contains(&meta_address);
        let metadevice = get_or_create(devices, &meta_address);
        if metadevice.beacon_sources.is_empty() {
            if !newly_tracked {
                warn!(
                    "Metadevice already tracked despite not existing yet. {}",
                    meta_address
                );
            }
            metadevice.beacon = Some(beacon);
            if options.is_selected(&meta_address) {
                metadevice.create_sensor = true;
            }
        }
        // Cached adverts are revisited every cycle, only a fresher source
        // may take the head.
        if head_seen.map_or(true, |head_seen| source_seen > head_seen) {
            metadevice.push_beacon_source(source);
        }
        self.metadevices.insert(meta_address);
    }

    /// Queues the latest resolver state for `update.irk`; applied on the next
    /// `update_metadevices`.
    pub fn private_device_update(&mut self, update: PrivateDeviceUpdate) {
        match self.pending_private.get_mut(&update.irk) {
            Some(pending) => {
                if update.name.is_some() {
                    pending.name = update.name;
                }
                if update.current_address.is_some() {
                    pending.current_address = update.current_address;
                }
            }
            None => {
                self.pending_private.insert(update.irk.clone(), update);
            }
        }
    }

    fn discover_private_ble_metadevices(&mut self, devices: &mut BTreeMap<DeviceAddress, Device>) {
        for (irk, update) in std::mem::take(&mut self.pending_private) {
            let meta_address = DeviceAddress::new(&irk);
            let metadevice = get_or_create(devices, &meta_address);
            metadevice.create_sensor = true;
            if update.name.is_some() {
                metadevice.name.clone_from(&update.name);
                metadevice.prefname = update.name;
            }
            self.metadevices.insert(meta_address.clone());

            match update.current_address {
                Some(current) => {
                    if let Some(metadevice) = devices.get_mut(&meta_address) {
                        metadevice.push_beacon_source(&current);
                    }
                    get_or_create(devices, &current)
                        .beacon_kinds
                        .insert(BeaconSourceKind::PrivateBle);
                }
                None => debug!("No address available for private BLE device {}", meta_address),
            }
        }
    }

    /// Brings every metadevice up to date with its freshest source.
    pub fn update_metadevices(&mut self, devices: &mut BTreeMap<DeviceAddress, Device>) {
        self.discover_private_ble_metadevices(devices);

        for meta_address in &self.metadevices {
            let Some(source) = devices
                .get(meta_address)
                .and_then(|metadevice| metadevice.beacon_sources.first())
                .and_then(|head| devices.get(head))
            else {
                continue;
            };
            let fields = source.mergeable_fields();
            let source_address = source.address.clone();
            let source_seen = source.last_seen;

            let Some(metadevice) = devices.get_mut(meta_address) else {
                continue;
            };
            metadevice.merge_from_source(fields);
            if source_seen > metadevice.last_seen {
                metadevice.last_seen = source_seen;
            } else if source_seen > 0.0 && source_seen < metadevice.last_seen {
                debug!(
                    "Using freshest advert from {} for {} but it's still {} seconds too old!",
                    source_address,
                    metadevice.display_name(),
                    metadevice.last_seen - source_seen
                );
            }
        }
    }

    /// Current sources of all metadevices, which must never be pruned.
    pub fn primary_sources(&self, devices: &BTreeMap<DeviceAddress, Device>) -> HashSet<DeviceAddress> {
        self.metadevices
            .iter()
            .filter_map(|address| devices.get(address))
            .filter_map(|metadevice| metadevice.beacon_sources.first().cloned())
            .collect()
    }
}
