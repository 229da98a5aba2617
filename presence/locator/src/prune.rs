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

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::address::{AddressType, DeviceAddress};
use crate::device::Device;

/// Limits on how long and how many devices are kept.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrunePolicy {
    /// Seconds between two pruning passes.
    pub interval_secs: f64,
    /// Staleness after which a private-resolvable address is dropped.
    pub irk_stale_secs: f64,
    /// Staleness after which any other address is dropped.
    pub default_stale_secs: f64,
    /// Hard cap on the number of tracked devices.
    pub max_devices: usize,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        PrunePolicy {
            interval_secs: 180.0,
            irk_stale_secs: 240.0,
            default_stale_secs: 86400.0,
            max_devices: 1000,
        }
    }
}

/// Picks the devices to evict from `devices`.
///
/// A device is a candidate only if it is not the current source of a
/// metadevice, has no sensor, is not a scanner, was seen at least once and
/// has a MAC-derived address. Stale candidates are always evicted; if the
/// table is still above `max_devices`, the oldest remaining candidates go
/// until the cap is met.
pub fn select_prunable(
    devices: &BTreeMap<DeviceAddress, Device>,
    metadevice_primary_sources: &HashSet<DeviceAddress>,
    now: f64,
    policy: &PrunePolicy,
) -> Vec<DeviceAddress> {
    let mut prune_list = Vec::new();
    let mut prunable = Vec::new();

    for (address, device) in devices {
        if metadevice_primary_sources.contains(address)
            || device.create_sensor
            || device.is_scanner
            || device.last_seen <= 0.0
            || !device.address_type.is_mac_derived()
        {
            continue;
        }
        let stale_after = if device.address_type == AddressType::PrivateResolvable {
            policy.irk_stale_secs
        } else {
            policy.default_stale_secs
        };
        if device.last_seen < now - stale_after {
            debug!("Marking stale device for pruning: {}", device.display_name());
            prune_list.push(address.clone());
        } else {
            prunable.push((device.last_seen, address));
        }
    }

    let quota = devices
        .len()
        .saturating_sub(prune_list.len())
        .saturating_sub(policy.max_devices);
    if quota > 0 {
        info!("Having to prune {} extra devices to make quota.", quota);
        prunable.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        prune_list.extend(
            prunable
                .into_iter()
                .take(quota)
                .map(|(_, address)| address.clone()),
        );
    }
    prune_list
}
