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

use std::collections::BTreeSet;

use log::error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::address::{redact_mac_like, DeviceAddress};
use crate::coordinator::Coordinator;

/// Selects what a diagnostic dump contains.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpRequest {
    /// Devices to include; every device when unset and
    /// `configured_devices` is false.
    pub addresses: Option<Vec<String>>,
    /// Include selected devices, scanners and metadevices.
    pub configured_devices: bool,
    /// Mask MAC-like substrings in keys and values.
    pub redact: bool,
}

fn wanted_addresses(coordinator: &Coordinator, request: &DumpRequest) -> Option<BTreeSet<DeviceAddress>> {
    if request.addresses.is_none() && !request.configured_devices {
        return None;
    }
    let mut wanted: BTreeSet<DeviceAddress> = request
        .addresses
        .iter()
        .flatten()
        .map(|address| DeviceAddress::new(address))
        .collect();
    if request.configured_devices {
        wanted.extend(coordinator.options().devices.iter().cloned());
        wanted.extend(coordinator.scanner_addresses());
        wanted.extend(
            coordinator
                .devices()
                .keys()
                .filter(|address| coordinator.is_metadevice(address))
                .cloned(),
        );
    }
    Some(wanted)
}

/// Builds the diagnostic snapshot of `coordinator` at `now`.
pub fn dump_devices(coordinator: &Coordinator, request: &DumpRequest, now: f64) -> Value {
    let wanted = wanted_addresses(coordinator, request);
    let mut devices = Map::new();
    for (address, device) in coordinator.devices() {
        if wanted.as_ref().is_some_and(|wanted| !wanted.contains(address)) {
            continue;
        }
        let value = serde_json::to_value(device).unwrap_or_else(|err| {
            error!("Failed to serialize {}: {}", address, err);
            Value::String(format!("unserializable: {}", err))
        });
        devices.insert(address.to_string(), value);
    }
    let scanners = serde_json::to_value(coordinator.active_scanner_summary(now))
        .unwrap_or_else(|err| Value::String(format!("unserializable: {}", err)));

    let dump = json!({
        "devices": devices,
        "scanners": scanners,
        "active_devices": coordinator.count_active_devices(now),
    });
    if request.redact {
        redact(dump)
    } else {
        dump
    }
}

/// Masks MAC-like substrings in every key and string of `value`.
pub fn redact(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(redact_mac_like(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (redact_mac_like(&key), redact(value)))
                .collect(),
        ),
        other => other,
    }
}
