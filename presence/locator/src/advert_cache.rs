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

use crate::address::DeviceAddress;
use crate::advertisement::Advertisement;

/// Advertisements older than this are dropped from the cache.
pub const ADVERT_CACHE_MAX_AGE_SECS: f64 = 195.0;

/// In-memory cache of the latest advertisement per (device, scanner) pair.
///
/// The update cycle only ever reads from this cache, so a cycle never waits
/// on the platform.
#[derive(Debug, Default)]
pub struct AdvertCache {
    adverts: BTreeMap<DeviceAddress, BTreeMap<DeviceAddress, Advertisement>>,
}

impl AdvertCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `advertisement`, replacing an older one from the same scanner.
    /// Out-of-order stale adverts are ignored.
    pub fn record(&mut self, advertisement: Advertisement) {
        let per_scanner = self
            .adverts
            .entry(advertisement.address.clone())
            .or_default();
        match per_scanner.get(&advertisement.scanner) {
            Some(existing) if existing.stamp > advertisement.stamp => {}
            _ => {
                per_scanner.insert(advertisement.scanner.clone(), advertisement);
            }
        }
    }

    /// The freshest advertisement of every cached device.
    pub fn discovered(&self) -> Vec<&Advertisement> {
        self.adverts
            .values()
            .filter_map(|per_scanner| {
                per_scanner
                    .values()
                    .max_by(|a, b| a.stamp.total_cmp(&b.stamp))
            })
            .collect()
    }

    /// The latest advertisement of `address` as heard by each scanner.
    pub fn scanner_observations(&self, address: &DeviceAddress) -> Vec<&Advertisement> {
        self.adverts
            .get(address)
            .map(|per_scanner| per_scanner.values().collect())
            .unwrap_or_default()
    }

    /// Drops every advertisement older than `max_age` seconds.
    pub fn expire(&mut self, now: f64, max_age: f64) {
        self.adverts.retain(|_, per_scanner| {
            per_scanner.retain(|_, advert| now - advert.stamp <= max_age);
            !per_scanner.is_empty()
        });
    }

    /// Drops every advertisement of `address`.
    pub fn forget(&mut self, address: &DeviceAddress) {
        self.adverts.remove(address);
    }

    /// Number of cached devices.
    pub fn len(&self) -> usize {
        self.adverts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adverts.is_empty()
    }
}
