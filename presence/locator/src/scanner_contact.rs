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

use std::collections::VecDeque;

use ranging::distance_from_rssi;
use serde::Serialize;

use crate::address::DeviceAddress;
use crate::advertisement::Advertisement;
use crate::config::TrackerOptions;
use crate::registry::ScannerInfo;

/// What one scanner currently knows about one device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScannerContact {
    pub scanner: DeviceAddress,
    /// Display name of the scanner.
    pub name: String,
    /// Area of the scanner, cached from the roster.
    pub area_id: Option<String>,
    /// Last raw RSSI in dBm.
    pub rssi: Option<i16>,
    /// Mean of the RSSI history.
    pub rssi_filtered: Option<f64>,
    pub tx_power: Option<i8>,
    /// Smoothed distance estimate in meters; `None` before the first sample
    /// and after a timeout.
    pub rssi_distance: Option<f64>,
    /// Unsmoothed distance of the last sample.
    pub rssi_distance_raw: Option<f64>,
    /// Time of the last contact.
    pub stamp: Option<f64>,
    hist_rssi: VecDeque<i16>,
    hist_distance: VecDeque<f64>,
}

impl ScannerContact {
    pub fn new(scanner: &ScannerInfo) -> Self {
        ScannerContact {
            scanner: scanner.address.clone(),
            name: scanner.name.clone(),
            area_id: scanner.area_id.clone(),
            rssi: None,
            rssi_filtered: None,
            tx_power: None,
            rssi_distance: None,
            rssi_distance_raw: None,
            stamp: None,
            hist_rssi: VecDeque::new(),
            hist_distance: VecDeque::new(),
        }
    }

    /// Folds a new advertisement into the contact. Returns false when the
    /// advertisement is not newer than the last one seen.
    pub fn update(
        &mut self,
        scanner: &ScannerInfo,
        advertisement: &Advertisement,
        options: &TrackerOptions,
    ) -> bool {
        self.name.clone_from(&scanner.name);
        self.area_id.clone_from(&scanner.area_id);
        if matches!(self.stamp, Some(stamp) if advertisement.stamp <= stamp) {
            return false;
        }
        let keep = options.smoothing_samples.max(1);

        self.rssi = Some(advertisement.rssi);
        self.tx_power = advertisement.tx_power.or(self.tx_power);
        self.hist_rssi.push_front(advertisement.rssi);
        self.hist_rssi.truncate(keep);
        self.rssi_filtered = Some(
            self.hist_rssi.iter().map(|&rssi| f64::from(rssi)).sum::<f64>()
                / self.hist_rssi.len() as f64,
        );

        let raw = distance_from_rssi(
            f64::from(advertisement.rssi) + scanner.rssi_offset,
            options.reference_power,
            options.attenuation,
        );
        self.rssi_distance_raw = Some(raw);

        let accepted = match (self.hist_distance.front(), self.stamp) {
            (Some(&previous), Some(previous_stamp)) => {
                let elapsed = advertisement.stamp - previous_stamp;
                let velocity = (raw - previous) / elapsed;
                if velocity > options.max_velocity {
                    previous
                } else {
                    raw
                }
            }
            _ => raw,
        };
        self.hist_distance.push_front(accepted);
        self.hist_distance.truncate(keep);
        let mean = self.hist_distance.iter().sum::<f64>() / self.hist_distance.len() as f64;
        self.rssi_distance = Some(accepted.min(mean).max(0.0));
        self.stamp = Some(advertisement.stamp);
        true
    }

    /// Expires the distance once the contact is older than `device_timeout`.
    pub fn calculate(&mut self, now: f64, device_timeout: f64) {
        match self.stamp {
            Some(stamp) if now - stamp <= device_timeout => {}
            _ => self.rssi_distance = None,
        }
    }

    /// Replaces the distance with a corrected estimate.
    pub fn set_distance(&mut self, distance: f64) {
        if distance.is_finite() {
            self.rssi_distance = Some(distance.max(0.0));
        }
    }

    /// Whether the contact was heard within `max_age` seconds of `now`.
    pub fn is_fresh(&self, now: f64, max_age: f64) -> bool {
        self.stamp.is_some_and(|stamp| now - stamp <= max_age)
    }
}
