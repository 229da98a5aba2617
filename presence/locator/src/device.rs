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

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use ranging::Position;
use serde::Serialize;

use crate::address::{AddressType, DeviceAddress};
use crate::advertisement::{clean_charbuf, hex_string, Advertisement, IBeacon, APPLE_COMPANY_CODE};
use crate::scanner_contact::ScannerContact;

/// Longest history of sources a metadevice keeps.
pub const HIST_KEEP_COUNT: usize = 10;

/// Prefix of generated preferred names.
pub const GENERATED_NAME_PREFIX: &str = "locator_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Home,
    NotHome,
}

/// Role a physical device plays for a metadevice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconSourceKind {
    IBeacon,
    PrivateBle,
}

/// The area a device was placed in, and by which scanner.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AreaAssignment {
    pub area_id: Option<String>,
    pub area_name: String,
    pub distance: f64,
    pub rssi: Option<i16>,
    /// Name of the scanner that won the area.
    pub scanner: String,
}

/// Metadata of an iBeacon identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BeaconInfo {
    pub unique_id: String,
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
    pub power: i8,
}

impl From<&IBeacon> for BeaconInfo {
    fn from(beacon: &IBeacon) -> Self {
        BeaconInfo {
            unique_id: beacon.unique_id(),
            uuid: beacon.uuid.clone(),
            major: beacon.major,
            minor: beacon.minor,
            power: beacon.power,
        }
    }
}

/// Fields a metadevice takes over from its current source.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeableFields {
    // Filled only while empty on the metadevice.
    pub name: Option<String>,
    pub local_name: Option<String>,
    pub manufacturer: Option<String>,
    pub prefname: Option<String>,
    // Always copied.
    pub contacts: BTreeMap<DeviceAddress, ScannerContact>,
    pub area: Option<AreaAssignment>,
    pub trilaterated_position: Option<Position>,
    pub beacon: Option<BeaconInfo>,
    pub connectable: bool,
    pub zone: Zone,
}

/// State kept for one BLE address or merged identity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Device {
    pub address: DeviceAddress,
    pub address_type: AddressType,
    pub name: Option<String>,
    pub local_name: Option<String>,
    pub prefname: Option<String>,
    pub manufacturer: Option<String>,
    pub connectable: bool,
    pub is_scanner: bool,
    /// Time of the freshest advertisement, 0 when never seen.
    pub last_seen: f64,
    /// Contacts keyed by scanner address.
    pub contacts: BTreeMap<DeviceAddress, ScannerContact>,
    pub area: Option<AreaAssignment>,
    pub trilaterated_position: Option<Position>,
    /// Surveyed position of scanners and fixed beacons.
    pub fixed_position: Option<Position>,
    /// RSSI correction when this device is a scanner.
    pub rssi_offset: f64,
    pub beacon: Option<BeaconInfo>,
    pub beacon_kinds: BTreeSet<BeaconSourceKind>,
    /// Source addresses of a metadevice, most recent first.
    pub beacon_sources: Vec<DeviceAddress>,
    pub zone: Zone,
    pub create_sensor: bool,
    pub create_sensor_done: bool,
    pub create_tracker_done: bool,
    /// When the last report of this device was published.
    #[serde(skip)]
    pub last_report: Option<f64>,
}

impl Device {
    pub fn new(address: DeviceAddress) -> Self {
        Device {
            address_type: address.address_type(),
            address,
            name: None,
            local_name: None,
            prefname: None,
            manufacturer: None,
            connectable: false,
            is_scanner: false,
            last_seen: 0.0,
            contacts: BTreeMap::new(),
            area: None,
            trilaterated_position: None,
            fixed_position: None,
            rssi_offset: 0.0,
            beacon: None,
            beacon_kinds: BTreeSet::new(),
            beacon_sources: Vec::new(),
            zone: Zone::NotHome,
            create_sensor: false,
            create_sensor_done: false,
            create_tracker_done: false,
            last_report: None,
        }
    }

    /// Best human readable name.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.prefname.as_deref())
            .or(self.local_name.as_deref())
            .unwrap_or(self.address.as_str())
    }

    /// Updates identity fields from `advertisement` and returns the iBeacon
    /// frame it carries, if any.
    pub fn apply_advertisement(&mut self, advertisement: &Advertisement) -> Option<IBeacon> {
        let mut found = None;
        for section in &advertisement.manufacturer_data {
            if section.company_code != APPLE_COMPANY_CODE {
                continue;
            }
            match IBeacon::from_manufacturer_data(section) {
                Ok(beacon) => {
                    let info = BeaconInfo::from(&beacon);
                    self.prefname = Some(info.unique_id.clone());
                    self.beacon = Some(info);
                    self.beacon_kinds.insert(BeaconSourceKind::IBeacon);
                    found = Some(beacon);
                }
                Err(err) => {
                    debug!("{} sent a non iBeacon Apple frame: {}", self.address, err);
                    self.prefname = Some(clean_charbuf(&hex_string(&section.data)));
                }
            }
        }

        if self.name.is_none() {
            self.name = advertisement
                .name
                .as_deref()
                .map(clean_charbuf)
                .filter(|name| !name.is_empty());
        }
        if self.local_name.is_none() {
            self.local_name = advertisement
                .local_name
                .as_deref()
                .map(clean_charbuf)
                .filter(|name| !name.is_empty());
        }
        if self.manufacturer.is_none() {
            self.manufacturer.clone_from(&advertisement.manufacturer);
        }
        self.connectable = advertisement.connectable;

        let generated = self
            .prefname
            .as_deref()
            .map_or(true, |name| name.starts_with(GENERATED_NAME_PREFIX));
        if generated {
            self.prefname = Some(
                self.name
                    .clone()
                    .or_else(|| self.local_name.clone())
                    .unwrap_or_else(|| format!("{}{}", GENERATED_NAME_PREFIX, self.address.slug())),
            );
        }
        found
    }

    /// Records a contact time; `last_seen` never moves backwards.
    pub fn touch(&mut self, stamp: f64) {
        if stamp > self.last_seen {
            self.last_seen = stamp;
        }
    }

    /// Recomputes time dependent state of the device and its contacts.
    pub fn calculate_data(&mut self, now: f64, device_timeout: f64) {
        for contact in self.contacts.values_mut() {
            contact.calculate(now, device_timeout);
        }
        self.zone = if self.last_seen > 0.0 && now - self.last_seen <= device_timeout {
            Zone::Home
        } else {
            Zone::NotHome
        };
    }

    /// Fixed position if surveyed, otherwise the trilaterated one.
    pub fn position(&self) -> Option<Position> {
        self.fixed_position.or(self.trilaterated_position)
    }

    /// Adds `source` at the head of `beacon_sources`, keeping at most
    /// `HIST_KEEP_COUNT` entries. Returns false if it already was the head.
    pub fn push_beacon_source(&mut self, source: &DeviceAddress) -> bool {
        if self.beacon_sources.first() == Some(source) {
            return false;
        }
        self.beacon_sources.retain(|existing| existing != source);
        self.beacon_sources.insert(0, source.clone());
        self.beacon_sources.truncate(HIST_KEEP_COUNT);
        true
    }

    pub fn mergeable_fields(&self) -> MergeableFields {
        MergeableFields {
            name: self.name.clone(),
            local_name: self.local_name.clone(),
            manufacturer: self.manufacturer.clone(),
            prefname: self.prefname.clone(),
            contacts: self.contacts.clone(),
            area: self.area.clone(),
            trilaterated_position: self.trilaterated_position,
            beacon: self.beacon.clone(),
            connectable: self.connectable,
            zone: self.zone,
        }
    }

    /// Takes over the state of a metadevice's current source.
    pub fn merge_from_source(&mut self, fields: MergeableFields) {
        if self.name.is_none() {
            self.name = fields.name;
        }
        if self.local_name.is_none() {
            self.local_name = fields.local_name;
        }
        if self.manufacturer.is_none() {
            self.manufacturer = fields.manufacturer;
        }
        if self.prefname.is_none() {
            self.prefname = fields.prefname;
        }
        self.contacts = fields.contacts;
        self.area = fields.area;
        self.trilaterated_position = fields.trilaterated_position;
        self.beacon = fields.beacon;
        self.connectable = fields.connectable;
        self.zone = fields.zone;
    }

    /// Nearest scanner distance and rssi, taken from the area assignment.
    pub fn report(&self) -> DeviceReport {
        DeviceReport {
            address: self.address.clone(),
            name: self.display_name().to_string(),
            area_id: self.area.as_ref().and_then(|area| area.area_id.clone()),
            area_name: self.area.as_ref().map(|area| area.area_name.clone()),
            area_distance: self.area.as_ref().map(|area| area.distance),
            area_rssi: self.area.as_ref().and_then(|area| area.rssi),
            area_scanner: self.area.as_ref().map(|area| area.scanner.clone()),
            position: self.position(),
            zone: self.zone,
            last_seen: self.last_seen,
        }
    }
}

/// What the presentation layer shows for one device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceReport {
    pub address: DeviceAddress,
    pub name: String,
    pub area_id: Option<String>,
    pub area_name: Option<String>,
    pub area_distance: Option<f64>,
    pub area_rssi: Option<i16>,
    pub area_scanner: Option<String>,
    pub position: Option<Position>,
    pub zone: Zone,
    pub last_seen: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::ManufacturerData;

    fn ibeacon_data(minor: u8) -> ManufacturerData {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(&[0x11; 16]);
        data.extend_from_slice(&[0x00, 0x07, 0x00, minor, 0xc5]);
        ManufacturerData::new(APPLE_COMPANY_CODE, data)
    }

    #[test]
    fn new_device_is_classified() {
        let device = Device::new(DeviceAddress::new("4A:00:00:00:00:01"));
        assert_eq!(device.address_type, AddressType::PrivateResolvable);
        assert_eq!(device.last_seen, 0.0);
        assert_eq!(device.zone, Zone::NotHome);
        assert_eq!(device.display_name(), "4a:00:00:00:00:01");
    }

    #[test]
    fn advertisement_fills_identity_once() {
        let mut device = Device::new(DeviceAddress::new("c4:11:22:33:44:55"));
        let first = Advertisement::new("aa:00:00:00:00:01", "c4:11:22:33:44:55", -60, 1.0)
            .with_name("Pixel\0\0");
        assert_eq!(device.apply_advertisement(&first), None);
        assert_eq!(device.name.as_deref(), Some("Pixel"));
        assert_eq!(device.prefname.as_deref(), Some("Pixel"));

        let second = Advertisement::new("aa:00:00:00:00:01", "c4:11:22:33:44:55", -60, 2.0)
            .with_name("Renamed");
        device.apply_advertisement(&second);
        assert_eq!(device.name.as_deref(), Some("Pixel"));
    }

    #[test]
    fn unnamed_device_gets_generated_prefname() {
        let mut device = Device::new(DeviceAddress::new("c4:11:22:33:44:55"));
        device.apply_advertisement(&Advertisement::new(
            "aa:00:00:00:00:01",
            "c4:11:22:33:44:55",
            -60,
            1.0,
        ));
        assert_eq!(device.prefname.as_deref(), Some("locator_c4_11_22_33_44_55"));
    }

    #[test]
    fn ibeacon_advert_sets_beacon() {
        let mut device = Device::new(DeviceAddress::new("c4:11:22:33:44:55"));
        let advert = Advertisement::new("aa:00:00:00:00:01", "c4:11:22:33:44:55", -60, 1.0)
            .with_manufacturer_data(ibeacon_data(9));
        let beacon = device.apply_advertisement(&advert).unwrap();
        let unique_id = format!("{}_7_9", "11".repeat(16));
        assert_eq!(beacon.unique_id(), unique_id);
        assert_eq!(device.prefname.as_deref(), Some(unique_id.as_str()));
        assert!(device.beacon_kinds.contains(&BeaconSourceKind::IBeacon));
    }

    #[test]
    fn last_seen_never_regresses() {
        let mut device = Device::new(DeviceAddress::new("c4:11:22:33:44:55"));
        device.touch(10.0);
        device.touch(5.0);
        assert_eq!(device.last_seen, 10.0);
    }

    #[test]
    fn zone_follows_timeout() {
        let mut device = Device::new(DeviceAddress::new("c4:11:22:33:44:55"));
        device.touch(10.0);
        device.calculate_data(20.0, 30.0);
        assert_eq!(device.zone, Zone::Home);
        device.calculate_data(41.0, 30.0);
        assert_eq!(device.zone, Zone::NotHome);
    }

    #[test]
    fn beacon_sources_are_capped() {
        let mut device = Device::new(DeviceAddress::new(&"ab".repeat(16)));
        for i in 0..25 {
            device.push_beacon_source(&DeviceAddress::new(&format!("c4:00:00:00:00:{:02x}", i)));
            assert!(device.beacon_sources.len() <= HIST_KEEP_COUNT);
        }
        assert_eq!(device.beacon_sources.len(), HIST_KEEP_COUNT);
        assert_eq!(device.beacon_sources[0].as_str(), "c4:00:00:00:00:18");
    }

    #[test]
    fn beacon_source_moves_to_head() {
        let mut device = Device::new(DeviceAddress::new(&"ab".repeat(16)));
        let a = DeviceAddress::new("c4:00:00:00:00:01");
        let b = DeviceAddress::new("c4:00:00:00:00:02");
        assert!(device.push_beacon_source(&a));
        assert!(device.push_beacon_source(&b));
        assert!(!device.push_beacon_source(&b));
        assert!(device.push_beacon_source(&a));
        assert_eq!(device.beacon_sources, vec![a, b]);
    }

    #[test]
    fn merge_keeps_own_identity() {
        let mut meta = Device::new(DeviceAddress::new(&"ab".repeat(16)));
        meta.name = Some(String::from("Keys"));
        let mut source = Device::new(DeviceAddress::new("c4:00:00:00:00:01"));
        source.name = Some(String::from("Tile"));
        source.local_name = Some(String::from("tile-1"));
        source.trilaterated_position = Some(Position::planar(1.0, 2.0));
        source.zone = Zone::Home;
        source.area = Some(AreaAssignment {
            area_id: Some(String::from("office")),
            area_name: String::from("Office"),
            distance: 1.5,
            rssi: Some(-61),
            scanner: String::from("Desk"),
        });

        meta.merge_from_source(source.mergeable_fields());
        assert_eq!(meta.name.as_deref(), Some("Keys"));
        assert_eq!(meta.local_name.as_deref(), Some("tile-1"));
        assert_eq!(meta.zone, Zone::Home);
        assert_eq!(meta.position(), Some(Position::planar(1.0, 2.0)));

        let report = meta.report();
        assert_eq!(report.name, "Keys");
        assert_eq!(report.area_name.as_deref(), Some("Office"));
        assert_eq!(report.area_distance, Some(1.5));
    }

    #[test]
    fn fixed_position_wins() {
        let mut device = Device::new(DeviceAddress::new("c4:00:00:00:00:01"));
        device.trilaterated_position = Some(Position::planar(1.0, 1.0));
        device.fixed_position = Some(Position::planar(5.0, 5.0));
        assert_eq!(device.position(), Some(Position::planar(5.0, 5.0)));
    }
}
