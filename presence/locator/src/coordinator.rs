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

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, error, info, warn};
use ranging::{
    adjust_distance, distance_from_rssi, measured_loss, solve_position, ObstructionMap,
    PathLossTable, Position, MIN_MULTILATERATION_SOURCES,
};
use serde::Serialize;
use serde_json::Value;

use crate::address::DeviceAddress;
use crate::advert_cache::{AdvertCache, ADVERT_CACHE_MAX_AGE_SECS};
use crate::advertisement::Advertisement;
use crate::area::assign_area;
use crate::config::{FixedBeaconConfig, LocatorConfig, TrackerOptions};
use crate::device::{Device, DeviceReport};
use crate::dump::{dump_devices, DumpRequest};
use crate::error::LocatorError;
use crate::log_limiter::LogLimiter;
use crate::metadevice::{MetadeviceResolver, PrivateDeviceUpdate};
use crate::prune::{select_prunable, PrunePolicy};
use crate::registry::{load_roster, AreaRegistry, ScannerInfo, ScannerRegistry, StaticRegistry};
use crate::scanner_contact::ScannerContact;

/// Period of the update cycle in seconds.
pub const CYCLE_INTERVAL_SECS: f64 = 1.05;

/// Devices seen within this many seconds count as active.
pub const ACTIVE_DEVICE_MAX_AGE_SECS: f64 = 10.0;

/// Input queued for the next update cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleEvent {
    Advertisement(Advertisement),
    PrivateDeviceUpdate(PrivateDeviceUpdate),
    /// The scanner or area registry changed.
    RegistryChanged,
}

/// A device the presentation layer should start showing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewDevice {
    pub address: DeviceAddress,
    /// The scanner roster at the time of the announcement.
    pub scanners: Vec<DeviceAddress>,
}

/// Outcome of one update cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub new_devices: Vec<NewDevice>,
    /// Reports due for publishing.
    pub updated: Vec<DeviceReport>,
    pub pruned: Vec<DeviceAddress>,
}

/// When a scanner last heard anything.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScannerSummary {
    pub name: String,
    pub address: DeviceAddress,
    pub last_stamp: f64,
    pub last_stamp_age: f64,
}

/// Owns all positioning state and runs the update cycle.
pub struct Coordinator {
    options: TrackerOptions,
    prune_policy: PrunePolicy,
    fixed_beacons: Vec<FixedBeaconConfig>,
    scanner_registry: Box<dyn ScannerRegistry + Send>,
    area_registry: Box<dyn AreaRegistry + Send>,
    roster: BTreeMap<DeviceAddress, ScannerInfo>,
    devices: BTreeMap<DeviceAddress, Device>,
    resolver: MetadeviceResolver,
    path_loss: PathLossTable,
    obstruction_map: ObstructionMap,
    adverts: AdvertCache,
    queue: VecDeque<CycleEvent>,
    limiter: LogLimiter,
    do_full_scanner_init: bool,
    stamp_last_update: f64,
    stamp_last_prune: f64,
}

// Looks up `address`, creating it with what the configuration says about it.
fn device_entry<'a>(
    devices: &'a mut BTreeMap<DeviceAddress, Device>,
    options: &TrackerOptions,
    fixed_beacons: &[FixedBeaconConfig],
    address: &DeviceAddress,
) -> &'a mut Device {
    devices.entry(address.clone()).or_insert_with(|| {
        let mut device = Device::new(address.clone());
        device.create_sensor = options.is_selected(address);
        device.fixed_position = fixed_beacons
            .iter()
            .find(|beacon| &beacon.address == address)
            .map(|beacon| beacon.position);
        device
    })
}

impl Coordinator {
    /// Creates a coordinator whose registries come from `config`.
    pub fn new(config: &LocatorConfig) -> Self {
        let registry = StaticRegistry::from_config(config);
        Self::with_registries(config, Box::new(registry.clone()), Box::new(registry))
    }

    pub fn with_registries(
        config: &LocatorConfig,
        scanner_registry: Box<dyn ScannerRegistry + Send>,
        area_registry: Box<dyn AreaRegistry + Send>,
    ) -> Self {
        let mut coordinator = Coordinator {
            options: config.options.clone(),
            prune_policy: config.prune.clone(),
            fixed_beacons: config.fixed_beacons.clone(),
            scanner_registry,
            area_registry,
            roster: BTreeMap::new(),
            devices: BTreeMap::new(),
            resolver: MetadeviceResolver::new(),
            path_loss: PathLossTable::new(),
            obstruction_map: config.obstruction_map(),
            adverts: AdvertCache::new(),
            queue: VecDeque::new(),
            limiter: LogLimiter::new(),
            do_full_scanner_init: true,
            stamp_last_update: 0.0,
            stamp_last_prune: 0.0,
        };
        coordinator.refresh_scanners();
        coordinator
    }

    /// Queues `event` for the next cycle.
    pub fn enqueue(&mut self, event: CycleEvent) {
        self.queue.push_back(event);
    }

    /// Whether a fresh advertisement should trigger a cycle right away.
    /// Bursts within two cycle periods collapse into one cycle.
    pub fn should_update_on_advert(&self, now: f64) -> bool {
        self.stamp_last_update < now - CYCLE_INTERVAL_SECS * 2.0
    }

    pub fn devices(&self) -> &BTreeMap<DeviceAddress, Device> {
        &self.devices
    }

    pub fn device(&self, address: &DeviceAddress) -> Option<&Device> {
        self.devices.get(address)
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn path_loss(&self) -> &PathLossTable {
        &self.path_loss
    }

    pub fn is_metadevice(&self, address: &DeviceAddress) -> bool {
        self.resolver.is_metadevice(address)
    }

    pub fn scanner_addresses(&self) -> Vec<DeviceAddress> {
        self.roster.keys().cloned().collect()
    }

    /// The presentation layer created the sensors of `address`.
    pub fn sensor_created(&mut self, address: &DeviceAddress) -> Result<(), LocatorError> {
        match self.devices.get_mut(address) {
            Some(device) => {
                device.create_sensor_done = true;
                Ok(())
            }
            None => {
                warn!("Got sensor_created for non-tracked device {}", address);
                Err(LocatorError::ContractViolation(format!(
                    "{} is not tracked.",
                    address
                )))
            }
        }
    }

    /// The presentation layer created the tracker of `address`.
    pub fn device_tracker_created(&mut self, address: &DeviceAddress) -> Result<(), LocatorError> {
        match self.devices.get_mut(address) {
            Some(device) => {
                device.create_tracker_done = true;
                Ok(())
            }
            None => {
                warn!("Got device_tracker_created for non-tracked device {}", address);
                Err(LocatorError::ContractViolation(format!(
                    "{} is not tracked.",
                    address
                )))
            }
        }
    }

    pub fn count_active_devices(&self, now: f64) -> usize {
        let stamp = now - ACTIVE_DEVICE_MAX_AGE_SECS;
        self.devices
            .values()
            .filter(|device| device.last_seen > 0.0 && device.last_seen > stamp)
            .count()
    }

    /// One entry per roster scanner with the time it last heard any device.
    pub fn active_scanner_summary(&self, now: f64) -> Vec<ScannerSummary> {
        self.roster
            .values()
            .map(|scanner| {
                let last_stamp = self
                    .devices
                    .values()
                    .filter_map(|device| device.contacts.get(&scanner.address))
                    .filter_map(|contact| contact.stamp)
                    .fold(0.0, f64::max);
                ScannerSummary {
                    name: scanner.name.clone(),
                    address: scanner.address.clone(),
                    last_stamp,
                    last_stamp_age: now - last_stamp,
                }
            })
            .collect()
    }

    pub fn count_active_scanners(&self, now: f64, max_age: f64) -> usize {
        self.active_scanner_summary(now)
            .iter()
            .filter(|summary| summary.last_stamp > 0.0 && summary.last_stamp > now - max_age)
            .count()
    }

    /// Diagnostic snapshot of the tracked state.
    pub fn dump_devices(&self, request: &DumpRequest, now: f64) -> Value {
        dump_devices(self, request, now)
    }

    /// Runs one full update cycle at time `now`.
    pub fn run_cycle(&mut self, now: f64) -> CycleReport {
        self.drain_queue();
        self.adverts.expire(now, ADVERT_CACHE_MAX_AGE_SECS);

        self.ingest_advertisements(now);
        self.create_configured_devices();

        let addresses: Vec<DeviceAddress> = self.devices.keys().cloned().collect();
        for address in &addresses {
            if let Some(device) = self.devices.get_mut(address) {
                device.calculate_data(now, self.options.device_timeout);
            }
            self.perform_trilateration(address, now);
            self.fine_tune_path_loss_factor(address);
        }

        let area_changed = self.refresh_areas(now);

        if self.do_full_scanner_init && !self.refresh_scanners() {
            debug!("Failed to refresh scanners, the registry has none.");
        }

        self.resolver.update_metadevices(&mut self.devices);

        let mut report = CycleReport::default();
        let scanners = self.scanner_addresses();
        for (address, device) in self.devices.iter_mut() {
            if !device.create_sensor {
                continue;
            }
            if !device.create_sensor_done || !device.create_tracker_done {
                debug!("Announcing new device {} ({})", device.display_name(), address);
                report.new_devices.push(NewDevice {
                    address: address.clone(),
                    scanners: scanners.clone(),
                });
            }
            let due = device
                .last_report
                .map_or(true, |last| now - last >= self.options.update_interval);
            if due || area_changed.contains(address) {
                device.last_report = Some(now);
                report.updated.push(device.report());
            }
        }

        if self.stamp_last_prune < now - self.prune_policy.interval_secs {
            report.pruned = self.prune_devices(now);
            self.stamp_last_prune = now;
        }

        self.stamp_last_update = now;
        report
    }

    fn drain_queue(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            match event {
                CycleEvent::Advertisement(advertisement) => self.adverts.record(advertisement),
                CycleEvent::PrivateDeviceUpdate(update) => {
                    self.resolver.private_device_update(update)
                }
                CycleEvent::RegistryChanged => self.do_full_scanner_init = true,
            }
        }
    }

    fn ingest_advertisements(&mut self, now: f64) {
        let discovered: Vec<Advertisement> =
            self.adverts.discovered().into_iter().cloned().collect();
        for advertisement in discovered {
            let address = advertisement.address.clone();
            let device = device_entry(
                &mut self.devices,
                &self.options,
                &self.fixed_beacons,
                &address,
            );
            if device.is_scanner {
                continue;
            }
            let is_beacon = device.apply_advertisement(&advertisement).is_some();

            let observations: Vec<Advertisement> = self
                .adverts
                .scanner_observations(&address)
                .into_iter()
                .cloned()
                .collect();
            for observation in observations {
                self.update_contact(&address, &observation, now);
            }
            // Registered after the contacts so the source's last_seen is current.
            if is_beacon {
                self.resolver
                    .register_ibeacon_source(&mut self.devices, &address, &self.options);
            }
        }
    }

    fn update_contact(&mut self, address: &DeviceAddress, observation: &Advertisement, now: f64) {
        if !self.roster.contains_key(&observation.scanner) {
            self.do_full_scanner_init = true;
            self.refresh_scanners();
        }
        let Some(scanner) = self.roster.get(&observation.scanner) else {
            if self
                .limiter
                .allow(&format!("missing_scanner_entry_{}", observation.scanner), now)
            {
                error!(
                    "Dropping advertisement: {}",
                    LocatorError::UnknownScanner(observation.scanner.to_string())
                );
            }
            return;
        };
        let Some(device) = self.devices.get_mut(address) else {
            error!("Device {} vanished while ingesting, this is a bug.", address);
            return;
        };
        let device_position = device.position();
        let contact = device
            .contacts
            .entry(scanner.address.clone())
            .or_insert_with(|| ScannerContact::new(scanner));
        if !contact.update(scanner, observation, &self.options) {
            return;
        }

        if let (Some(device_position), Some(scanner_position), Some(raw_distance)) =
            (device_position, scanner.position, contact.rssi_distance)
        {
            match self.obstruction_map.count_wall_crossings(
                (device_position.x, device_position.y),
                (scanner_position.x, scanner_position.y),
            ) {
                Ok(walls) => {
                    let factor = self
                        .path_loss
                        .factor(address.as_str(), scanner.address.as_str());
                    contact.set_distance(adjust_distance(raw_distance, factor, walls));
                }
                Err(err) => debug!("{} keeps its distance: {}", address, err),
            }
        }
        device.touch(observation.stamp);
    }

    fn create_configured_devices(&mut self) {
        let configured = self
            .options
            .devices
            .iter()
            .chain(self.fixed_beacons.iter().map(|beacon| &beacon.address));
        for address in configured {
            device_entry(
                &mut self.devices,
                &self.options,
                &self.fixed_beacons,
                address,
            );
        }
    }

    fn perform_trilateration(&mut self, address: &DeviceAddress, now: f64) {
        if !self.options.enable_trilateration {
            return;
        }
        let Some(device) = self.devices.get_mut(address) else {
            return;
        };
        if device.is_scanner {
            return;
        }
        let (positions, distances): (Vec<Position>, Vec<f64>) = device
            .contacts
            .values()
            .filter_map(|contact| {
                let position = self.roster.get(&contact.scanner)?.position?;
                Some((position, contact.rssi_distance?))
            })
            .unzip();
        if positions.len() < MIN_MULTILATERATION_SOURCES {
            device.trilaterated_position = None;
            return;
        }
        device.trilaterated_position = solve_position(&positions, &distances);
        match device.trilaterated_position {
            Some(position) => debug!("Trilaterated position for {}: {:?}", address, position),
            None => {
                if self
                    .limiter
                    .allow(&format!("trilateration_failed_{}", address), now)
                {
                    warn!("Trilateration failed for {}", address);
                }
            }
        }
    }

    // Calibrates the path loss of every link of `address` against fixed
    // beacons heard by the same scanner.
    fn fine_tune_path_loss_factor(&mut self, address: &DeviceAddress) {
        let Some(device) = self.devices.get(address) else {
            return;
        };
        let mut losses = Vec::new();
        for beacon in &self.fixed_beacons {
            let Some(beacon_device) = self.devices.get(&beacon.address) else {
                continue;
            };
            for scanner_address in device.contacts.keys() {
                let Some(scanner) = self.roster.get(scanner_address) else {
                    continue;
                };
                let Some(scanner_position) = scanner.position else {
                    continue;
                };
                let Some(rssi) = beacon_device
                    .contacts
                    .get(scanner_address)
                    .and_then(|contact| contact.rssi)
                else {
                    continue;
                };
                let actual = beacon.position.distance_to(&scanner_position);
                let estimated = distance_from_rssi(
                    f64::from(rssi) + scanner.rssi_offset,
                    self.options.reference_power,
                    self.options.attenuation,
                );
                if let Some(loss) = measured_loss(estimated, actual) {
                    losses.push((scanner_address.clone(), loss));
                }
            }
        }
        for (scanner_address, loss) in losses {
            let factor = self
                .path_loss
                .update(address.as_str(), scanner_address.as_str(), loss);
            debug!(
                "Path loss factor of {} via {} is now {}",
                address, scanner_address, factor
            );
        }
    }

    fn refresh_areas(&mut self, now: f64) -> BTreeSet<DeviceAddress> {
        let mut changed = BTreeSet::new();
        for (address, device) in self.devices.iter_mut() {
            if device.is_scanner {
                continue;
            }
            if assign_area(
                device,
                self.options.max_radius,
                self.area_registry.as_ref(),
                &mut self.limiter,
                now,
            ) {
                changed.insert(address.clone());
            }
        }
        changed
    }

    // Reloads the scanner roster and marks scanner devices. Returns false when
    // the registry has no scanner.
    fn refresh_scanners(&mut self) -> bool {
        self.roster = load_roster(self.scanner_registry.as_ref(), &self.options);
        self.do_full_scanner_init = false;
        for device in self.devices.values_mut() {
            if device.is_scanner && !self.roster.contains_key(&device.address) {
                info!("{} is no longer a scanner.", device.address);
                device.is_scanner = false;
            }
        }
        for scanner in self.roster.values() {
            let device = device_entry(
                &mut self.devices,
                &self.options,
                &self.fixed_beacons,
                &scanner.address,
            );
            device.is_scanner = true;
            device.name = Some(scanner.name.clone());
            device.fixed_position = scanner.position;
            device.rssi_offset = scanner.rssi_offset;
        }
        !self.roster.is_empty()
    }

    fn prune_devices(&mut self, now: f64) -> Vec<DeviceAddress> {
        let primary_sources = self.resolver.primary_sources(&self.devices);
        let prune_list = select_prunable(&self.devices, &primary_sources, now, &self.prune_policy);
        for address in &prune_list {
            debug!("Acting on prune list for {}", address);
            self.devices.remove(address);
            self.adverts.forget(address);
            self.path_loss.forget_device(address.as_str());
            self.limiter.forget(address.as_str());
        }
        prune_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::{ManufacturerData, APPLE_COMPANY_CODE};
    use crate::config::{ObstructionSample, ScannerConfig};
    use crate::device::Zone;

    const SCANNER_A: &str = "aa:00:00:00:00:01";
    const SCANNER_B: &str = "aa:00:00:00:00:02";
    const SCANNER_C: &str = "aa:00:00:00:00:03";
    const PHONE: &str = "c4:11:22:33:44:55";
    const BEACON: &str = "d0:00:00:00:00:01";

    fn scanner(address: &str, name: &str, area_id: &str, x: f64, y: f64) -> ScannerConfig {
        ScannerConfig {
            address: DeviceAddress::new(address),
            name: name.to_string(),
            area_id: Some(area_id.to_string()),
            position: Some(Position::planar(x, y)),
        }
    }

    fn triangle_config() -> LocatorConfig {
        let mut config = LocatorConfig::default();
        config.options.enable_trilateration = true;
        config.options.devices.push(DeviceAddress::new(PHONE));
        config.scanners = vec![
            scanner(SCANNER_A, "Origin", "lounge", 0.0, 0.0),
            scanner(SCANNER_B, "East", "kitchen", 10.0, 0.0),
            scanner(SCANNER_C, "North", "study", 0.0, 10.0),
        ];
        config.areas = BTreeMap::from([
            (String::from("lounge"), String::from("Lounge")),
            (String::from("kitchen"), String::from("Kitchen")),
            (String::from("study"), String::from("Study")),
        ]);
        config
    }

    fn hear(coordinator: &mut Coordinator, scanner: &str, address: &str, rssi: i16, stamp: f64) {
        coordinator.enqueue(CycleEvent::Advertisement(Advertisement::new(
            scanner, address, rssi, stamp,
        )));
    }

    #[test]
    fn scanners_come_from_roster() {
        let coordinator = Coordinator::new(&triangle_config());
        assert_eq!(coordinator.scanner_addresses().len(), 3);
        let origin = coordinator.device(&DeviceAddress::new(SCANNER_A)).unwrap();
        assert!(origin.is_scanner);
        assert_eq!(origin.fixed_position, Some(Position::planar(0.0, 0.0)));
    }

    #[test]
    fn end_to_end_trilateration() {
        let mut coordinator = Coordinator::new(&triangle_config());
        // Distances to (3, 4) are 5, 8.06 and 6.71 meters.
        hear(&mut coordinator, SCANNER_A, PHONE, -76, 100.0);
        hear(&mut coordinator, SCANNER_B, PHONE, -82, 100.0);
        hear(&mut coordinator, SCANNER_C, PHONE, -80, 100.0);
        let report = coordinator.run_cycle(100.5);

        let phone = coordinator.device(&DeviceAddress::new(PHONE)).unwrap();
        let position = phone.trilaterated_position.unwrap();
        assert!((position.x - 3.0).abs() < 0.25, "{:?}", position);
        assert!((position.y - 4.0).abs() < 0.25, "{:?}", position);
        assert_eq!(phone.zone, Zone::Home);
        assert_eq!(phone.last_seen, 100.0);

        let area = phone.area.as_ref().unwrap();
        assert_eq!(area.area_name, "Lounge");
        assert_eq!(area.scanner, "Origin");

        assert_eq!(report.new_devices.len(), 1);
        assert_eq!(report.new_devices[0].address, DeviceAddress::new(PHONE));
        assert_eq!(report.new_devices[0].scanners.len(), 3);
        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.updated[0].area_name.as_deref(), Some("Lounge"));
    }

    #[test]
    fn two_sources_clear_position() {
        let mut coordinator = Coordinator::new(&triangle_config());
        hear(&mut coordinator, SCANNER_A, PHONE, -76, 100.0);
        hear(&mut coordinator, SCANNER_B, PHONE, -82, 100.0);
        hear(&mut coordinator, SCANNER_C, PHONE, -80, 100.0);
        coordinator.run_cycle(100.5);
        assert!(coordinator
            .device(&DeviceAddress::new(PHONE))
            .unwrap()
            .trilaterated_position
            .is_some());

        // Only one scanner keeps hearing the phone.
        hear(&mut coordinator, SCANNER_A, PHONE, -76, 140.0);
        coordinator.run_cycle(140.5);
        let phone = coordinator.device(&DeviceAddress::new(PHONE)).unwrap();
        assert_eq!(phone.trilaterated_position, None);
        assert_eq!(phone.area.as_ref().unwrap().area_name, "Lounge");
    }

    #[test]
    fn trilateration_disabled_by_default() {
        let mut config = triangle_config();
        config.options.enable_trilateration = false;
        let mut coordinator = Coordinator::new(&config);
        hear(&mut coordinator, SCANNER_A, PHONE, -76, 100.0);
        hear(&mut coordinator, SCANNER_B, PHONE, -82, 100.0);
        hear(&mut coordinator, SCANNER_C, PHONE, -80, 100.0);
        coordinator.run_cycle(100.5);
        let phone = coordinator.device(&DeviceAddress::new(PHONE)).unwrap();
        assert_eq!(phone.trilaterated_position, None);
    }

    #[test]
    fn sensor_acknowledgements_stop_announcements() {
        let mut coordinator = Coordinator::new(&triangle_config());
        let report = coordinator.run_cycle(1.0);
        assert_eq!(report.new_devices.len(), 1);

        let phone = DeviceAddress::new(PHONE);
        coordinator.sensor_created(&phone).unwrap();
        assert_eq!(coordinator.run_cycle(2.0).new_devices.len(), 1);
        coordinator.device_tracker_created(&phone).unwrap();
        assert!(coordinator.run_cycle(3.0).new_devices.is_empty());

        let stranger = DeviceAddress::new("c4:00:00:00:00:99");
        assert!(matches!(
            coordinator.sensor_created(&stranger),
            Err(LocatorError::ContractViolation(_))
        ));
    }

    #[test]
    fn reports_follow_update_interval() {
        let mut coordinator = Coordinator::new(&triangle_config());
        hear(&mut coordinator, SCANNER_A, PHONE, -76, 1.0);
        assert_eq!(coordinator.run_cycle(1.0).updated.len(), 1);
        hear(&mut coordinator, SCANNER_A, PHONE, -76, 3.0);
        assert!(coordinator.run_cycle(3.0).updated.is_empty());
        hear(&mut coordinator, SCANNER_A, PHONE, -76, 11.0);
        assert_eq!(coordinator.run_cycle(11.0).updated.len(), 1);
    }

    #[test]
    fn area_change_reports_immediately() {
        let mut coordinator = Coordinator::new(&triangle_config());
        hear(&mut coordinator, SCANNER_A, PHONE, -60, 1.0);
        coordinator.run_cycle(1.0);
        hear(&mut coordinator, SCANNER_B, PHONE, -56, 2.0);
        let report = coordinator.run_cycle(2.0);
        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.updated[0].area_name.as_deref(), Some("Kitchen"));
    }

    #[test]
    fn unknown_scanner_is_dropped() {
        let mut coordinator = Coordinator::new(&triangle_config());
        hear(&mut coordinator, "aa:00:00:00:00:ff", PHONE, -60, 1.0);
        coordinator.run_cycle(1.0);
        let phone = coordinator.device(&DeviceAddress::new(PHONE)).unwrap();
        assert!(phone.contacts.is_empty());
        assert_eq!(phone.last_seen, 0.0);
    }

    #[test]
    fn registry_change_refreshes_roster() {
        struct GrowingRegistry(std::sync::Arc<std::sync::Mutex<Vec<ScannerConfig>>>);
        impl ScannerRegistry for GrowingRegistry {
            fn scanners(&self) -> Vec<ScannerConfig> {
                self.0.lock().unwrap().clone()
            }
        }
        let shared = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let config = triangle_config();
        let mut coordinator = Coordinator::with_registries(
            &config,
            Box::new(GrowingRegistry(shared.clone())),
            Box::new(StaticRegistry::from_config(&config)),
        );
        assert!(coordinator.scanner_addresses().is_empty());

        shared
            .lock()
            .unwrap()
            .push(scanner(SCANNER_A, "Origin", "lounge", 0.0, 0.0));
        coordinator.enqueue(CycleEvent::RegistryChanged);
        coordinator.run_cycle(1.0);
        assert_eq!(
            coordinator.scanner_addresses(),
            vec![DeviceAddress::new(SCANNER_A)]
        );
    }

    #[test]
    fn advert_burst_is_coalesced() {
        let mut coordinator = Coordinator::new(&triangle_config());
        assert!(coordinator.should_update_on_advert(10.0));
        coordinator.run_cycle(10.0);
        assert!(!coordinator.should_update_on_advert(11.0));
        assert!(!coordinator.should_update_on_advert(12.0));
        assert!(coordinator.should_update_on_advert(12.2));
    }

    fn calibrated_config() -> LocatorConfig {
        let mut config = triangle_config();
        config.options.enable_trilateration = false;
        config.fixed_beacons.push(FixedBeaconConfig {
            address: DeviceAddress::new(BEACON),
            position: Position::planar(5.0, 0.0),
        });
        config
    }

    #[test]
    fn fixed_beacon_tunes_path_loss() {
        let mut coordinator = Coordinator::new(&calibrated_config());
        hear(&mut coordinator, SCANNER_A, BEACON, -76, 1.0);
        hear(&mut coordinator, SCANNER_A, PHONE, -70, 1.0);
        coordinator.run_cycle(1.0);

        let estimated = distance_from_rssi(-76.0, -55.0, 3.0);
        let measured = (estimated / 5.0).log10();
        let expected = 2.0 * 0.9 + measured * 0.1;
        let factor = coordinator.path_loss().peek(PHONE, SCANNER_A).unwrap();
        assert!((factor - expected).abs() < 1e-12);
        // The phone was never heard by scanner B, so that link is untouched.
        assert_eq!(coordinator.path_loss().peek(PHONE, SCANNER_B), None);
    }

    #[test]
    fn empty_obstruction_map_leaves_distance() {
        let mut coordinator = Coordinator::new(&calibrated_config());
        hear(&mut coordinator, SCANNER_A, BEACON, -76, 1.0);
        coordinator.run_cycle(1.0);
        let beacon = coordinator.device(&DeviceAddress::new(BEACON)).unwrap();
        let contact = &beacon.contacts[&DeviceAddress::new(SCANNER_A)];
        assert_eq!(contact.rssi_distance, contact.rssi_distance_raw);
    }

    #[test]
    fn obstruction_map_adjusts_distance() {
        let mut config = calibrated_config();
        config.obstruction.samples.push(ObstructionSample {
            x: 2.0,
            y: 0.0,
            strength: -50.0,
        });
        let mut coordinator = Coordinator::new(&config);
        hear(&mut coordinator, SCANNER_A, BEACON, -76, 1.0);
        coordinator.run_cycle(1.0);
        let beacon = coordinator.device(&DeviceAddress::new(BEACON)).unwrap();
        let contact = &beacon.contacts[&DeviceAddress::new(SCANNER_A)];
        let raw = contact.rssi_distance_raw.unwrap();
        // A uniform field has no walls, only the default path loss applies.
        assert!((contact.rssi_distance.unwrap() - raw.powf(2.0)).abs() < 1e-9);
    }

    fn ibeacon_advert(scanner: &str, address: &str, stamp: f64) -> Advertisement {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(&[0xee; 16]);
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0xc5]);
        Advertisement::new(scanner, address, -56, stamp)
            .with_manufacturer_data(ManufacturerData::new(APPLE_COMPANY_CODE, data))
    }

    #[test]
    fn ibeacon_metadevice_follows_source() {
        let mut config = triangle_config();
        let unique_id = format!("{}_1_2", "ee".repeat(16));
        config.options.devices = vec![DeviceAddress::new(&unique_id)];
        let mut coordinator = Coordinator::new(&config);

        coordinator.enqueue(CycleEvent::Advertisement(ibeacon_advert(SCANNER_B, PHONE, 5.0)));
        let report = coordinator.run_cycle(5.0);

        let meta_address = DeviceAddress::new(&unique_id);
        assert!(coordinator.is_metadevice(&meta_address));
        let metadevice = coordinator.device(&meta_address).unwrap();
        assert_eq!(metadevice.last_seen, 5.0);
        assert_eq!(metadevice.area.as_ref().unwrap().area_name, "Kitchen");
        assert_eq!(report.new_devices[0].address, meta_address);
    }

    #[test]
    fn ibeacon_metadevice_prefers_freshest_cached_radio() {
        let mut coordinator = Coordinator::new(&triangle_config());
        let old_radio = DeviceAddress::new("c4:00:00:00:00:02");
        let new_radio = DeviceAddress::new("c4:00:00:00:00:01");

        coordinator.enqueue(CycleEvent::Advertisement(ibeacon_advert(
            SCANNER_A,
            old_radio.as_str(),
            5.0,
        )));
        coordinator.run_cycle(5.0);
        coordinator.enqueue(CycleEvent::Advertisement(ibeacon_advert(
            SCANNER_B,
            new_radio.as_str(),
            100.0,
        )));
        coordinator.run_cycle(100.0);
        // The old advert is still cached, revisiting it must not demote the
        // radio heard last.
        coordinator.run_cycle(101.0);

        let meta_address = DeviceAddress::new(&format!("{}_1_2", "ee".repeat(16)));
        let metadevice = coordinator.device(&meta_address).unwrap();
        assert_eq!(metadevice.beacon_sources, vec![new_radio, old_radio]);
        assert_eq!(metadevice.last_seen, 100.0);
        assert_eq!(metadevice.area.as_ref().unwrap().area_name, "Kitchen");
    }

    #[test]
    fn unknown_scanner_warnings_do_not_accumulate() {
        let mut coordinator = Coordinator::new(&triangle_config());
        for i in 0..50 {
            let stamp = f64::from(i) * 10.0;
            hear(
                &mut coordinator,
                &format!("bb:00:00:00:00:{:02x}", i),
                PHONE,
                -60,
                stamp,
            );
            coordinator.run_cycle(stamp);
        }
        assert!(coordinator.limiter.len() <= 31);
    }

    #[test]
    fn private_device_update_is_applied_next_cycle() {
        let mut coordinator = Coordinator::new(&triangle_config());
        let irk = "0123456789abcdef0123456789abcdef";
        coordinator.enqueue(CycleEvent::PrivateDeviceUpdate(PrivateDeviceUpdate {
            irk: irk.to_string(),
            name: Some(String::from("Watch")),
            current_address: Some(DeviceAddress::new("5b:00:00:00:00:01")),
        }));
        hear(&mut coordinator, SCANNER_C, "5b:00:00:00:00:01", -56, 4.0);
        coordinator.run_cycle(4.0);

        let metadevice = coordinator.device(&DeviceAddress::new(irk)).unwrap();
        assert_eq!(metadevice.name.as_deref(), Some("Watch"));
        assert_eq!(metadevice.area.as_ref().unwrap().area_name, "Study");
    }

    #[test]
    fn pruning_runs_on_its_own_cadence() {
        let mut config = triangle_config();
        config.prune.max_devices = 4;
        let mut coordinator = Coordinator::new(&config);
        for i in 0..5 {
            hear(
                &mut coordinator,
                SCANNER_A,
                &format!("c4:00:00:00:00:{:02x}", i),
                -70,
                200.0 + f64::from(i),
            );
        }
        let report = coordinator.run_cycle(205.0);
        // Nine devices against a cap of four, only the passers-by are
        // prunable.
        assert_eq!(report.pruned.len(), 5);
        assert!(coordinator.run_cycle(206.0).pruned.is_empty());
        assert_eq!(coordinator.count_active_devices(206.0), 0);
    }

    #[test]
    fn scanner_summary_reports_last_contact() {
        let mut coordinator = Coordinator::new(&triangle_config());
        hear(&mut coordinator, SCANNER_B, PHONE, -70, 7.0);
        coordinator.run_cycle(8.0);
        let summary = coordinator.active_scanner_summary(9.0);
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[1].name, "East");
        assert_eq!(summary[1].last_stamp, 7.0);
        assert_eq!(summary[1].last_stamp_age, 2.0);
        assert_eq!(summary[0].last_stamp, 0.0);
        assert_eq!(coordinator.count_active_scanners(9.0, 10.0), 1);
        assert_eq!(coordinator.count_active_devices(9.0), 1);
    }
}
