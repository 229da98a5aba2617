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

use log::{debug, warn};

use crate::device::{AreaAssignment, Device};
use crate::log_limiter::LogLimiter;
use crate::registry::AreaRegistry;
use crate::scanner_contact::ScannerContact;

/// Places `device` in the area of its nearest scanner within `max_radius`.
///
/// Contacts are visited in scanner address order and the first of several
/// equally near scanners wins. With no qualifying contact the area is
/// cleared. Returns true when the area name changed.
pub fn assign_area(
    device: &mut Device,
    max_radius: f64,
    registry: &dyn AreaRegistry,
    limiter: &mut LogLimiter,
    now: f64,
) -> bool {
    let mut closest: Option<(&ScannerContact, f64)> = None;
    for contact in device.contacts.values() {
        let Some(distance) = contact.rssi_distance else {
            continue;
        };
        if distance >= max_radius {
            continue;
        }
        match closest {
            Some((_, best)) if best <= distance => {}
            _ => closest = Some((contact, distance)),
        }
    }

    let old_area = device.area.as_ref().map(|area| area.area_name.clone());
    let assignment = closest.map(|(contact, distance)| {
        let area_name = contact
            .area_id
            .as_deref()
            .and_then(|area_id| registry.area_name(area_id))
            .unwrap_or_else(|| {
                if limiter.allow(&format!("scanner_no_area_{}", contact.name), now) {
                    warn!(
                        "Could not discern area from scanner {}. Assign an area to it, \
                         positioning does not work well without one.",
                        contact.name
                    );
                }
                format!("No area: {}", contact.name)
            });
        AreaAssignment {
            area_id: contact.area_id.clone(),
            area_name,
            distance,
            rssi: contact.rssi,
            scanner: contact.name.clone(),
        }
    });
    device.area = assignment;

    let new_area = device.area.as_ref().map(|area| area.area_name.clone());
    let changed = old_area != new_area;
    if changed && device.create_sensor {
        debug!(
            "Device {} was in {:?}, now in {:?}",
            device.display_name(),
            old_area,
            new_area
        );
    }
    changed
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::address::DeviceAddress;
    use crate::registry::{ScannerInfo, StaticRegistry};

    fn contact(address: &str, name: &str, area_id: Option<&str>, distance: Option<f64>) -> ScannerContact {
        let mut contact = ScannerContact::new(&ScannerInfo {
            address: DeviceAddress::new(address),
            name: name.to_string(),
            area_id: area_id.map(str::to_string),
            position: None,
            rssi_offset: 0.0,
        });
        contact.rssi_distance = distance;
        contact
    }

    fn device_with(contacts: Vec<ScannerContact>) -> Device {
        let mut device = Device::new(DeviceAddress::new("c4:11:22:33:44:55"));
        for contact in contacts {
            device.contacts.insert(contact.scanner.clone(), contact);
        }
        device
    }

    fn registry() -> StaticRegistry {
        StaticRegistry::new(
            Vec::new(),
            BTreeMap::from([
                (String::from("kitchen"), String::from("Kitchen")),
                (String::from("hall"), String::from("Hall")),
            ]),
        )
    }

    #[test]
    fn nearest_in_radius_wins() {
        let mut device = device_with(vec![
            contact("aa:00:00:00:00:01", "Kitchen proxy", Some("kitchen"), Some(4.0)),
            contact("aa:00:00:00:00:02", "Hall proxy", Some("hall"), Some(2.0)),
            contact("aa:00:00:00:00:03", "Far proxy", Some("hall"), None),
        ]);
        let changed = assign_area(&mut device, 20.0, &registry(), &mut LogLimiter::new(), 0.0);
        assert!(changed);
        let area = device.area.unwrap();
        assert_eq!(area.area_name, "Hall");
        assert_eq!(area.distance, 2.0);
        assert_eq!(area.scanner, "Hall proxy");
    }

    #[test]
    fn tie_goes_to_first_scanner() {
        let mut device = device_with(vec![
            contact("aa:00:00:00:00:02", "Hall proxy", Some("hall"), Some(3.0)),
            contact("aa:00:00:00:00:01", "Kitchen proxy", Some("kitchen"), Some(3.0)),
        ]);
        assign_area(&mut device, 20.0, &registry(), &mut LogLimiter::new(), 0.0);
        assert_eq!(device.area.unwrap().area_name, "Kitchen");
    }

    #[test]
    fn out_of_radius_clears_area() {
        let mut device = device_with(vec![contact(
            "aa:00:00:00:00:01",
            "Kitchen proxy",
            Some("kitchen"),
            Some(1.0),
        )]);
        assign_area(&mut device, 20.0, &registry(), &mut LogLimiter::new(), 0.0);
        assert!(device.area.is_some());

        device
            .contacts
            .values_mut()
            .for_each(|contact| contact.rssi_distance = Some(25.0));
        let changed = assign_area(&mut device, 20.0, &registry(), &mut LogLimiter::new(), 0.0);
        assert!(changed);
        assert_eq!(device.area, None);
    }

    #[test]
    fn missing_area_gets_placeholder() {
        let mut device = device_with(vec![contact("aa:00:00:00:00:01", "Shed proxy", None, Some(1.0))]);
        let mut limiter = LogLimiter::new();
        assign_area(&mut device, 20.0, &registry(), &mut limiter, 0.0);
        assert_eq!(device.area.unwrap().area_name, "No area: Shed proxy");
        assert!(!limiter.allow("scanner_no_area_Shed proxy", 1.0));
    }
}
