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

use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;
use crate::error::LocatorError;

/// Bluetooth SIG company identifier of Apple, which defines the iBeacon frame.
pub const APPLE_COMPANY_CODE: u16 = 0x004C;

const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];
const IBEACON_FRAME_LEN: usize = 23;

/// One manufacturer-specific data section of an advertisement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerData {
    pub company_code: u16,
    pub data: Vec<u8>,
}

impl ManufacturerData {
    pub fn new(company_code: u16, data: Vec<u8>) -> Self {
        ManufacturerData { company_code, data }
    }
}

/// A single advertisement as heard by one scanner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// The scanner that heard the advertisement.
    pub scanner: DeviceAddress,
    /// The advertising device.
    pub address: DeviceAddress,
    /// Received signal strength in dBm.
    pub rssi: i16,
    #[serde(default)]
    pub tx_power: Option<i8>,
    /// Monotonic time of reception, in seconds.
    pub stamp: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub local_name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub connectable: bool,
    #[serde(default)]
    pub manufacturer_data: Vec<ManufacturerData>,
}

impl Advertisement {
    /// Creates an advertisement carrying no payload.
    pub fn new(scanner: &str, address: &str, rssi: i16, stamp: f64) -> Self {
        Advertisement {
            scanner: DeviceAddress::new(scanner),
            address: DeviceAddress::new(address),
            rssi,
            tx_power: None,
            stamp,
            name: None,
            local_name: None,
            manufacturer: None,
            connectable: false,
            manufacturer_data: Vec::new(),
        }
    }

    pub fn with_manufacturer_data(mut self, section: ManufacturerData) -> Self {
        self.manufacturer_data.push(section);
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Fields of an iBeacon frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IBeacon {
    /// Proximity UUID as 32 lowercase hex digits.
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
    /// Calibrated RSSI at one meter, in dBm.
    pub power: i8,
}

impl IBeacon {
    /// Decodes an iBeacon frame.
    /// * Company code must be Apple's (0x004C).
    /// * Payload starts with type 0x02 and length 0x15.
    /// * uuid = bytes[2..18], major = BE u16 [18..20], minor = BE u16 [20..22],
    ///   power = signed byte [22].
    pub fn from_manufacturer_data(section: &ManufacturerData) -> Result<Self, LocatorError> {
        if section.company_code != APPLE_COMPANY_CODE {
            return Err(LocatorError::ContractViolation(format!(
                "company code {:#06x} does not carry iBeacon frames.",
                section.company_code
            )));
        }
        let data = &section.data;
        if !data.starts_with(&IBEACON_PREFIX) {
            return Err(LocatorError::ContractViolation(String::from(
                "manufacturer data is not an iBeacon frame.",
            )));
        }
        if data.len() < IBEACON_FRAME_LEN {
            return Err(LocatorError::ContractViolation(format!(
                "invalid iBeacon frame of length {}.",
                data.len()
            )));
        }
        let field = |range: std::ops::Range<usize>| {
            data.get(range).ok_or_else(|| {
                LocatorError::Internal(String::from("iBeacon field outside checked frame."))
            })
        };
        let uuid = field(2..18)?
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<String>();
        let major = u16::from_be_bytes([field(18..19)?[0], field(19..20)?[0]]);
        let minor = u16::from_be_bytes([field(20..21)?[0], field(21..22)?[0]]);
        let power = i8::from_be_bytes([field(22..23)?[0]]);
        Ok(IBeacon {
            uuid,
            major,
            minor,
            power,
        })
    }

    /// Identity shared by every radio broadcasting this beacon.
    pub fn unique_id(&self) -> String {
        format!("{}_{}_{}", self.uuid, self.major, self.minor)
    }
}

/// Cleans a name or payload string reported by a device: everything from the
/// first NUL on is dropped and surrounding whitespace trimmed.
pub fn clean_charbuf(raw: &str) -> String {
    raw.split('\0').next().unwrap_or_default().trim().to_string()
}

/// Lowercase hex rendering of a byte buffer.
pub fn hex_string(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{:02x}", byte)).collect()
}
