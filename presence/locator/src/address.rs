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

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

const MAC48_HEX_DIGITS: usize = 12;
const MAC48_TEXT_LEN: usize = 17;
const IBEACON_UUID_HEX_DIGITS: usize = 32;

/// How an address was formed, which decides how long its record may live.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// A MAC-48 address that does not rotate.
    Mac48,
    /// A random address that rotates for privacy and is resolved with an IRK.
    PrivateResolvable,
    /// Synthetic `uuid_major_minor` identity of an iBeacon.
    IBeacon,
    /// Any other synthetic identity, e.g. an IRK naming a private BLE device.
    NotMac48,
}

impl AddressType {
    /// Whether the address was observed over the air rather than made up.
    pub fn is_mac_derived(self) -> bool {
        matches!(self, AddressType::Mac48 | AddressType::PrivateResolvable)
    }
}

/// Normalized identifier of a device record.
///
/// MAC addresses are stored lowercase and colon separated whatever notation
/// they arrived in; every other identity is stored lowercase.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Normalizes `raw` into an address.
    pub fn new(raw: &str) -> Self {
        DeviceAddress(format_mac(raw))
    }

    /// The normalized text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classifies the address.
    pub fn address_type(&self) -> AddressType {
        if is_mac48(&self.0) {
            let first_octet = self
                .0
                .get(..2)
                .and_then(|octet| u8::from_str_radix(octet, 16).ok())
                .unwrap_or(0);
            // Resolvable private addresses carry 0b01 in the two top bits.
            if first_octet >> 6 == 0b01 {
                AddressType::PrivateResolvable
            } else {
                AddressType::Mac48
            }
        } else if is_ibeacon_id(&self.0) {
            AddressType::IBeacon
        } else {
            AddressType::NotMac48
        }
    }

    /// The address with every non-alphanumeric character replaced by `_`.
    pub fn slug(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl From<&str> for DeviceAddress {
    fn from(raw: &str) -> Self {
        DeviceAddress::new(raw)
    }
}

impl From<String> for DeviceAddress {
    fn from(raw: String) -> Self {
        DeviceAddress::new(&raw)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn format_mac(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if digits.len() == MAC48_HEX_DIGITS && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        digits
            .to_ascii_lowercase()
            .chars()
            .chunks(2)
            .into_iter()
            .map(|octet| octet.collect::<String>())
            .join(":")
    } else {
        trimmed.to_lowercase()
    }
}

fn is_mac48(text: &str) -> bool {
    text.len() == MAC48_TEXT_LEN
        && text.split(':').count() == 6
        && text
            .split(':')
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_ibeacon_id(text: &str) -> bool {
    let parts: Vec<&str> = text.split('_').collect();
    match parts.as_slice() {
        [uuid, major, minor] => {
            uuid.len() == IBEACON_UUID_HEX_DIGITS
                && uuid.chars().all(|c| c.is_ascii_hexdigit())
                && !major.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && !minor.is_empty()
                && minor.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

// Separator of a MAC-like `text` written with `:`, `-` or `_` between octets.
fn mac_like_separator(text: &str) -> Option<char> {
    let separator = text.chars().nth(2)?;
    if !matches!(separator, ':' | '-' | '_') || text.len() != MAC48_TEXT_LEN {
        return None;
    }
    let octets: Vec<&str> = text.split(separator).collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));
    well_formed.then_some(separator)
}

/// Masks the four middle octets of every MAC-like substring, keeping the
/// first and last octet, e.g. `aa:xx:xx:xx:xx:ff`.
pub fn redact_mac_like(text: &str) -> String {
    let mut redacted = String::with_capacity(text.len());
    let mut rest = text;
    while !rest.is_empty() {
        let candidate = rest.get(..MAC48_TEXT_LEN);
        match candidate.and_then(|c| mac_like_separator(c).map(|sep| (c, sep))) {
            Some((candidate, sep)) => {
                redacted.push_str(candidate.get(..2).unwrap_or_default());
                for _ in 0..4 {
                    redacted.push(sep);
                    redacted.push_str("xx");
                }
                redacted.push(sep);
                redacted.push_str(candidate.get(MAC48_TEXT_LEN - 2..).unwrap_or_default());
                rest = rest.get(MAC48_TEXT_LEN..).unwrap_or_default();
            }
            None => {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    redacted.push(c);
                }
                rest = chars.as_str();
            }
        }
    }
    redacted
}
