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

use log::{debug, info};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::address::DeviceAddress;
use crate::device::DeviceReport;
use crate::dump::DumpRequest;
use crate::error::LocatorError;
use crate::metadevice::PrivateDeviceUpdate;
use crate::ProviderEvent;

/// Receives the results of the update cycle.
pub trait DiscoveryCallback {
    /// A tracked device needs its sensors; `scanners` is the scanner roster.
    fn on_device_new(&self, address: &DeviceAddress, scanners: &[DeviceAddress]);
    fn on_device_updated(&self, report: DeviceReport);
    fn on_device_pruned(&self, _address: &DeviceAddress) {}
}

/// Presentation side handle to the engine.
#[derive(Clone)]
pub struct ClientProvider {
    provider_event_tx: mpsc::Sender<ProviderEvent>,
}

impl ClientProvider {
    pub fn new(provider_event_tx: mpsc::Sender<ProviderEvent>) -> Self {
        Self { provider_event_tx }
    }

    fn send(&self, event: ProviderEvent) -> Result<(), LocatorError> {
        self.provider_event_tx
            .blocking_send(event)
            .map_err(|e| LocatorError::EngineUnavailable(e.to_string()))
    }

    pub fn private_device_update(&self, update: PrivateDeviceUpdate) -> Result<(), LocatorError> {
        debug!("private device update for {}", update.irk);
        self.send(ProviderEvent::PrivateDeviceUpdate(update))
    }

    /// The scanner or area registry changed.
    pub fn registry_changed(&self) -> Result<(), LocatorError> {
        self.send(ProviderEvent::RegistryChanged)
    }

    pub fn sensor_created(&self, address: DeviceAddress) -> Result<(), LocatorError> {
        self.send(ProviderEvent::SensorCreated(address))
    }

    pub fn device_tracker_created(&self, address: DeviceAddress) -> Result<(), LocatorError> {
        self.send(ProviderEvent::DeviceTrackerCreated(address))
    }

    /// Blocks until the engine returns the diagnostic dump.
    pub fn dump_devices(&self, request: DumpRequest) -> Result<Value, LocatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ProviderEvent::DumpDevices(request, reply_tx))?;
        reply_rx
            .blocking_recv()
            .map_err(|e| LocatorError::EngineUnavailable(e.to_string()))
    }

    pub fn stop(&self) {
        info!("stop engine.");
        if let Err(e) = self.send(ProviderEvent::Stop) {
            info!("engine already gone: {}", e);
        }
    }
}
