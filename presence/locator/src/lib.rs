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

//! Locates BLE devices from the RSSI reported by fixed scanners: keeps the
//! per device state, merges rotating identities, assigns areas and runs the
//! update cycle behind a provider/engine event loop.

pub mod address;
pub mod advert_cache;
pub mod advertisement;
pub mod advertisement_provider;
pub mod area;
pub mod client_provider;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod dump;
pub mod error;
pub mod log_limiter;
pub mod metadevice;
pub mod prune;
pub mod registry;
pub mod scanner_contact;

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::Value;
use tokio::runtime::Builder;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::address::DeviceAddress;
use crate::advertisement::Advertisement;
use crate::advertisement_provider::AdvertisementCallback;
use crate::client_provider::{ClientProvider, DiscoveryCallback};
use crate::config::{ConfigLoader, LocatorConfig};
use crate::coordinator::{Coordinator, CycleEvent, CYCLE_INTERVAL_SECS};
use crate::dump::DumpRequest;
use crate::error::LocatorError;
use crate::metadevice::PrivateDeviceUpdate;

const PROVIDER_EVENT_CHANNEL_BUF_SIZE: usize = 100;

pub enum ProviderEvent {
    Advertisement(Advertisement),
    PrivateDeviceUpdate(PrivateDeviceUpdate),
    RegistryChanged,
    SensorCreated(DeviceAddress),
    DeviceTrackerCreated(DeviceAddress),
    DumpDevices(DumpRequest, oneshot::Sender<Value>),
    Stop,
}

/// Monotonic seconds since the engine was created. Shared by the platform
/// and the engine so advertisement stamps and cycle times agree.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LocatorEngine {
    pub engine: Engine,
    pub client_provider: ClientProvider,
    pub advertisement_callback: AdvertisementCallback,
    pub clock: MonotonicClock,
}

impl LocatorEngine {
    pub fn new(
        config: &LocatorConfig,
        discovery_callback: Box<dyn DiscoveryCallback + Send>,
    ) -> Self {
        info!("Create Locator Engine.");
        let (provider_tx, provider_rx) =
            mpsc::channel::<ProviderEvent>(PROVIDER_EVENT_CHANNEL_BUF_SIZE);
        let clock = MonotonicClock::new();
        Self {
            engine: Engine::new(
                provider_rx,
                discovery_callback,
                Coordinator::new(config),
                clock,
            ),
            client_provider: ClientProvider::new(provider_tx.clone()),
            advertisement_callback: AdvertisementCallback::new(provider_tx),
            clock,
        }
    }

    pub fn from_loader(
        loader: &dyn ConfigLoader,
        discovery_callback: Box<dyn DiscoveryCallback + Send>,
    ) -> Result<Self, LocatorError> {
        let config = loader.load()?;
        Ok(Self::new(&config, discovery_callback))
    }
}

pub struct Engine {
    // Receive events from Providers.
    provider_rx: mpsc::Receiver<ProviderEvent>,
    discovery_callback: Box<dyn DiscoveryCallback + Send>,
    coordinator: Coordinator,
    clock: MonotonicClock,
}

impl Engine {
    pub fn new(
        provider_rx: mpsc::Receiver<ProviderEvent>,
        discovery_callback: Box<dyn DiscoveryCallback + Send>,
        coordinator: Coordinator,
        clock: MonotonicClock,
    ) -> Self {
        Self {
            provider_rx,
            discovery_callback,
            coordinator,
            clock,
        }
    }

    /// Runs the event loop on the calling thread until `Stop` arrives or
    /// every provider is dropped.
    pub fn run(&mut self) -> Result<(), LocatorError> {
        info!("Run Locator Engine.");
        Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| LocatorError::Internal(e.to_string()))?
            .block_on(async {
                self.poll_providers().await;
            });
        Ok(())
    }

    async fn poll_providers(&mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(CYCLE_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = self.provider_rx.recv() => match event {
                    Some(ProviderEvent::Stop) | None => {
                        info!("Engine stopped");
                        break;
                    }
                    Some(event) => self.process_event(event),
                },
                _ = ticker.tick() => self.run_cycle(),
            }
        }
    }

    fn process_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::Advertisement(advertisement) => {
                debug!(
                    "advertisement from {} via {} at {} dBm",
                    advertisement.address, advertisement.scanner, advertisement.rssi
                );
                self.coordinator
                    .enqueue(CycleEvent::Advertisement(advertisement));
                if self.coordinator.should_update_on_advert(self.clock.now()) {
                    self.run_cycle();
                }
            }
            ProviderEvent::PrivateDeviceUpdate(update) => {
                self.coordinator
                    .enqueue(CycleEvent::PrivateDeviceUpdate(update));
            }
            ProviderEvent::RegistryChanged => self.coordinator.enqueue(CycleEvent::RegistryChanged),
            ProviderEvent::SensorCreated(address) => {
                if let Err(e) = self.coordinator.sensor_created(&address) {
                    debug!("sensor_created ignored: {}", e);
                }
            }
            ProviderEvent::DeviceTrackerCreated(address) => {
                if let Err(e) = self.coordinator.device_tracker_created(&address) {
                    debug!("device_tracker_created ignored: {}", e);
                }
            }
            ProviderEvent::DumpDevices(request, reply) => {
                let dump = self.coordinator.dump_devices(&request, self.clock.now());
                if reply.send(dump).is_err() {
                    warn!("Dump requester went away.");
                }
            }
            ProviderEvent::Stop => {}
        }
    }

    fn run_cycle(&mut self) {
        let report = self.coordinator.run_cycle(self.clock.now());
        for device in &report.new_devices {
            self.discovery_callback
                .on_device_new(&device.address, &device.scanners);
        }
        for device in report.updated {
            self.discovery_callback.on_device_updated(device);
        }
        for address in &report.pruned {
            self.discovery_callback.on_device_pruned(address);
        }
    }
}
