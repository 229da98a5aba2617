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

use log::{debug, error};
use tokio::sync::mpsc;

use crate::advertisement::Advertisement;
use crate::ProviderEvent;

/// Platform side entry point for advertisements heard by scanners.
pub struct AdvertisementCallback {
    provider_event_tx: mpsc::Sender<ProviderEvent>,
}

impl AdvertisementCallback {
    pub fn new(provider_event_tx: mpsc::Sender<ProviderEvent>) -> Self {
        Self { provider_event_tx }
    }

    /// Hands `advertisement` to the engine. Must not be called from within
    /// an async context.
    pub fn on_advertisement(&self, advertisement: Advertisement) {
        if let Err(e) = self
            .provider_event_tx
            .blocking_send(ProviderEvent::Advertisement(advertisement))
        {
            error!("Advertisement provider send error: {}", e);
        } else {
            debug!("Advertisement provider sent an event.");
        }
    }
}
