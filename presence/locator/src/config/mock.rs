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

use crate::config::{ConfigLoader, LocatorConfig};
use crate::error::LocatorError;

/// A loader returning a canned configuration.
pub(crate) struct ConfigLoaderMock {
    config: Result<LocatorConfig, LocatorError>,
}

impl ConfigLoaderMock {
    pub(crate) fn new(config: Result<LocatorConfig, LocatorError>) -> Self {
        ConfigLoaderMock { config }
    }
}

impl ConfigLoader for ConfigLoaderMock {
    fn load(&self) -> Result<LocatorConfig, LocatorError> {
        self.config.clone()
    }
}
