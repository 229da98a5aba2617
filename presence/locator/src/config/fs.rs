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

use std::fs;
use std::path::PathBuf;

use crate::config::{ConfigLoader, LocatorConfig};
use crate::error::LocatorError;

/// Loads the locator configuration from a JSON file on the local filesystem.
pub struct FsConfigLoader {
    path: PathBuf,
}

impl FsConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FsConfigLoader { path: path.into() }
    }
}

impl ConfigLoader for FsConfigLoader {
    fn load(&self) -> Result<LocatorConfig, LocatorError> {
        let contents = fs::read_to_string(&self.path).map_err(|err| {
            LocatorError::AccessDenied(format!("{}: {}", self.path.display(), err))
        })?;
        LocatorConfig::from_json(&contents)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"options": {{"max_radius": 12.0}}}}"#).unwrap();
        let config = FsConfigLoader::new(file.path()).load().unwrap();
        assert_eq!(config.options.max_radius, 12.0);
    }

    #[test]
    fn missing_file_is_access_denied() {
        let dir = tempfile::tempdir().unwrap();
        let result = FsConfigLoader::new(dir.path().join("absent.json")).load();
        assert!(matches!(result, Err(LocatorError::AccessDenied(_))));
    }

    #[test]
    fn invalid_json_is_contract_violation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let result = FsConfigLoader::new(file.path()).load();
        assert!(matches!(result, Err(LocatorError::ContractViolation(_))));
    }
}
