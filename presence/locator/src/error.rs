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

use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Clone)]
pub enum LocatorError {
    /// Reported when a requested resource could not be accessed, either because
    /// it's missing or because the user lacks access permissions.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// Reported when data does not follow the format it claims to carry. For
    /// example, iBeacon frames with invalid lengths or configuration JSON with
    /// bad formatting.
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// Reported when an advertisement names a scanner that is not part of the
    /// scanner roster, even after a refresh.
    #[error("unknown scanner: {0}")]
    UnknownScanner(String),
    /// Reported when the engine's event channel is gone, e.g. after it
    /// stopped.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),
    /// Reported when a bug occurs inside the library. Whenever a seemingly
    /// impossible error condition arises where you could call `expect()`,
    /// return this error instead.
    #[error("internal error: {0}")]
    Internal(String),
}
