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

#![deny(
    missing_docs,
    clippy::indexing_slicing,
    clippy::unwrap_used,
    clippy::panic,
    clippy::expect_used
)]

//! Converts BLE RSSI samples into distances, corrects them for path loss and
//! obstructions, and fuses distances from several scanners into a position.

/// Log-distance model and per-link path-loss factors
pub mod distance_model;

/// Error types
pub mod error;

/// Least-squares multilateration
pub mod multilateration;

/// Sparse field-strength grid used to estimate wall crossings
pub mod obstruction_map;

pub use distance_model::{
    adjust_distance, distance_from_rssi, measured_loss, PathLossTable, DEFAULT_PATH_LOSS_FACTOR,
    PATH_LOSS_SMOOTHING_ALPHA,
};
pub use error::RangingError;
pub use multilateration::{position_error, solve_position, Position, MIN_MULTILATERATION_SOURCES};
pub use obstruction_map::ObstructionMap;
