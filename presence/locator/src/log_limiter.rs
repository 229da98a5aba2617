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

use std::collections::HashMap;

/// Minimum spacing between two messages logged under the same key.
pub const LOG_LIMIT_INTERVAL_SECS: f64 = 300.0;

/// Suppresses repeats of a log message keyed by a string.
#[derive(Debug, Default)]
pub struct LogLimiter {
    last_logged: HashMap<String, f64>,
}

impl LogLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when a message keyed by `key` may be logged at `now`,
    /// and records that it was.
    pub fn allow(&mut self, key: &str, now: f64) -> bool {
        self.last_logged
            .retain(|_, last| now - *last < LOG_LIMIT_INTERVAL_SECS);
        match self.last_logged.get(key) {
            Some(last) if now - last < LOG_LIMIT_INTERVAL_SECS => false,
            _ => {
                self.last_logged.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Drops every key built for `subject`, e.g. a pruned device address.
    pub fn forget(&mut self, subject: &str) {
        let suffix = format!("_{}", subject);
        self.last_logged.retain(|key, _| !key.ends_with(&suffix));
    }

    pub fn len(&self) -> usize {
        self.last_logged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.is_empty()
    }
}
