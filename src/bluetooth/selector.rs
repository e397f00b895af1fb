// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Device selection by name.

use tracing::debug;

/// A paired peripheral as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralDescriptor {
    pub name: String,
    pub address: String,
}

impl PeripheralDescriptor {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// The selected peripheral and the accepted name that matched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatch<'a> {
    pub device: &'a PeripheralDescriptor,
    pub pattern: &'a str,
}

impl DeviceMatch<'_> {
    pub fn address(&self) -> &str {
        &self.device.address
    }
}

/// Pick the first candidate whose name contains any accepted substring,
/// ignoring case.
///
/// Candidates are checked in the order given; for each candidate the accepted
/// names are tried in order, so the reported pattern is the first one that
/// matched that candidate. Blank patterns never match.
pub fn select_device<'a>(
    candidates: &'a [PeripheralDescriptor],
    accepted: &'a [String],
) -> Option<DeviceMatch<'a>> {
    let patterns: Vec<(&str, String)> = accepted
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| (p, p.to_lowercase()))
        .collect();

    for device in candidates {
        let name = device.name.to_lowercase();
        for (pattern, lowered) in &patterns {
            if name.contains(lowered.as_str()) {
                debug!("'{}' matches '{}'", device.name, pattern);
                return Some(DeviceMatch {
                    device,
                    pattern: *pattern,
                });
            }
        }
    }

    None
}
