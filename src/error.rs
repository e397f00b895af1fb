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

//! Error types for bridge setup and Bluetooth channel I/O.

use std::io;
use thiserror::Error;

/// Failures that end a bridge run before or while it is being set up.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bluetooth adapter error: {0}")]
    Adapter(String),

    #[error("No paired Bluetooth device matches any of {patterns:?}")]
    NoMatchingDevice { patterns: Vec<String> },

    #[error("Invalid Bluetooth address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Connection to {address} timed out after {secs}s")]
    ConnectTimeout { address: String, secs: u64 },

    #[error("Failed to bind TCP listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cancelled by shutdown")]
    Cancelled,
}

/// Failures of a single read or write on the Bluetooth channel.
///
/// Both variants end the relay direction that hit them.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Bluetooth channel closed")]
    Closed,

    #[error("Bluetooth I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_lists_patterns() {
        let err = BridgeError::NoMatchingDevice {
            patterns: vec!["UV-PRO".to_string(), "GA-5WB".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("UV-PRO"));
        assert!(text.contains("GA-5WB"));
    }

    #[test]
    fn test_bind_error_keeps_source() {
        use std::error::Error as _;

        let err = BridgeError::Bind {
            addr: "0.0.0.0:8001".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("0.0.0.0:8001"));
        assert!(err.source().is_some());
    }
}
