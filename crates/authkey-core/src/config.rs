//! Client configuration
//!
//! Timing and firmware constants for a [`DeviceClient`](crate::DeviceClient).
//! Everything has a default matching the shipping firmware; a JSON file can
//! override any subset of fields.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    ProtocolError, COMMAND_CANCELLED, COMMAND_NOT_FOUND, COMMAND_PREFIX, DEFAULT_BAUD_RATE,
    DEVICE_PID, DEVICE_VID, ECHO_TIMEOUT_MS, END_OF_RESPONSE, LINE_ENDING, PIN_REQUEST,
    POLL_INTERVAL_MS, PROBE_TIMEOUT_MS, RESPONSE_TIMEOUT_MS, RETRY_DELAY_MS,
};

/// Firmware CLI contract: identifiers and sentinel strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// USB vendor ID
    pub vid: u16,
    /// USB product ID
    pub pid: u16,
    /// Prefix of token commands (e.g. `totp list`)
    pub command_prefix: String,
    /// Prompt printed after each response
    pub end_marker: String,
    /// Text shown while the device waits for a keypad PIN
    pub pin_request: String,
    /// Text shown when a command is declined on the device
    pub cancelled: String,
    /// Shell message for unknown commands
    pub command_not_found: String,
    /// Appended to every command line
    pub line_ending: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            vid: DEVICE_VID,
            pid: DEVICE_PID,
            command_prefix: COMMAND_PREFIX.to_string(),
            end_marker: END_OF_RESPONSE.to_string(),
            pin_request: PIN_REQUEST.to_string(),
            cancelled: COMMAND_CANCELLED.to_string(),
            command_not_found: COMMAND_NOT_FOUND.to_string(),
            line_ending: LINE_ENDING.to_string(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Interval between device discovery polls (ms)
    pub poll_interval_ms: u64,
    /// Initial delay before retrying a failed open/probe (ms)
    pub retry_delay_ms: u64,
    /// Upper bound for the doubling retry delay (ms)
    pub max_retry_delay_ms: u64,
    /// Shell-ready probe deadline (ms)
    pub probe_timeout_ms: u64,
    /// Deadline for reading back the command echo (ms)
    pub echo_timeout_ms: u64,
    /// Deadline for the main response read (ms)
    pub response_timeout_ms: u64,
    /// Delay before re-sending a command the shell did not recognize (ms)
    pub not_found_retry_ms: u64,
    /// Firmware constants
    pub profile: DeviceProfile,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            poll_interval_ms: POLL_INTERVAL_MS,
            retry_delay_ms: RETRY_DELAY_MS,
            max_retry_delay_ms: RETRY_DELAY_MS,
            probe_timeout_ms: PROBE_TIMEOUT_MS,
            echo_timeout_ms: ECHO_TIMEOUT_MS,
            response_timeout_ms: RESPONSE_TIMEOUT_MS,
            not_found_retry_ms: RETRY_DELAY_MS,
            profile: DeviceProfile::default(),
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ProtocolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    /// Reject settings the protocol cannot work with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::Config("baud_rate must be non-zero".into()));
        }
        let sentinels = [
            ("end_marker", &self.profile.end_marker),
            ("pin_request", &self.profile.pin_request),
            ("cancelled", &self.profile.cancelled),
            ("command_not_found", &self.profile.command_not_found),
        ];
        for (name, value) in sentinels {
            if value.is_empty() {
                return Err(ProtocolError::Config(format!("{} must not be empty", name)));
            }
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(ProtocolError::Config(format!(
                "max_retry_delay_ms ({}) is below retry_delay_ms ({})",
                self.max_retry_delay_ms, self.retry_delay_ms
            )));
        }
        Ok(())
    }

    /// Device discovery poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Initial connect retry delay
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Connect retry delay cap
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Shell-ready probe deadline
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Echo read deadline
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    /// Response read deadline
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Delay before resending an unrecognized command
    pub fn not_found_retry(&self) -> Duration {
        Duration::from_millis(self.not_found_retry_ms)
    }
}
