//! runtime settings of the dictionary clients

use crate::error::DictResult;
use core::time::Duration;
use serde::Deserialize;
use std::path::Path;


/// what to do with an Intel-HEX record whose checksum does not match
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// report the record in the log and keep decoding
    #[default]
    Lenient,
    /// fail decoding
    Strict,
}

/**
    settings shared by the devices of a client

    It can be deserialized from YAML, with durations given in milliseconds and every field optional:

    ```yaml
    retry_interval_ms: 10
    max_retries: 1000
    max_failures: 3
    read_timeout_ms: 5000
    checksums: strict
    ```
*/
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// delay before polling again a read that had to wait for the device
    pub retry_interval_ms: u64,
    /// polls of one entry before giving up waiting for the device to be available, counted since the device last completed a read
    pub max_retries: u32,
    /// consecutive failed remote reads of one entry before giving up
    pub max_failures: u32,
    /// delay after which a remote call is considered lost
    pub read_timeout_ms: u64,
    /// handling of corrupted Intel-HEX records
    pub checksums: ChecksumPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 10,
            max_retries: 1000,
            max_failures: 3,
            read_timeout_ms: 5000,
            checksums: ChecksumPolicy::Lenient,
        }
    }
}

impl ClientConfig {
    pub fn retry_interval(&self) -> Duration {Duration::from_millis(self.retry_interval_ms)}
    pub fn read_timeout(&self) -> Duration {Duration::from_millis(self.read_timeout_ms)}

    pub fn from_yaml(text: &str) -> DictResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
    pub fn load(path: impl AsRef<Path>) -> DictResult<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }
}
