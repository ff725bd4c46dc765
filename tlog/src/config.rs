// Copyright 2024 Google LLC
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

//! Configuration options the core consumes, mirroring the teacher's
//! `toml::from_str` + validate pattern. Discovering a config file's path
//! (searching `/etc`, `$HOME`, CLI flags) is left to the caller; this
//! module only deserializes and validates a config already in hand.

use std::{fs, path::Path};

use serde_derive::Deserialize;
use tracing::instrument;

use crate::{
    consts::{CHUNK_SIZE_MIN, IO_SIZE_MIN},
    error::{Error, ErrorKind, Result},
};

/// Which packet kinds get recorded. All kinds are on by default.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct LogMask {
    pub input: bool,
    pub output: bool,
    pub window: bool,
}

impl Default for LogMask {
    fn default() -> Self {
        LogMask { input: true, output: true, window: true }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Maximum chunk byte budget. Must be at least `CHUNK_SIZE_MIN`.
    pub payload: usize,
    /// Source I/O buffer size. Must be at least `IO_SIZE_MIN`.
    pub io_size: usize,
    /// Relax the source's cross-message id-gap checking.
    pub lax: bool,
    /// Which packet kinds to record.
    pub log: LogMask,
    /// Seconds between forced flushes at the sink.
    pub latency: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config { payload: CHUNK_SIZE_MIN, io_size: IO_SIZE_MIN, lax: false, log: LogMask::default(), latency: 10 }
    }
}

impl Config {
    /// Parse and validate a config from a TOML string.
    #[instrument(skip_all)]
    pub fn from_str(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a config from a TOML file.
    #[instrument(skip_all)]
    pub fn load_file(path: impl AsRef<Path>) -> Result<Config> {
        let data = fs::read_to_string(path)?;
        Config::from_str(&data)
    }

    fn validate(&self) -> Result<()> {
        if self.payload < CHUNK_SIZE_MIN {
            return Err(Error::with_detail(
                ErrorKind::Config,
                format!("payload {} is below the minimum of {CHUNK_SIZE_MIN}", self.payload),
            ));
        }
        if self.io_size < IO_SIZE_MIN {
            return Err(Error::with_detail(
                ErrorKind::Config,
                format!("io_size {} is below the minimum of {IO_SIZE_MIN}", self.io_size),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn parses_overridden_fields() {
        let config = Config::from_str(
            r#"
            payload = 4096
            io_size = 1024
            lax = true
            latency = 5

            [log]
            window = false
            "#,
        )
        .unwrap();
        assert_eq!(config.payload, 4096);
        assert_eq!(config.io_size, 1024);
        assert!(config.lax);
        assert_eq!(config.latency, 5);
        assert!(!config.log.window);
        assert!(config.log.input);
    }

    #[test]
    fn payload_below_minimum_is_rejected() {
        let err = Config::from_str("payload = 4").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Config);
    }

    #[test]
    fn io_size_below_minimum_is_rejected() {
        let err = Config::from_str("io_size = 1").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Config);
    }
}
