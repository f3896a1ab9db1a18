//! Configuration of the parser, the scheduler and the choker.
//!
//! Every field has a default, so a partial or empty file is valid:
//!
//! ```toml
//! [parser]
//! max_block_len = 131072
//! offer_fast = true
//! offer_extension = true
//!
//! [scheduler]
//! block_len = 16384
//! seed = 42
//!
//! [choker]
//! max_unchoked = 4
//! window_secs = 20
//! ```

use std::{io::ErrorKind, path::{Path, PathBuf}};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::{
    counter::DEFAULT_WINDOW,
    error::Error,
    extensions::core::{BLOCK_LEN, MAX_BLOCK_LEN},
};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub parser: ParserConfig,
    pub scheduler: SchedulerConfig,
    pub choker: ChokerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ParserConfig {
    /// Largest block accepted in a piece message, the maximum message size
    /// is this plus 9.
    pub max_block_len: usize,
    /// Advertise the Fast extension in our handshake.
    pub offer_fast: bool,
    /// Advertise the Extension protocol in our handshake.
    pub offer_extension: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_block_len: MAX_BLOCK_LEN,
            offer_fast: true,
            offer_extension: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Length of the requests, the last block of a piece may be shorter.
    pub block_len: u32,
    pub max_allowed_fast: usize,
    pub max_suggested: usize,
    /// Seed of the piece queue shuffle, random if absent.
    pub seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            block_len: BLOCK_LEN as u32,
            max_allowed_fast: 10,
            max_suggested: 10,
            seed: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ChokerConfig {
    pub max_unchoked: usize,
    /// Trailing window of the byte counters, and how long a newly unchoked
    /// peer is left alone.
    pub window_secs: u64,
}

impl Default for ChokerConfig {
    fn default() -> Self {
        Self { max_unchoked: 4, window_secs: DEFAULT_WINDOW.as_secs() }
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, Error> {
        let config = toml::from_str::<Config>(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string(self).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.scheduler.block_len == 0 {
            return Err(Error::ConfigError("block_len must not be 0".into()));
        }
        if self.scheduler.block_len as usize > self.parser.max_block_len {
            return Err(Error::ConfigError(format!(
                "block_len {} is larger than max_block_len {}",
                self.scheduler.block_len, self.parser.max_block_len
            )));
        }
        if self.choker.window_secs == 0 {
            return Err(Error::ConfigError("window_secs must not be 0".into()));
        }
        Ok(())
    }

    /// `swarm.toml` inside the configuration dir of the user.
    ///
    /// # Errors
    ///
    /// If the user does not have a home folder.
    pub fn default_path() -> Result<PathBuf, Error> {
        let dotfile =
            ProjectDirs::from("", "", "Vincenzo").ok_or(Error::HomeInvalid)?;
        let mut path = dotfile.config_dir().to_path_buf();
        path.push("swarm.toml");
        Ok(path)
    }

    /// Load the configuration file, a missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let s = match fs::read_to_string(path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no config at {path:?}, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        Self::from_toml(&s)
    }
}
